//! Length-aware convolution stacks for padded speech batches.
//!
//! Padded frames must not leak into valid frames through the convolution
//! receptive field, so [`MaskConv1d`] zeroes every time step at or beyond a
//! sequence's length before convolving, and [`MaskCnn`] re-applies the mask
//! after each module of a 2-D stack. Both report the output lengths produced
//! by the convolution arithmetic
//! `(len + 2 * padding - dilation * (kernel - 1) - 1) / stride + 1`.

use candle_core::{DType, Device, Module, ModuleT, Result, Tensor};
use candle_nn::{init, BatchNorm, Conv1d, Conv1dConfig, Init, VarBuilder};

use crate::activations::Activation;
use crate::checks;

/// Output length of a convolution along one axis.
///
/// Lengths too short to cover a single kernel window produce zero, as do a
/// zero kernel or stride.
pub fn conv_output_length(
    length: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
) -> usize {
    if kernel == 0 || stride == 0 {
        return 0;
    }
    (length + 2 * padding)
        .checked_sub(dilation * (kernel - 1) + 1)
        .map_or(0, |span| span / stride + 1)
}

/// Builds a `(batch, max_len)` tensor holding `1` on valid frames and `0` on
/// padding.
pub fn time_mask(lengths: &[usize], max_len: usize, dtype: DType, device: &Device) -> Result<Tensor> {
    let mut flags = Vec::with_capacity(lengths.len() * max_len);
    for &len in lengths {
        let len = len.min(max_len);
        flags.extend((0..max_len).map(|t| if t < len { 1u8 } else { 0u8 }));
    }
    Tensor::from_vec(flags, (lengths.len(), max_len), device)?.to_dtype(dtype)
}

/// Hyper-parameters for [`MaskConv1d`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskConv1dConfig {
    pub stride: usize,
    pub padding: usize,
    pub dilation: usize,
    pub bias: bool,
}

impl Default for MaskConv1dConfig {
    fn default() -> Self {
        Self {
            stride: 1,
            padding: 0,
            dilation: 1,
            bias: false,
        }
    }
}

/// 1-D convolution over `(batch, channels, time)` inputs that masks padded
/// frames before convolving.
#[derive(Debug, Clone)]
pub struct MaskConv1d {
    conv: Conv1d,
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    config: MaskConv1dConfig,
}

impl MaskConv1d {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        config: MaskConv1dConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        checks::expect_positive(in_channels, "in_channels")?;
        checks::expect_positive(out_channels, "out_channels")?;
        checks::expect_positive(kernel_size, "kernel_size")?;
        checks::expect_positive(config.stride, "stride")?;
        checks::expect_positive(config.dilation, "dilation")?;

        let conv_cfg = Conv1dConfig {
            padding: config.padding,
            stride: config.stride,
            dilation: config.dilation,
            ..Default::default()
        };
        let conv = if config.bias {
            candle_nn::conv1d(in_channels, out_channels, kernel_size, conv_cfg, vb)?
        } else {
            candle_nn::conv1d_no_bias(in_channels, out_channels, kernel_size, conv_cfg, vb)?
        };
        Ok(Self {
            conv,
            in_channels,
            out_channels,
            kernel_size,
            config,
        })
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn config(&self) -> &MaskConv1dConfig {
        &self.config
    }

    pub fn output_lengths(&self, lengths: &[usize]) -> Vec<usize> {
        lengths
            .iter()
            .map(|&len| {
                conv_output_length(
                    len,
                    self.kernel_size,
                    self.config.stride,
                    self.config.padding,
                    self.config.dilation,
                )
            })
            .collect()
    }

    /// `inputs` is `(batch, in_channels, time)`; returns the convolved
    /// features and their per-row lengths.
    pub fn forward(&self, inputs: &Tensor, lengths: &[usize]) -> Result<(Tensor, Vec<usize>)> {
        let (batch, channels, time) = inputs.dims3()?;
        if channels != self.in_channels {
            return Err(candle_core::Error::Msg(format!(
                "expected {} input channels, got {channels}",
                self.in_channels
            )));
        }
        checks::expect_lengths(lengths, batch)?;

        let mask = time_mask(lengths, time, inputs.dtype(), inputs.device())?.unsqueeze(1)?;
        let masked = inputs.broadcast_mul(&mask)?;
        let output = self.conv.forward(&masked)?;
        Ok((output, self.output_lengths(lengths)))
    }
}

/// Geometry of a 2-D convolution with independent height and width settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2dSpec {
    pub in_channels: usize,
    pub out_channels: usize,
    /// `(height, width)`; width is the time axis.
    pub kernel: (usize, usize),
    pub stride: (usize, usize),
    pub padding: (usize, usize),
    pub bias: bool,
}

impl Conv2dSpec {
    /// Square kernel, unit stride, same padding.
    pub fn same(in_channels: usize, out_channels: usize, kernel: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel: (kernel, kernel),
            stride: (1, 1),
            padding: (kernel / 2, kernel / 2),
            bias: false,
        }
    }

    pub fn output_size(&self, height: usize, width: usize) -> (usize, usize) {
        (
            conv_output_length(height, self.kernel.0, self.stride.0, self.padding.0, 1),
            conv_output_length(width, self.kernel.1, self.stride.1, self.padding.1, 1),
        )
    }
}

/// 2-D convolution supporting rectangular strides and padding.
///
/// Padding is applied explicitly. When the two strides differ the kernel runs
/// at unit stride and rows/columns are subsampled afterwards, which yields the
/// same positions as a strided convolution.
#[derive(Debug, Clone)]
pub struct Conv2dLayer {
    weight: Tensor,
    bias: Option<Tensor>,
    spec: Conv2dSpec,
}

impl Conv2dLayer {
    pub fn new(spec: Conv2dSpec, vb: VarBuilder) -> Result<Self> {
        checks::expect_positive(spec.in_channels, "in_channels")?;
        checks::expect_positive(spec.out_channels, "out_channels")?;
        checks::expect_positive(spec.kernel.0 * spec.kernel.1, "kernel")?;
        checks::expect_positive(spec.stride.0 * spec.stride.1, "stride")?;

        let (kh, kw) = spec.kernel;
        let weight = vb.get_with_hints(
            (spec.out_channels, spec.in_channels, kh, kw),
            "weight",
            init::DEFAULT_KAIMING_NORMAL,
        )?;
        let bias = if spec.bias {
            let bound = 1.0 / ((spec.in_channels * kh * kw) as f64).sqrt();
            Some(vb.get_with_hints(
                spec.out_channels,
                "bias",
                Init::Uniform {
                    lo: -bound,
                    up: bound,
                },
            )?)
        } else {
            None
        };
        Ok(Self { weight, bias, spec })
    }

    pub fn spec(&self) -> &Conv2dSpec {
        &self.spec
    }

    fn subsample(tensor: Tensor, dim: usize, step: usize) -> Result<Tensor> {
        if step == 1 {
            return Ok(tensor);
        }
        let size = tensor.dim(dim)?;
        let index: Vec<u32> = (0..size).step_by(step).map(|i| i as u32).collect();
        let index = Tensor::from_vec(index, size.div_ceil(step), tensor.device())?;
        tensor.index_select(&index, dim)
    }
}

impl Module for Conv2dLayer {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (ph, pw) = self.spec.padding;
        let (sh, sw) = self.spec.stride;
        let padded = xs.pad_with_zeros(2, ph, ph)?.pad_with_zeros(3, pw, pw)?;

        let output = if sh == sw {
            padded.conv2d(&self.weight, 0, sh, 1, 1)?
        } else {
            let dense = padded.conv2d(&self.weight, 0, 1, 1, 1)?;
            let rows = Self::subsample(dense, 2, sh)?;
            Self::subsample(rows, 3, sw)?
        };

        match &self.bias {
            Some(bias) => output.broadcast_add(&bias.reshape((1, self.spec.out_channels, 1, 1))?),
            None => Ok(output),
        }
    }
}

/// One stage of a [`MaskCnn`] stack.
#[derive(Debug)]
pub enum MaskCnnModule {
    Conv(Conv2dLayer),
    BatchNorm(BatchNorm),
    Activation(Box<dyn Activation>),
    /// Square max-pooling with stride equal to the window.
    MaxPool(usize),
}

impl MaskCnnModule {
    fn forward(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        match self {
            MaskCnnModule::Conv(conv) => conv.forward(xs),
            MaskCnnModule::BatchNorm(bn) => bn.forward_t(xs, train),
            MaskCnnModule::Activation(act) => act.forward(xs),
            MaskCnnModule::MaxPool(window) => xs.max_pool2d(*window),
        }
    }

    fn output_length(&self, length: usize) -> usize {
        match self {
            MaskCnnModule::Conv(conv) => conv.spec().output_size(0, length).1,
            MaskCnnModule::MaxPool(window) => length / window,
            MaskCnnModule::BatchNorm(_) | MaskCnnModule::Activation(_) => length,
        }
    }
}

/// Sequential 2-D stack over `(batch, channels, height, time)` that zeroes
/// padded time steps after every module.
#[derive(Debug)]
pub struct MaskCnn {
    modules: Vec<MaskCnnModule>,
}

impl MaskCnn {
    pub fn new(modules: Vec<MaskCnnModule>) -> Result<Self> {
        for module in &modules {
            if let MaskCnnModule::MaxPool(window) = module {
                checks::expect_positive(*window, "max-pool window")?;
            }
        }
        Ok(Self { modules })
    }

    pub fn modules(&self) -> &[MaskCnnModule] {
        &self.modules
    }

    /// Channel count leaving the stack given `in_channels` entering it.
    pub fn output_channels(&self, in_channels: usize) -> usize {
        self.modules
            .iter()
            .fold(in_channels, |channels, module| match module {
                MaskCnnModule::Conv(conv) => conv.spec().out_channels,
                _ => channels,
            })
    }

    /// Height (feature axis) leaving the stack given `height` entering it.
    pub fn output_height(&self, height: usize) -> usize {
        self.modules.iter().fold(height, |h, module| match module {
            MaskCnnModule::Conv(conv) => conv.spec().output_size(h, 0).0,
            MaskCnnModule::MaxPool(window) => h / window,
            _ => h,
        })
    }

    pub fn output_lengths(&self, lengths: &[usize]) -> Vec<usize> {
        lengths
            .iter()
            .map(|&len| {
                self.modules
                    .iter()
                    .fold(len, |len, module| module.output_length(len))
            })
            .collect()
    }

    pub fn forward(&self, inputs: &Tensor, lengths: &[usize], train: bool) -> Result<(Tensor, Vec<usize>)> {
        let (batch, _, _, _) = inputs.dims4()?;
        checks::expect_lengths(lengths, batch)?;

        let mut output = inputs.clone();
        let mut lengths = lengths.to_vec();
        for module in &self.modules {
            output = module.forward(&output, train)?;
            lengths = lengths
                .into_iter()
                .map(|len| module.output_length(len))
                .collect();

            let time = output.dim(3)?;
            let mask = time_mask(&lengths, time, output.dtype(), output.device())?
                .reshape((batch, 1, 1, time))?;
            output = output.broadcast_mul(&mask)?;
        }
        Ok((output, lengths))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activations::{activation, ActivationKind};
    use candle_nn::{BatchNormConfig, VarMap};
    use std::collections::HashMap;

    #[test]
    fn output_length_formula_matches_conv_arithmetic() {
        assert_eq!(conv_output_length(10, 3, 1, 1, 1), 10);
        assert_eq!(conv_output_length(10, 11, 2, 5, 1), 5);
        assert_eq!(conv_output_length(9, 3, 1, 2, 2), 9);
        assert_eq!(conv_output_length(0, 3, 1, 1, 1), 0);
        assert_eq!(conv_output_length(1, 41, 2, 0, 1), 0);
        assert_eq!(conv_output_length(10, 0, 1, 0, 1), 0);
        assert_eq!(conv_output_length(10, 3, 0, 0, 1), 0);
    }

    #[test]
    fn mask_conv_ignores_padded_frames() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let conv = MaskConv1d::new(
            2,
            3,
            3,
            MaskConv1dConfig {
                padding: 1,
                ..Default::default()
            },
            vb,
        )?;

        let base = Tensor::randn(0f32, 1.0, (1, 2, 6), &device)?;
        let noise = Tensor::randn(0f32, 10.0, (1, 2, 2), &device)?;
        let corrupted = Tensor::cat(&[&base.narrow(2, 0, 4)?, &noise], 2)?;

        let (clean, lengths) = conv.forward(&base, &[4])?;
        let (dirty, _) = conv.forward(&corrupted, &[4])?;
        assert_eq!(lengths, vec![4]);

        let diff = (clean - dirty)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(diff < 1e-6);
        Ok(())
    }

    #[test]
    fn mask_conv_reports_strided_lengths() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let conv = MaskConv1d::new(
            1,
            1,
            11,
            MaskConv1dConfig {
                stride: 2,
                padding: 5,
                ..Default::default()
            },
            vb,
        )?;
        let inputs = Tensor::ones((2, 1, 20), DType::F32, &device)?;
        let (output, lengths) = conv.forward(&inputs, &[20, 13])?;
        assert_eq!(output.dims(), &[2, 1, 10]);
        assert_eq!(lengths, vec![10, 7]);
        Ok(())
    }

    #[test]
    fn rectangular_stride_matches_dense_subsampling() -> Result<()> {
        let device = Device::Cpu;
        let weight = Tensor::randn(0f32, 1.0, (2, 1, 3, 3), &device)?;
        let tensors = HashMap::from([("weight".to_string(), weight.clone())]);
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
        let conv = Conv2dLayer::new(
            Conv2dSpec {
                in_channels: 1,
                out_channels: 2,
                kernel: (3, 3),
                stride: (2, 1),
                padding: (1, 1),
                bias: false,
            },
            vb,
        )?;

        let inputs = Tensor::randn(0f32, 1.0, (1, 1, 8, 5), &device)?;
        let output = conv.forward(&inputs)?;
        assert_eq!(output.dims(), &[1, 2, 4, 5]);
        assert_eq!(conv.spec().output_size(8, 5), (4, 5));

        let dense = inputs.conv2d(&weight, 1, 1, 1, 1)?;
        let rows = Tensor::new(&[0u32, 2, 4, 6], &device)?;
        let expected = dense.index_select(&rows, 2)?;
        let diff = (output - expected)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(diff < 1e-5);
        Ok(())
    }

    #[test]
    fn mask_cnn_zeroes_time_steps_beyond_length() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let cnn = MaskCnn::new(vec![
            MaskCnnModule::Conv(Conv2dLayer::new(Conv2dSpec::same(1, 4, 3), vb.pp("0"))?),
            MaskCnnModule::BatchNorm(candle_nn::batch_norm(
                4,
                BatchNormConfig::default(),
                vb.pp("1"),
            )?),
            MaskCnnModule::Activation(activation(ActivationKind::Hardtanh)),
            MaskCnnModule::MaxPool(2),
        ])?;
        assert_eq!(cnn.output_channels(1), 4);
        assert_eq!(cnn.output_height(8), 4);

        let inputs = Tensor::randn(0f32, 1.0, (2, 1, 8, 10), &device)?;
        let (output, lengths) = cnn.forward(&inputs, &[10, 6], false)?;
        assert_eq!(output.dims(), &[2, 4, 4, 5]);
        assert_eq!(lengths, vec![5, 3]);

        let tail = output.get(1)?.narrow(2, 3, 2)?;
        let tail_max = tail.abs()?.max_all()?.to_vec0::<f32>()?;
        assert_eq!(tail_max, 0.0);
        Ok(())
    }

    #[test]
    fn mask_cnn_rejects_empty_pool_window() -> Result<()> {
        assert!(MaskCnn::new(vec![MaskCnnModule::MaxPool(0)]).is_err());
        let cnn = MaskCnn::new(vec![MaskCnnModule::MaxPool(2)])?;
        assert_eq!(cnn.output_lengths(&[4, 5]), vec![2, 2]);
        assert_eq!(cnn.output_height(7), 3);
        Ok(())
    }
}

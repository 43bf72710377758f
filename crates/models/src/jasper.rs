//! Jasper convolutional blocks.
//!
//! A sub-block is `MaskConv1d -> BatchNorm(eps 1e-3) -> [+ residual] ->
//! activation -> dropout`. A block chains `num_sub_blocks` sub-blocks with
//! "same" padding and feeds the residual only into the last one.

use candle_core::{ModuleT, Tensor};
use candle_nn::{BatchNorm, BatchNormConfig, Dropout, VarBuilder};
use layers::{activation, Activation, ActivationKind, MaskConv1d, MaskConv1dConfig};

use crate::config::JasperBlockConfig;
use crate::error::{ModelError, Result};

const BATCH_NORM_EPS: f64 = 1e-3;
const BATCH_NORM_MOMENTUM: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JasperSubBlockConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub dilation: usize,
    pub padding: usize,
    pub bias: bool,
    pub dropout_p: f32,
    pub activation: ActivationKind,
}

#[derive(Debug)]
pub struct JasperSubBlock {
    conv: MaskConv1d,
    batch_norm: BatchNorm,
    activation: Box<dyn Activation>,
    dropout: Dropout,
}

impl JasperSubBlock {
    pub fn new(config: JasperSubBlockConfig, vb: VarBuilder) -> Result<Self> {
        let conv = MaskConv1d::new(
            config.in_channels,
            config.out_channels,
            config.kernel_size,
            MaskConv1dConfig {
                stride: config.stride,
                padding: config.padding,
                dilation: config.dilation,
                bias: config.bias,
            },
            vb.pp("conv"),
        )?;
        let batch_norm = candle_nn::batch_norm(
            config.out_channels,
            BatchNormConfig {
                eps: BATCH_NORM_EPS,
                momentum: BATCH_NORM_MOMENTUM,
                ..Default::default()
            },
            vb.pp("batch_norm"),
        )?;
        Ok(Self {
            conv,
            batch_norm,
            activation: activation(config.activation),
            dropout: Dropout::new(config.dropout_p),
        })
    }

    /// `inputs` is `(batch, channels, time)`. A residual, when given, must
    /// match the convolution output shape.
    pub fn forward(
        &self,
        inputs: &Tensor,
        lengths: &[usize],
        residual: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Vec<usize>)> {
        let (output, output_lengths) = self.conv.forward(inputs, lengths)?;
        let mut output = self.batch_norm.forward_t(&output, train)?;

        if let Some(residual) = residual {
            if residual.dims() != output.dims() {
                return Err(ModelError::invalid_argument(format!(
                    "residual shape {:?} does not match sub-block output {:?}",
                    residual.dims(),
                    output.dims()
                )));
            }
            output = (output + residual)?;
        }

        let output = self.activation.forward(&output)?;
        let output = self.dropout.forward_t(&output, train)?;
        Ok((output, output_lengths))
    }
}

#[derive(Debug)]
pub struct JasperBlock {
    config: JasperBlockConfig,
    sub_blocks: Vec<JasperSubBlock>,
}

impl JasperBlock {
    pub fn new(config: JasperBlockConfig, vb: VarBuilder) -> Result<Self> {
        let padding = config.same_padding()?;
        config.validate()?;

        let sub_blocks = (0..config.num_sub_blocks)
            .map(|idx| {
                JasperSubBlock::new(
                    JasperSubBlockConfig {
                        in_channels: if idx == 0 {
                            config.in_channels
                        } else {
                            config.out_channels
                        },
                        out_channels: config.out_channels,
                        kernel_size: config.kernel_size,
                        stride: config.stride,
                        dilation: config.dilation,
                        padding,
                        bias: config.bias,
                        dropout_p: config.dropout_p,
                        activation: config.activation,
                    },
                    vb.pp(format!("layers.{idx}")),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        log::debug!(
            "jasper block sub_blocks={} channels={}->{} kernel={} dilation={}",
            config.num_sub_blocks,
            config.in_channels,
            config.out_channels,
            config.kernel_size,
            config.dilation
        );
        Ok(Self { config, sub_blocks })
    }

    pub fn config(&self) -> &JasperBlockConfig {
        &self.config
    }

    pub fn forward(
        &self,
        inputs: &Tensor,
        lengths: &[usize],
        residual: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Vec<usize>)> {
        let last = self.sub_blocks.len() - 1;
        let mut output = inputs.clone();
        let mut lengths = lengths.to_vec();
        for (idx, sub_block) in self.sub_blocks.iter().enumerate() {
            let residual = if idx == last { residual } else { None };
            (output, lengths) = sub_block.forward(&output, &lengths, residual, train)?;
        }
        Ok((output, lengths))
    }
}

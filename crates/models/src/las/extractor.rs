//! VGG and DeepSpeech2 convolutional front ends.
//!
//! * `Vgg`: two pairs of 3x3 convolutions (64 then 128 channels), each pair
//!   followed by 2x2 max-pooling, so frequency and time shrink by four.
//! * `Ds2`: a 41x11 convolution with stride (2, 2) and a 21x11 convolution
//!   with stride (2, 1), both with 32 channels.
//!
//! Every convolution is followed by batch-norm and the configured activation,
//! and runs inside a [`MaskCnn`] so padded frames stay zero.

use std::{fmt, str::FromStr};

use candle_core::Tensor;
use candle_nn::{BatchNormConfig, VarBuilder};
use layers::{activation, ActivationKind, Conv2dLayer, Conv2dSpec, MaskCnn, MaskCnnModule};
use serde::{Deserialize, Serialize};

use super::FeatureExtractor;
use crate::error::{ModelError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    #[default]
    Vgg,
    Ds2,
}

impl fmt::Display for ExtractorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExtractorKind::Vgg => "vgg",
            ExtractorKind::Ds2 => "ds2",
        })
    }
}

impl FromStr for ExtractorKind {
    type Err = ModelError;

    fn from_str(name: &str) -> std::result::Result<Self, Self::Err> {
        match name.trim().to_ascii_lowercase().as_str() {
            "vgg" => Ok(ExtractorKind::Vgg),
            "ds2" => Ok(ExtractorKind::Ds2),
            _ => Err(ModelError::invalid_argument(format!(
                "unsupported extractor: `{name}`"
            ))),
        }
    }
}

/// A [`MaskCnn`] stack laid out according to an [`ExtractorKind`].
#[derive(Debug)]
pub struct ConvExtractor {
    kind: ExtractorKind,
    cnn: MaskCnn,
}

impl ConvExtractor {
    pub fn new(kind: ExtractorKind, activation_kind: ActivationKind, vb: VarBuilder) -> Result<Self> {
        let specs = match kind {
            ExtractorKind::Vgg => vec![
                Some(Conv2dSpec::same(1, 64, 3)),
                Some(Conv2dSpec::same(64, 64, 3)),
                None,
                Some(Conv2dSpec::same(64, 128, 3)),
                Some(Conv2dSpec::same(128, 128, 3)),
                None,
            ],
            ExtractorKind::Ds2 => vec![
                Some(Conv2dSpec {
                    in_channels: 1,
                    out_channels: 32,
                    kernel: (41, 11),
                    stride: (2, 2),
                    padding: (20, 5),
                    bias: false,
                }),
                Some(Conv2dSpec {
                    in_channels: 32,
                    out_channels: 32,
                    kernel: (21, 11),
                    stride: (2, 1),
                    padding: (10, 5),
                    bias: false,
                }),
            ],
        };

        // Indices mirror a flat sequential container: conv, bn, act[, pool].
        let mut modules = Vec::new();
        for spec in specs {
            let index = modules.len();
            match spec {
                Some(spec) => {
                    modules.push(MaskCnnModule::Conv(Conv2dLayer::new(
                        spec,
                        vb.pp(index.to_string()),
                    )?));
                    modules.push(MaskCnnModule::BatchNorm(candle_nn::batch_norm(
                        spec.out_channels,
                        BatchNormConfig::default(),
                        vb.pp((index + 1).to_string()),
                    )?));
                    modules.push(MaskCnnModule::Activation(activation(activation_kind)));
                }
                None => modules.push(MaskCnnModule::MaxPool(2)),
            }
        }

        log::debug!("conv extractor kind={kind} activation={activation_kind} modules={}", modules.len());
        Ok(Self {
            kind,
            cnn: MaskCnn::new(modules)?,
        })
    }

    pub fn kind(&self) -> ExtractorKind {
        self.kind
    }

    pub fn output_lengths(&self, lengths: &[usize]) -> Vec<usize> {
        self.cnn.output_lengths(lengths)
    }
}

impl FeatureExtractor for ConvExtractor {
    fn output_dim(&self, input_dim: usize) -> usize {
        self.cnn.output_channels(1) * self.cnn.output_height(input_dim)
    }

    fn forward(&self, inputs: &Tensor, lengths: &[usize], train: bool) -> Result<(Tensor, Vec<usize>)> {
        let (_, channels, _, _) = inputs.dims4()?;
        if channels != 1 {
            return Err(ModelError::invalid_argument(format!(
                "extractor expects a single input channel, got {channels}"
            )));
        }
        Ok(self.cnn.forward(inputs, lengths, train)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn build(kind: ExtractorKind) -> Result<ConvExtractor> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        ConvExtractor::new(kind, ActivationKind::Hardtanh, vb)
    }

    #[test]
    fn parses_extractor_names() {
        assert_eq!("VGG".parse::<ExtractorKind>().ok(), Some(ExtractorKind::Vgg));
        assert_eq!("ds2".parse::<ExtractorKind>().ok(), Some(ExtractorKind::Ds2));
        assert!("resnet".parse::<ExtractorKind>().is_err());
    }

    #[test]
    fn output_dims_follow_pooling_and_stride_arithmetic() -> Result<()> {
        let vgg = build(ExtractorKind::Vgg)?;
        assert_eq!(vgg.output_dim(80), 80 << 5);
        assert_eq!(vgg.output_dim(40), 40 << 5);
        assert_eq!(vgg.output_lengths(&[100, 37]), vec![25, 9]);

        let ds2 = build(ExtractorKind::Ds2)?;
        let first = (80 + 2 * 20 - 41) / 2 + 1;
        let second = (first + 2 * 10 - 21) / 2 + 1;
        assert_eq!(ds2.output_dim(80), second << 5);
        assert_eq!(ds2.output_lengths(&[100, 37]), vec![50, 19]);
        Ok(())
    }

    #[test]
    fn forward_matches_reported_shapes() -> Result<()> {
        let device = Device::Cpu;
        let extractor = build(ExtractorKind::Ds2)?;
        let inputs = Tensor::randn(0f32, 1.0, (2, 1, 16, 12), &device)?;
        let (features, lengths) = extractor.forward(&inputs, &[12, 7], false)?;

        let (batch, channels, freq, time) = features.dims4()?;
        assert_eq!((batch, time), (2, 6));
        assert_eq!(channels * freq, extractor.output_dim(16));
        assert_eq!(lengths, vec![6, 4]);
        Ok(())
    }
}

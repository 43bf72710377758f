//! Position-wise feed-forward network for transformer layers.
//!
//! Operates on `(batch, seq, d_model)` and returns the same layout. Two
//! styles exist: `Ff` (`Linear -> dropout -> ReLU -> Linear -> dropout`) and
//! `Conv`, which applies kernel-size-1 convolutions over the time axis
//! (`Conv1d -> ReLU -> Conv1d`).

use std::{fmt, str::FromStr};

use candle_core::{Module, ModuleT, Result, Tensor};
use candle_nn::{Conv1d, Conv1dConfig, Dropout, Linear, VarBuilder};
use serde::{Deserialize, Serialize};

use crate::{checks, LayerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedForwardStyle {
    #[default]
    Ff,
    Conv,
}

impl fmt::Display for FeedForwardStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FeedForwardStyle::Ff => "ff",
            FeedForwardStyle::Conv => "conv",
        })
    }
}

impl FromStr for FeedForwardStyle {
    type Err = LayerError;

    fn from_str(name: &str) -> std::result::Result<Self, Self::Err> {
        match name.trim().to_ascii_lowercase().as_str() {
            "ff" => Ok(FeedForwardStyle::Ff),
            "conv" => Ok(FeedForwardStyle::Conv),
            _ => Err(LayerError::UnknownVariant {
                kind: "feed-forward style",
                name: name.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
enum Projections {
    Ff { w1: Linear, w2: Linear },
    Conv { conv1: Conv1d, conv2: Conv1d },
}

#[derive(Debug, Clone)]
pub struct PositionWiseFeedForward {
    d_model: usize,
    d_ff: usize,
    style: FeedForwardStyle,
    dropout: Dropout,
    projections: Projections,
}

impl PositionWiseFeedForward {
    pub fn new(
        d_model: usize,
        d_ff: usize,
        dropout_p: f32,
        style: FeedForwardStyle,
        vb: VarBuilder,
    ) -> Result<Self> {
        checks::expect_positive(d_model, "d_model")?;
        checks::expect_positive(d_ff, "d_ff")?;
        checks::expect_probability(dropout_p, "dropout_p")?;

        let projections = match style {
            FeedForwardStyle::Ff => Projections::Ff {
                w1: candle_nn::linear(d_model, d_ff, vb.pp("w1"))?,
                w2: candle_nn::linear(d_ff, d_model, vb.pp("w2"))?,
            },
            FeedForwardStyle::Conv => {
                let cfg = Conv1dConfig::default();
                Projections::Conv {
                    conv1: candle_nn::conv1d(d_model, d_ff, 1, cfg, vb.pp("conv1"))?,
                    conv2: candle_nn::conv1d(d_ff, d_model, 1, cfg, vb.pp("conv2"))?,
                }
            }
        };

        Ok(Self {
            d_model,
            d_ff,
            style,
            dropout: Dropout::new(dropout_p),
            projections,
        })
    }

    pub fn style(&self) -> FeedForwardStyle {
        self.style
    }

    pub fn d_ff(&self) -> usize {
        self.d_ff
    }

    pub fn forward(&self, inputs: &Tensor, train: bool) -> Result<Tensor> {
        checks::expect_batch_seq_hidden(inputs, self.d_model)?;
        match &self.projections {
            Projections::Ff { w1, w2 } => {
                let hidden = self.dropout.forward_t(&w1.forward(inputs)?, train)?.relu()?;
                self.dropout.forward_t(&w2.forward(&hidden)?, train)
            }
            Projections::Conv { conv1, conv2 } => {
                let hidden = conv1.forward(&inputs.transpose(1, 2)?)?.relu()?;
                conv2.forward(&hidden)?.transpose(1, 2)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn parses_styles() {
        assert_eq!("FF".parse::<FeedForwardStyle>().ok(), Some(FeedForwardStyle::Ff));
        assert_eq!("conv".parse::<FeedForwardStyle>().ok(), Some(FeedForwardStyle::Conv));
        assert!("gated".parse::<FeedForwardStyle>().is_err());
    }

    #[test]
    fn both_styles_preserve_layout() -> Result<()> {
        let device = Device::Cpu;
        for style in [FeedForwardStyle::Ff, FeedForwardStyle::Conv] {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            let ffn = PositionWiseFeedForward::new(6, 16, 0.3, style, vb)?;
            let inputs = Tensor::randn(0f32, 1.0, (2, 5, 6), &device)?;
            let output = ffn.forward(&inputs, false)?;
            assert_eq!(output.dims(), &[2, 5, 6]);
        }
        Ok(())
    }

    #[test]
    fn evaluation_is_deterministic_and_position_wise() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let ffn = PositionWiseFeedForward::new(4, 8, 0.5, FeedForwardStyle::Ff, vb)?;

        let inputs = Tensor::randn(0f32, 1.0, (1, 3, 4), &device)?;
        let a = ffn.forward(&inputs, false)?;
        let b = ffn.forward(&inputs, false)?;
        assert!((&a - &b)?.abs()?.max_all()?.to_vec0::<f32>()? == 0.0);

        let single = ffn.forward(&inputs.narrow(1, 1, 1)?, false)?;
        let diff = (a.narrow(1, 1, 1)? - single)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(diff < 1e-6);
        Ok(())
    }

    #[test]
    fn rejects_invalid_dropout() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        assert!(PositionWiseFeedForward::new(4, 8, 1.5, FeedForwardStyle::Ff, vb).is_err());
    }
}

//! Joint CTC projection over listener outputs.
//!
//! `BatchNorm(2 * hidden) -> dropout -> Linear(2 * hidden, num_classes, no
//! bias) -> log_softmax`, applied frame by frame.

use candle_core::{Module, ModuleT, Tensor, D};
use candle_nn::{BatchNorm, BatchNormConfig, Dropout, Linear, VarBuilder};

use crate::error::{ModelError, Result};

#[derive(Debug, Clone)]
pub struct CtcHead {
    input_dim: usize,
    num_classes: usize,
    batch_norm: BatchNorm,
    dropout: Dropout,
    fc: Linear,
}

impl CtcHead {
    pub fn new(input_dim: usize, num_classes: usize, dropout_p: f32, vb: VarBuilder) -> Result<Self> {
        if input_dim == 0 || num_classes == 0 {
            return Err(ModelError::invalid_argument(
                "ctc head needs non-zero input_dim and num_classes",
            ));
        }
        let batch_norm = candle_nn::batch_norm(input_dim, BatchNormConfig::default(), vb.pp("batch_norm"))?;
        let fc = candle_nn::linear_no_bias(input_dim, num_classes, vb.pp("fc"))?;
        Ok(Self {
            input_dim,
            num_classes,
            batch_norm,
            dropout: Dropout::new(dropout_p),
            fc,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// `encoder_outputs` is `(batch, time, input_dim)`; returns per-frame
    /// log-probabilities `(batch, time, num_classes)`.
    pub fn forward(&self, encoder_outputs: &Tensor, train: bool) -> Result<Tensor> {
        let (_, _, dim) = encoder_outputs.dims3()?;
        if dim != self.input_dim {
            return Err(ModelError::invalid_argument(format!(
                "ctc head expects {} features, got {dim}",
                self.input_dim
            )));
        }
        let normed = self
            .batch_norm
            .forward_t(&encoder_outputs.transpose(1, 2)?.contiguous()?, train)?
            .transpose(1, 2)?;
        let dropped = self.dropout.forward_t(&normed, train)?;
        let logits = self.fc.forward(&dropped)?;
        Ok(candle_nn::ops::log_softmax(&logits, D::Minus1)?)
    }
}

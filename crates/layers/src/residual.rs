//! Post-norm residual wrapper used by the speech transformer layers.
//!
//! Branches combine tensors of shape `(batch, seq, hidden)`: the sublayer
//! output is added to its input and the sum is layer-normalised.

use candle_core::{Module, Result, Tensor};
use candle_nn::{LayerNorm, VarBuilder};

use crate::checks;

const LAYER_NORM_EPS: f64 = 1e-5;

/// `LayerNorm(branch + residual)`.
#[derive(Debug, Clone)]
pub struct AddNorm {
    hidden: usize,
    layer_norm: LayerNorm,
}

impl AddNorm {
    pub fn new(hidden: usize, vb: VarBuilder) -> Result<Self> {
        checks::expect_positive(hidden, "hidden")?;
        let layer_norm = candle_nn::layer_norm(hidden, LAYER_NORM_EPS, vb.pp("layer_norm"))?;
        Ok(Self { hidden, layer_norm })
    }

    pub fn hidden(&self) -> usize {
        self.hidden
    }

    /// `branch` is the sublayer output and `residual` the sublayer input.
    pub fn forward(&self, branch: &Tensor, residual: &Tensor) -> Result<Tensor> {
        checks::expect_batch_seq_hidden(residual, self.hidden)?;
        checks::expect_shape(branch, residual.dims())?;
        self.layer_norm.forward(&(branch + residual)?)
    }
}

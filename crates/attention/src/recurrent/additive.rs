//! Additive (Bahdanau) attention from "Neural Machine Translation by Jointly
//! Learning to Align and Translate".
//!
//! `e = score_proj(tanh(W_k k + W_q q + b))`, softmax over source positions,
//! and the context is the weighted sum of `value` plus the query itself.

use candle_core::{Module, Tensor, D};
use candle_nn::{ops, Init, Linear, VarBuilder};

use super::check_step_inputs;
use crate::core::{AttentionError, Result};

#[derive(Debug, Clone)]
pub struct AdditiveAttention {
    d_model: usize,
    query_proj: Linear,
    key_proj: Linear,
    bias: Tensor,
    score_proj: Linear,
}

impl AdditiveAttention {
    pub fn new(d_model: usize, vb: VarBuilder) -> Result<Self> {
        if d_model == 0 {
            return Err(AttentionError::InvalidConfig(
                "d_model must be greater than zero".into(),
            ));
        }
        let query_proj = candle_nn::linear_no_bias(d_model, d_model, vb.pp("query_proj"))?;
        let key_proj = candle_nn::linear_no_bias(d_model, d_model, vb.pp("key_proj"))?;
        let bias = vb.get_with_hints(d_model, "bias", Init::Uniform { lo: -0.1, up: 0.1 })?;
        let score_proj = candle_nn::linear(d_model, 1, vb.pp("score_proj"))?;
        Ok(Self {
            d_model,
            query_proj,
            key_proj,
            bias,
            score_proj,
        })
    }

    pub fn d_model(&self) -> usize {
        self.d_model
    }

    /// Returns `(context [batch, 1, d_model], attn [batch, v_len])`.
    ///
    /// The query is added back onto the context.
    pub fn attend(&self, query: &Tensor, key: &Tensor, value: &Tensor) -> Result<(Tensor, Tensor)> {
        let (batch, v_len) = check_step_inputs(query, value, self.d_model)?;
        if key.dims() != [batch, v_len, self.d_model] {
            return Err(AttentionError::shape(format!(
                "key must be [{batch}, {v_len}, {}], got {:?}",
                self.d_model,
                key.dims()
            )));
        }

        let hidden = self
            .key_proj
            .forward(key)?
            .broadcast_add(&self.query_proj.forward(query)?)?
            .broadcast_add(&self.bias)?
            .tanh()?;
        let score = self.score_proj.forward(&hidden)?.squeeze(D::Minus1)?;
        let attn = ops::softmax_last_dim(&score.contiguous()?)?;

        let context = attn.unsqueeze(1)?.matmul(&value.contiguous()?)?;
        let context = (context + query)?;
        Ok((context, attn))
    }
}

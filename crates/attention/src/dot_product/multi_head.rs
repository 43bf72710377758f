//! Multi-head attention from "Attention Is All You Need".
//!
//! Queries, keys and values are projected to `d_model` features, split into
//! `num_heads` heads of `d_head = d_model / num_heads`, and the head axis is
//! folded into the batch axis head-major (`[H * B, len, d_head]`) so a single
//! batched [`ScaledDotProductAttention`] call serves every head. Head outputs
//! are concatenated back along the feature axis; there is no output
//! projection.

use candle_core::{Module, Tensor};
use candle_nn::{Linear, VarBuilder};

use super::ScaledDotProductAttention;
use crate::core::{Attention, AttentionError, Config, FullyMaskedRows, Result};
use crate::masks::{first_fully_masked_row, repeat_for_heads, MASK_DTYPE};

/// Shape parameters of a [`MultiHeadAttention`] layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiHeadConfig {
    pub d_model: usize,
    pub num_heads: usize,
}

impl Default for MultiHeadConfig {
    fn default() -> Self {
        Self {
            d_model: 512,
            num_heads: 8,
        }
    }
}

impl MultiHeadConfig {
    pub fn new(d_model: usize, num_heads: usize) -> Self {
        Self { d_model, num_heads }
    }

    /// Checks that `d_model` splits evenly across heads.
    pub fn validate(&self) -> Result<()> {
        if self.d_model == 0 || self.num_heads == 0 {
            return Err(AttentionError::InvalidConfig(
                "d_model and num_heads must be greater than zero".into(),
            ));
        }
        if self.d_model % self.num_heads != 0 {
            return Err(AttentionError::InvalidConfig(format!(
                "d_model ({}) % num_heads ({}) should be zero",
                self.d_model, self.num_heads
            )));
        }
        Ok(())
    }

    /// Per-head feature size.
    pub fn d_head(&self) -> usize {
        self.d_model / self.num_heads
    }
}

/// Multi-head attention over `[batch, len, d_model]` inputs.
#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    config: MultiHeadConfig,
    attention_config: Config,
    query_proj: Linear,
    key_proj: Linear,
    value_proj: Linear,
    scaled_dot_attn: ScaledDotProductAttention,
}

impl MultiHeadAttention {
    /// Builds the layer, reading `query_proj`, `key_proj` and `value_proj`
    /// from `vb`.
    pub fn new(config: MultiHeadConfig, vb: VarBuilder) -> Result<Self> {
        Self::with_attention_config(config, Config::default(), vb)
    }

    pub fn with_attention_config(
        config: MultiHeadConfig,
        attention_config: Config,
        vb: VarBuilder,
    ) -> Result<Self> {
        config.validate()?;
        let d_head = config.d_head();
        let projected = d_head * config.num_heads;

        let query_proj = candle_nn::linear(config.d_model, projected, vb.pp("query_proj"))?;
        let key_proj = candle_nn::linear(config.d_model, projected, vb.pp("key_proj"))?;
        let value_proj = candle_nn::linear(config.d_model, projected, vb.pp("value_proj"))?;
        // Degenerate rows are checked once against the unreplicated mask.
        let scaled_dot_attn =
            ScaledDotProductAttention::with_config(d_head, Config::allow_fully_masked())?;

        log::debug!(
            "multi-head attention d_model={} num_heads={} d_head={}",
            config.d_model,
            config.num_heads,
            d_head
        );

        Ok(Self {
            config,
            attention_config,
            query_proj,
            key_proj,
            value_proj,
            scaled_dot_attn,
        })
    }

    pub fn config(&self) -> &MultiHeadConfig {
        &self.config
    }

    /// `[B, L, H * Dh] -> [H * B, L, Dh]`, head-major.
    fn split_heads(&self, x: &Tensor) -> Result<Tensor> {
        let (batch, len, _) = x.dims3()?;
        let heads = self.config.num_heads;
        let d_head = self.config.d_head();
        Ok(x.reshape((batch, len, heads, d_head))?
            .permute((2, 0, 1, 3))?
            .contiguous()?
            .reshape((heads * batch, len, d_head))?)
    }

    /// `[H * B, L, Dh] -> [B, L, H * Dh]`.
    fn merge_heads(&self, x: &Tensor, batch: usize) -> Result<Tensor> {
        let (_, len, _) = x.dims3()?;
        let heads = self.config.num_heads;
        let d_head = self.config.d_head();
        Ok(x.reshape((heads, batch, len, d_head))?
            .permute((1, 2, 0, 3))?
            .contiguous()?
            .reshape((batch, len, heads * d_head))?)
    }

    fn validate(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<usize> {
        let d_model = self.config.d_model;
        let mut lens = [0usize; 3];
        let mut batch = None;
        for (slot, (name, tensor)) in [("query", query), ("key", key), ("value", value)]
            .into_iter()
            .enumerate()
        {
            match tensor.dims() {
                [b, len, d] if *d == d_model && batch.map_or(true, |seen| seen == *b) => {
                    batch = Some(*b);
                    lens[slot] = *len;
                }
                dims => {
                    return Err(AttentionError::shape(format!(
                        "{name} must be [batch, len, {d_model}] with a shared batch, got {dims:?}"
                    )))
                }
            }
        }
        let [q_len, k_len, v_len] = lens;
        if k_len != v_len {
            return Err(AttentionError::shape(format!(
                "key length {k_len} differs from value length {v_len}"
            )));
        }
        let batch = batch.unwrap_or_default();
        if let Some(mask) = mask {
            match mask.dims() {
                [mb, mq, mk] if *mb == batch && (*mq == q_len || *mq == 1) && *mk == k_len => {}
                dims => {
                    return Err(AttentionError::shape(format!(
                        "mask shape mismatch: expected [{batch}, {q_len}|1, {k_len}] got {dims:?}"
                    )))
                }
            }
        }
        Ok(batch)
    }
}

impl Attention for MultiHeadAttention {
    fn attend(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<(Tensor, Tensor)> {
        let batch = self.validate(query, key, value, mask)?;

        let mask = match mask {
            Some(mask) => {
                let mask = mask.to_dtype(MASK_DTYPE)?;
                if self.attention_config.fully_masked_rows == FullyMaskedRows::Reject {
                    if let Some((batch, query)) = first_fully_masked_row(&mask)? {
                        return Err(AttentionError::FullyMaskedRow { batch, query });
                    }
                }
                Some(repeat_for_heads(&mask, self.config.num_heads)?)
            }
            None => None,
        };

        let q = self.split_heads(&self.query_proj.forward(query)?)?;
        let k = self.split_heads(&self.key_proj.forward(key)?)?;
        let v = self.split_heads(&self.value_proj.forward(value)?)?;

        let (context, attn) = self.scaled_dot_attn.attend(&q, &k, &v, mask.as_ref())?;
        let context = self.merge_heads(&context, batch)?;
        Ok((context, attn))
    }
}

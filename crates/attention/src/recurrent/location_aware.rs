//! Location-aware attention ("Attention-Based Models for Speech
//! Recognition", Chorowski et al. 2015), ClovaCall flavour.
//!
//! The previous step's alignment is convolved (kernel 3, same padding) into
//! `attn_dim` location features which are summed with the projected query,
//! the projected encoder outputs and a learned bias:
//!
//! ```text
//! e = fc(tanh(W_q q + W_v v + conv(a_prev) + b))
//! ```
//!
//! The energy is normalised with a softmax, or with a sigmoid followed by
//! renormalisation when smoothing is enabled. The caller threads the returned
//! alignment back in as `last_alignment` on the next step.

use candle_core::{Module, Tensor, D};
use candle_nn::{ops, Conv1d, Conv1dConfig, Init, Linear, VarBuilder};

use super::check_step_inputs;
use crate::core::{AttentionError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationAwareConfig {
    /// Feature size of decoder states and encoder outputs.
    pub decoder_dim: usize,
    /// Width of the hidden energy space.
    pub attn_dim: usize,
    /// Sigmoid-and-renormalise instead of softmax.
    pub smoothing: bool,
}

impl Default for LocationAwareConfig {
    fn default() -> Self {
        Self {
            decoder_dim: 1024,
            attn_dim: 1024,
            smoothing: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocationAwareAttention {
    config: LocationAwareConfig,
    location_conv: Conv1d,
    query_proj: Linear,
    value_proj: Linear,
    bias: Tensor,
    fc: Linear,
}

impl LocationAwareAttention {
    pub fn new(config: LocationAwareConfig, vb: VarBuilder) -> Result<Self> {
        if config.decoder_dim == 0 || config.attn_dim == 0 {
            return Err(AttentionError::InvalidConfig(
                "decoder_dim and attn_dim must be greater than zero".into(),
            ));
        }
        let conv_cfg = Conv1dConfig {
            padding: 1,
            ..Default::default()
        };
        let location_conv =
            candle_nn::conv1d(1, config.attn_dim, 3, conv_cfg, vb.pp("location_conv"))?;
        let query_proj =
            candle_nn::linear_no_bias(config.decoder_dim, config.attn_dim, vb.pp("query_proj"))?;
        let value_proj =
            candle_nn::linear_no_bias(config.decoder_dim, config.attn_dim, vb.pp("value_proj"))?;
        let bias = vb.get_with_hints(
            config.attn_dim,
            "bias",
            Init::Uniform { lo: -0.1, up: 0.1 },
        )?;
        let fc = candle_nn::linear(config.attn_dim, 1, vb.pp("fc"))?;

        log::debug!(
            "location-aware attention decoder_dim={} attn_dim={} smoothing={}",
            config.decoder_dim,
            config.attn_dim,
            config.smoothing
        );

        Ok(Self {
            config,
            location_conv,
            query_proj,
            value_proj,
            bias,
            fc,
        })
    }

    pub fn config(&self) -> &LocationAwareConfig {
        &self.config
    }

    /// One decoding step.
    ///
    /// * `query`: `[batch, 1, decoder_dim]` decoder state.
    /// * `value`: `[batch, v_len, decoder_dim]` encoder outputs.
    /// * `last_alignment`: `[batch, v_len]` from the previous step, or `None`
    ///   on the first step (treated as zeros).
    ///
    /// Returns `(context [batch, 1, decoder_dim], alignment [batch, v_len])`.
    pub fn attend(
        &self,
        query: &Tensor,
        value: &Tensor,
        last_alignment: Option<&Tensor>,
    ) -> Result<(Tensor, Tensor)> {
        let (batch, v_len) = check_step_inputs(query, value, self.config.decoder_dim)?;

        let last_alignment = match last_alignment {
            Some(alignment) => {
                if alignment.dims() != [batch, v_len] {
                    return Err(AttentionError::shape(format!(
                        "last_alignment must be [{batch}, {v_len}], got {:?}",
                        alignment.dims()
                    )));
                }
                alignment.to_dtype(value.dtype())?
            }
            None => Tensor::zeros((batch, v_len), value.dtype(), value.device())?,
        };

        // [B, V] -> [B, 1, V] -> [B, A, V] -> [B, V, A]
        let location = self
            .location_conv
            .forward(&last_alignment.unsqueeze(1)?)?
            .transpose(1, 2)?;

        let hidden = self
            .value_proj
            .forward(value)?
            .broadcast_add(&self.query_proj.forward(query)?)?
            .add(&location)?
            .broadcast_add(&self.bias)?
            .tanh()?;
        let energy = self.fc.forward(&hidden)?.squeeze(D::Minus1)?;

        let alignment = if self.config.smoothing {
            let gated = ops::sigmoid(&energy)?;
            gated.broadcast_div(&gated.sum_keepdim(D::Minus1)?)?
        } else {
            ops::softmax_last_dim(&energy.contiguous()?)?
        };

        let context = alignment.unsqueeze(1)?.matmul(&value.contiguous()?)?;
        Ok((context, alignment))
    }
}

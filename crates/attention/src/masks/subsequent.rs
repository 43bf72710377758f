//! Builders for causal (subsequent-position) masks.
//!
//! The resulting tensors have dtype [`MASK_DTYPE`](super::MASK_DTYPE) and
//! shape `[batch, seq_len, seq_len]`; entry `(i, j)` is `1` iff `j > i`.

use candle_core::{Device, Tensor};

use super::{attn_key_pad_mask, logical_or};
use crate::core::{AttentionError, Result};

/// Strict upper-triangular mask replicated over `batch`.
pub fn subsequent_mask(batch: usize, seq_len: usize, device: &Device) -> Result<Tensor> {
    let mut data = vec![0u8; batch * seq_len * seq_len];
    for b in 0..batch {
        for i in 0..seq_len {
            let row_start = (b * seq_len + i) * seq_len;
            data[row_start + i + 1..row_start + seq_len].fill(1);
        }
    }
    Ok(Tensor::from_vec(data, (batch, seq_len, seq_len), device)?)
}

/// Decoder self-attention mask: padded keys OR future positions.
///
/// `seq_k` and `seq_q` are `[batch, seq]` token ids of the same sequence, so
/// their lengths must agree. The result is `[batch, q_len, k_len]`.
pub fn decoder_self_attn_mask(seq_k: &Tensor, seq_q: &Tensor, pad_id: i64) -> Result<Tensor> {
    let (batch, k_len) = seq_k
        .dims2()
        .map_err(|_| AttentionError::shape("decoder mask expects [batch, seq] key ids"))?;
    let (q_batch, q_len) = seq_q
        .dims2()
        .map_err(|_| AttentionError::shape("decoder mask expects [batch, seq] query ids"))?;
    if q_batch != batch || q_len != k_len {
        return Err(AttentionError::shape(format!(
            "decoder self-attention needs matching query/key ids, got [{q_batch}, {q_len}] vs [{batch}, {k_len}]"
        )));
    }

    let key_pad = attn_key_pad_mask(seq_k, q_len, pad_id)?;
    let future = subsequent_mask(batch, k_len, seq_k.device())?;
    Ok(logical_or(&key_pad, &future)?)
}

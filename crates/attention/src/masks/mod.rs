//! Mask utilities shared by attention implementations.
//!
//! Masks are `u8` tensors: `1` marks a position that must be excluded from
//! the weighted sum (padding or a future step), `0` marks a position that is
//! kept. Attention kernels overwrite masked scores with [`MASK_FILL_VALUE`]
//! before the softmax.
//!
//! Padding can be described either by per-row valid lengths or by a pad token
//! id; [`MaskSource`] makes the two mutually exclusive.

pub mod padding;
pub mod subsequent;

use candle_core::{DType, Result, Tensor, D};

/// Dtype shared by all boolean masks.
pub const MASK_DTYPE: DType = DType::U8;

/// Score written into masked positions before normalisation.
///
/// Large enough that `exp(MASK_FILL_VALUE - max)` underflows to zero in `f32`,
/// yet finite so an all-masked row degrades to a uniform distribution instead
/// of NaN. [`masked_fill`] clamps it to the most negative finite value of
/// narrower float dtypes.
pub const MASK_FILL_VALUE: f64 = -1e9;

/// Most negative finite `f16`.
const F16_LOWEST: f64 = -65504.0;

pub use padding::{
    attn_key_pad_mask, attn_pad_mask, non_pad_mask, padding_mask, MaskSource,
};
pub use subsequent::{decoder_self_attn_mask, subsequent_mask};

/// Replicates a `[batch, q_len, k_len]` mask once per head, head-major, so it
/// lines up with `[num_heads * batch, q_len, k_len]` score tensors.
pub fn repeat_for_heads(mask: &Tensor, num_heads: usize) -> Result<Tensor> {
    mask.repeat((num_heads, 1, 1))
}

/// Overwrites every position of `tensor` where `mask` is set with `value`.
///
/// `mask` must broadcast to the shape of `tensor`. Finite values that would
/// overflow `tensor`'s dtype are clamped to its finite range.
pub fn masked_fill(tensor: &Tensor, mask: &Tensor, value: f64) -> Result<Tensor> {
    let mask = mask.broadcast_as(tensor.shape())?;
    let value = finite_for(tensor.dtype(), value);
    let fill = Tensor::full(value, tensor.dims(), tensor.device())?.to_dtype(tensor.dtype())?;
    mask.where_cond(&fill, tensor)
}

fn finite_for(dtype: DType, value: f64) -> f64 {
    match dtype {
        DType::F16 if value.is_finite() => value.clamp(F16_LOWEST, -F16_LOWEST),
        _ => value,
    }
}

/// Element-wise OR of two masks with identical shapes.
pub fn logical_or(lhs: &Tensor, rhs: &Tensor) -> Result<Tensor> {
    lhs.maximum(rhs)
}

/// Finds the first `(row, query)` of a `[rows, q_len, k_len]` mask whose keys
/// are all masked.
pub fn first_fully_masked_row(mask: &Tensor) -> Result<Option<(usize, usize)>> {
    let all_masked = mask.to_dtype(MASK_DTYPE)?.min(D::Minus1)?;
    let rows = all_masked.to_vec2::<u8>()?;
    for (row, flags) in rows.iter().enumerate() {
        if let Some(query) = flags.iter().position(|&flag| flag != 0) {
            return Ok(Some((row, query)));
        }
    }
    Ok(None)
}

//! Core traits and types shared across attention implementations.
//!
//! Dot-product implementations operate on tensors laid out as
//! `[batch, seq_len, dim]`. Masks are `u8` tensors shaped
//! `[batch, q_len, k_len]` where `1` marks a key that must be ignored.

pub mod config;
pub mod errors;

use candle_core::Tensor;

pub use config::{Config, FullyMaskedRows};
pub use errors::{AttentionError, Result};

/// Unified interface for query/key/value attention kernels.
///
/// * `query` is `[batch, q_len, dim]`, `key` and `value` are
///   `[batch, k_len, dim]`.
/// * `mask`, when present, is a `u8` tensor `[batch, q_len, k_len]`.
/// * Returns `(context, attn)`: the context `[batch, q_len, dim]` and the
///   normalised weights whose rows sum to one along the key axis.
pub trait Attention: Send + Sync {
    fn attend(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<(Tensor, Tensor)>;
}

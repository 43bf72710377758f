//! Attention mechanisms and masking utilities for speech recognition models.
//!
//! Tensors use the `[batch, seq_len, dim]` layout throughout. Masks are `u8`
//! tensors where `1` marks a position that must not be attended to; see
//! [`masks`] for the constructors.
//!
//! * [`dot_product`]: scaled dot-product and multi-head attention, shared by
//!   transformer encoders and decoders.
//! * [`recurrent`]: location-aware and additive attention for step-wise
//!   decoders that carry their previous alignment.

pub mod core;
pub mod dot_product;
pub mod masks;
pub mod recurrent;

pub use crate::core::{Attention, AttentionError, Config, FullyMaskedRows, Result};
pub use crate::dot_product::{MultiHeadAttention, MultiHeadConfig, ScaledDotProductAttention};
pub use crate::recurrent::{AdditiveAttention, LocationAwareAttention, LocationAwareConfig};

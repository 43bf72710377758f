//! Dot-product attention: the scaled single-head kernel and the multi-head
//! wrapper that folds heads into the batch axis.

pub mod multi_head;
pub mod scaled;

pub use multi_head::{MultiHeadAttention, MultiHeadConfig};
pub use scaled::ScaledDotProductAttention;

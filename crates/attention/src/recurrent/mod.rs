//! Single-head alignment mechanisms used by recurrent (LAS-style) decoders.
//!
//! Both variants consume one decoder step at a time: `query` is
//! `[batch, 1, dim]` and the returned alignment is `[batch, v_len]`.

pub mod additive;
pub mod location_aware;

pub use additive::AdditiveAttention;
pub use location_aware::{LocationAwareAttention, LocationAwareConfig};

use candle_core::Tensor;

use crate::core::{AttentionError, Result};

/// Validates a single-step query against the encoder outputs it attends to
/// and returns `(batch, v_len)`.
pub(crate) fn check_step_inputs(
    query: &Tensor,
    value: &Tensor,
    dim: usize,
) -> Result<(usize, usize)> {
    let (batch, q_len, q_dim) = query
        .dims3()
        .map_err(|_| AttentionError::shape("query must be [batch, 1, dim]"))?;
    if q_len != 1 || q_dim != dim {
        return Err(AttentionError::shape(format!(
            "query must be [batch, 1, {dim}], got {:?}",
            query.dims()
        )));
    }
    match value.dims() {
        [vb, v_len, vd] if *vb == batch && *vd == dim => Ok((batch, *v_len)),
        dims => Err(AttentionError::shape(format!(
            "value must be [{batch}, v_len, {dim}], got {dims:?}"
        ))),
    }
}

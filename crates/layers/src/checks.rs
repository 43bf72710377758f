//! Lightweight validation helpers shared across layer components.
//!
//! They return `candle_core::Result<()>` so constructors and forward paths can
//! propagate failures without panicking.

use candle_core::{Error, Result, Tensor};

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(tensor: &Tensor, expected: &[usize]) -> Result<()> {
    if tensor.dims() == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "expected shape {:?}, got {:?}",
            expected,
            tensor.dims()
        )))
    }
}

/// Ensures a tensor has `rank` dimensions and returns them.
pub fn expect_rank<'a>(tensor: &'a Tensor, rank: usize, what: &str) -> Result<&'a [usize]> {
    let dims = tensor.dims();
    if dims.len() == rank {
        Ok(dims)
    } else {
        Err(Error::Msg(format!(
            "{what} must have rank {rank}, got {dims:?}"
        )))
    }
}

/// Validates the `(batch, seq, hidden)` convention with a known hidden size.
pub fn expect_batch_seq_hidden(tensor: &Tensor, hidden: usize) -> Result<(usize, usize)> {
    match tensor.dims() {
        [batch, seq, actual] if *actual == hidden => Ok((*batch, *seq)),
        dims => Err(Error::Msg(format!(
            "expected (batch, seq, {hidden}) layout, got {dims:?}"
        ))),
    }
}

/// Checks that one length is supplied per batch row.
pub fn expect_lengths(lengths: &[usize], batch: usize) -> Result<()> {
    if lengths.len() == batch {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "expected {batch} sequence lengths, got {}",
            lengths.len()
        )))
    }
}

/// Rejects zero-valued hyper-parameters such as kernel sizes and strides.
pub fn expect_positive(value: usize, name: &str) -> Result<()> {
    if value == 0 {
        Err(Error::Msg(format!("{name} must be greater than zero")))
    } else {
        Ok(())
    }
}

/// Rejects probabilities outside `[0, 1)`.
pub fn expect_probability(p: f32, name: &str) -> Result<()> {
    if (0.0..1.0).contains(&p) {
        Ok(())
    } else {
        Err(Error::Msg(format!("{name} must lie in [0, 1), got {p}")))
    }
}

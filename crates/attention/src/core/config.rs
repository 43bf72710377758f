//! Configuration options shared by the dot-product attention kernels.
//!
//! The [`Config`] struct captures run-time knobs that callers can tune
//! without swapping implementations.

/// What to do when a query row has every key position masked.
///
/// Such rows come from zero-length sequences. With the finite
/// [`MASK_FILL_VALUE`](crate::masks::MASK_FILL_VALUE) the softmax over an
/// all-masked row is uniform, so it never produces NaN, but the result carries
/// no information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FullyMaskedRows {
    /// Fail with [`AttentionError::FullyMaskedRow`](crate::AttentionError::FullyMaskedRow).
    #[default]
    Reject,
    /// Let the row through; its weights come out uniform over all keys.
    Allow,
}

/// Configuration driving attention behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Config {
    /// Policy for rows whose keys are all masked.
    pub fully_masked_rows: FullyMaskedRows,
}

impl Config {
    /// Config that tolerates fully masked rows.
    pub fn allow_fully_masked() -> Self {
        Self {
            fully_masked_rows: FullyMaskedRows::Allow,
        }
    }
}

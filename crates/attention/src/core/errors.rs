//! Error types emitted by attention implementations and mask builders.

use thiserror::Error;

/// Attention-specific error category.
#[derive(Debug, Error)]
pub enum AttentionError {
    /// A construction-time configuration value is unusable.
    #[error("invalid attention config: {0}")]
    InvalidConfig(String),
    /// The caller broke an argument contract (e.g. both lengths and pad id).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The supplied tensor shapes do not align with the documented contract.
    #[error("invalid tensor shape for {context}")]
    InvalidShape { context: String },
    /// Every key position of a query row is masked, so the row has no valid
    /// probability distribution.
    #[error("attention row (batch {batch}, query {query}) is fully masked")]
    FullyMaskedRow { batch: usize, query: usize },
    /// A backend failure propagated from Candle.
    #[error(transparent)]
    Backend(#[from] candle_core::Error),
}

impl AttentionError {
    pub(crate) fn shape(context: impl Into<String>) -> Self {
        Self::InvalidShape {
            context: context.into(),
        }
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, AttentionError>;

use attention::AttentionError;
use layers::LayerError;
use thiserror::Error;

/// Errors raised while configuring or running the speech models.
#[derive(Debug, Error)]
pub enum ModelError {
    /// One or more configuration invariants failed.
    #[error("invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),
    /// An argument combination the model cannot honour.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("failed to parse config: {0}")]
    ConfigFormat(#[from] serde_json::Error),
    #[error(transparent)]
    Attention(#[from] AttentionError),
    #[error(transparent)]
    Layer(#[from] LayerError),
    #[error(transparent)]
    Backend(#[from] candle_core::Error),
}

impl ModelError {
    pub fn validation(messages: Vec<String>) -> Self {
        Self::Validation(messages)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;

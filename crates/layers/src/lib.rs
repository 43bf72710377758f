//! Convolution, feed-forward and residual building blocks on Candle.
//!
//! Layers follow Candle's conventions: sequence tensors are
//! `(batch, seq, hidden)`, convolution inputs are channels-first, and every
//! forward pass returns `candle_core::Result`. Modules with dropout or
//! batch-norm take a `train` flag the way [`candle_nn::ModuleT`] does.

pub mod activations;
pub mod checks;
pub mod conv;
pub mod mlp;
pub mod residual;

use thiserror::Error;

/// Errors raised while resolving layer options.
#[derive(Debug, Error)]
pub enum LayerError {
    /// A named option did not match any known variant.
    #[error("unsupported {kind}: `{name}`")]
    UnknownVariant { kind: &'static str, name: String },
    /// A numeric argument is outside its accepted range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Backend(#[from] candle_core::Error),
}

pub use activations::{activation, Activation, ActivationKind};
pub use conv::{Conv2dLayer, Conv2dSpec, MaskCnn, MaskCnnModule, MaskConv1d, MaskConv1dConfig};
pub use mlp::{FeedForwardStyle, PositionWiseFeedForward};
pub use residual::AddNorm;

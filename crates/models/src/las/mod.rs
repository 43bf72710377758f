//! Listen-Attend-Spell encoder ("Listener").
//!
//! The listener is composed from two capabilities rather than a class
//! hierarchy: a [`FeatureExtractor`] that turns `(batch, 1, freq, time)`
//! spectrogram images into convolutional features, and a [`SequenceEncoder`]
//! that runs over the flattened features. [`Listener`] owns one of each as a
//! trait object, plus an optional [`CtcHead`](crate::ctc::CtcHead).

pub mod extractor;
pub mod listener;
pub mod recurrent;

use candle_core::Tensor;

use crate::error::Result;

pub use extractor::{ConvExtractor, ExtractorKind};
pub use listener::{Listener, ListenerOutput};
pub use recurrent::{RecurrentStack, RecurrentStackConfig, RnnKind};

/// Convolutional front end operating on `(batch, channels, freq, time)`.
pub trait FeatureExtractor: Send + Sync {
    /// Flattened `channels * freq` size produced for `input_dim` features.
    fn output_dim(&self, input_dim: usize) -> usize;

    /// Returns `(features, lengths)`; padded frames in `features` are zero.
    fn forward(&self, inputs: &Tensor, lengths: &[usize], train: bool) -> Result<(Tensor, Vec<usize>)>;
}

/// Sequence model over `(batch, time, features)` inputs.
pub trait SequenceEncoder: Send + Sync {
    fn output_dim(&self) -> usize;

    /// Outputs at frames `>= lengths[b]` are zero.
    fn forward(&self, inputs: &Tensor, lengths: &[usize], train: bool) -> Result<Tensor>;
}

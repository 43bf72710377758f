//! Speech recognition models assembled from the attention, layers and
//! embedding crates: Speech Transformer layers, Jasper blocks, and the
//! Listen-Attend-Spell listener with an optional joint CTC head.
//!
//! Parameters are created through [`candle_nn::VarBuilder`] under the same
//! names as the reference checkpoints (`self_attention.sublayer.query_proj`,
//! `conv.0.weight`, `rnn.layers.0.forward.weight_ih_l0`, ...). Forward passes
//! that include dropout or batch-norm take a `train` flag.

pub mod config;
pub mod ctc;
pub mod error;
pub mod jasper;
pub mod las;
pub mod transformer;

pub use config::{JasperBlockConfig, ListenerConfig, TransformerLayerConfig};
pub use ctc::CtcHead;
pub use error::{ModelError, Result};
pub use jasper::{JasperBlock, JasperSubBlock, JasperSubBlockConfig};
pub use las::{
    ConvExtractor, ExtractorKind, FeatureExtractor, Listener, ListenerOutput, RecurrentStack,
    RecurrentStackConfig, RnnKind, SequenceEncoder,
};
pub use transformer::{SpeechTransformerDecoderLayer, SpeechTransformerEncoderLayer, TargetEmbedding};

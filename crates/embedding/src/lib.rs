//! Embedding crate
//!
//! Sinusoidal positional encodings and scaled token embeddings for speech
//! transformer decoders.

pub mod positional;
pub mod token;

pub use positional::PositionalEncoding;
pub use token::Embedding;

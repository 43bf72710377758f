//! Speech Transformer layers ("Attention Is All You Need", post-norm).
//!
//! Every sublayer is wrapped in [`AddNorm`]: `LayerNorm(sublayer(x) + x)`.
//! Attention weights are returned head-major, `(num_heads * batch, q_len,
//! k_len)`, for alignment inspection.

use attention::{Attention, MultiHeadAttention};
use candle_core::{ModuleT, Tensor};
use candle_nn::{Dropout, VarBuilder};
use embedding::{Embedding, PositionalEncoding};
use layers::{AddNorm, PositionWiseFeedForward};

use crate::config::TransformerLayerConfig;
use crate::error::Result;

#[derive(Debug, Clone)]
struct AttentionSublayer {
    attention: MultiHeadAttention,
    add_norm: AddNorm,
}

impl AttentionSublayer {
    fn new(config: &TransformerLayerConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            attention: MultiHeadAttention::new(config.attention(), vb.pp("sublayer"))?,
            add_norm: AddNorm::new(config.d_model, vb)?,
        })
    }

    fn forward(&self, query: &Tensor, memory: &Tensor, mask: Option<&Tensor>) -> Result<(Tensor, Tensor)> {
        let (context, attn) = self.attention.attend(query, memory, memory, mask)?;
        Ok((self.add_norm.forward(&context, query)?, attn))
    }
}

#[derive(Debug, Clone)]
struct FeedForwardSublayer {
    feed_forward: PositionWiseFeedForward,
    add_norm: AddNorm,
}

impl FeedForwardSublayer {
    fn new(config: &TransformerLayerConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            feed_forward: PositionWiseFeedForward::new(
                config.d_model,
                config.d_ff,
                config.dropout_p,
                config.ffnet_style,
                vb.pp("sublayer"),
            )?,
            add_norm: AddNorm::new(config.d_model, vb)?,
        })
    }

    fn forward(&self, inputs: &Tensor, train: bool) -> Result<Tensor> {
        let branch = self.feed_forward.forward(inputs, train)?;
        Ok(self.add_norm.forward(&branch, inputs)?)
    }
}

/// Self-attention followed by a position-wise feed-forward network.
#[derive(Debug, Clone)]
pub struct SpeechTransformerEncoderLayer {
    self_attention: AttentionSublayer,
    feed_forward: FeedForwardSublayer,
}

impl SpeechTransformerEncoderLayer {
    pub fn new(config: &TransformerLayerConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            self_attention: AttentionSublayer::new(config, vb.pp("self_attention"))?,
            feed_forward: FeedForwardSublayer::new(config, vb.pp("feed_forward"))?,
        })
    }

    /// Returns `(output, self_attn)`.
    pub fn forward(
        &self,
        inputs: &Tensor,
        self_attn_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let (output, attn) = self.self_attention.forward(inputs, inputs, self_attn_mask)?;
        let output = self.feed_forward.forward(&output, train)?;
        Ok((output, attn))
    }
}

/// Masked self-attention, attention over encoder memory, feed-forward.
#[derive(Debug, Clone)]
pub struct SpeechTransformerDecoderLayer {
    self_attention: AttentionSublayer,
    memory_attention: AttentionSublayer,
    feed_forward: FeedForwardSublayer,
}

impl SpeechTransformerDecoderLayer {
    pub fn new(config: &TransformerLayerConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            self_attention: AttentionSublayer::new(config, vb.pp("self_attention"))?,
            memory_attention: AttentionSublayer::new(config, vb.pp("memory_attention"))?,
            feed_forward: FeedForwardSublayer::new(config, vb.pp("feed_forward"))?,
        })
    }

    /// Returns `(output, self_attn, memory_attn)`.
    pub fn forward(
        &self,
        inputs: &Tensor,
        memory: &Tensor,
        self_attn_mask: Option<&Tensor>,
        memory_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Tensor, Tensor)> {
        let (output, self_attn) = self.self_attention.forward(inputs, inputs, self_attn_mask)?;
        let (output, memory_attn) = self.memory_attention.forward(&output, memory, memory_mask)?;
        let output = self.feed_forward.forward(&output, train)?;
        Ok((output, self_attn, memory_attn))
    }
}

/// Decoder input: scaled token embeddings plus sinusoidal positions, then
/// dropout.
#[derive(Debug, Clone)]
pub struct TargetEmbedding {
    embedding: Embedding,
    positional: PositionalEncoding,
    dropout: Dropout,
}

impl TargetEmbedding {
    pub fn new(
        num_classes: usize,
        pad_id: usize,
        max_len: usize,
        config: &TransformerLayerConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        let embedding = Embedding::new(num_classes, pad_id, config.d_model, vb.pp("embedding"))?;
        let positional = PositionalEncoding::new(config.d_model, max_len, vb.device())?;
        Ok(Self {
            embedding,
            positional,
            dropout: Dropout::new(config.dropout_p),
        })
    }

    /// `(batch, seq)` token ids to `(batch, seq, d_model)` decoder inputs.
    pub fn forward(&self, token_ids: &Tensor, train: bool) -> Result<Tensor> {
        let (_, seq) = token_ids.dims2()?;
        let embedded = self.embedding.forward(token_ids)?;
        let positions = self.positional.forward(seq)?.to_dtype(embedded.dtype())?;
        Ok(self.dropout.forward_t(&embedded.broadcast_add(&positions)?, train)?)
    }
}

use candle_core::Tensor;
use candle_nn::VarBuilder;

use super::{
    ConvExtractor, FeatureExtractor, RecurrentStack, RecurrentStackConfig, SequenceEncoder,
};
use crate::config::ListenerConfig;
use crate::ctc::CtcHead;
use crate::error::{ModelError, Result};

#[derive(Debug, Clone)]
pub struct ListenerOutput {
    /// `(batch, time', output_dim)`, zero past each row's length.
    pub encoder_outputs: Tensor,
    /// `(batch, time', num_classes)` when joint CTC is enabled.
    pub encoder_log_probs: Option<Tensor>,
    pub output_lengths: Vec<usize>,
}

/// Converts filter-bank frames into higher level features.
pub struct Listener {
    config: ListenerConfig,
    extractor: Box<dyn FeatureExtractor>,
    encoder: Box<dyn SequenceEncoder>,
    ctc: Option<CtcHead>,
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("config", &self.config)
            .field("output_dim", &self.encoder.output_dim())
            .field("ctc", &self.ctc.is_some())
            .finish()
    }
}

impl Listener {
    /// Builds the configured VGG/DS2 extractor and LSTM/GRU stack.
    pub fn new(config: ListenerConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let extractor = ConvExtractor::new(config.extractor, config.activation, vb.pp("conv"))?;
        let encoder = RecurrentStack::new(
            RecurrentStackConfig {
                input_dim: extractor.output_dim(config.input_dim),
                hidden_dim: config.hidden_dim,
                num_layers: config.num_layers,
                bidirectional: config.bidirectional,
                rnn_type: config.rnn_type,
                dropout_p: config.dropout_p,
            },
            vb.pp("rnn"),
        )?;
        Self::from_parts(config, Box::new(extractor), Box::new(encoder), vb)
    }

    /// Wires caller-supplied capabilities; the CTC head is still built from
    /// `config` when joint CTC is enabled.
    pub fn from_parts(
        config: ListenerConfig,
        extractor: Box<dyn FeatureExtractor>,
        encoder: Box<dyn SequenceEncoder>,
        vb: VarBuilder,
    ) -> Result<Self> {
        config.validate()?;
        let expected = extractor.output_dim(config.input_dim);
        if expected == 0 {
            return Err(ModelError::invalid_argument(format!(
                "input_dim {} is too small for the extractor",
                config.input_dim
            )));
        }

        let ctc = match (config.joint_ctc_attention, config.num_classes) {
            (true, Some(num_classes)) => {
                let dim = encoder.output_dim();
                if dim != config.hidden_dim * 2 {
                    return Err(ModelError::invalid_argument(
                        "joint CTC requires a bidirectional encoder",
                    ));
                }
                Some(CtcHead::new(dim, num_classes, config.dropout_p, vb.pp("fc"))?)
            }
            _ => None,
        };

        log::debug!(
            "listener extractor={} rnn={} input_dim={} conv_dim={} output_dim={} joint_ctc={}",
            config.extractor,
            config.rnn_type,
            config.input_dim,
            expected,
            encoder.output_dim(),
            ctc.is_some()
        );
        Ok(Self {
            config,
            extractor,
            encoder,
            ctc,
        })
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    pub fn output_dim(&self) -> usize {
        self.encoder.output_dim()
    }

    /// `inputs` is `(batch, time, input_dim)` with per-row `lengths`.
    pub fn forward(&self, inputs: &Tensor, lengths: &[usize], train: bool) -> Result<ListenerOutput> {
        let (batch, _, dim) = inputs.dims3()?;
        if dim != self.config.input_dim {
            return Err(ModelError::invalid_argument(format!(
                "expected {} input features, got {dim}",
                self.config.input_dim
            )));
        }
        if lengths.len() != batch {
            return Err(ModelError::invalid_argument(format!(
                "expected {batch} sequence lengths, got {}",
                lengths.len()
            )));
        }

        // (B, T, D) -> (B, 1, D, T)
        let images = inputs.unsqueeze(1)?.permute((0, 1, 3, 2))?.contiguous()?;
        let (features, output_lengths) = self.extractor.forward(&images, lengths, train)?;

        // (B, C, D', T') -> (B, T', C * D')
        let (_, channels, freq, time) = features.dims4()?;
        let features = features
            .reshape((batch, channels * freq, time))?
            .transpose(1, 2)?
            .contiguous()?;

        let encoder_outputs = self.encoder.forward(&features, &output_lengths, train)?;
        let longest = output_lengths.iter().copied().max().unwrap_or(0).min(time);
        let encoder_outputs = if longest < time {
            encoder_outputs.narrow(1, 0, longest)?
        } else {
            encoder_outputs
        };

        let encoder_log_probs = match &self.ctc {
            Some(head) => Some(head.forward(&encoder_outputs, train)?),
            None => None,
        };

        Ok(ListenerOutput {
            encoder_outputs,
            encoder_log_probs,
            output_lengths,
        })
    }
}

//! Stacked, optionally bidirectional LSTM/GRU encoder over padded batches.
//!
//! Candle's recurrent layers run over a dense `(batch, time, features)`
//! tensor. To get packed-sequence semantics the backward direction reverses
//! each row within its own length, so padding never reaches a valid frame,
//! and every layer's output is zeroed past each row's length.

use std::{fmt, str::FromStr};

use candle_core::{Device, ModuleT, Tensor};
use candle_nn::rnn::{GRUConfig, LSTMConfig, GRU, LSTM, RNN};
use candle_nn::{Dropout, VarBuilder};
use layers::conv::time_mask;
use serde::{Deserialize, Serialize};

use super::SequenceEncoder;
use crate::error::{ModelError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RnnKind {
    #[default]
    Lstm,
    Gru,
}

impl fmt::Display for RnnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RnnKind::Lstm => "lstm",
            RnnKind::Gru => "gru",
        })
    }
}

impl FromStr for RnnKind {
    type Err = ModelError;

    fn from_str(name: &str) -> std::result::Result<Self, Self::Err> {
        match name.trim().to_ascii_lowercase().as_str() {
            "lstm" => Ok(RnnKind::Lstm),
            "gru" => Ok(RnnKind::Gru),
            _ => Err(ModelError::invalid_argument(format!(
                "unsupported RNN type: `{name}`"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
enum Cell {
    Lstm(LSTM),
    Gru(GRU),
}

impl Cell {
    fn new(kind: RnnKind, input_dim: usize, hidden_dim: usize, vb: VarBuilder) -> Result<Self> {
        Ok(match kind {
            RnnKind::Lstm => Cell::Lstm(candle_nn::rnn::lstm(
                input_dim,
                hidden_dim,
                LSTMConfig::default(),
                vb,
            )?),
            RnnKind::Gru => Cell::Gru(candle_nn::rnn::gru(
                input_dim,
                hidden_dim,
                GRUConfig::default(),
                vb,
            )?),
        })
    }

    /// Runs over `(batch, time, features)` from a zero state.
    fn run(&self, inputs: &Tensor) -> Result<Tensor> {
        // Stack hidden states on the time axis; `GRU::states_to_tensor`
        // concatenates them instead.
        let hidden: Vec<Tensor> = match self {
            Cell::Lstm(lstm) => lstm.seq(inputs)?.iter().map(|s| s.h().clone()).collect(),
            Cell::Gru(gru) => gru.seq(inputs)?.iter().map(|s| s.h().clone()).collect(),
        };
        Ok(Tensor::stack(&hidden, 1)?)
    }
}

#[derive(Debug, Clone)]
struct Layer {
    forward: Cell,
    backward: Option<Cell>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecurrentStackConfig {
    pub input_dim: usize,
    pub hidden_dim: usize,
    pub num_layers: usize,
    pub bidirectional: bool,
    pub rnn_type: RnnKind,
    /// Applied between layers, never after the last one.
    pub dropout_p: f32,
}

#[derive(Debug, Clone)]
pub struct RecurrentStack {
    config: RecurrentStackConfig,
    layers: Vec<Layer>,
    dropout: Dropout,
}

impl RecurrentStack {
    pub fn new(config: RecurrentStackConfig, vb: VarBuilder) -> Result<Self> {
        if config.input_dim == 0 || config.hidden_dim == 0 || config.num_layers == 0 {
            return Err(ModelError::invalid_argument(
                "recurrent stack needs non-zero input_dim, hidden_dim and num_layers",
            ));
        }
        let directions = if config.bidirectional { 2 } else { 1 };
        let mut layers = Vec::with_capacity(config.num_layers);
        for idx in 0..config.num_layers {
            let input_dim = if idx == 0 {
                config.input_dim
            } else {
                config.hidden_dim * directions
            };
            let vb = vb.pp(format!("layers.{idx}"));
            let forward = Cell::new(config.rnn_type, input_dim, config.hidden_dim, vb.pp("forward"))?;
            let backward = if config.bidirectional {
                Some(Cell::new(config.rnn_type, input_dim, config.hidden_dim, vb.pp("backward"))?)
            } else {
                None
            };
            layers.push(Layer { forward, backward });
        }
        log::debug!(
            "recurrent stack rnn={} layers={} hidden={} bidirectional={}",
            config.rnn_type,
            config.num_layers,
            config.hidden_dim,
            config.bidirectional
        );
        Ok(Self {
            config,
            layers,
            dropout: Dropout::new(config.dropout_p),
        })
    }

    pub fn config(&self) -> &RecurrentStackConfig {
        &self.config
    }
}

/// Gather index reversing each row's first `len` steps in place.
fn reversal_index(lengths: &[usize], time: usize, features: usize, device: &Device) -> Result<Tensor> {
    let mut index = Vec::with_capacity(lengths.len() * time);
    for &len in lengths {
        let len = len.min(time);
        index.extend((0..time).map(|t| if t < len { (len - 1 - t) as u32 } else { t as u32 }));
    }
    let index = Tensor::from_vec(index, (lengths.len(), time, 1), device)?;
    Ok(index.broadcast_as((lengths.len(), time, features))?.contiguous()?)
}

fn reverse_within_lengths(xs: &Tensor, lengths: &[usize]) -> Result<Tensor> {
    let (_, time, features) = xs.dims3()?;
    let index = reversal_index(lengths, time, features, xs.device())?;
    Ok(xs.contiguous()?.gather(&index, 1)?)
}

impl SequenceEncoder for RecurrentStack {
    fn output_dim(&self) -> usize {
        if self.config.bidirectional {
            self.config.hidden_dim * 2
        } else {
            self.config.hidden_dim
        }
    }

    fn forward(&self, inputs: &Tensor, lengths: &[usize], train: bool) -> Result<Tensor> {
        let (batch, time, features) = inputs.dims3()?;
        if features != self.config.input_dim {
            return Err(ModelError::invalid_argument(format!(
                "expected {} input features, got {features}",
                self.config.input_dim
            )));
        }
        if lengths.len() != batch {
            return Err(ModelError::invalid_argument(format!(
                "expected {batch} sequence lengths, got {}",
                lengths.len()
            )));
        }

        let mask = time_mask(lengths, time, inputs.dtype(), inputs.device())?.unsqueeze(2)?;
        let mut hidden = inputs.broadcast_mul(&mask)?;
        for (idx, layer) in self.layers.iter().enumerate() {
            if idx > 0 {
                hidden = self.dropout.forward_t(&hidden, train)?;
            }
            let forward = layer.forward.run(&hidden)?;
            hidden = match &layer.backward {
                Some(cell) => {
                    let reversed = reverse_within_lengths(&hidden, lengths)?;
                    let backward = reverse_within_lengths(&cell.run(&reversed)?, lengths)?;
                    Tensor::cat(&[&forward, &backward], 2)?
                }
                None => forward,
            };
            hidden = hidden.broadcast_mul(&mask)?;
        }
        Ok(hidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::VarMap;

    fn build(rnn_type: RnnKind, bidirectional: bool, varmap: &VarMap) -> Result<RecurrentStack> {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        RecurrentStack::new(
            RecurrentStackConfig {
                input_dim: 4,
                hidden_dim: 3,
                num_layers: 2,
                bidirectional,
                rnn_type,
                dropout_p: 0.3,
            },
            vb,
        )
    }

    fn max_abs(t: &Tensor) -> Result<f32> {
        Ok(t.abs()?.max_all()?.to_vec0::<f32>()?)
    }

    #[test]
    fn parses_rnn_names() {
        assert_eq!("LSTM".parse::<RnnKind>().ok(), Some(RnnKind::Lstm));
        assert_eq!("gru".parse::<RnnKind>().ok(), Some(RnnKind::Gru));
        assert!("rnn".parse::<RnnKind>().is_err());
    }

    #[test]
    fn reversal_stays_within_each_length() -> Result<()> {
        let xs = Tensor::arange(0f32, 8.0, &Device::Cpu)?.reshape((2, 4, 1))?;
        let reversed = reverse_within_lengths(&xs, &[4, 2])?;
        assert_eq!(
            reversed.flatten_all()?.to_vec1::<f32>()?,
            vec![3.0, 2.0, 1.0, 0.0, 5.0, 4.0, 6.0, 7.0]
        );
        Ok(())
    }

    #[test]
    fn bidirectional_outputs_ignore_padding() -> Result<()> {
        let device = Device::Cpu;
        for rnn_type in [RnnKind::Lstm, RnnKind::Gru] {
            let varmap = VarMap::new();
            let stack = build(rnn_type, true, &varmap)?;
            assert_eq!(stack.output_dim(), 6);

            let short = Tensor::randn(0f32, 1.0, (1, 3, 4), &device)?;
            let garbage = Tensor::randn(0f32, 5.0, (1, 2, 4), &device)?;
            let padded = Tensor::cat(&[&short, &garbage], 1)?;

            let alone = stack.forward(&short, &[3], false)?;
            let batched = stack.forward(&padded, &[3], false)?;
            assert_eq!(batched.dims(), &[1, 5, 6]);

            let valid = batched.narrow(1, 0, 3)?;
            assert!(max_abs(&(valid - alone)?)? < 1e-5);
            assert_eq!(max_abs(&batched.narrow(1, 3, 2)?)?, 0.0);
        }
        Ok(())
    }

    #[test]
    fn unidirectional_stack_reports_hidden_width() -> Result<()> {
        let varmap = VarMap::new();
        let stack = build(RnnKind::Lstm, false, &varmap)?;
        let inputs = Tensor::randn(0f32, 1.0, (2, 4, 4), &Device::Cpu)?;
        let outputs = stack.forward(&inputs, &[4, 4], false)?;
        assert_eq!(outputs.dims(), &[2, 4, 3]);
        assert!(stack.forward(&inputs, &[4], false).is_err());
        Ok(())
    }

    #[test]
    fn gru_stack_keeps_time_and_hidden_axes_apart() -> Result<()> {
        let varmap = VarMap::new();
        let stack = build(RnnKind::Gru, false, &varmap)?;
        let inputs = Tensor::randn(0f32, 1.0, (2, 5, 4), &Device::Cpu)?;
        let outputs = stack.forward(&inputs, &[5, 3], false)?;
        assert_eq!(outputs.dims(), &[2, 5, 3]);

        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let single = Cell::new(RnnKind::Gru, 4, 3, vb.pp("layers.0.forward"))?;
        let per_step = single.run(&inputs)?;
        assert_eq!(per_step.dims(), &[2, 5, 3]);
        Ok(())
    }
}

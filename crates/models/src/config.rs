//! Serde-backed hyper-parameters for the speech models.
//!
//! Every config has defaults matching the reference recipes, loads from JSON
//! with [`from_json_str`](ListenerConfig::from_json_str) and checks its
//! invariants in `validate()`, collecting every violation before failing.

use attention::MultiHeadConfig;
use layers::{ActivationKind, FeedForwardStyle};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::las::{ExtractorKind, RnnKind};

fn check_probability(errors: &mut Vec<String>, name: &str, p: f32) {
    if !(0.0..1.0).contains(&p) {
        errors.push(format!("{name} must be in [0, 1)"));
    }
}

fn finish(errors: Vec<String>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ModelError::validation(errors))
    }
}

/// Shared by the transformer encoder and decoder layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformerLayerConfig {
    pub d_model: usize,
    pub num_heads: usize,
    pub d_ff: usize,
    pub dropout_p: f32,
    pub ffnet_style: FeedForwardStyle,
}

impl Default for TransformerLayerConfig {
    fn default() -> Self {
        Self {
            d_model: 512,
            num_heads: 8,
            d_ff: 2048,
            dropout_p: 0.3,
            ffnet_style: FeedForwardStyle::Ff,
        }
    }
}

impl TransformerLayerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn attention(&self) -> MultiHeadConfig {
        MultiHeadConfig::new(self.d_model, self.num_heads)
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        if self.d_model == 0 {
            errors.push("d_model must be greater than zero".to_string());
        }
        if self.num_heads == 0 {
            errors.push("num_heads must be greater than zero".to_string());
        } else if self.d_model % self.num_heads != 0 {
            errors.push(format!(
                "d_model ({}) must be divisible by num_heads ({})",
                self.d_model, self.num_heads
            ));
        }
        if self.d_ff == 0 {
            errors.push("d_ff must be greater than zero".to_string());
        }
        check_probability(&mut errors, "dropout_p", self.dropout_p);
        finish(errors)
    }
}

/// One Jasper block of `num_sub_blocks` identical sub-blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JasperBlockConfig {
    pub num_sub_blocks: usize,
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub dilation: usize,
    pub bias: bool,
    pub dropout_p: f32,
    pub activation: ActivationKind,
}

impl Default for JasperBlockConfig {
    fn default() -> Self {
        Self {
            num_sub_blocks: 5,
            in_channels: 256,
            out_channels: 256,
            kernel_size: 11,
            stride: 1,
            dilation: 1,
            bias: true,
            dropout_p: 0.2,
            activation: ActivationKind::Relu,
        }
    }
}

impl JasperBlockConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Padding that keeps the time axis unchanged at unit stride.
    pub fn same_padding(&self) -> Result<usize> {
        if self.stride > 1 && self.dilation > 1 {
            return Err(ModelError::invalid_argument(
                "only stride or dilation may be greater than 1",
            ));
        }
        Ok((self.kernel_size / 2) * self.dilation)
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        for (name, value) in [
            ("num_sub_blocks", self.num_sub_blocks),
            ("in_channels", self.in_channels),
            ("out_channels", self.out_channels),
            ("kernel_size", self.kernel_size),
            ("stride", self.stride),
            ("dilation", self.dilation),
        ] {
            if value == 0 {
                errors.push(format!("{name} must be greater than zero"));
            }
        }
        if self.stride > 1 && self.dilation > 1 {
            errors.push("only stride or dilation may be greater than 1".to_string());
        }
        check_probability(&mut errors, "dropout_p", self.dropout_p);
        finish(errors)
    }
}

/// Listen-Attend-Spell encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Filter-bank features per input frame.
    pub input_dim: usize,
    /// Output vocabulary of the joint CTC head.
    pub num_classes: Option<usize>,
    pub hidden_dim: usize,
    pub dropout_p: f32,
    pub num_layers: usize,
    pub bidirectional: bool,
    pub rnn_type: RnnKind,
    pub extractor: ExtractorKind,
    pub activation: ActivationKind,
    pub joint_ctc_attention: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            input_dim: 80,
            num_classes: None,
            hidden_dim: 512,
            dropout_p: 0.3,
            num_layers: 3,
            bidirectional: true,
            rnn_type: RnnKind::Lstm,
            extractor: ExtractorKind::Vgg,
            activation: ActivationKind::Hardtanh,
            joint_ctc_attention: false,
        }
    }
}

impl ListenerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        if self.input_dim == 0 {
            errors.push("input_dim must be greater than zero".to_string());
        }
        if self.hidden_dim == 0 {
            errors.push("hidden_dim must be greater than zero".to_string());
        }
        if self.num_layers == 0 {
            errors.push("num_layers must be greater than zero".to_string());
        }
        check_probability(&mut errors, "dropout_p", self.dropout_p);
        if self.joint_ctc_attention {
            if !self.bidirectional {
                errors.push("joint_ctc_attention requires a bidirectional encoder".to_string());
            }
            match self.num_classes {
                Some(n) if n > 0 => {}
                _ => errors.push("joint_ctc_attention requires num_classes > 0".to_string()),
            }
        }
        finish(errors)
    }
}

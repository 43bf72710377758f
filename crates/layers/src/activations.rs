//! Activation catalogue for convolutional and recurrent speech stacks.
//!
//! Activations are selected once through [`ActivationKind`], usually parsed
//! from a configuration string, and instantiated with [`activation`]. They
//! preserve shape and dtype.
//!
//! # Built-in formulas
//!
//! * **Hardtanh** clamps to `[0, 20]` (the DeepSpeech2 clipped ReLU).
//! * **ELU** uses `alpha = 1`.
//! * **LeakyReLU** uses a negative slope of `0.01`.
//! * **GELU** uses the erf form `0.5 * x * (1 + erf(x / sqrt(2)))`.

use std::{fmt, str::FromStr};

use candle_core::{Result, Tensor};
use serde::{Deserialize, Serialize};

use crate::LayerError;

const HARDTANH_MIN: f64 = 0.0;
const HARDTANH_MAX: f64 = 20.0;
const LEAKY_RELU_SLOPE: f64 = 0.01;
const ELU_ALPHA: f64 = 1.0;

/// Identifies which non-linearity is implemented by an [`Activation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationKind {
    Hardtanh,
    Relu,
    Elu,
    LeakyRelu,
    Gelu,
}

impl ActivationKind {
    pub const ALL: [ActivationKind; 5] = [
        ActivationKind::Hardtanh,
        ActivationKind::Relu,
        ActivationKind::Elu,
        ActivationKind::LeakyRelu,
        ActivationKind::Gelu,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActivationKind::Hardtanh => "hardtanh",
            ActivationKind::Relu => "relu",
            ActivationKind::Elu => "elu",
            ActivationKind::LeakyRelu => "leaky_relu",
            ActivationKind::Gelu => "gelu",
        }
    }
}

impl fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivationKind {
    type Err = LayerError;

    fn from_str(name: &str) -> std::result::Result<Self, Self::Err> {
        let lowered = name.trim().to_ascii_lowercase();
        ActivationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lowered)
            .ok_or_else(|| LayerError::UnknownVariant {
                kind: "activation",
                name: name.to_string(),
            })
    }
}

/// Common interface shared by the activation functions.
pub trait Activation: Send + Sync {
    fn kind(&self) -> ActivationKind;

    fn forward(&self, input: &Tensor) -> Result<Tensor>;
}

struct BuiltinActivation {
    kind: ActivationKind,
}

impl Activation for BuiltinActivation {
    fn kind(&self) -> ActivationKind {
        self.kind
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        match self.kind {
            ActivationKind::Hardtanh => input.clamp(HARDTANH_MIN, HARDTANH_MAX),
            ActivationKind::Relu => input.relu(),
            ActivationKind::Elu => input.elu(ELU_ALPHA),
            ActivationKind::LeakyRelu => candle_nn::ops::leaky_relu(input, LEAKY_RELU_SLOPE),
            ActivationKind::Gelu => input.gelu_erf(),
        }
    }
}

impl fmt::Debug for dyn Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Activation({})", self.kind())
    }
}

/// Returns an owned built-in activation for `kind`.
pub fn activation(kind: ActivationKind) -> Box<dyn Activation> {
    Box::new(BuiltinActivation { kind })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use std::f64::consts::SQRT_2;

    fn apply(kind: ActivationKind, values: &[f32]) -> Result<Vec<f32>> {
        let input = Tensor::from_slice(values, (values.len(),), &Device::Cpu)?;
        activation(kind).forward(&input)?.to_vec1::<f32>()
    }

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("hardtanh".parse::<ActivationKind>().ok(), Some(ActivationKind::Hardtanh));
        assert_eq!("Leaky_ReLU".parse::<ActivationKind>().ok(), Some(ActivationKind::LeakyRelu));
        for kind in ActivationKind::ALL {
            assert_eq!(kind.to_string().parse::<ActivationKind>().ok(), Some(kind));
        }
        assert!(matches!(
            "swish".parse::<ActivationKind>(),
            Err(LayerError::UnknownVariant { kind: "activation", .. })
        ));
    }

    #[test]
    fn hardtanh_clips_to_zero_and_twenty() -> Result<()> {
        let out = apply(ActivationKind::Hardtanh, &[-3.0, 0.5, 19.0, 25.0])?;
        assert_eq!(out, vec![0.0, 0.5, 19.0, 20.0]);
        Ok(())
    }

    #[test]
    fn leaky_relu_and_elu_keep_negative_signal() -> Result<()> {
        let leaky = apply(ActivationKind::LeakyRelu, &[-2.0, 3.0])?;
        assert!((leaky[0] + 0.02).abs() < 1e-6);
        assert_eq!(leaky[1], 3.0);

        let elu = apply(ActivationKind::Elu, &[-1.0, 2.0])?;
        assert!((elu[0] - ((-1.0f32).exp() - 1.0)).abs() < 1e-6);
        assert_eq!(elu[1], 2.0);
        Ok(())
    }

    #[test]
    fn gelu_matches_reference_formula() -> Result<()> {
        let device = Device::Cpu;
        let input = Tensor::from_slice(&[-2.5f32, -0.5, 0.0, 1.0, 3.0], (5,), &device)?;
        let output = activation(ActivationKind::Gelu).forward(&input)?;

        let reference = {
            let x = input.to_dtype(DType::F32)?;
            let inner = (x.affine(1.0 / SQRT_2, 0.0)?.erf()? + 1.0)?;
            x.affine(0.5, 0.0)?.mul(&inner)?
        };

        let diff = output.sub(&reference)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(diff < 5e-6);
        Ok(())
    }
}

//! Scaled dot-product attention from "Attention Is All You Need".
//!
//! Scores are `query · keyᵀ / sqrt(dim)`; masked positions are overwritten
//! with [`MASK_FILL_VALUE`] and the softmax runs along the key axis. The
//! context is the weighted sum of `value` rows.

use std::sync::OnceLock;

use candle_core::Tensor;
use candle_nn::ops::softmax_last_dim;

use crate::core::{Attention, AttentionError, Config, FullyMaskedRows, Result};
use crate::masks::{first_fully_masked_row, masked_fill, MASK_DTYPE, MASK_FILL_VALUE};

/// Parameter-free attention kernel over `[batch, len, dim]` tensors.
#[derive(Debug, Clone)]
pub struct ScaledDotProductAttention {
    dim: usize,
    scale: f64,
    config: Config,
    first_call: OnceLock<()>,
}

impl ScaledDotProductAttention {
    /// Builds a kernel scaling scores by `1 / sqrt(dim)`.
    pub fn new(dim: usize) -> Result<Self> {
        Self::with_config(dim, Config::default())
    }

    /// Builds a kernel with an explicit degenerate-row policy.
    pub fn with_config(dim: usize, config: Config) -> Result<Self> {
        if dim == 0 {
            return Err(AttentionError::InvalidConfig(
                "attention dimension must be greater than zero".into(),
            ));
        }
        Ok(Self {
            dim,
            scale: 1.0 / (dim as f64).sqrt(),
            config,
            first_call: OnceLock::new(),
        })
    }

    /// Dimension used for score scaling.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn validate(
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<()> {
        let (batch, q_len, dim) = query
            .dims3()
            .map_err(|_| AttentionError::shape("query must be [batch, q_len, dim]"))?;
        let (kb, k_len, kd) = key
            .dims3()
            .map_err(|_| AttentionError::shape("key must be [batch, k_len, dim]"))?;
        let (vb, v_len, _) = value
            .dims3()
            .map_err(|_| AttentionError::shape("value must be [batch, v_len, dim]"))?;

        if kb != batch || kd != dim {
            return Err(AttentionError::shape(format!(
                "key shape mismatch: expected [{batch}, ?, {dim}] got [{kb}, {k_len}, {kd}]"
            )));
        }
        if vb != batch || v_len != k_len {
            return Err(AttentionError::shape(format!(
                "value shape mismatch: expected [{batch}, {k_len}, ?] got {:?}",
                value.dims()
            )));
        }
        if let Some(mask) = mask {
            match mask.dims() {
                [mb, mq, mk] if *mb == batch && (*mq == q_len || *mq == 1) && *mk == k_len => {}
                dims => {
                    return Err(AttentionError::shape(format!(
                        "mask shape mismatch: expected [{batch}, {q_len}|1, {k_len}] got {dims:?}"
                    )))
                }
            }
        }
        Ok(())
    }
}

impl Attention for ScaledDotProductAttention {
    fn attend(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<(Tensor, Tensor)> {
        Self::validate(query, key, value, mask)?;

        if self.first_call.set(()).is_ok() {
            log::info!(
                "attention::dot_product init dim={} dtype={:?} fully_masked_rows={:?}",
                self.dim,
                query.dtype(),
                self.config.fully_masked_rows
            );
        }
        let mask = mask.map(|m| m.to_dtype(MASK_DTYPE)).transpose()?;

        if let Some(mask) = &mask {
            match self.config.fully_masked_rows {
                FullyMaskedRows::Reject => {
                    if let Some((batch, query)) = first_fully_masked_row(mask)? {
                        return Err(AttentionError::FullyMaskedRow { batch, query });
                    }
                }
                FullyMaskedRows::Allow => {
                    if log::log_enabled!(log::Level::Warn) {
                        if let Some((batch, query)) = first_fully_masked_row(mask)? {
                            log::warn!(
                                "attention row (batch {batch}, query {query}) is fully masked; weights will be uniform"
                            );
                        }
                    }
                }
            }
        }

        let query = query.contiguous()?;
        let key = key.contiguous()?;
        let value = value.contiguous()?;

        let scores = (query.matmul(&key.t()?)? * self.scale)?;
        let scores = match &mask {
            Some(mask) => masked_fill(&scores, mask, MASK_FILL_VALUE)?,
            None => scores,
        };

        let attn = softmax_last_dim(&scores.contiguous()?)?;
        let context = attn.matmul(&value)?;
        Ok((context, attn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masks::{attn_pad_mask, MASK_DTYPE};
    use candle_core::{DType, Device, D};

    fn inputs(device: &Device) -> candle_core::Result<(Tensor, Tensor, Tensor)> {
        let q = Tensor::randn(0f32, 1.0, (2, 3, 4), device)?;
        let k = Tensor::randn(0f32, 1.0, (2, 5, 4), device)?;
        let v = Tensor::randn(0f32, 1.0, (2, 5, 4), device)?;
        Ok((q, k, v))
    }

    fn naive(q: &[Vec<f32>], k: &[Vec<f32>], v: &[Vec<f32>], scale: f32) -> Vec<Vec<f32>> {
        q.iter()
            .map(|q_row| {
                let scores: Vec<f32> = k
                    .iter()
                    .map(|k_row| q_row.iter().zip(k_row).map(|(a, b)| a * b).sum::<f32>() * scale)
                    .collect();
                let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
                let denom: f32 = exps.iter().sum();
                (0..v[0].len())
                    .map(|d| exps.iter().zip(v).map(|(w, v_row)| w / denom * v_row[d]).sum())
                    .collect()
            })
            .collect()
    }

    #[test]
    fn weights_sum_to_one_without_mask() -> Result<()> {
        let device = Device::Cpu;
        let (q, k, v) = inputs(&device)?;
        let attention = ScaledDotProductAttention::new(4)?;
        let (context, attn) = attention.attend(&q, &k, &v, None)?;

        assert_eq!(context.dims(), &[2, 3, 4]);
        assert_eq!(attn.dims(), &[2, 3, 5]);
        let sums = attn.sum(D::Minus1)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-5));
        Ok(())
    }

    #[test]
    fn matches_naive_reference() -> Result<()> {
        let device = Device::Cpu;
        let (q, k, v) = inputs(&device)?;
        let attention = ScaledDotProductAttention::new(4)?;
        let (context, _) = attention.attend(&q, &k, &v, None)?;

        let context = context.to_vec3::<f32>()?;
        let (q, k, v) = (q.to_vec3::<f32>()?, k.to_vec3::<f32>()?, v.to_vec3::<f32>()?);
        for b in 0..2 {
            let expected = naive(&q[b], &k[b], &v[b], 0.5);
            for (row, expected_row) in context[b].iter().zip(&expected) {
                for (got, want) in row.iter().zip(expected_row) {
                    assert!((got - want).abs() < 1e-5, "{got} vs {want}");
                }
            }
        }
        Ok(())
    }

    #[test]
    fn masked_positions_receive_negligible_weight() -> Result<()> {
        let device = Device::Cpu;
        let (q, k, v) = inputs(&device)?;
        let mask = attn_pad_mask(&k, &[3, 5], 3)?;
        let attention = ScaledDotProductAttention::new(4)?;
        let (_, attn) = attention.attend(&q, &k, &v, Some(&mask))?;

        let weights = attn.to_vec3::<f32>()?;
        for row in &weights[0] {
            assert!(row[3] < 1e-6 && row[4] < 1e-6);
            let kept: f32 = row[..3].iter().sum();
            assert!((kept - 1.0).abs() < 1e-5);
        }
        Ok(())
    }

    #[test]
    fn fully_masked_row_is_rejected_by_default() -> Result<()> {
        let device = Device::Cpu;
        let (q, k, v) = inputs(&device)?;
        let mask = attn_pad_mask(&k, &[0, 5], 3)?;
        let err = ScaledDotProductAttention::new(4)?
            .attend(&q, &k, &v, Some(&mask))
            .unwrap_err();
        assert!(matches!(
            err,
            AttentionError::FullyMaskedRow { batch: 0, query: 0 }
        ));
        Ok(())
    }

    #[test]
    fn fully_masked_row_is_uniform_when_allowed() -> Result<()> {
        let device = Device::Cpu;
        let (q, k, v) = inputs(&device)?;
        let mask = attn_pad_mask(&k, &[0, 5], 3)?;
        let attention = ScaledDotProductAttention::with_config(4, Config::allow_fully_masked())?;
        let (context, attn) = attention.attend(&q, &k, &v, Some(&mask))?;

        let weights = attn.to_vec3::<f32>()?;
        assert!(weights[0][0].iter().all(|w| (w - 0.2).abs() < 1e-6));
        let finite = context.flatten_all()?.to_vec1::<f32>()?;
        assert!(finite.iter().all(|x| x.is_finite()));
        Ok(())
    }

    #[test]
    fn fully_masked_row_stays_finite_in_half_precision() -> Result<()> {
        let device = Device::Cpu;
        let (q, k, v) = inputs(&device)?;
        let (q, k, v) = (q.to_dtype(DType::F16)?, k.to_dtype(DType::F16)?, v.to_dtype(DType::F16)?);
        let mask = attn_pad_mask(&k, &[0, 5], 3)?;
        let attention = ScaledDotProductAttention::with_config(4, Config::allow_fully_masked())?;
        let (context, attn) = attention.attend(&q, &k, &v, Some(&mask))?;

        let weights = attn.to_dtype(DType::F32)?.to_vec3::<f32>()?;
        assert!(weights[0][0].iter().all(|w| (w - 0.2).abs() < 1e-3));
        let sums = attn.to_dtype(DType::F32)?.sum(D::Minus1)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-2));
        let context = context.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(context.iter().all(|x| x.is_finite()));
        Ok(())
    }

    #[test]
    fn shape_mismatches_are_reported() -> Result<()> {
        let device = Device::Cpu;
        let q = Tensor::zeros((1, 2, 4), DType::F32, &device)?;
        let k = Tensor::zeros((1, 3, 4), DType::F32, &device)?;
        let v = Tensor::zeros((1, 2, 4), DType::F32, &device)?;
        let attention = ScaledDotProductAttention::new(4)?;
        let err = attention.attend(&q, &k, &v, None).unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }));

        let v = Tensor::zeros((1, 3, 4), DType::F32, &device)?;
        let mask = Tensor::zeros((1, 2, 2), MASK_DTYPE, &device)?;
        let err = attention.attend(&q, &k, &v, Some(&mask)).unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }));
        Ok(())
    }

    #[test]
    fn zero_dim_is_a_config_error() {
        assert!(matches!(
            ScaledDotProductAttention::new(0),
            Err(AttentionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn large_scores_stay_finite() -> Result<()> {
        let device = Device::Cpu;
        let q = Tensor::full(1_000f32, (1, 2, 4), &device)?;
        let k = Tensor::full(-1_000f32, (1, 2, 4), &device)?;
        let v = Tensor::ones((1, 2, 4), DType::F32, &device)?;
        let (context, _) = ScaledDotProductAttention::new(4)?.attend(&q, &k, &v, None)?;
        let values = context.flatten_all()?.to_vec1::<f32>()?;
        assert!(values.iter().all(|x| x.is_finite()));
        Ok(())
    }
}

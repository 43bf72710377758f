//! Sinusoidal positional encoding from "Attention Is All You Need".
//!
//! ```text
//! PE(pos, 2i)     = sin(pos / 10000^(2i / d_model))
//! PE(pos, 2i + 1) = cos(pos / 10000^(2i / d_model))
//! ```

use candle_core::{bail, Device, Result, Tensor};

const BASE: f64 = 10_000.0;

/// Precomputed `(1, max_len, d_model)` table sliced per call.
#[derive(Debug, Clone)]
pub struct PositionalEncoding {
    d_model: usize,
    max_len: usize,
    table: Tensor,
}

impl PositionalEncoding {
    pub fn new(d_model: usize, max_len: usize, device: &Device) -> Result<Self> {
        if d_model == 0 || d_model % 2 != 0 {
            bail!("positional encoding requires a positive even d_model, got {d_model}");
        }
        if max_len == 0 {
            bail!("positional encoding requires max_len > 0");
        }

        let inv_freqs: Vec<f64> = (0..d_model / 2)
            .map(|idx| BASE.powf(-((2 * idx) as f64) / d_model as f64))
            .collect();

        let mut data = Vec::with_capacity(max_len * d_model);
        for pos in 0..max_len {
            let pos_f = pos as f64;
            for &inv_freq in &inv_freqs {
                let angle = pos_f * inv_freq;
                data.push(angle.sin() as f32);
                data.push(angle.cos() as f32);
            }
        }
        let table = Tensor::from_vec(data, (1, max_len, d_model), device)?;
        log::debug!("positional encoding table d_model={d_model} max_len={max_len}");

        Ok(Self {
            d_model,
            max_len,
            table,
        })
    }

    pub fn d_model(&self) -> usize {
        self.d_model
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Returns the first `length` positions as `(1, length, d_model)`.
    pub fn forward(&self, length: usize) -> Result<Tensor> {
        if length > self.max_len {
            bail!(
                "requested {length} positions but the encoding holds {}",
                self.max_len
            );
        }
        self.table.narrow(1, 0, length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_closed_form() -> Result<()> {
        let pe = PositionalEncoding::new(6, 50, &Device::Cpu)?;
        let table = pe.forward(10)?;
        assert_eq!(table.dims(), &[1, 10, 6]);

        let rows = table.squeeze(0)?.to_vec2::<f32>()?;
        for (pos, row) in rows.iter().enumerate() {
            for i in 0..3 {
                let angle = pos as f64 / 10_000f64.powf((2 * i) as f64 / 6.0);
                assert!((row[2 * i] as f64 - angle.sin()).abs() < 1e-6);
                assert!((row[2 * i + 1] as f64 - angle.cos()).abs() < 1e-6);
            }
        }
        Ok(())
    }

    #[test]
    fn position_zero_alternates_zero_and_one() -> Result<()> {
        let pe = PositionalEncoding::new(4, 8, &Device::Cpu)?;
        let first = pe.forward(1)?.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(first, vec![0.0, 1.0, 0.0, 1.0]);
        Ok(())
    }

    #[test]
    fn rejects_lengths_beyond_table_and_odd_dims() -> Result<()> {
        let pe = PositionalEncoding::new(4, 8, &Device::Cpu)?;
        assert!(pe.forward(8).is_ok());
        assert!(pe.forward(9).is_err());
        assert!(PositionalEncoding::new(5, 8, &Device::Cpu).is_err());
        Ok(())
    }
}

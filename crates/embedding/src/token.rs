//! Token embedding scaled by `sqrt(d_model)`.

use candle_core::{DType, Error, Result, Tensor, D};
use candle_nn::{Init, VarBuilder};

/// Learnable lookup table whose `pad_id` row always yields zeros.
#[derive(Debug, Clone)]
pub struct Embedding {
    num_embeddings: usize,
    pad_id: usize,
    d_model: usize,
    sqrt_dim: f64,
    weight: Tensor,
}

impl Embedding {
    /// Samples the table from `N(0, 1)` when the builder has no stored value.
    pub fn new(num_embeddings: usize, pad_id: usize, d_model: usize, vb: VarBuilder) -> Result<Self> {
        if num_embeddings == 0 || d_model == 0 {
            return Err(Error::Msg(
                "embedding requires num_embeddings > 0 and d_model > 0".into(),
            ));
        }
        if pad_id >= num_embeddings {
            return Err(Error::Msg(format!(
                "pad_id {pad_id} is outside a table of {num_embeddings} rows"
            )));
        }
        let weight = vb.get_with_hints(
            (num_embeddings, d_model),
            "weight",
            Init::Randn {
                mean: 0.0,
                stdev: 1.0,
            },
        )?;
        log::debug!(
            "token embedding num_embeddings={num_embeddings} d_model={d_model} pad_id={pad_id}"
        );
        Ok(Self {
            num_embeddings,
            pad_id,
            d_model,
            sqrt_dim: (d_model as f64).sqrt(),
            weight,
        })
    }

    pub fn num_embeddings(&self) -> usize {
        self.num_embeddings
    }

    pub fn pad_id(&self) -> usize {
        self.pad_id
    }

    pub fn d_model(&self) -> usize {
        self.d_model
    }

    /// Looks up `(batch, seq)` integer ids and returns `(batch, seq, d_model)`.
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        let (batch, seq) = token_ids.dims2()?;
        if !token_ids.dtype().is_int() {
            return Err(Error::Msg(format!(
                "token_ids expected integer dtype but received {:?}",
                token_ids.dtype()
            )));
        }

        let ids = token_ids.to_dtype(DType::I64)?.flatten_all()?;
        self.ensure_id_range(&ids)?;

        let not_pad = ids
            .ne(self.pad_id as i64)?
            .to_dtype(self.weight.dtype())?
            .unsqueeze(D::Minus1)?;
        let gathered = self.weight.index_select(&ids, 0)?.broadcast_mul(&not_pad)?;
        (gathered * self.sqrt_dim)?.reshape((batch, seq, self.d_model))
    }

    fn ensure_id_range(&self, flat_ids: &Tensor) -> Result<()> {
        if flat_ids.elem_count() == 0 {
            return Ok(());
        }
        let min_id = flat_ids.min_all()?.to_scalar::<i64>()?;
        if min_id < 0 {
            return Err(Error::Msg(format!("encountered negative token id {min_id}")));
        }
        let max_id = flat_ids.max_all()?.to_scalar::<i64>()?;
        if max_id >= self.num_embeddings as i64 {
            return Err(Error::Msg(format!(
                "token id {max_id} exceeds vocab size {}",
                self.num_embeddings
            )));
        }
        Ok(())
    }
}

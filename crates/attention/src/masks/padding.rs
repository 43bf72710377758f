//! Builders for padding masks derived from sequence lengths or pad tokens.

use candle_core::{DType, Device, Tensor};

use super::MASK_DTYPE;
use crate::core::{AttentionError, Result};

/// Where padding information comes from.
///
/// Exactly one of the two descriptions is used per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskSource<'a> {
    /// Valid length of every batch row; positions `t >= len` are padding.
    Lengths(&'a [usize]),
    /// Token id marking padding in a `[batch, seq]` id tensor.
    PadId(i64),
}

impl<'a> MaskSource<'a> {
    /// Resolves optional inputs into a source, rejecting both-or-neither.
    pub fn from_options(lengths: Option<&'a [usize]>, pad_id: Option<i64>) -> Result<Self> {
        match (lengths, pad_id) {
            (Some(lengths), None) => Ok(Self::Lengths(lengths)),
            (None, Some(pad_id)) => Ok(Self::PadId(pad_id)),
            (Some(_), Some(_)) => Err(AttentionError::InvalidArgument(
                "supply either input lengths or a pad id, not both".into(),
            )),
            (None, None) => Err(AttentionError::InvalidArgument(
                "supply either input lengths or a pad id".into(),
            )),
        }
    }
}

/// Per-position validity flags, `1` where the position holds real data.
struct Validity {
    batch: usize,
    seq_len: usize,
    flags: Vec<u8>,
}

impl Validity {
    fn compute(inputs: &Tensor, source: MaskSource<'_>) -> Result<Self> {
        match source {
            MaskSource::Lengths(lengths) => {
                let (batch, seq_len) = match inputs.dims() {
                    [batch, seq_len] | [batch, seq_len, _] => (*batch, *seq_len),
                    dims => {
                        return Err(AttentionError::shape(format!(
                            "length-based mask expects [batch, seq] or [batch, seq, dim] inputs, got {dims:?}"
                        )))
                    }
                };
                if lengths.len() != batch {
                    return Err(AttentionError::shape(format!(
                        "expected {batch} sequence lengths, got {}",
                        lengths.len()
                    )));
                }
                let mut flags = vec![0u8; batch * seq_len];
                for (b, &len) in lengths.iter().enumerate() {
                    let valid = len.min(seq_len);
                    flags[b * seq_len..b * seq_len + valid].fill(1);
                }
                Ok(Self {
                    batch,
                    seq_len,
                    flags,
                })
            }
            MaskSource::PadId(pad_id) => {
                let (batch, seq_len) = inputs.dims2().map_err(|_| {
                    AttentionError::shape("pad-id mask expects [batch, seq] token ids")
                })?;
                let ids = inputs.to_dtype(DType::I64)?.to_vec2::<i64>()?;
                let flags = ids
                    .iter()
                    .flat_map(|row| row.iter().map(|&id| u8::from(id != pad_id)))
                    .collect();
                Ok(Self {
                    batch,
                    seq_len,
                    flags,
                })
            }
        }
    }

    fn into_tensor(self, invert: bool, device: &Device) -> Result<Tensor> {
        let flags = if invert {
            self.flags.into_iter().map(|flag| 1 - flag).collect()
        } else {
            self.flags
        };
        Ok(Tensor::from_vec(flags, (self.batch, self.seq_len), device)?)
    }
}

/// Validity mask shaped `[batch, seq, 1]`: `1` at real positions, `0` at padding.
pub fn non_pad_mask(inputs: &Tensor, source: MaskSource<'_>) -> Result<Tensor> {
    let validity = Validity::compute(inputs, source)?;
    Ok(validity.into_tensor(false, inputs.device())?.unsqueeze(2)?)
}

/// Padding mask shaped `[batch, seq]`: `1` at padding positions.
pub fn padding_mask(inputs: &Tensor, source: MaskSource<'_>) -> Result<Tensor> {
    Validity::compute(inputs, source)?.into_tensor(true, inputs.device())
}

/// Length-based padding mask broadcast over `expand_length` query positions,
/// shaped `[batch, expand_length, seq]`.
pub fn attn_pad_mask(inputs: &Tensor, lengths: &[usize], expand_length: usize) -> Result<Tensor> {
    let pad = padding_mask(inputs, MaskSource::Lengths(lengths))?;
    expand_over_queries(&pad, expand_length)
}

/// Masks padded keys of `seq_k` for every one of `q_len` queries, shaped
/// `[batch, q_len, k_len]`.
pub fn attn_key_pad_mask(seq_k: &Tensor, q_len: usize, pad_id: i64) -> Result<Tensor> {
    let pad = padding_mask(seq_k, MaskSource::PadId(pad_id))?;
    expand_over_queries(&pad, q_len)
}

fn expand_over_queries(pad: &Tensor, q_len: usize) -> Result<Tensor> {
    let (batch, k_len) = pad.dims2()?;
    let expanded = pad
        .unsqueeze(1)?
        .broadcast_as((batch, q_len, k_len))?
        .contiguous()?;
    debug_assert_eq!(expanded.dtype(), MASK_DTYPE);
    Ok(expanded)
}

use std::collections::HashMap;

use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{VarBuilder, VarMap};
use embedding::{Embedding, PositionalEncoding};

fn make_ids(data: &[i64], shape: (usize, usize)) -> Result<Tensor> {
    Tensor::from_slice(data, shape, &Device::Cpu)
}

#[test]
fn lookups_are_scaled_by_sqrt_d_model() -> Result<()> {
    let device = Device::Cpu;
    let weight = Tensor::arange(0f32, 12.0, &device)?.reshape((3, 4))?;
    let vb = VarBuilder::from_tensors(
        HashMap::from([("weight".to_string(), weight)]),
        DType::F32,
        &device,
    );
    let embedding = Embedding::new(3, 0, 4, vb)?;

    let output = embedding.forward(&make_ids(&[2, 1], (1, 2))?)?;
    assert_eq!(output.dims(), &[1, 2, 4]);
    let rows = output.squeeze(0)?.to_vec2::<f32>()?;
    assert_eq!(rows[0], vec![16.0, 18.0, 20.0, 22.0]);
    assert_eq!(rows[1], vec![8.0, 10.0, 12.0, 14.0]);
    Ok(())
}

#[test]
fn pad_rows_are_zero() -> Result<()> {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let embedding = Embedding::new(10, 0, 8, vb)?;

    let output = embedding.forward(&make_ids(&[5, 0, 0, 3], (2, 2))?)?;
    let pad = output.get(0)?.get(1)?.abs()?.sum_all()?.to_scalar::<f32>()?;
    assert_eq!(pad, 0.0);
    let token = output.get(0)?.get(0)?.abs()?.sum_all()?.to_scalar::<f32>()?;
    assert!(token > 0.0);
    Ok(())
}

#[test]
fn rejects_out_of_range_ids_and_float_inputs() -> Result<()> {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let embedding = Embedding::new(4, 0, 3, vb)?;

    let err = embedding.forward(&make_ids(&[0, 4], (1, 2))?);
    assert!(err.is_err_and(|e| e.to_string().contains("token id 4 exceeds vocab size")));

    let floats = Tensor::zeros((1, 2), DType::F32, &device)?;
    assert!(embedding.forward(&floats).is_err());
    Ok(())
}

#[test]
fn embeddings_and_positions_combine() -> Result<()> {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let embedding = Embedding::new(16, 0, 8, vb)?;
    let positional = PositionalEncoding::new(8, 32, &device)?;

    let ids = make_ids(&[1, 2, 3, 0, 4, 5, 0, 0], (2, 4))?;
    let hidden = embedding.forward(&ids)?.broadcast_add(&positional.forward(4)?)?;
    assert_eq!(hidden.dims(), &[2, 4, 8]);
    Ok(())
}

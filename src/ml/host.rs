// Host <-> device transfer helpers used wherever values have to be
// inspected or rewritten element by element (precision rounding,
// gradient buckets).

use anyhow::{anyhow, Result};
use burn::prelude::*;

/// Copy a tensor to host memory as f32, whatever the backend float type.
pub fn to_host<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("Cannot read tensor data: {e:?}"))
}

/// Build a tensor on `device` from host values.
pub fn from_host<B: Backend, const D: usize>(
    values: Vec<f32>,
    dims:   [usize; D],
    device: &B::Device,
) -> Tensor<B, D> {
    Tensor::from_data(TensorData::new(values, dims), device)
}

//! Host readback of tensor data.

use crate::error::{RefineDetError, RefineDetResult};
use burn::prelude::*;

/// Reads a float tensor back to the host as a flat, row-major `f32` vector.
pub(crate) fn float_vec<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
) -> RefineDetResult<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| RefineDetError::TensorConversion {
            reason: format!("{:?}", e),
        })
}

//! # Field Splitting Helper
//!
//! Packed prediction and label tensors store several logical fields side by side along
//! one axis. `split_fields` cuts such a tensor back into its fields by width.

use burn::prelude::*;

/// Splits `tensor` along `dim` into `N` consecutive pieces of the given widths.
///
/// # Panics
///
/// Panics if the widths do not add up to the size of `dim`. Callers validate packed
/// shapes before splitting, so a mismatch here is a bug rather than bad input.
pub fn split_fields<B: Backend, const D: usize, const N: usize>(
    tensor: Tensor<B, D>,
    widths: [usize; N],
    dim: usize,
) -> [Tensor<B, D>; N] {
    let total: usize = widths.iter().sum();
    assert_eq!(
        total,
        tensor.dims()[dim],
        "Field widths {:?} do not cover axis {} of shape {:?}",
        widths,
        dim,
        tensor.dims()
    );

    let mut start = 0;
    core::array::from_fn(|i| {
        let field = tensor.clone().narrow(dim, start, widths[i]);
        start += widths[i];
        field
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::ndarray::NdArray, tensor::Tensor};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_split_fields_widths() {
        let device = Default::default();
        let tensor = Tensor::<TestBackend, 3>::zeros([2, 4, 7], &device);

        let [a, b, c] = split_fields(tensor, [2, 2, 3], 2);

        assert_eq!(a.dims(), [2, 4, 2]);
        assert_eq!(b.dims(), [2, 4, 2]);
        assert_eq!(c.dims(), [2, 4, 3]);
    }

    #[test]
    fn test_split_fields_preserves_order() {
        let device = Default::default();
        let tensor = Tensor::<TestBackend, 2>::from_data([[0.0, 1.0, 2.0, 3.0, 4.0]], &device);

        let [_, middle, last] = split_fields(tensor, [1, 3, 1], 1);

        assert_eq!(middle.into_data().to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(last.into_data().to_vec::<f32>().unwrap(), vec![4.0]);
    }

    #[test]
    #[should_panic(expected = "do not cover axis")]
    fn test_split_fields_rejects_short_widths() {
        let device = Default::default();
        let tensor = Tensor::<TestBackend, 2>::zeros([1, 5], &device);

        let _ = split_fields(tensor, [2, 2], 1);
    }
}

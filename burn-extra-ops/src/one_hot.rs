//! One-hot expansion of integer class labels.

use burn::prelude::*;

/// Expands `[batch, len]` class indices into a `[batch, len, num_classes]` float tensor
/// holding `1.0` at each label position and `0.0` elsewhere.
pub fn one_hot<B: Backend>(labels: Tensor<B, 2, Int>, num_classes: usize) -> Tensor<B, 3> {
    let [batch, len] = labels.dims();
    let device = labels.device();

    let classes = Tensor::<B, 1, Int>::arange(0..num_classes as i64, &device)
        .reshape([1, 1, num_classes])
        .expand([batch, len, num_classes]);

    labels
        .reshape([batch, len, 1])
        .expand([batch, len, num_classes])
        .equal(classes)
        .float()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::ndarray::NdArray, tensor::Tensor};

    type TestBackend = NdArray<f32>;

    #[test]
    fn one_hot_marks_label_positions() {
        let device = Default::default();
        let labels = Tensor::<TestBackend, 2, Int>::from_data([[0, 2], [1, 1]], &device);

        let encoded = one_hot(labels, 3);

        assert_eq!(encoded.dims(), [2, 2, 3]);
        let values = encoded.into_data().to_vec::<f32>().unwrap();
        assert_eq!(
            values,
            vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0]
        );
    }

    #[test]
    fn one_hot_rows_sum_to_one() {
        let device = Default::default();
        let labels = Tensor::<TestBackend, 2, Int>::from_data([[4, 0, 3, 1]], &device);

        let sums = one_hot(labels, 5)
            .sum_dim(2)
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        assert_eq!(sums, vec![1.0; 4]);
    }
}

//! Smooth-L1 box regression loss.

use burn::{
    prelude::*,
    tensor::{backend::Backend, Tensor},
};
use burn_extra_ops::{split_fields, TensorExtraOps};

/// Smooth-L1 loss between predicted and target box offsets.
///
/// Offsets are laid out `[batch, anchors, 4]` as `(dy, dx, dh, dw)`; each anchor's four
/// terms are summed and only anchors with a non-zero mask contribute.
#[derive(Module, Debug)]
pub struct SmoothL1Loss<B: Backend> {
    _phantom: std::marker::PhantomData<B>,
}

impl<B: Backend> Default for SmoothL1Loss<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> SmoothL1Loss<B> {
    pub const fn new() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }

    /// Per-item loss sums, `[batch]`.
    ///
    /// # Arguments
    /// * `pred` - Predicted offsets `[batch, anchors, 4]`
    /// * `target` - Encoded target offsets `[batch, anchors, 4]`
    /// * `mask` - `[batch, anchors]`, `1` for anchors that contribute
    pub fn forward(&self, pred: Tensor<B, 3>, target: Tensor<B, 3>, mask: Tensor<B, 2>) -> Tensor<B, 1> {
        let [batch, anchors, _] = pred.dims();
        let per_anchor = (pred - target).smooth_l1().sum_dim(2).reshape([batch, anchors]);

        (per_anchor * mask).sum_dim(1).reshape([batch])
    }

    /// Gradient of the unnormalized loss with respect to `pred`, returned as the center
    /// `(dy, dx)` and size `(dh, dw)` halves.
    pub fn backward(
        &self,
        pred: Tensor<B, 3>,
        target: Tensor<B, 3>,
        mask: Tensor<B, 2>,
    ) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let [batch, anchors, width] = pred.dims();
        let grad = (pred - target).smooth_l1_grad()
            * mask.reshape([batch, anchors, 1]).expand([batch, anchors, width]);

        let [center, size] = split_fields(grad, [2, 2], 2);
        (center, size)
    }
}

//! Additional operations for the Burn deep learning framework
//!
//! This crate provides operations that are commonly used in detection losses but are not
//! available in the core Burn framework as a single call.

use burn::prelude::*;

mod fields;
mod one_hot;

// Convenient re-exports
pub use fields::split_fields;
pub use one_hot::one_hot;

/// Additional operations for Burn tensors
pub trait TensorExtraOps<B: Backend, const D: usize> {
    /// Elementwise smooth-L1 with unit transition point:
    /// `0.5 * x^2` where `|x| < 1`, `|x| - 0.5` elsewhere.
    fn smooth_l1(self) -> Self;

    /// Derivative of [`TensorExtraOps::smooth_l1`]: `x` inside the unit interval, `sign(x)` outside.
    fn smooth_l1_grad(self) -> Self;
}

impl<B: Backend, const D: usize> TensorExtraOps<B, D> for Tensor<B, D> {
    fn smooth_l1(self) -> Self {
        let abs = self.abs();
        let quadratic = abs.clone().powf_scalar(2.0).mul_scalar(0.5);
        let linear = abs.clone().sub_scalar(0.5);

        quadratic.mask_where(abs.greater_equal_elem(1.0), linear)
    }

    fn smooth_l1_grad(self) -> Self {
        self.clamp(-1.0, 1.0)
    }
}

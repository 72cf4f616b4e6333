//! Softmax cross-entropy over per-anchor class logits.

use burn::{
    prelude::*,
    tensor::{activation::softmax, backend::Backend, Int, Tensor},
};
use burn_extra_ops::one_hot;

use crate::{error::RefineDetResult, readback::float_vec};

/// Configuration for Softmax Cross-Entropy Loss.
#[derive(Config, Debug)]
pub struct SoftmaxCrossEntropyLossConfig {
    /// Additive guard inside the `log`.
    #[config(default = "1e-20")]
    pub epsilon: f32,
}

/// Softmax cross-entropy `-ln(softmax(logits)[label] + epsilon)` evaluated per anchor.
///
/// Logits are laid out `[batch, anchors, classes]`, labels `[batch, anchors]`.
#[derive(Module, Debug)]
pub struct SoftmaxCrossEntropyLoss<B: Backend> {
    pub epsilon: f32,
    _phantom: std::marker::PhantomData<B>,
}

impl SoftmaxCrossEntropyLossConfig {
    /// Initialize a new cross-entropy loss with the given configuration.
    pub const fn init<B: Backend>(&self) -> SoftmaxCrossEntropyLoss<B> {
        SoftmaxCrossEntropyLoss {
            epsilon: self.epsilon,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<B: Backend> Default for SoftmaxCrossEntropyLoss<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> SoftmaxCrossEntropyLoss<B> {
    /// Create a new cross-entropy loss with default configuration.
    pub fn new() -> Self {
        SoftmaxCrossEntropyLossConfig::new().init()
    }

    /// Unreduced loss, `[batch, anchors]`.
    pub fn forward_no_reduction(
        &self,
        logits: Tensor<B, 3>,
        labels: Tensor<B, 2, Int>,
    ) -> Tensor<B, 2> {
        let [batch, anchors, _] = logits.dims();
        let probs = softmax(logits, 2);

        probs
            .gather(2, labels.reshape([batch, anchors, 1]))
            .reshape([batch, anchors])
            .add_scalar(self.epsilon)
            .log()
            .neg()
    }

    /// Per-item loss sums, `[batch]`.
    ///
    /// # Arguments
    /// * `logits` - Class logits `[batch, anchors, classes]`
    /// * `labels` - Target class per anchor `[batch, anchors]`
    /// * `mask` - Optional `[batch, anchors]` weights; anchors with weight `0` are excluded
    pub fn forward(
        &self,
        logits: Tensor<B, 3>,
        labels: Tensor<B, 2, Int>,
        mask: Option<Tensor<B, 2>>,
    ) -> Tensor<B, 1> {
        let [batch, _, _] = logits.dims();
        let per_anchor = self.forward_no_reduction(logits, labels);
        let per_anchor = match mask {
            Some(mask) => per_anchor * mask,
            None => per_anchor,
        };

        per_anchor.sum_dim(1).reshape([batch])
    }

    /// Per-anchor losses read back to the host as `(anchor, loss)` pairs, one list per
    /// batch item.
    ///
    /// # Errors
    ///
    /// Returns `Err(RefineDetError::TensorConversion)` if the losses cannot be read back.
    pub fn per_anchor(
        &self,
        logits: Tensor<B, 3>,
        labels: Tensor<B, 2, Int>,
    ) -> RefineDetResult<Vec<Vec<(usize, f32)>>> {
        let [_, anchors, _] = logits.dims();
        let losses = float_vec(self.forward_no_reduction(logits, labels))?;

        Ok(losses
            .chunks_exact(anchors)
            .map(|item| item.iter().copied().enumerate().collect())
            .collect())
    }

    /// Gradient of the unnormalized per-anchor loss with respect to the logits:
    /// `softmax(logits) - one_hot(labels)`, zeroed where `mask` is `0`.
    pub fn backward(
        &self,
        logits: Tensor<B, 3>,
        labels: Tensor<B, 2, Int>,
        mask: Option<Tensor<B, 2>>,
    ) -> Tensor<B, 3> {
        let [batch, anchors, classes] = logits.dims();
        let grad = softmax(logits, 2) - one_hot(labels, classes);

        match mask {
            Some(mask) => grad * mask.reshape([batch, anchors, 1]).expand([batch, anchors, classes]),
            None => grad,
        }
    }
}

//! Loss functions for RefineDet training.
//!
//! `SoftmaxCrossEntropyLoss` and `SmoothL1Loss` are the building blocks; `RefineDetLoss`
//! combines them with anchor matching and hard-negative mining into the two-stage loss.

pub mod context;
pub mod cross_entropy;
pub mod refinedet_loss;
pub mod smooth_l1;

// Re-export loss functions and their configs
pub use context::{ItemLossState, LossContext};
pub use cross_entropy::{SoftmaxCrossEntropyLoss, SoftmaxCrossEntropyLossConfig};
pub use refinedet_loss::{RefineDetLoss, RefineDetLossOutput};
pub use smooth_l1::SmoothL1Loss;

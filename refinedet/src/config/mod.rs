//! Configuration module for the RefineDet loss.
//!
//! The loss has no runtime-tunable properties from the host framework; everything lives in
//! a typed configuration validated once at construction:
//! - `core`: the loss configuration and its packed tensor layout

pub mod core;

pub use self::core::{RefineDetLossConfig, LABEL_FIXED_WIDTH, PREDICTION_BOX_WIDTH};

//! Core configuration structures for the RefineDet loss.
//!
//! This module defines the hand-tuned constants of the loss as named, validated
//! configuration values and describes the packed layout of the prediction and label
//! tensors the loss consumes.

use crate::error::{RefineDetError, RefineDetResult};
use burn::prelude::*;

/// Width of the box and ARM confidence fields packed ahead of the ODM class logits:
/// ARM yx, ARM hw, ARM conf, ODM yx, ODM hw (two values each).
pub const PREDICTION_BOX_WIDTH: usize = 10;

/// Width of the label fields packed ahead of the one-hot class vector:
/// presence flag, yx1, yx2.
pub const LABEL_FIXED_WIDTH: usize = 5;

/// Configuration for the RefineDet two-stage loss.
#[derive(Config, Debug)]
pub struct RefineDetLossConfig {
    /// Number of ODM classes, background (class 0) included.
    #[config(default = 21)]
    pub num_classes: usize,
    /// Maximum number of ground-truth boxes per image in the label tensor.
    #[config(default = 5)]
    pub max_gt_boxes: usize,
    /// Anchors whose IoU with a ground truth exceeds this value become positive.
    #[config(default = 0.5)]
    pub positive_iou_threshold: f32,
    /// Negatives whose ARM background probability exceeds this value are dropped
    /// before hard-negative mining.
    #[config(default = 0.99)]
    pub background_filter_threshold: f32,
    /// Maximum number of mined negatives per positive anchor.
    #[config(default = 3)]
    pub negative_ratio: usize,
    /// Extra divisor applied to the ARM classification normalizer.
    #[config(default = 1.0)]
    pub arm_conf_loss_divider: f32,
    /// Additive guard inside every `log` of the loss.
    #[config(default = "1e-20")]
    pub epsilon: f32,
}

impl RefineDetLossConfig {
    /// Builds the configuration from host-framework layer properties.
    ///
    /// The loss accepts no properties, so any non-empty list is rejected.
    ///
    /// # Errors
    ///
    /// Returns `Err(RefineDetError::UnknownProperties)` when `properties` is not empty.
    pub fn from_properties<S: AsRef<str>>(properties: &[S]) -> RefineDetResult<Self> {
        if !properties.is_empty() {
            return Err(RefineDetError::UnknownProperties {
                count: properties.len(),
            });
        }
        Ok(Self::new())
    }

    /// Validate the configuration and return appropriate errors for invalid settings.
    ///
    /// # Errors
    ///
    /// Returns `Err(RefineDetError::InvalidConfiguration)` if any validation rule is violated.
    pub fn validate(&self) -> RefineDetResult<()> {
        // 1. Background plus at least one object class
        if self.num_classes < 2 {
            return Err(RefineDetError::InvalidConfiguration {
                reason: format!("num_classes must be >= 2, got {}", self.num_classes),
            });
        }

        // 2. Label tensor must hold at least one box
        if self.max_gt_boxes == 0 {
            return Err(RefineDetError::InvalidConfiguration {
                reason: "max_gt_boxes must be >= 1".to_string(),
            });
        }

        // 3. Probability-like thresholds
        for (name, value) in [
            ("positive_iou_threshold", self.positive_iou_threshold),
            ("background_filter_threshold", self.background_filter_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(RefineDetError::InvalidConfiguration {
                    reason: format!("{name} must be in (0, 1], got {value}"),
                });
            }
        }

        // 4. Mining needs room for negatives
        if self.negative_ratio == 0 {
            return Err(RefineDetError::InvalidConfiguration {
                reason: "negative_ratio must be >= 1".to_string(),
            });
        }

        // 5. Divisors and guards
        if !(self.arm_conf_loss_divider > 0.0) {
            return Err(RefineDetError::InvalidConfiguration {
                reason: format!(
                    "arm_conf_loss_divider must be positive, got {}",
                    self.arm_conf_loss_divider
                ),
            });
        }
        if !(self.epsilon > 0.0) {
            return Err(RefineDetError::InvalidConfiguration {
                reason: format!("epsilon must be positive, got {}", self.epsilon),
            });
        }

        Ok(())
    }

    /// Widths of the packed prediction fields along the last axis:
    /// ARM yx, ARM hw, ARM conf, ODM yx, ODM hw, ODM conf.
    pub const fn prediction_field_widths(&self) -> [usize; 6] {
        [2, 2, 2, 2, 2, self.num_classes]
    }

    /// Widths of the packed label fields along the last axis:
    /// presence flag, yx1, yx2, one-hot class.
    pub const fn label_field_widths(&self) -> [usize; 4] {
        [1, 2, 2, self.num_classes]
    }

    /// Last-axis size of the prediction tensor.
    pub const fn prediction_width(&self) -> usize {
        PREDICTION_BOX_WIDTH + self.num_classes
    }

    /// Last-axis size of the label tensor.
    pub const fn label_width(&self) -> usize {
        LABEL_FIXED_WIDTH + self.num_classes
    }

    /// Expected label tensor shape for a given prediction tensor shape.
    pub const fn label_dims(&self, prediction_dims: [usize; 4]) -> [usize; 4] {
        [
            prediction_dims[0],
            prediction_dims[1],
            self.max_gt_boxes,
            self.label_width(),
        ]
    }

    /// Checks a prediction tensor shape against `[batch, 1, num_anchors, 10 + C]` with a
    /// non-empty batch.
    ///
    /// # Errors
    ///
    /// Returns `Err(RefineDetError::InvalidTensorShape)` on any mismatch.
    pub fn check_prediction_dims(
        &self,
        dims: [usize; 4],
        num_anchors: usize,
    ) -> RefineDetResult<()> {
        let [batch, channels, anchors, width] = dims;
        if batch == 0 || channels != 1 || anchors != num_anchors || width != self.prediction_width()
        {
            return Err(RefineDetError::InvalidTensorShape {
                tensor: "prediction",
                expected: format!("[batch >= 1, 1, {}, {}]", num_anchors, self.prediction_width()),
                actual: format!("{:?}", dims),
            });
        }
        Ok(())
    }

    /// Checks a label tensor shape against `[batch, 1, max_gt_boxes, 5 + C]` with a
    /// non-empty batch.
    ///
    /// # Errors
    ///
    /// Returns `Err(RefineDetError::InvalidTensorShape)` on any mismatch.
    pub fn check_label_dims(&self, dims: [usize; 4]) -> RefineDetResult<()> {
        let [batch, channels, boxes, width] = dims;
        if batch == 0 || channels != 1 || boxes != self.max_gt_boxes || width != self.label_width() {
            return Err(RefineDetError::InvalidTensorShape {
                tensor: "label",
                expected: format!("[batch >= 1, 1, {}, {}]", self.max_gt_boxes, self.label_width()),
                actual: format!("{:?}", dims),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configuration_is_valid() {
        let config = RefineDetLossConfig::new();

        assert_eq!(config.num_classes, 21);
        assert_eq!(config.max_gt_boxes, 5);
        assert_eq!(config.negative_ratio, 3);
        assert!((config.background_filter_threshold - 0.99).abs() < 1e-7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_properties_accepted() {
        let properties: [&str; 0] = [];
        assert!(RefineDetLossConfig::from_properties(&properties).is_ok());
    }

    #[test]
    fn test_any_property_rejected() {
        match RefineDetLossConfig::from_properties(&["num_classes=3", "foo=bar"]) {
            Err(RefineDetError::UnknownProperties { count }) => assert_eq!(count, 2),
            _ => panic!("Expected UnknownProperties error"),
        }
    }

    #[test]
    fn test_too_few_classes() {
        let config = RefineDetLossConfig::new().with_num_classes(1);

        match config.validate() {
            Err(RefineDetError::InvalidConfiguration { reason }) => {
                assert!(reason.contains("num_classes must be >= 2"));
            }
            _ => panic!("Expected InvalidConfiguration error"),
        }
    }

    #[test]
    fn test_threshold_out_of_range() {
        let config = RefineDetLossConfig::new().with_background_filter_threshold(1.5);

        match config.validate() {
            Err(RefineDetError::InvalidConfiguration { reason }) => {
                assert!(reason.contains("background_filter_threshold"));
            }
            _ => panic!("Expected InvalidConfiguration error"),
        }
    }

    #[test]
    fn test_zero_negative_ratio() {
        let config = RefineDetLossConfig::new().with_negative_ratio(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_packed_layout() {
        let config = RefineDetLossConfig::new();

        assert_eq!(config.prediction_width(), 31);
        assert_eq!(config.label_width(), 26);
        assert_eq!(
            config.prediction_field_widths().iter().sum::<usize>(),
            config.prediction_width()
        );
        assert_eq!(
            config.label_field_widths().iter().sum::<usize>(),
            config.label_width()
        );
        assert_eq!(config.label_dims([4, 1, 3000, 31]), [4, 1, 5, 26]);
    }

    #[test]
    fn test_prediction_width_mismatch() {
        let config = RefineDetLossConfig::new();

        assert!(config.check_prediction_dims([2, 1, 3000, 31], 3000).is_ok());
        match config.check_prediction_dims([2, 1, 3000, 30], 3000) {
            Err(RefineDetError::InvalidTensorShape { tensor, actual, .. }) => {
                assert_eq!(tensor, "prediction");
                assert!(actual.contains("30"));
            }
            _ => panic!("Expected InvalidTensorShape error"),
        }
        assert!(config.check_prediction_dims([2, 1, 2999, 31], 3000).is_err());
    }

    #[test]
    fn test_empty_batch_rejected() {
        let config = RefineDetLossConfig::new();

        match config.check_prediction_dims([0, 1, 3000, 31], 3000) {
            Err(RefineDetError::InvalidTensorShape { tensor, expected, .. }) => {
                assert_eq!(tensor, "prediction");
                assert!(expected.contains("batch >= 1"));
            }
            _ => panic!("Expected InvalidTensorShape error"),
        }
        assert!(config.check_label_dims([0, 1, 5, 26]).is_err());
    }

    #[test]
    fn test_label_dims_mismatch() {
        let config = RefineDetLossConfig::new();

        assert!(config.check_label_dims([2, 1, 5, 26]).is_ok());
        assert!(config.check_label_dims([2, 1, 4, 26]).is_err());
        assert!(config.check_label_dims([2, 2, 5, 26]).is_err());
    }
}

//! Ground-truth boxes read from the packed label tensor.
//!
//! Each label row is `[presence, y1, x1, y2, x2, one_hot(num_classes)]`. Boxes are front
//! packed: the first row with a zero presence flag ends the item's box list.

use crate::{
    config::RefineDetLossConfig,
    error::RefineDetResult,
    geometry::{CenterSizeBox, CornerBox},
    readback::float_vec,
};
use burn::prelude::*;

/// A present ground-truth box with its class index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundTruthBox {
    pub bbox: CenterSizeBox,
    pub class_id: usize,
}

impl GroundTruthBox {
    pub const fn new(bbox: CenterSizeBox, class_id: usize) -> Self {
        Self { bbox, class_id }
    }

    /// Parses the label rows of one batch item (`max_gt_boxes * label_width` values).
    pub fn parse_item(rows: &[f32], config: &RefineDetLossConfig) -> Vec<Self> {
        rows.chunks_exact(config.label_width())
            .take(config.max_gt_boxes)
            .take_while(|row| row[0] != 0.0)
            .map(|row| {
                let corners = CornerBox::new([row[1], row[2]], [row[3], row[4]]);
                let one_hot = &row[5..];
                Self::new(corners.to_center_size(), first_argmax(one_hot))
            })
            .collect()
    }

    /// Parses a `[batch, 1, max_gt_boxes, 5 + num_classes]` label tensor.
    ///
    /// # Errors
    ///
    /// Returns `Err(RefineDetError::InvalidTensorShape)` for a mis-shaped label tensor and
    /// `Err(RefineDetError::TensorConversion)` if the data cannot be read back.
    pub fn parse_batch<B: Backend>(
        labels: Tensor<B, 4>,
        config: &RefineDetLossConfig,
    ) -> RefineDetResult<Vec<Vec<Self>>> {
        let dims = labels.dims();
        config.check_label_dims(dims)?;

        let values = float_vec(labels)?;
        let per_item = config.max_gt_boxes * config.label_width();

        Ok(values
            .chunks_exact(per_item)
            .map(|rows| Self::parse_item(rows, config))
            .collect())
    }
}

/// Index of the first maximum; `0` for an empty slice.
pub(crate) fn first_argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

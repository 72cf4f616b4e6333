//! # RefineDet Loss
//!
//! Training loss and hand-derived gradient of the two-stage RefineDet detector: an Anchor
//! Refinement Module (ARM) scoring objectness and coarse boxes, followed by an Object
//! Detection Module (ODM) scoring classes and refined boxes, both trained against
//! ground truth through anchor matching and hard-negative mining.

mod anchors;
mod config;
mod error;
mod geometry;
mod ground_truth;
mod losses;
mod matching;
mod mining;
mod readback;

pub use anchors::{anchor_count, AnchorBoxes, AnchorGrid, AnchorScale, ANCHOR_RATIOS, ANCHOR_SCALES};
pub use config::{RefineDetLossConfig, LABEL_FIXED_WIDTH, PREDICTION_BOX_WIDTH};
pub use error::{RefineDetError, RefineDetResult};
pub use geometry::{
    corners_from_center_size, encode_offsets, iou, iou_with_anchors, pairwise_iou, CenterSizeBox,
    CornerBox,
};
pub use ground_truth::GroundTruthBox;
pub use losses::*;
pub use matching::{AnchorAssignment, AnchorLabel, AnchorMatcher};
pub use mining::HardNegativeMiner;

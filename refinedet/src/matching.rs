//! Anchor to ground-truth matching.
//!
//! Every anchor keeps the single ground truth it overlaps best; every ground truth claims at
//! least its best anchor as positive, plus every anchor above the IoU threshold.

use crate::{
    anchors::AnchorBoxes,
    geometry::{iou_with_anchors, CenterSizeBox},
    ground_truth::{first_argmax, GroundTruthBox},
};

/// Training role of an anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorLabel {
    /// Matched to a ground truth; contributes to every loss term.
    Positive,
    /// Background sample kept for the ODM classification loss.
    Negative,
    /// Excluded from the ODM classification loss.
    Ignored,
}

/// Per-anchor matching result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorAssignment {
    /// Index of the best-overlapping ground truth, if any.
    pub matched_gt: Option<usize>,
    /// IoU with `matched_gt`, `0.0` when unmatched.
    pub best_iou: f32,
    /// Box of `matched_gt`; all zeros when unmatched.
    pub target: CenterSizeBox,
    /// Class of `matched_gt`; background when unmatched.
    pub class_id: usize,
    pub label: AnchorLabel,
}

impl AnchorAssignment {
    pub const fn unmatched() -> Self {
        Self {
            matched_gt: None,
            best_iou: 0.0,
            target: CenterSizeBox::new([0.0, 0.0], [0.0, 0.0]),
            class_id: 0,
            label: AnchorLabel::Negative,
        }
    }

    pub fn is_positive(&self) -> bool {
        self.label == AnchorLabel::Positive
    }

    pub fn is_negative(&self) -> bool {
        self.label == AnchorLabel::Negative
    }

    fn assign(&mut self, gt_index: usize, gt: &GroundTruthBox, iou: f32) {
        self.matched_gt = Some(gt_index);
        self.best_iou = iou;
        self.target = gt.bbox;
        self.class_id = gt.class_id;
    }
}

/// SSD/RefineDet matching policy.
#[derive(Debug, Clone, Copy)]
pub struct AnchorMatcher {
    positive_iou_threshold: f32,
}

impl AnchorMatcher {
    pub const fn new(positive_iou_threshold: f32) -> Self {
        Self {
            positive_iou_threshold,
        }
    }

    /// Matches one batch item's ground truths against the anchor grid, computing the IoUs
    /// on the host.
    pub fn match_item(
        &self,
        anchors: &AnchorBoxes,
        ground_truths: &[GroundTruthBox],
    ) -> Vec<AnchorAssignment> {
        let ious: Vec<f32> = ground_truths
            .iter()
            .flat_map(|gt| iou_with_anchors(anchors, &gt.bbox))
            .collect();
        self.match_ious(anchors.len(), ground_truths, &ious)
    }

    /// Matches one batch item given its row-major `[ground_truths, num_anchors]` IoU matrix.
    ///
    /// Returned anchors are labelled `Positive` or `Negative`; negatives are only candidates
    /// until hard-negative mining prunes them.
    pub fn match_ious(
        &self,
        num_anchors: usize,
        ground_truths: &[GroundTruthBox],
        ious: &[f32],
    ) -> Vec<AnchorAssignment> {
        let mut assignments = vec![AnchorAssignment::unmatched(); num_anchors];
        let mut positive = vec![false; num_anchors];

        for (gt_index, (gt, ious)) in ground_truths
            .iter()
            .zip(ious.chunks_exact(num_anchors))
            .enumerate()
        {
            // Strictly greater: ties keep the earlier ground truth.
            for (assignment, &iou) in assignments.iter_mut().zip(ious) {
                if iou > assignment.best_iou {
                    assignment.assign(gt_index, gt, iou);
                }
            }

            let best = first_argmax(ious);
            if assignments[best].matched_gt.is_none() {
                assignments[best].assign(gt_index, gt, ious[best]);
            }
            positive[best] = true;

            for (flag, &iou) in positive.iter_mut().zip(ious) {
                if iou > self.positive_iou_threshold {
                    *flag = true;
                }
            }
        }

        for (assignment, is_positive) in assignments.iter_mut().zip(positive) {
            if is_positive {
                assignment.label = AnchorLabel::Positive;
            }
        }

        assignments
    }
}

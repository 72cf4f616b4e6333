//! State carried from the loss forward pass to its backward pass.

use burn::{
    prelude::*,
    tensor::{backend::Backend, Int, Tensor, TensorData},
};

use crate::{
    anchors::AnchorBoxes,
    geometry::{encode_offsets, CenterSizeBox},
    matching::{AnchorAssignment, AnchorLabel},
};

/// Matching and mining outcome for one batch item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemLossState {
    assignments: Vec<AnchorAssignment>,
    num_positive: usize,
    num_negative: usize,
}

impl ItemLossState {
    /// Wraps mined assignments; `num_negative` is the miner's surviving negative count.
    pub fn new(assignments: Vec<AnchorAssignment>, num_negative: usize) -> Self {
        let num_positive = assignments.iter().filter(|a| a.is_positive()).count();
        Self {
            assignments,
            num_positive,
            num_negative,
        }
    }

    pub fn assignments(&self) -> &[AnchorAssignment] {
        &self.assignments
    }

    pub fn num_positive(&self) -> usize {
        self.num_positive
    }

    pub fn num_negative(&self) -> usize {
        self.num_negative
    }

    /// Indices of positive anchors in ascending order.
    pub fn positive_indices(&self) -> Vec<usize> {
        self.assignments
            .iter()
            .enumerate()
            .filter_map(|(i, a)| a.is_positive().then_some(i))
            .collect()
    }

    /// Per-anchor flag: positive or surviving negative.
    pub fn pos_neg_mask(&self) -> Vec<bool> {
        self.assignments
            .iter()
            .map(|a| a.label != AnchorLabel::Ignored)
            .collect()
    }
}

/// Device-side targets assembled from every item's assignments.
#[derive(Debug, Clone)]
pub(crate) struct BatchTargets<B: Backend> {
    /// `[batch, anchors]`, `1` for positives.
    pub positive_mask: Tensor<B, 2>,
    /// `[batch, anchors]`, `1` for positives and surviving negatives.
    pub pos_neg_mask: Tensor<B, 2>,
    /// `[batch, anchors]` ARM objectness target.
    pub arm_labels: Tensor<B, 2, Int>,
    /// `[batch, anchors]` ODM class target; background for non-positives.
    pub odm_labels: Tensor<B, 2, Int>,
    /// `[batch, anchors, 4]` encoded matched boxes.
    pub offsets: Tensor<B, 3>,
    /// `[batch]`, `1 / num_positive` or `0` for items without positives.
    pub normalizer: Tensor<B, 1>,
}

impl<B: Backend> BatchTargets<B> {
    pub fn build(
        items: &[ItemLossState],
        anchors: &AnchorBoxes,
        arm_labels: Tensor<B, 2, Int>,
        epsilon: f32,
        device: &B::Device,
    ) -> Self {
        let batch = items.len();
        let num_anchors = anchors.len();

        let mut positive_mask = Vec::with_capacity(batch * num_anchors);
        let mut pos_neg_mask = Vec::with_capacity(batch * num_anchors);
        let mut odm_labels = Vec::with_capacity(batch * num_anchors);
        let mut offsets = Vec::with_capacity(batch * num_anchors * 4);
        let mut normalizer = Vec::with_capacity(batch);

        for item in items {
            let anchor_boxes = anchors.centers().iter().zip(anchors.sizes());
            for (assignment, (&center, &size)) in item.assignments.iter().zip(anchor_boxes) {
                let positive = assignment.is_positive();
                positive_mask.push(if positive { 1.0_f32 } else { 0.0 });
                pos_neg_mask.push(if assignment.label == AnchorLabel::Ignored { 0.0_f32 } else { 1.0 });
                odm_labels.push(if positive { assignment.class_id as i64 } else { 0 });
                offsets.extend(encode_offsets(
                    &assignment.target,
                    &CenterSizeBox::new(center, size),
                    epsilon,
                ));
            }
            normalizer.push(if item.num_positive > 0 {
                1.0 / item.num_positive as f32
            } else {
                0.0
            });
        }

        Self {
            positive_mask: Tensor::from_data(TensorData::new(positive_mask, [batch, num_anchors]), device),
            pos_neg_mask: Tensor::from_data(TensorData::new(pos_neg_mask, [batch, num_anchors]), device),
            arm_labels,
            odm_labels: Tensor::from_data(TensorData::new(odm_labels, [batch, num_anchors]), device),
            offsets: Tensor::from_data(TensorData::new(offsets, [batch, num_anchors, 4]), device),
            normalizer: Tensor::from_data(TensorData::new(normalizer, [batch]), device),
        }
    }
}

/// Everything the backward pass needs from a forward pass.
///
/// Produced by [`RefineDetLoss::compute`](super::RefineDetLoss::compute) and consumed by
/// [`RefineDetLoss::gradient`](super::RefineDetLoss::gradient).
#[derive(Debug, Clone)]
pub struct LossContext<B: Backend> {
    pub(crate) predictions: Tensor<B, 4>,
    pub(crate) items: Vec<ItemLossState>,
    pub(crate) targets: BatchTargets<B>,
}

impl<B: Backend> LossContext<B> {
    pub fn batch_size(&self) -> usize {
        self.items.len()
    }

    /// The prediction tensor the forward pass was evaluated on.
    pub fn predictions(&self) -> &Tensor<B, 4> {
        &self.predictions
    }

    pub fn items(&self) -> &[ItemLossState] {
        &self.items
    }

    /// Positive anchor indices of batch item `item`, ascending.
    ///
    /// # Panics
    ///
    /// Panics if `item` is out of range.
    pub fn positive_indices(&self, item: usize) -> Vec<usize> {
        self.items[item].positive_indices()
    }

    /// Positive-or-kept-negative flags of batch item `item`.
    ///
    /// # Panics
    ///
    /// Panics if `item` is out of range.
    pub fn pos_neg_mask(&self, item: usize) -> Vec<bool> {
        self.items[item].pos_neg_mask()
    }

    /// # Panics
    ///
    /// Panics if `item` is out of range.
    pub fn num_positive(&self, item: usize) -> usize {
        self.items[item].num_positive()
    }

    /// # Panics
    ///
    /// Panics if `item` is out of range.
    pub fn num_negative(&self, item: usize) -> usize {
        self.items[item].num_negative()
    }
}

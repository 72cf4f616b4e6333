//! Two-stage RefineDet loss.
//!
//! The forward pass matches anchors to ground truth, mines hard negatives and evaluates
//! four terms: ARM objectness, ARM box regression, ODM classification and ODM box
//! regression. Anchor/ground-truth IoUs for the whole batch come from one tensor op;
//! matching and mining then run on the host, one batch item per `rayon` task;
//! the loss terms and their gradients are batched tensor ops. The backward pass replays
//! the masks and targets cached by the forward pass and never re-matches.

use burn::{
    prelude::*,
    tensor::{activation::softmax, backend::Backend, cast::ToElement, Int, Tensor, TensorData},
};
use burn_extra_ops::split_fields;
use rayon::prelude::*;

use super::{
    context::{BatchTargets, ItemLossState, LossContext},
    cross_entropy::{SoftmaxCrossEntropyLoss, SoftmaxCrossEntropyLossConfig},
    smooth_l1::SmoothL1Loss,
};
use crate::{
    anchors::{AnchorBoxes, AnchorGrid},
    config::RefineDetLossConfig,
    error::{RefineDetError, RefineDetResult},
    geometry::{corners_from_center_size, pairwise_iou},
    ground_truth::GroundTruthBox,
    matching::{AnchorAssignment, AnchorMatcher},
    mining::HardNegativeMiner,
    readback::float_vec,
};

/// Batch loss and its four terms, each a single-element tensor averaged over the batch.
#[derive(Debug, Clone)]
pub struct RefineDetLossOutput<B: Backend> {
    pub loss: Tensor<B, 1>,
    pub arm_conf_loss: Tensor<B, 1>,
    pub arm_loc_loss: Tensor<B, 1>,
    pub odm_conf_loss: Tensor<B, 1>,
    pub odm_loc_loss: Tensor<B, 1>,
}

/// Forward/backward phase of a [`RefineDetLoss`].
#[derive(Debug, Clone)]
enum LossState<B: Backend> {
    Idle,
    Forward(LossContext<B>),
}

impl<B: Backend> Default for LossState<B> {
    fn default() -> Self {
        Self::Idle
    }
}

/// Prediction tensor cut into its six fields, each `[batch, anchors, width]`.
struct PredictionFields<B: Backend> {
    arm_yx: Tensor<B, 3>,
    arm_hw: Tensor<B, 3>,
    arm_conf: Tensor<B, 3>,
    odm_yx: Tensor<B, 3>,
    odm_hw: Tensor<B, 3>,
    odm_conf: Tensor<B, 3>,
}

impl<B: Backend> PredictionFields<B> {
    fn split(predictions: Tensor<B, 4>, config: &RefineDetLossConfig) -> Self {
        let [arm_yx, arm_hw, arm_conf, odm_yx, odm_hw, odm_conf] =
            split_fields(predictions.squeeze::<3>(1), config.prediction_field_widths(), 2);

        Self {
            arm_yx,
            arm_hw,
            arm_conf,
            odm_yx,
            odm_hw,
            odm_conf,
        }
    }

    fn arm_box(&self) -> Tensor<B, 3> {
        Tensor::cat(vec![self.arm_yx.clone(), self.arm_hw.clone()], 2)
    }

    fn odm_box(&self) -> Tensor<B, 3> {
        Tensor::cat(vec![self.odm_yx.clone(), self.odm_hw.clone()], 2)
    }
}

/// RefineDet ARM + ODM loss with hand-derived gradient.
#[derive(Debug)]
pub struct RefineDetLoss<B: Backend> {
    config: RefineDetLossConfig,
    anchors: AnchorBoxes,
    matcher: AnchorMatcher,
    miner: HardNegativeMiner,
    cross_entropy: SoftmaxCrossEntropyLoss<B>,
    smooth_l1: SmoothL1Loss<B>,
    state: LossState<B>,
}

impl RefineDetLossConfig {
    /// Validates the configuration and builds the loss with its anchor grid.
    ///
    /// # Errors
    ///
    /// Returns `Err(RefineDetError::InvalidConfiguration)` if validation fails.
    pub fn init<B: Backend>(&self) -> RefineDetResult<RefineDetLoss<B>> {
        self.validate()?;

        Ok(RefineDetLoss {
            config: self.clone(),
            anchors: AnchorGrid::generate(),
            matcher: AnchorMatcher::new(self.positive_iou_threshold),
            miner: HardNegativeMiner::new(self.background_filter_threshold, self.negative_ratio),
            cross_entropy: SoftmaxCrossEntropyLossConfig::new()
                .with_epsilon(self.epsilon)
                .init(),
            smooth_l1: SmoothL1Loss::new(),
            state: LossState::Idle,
        })
    }
}

impl<B: Backend> RefineDetLoss<B> {
    /// Builds the loss from host-framework layer properties.
    ///
    /// # Errors
    ///
    /// Returns `Err(RefineDetError::UnknownProperties)` for any non-empty property list.
    pub fn from_properties<S: AsRef<str>>(properties: &[S]) -> RefineDetResult<Self> {
        RefineDetLossConfig::from_properties(properties)?.init()
    }

    pub fn config(&self) -> &RefineDetLossConfig {
        &self.config
    }

    pub fn anchors(&self) -> &AnchorBoxes {
        &self.anchors
    }

    /// Forward context cached for the next [`RefineDetLoss::backward`], if any.
    pub fn state(&self) -> Option<&LossContext<B>> {
        match &self.state {
            LossState::Idle => None,
            LossState::Forward(context) => Some(context),
        }
    }

    /// Evaluates the loss and caches the context for [`RefineDetLoss::backward`],
    /// replacing any context left by an earlier call.
    ///
    /// # Errors
    ///
    /// See [`RefineDetLoss::compute`]. On error the previous context is discarded.
    pub fn forward(
        &mut self,
        predictions: Tensor<B, 4>,
        labels: Tensor<B, 4>,
    ) -> RefineDetResult<RefineDetLossOutput<B>> {
        self.state = LossState::Idle;
        let (output, context) = self.compute(predictions, labels)?;
        self.state = LossState::Forward(context);
        Ok(output)
    }

    /// Gradient for the last [`RefineDetLoss::forward`], which it consumes.
    ///
    /// # Errors
    ///
    /// Returns `Err(RefineDetError::MissingForwardState)` when no forward context is
    /// pending.
    pub fn backward(&mut self) -> RefineDetResult<Tensor<B, 4>> {
        match std::mem::take(&mut self.state) {
            LossState::Forward(context) => Ok(self.gradient(context)),
            LossState::Idle => Err(RefineDetError::MissingForwardState),
        }
    }

    /// Evaluates the loss without touching the cached state.
    ///
    /// # Arguments
    /// * `predictions` - `[batch, 1, anchors, 10 + num_classes]`: ARM yx, ARM hw, ARM conf,
    ///   ODM yx, ODM hw, ODM conf
    /// * `labels` - `[batch, 1, max_gt_boxes, 5 + num_classes]`: presence, yx1, yx2, one-hot
    ///
    /// # Returns
    /// The batch-mean loss terms and the context [`RefineDetLoss::gradient`] consumes.
    ///
    /// # Errors
    ///
    /// Returns `Err(RefineDetError::InvalidTensorShape)` or
    /// `Err(RefineDetError::BatchSizeMismatch)` for malformed inputs and
    /// `Err(RefineDetError::TensorConversion)` if host readback fails.
    pub fn compute(
        &self,
        predictions: Tensor<B, 4>,
        labels: Tensor<B, 4>,
    ) -> RefineDetResult<(RefineDetLossOutput<B>, LossContext<B>)> {
        let dims = predictions.dims();
        self.config.check_prediction_dims(dims, self.anchors.len())?;
        let label_dims = labels.dims();
        self.config.check_label_dims(label_dims)?;
        if dims[0] != label_dims[0] {
            return Err(RefineDetError::BatchSizeMismatch {
                predictions: dims[0],
                labels: label_dims[0],
            });
        }

        let [batch, _, num_anchors, _] = dims;
        let device = predictions.device();
        let fields = PredictionFields::split(predictions.clone(), &self.config);
        let ground_truths = GroundTruthBox::parse_batch(labels, &self.config)?;

        let ious = self.ground_truth_ious(&ground_truths, &device)?;
        let matcher = self.matcher;
        let anchors = &self.anchors;
        let matched: Vec<Vec<AnchorAssignment>> = ground_truths
            .par_iter()
            .zip(ious.par_iter())
            .map(|(gts, ious)| matcher.match_ious(num_anchors, gts, ious))
            .collect();

        let arm_labels = positive_labels::<B>(&matched, num_anchors, &device);
        let arm_losses = self
            .cross_entropy
            .per_anchor(fields.arm_conf.clone(), arm_labels.clone())?;
        let background = float_vec(softmax(fields.arm_conf.clone(), 2).narrow(2, 0, 1))?;

        let miner = self.miner;
        let items: Vec<ItemLossState> = matched
            .into_par_iter()
            .zip(arm_losses.into_par_iter())
            .zip(background.par_chunks(num_anchors))
            .map(|((mut assignments, losses), probs)| {
                let num_negative = miner.mine(&mut assignments, probs, &losses);
                ItemLossState::new(assignments, num_negative)
            })
            .collect();

        for (index, item) in items.iter().enumerate() {
            tracing::trace!(
                item = index,
                batch,
                positive = item.num_positive(),
                negative = item.num_negative(),
                "anchors mined"
            );
        }

        let targets = BatchTargets::build(&items, anchors, arm_labels, self.config.epsilon, &device);
        let output = self.loss_terms(fields, &targets);

        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                arm_conf = output.arm_conf_loss.clone().into_scalar().to_f32(),
                arm_loc = output.arm_loc_loss.clone().into_scalar().to_f32(),
                odm_conf = output.odm_conf_loss.clone().into_scalar().to_f32(),
                odm_loc = output.odm_loc_loss.clone().into_scalar().to_f32(),
                "refinedet loss terms"
            );
        }

        Ok((
            output,
            LossContext {
                predictions,
                items,
                targets,
            },
        ))
    }

    /// Gradient of the loss with respect to the predictions of `context`, shaped like them.
    ///
    /// Each item's gradient is divided by its positive count only, never by the batch size,
    /// so it is `batch_size` times the derivative of the batch-mean loss. Items without
    /// positives get a zero gradient.
    pub fn gradient(&self, context: LossContext<B>) -> Tensor<B, 4> {
        let LossContext {
            predictions,
            targets,
            ..
        } = context;
        let fields = PredictionFields::split(predictions, &self.config);
        let (arm_box, odm_box) = (fields.arm_box(), fields.odm_box());
        let normalizer = targets.normalizer.clone();
        let arm_conf_normalizer = normalizer.clone().div_scalar(self.config.arm_conf_loss_divider);

        let arm_conf = self
            .cross_entropy
            .backward(fields.arm_conf, targets.arm_labels, None);
        let (arm_yx, arm_hw) = self.smooth_l1.backward(
            arm_box,
            targets.offsets.clone(),
            targets.positive_mask.clone(),
        );
        let (odm_yx, odm_hw) =
            self.smooth_l1
                .backward(odm_box, targets.offsets, targets.positive_mask);
        let odm_conf = self.cross_entropy.backward(
            fields.odm_conf,
            targets.odm_labels,
            Some(targets.pos_neg_mask),
        );

        Tensor::cat(
            vec![
                scale_items(arm_yx, normalizer.clone()),
                scale_items(arm_hw, normalizer.clone()),
                scale_items(arm_conf, arm_conf_normalizer),
                scale_items(odm_yx, normalizer.clone()),
                scale_items(odm_hw, normalizer.clone()),
                scale_items(odm_conf, normalizer),
            ],
            2,
        )
        .unsqueeze_dim(1)
    }

    /// IoU of every ground truth against every anchor, evaluated for the whole batch in
    /// one tensor op and split back into row-major `[gts, anchors]` blocks per item.
    fn ground_truth_ious(
        &self,
        ground_truths: &[Vec<GroundTruthBox>],
        device: &B::Device,
    ) -> RefineDetResult<Vec<Vec<f32>>> {
        let corners: Vec<f32> = ground_truths
            .iter()
            .flatten()
            .flat_map(|gt| {
                let c = gt.bbox.to_corners();
                [c.min[0], c.min[1], c.max[0], c.max[1]]
            })
            .collect();
        let total = corners.len() / 4;
        if total == 0 {
            return Ok(vec![Vec::new(); ground_truths.len()]);
        }

        let (centers, sizes) = self.anchors.to_tensors::<B>(device);
        let boxes = Tensor::from_data(TensorData::new(corners, [total, 4]), device);
        let flat = float_vec(pairwise_iou(boxes, corners_from_center_size(centers, sizes)))?;

        let num_anchors = self.anchors.len();
        let mut rest = flat.as_slice();
        Ok(ground_truths
            .iter()
            .map(|gts| {
                let (item, tail) = rest.split_at(gts.len() * num_anchors);
                rest = tail;
                item.to_vec()
            })
            .collect())
    }

    fn loss_terms(
        &self,
        fields: PredictionFields<B>,
        targets: &BatchTargets<B>,
    ) -> RefineDetLossOutput<B> {
        let (arm_box, odm_box) = (fields.arm_box(), fields.odm_box());
        let normalizer = targets.normalizer.clone();
        let arm_conf_normalizer = normalizer.clone().div_scalar(self.config.arm_conf_loss_divider);

        let arm_conf_loss = (self.cross_entropy.forward(
            fields.arm_conf,
            targets.arm_labels.clone(),
            None,
        ) * arm_conf_normalizer)
            .mean();
        let arm_loc_loss = (self.smooth_l1.forward(
            arm_box,
            targets.offsets.clone(),
            targets.positive_mask.clone(),
        ) * normalizer.clone())
        .mean();
        let odm_conf_loss = (self.cross_entropy.forward(
            fields.odm_conf,
            targets.odm_labels.clone(),
            Some(targets.pos_neg_mask.clone()),
        ) * normalizer.clone())
        .mean();
        let odm_loc_loss = (self.smooth_l1.forward(
            odm_box,
            targets.offsets.clone(),
            targets.positive_mask.clone(),
        ) * normalizer)
            .mean();

        RefineDetLossOutput {
            loss: arm_conf_loss.clone()
                + arm_loc_loss.clone()
                + odm_conf_loss.clone()
                + odm_loc_loss.clone(),
            arm_conf_loss,
            arm_loc_loss,
            odm_conf_loss,
            odm_loc_loss,
        }
    }
}

/// ARM objectness labels: `1` for positive anchors, background `0` elsewhere.
fn positive_labels<B: Backend>(
    items: &[Vec<AnchorAssignment>],
    num_anchors: usize,
    device: &B::Device,
) -> Tensor<B, 2, Int> {
    let labels: Vec<i64> = items
        .iter()
        .flatten()
        .map(|a| i64::from(a.is_positive()))
        .collect();

    Tensor::from_data(TensorData::new(labels, [items.len(), num_anchors]), device)
}

/// Multiplies every anchor row of item `b` by `factors[b]`.
fn scale_items<B: Backend>(grad: Tensor<B, 3>, factors: Tensor<B, 1>) -> Tensor<B, 3> {
    let [batch, anchors, width] = grad.dims();
    grad * factors.reshape([batch, 1, 1]).expand([batch, anchors, width])
}

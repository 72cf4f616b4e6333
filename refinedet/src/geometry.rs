//! Box geometry: center/size and corner forms, IoU, and the regression target encoding.

use burn::prelude::*;
use burn_extra_ops::split_fields;

use crate::anchors::AnchorBoxes;

/// A box in center/size form: `center = (y, x)`, `size = (h, w)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CenterSizeBox {
    pub center: [f32; 2],
    pub size: [f32; 2],
}

/// A box in corner form: `min = (y1, x1)`, `max = (y2, x2)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CornerBox {
    pub min: [f32; 2],
    pub max: [f32; 2],
}

impl CenterSizeBox {
    pub const fn new(center: [f32; 2], size: [f32; 2]) -> Self {
        Self { center, size }
    }

    pub fn to_corners(self) -> CornerBox {
        let half = [self.size[0] / 2.0, self.size[1] / 2.0];
        CornerBox {
            min: [self.center[0] - half[0], self.center[1] - half[1]],
            max: [self.center[0] + half[0], self.center[1] + half[1]],
        }
    }

    pub fn area(&self) -> f32 {
        self.size[0] * self.size[1]
    }
}

impl CornerBox {
    pub const fn new(min: [f32; 2], max: [f32; 2]) -> Self {
        Self { min, max }
    }

    pub fn to_center_size(self) -> CenterSizeBox {
        CenterSizeBox {
            center: [
                (self.min[0] + self.max[0]) / 2.0,
                (self.min[1] + self.max[1]) / 2.0,
            ],
            size: [self.max[0] - self.min[0], self.max[1] - self.min[1]],
        }
    }
}

/// Intersection over union of two boxes. An empty or negative union yields `0.0`.
pub fn iou(a: &CenterSizeBox, b: &CenterSizeBox) -> f32 {
    let ca = a.to_corners();
    let cb = b.to_corners();

    let inter_h = (ca.max[0].min(cb.max[0]) - ca.min[0].max(cb.min[0])).max(0.0);
    let inter_w = (ca.max[1].min(cb.max[1]) - ca.min[1].max(cb.min[1])).max(0.0);
    let intersection = inter_h * inter_w;
    let union = a.area() + b.area() - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// IoU of `target` against every anchor of the grid.
pub fn iou_with_anchors(anchors: &AnchorBoxes, target: &CenterSizeBox) -> Vec<f32> {
    anchors
        .centers()
        .iter()
        .zip(anchors.sizes())
        .map(|(&center, &size)| iou(&CenterSizeBox::new(center, size), target))
        .collect()
}

/// Corner form `[N, 4]` (`y1, x1, y2, x2`) of `[N, 2]` center and size tensors.
pub fn corners_from_center_size<B: Backend>(centers: Tensor<B, 2>, sizes: Tensor<B, 2>) -> Tensor<B, 2> {
    let half = sizes.div_scalar(2.0);
    Tensor::cat(vec![centers.clone() - half.clone(), centers + half], 1)
}

/// IoU matrix `[N, M]` between `boxes` `[N, 4]` and `others` `[M, 4]`, both in corner
/// form `(y1, x1, y2, x2)`. Pairs with an empty or negative union get `0.0`.
pub fn pairwise_iou<B: Backend>(boxes: Tensor<B, 2>, others: Tensor<B, 2>) -> Tensor<B, 2> {
    let [n, _] = boxes.dims();
    let [m, _] = others.dims();
    let [box_min, box_max] = split_fields(boxes, [2, 2], 1);
    let [other_min, other_max] = split_fields(others, [2, 2], 1);

    let box_area = corner_area(box_min.clone(), box_max.clone());
    let other_area = corner_area(other_min.clone(), other_max.clone());

    let rows = |t: Tensor<B, 2>| t.reshape([n, 1, 2]).expand([n, m, 2]);
    let cols = |t: Tensor<B, 2>| t.reshape([1, m, 2]).expand([n, m, 2]);

    let extent = (rows(box_max).min_pair(cols(other_max))
        - rows(box_min).max_pair(cols(other_min)))
    .clamp_min(0.0);
    let [height, width] = split_fields(extent, [1, 1], 2);
    let intersection = (height * width).reshape([n, m]);

    let union = box_area.expand([n, m]) + other_area.reshape([1, m]).expand([n, m])
        - intersection.clone();

    (intersection / union.clone()).mask_fill(union.lower_equal_elem(0.0), 0.0)
}

/// Area `[N, 1]` of corner boxes given their `[N, 2]` min and max corners.
fn corner_area<B: Backend>(min: Tensor<B, 2>, max: Tensor<B, 2>) -> Tensor<B, 2> {
    let [height, width] = split_fields(max - min, [1, 1], 1);
    height * width
}

/// Regression target of `target` relative to `anchor`:
/// `((c - c_a) / s_a, log(s / s_a + epsilon))` for each of the y/x and h/w axes.
pub fn encode_offsets(target: &CenterSizeBox, anchor: &CenterSizeBox, epsilon: f32) -> [f32; 4] {
    [
        (target.center[0] - anchor.center[0]) / anchor.size[0],
        (target.center[1] - anchor.center[1]) / anchor.size[1],
        (target.size[0] / anchor.size[0] + epsilon).ln(),
        (target.size[1] / anchor.size[1] + epsilon).ln(),
    ]
}

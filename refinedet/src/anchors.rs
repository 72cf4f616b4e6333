//! Multi-scale anchor grid.
//!
//! The grid depends only on fixed constants, so it is generated once and shared read-only
//! by every batch item and by both the forward and the backward pass.

use burn::prelude::*;

/// One feature-map scale of the anchor grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorScale {
    /// Cells per side of the square feature map.
    pub feature_map_size: usize,
    /// Pixel distance between neighbouring cell centers.
    pub stride: f32,
    /// Side length of the ratio-1 anchor.
    pub base_size: f32,
}

/// Feature-map scales, finest grid first.
pub const ANCHOR_SCALES: [AnchorScale; 4] = [
    AnchorScale {
        feature_map_size: 28,
        stride: 8.0,
        base_size: 32.0,
    },
    AnchorScale {
        feature_map_size: 14,
        stride: 16.0,
        base_size: 64.0,
    },
    AnchorScale {
        feature_map_size: 4,
        stride: 32.0,
        base_size: 128.0,
    },
    AnchorScale {
        feature_map_size: 2,
        stride: 64.0,
        base_size: 256.0,
    },
];

/// Height/width aspect ratios emitted at every cell.
pub const ANCHOR_RATIOS: [f32; 3] = [0.5, 1.0, 2.0];

/// Total number of anchors across all scales and ratios.
pub const fn anchor_count() -> usize {
    let mut cells = 0;
    let mut i = 0;
    while i < ANCHOR_SCALES.len() {
        cells += ANCHOR_SCALES[i].feature_map_size * ANCHOR_SCALES[i].feature_map_size;
        i += 1;
    }
    cells * ANCHOR_RATIOS.len()
}

/// The anchor set in center/size form, indexed by `(scale, row, col, ratio)` in that
/// nesting order.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorBoxes {
    centers: Vec<[f32; 2]>,
    sizes: Vec<[f32; 2]>,
}

impl AnchorBoxes {
    /// Number of anchors.
    pub fn len(&self) -> usize {
        self.centers.len()
    }

    /// Whether the grid is empty.
    pub fn is_empty(&self) -> bool {
        self.centers.is_empty()
    }

    /// Anchor centers as `(y, x)`.
    pub fn centers(&self) -> &[[f32; 2]] {
        &self.centers
    }

    /// Anchor sizes as `(h, w)`.
    pub fn sizes(&self) -> &[[f32; 2]] {
        &self.sizes
    }

    /// Uploads the grid as `[A, 2]` center and size tensors.
    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let n = self.len();
        let centers: Vec<f32> = self.centers.iter().flatten().copied().collect();
        let sizes: Vec<f32> = self.sizes.iter().flatten().copied().collect();

        (
            Tensor::from_data(TensorData::new(centers, [n, 2]), device),
            Tensor::from_data(TensorData::new(sizes, [n, 2]), device),
        )
    }
}

/// Generator for the fixed RefineDet anchor grid.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnchorGrid;

impl AnchorGrid {
    /// Generates every anchor of every scale, finest scale first.
    ///
    /// Within a cell all ratios share the center `((row + 0.5) * stride, (col + 0.5) * stride)`
    /// and have size `(base * sqrt(r), base / sqrt(r))`.
    pub fn generate() -> AnchorBoxes {
        let total = anchor_count();
        let mut centers = Vec::with_capacity(total);
        let mut sizes = Vec::with_capacity(total);

        for scale in ANCHOR_SCALES {
            let priors = ANCHOR_RATIOS.map(|ratio| {
                let root = ratio.sqrt();
                [scale.base_size * root, scale.base_size / root]
            });

            for row in 0..scale.feature_map_size {
                for col in 0..scale.feature_map_size {
                    let center = [
                        (row as f32 + 0.5) * scale.stride,
                        (col as f32 + 0.5) * scale.stride,
                    ];
                    for prior in priors {
                        centers.push(center);
                        sizes.push(prior);
                    }
                }
            }
        }

        AnchorBoxes { centers, sizes }
    }
}

//! Hard-negative mining.
//!
//! Negatives the ARM already rejects with high confidence are dropped first. If the rest
//! still outnumber `negative_ratio` times the positives, the lowest-loss (easiest)
//! negatives are dropped until the cap holds, leaving the hardest ones.

use crate::matching::{AnchorAssignment, AnchorLabel};

/// Negative selection for the ODM classification loss.
#[derive(Debug, Clone, Copy)]
pub struct HardNegativeMiner {
    background_filter_threshold: f32,
    negative_ratio: usize,
}

impl HardNegativeMiner {
    pub const fn new(background_filter_threshold: f32, negative_ratio: usize) -> Self {
        Self {
            background_filter_threshold,
            negative_ratio,
        }
    }

    /// Demotes negatives of one batch item to `Ignored` and returns the surviving negative
    /// count. Positives are never touched.
    ///
    /// # Arguments
    /// * `assignments` - Matcher output; every non-positive anchor starts as `Negative`
    /// * `background_probs` - ARM softmax probability of the background class per anchor
    /// * `arm_losses` - `(anchor, loss)` pairs of the per-anchor ARM cross-entropy
    pub fn mine(
        &self,
        assignments: &mut [AnchorAssignment],
        background_probs: &[f32],
        arm_losses: &[(usize, f32)],
    ) -> usize {
        let num_positive = assignments.iter().filter(|a| a.is_positive()).count();
        let mut num_negative = assignments.len() - num_positive;

        for (assignment, &prob) in assignments.iter_mut().zip(background_probs) {
            if assignment.is_negative() && prob > self.background_filter_threshold {
                assignment.label = AnchorLabel::Ignored;
                num_negative -= 1;
            }
        }

        let cap = self.negative_ratio * num_positive;
        if num_negative > cap {
            let mut ascending = arm_losses.to_vec();
            ascending.sort_by(|a, b| a.1.total_cmp(&b.1));

            for (anchor, _) in ascending {
                if num_negative <= cap {
                    break;
                }
                if assignments[anchor].is_negative() {
                    assignments[anchor].label = AnchorLabel::Ignored;
                    num_negative -= 1;
                }
            }
        }

        num_negative
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignments(len: usize, positives: &[usize]) -> Vec<AnchorAssignment> {
        let mut out = vec![AnchorAssignment::unmatched(); len];
        for &i in positives {
            out[i].label = AnchorLabel::Positive;
            out[i].matched_gt = Some(0);
        }
        out
    }

    fn losses(values: &[f32]) -> Vec<(usize, f32)> {
        values.iter().copied().enumerate().collect()
    }

    #[test]
    fn test_negative_cap_is_enforced() {
        let mut anchors = assignments(20, &[0, 1]);
        let loss: Vec<f32> = (0..20).map(|i| i as f32).collect();

        let kept = HardNegativeMiner::new(0.99, 3).mine(&mut anchors, &[0.5; 20], &losses(&loss));

        assert_eq!(kept, 6);
        assert_eq!(anchors.iter().filter(|a| a.is_negative()).count(), 6);
    }

    #[test]
    fn test_hardest_negatives_survive() {
        let mut anchors = assignments(20, &[0, 1]);
        let loss: Vec<f32> = (0..20).map(|i| i as f32).collect();

        HardNegativeMiner::new(0.99, 3).mine(&mut anchors, &[0.5; 20], &losses(&loss));

        let survivors: Vec<usize> = (0..20).filter(|&i| anchors[i].is_negative()).collect();
        assert_eq!(survivors, vec![14, 15, 16, 17, 18, 19]);
    }

    #[test]
    fn test_positives_are_never_mined() {
        let mut anchors = assignments(12, &[3, 7]);
        // Positives carry the lowest losses and confident background scores.
        let mut loss = vec![5.0; 12];
        loss[3] = 0.0;
        loss[7] = 0.0;
        let mut probs = vec![0.5; 12];
        probs[3] = 0.999;
        probs[7] = 0.999;

        HardNegativeMiner::new(0.99, 1).mine(&mut anchors, &probs, &losses(&loss));

        assert!(anchors[3].is_positive());
        assert!(anchors[7].is_positive());
    }

    #[test]
    fn test_confident_background_is_filtered() {
        let mut anchors = assignments(8, &[0]);
        let mut probs = vec![0.5; 8];
        probs[2] = 0.995;
        probs[5] = 0.999;

        let kept = HardNegativeMiner::new(0.99, 10).mine(&mut anchors, &probs, &losses(&[1.0; 8]));

        assert_eq!(kept, 5);
        assert_eq!(anchors[2].label, AnchorLabel::Ignored);
        assert_eq!(anchors[5].label, AnchorLabel::Ignored);
        assert!(anchors[4].is_negative());
    }

    #[test]
    fn test_under_cap_keeps_all_negatives() {
        let mut anchors = assignments(4, &[0, 1]);

        let kept = HardNegativeMiner::new(0.99, 3).mine(&mut anchors, &[0.5; 4], &losses(&[0.1; 4]));

        assert_eq!(kept, 2);
        assert!(anchors[2].is_negative() && anchors[3].is_negative());
    }

    #[test]
    fn test_no_positives_drops_every_negative() {
        let mut anchors = assignments(6, &[]);

        let kept = HardNegativeMiner::new(0.99, 3).mine(&mut anchors, &[0.5; 6], &losses(&[1.0; 6]));

        assert_eq!(kept, 0);
        assert!(anchors.iter().all(|a| a.label == AnchorLabel::Ignored));
    }
}

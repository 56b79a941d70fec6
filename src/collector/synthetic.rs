// src/collector/synthetic.rs
//
// Synthetic oracle: labels comparisons by true cumulative environment
// reward. Synchronous, never blocks. Ties inside an epsilon band are Equal;
// an optional noise probability flips the decisive label, modeling an
// imperfect rater.

use std::sync::Arc;

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::segment::Segment;

use super::{Comparison, ComparisonCollector, ComparisonPool, Label};

pub struct SyntheticComparisonCollector {
    pool: ComparisonPool,
    /// |total_left - total_right| at or below this is a tie.
    epsilon: f64,
    /// Probability of flipping a decisive label.
    noise: f64,
    rng: ChaCha8Rng,
}

impl SyntheticComparisonCollector {
    pub fn new(seed: u64) -> Self {
        use rand::SeedableRng;
        Self {
            pool: ComparisonPool::new(ChaCha8Rng::seed_from_u64(seed)),
            epsilon: 1e-9,
            noise: 0.0,
            rng: ChaCha8Rng::seed_from_u64(seed.wrapping_add(1)),
        }
    }

    pub fn with_tie_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_label_noise(mut self, noise: f64) -> Self {
        self.noise = noise.clamp(0.0, 1.0);
        self
    }

    fn oracle_label(&mut self, left: &Segment, right: &Segment) -> Label {
        let diff = left.total_reward() - right.total_reward();
        let mut label = if diff.abs() <= self.epsilon {
            Label::Equal
        } else if diff > 0.0 {
            Label::Left
        } else {
            Label::Right
        };
        if self.noise > 0.0 && self.rng.gen::<f64>() < self.noise {
            label = match label {
                Label::Left => Label::Right,
                Label::Right => Label::Left,
                other => other,
            };
        }
        label
    }
}

impl ComparisonCollector for SyntheticComparisonCollector {
    fn add_segment(&mut self, segment: Segment) -> u64 {
        self.pool.add_segment(segment)
    }

    fn invent_comparison(&mut self) -> Option<u64> {
        self.pool.invent_comparison()
    }

    fn label_unlabeled_comparisons(&mut self, goal: usize, verbose: bool) -> usize {
        let mut newly = 0;
        // Creation order; stop as soon as the total labeled count hits goal.
        for id in self.pool.unlabeled_ids() {
            if self.pool.labeled_count() >= goal {
                break;
            }
            let Some(c) = self.pool.comparison(id) else {
                continue;
            };
            let (Some(left), Some(right)) =
                (self.pool.segment(c.left), self.pool.segment(c.right))
            else {
                continue;
            };
            let label = self.oracle_label(&left, &right);
            if self.pool.apply_label(id, label) {
                newly += 1;
            }
            if verbose && newly % 100 == 0 && newly > 0 {
                debug!(
                    labeled = self.pool.labeled_count(),
                    goal, "synthetic labeling progress"
                );
            }
        }
        newly
    }

    fn clear_old_data(&mut self) {
        self.pool.clear();
    }

    fn labeled_ratio(&self) -> f64 {
        self.pool.labeled_ratio()
    }

    fn segment(&self, id: u64) -> Option<Arc<Segment>> {
        self.pool.segment(id)
    }

    fn labeled_comparison_ids(&self) -> Vec<u64> {
        self.pool.labeled_ids()
    }

    fn comparison(&self, id: u64) -> Option<Comparison> {
        self.pool.comparison(id)
    }

    fn segment_count(&self) -> usize {
        self.pool.segment_count()
    }

    fn comparison_count(&self) -> usize {
        self.pool.comparison_count()
    }

    fn unlabeled_count(&self) -> usize {
        self.pool.unlabeled_ids().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{Segment, SegmentStep};

    fn seg(total: f64, len: usize) -> Segment {
        Segment::new(
            vec![
                SegmentStep {
                    observation: vec![0.0],
                    action: vec![0.0],
                    reward: total / len as f64,
                };
                len
            ],
            "pointmass-v0",
            0,
            0,
        )
    }

    #[test]
    fn test_labels_follow_true_reward_ordering() {
        // Higher-total segment must win every time with zero noise.
        for trial in 0..100 {
            let mut c = SyntheticComparisonCollector::new(trial);
            let hi = c.add_segment(seg(10.0, 4));
            let lo = c.add_segment(seg(-5.0, 4));
            let id = c.invent_comparison().unwrap();
            assert_eq!(c.label_unlabeled_comparisons(1, false), 1);
            let cmp = c.comparison(id).unwrap();
            let expected = if cmp.left == hi {
                Label::Left
            } else {
                assert_eq!(cmp.left, lo);
                Label::Right
            };
            assert_eq!(cmp.label, expected);
        }
    }

    #[test]
    fn test_ties_within_epsilon_are_equal() {
        let mut c = SyntheticComparisonCollector::new(3).with_tie_epsilon(0.5);
        c.add_segment(seg(1.0, 2));
        c.add_segment(seg(1.3, 2));
        let id = c.invent_comparison().unwrap();
        c.label_unlabeled_comparisons(1, false);
        assert_eq!(c.comparison(id).unwrap().label, Label::Equal);
    }

    #[test]
    fn test_goal_caps_newly_labeled() {
        let mut c = SyntheticComparisonCollector::new(7);
        for i in 0..10 {
            c.add_segment(seg(i as f64, 2));
        }
        for _ in 0..8 {
            c.invent_comparison().unwrap();
        }
        assert_eq!(c.label_unlabeled_comparisons(3, false), 3);
        assert_eq!(c.unlabeled_count(), 5);
        // Goal counts total labeled, not newly labeled.
        assert_eq!(c.label_unlabeled_comparisons(5, false), 2);
        // Exhausted before an unreachable goal: label what exists, stop.
        assert_eq!(c.label_unlabeled_comparisons(100, false), 3);
        assert_eq!(c.unlabeled_count(), 0);
    }

    #[test]
    fn test_never_relabels() {
        let mut c = SyntheticComparisonCollector::new(9);
        c.add_segment(seg(4.0, 2));
        c.add_segment(seg(2.0, 2));
        let id = c.invent_comparison().unwrap();
        c.label_unlabeled_comparisons(1, false);
        let first = c.comparison(id).unwrap().label;
        assert_eq!(c.label_unlabeled_comparisons(10, false), 0);
        assert_eq!(c.comparison(id).unwrap().label, first);
    }

    #[test]
    fn test_clear_old_data_evicts_everything() {
        let mut c = SyntheticComparisonCollector::new(2);
        c.add_segment(seg(1.0, 2));
        c.add_segment(seg(2.0, 2));
        c.invent_comparison().unwrap();
        c.clear_old_data();
        assert_eq!(c.segment_count(), 0);
        assert_eq!(c.comparison_count(), 0);
        assert_eq!(c.labeled_ratio(), 1.0);
    }
}

// src/collector/mod.rs
//
// Comparisons over segment pairs, and the collector that owns them.
//
// - Label: terminal outcome of one comparison (or Unlabeled, forever valid)
// - Comparison: two segment ids + label + creation time
// - ComparisonPool: segment/comparison storage shared by both collector
//   variants (synthetic oracle, human channel)
// - ComparisonCollector: the trait the predictor trains against
//
// A comparison is labeled at most once. Unlabeled comparisons are excluded
// from training batches but are never an error.

pub mod human;
pub mod synthetic;

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::segment::{now_ms, Segment};

pub use human::{
    labeling_channel, ComparisonRequest, ComparisonResponse, HumanComparisonCollector,
    LabelingFrontend,
};
pub use synthetic::SyntheticComparisonCollector;

/// Outcome of comparing two segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    /// Left segment preferred.
    Left,
    /// Right segment preferred.
    Right,
    /// Segments judged equally good.
    Equal,
    /// No judgment yet (possibly forever).
    Unlabeled,
}

impl Label {
    /// Target distribution (left, right) for the preference loss.
    pub fn target(&self) -> Option<(f64, f64)> {
        match self {
            Label::Left => Some((1.0, 0.0)),
            Label::Right => Some((0.0, 1.0)),
            Label::Equal => Some((0.5, 0.5)),
            Label::Unlabeled => None,
        }
    }
}

/// A pair of segments awaiting (or holding) a preference judgment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comparison {
    pub id: u64,
    pub left: u64,
    pub right: u64,
    pub label: Label,
    pub created_at_ms: u64,
}

/// The collector interface the predictor trains against.
///
/// `label_unlabeled_comparisons` labels until the total labeled count reaches
/// `goal` or no unlabeled work remains; it returns how many were newly
/// labeled this call (never more than the shortfall).
pub trait ComparisonCollector: Send {
    /// Take ownership of a segment; returns its id.
    fn add_segment(&mut self, segment: Segment) -> u64;

    /// Create one unlabeled comparison from two distinct stored segments.
    /// Returns None when fewer than two segments exist.
    fn invent_comparison(&mut self) -> Option<u64>;

    fn label_unlabeled_comparisons(&mut self, goal: usize, verbose: bool) -> usize;

    /// Evict all segments and comparisons (fresh pretraining pass).
    fn clear_old_data(&mut self);

    /// labeled / total comparisons; 1.0 when empty (no backpressure needed).
    fn labeled_ratio(&self) -> f64;

    fn segment(&self, id: u64) -> Option<Arc<Segment>>;

    /// Ids of comparisons with a decisive or equal label.
    fn labeled_comparison_ids(&self) -> Vec<u64>;

    fn comparison(&self, id: u64) -> Option<Comparison>;

    fn segment_count(&self) -> usize;
    fn comparison_count(&self) -> usize;
    fn unlabeled_count(&self) -> usize;

    /// Whether further labels can still arrive. Callers looping toward a
    /// goal stop when this goes false; the default covers synchronous
    /// collectors that label everything they are asked to.
    fn can_label_more(&self) -> bool {
        self.unlabeled_count() > 0
    }
}

/// Storage and pair-picking shared by both collector variants.
///
/// Pair policy (applied consistently): one endpoint uniform over all stored
/// segments, the other uniform over the most recent half, never identical.
#[derive(Debug)]
pub struct ComparisonPool {
    segments: HashMap<u64, Arc<Segment>>,
    /// Insertion order, for recency-biased picking.
    order: Vec<u64>,
    comparisons: Vec<Comparison>,
    next_segment_id: u64,
    next_comparison_id: u64,
    rng: ChaCha8Rng,
}

impl ComparisonPool {
    pub fn new(rng: ChaCha8Rng) -> Self {
        Self {
            segments: HashMap::new(),
            order: Vec::new(),
            comparisons: Vec::new(),
            next_segment_id: 0,
            next_comparison_id: 0,
            rng,
        }
    }

    pub fn add_segment(&mut self, segment: Segment) -> u64 {
        let id = self.next_segment_id;
        self.next_segment_id += 1;
        self.segments.insert(id, Arc::new(segment));
        self.order.push(id);
        id
    }

    /// Pick two distinct segments and create an unlabeled comparison.
    pub fn invent_comparison(&mut self) -> Option<u64> {
        if self.order.len() < 2 {
            return None;
        }
        let n = self.order.len();
        let left = self.order[self.rng.gen_range(0..n)];
        let recent_start = n / 2;
        let mut right = self.order[self.rng.gen_range(recent_start..n)];
        let mut tries = 0;
        while right == left && tries < 16 {
            right = self.order[self.rng.gen_range(0..n)];
            tries += 1;
        }
        if right == left {
            // Degenerate pool (e.g. two entries, both picks collided 16x).
            right = *self.order.iter().find(|&&id| id != left)?;
        }

        let id = self.next_comparison_id;
        self.next_comparison_id += 1;
        self.comparisons.push(Comparison {
            id,
            left,
            right,
            label: Label::Unlabeled,
            created_at_ms: now_ms(),
        });
        Some(id)
    }

    /// Apply a terminal label. Returns false when the comparison is missing
    /// or already labeled (a comparison is labeled at most once).
    pub fn apply_label(&mut self, comparison_id: u64, label: Label) -> bool {
        if label == Label::Unlabeled {
            return false;
        }
        match self
            .comparisons
            .iter_mut()
            .find(|c| c.id == comparison_id)
        {
            Some(c) if c.label == Label::Unlabeled => {
                c.label = label;
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.segments.clear();
        self.order.clear();
        self.comparisons.clear();
    }

    pub fn segment(&self, id: u64) -> Option<Arc<Segment>> {
        self.segments.get(&id).cloned()
    }

    pub fn comparison(&self, id: u64) -> Option<Comparison> {
        self.comparisons.iter().find(|c| c.id == id).cloned()
    }

    pub fn unlabeled_ids(&self) -> Vec<u64> {
        self.comparisons
            .iter()
            .filter(|c| c.label == Label::Unlabeled)
            .map(|c| c.id)
            .collect()
    }

    pub fn labeled_ids(&self) -> Vec<u64> {
        self.comparisons
            .iter()
            .filter(|c| c.label != Label::Unlabeled)
            .map(|c| c.id)
            .collect()
    }

    pub fn labeled_count(&self) -> usize {
        self.comparisons
            .iter()
            .filter(|c| c.label != Label::Unlabeled)
            .count()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn comparison_count(&self) -> usize {
        self.comparisons.len()
    }

    pub fn labeled_ratio(&self) -> f64 {
        if self.comparisons.is_empty() {
            1.0
        } else {
            self.labeled_count() as f64 / self.comparisons.len() as f64
        }
    }
}

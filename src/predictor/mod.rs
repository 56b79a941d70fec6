// src/predictor/mod.rs
//
// The reward-predictor contract consumed by every policy loop.
//
// All three trainers (serial, threaded, population) hold the predictor as
// Arc<dyn RewardPredictor> and call the same methods, whether it is the
// learned comparison predictor, the true-reward pass-through, or the
// video-capture decorator wrapping either. Reward queries are read-only
// against a published weight snapshot and are safe to issue from rollout
// worker threads while a gradient step runs elsewhere.

pub mod comparison;
pub mod traditional;
pub mod video;

use std::path::Path;

use crate::error::Result;
use crate::segment::SegmentStep;

pub use comparison::ComparisonRewardPredictor;
pub use traditional::TraditionalRLRewardPredictor;
pub use video::SegmentVideoRecorder;

/// A batch of per-step reward queries. `env_rewards` carries the true
/// environment reward so the pass-through predictor can serve it.
#[derive(Debug)]
pub struct RewardBatch<'a> {
    pub observations: &'a [Vec<f32>],
    pub actions: &'a [Vec<f32>],
    pub env_rewards: &'a [f64],
}

impl<'a> RewardBatch<'a> {
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// A finished rollout episode handed back by the policy loop.
#[derive(Debug, Clone)]
pub struct EpisodePath {
    pub steps: Vec<SegmentStep>,
    pub episode_seed: u64,
}

/// Result of one train_predictor call.
#[derive(Debug, Clone, Copy)]
pub struct TrainOutcome {
    /// False when the step was skipped (no labeled comparisons yet, or a
    /// pass-through predictor).
    pub trained: bool,
    pub iteration: u64,
    pub loss: Option<f64>,
    /// Labeled comparisons available when the step ran.
    pub labeled: usize,
}

impl TrainOutcome {
    pub fn skipped(iteration: u64, labeled: usize) -> Self {
        Self {
            trained: false,
            iteration,
            loss: None,
            labeled,
        }
    }
}

/// The four-method contract plus episode ingestion.
pub trait RewardPredictor: Send + Sync {
    /// Reward estimates for a batch of steps. Read-only, non-blocking, safe
    /// under concurrent training.
    fn predict_reward(&self, batch: &RewardBatch<'_>) -> Vec<f64>;

    /// One training step. `env_steps` is the RL loop's progress, which
    /// drives the label schedule; the predictor's own iteration counter
    /// advances independently.
    fn train_predictor(&self, env_steps: u64) -> TrainOutcome;

    /// Ingest a finished rollout episode (segment material for further
    /// comparisons). Default: ignore.
    fn path_callback(&self, _path: &EpisodePath, _env_steps: u64) {}

    fn save_checkpoint(&self, dir: &Path) -> Result<()>;

    fn load_checkpoint(&self, dir: &Path) -> Result<()>;
}

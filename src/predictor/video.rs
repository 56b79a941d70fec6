// src/predictor/video.rs
//
// SegmentVideoRecorder: pass-through decorator that records a rollout
// capture every `checkpoint_interval` episode callbacks. Policy loops hold
// the same RewardPredictor trait object whether or not they are wrapped.
//
// Captures are JSONL frame dumps of the recorded episode (one step per
// line), written under the capture directory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::Result;
use crate::segment::Segment;

use super::{EpisodePath, RewardBatch, RewardPredictor, TrainOutcome};

pub struct SegmentVideoRecorder {
    inner: Arc<dyn RewardPredictor>,
    save_dir: PathBuf,
    checkpoint_interval: u64,
    calls: AtomicU64,
}

impl SegmentVideoRecorder {
    pub fn new(inner: Arc<dyn RewardPredictor>, save_dir: PathBuf, checkpoint_interval: u64) -> Self {
        Self {
            inner,
            save_dir,
            checkpoint_interval: checkpoint_interval.max(1),
            calls: AtomicU64::new(0),
        }
    }

    /// Episode callbacks seen so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl RewardPredictor for SegmentVideoRecorder {
    fn predict_reward(&self, batch: &RewardBatch<'_>) -> Vec<f64> {
        self.inner.predict_reward(batch)
    }

    fn train_predictor(&self, env_steps: u64) -> TrainOutcome {
        self.inner.train_predictor(env_steps)
    }

    fn path_callback(&self, path: &EpisodePath, env_steps: u64) {
        let n = self.calls.fetch_add(1, Ordering::Relaxed);
        if n % self.checkpoint_interval == 0 && !path.steps.is_empty() {
            let capture = Segment::new(
                path.steps.clone(),
                "rollout-capture",
                path.episode_seed,
                0,
            );
            let file = self.save_dir.join(format!("capture-{n:08}.jsonl"));
            match capture.write_jsonl(&file) {
                Ok(()) => info!(file = %file.display(), "recorded rollout capture"),
                Err(e) => warn!(error = %e, "rollout capture failed"),
            }
        }
        self.inner.path_callback(path, env_steps);
    }

    fn save_checkpoint(&self, dir: &Path) -> Result<()> {
        self.inner.save_checkpoint(dir)
    }

    fn load_checkpoint(&self, dir: &Path) -> Result<()> {
        self.inner.load_checkpoint(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::TraditionalRLRewardPredictor;
    use crate::segment::SegmentStep;
    use tempfile::tempdir;

    fn episode(len: usize) -> EpisodePath {
        EpisodePath {
            steps: vec![
                SegmentStep {
                    observation: vec![0.0],
                    action: vec![0.0],
                    reward: 1.0,
                };
                len
            ],
            episode_seed: 5,
        }
    }

    #[test]
    fn test_capture_every_interval() {
        let dir = tempdir().unwrap();
        let recorder = SegmentVideoRecorder::new(
            Arc::new(TraditionalRLRewardPredictor::new()),
            dir.path().to_path_buf(),
            3,
        );
        for _ in 0..7 {
            recorder.path_callback(&episode(4), 0);
        }
        // Calls 0, 3, 6 trigger captures.
        let captures: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(captures.len(), 3);
        assert_eq!(recorder.calls(), 7);
    }

    #[test]
    fn test_forwards_contract_to_inner() {
        let recorder = SegmentVideoRecorder::new(
            Arc::new(TraditionalRLRewardPredictor::new()),
            PathBuf::from("/nonexistent"),
            1_000_000,
        );
        let obs = vec![vec![0.0f32]];
        let act = vec![vec![0.0f32]];
        let env_rewards = vec![2.0];
        let out = recorder.predict_reward(&RewardBatch {
            observations: &obs,
            actions: &act,
            env_rewards: &env_rewards,
        });
        assert_eq!(out, vec![2.0]);
        assert!(!recorder.train_predictor(0).trained);
    }
}

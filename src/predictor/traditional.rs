// src/predictor/traditional.rs
//
// Pass-through predictor used when preference learning is switched off:
// serves the environment's true reward and trains nothing. Exists so the
// policy loops are wired identically regardless of predictor choice.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::{RewardBatch, RewardPredictor, TrainOutcome};

const MARKER_FILE: &str = "traditional.json";

#[derive(Debug, Serialize, Deserialize)]
struct Marker {
    kind: String,
}

#[derive(Debug, Default)]
pub struct TraditionalRLRewardPredictor;

impl TraditionalRLRewardPredictor {
    pub fn new() -> Self {
        Self
    }
}

impl RewardPredictor for TraditionalRLRewardPredictor {
    fn predict_reward(&self, batch: &RewardBatch<'_>) -> Vec<f64> {
        batch.env_rewards.to_vec()
    }

    fn train_predictor(&self, _env_steps: u64) -> TrainOutcome {
        TrainOutcome::skipped(0, 0)
    }

    fn save_checkpoint(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let marker = Marker {
            kind: "traditional".to_string(),
        };
        fs::write(dir.join(MARKER_FILE), serde_json::to_string(&marker)?)?;
        Ok(())
    }

    fn load_checkpoint(&self, dir: &Path) -> Result<()> {
        let path = dir.join(MARKER_FILE);
        let raw = fs::read_to_string(&path)
            .map_err(|_| Error::CheckpointFormat(format!("{}: marker missing", path.display())))?;
        let marker: Marker = serde_json::from_str(&raw)?;
        if marker.kind != "traditional" {
            return Err(Error::CheckpointFormat(format!(
                "unexpected checkpoint kind {:?}",
                marker.kind
            )));
        }
        Ok(())
    }
}

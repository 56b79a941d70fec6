// src/segment.rs
//
// Segments: fixed-length clips of (observation, action, true reward) steps
// cut from environment rollouts. Immutable once created; the comparison
// collector takes ownership when a segment is added.

use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// One recorded transition inside a segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentStep {
    pub observation: Vec<f32>,
    pub action: Vec<f32>,
    /// True environment reward for this step.
    pub reward: f64,
}

/// A fixed-length clip of recorded steps plus its rollout origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub steps: Vec<SegmentStep>,
    pub env_id: String,
    /// Seed of the episode this clip was cut from.
    pub episode_seed: u64,
    /// Step index within the episode where the clip starts.
    pub start_step: u64,
    /// Wall-clock capture time, milliseconds since the epoch.
    pub captured_at_ms: u64,
}

impl Segment {
    pub fn new(
        steps: Vec<SegmentStep>,
        env_id: &str,
        episode_seed: u64,
        start_step: u64,
    ) -> Self {
        Self {
            steps,
            env_id: env_id.to_string(),
            episode_seed,
            start_step,
            captured_at_ms: now_ms(),
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Cumulative true environment reward over the clip. This is what the
    /// synthetic oracle compares when labeling.
    pub fn total_reward(&self) -> f64 {
        self.steps.iter().map(|s| s.reward).sum()
    }

    /// Write the clip as one JSON object per step. Used by the segment dump
    /// directory and the rollout-capture decorator.
    pub fn write_jsonl(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        let mut w = io::BufWriter::new(file);
        for step in &self.steps {
            let line = serde_json::to_string(step)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            writeln!(w, "{line}")?;
        }
        Ok(())
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

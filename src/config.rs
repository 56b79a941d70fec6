// src/config.rs
//
// Run configuration for the prefrl harness.
//
// Constraints:
// - One immutable RunConfig built once from CLI arguments and passed by
//   reference into the trainer entrypoint. No process-wide mutable state.
// - Predictor / agent kinds are closed enums resolved exactly once, before
//   any directory or network allocation.
// - `--pretrain-labels` defaults to one quarter of the label budget; absence
//   of `--n-labels` selects the constant (wall-clock) label schedule.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How per-step reward is produced for the policy loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictorKind {
    /// Pass the environment's true reward through unchanged.
    Rl,
    /// Learn from comparisons labeled by a synthetic oracle.
    Synth,
    /// Learn from comparisons labeled over the human request/response channel.
    Human,
}

impl PredictorKind {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "rl" => Ok(Self::Rl),
            "synth" => Ok(Self::Synth),
            "human" => Ok(Self::Human),
            other => Err(Error::UnknownPredictor(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rl => "rl",
            Self::Synth => "synth",
            Self::Human => "human",
        }
    }
}

/// Which policy-improvement loop drives the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentKind {
    /// Single-threaded random-perturbation hill climbing.
    Hillclimb,
    /// Rollout workers on separate threads, shared policy state.
    Threaded,
    /// Population-based evolution strategies.
    Evo,
}

impl AgentKind {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "hillclimb" => Ok(Self::Hillclimb),
            "threaded" => Ok(Self::Threaded),
            "evo" => Ok(Self::Evo),
            other => Err(Error::UnknownAgent(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hillclimb => "hillclimb",
            Self::Threaded => "threaded",
            Self::Evo => "evo",
        }
    }
}

/// Immutable, fully-resolved run configuration.
///
/// Built once by [`RunConfig::resolve`]; everything downstream takes it by
/// reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub env_id: String,
    pub predictor: PredictorKind,
    /// Slugified experiment name (used in paths and log lines).
    pub experiment_name: String,
    pub seed: u64,
    /// Rollout worker thread count for pretraining and the threaded agent.
    pub workers: usize,
    /// Total label budget. `None` selects the constant label schedule.
    pub n_labels: Option<u64>,
    /// Labels collected before joint training starts.
    pub pretrain_labels: u64,
    /// Total environment steps for the policy loop.
    pub num_timesteps: u64,
    pub agent: AgentKind,
    /// Gradient steps during pretraining.
    pub pretrain_iters: u64,
    /// Initial exploration-bonus coefficient for the policy loop.
    pub starting_beta: f64,
    /// Clip length in seconds; steps per clip = clip_length * env fps.
    pub clip_length_s: f64,
    /// Record rollout segments through the video decorator.
    pub videos: bool,
    /// Restore the reward model from its checkpoint instead of pretraining.
    pub restore: bool,
}

/// Raw, unvalidated inputs as they come off the CLI.
#[derive(Debug, Clone)]
pub struct RawRunArgs {
    pub env_id: String,
    pub predictor: String,
    pub name: String,
    pub seed: u64,
    pub workers: usize,
    pub n_labels: Option<u64>,
    pub pretrain_labels: Option<u64>,
    pub num_timesteps: u64,
    pub agent: String,
    pub pretrain_iters: u64,
    pub starting_beta: f64,
    pub clip_length_s: f64,
    pub no_videos: bool,
    pub restore: bool,
}

impl RunConfig {
    /// Validate raw arguments into an immutable config.
    ///
    /// Fails fast on unknown kinds and inconsistent budgets; performs no I/O,
    /// so a bad config never leaves directories or networks behind.
    pub fn resolve(raw: RawRunArgs) -> Result<Self> {
        let predictor = PredictorKind::parse(&raw.predictor)?;
        let agent = AgentKind::parse(&raw.agent)?;

        if raw.workers == 0 {
            return Err(Error::InvalidConfig("workers must be at least 1".into()));
        }
        if raw.clip_length_s <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "clip length must be positive, got {}",
                raw.clip_length_s
            )));
        }
        if let Some(n) = raw.n_labels {
            if n == 0 {
                return Err(Error::InvalidConfig(
                    "label budget must be a positive integer".into(),
                ));
            }
        }

        // Pretrain labels default to a quarter of the budget. A preference
        // predictor with neither value has no way to seed its first batch.
        let pretrain_labels = match (raw.pretrain_labels, raw.n_labels) {
            (Some(p), _) => p,
            (None, Some(n)) => (n / 4).max(1),
            (None, None) if predictor == PredictorKind::Rl => 0,
            (None, None) => {
                return Err(Error::InvalidConfig(
                    "either --pretrain-labels or --n-labels is required for preference predictors"
                        .into(),
                ));
            }
        };
        if let Some(n) = raw.n_labels {
            if pretrain_labels > n {
                return Err(Error::InvalidConfig(format!(
                    "pretrain labels ({pretrain_labels}) exceed the label budget ({n})"
                )));
            }
        }

        Ok(Self {
            env_id: raw.env_id,
            predictor,
            experiment_name: slugify(&raw.name),
            seed: raw.seed,
            workers: raw.workers,
            n_labels: raw.n_labels,
            pretrain_labels,
            num_timesteps: raw.num_timesteps,
            agent,
            pretrain_iters: raw.pretrain_iters,
            starting_beta: raw.starting_beta,
            clip_length_s: raw.clip_length_s,
            videos: !raw.no_videos,
            restore: raw.restore,
        })
    }

    /// Reward-model checkpoint directory for this experiment.
    pub fn checkpoint_dir(&self) -> PathBuf {
        PathBuf::from("checkpoints/reward_model").join(&self.experiment_name)
    }

    /// Segment dump directory.
    pub fn segments_dir(&self) -> PathBuf {
        PathBuf::from("segments")
    }

    /// Rollout-capture directory for the video decorator.
    pub fn video_dir(&self) -> PathBuf {
        PathBuf::from("videos").join(format!("{}-{}", self.env_id, self.experiment_name))
    }
}

/// Lowercase, replace every non-alphanumeric run with a single '-', trim.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

// src/error.rs
//
// Library error taxonomy.
//
// Configuration errors (unknown kinds, invalid budgets) are fatal at startup
// and surface before any directory or network allocation. Checkpoint shape
// mismatches are fatal at load time and carry expected-vs-actual dims. An
// unanswered human comparison is NOT an error: it simply stays unlabeled and
// is excluded from training batches.

use thiserror::Error;

/// All errors surfaced by the prefrl library.
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown `--predictor` kind. Valid kinds: rl, synth, human.
    #[error("unknown predictor kind {0:?} (expected rl, synth or human)")]
    UnknownPredictor(String),

    /// Unknown `--agent` kind. Valid kinds: hillclimb, threaded, evo.
    #[error("unknown agent kind {0:?} (expected hillclimb, threaded or evo)")]
    UnknownAgent(String),

    /// Unknown environment id.
    #[error("unknown env id {0:?}")]
    UnknownEnv(String),

    /// A configuration value failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Checkpoint weights do not match the network the caller constructed.
    #[error("checkpoint shape mismatch: expected {expected}, found {actual}")]
    CheckpointShape { expected: String, actual: String },

    /// Checkpoint file is structurally unreadable (truncated, bad header).
    #[error("malformed checkpoint: {0}")]
    CheckpointFormat(String),

    /// The human labeling channel is gone (frontend dropped both ends).
    #[error("labeling channel disconnected before any label was collected")]
    LabelingUnavailable,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

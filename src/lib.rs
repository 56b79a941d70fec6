//! prefrl core library.
//!
//! Learns a scalar reward function from pairwise preferences over short
//! trajectory segments and serves it to a policy-improvement loop in place
//! of the environment's native reward.
//!
//! # Architecture
//!
//! The crate follows a clean separation between the preference-learning core
//! and the glue around it:
//!
//! - **Segments** (`segment`, `sampling`): fixed-length clips of
//!   (observation, action, true reward) steps, sampled from random rollouts
//!   across worker threads.
//!
//! - **Comparisons** (`collector`): pairs of segments awaiting a preference
//!   label. Two collectors: a synchronous synthetic oracle and a human-backed
//!   collector speaking a bounded-wait request/response channel.
//!
//! - **Label schedules** (`schedule`): how many labels should have been
//!   requested by a given point in training; progress-annealed or
//!   wall-clock-constant.
//!
//! - **Reward network** (`net`): a feature extractor (flatten or conv stack,
//!   selected by observation rank) feeding a shared two-hidden-layer MLP
//!   head, with manual backprop and Adam.
//!
//! - **Predictors** (`predictor`): the four-method contract every policy
//!   loop consumes. `ComparisonRewardPredictor` trains on labeled
//!   comparisons and serves reward from an atomically-published weight
//!   snapshot; `TraditionalRLRewardPredictor` passes true reward through;
//!   `SegmentVideoRecorder` decorates either with rollout captures.
//!
//! - **Trainers** (`trainer`): three interchangeable policy loops (serial,
//!   threaded, population) that exercise the contract.

pub mod checkpoint;
pub mod collector;
pub mod config;
pub mod env;
pub mod error;
pub mod net;
pub mod predictor;
pub mod sampling;
pub mod schedule;
pub mod segment;
pub mod telemetry;
pub mod trainer;

// --- Re-exports for ergonomic external use ---------------------------------

pub use collector::{
    Comparison, ComparisonCollector, ComparisonRequest, ComparisonResponse,
    HumanComparisonCollector, Label, LabelingFrontend, SyntheticComparisonCollector,
};
pub use config::{AgentKind, PredictorKind, RawRunArgs, RunConfig};
pub use env::{make_env, EnvSpec, Environment, ObsShape};
pub use error::{Error, Result};
pub use predictor::{
    ComparisonRewardPredictor, EpisodePath, RewardBatch, RewardPredictor, SegmentVideoRecorder,
    TraditionalRLRewardPredictor, TrainOutcome,
};
pub use sampling::segments_from_rand_rollout;
pub use schedule::{ConstantLabelSchedule, LabelAnnealer, LabelSchedule};
pub use segment::{Segment, SegmentStep};
pub use trainer::{run_agent, TrainReport};

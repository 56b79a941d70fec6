// src/env.rs
//
// Gym-style environments for rollouts and pretraining.
//
// - Environment: reset(seed) -> observation, step(action) -> EnvStep
// - All transitions are deterministic given the reset seed.
// - make_env resolves an env id from the registry; unknown ids are a
//   configuration error surfaced before anything is allocated.
//
// Two synthetic environments ship with the crate: a vector-observation point
// mass and a grid-observation navigation task. They are small on purpose:
// enough dynamics for the reward model to have something monotone to learn,
// and an image-shaped observation to exercise the convolutional path.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Shape of an observation tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObsShape {
    /// Flat vector of `len` features.
    Vector { len: usize },
    /// Image grid. `channels == 0` means the env emits rank-2 observations
    /// with no explicit channel dimension; the network promotes them to a
    /// unit channel before convolution.
    Image {
        height: usize,
        width: usize,
        channels: usize,
    },
}

impl ObsShape {
    /// Total number of scalar features.
    pub fn flat_len(&self) -> usize {
        match *self {
            ObsShape::Vector { len } => len,
            ObsShape::Image {
                height,
                width,
                channels,
            } => height * width * channels.max(1),
        }
    }

    /// True when observations are image-shaped (rank 2 or 3).
    pub fn is_image(&self) -> bool {
        matches!(self, ObsShape::Image { .. })
    }
}

/// Static description of an environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvSpec {
    pub id: String,
    pub obs_shape: ObsShape,
    pub action_dim: usize,
    /// Steps per second of wall time; converts clip seconds to clip steps.
    pub fps: f64,
    pub max_episode_steps: u64,
}

impl EnvSpec {
    /// Steps in a clip of `clip_length_s` seconds, at least 1.
    pub fn clip_steps(&self, clip_length_s: f64) -> usize {
        ((clip_length_s * self.fps).round() as usize).max(1)
    }
}

/// Result of a single environment step.
#[derive(Debug, Clone)]
pub struct EnvStep {
    pub observation: Vec<f32>,
    pub reward: f64,
    pub done: bool,
}

/// Minimal rollout interface.
pub trait Environment: Send {
    fn spec(&self) -> &EnvSpec;

    /// Start a new episode. Same seed, same episode.
    fn reset(&mut self, seed: u64) -> Vec<f32>;

    /// Advance one step. Calling step after `done` restarts nothing; the
    /// caller is expected to reset.
    fn step(&mut self, action: &[f32]) -> EnvStep;

    /// Draw a uniformly random action for random rollouts.
    fn random_action(&self, rng: &mut ChaCha8Rng) -> Vec<f32>;
}

/// Registered environment ids.
pub fn env_ids() -> &'static [&'static str] {
    &["pointmass-v0", "gridnav-v0"]
}

/// Construct an environment from the registry.
pub fn make_env(env_id: &str) -> Result<Box<dyn Environment>> {
    match env_id {
        "pointmass-v0" => Ok(Box::new(PointMassEnv::new())),
        "gridnav-v0" => Ok(Box::new(GridNavEnv::new())),
        other => Err(Error::UnknownEnv(other.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Point mass
// ---------------------------------------------------------------------------

/// 1-D point mass with thrust control.
///
/// Observation: [position, velocity]. Action: 1-D thrust in [-1, 1].
/// True reward: -|position| per step, so staying near the origin is good.
pub struct PointMassEnv {
    spec: EnvSpec,
    pos: f64,
    vel: f64,
    step_idx: u64,
}

impl Default for PointMassEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl PointMassEnv {
    const DT: f64 = 0.05;

    pub fn new() -> Self {
        Self {
            spec: EnvSpec {
                id: "pointmass-v0".to_string(),
                obs_shape: ObsShape::Vector { len: 2 },
                action_dim: 1,
                fps: 20.0,
                max_episode_steps: 400,
            },
            pos: 0.0,
            vel: 0.0,
            step_idx: 0,
        }
    }

    fn observation(&self) -> Vec<f32> {
        vec![self.pos as f32, self.vel as f32]
    }
}

impl Environment for PointMassEnv {
    fn spec(&self) -> &EnvSpec {
        &self.spec
    }

    fn reset(&mut self, seed: u64) -> Vec<f32> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        self.pos = rng.gen_range(-1.0..1.0);
        self.vel = rng.gen_range(-0.5..0.5);
        self.step_idx = 0;
        self.observation()
    }

    fn step(&mut self, action: &[f32]) -> EnvStep {
        let thrust = f64::from(action.first().copied().unwrap_or(0.0)).clamp(-1.0, 1.0);
        self.vel += thrust * Self::DT;
        self.vel = self.vel.clamp(-2.0, 2.0);
        self.pos += self.vel * Self::DT;
        self.pos = self.pos.clamp(-3.0, 3.0);
        self.step_idx += 1;

        EnvStep {
            observation: self.observation(),
            reward: -self.pos.abs(),
            done: self.step_idx >= self.spec.max_episode_steps,
        }
    }

    fn random_action(&self, rng: &mut ChaCha8Rng) -> Vec<f32> {
        vec![rng.gen_range(-1.0..1.0)]
    }
}

// ---------------------------------------------------------------------------
// Grid navigation
// ---------------------------------------------------------------------------

/// Agent on an H x W grid walking toward a goal cell.
///
/// Observation: rank-2 occupancy grid (no channel dimension) with the agent
/// cell at 1.0 and the goal cell at 0.5. Action: 4 logits, argmax picks the
/// move direction. True reward: negative Manhattan distance to the goal.
pub struct GridNavEnv {
    spec: EnvSpec,
    agent: (usize, usize),
    goal: (usize, usize),
    step_idx: u64,
}

impl Default for GridNavEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl GridNavEnv {
    const SIZE: usize = 12;

    pub fn new() -> Self {
        Self {
            spec: EnvSpec {
                id: "gridnav-v0".to_string(),
                obs_shape: ObsShape::Image {
                    height: Self::SIZE,
                    width: Self::SIZE,
                    channels: 0,
                },
                action_dim: 4,
                fps: 10.0,
                max_episode_steps: 200,
            },
            agent: (0, 0),
            goal: (Self::SIZE - 1, Self::SIZE - 1),
            step_idx: 0,
        }
    }

    fn observation(&self) -> Vec<f32> {
        let mut grid = vec![0.0f32; Self::SIZE * Self::SIZE];
        grid[self.goal.0 * Self::SIZE + self.goal.1] = 0.5;
        grid[self.agent.0 * Self::SIZE + self.agent.1] = 1.0;
        grid
    }

    fn distance(&self) -> f64 {
        let dr = self.agent.0.abs_diff(self.goal.0);
        let dc = self.agent.1.abs_diff(self.goal.1);
        (dr + dc) as f64
    }
}

impl Environment for GridNavEnv {
    fn spec(&self) -> &EnvSpec {
        &self.spec
    }

    fn reset(&mut self, seed: u64) -> Vec<f32> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        self.agent = (
            rng.gen_range(0..Self::SIZE),
            rng.gen_range(0..Self::SIZE),
        );
        self.goal = (
            rng.gen_range(0..Self::SIZE),
            rng.gen_range(0..Self::SIZE),
        );
        self.step_idx = 0;
        self.observation()
    }

    fn step(&mut self, action: &[f32]) -> EnvStep {
        let dir = action
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0);

        let (r, c) = self.agent;
        self.agent = match dir {
            0 if r > 0 => (r - 1, c),
            1 if r + 1 < Self::SIZE => (r + 1, c),
            2 if c > 0 => (r, c - 1),
            3 if c + 1 < Self::SIZE => (r, c + 1),
            _ => (r, c),
        };
        self.step_idx += 1;

        let reached = self.agent == self.goal;
        EnvStep {
            observation: self.observation(),
            reward: -self.distance(),
            done: reached || self.step_idx >= self.spec.max_episode_steps,
        }
    }

    fn random_action(&self, rng: &mut ChaCha8Rng) -> Vec<f32> {
        (0..4).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_env_unknown_id() {
        assert!(matches!(make_env("nope-v0"), Err(Error::UnknownEnv(_))));
    }

    #[test]
    fn test_pointmass_deterministic_given_seed() {
        let mut a = PointMassEnv::new();
        let mut b = PointMassEnv::new();
        let oa = a.reset(7);
        let ob = b.reset(7);
        assert_eq!(oa, ob);

        let sa = a.step(&[0.3]);
        let sb = b.step(&[0.3]);
        assert_eq!(sa.observation, sb.observation);
        assert_eq!(sa.reward, sb.reward);
    }

    #[test]
    fn test_pointmass_reward_tracks_distance() {
        let mut env = PointMassEnv::new();
        env.reset(1);
        env.pos = 0.0;
        let near = env.step(&[0.0]).reward;
        env.pos = 2.0;
        env.vel = 0.0;
        let far = env.step(&[0.0]).reward;
        assert!(near > far);
    }

    #[test]
    fn test_gridnav_obs_shape() {
        let mut env = GridNavEnv::new();
        let obs = env.reset(3);
        assert_eq!(obs.len(), env.spec().obs_shape.flat_len());
        match env.spec().obs_shape {
            ObsShape::Image {
                height,
                width,
                channels,
            } => {
                assert_eq!((height, width), (12, 12));
                // Rank-2 observation, channel promoted by the network.
                assert_eq!(channels, 0);
            }
            _ => panic!("gridnav must be image-shaped"),
        }
    }

    #[test]
    fn test_clip_steps_rounding() {
        let env = PointMassEnv::new();
        // 1.5 s at 20 fps = 30 steps.
        assert_eq!(env.spec().clip_steps(1.5), 30);
        assert_eq!(env.spec().clip_steps(0.001), 1);
    }
}

// src/trainer.rs
//
// Policy-improvement loops driving the reward predictor.
//
// Three interchangeable loops, one per AgentKind, all consuming only the
// RewardPredictor contract:
// - hillclimb: serial random-perturbation hill climbing
// - threaded:  rollout workers on separate threads, shared policy state;
//              reward queries run concurrently with gradient steps
// - evo:       population-based evolution strategies
//
// Each loop queries the predictor once per environment step, hands finished
// episodes back through path_callback, and triggers train_predictor on a
// step cadence. The update rules are deliberately simple; the integration
// surface is the point.

use std::sync::{Arc, Mutex};
use std::thread;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::config::{AgentKind, RunConfig};
use crate::env::{make_env, Environment};
use crate::error::Result;
use crate::predictor::{EpisodePath, RewardBatch, RewardPredictor};
use crate::segment::SegmentStep;
use crate::telemetry::OnlineStats;

/// Trigger a predictor training step roughly this often, in env steps.
const TRAIN_EVERY_STEPS: u64 = 400;

/// Summary of a finished policy-training run.
#[derive(Debug, Clone)]
pub struct TrainReport {
    pub total_env_steps: u64,
    pub episodes: u64,
    pub best_return: f64,
}

/// Linear policy: action = tanh(W^T obs + b).
#[derive(Debug, Clone)]
pub struct LinearPolicy {
    obs_dim: usize,
    act_dim: usize,
    w: Vec<f32>,
    b: Vec<f32>,
}

impl LinearPolicy {
    pub fn zeros(obs_dim: usize, act_dim: usize) -> Self {
        Self {
            obs_dim,
            act_dim,
            w: vec![0.0; obs_dim * act_dim],
            b: vec![0.0; act_dim],
        }
    }

    pub fn act(&self, obs: &[f32]) -> Vec<f32> {
        debug_assert_eq!(obs.len(), self.obs_dim);
        (0..self.act_dim)
            .map(|j| {
                let mut z = self.b[j];
                for (i, &o) in obs.iter().enumerate() {
                    z += o * self.w[i * self.act_dim + j];
                }
                z.tanh()
            })
            .collect()
    }

    /// Uniform perturbation in [-scale, scale] per weight.
    pub fn perturbed(&self, scale: f64, rng: &mut ChaCha8Rng) -> Self {
        let mut out = self.clone();
        if scale <= 0.0 {
            return out;
        }
        for v in out.w.iter_mut().chain(out.b.iter_mut()) {
            *v += rng.gen_range(-scale..scale) as f32;
        }
        out
    }

    fn add_scaled(&mut self, other: &Self, factor: f32) {
        for (a, b) in self.w.iter_mut().zip(other.w.iter()) {
            *a += factor * b;
        }
        for (a, b) in self.b.iter_mut().zip(other.b.iter()) {
            *a += factor * b;
        }
    }
}

/// Perturbation scale annealed from starting_beta to a tenth of it.
fn exploration_scale(starting_beta: f64, progress: f64) -> f64 {
    let end = starting_beta * 0.1;
    starting_beta + (end - starting_beta) * progress.clamp(0.0, 1.0)
}

/// Roll one episode, querying the predictor once per environment step.
///
/// Returns the episode trace, the learned (predicted) return and the number
/// of environment steps consumed.
fn rollout(
    env: &mut dyn Environment,
    policy: &LinearPolicy,
    episode_seed: u64,
    predictor: &dyn RewardPredictor,
    step_budget: u64,
) -> (EpisodePath, f64, u64) {
    let mut obs = env.reset(episode_seed);
    let mut steps: Vec<SegmentStep> = Vec::new();
    let mut learned_return = 0.0f64;
    let mut used = 0u64;

    while used < step_budget {
        let action = policy.act(&obs);
        let step = env.step(&action);

        let obs_batch = [obs.clone()];
        let act_batch = [action.clone()];
        let env_rewards = [step.reward];
        let predicted = predictor.predict_reward(&RewardBatch {
            observations: &obs_batch,
            actions: &act_batch,
            env_rewards: &env_rewards,
        });
        learned_return += predicted.first().copied().unwrap_or(0.0);

        steps.push(SegmentStep {
            observation: obs,
            action,
            reward: step.reward,
        });
        obs = step.observation;
        used += 1;
        if step.done {
            break;
        }
    }

    (
        EpisodePath {
            steps,
            episode_seed,
        },
        learned_return,
        used,
    )
}

/// Entry point: dispatch on the agent kind resolved at startup.
pub fn run_agent(
    cfg: &RunConfig,
    predictor: Arc<dyn RewardPredictor>,
) -> Result<TrainReport> {
    info!(
        agent = cfg.agent.as_str(),
        env_id = %cfg.env_id,
        num_timesteps = cfg.num_timesteps,
        "starting joint training of predictor and agent"
    );
    match cfg.agent {
        AgentKind::Hillclimb => run_hillclimb(cfg, predictor),
        AgentKind::Threaded => run_threaded(cfg, predictor),
        AgentKind::Evo => run_evo(cfg, predictor),
    }
}

fn run_hillclimb(cfg: &RunConfig, predictor: Arc<dyn RewardPredictor>) -> Result<TrainReport> {
    let mut env = make_env(&cfg.env_id)?;
    let spec = env.spec().clone();
    let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);

    let mut best = LinearPolicy::zeros(spec.obs_shape.flat_len(), spec.action_dim);
    let mut best_return = f64::NEG_INFINITY;
    let mut total_steps = 0u64;
    let mut episodes = 0u64;
    let mut last_train = 0u64;
    let mut returns = OnlineStats::new();

    while total_steps < cfg.num_timesteps {
        let progress = total_steps as f64 / cfg.num_timesteps as f64;
        let scale = exploration_scale(cfg.starting_beta, progress);
        let candidate = if best_return.is_finite() {
            best.perturbed(scale, &mut rng)
        } else {
            best.clone()
        };

        let seed = rng.gen::<u64>();
        let (path, learned_return, used) = rollout(
            env.as_mut(),
            &candidate,
            seed,
            predictor.as_ref(),
            cfg.num_timesteps - total_steps,
        );
        total_steps += used;
        episodes += 1;
        returns.add(learned_return);
        predictor.path_callback(&path, total_steps);

        if learned_return > best_return {
            best_return = learned_return;
            best = candidate;
        }

        if total_steps - last_train >= TRAIN_EVERY_STEPS {
            predictor.train_predictor(total_steps);
            last_train = total_steps;
        }
        if episodes % 50 == 0 {
            info!(
                episodes,
                total_steps,
                best_return,
                mean_return = returns.mean(),
                "hillclimb progress"
            );
        }
    }

    Ok(TrainReport {
        total_env_steps: total_steps,
        episodes,
        best_return,
    })
}

fn run_threaded(cfg: &RunConfig, predictor: Arc<dyn RewardPredictor>) -> Result<TrainReport> {
    // Probe the env id up front so workers cannot fail on it.
    let spec = make_env(&cfg.env_id)?.spec().clone();

    struct Shared {
        best: LinearPolicy,
        best_return: f64,
        total_steps: u64,
        episodes: u64,
    }

    let shared = Arc::new(Mutex::new(Shared {
        best: LinearPolicy::zeros(spec.obs_shape.flat_len(), spec.action_dim),
        best_return: f64::NEG_INFINITY,
        total_steps: 0,
        episodes: 0,
    }));

    thread::scope(|scope| {
        for worker_idx in 0..cfg.workers {
            let shared = shared.clone();
            let predictor = predictor.clone();
            let env_id = cfg.env_id.clone();
            let num_timesteps = cfg.num_timesteps;
            let starting_beta = cfg.starting_beta;
            let seed = cfg.seed.wrapping_add(worker_idx as u64 * 104_729);

            scope.spawn(move || {
                let Ok(mut env) = make_env(&env_id) else {
                    return;
                };
                let mut rng = ChaCha8Rng::seed_from_u64(seed);

                loop {
                    // Snapshot the current best under the lock, rollout
                    // without it.
                    let (candidate, budget) = {
                        let shared = shared.lock().expect("shared state poisoned");
                        if shared.total_steps >= num_timesteps {
                            break;
                        }
                        let progress = shared.total_steps as f64 / num_timesteps as f64;
                        let scale = exploration_scale(starting_beta, progress);
                        (
                            shared.best.perturbed(scale, &mut rng),
                            num_timesteps - shared.total_steps,
                        )
                    };

                    let episode_seed = rng.gen::<u64>();
                    let (path, learned_return, used) = rollout(
                        env.as_mut(),
                        &candidate,
                        episode_seed,
                        predictor.as_ref(),
                        budget,
                    );
                    predictor.path_callback(&path, {
                        let shared = shared.lock().expect("shared state poisoned");
                        shared.total_steps
                    });

                    let mut shared = shared.lock().expect("shared state poisoned");
                    shared.total_steps += used;
                    shared.episodes += 1;
                    if learned_return > shared.best_return {
                        shared.best_return = learned_return;
                        shared.best = candidate;
                    }
                }
            });
        }

        // Training cadence runs here while workers keep serving rollouts;
        // this is the concurrent read/train path the snapshot swap exists
        // for.
        let mut last_train = 0u64;
        loop {
            let (steps, done) = {
                let shared = shared.lock().expect("shared state poisoned");
                (shared.total_steps, shared.total_steps >= cfg.num_timesteps)
            };
            if steps - last_train >= TRAIN_EVERY_STEPS {
                predictor.train_predictor(steps);
                last_train = steps;
            }
            if done {
                break;
            }
            thread::sleep(std::time::Duration::from_millis(5));
        }
    });

    let shared = shared.lock().expect("shared state poisoned");
    Ok(TrainReport {
        total_env_steps: shared.total_steps,
        episodes: shared.episodes,
        best_return: shared.best_return,
    })
}

fn run_evo(cfg: &RunConfig, predictor: Arc<dyn RewardPredictor>) -> Result<TrainReport> {
    const POPULATION: usize = 8;
    const LEARNING_RATE: f32 = 0.3;

    let mut env = make_env(&cfg.env_id)?;
    let spec = env.spec().clone();
    let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);

    let mut theta = LinearPolicy::zeros(spec.obs_shape.flat_len(), spec.action_dim);
    let mut best_return = f64::NEG_INFINITY;
    let mut total_steps = 0u64;
    let mut episodes = 0u64;
    let mut generation = 0u64;

    while total_steps < cfg.num_timesteps {
        let progress = total_steps as f64 / cfg.num_timesteps as f64;
        let scale = exploration_scale(cfg.starting_beta, progress);

        let mut candidates = Vec::with_capacity(POPULATION);
        let mut returns = Vec::with_capacity(POPULATION);
        for _ in 0..POPULATION {
            if total_steps >= cfg.num_timesteps {
                break;
            }
            let candidate = theta.perturbed(scale, &mut rng);
            let episode_seed = rng.gen::<u64>();
            let (path, learned_return, used) = rollout(
                env.as_mut(),
                &candidate,
                episode_seed,
                predictor.as_ref(),
                cfg.num_timesteps - total_steps,
            );
            total_steps += used;
            episodes += 1;
            predictor.path_callback(&path, total_steps);
            best_return = best_return.max(learned_return);
            candidates.push(candidate);
            returns.push(learned_return);
        }
        if candidates.is_empty() {
            break;
        }

        // Fitness-weighted recombination toward above-average candidates.
        let mut stats = OnlineStats::new();
        for &r in &returns {
            stats.add(r);
        }
        let spread = stats.stddev().max(1e-8);
        let mut update = LinearPolicy::zeros(spec.obs_shape.flat_len(), spec.action_dim);
        for (candidate, &ret) in candidates.iter().zip(returns.iter()) {
            let advantage = ((ret - stats.mean()) / spread) as f32;
            let mut delta = candidate.clone();
            delta.add_scaled(&theta, -1.0);
            update.add_scaled(&delta, advantage / candidates.len() as f32);
        }
        theta.add_scaled(&update, LEARNING_RATE);

        predictor.train_predictor(total_steps);
        generation += 1;
        if generation % 10 == 0 {
            info!(
                generation,
                total_steps,
                best_return,
                mean_return = stats.mean(),
                "evolution progress"
            );
        }
    }

    Ok(TrainReport {
        total_env_steps: total_steps,
        episodes,
        best_return,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PredictorKind, RawRunArgs, RunConfig};
    use crate::predictor::TraditionalRLRewardPredictor;

    fn small_cfg(agent: &str) -> RunConfig {
        RunConfig::resolve(RawRunArgs {
            env_id: "pointmass-v0".to_string(),
            predictor: PredictorKind::Rl.as_str().to_string(),
            name: "trainer-test".to_string(),
            seed: 3,
            workers: 2,
            n_labels: None,
            pretrain_labels: None,
            num_timesteps: 600,
            agent: agent.to_string(),
            pretrain_iters: 0,
            starting_beta: 0.2,
            clip_length_s: 0.5,
            no_videos: true,
            restore: false,
        })
        .unwrap()
    }

    #[test]
    fn test_policy_act_bounded() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let policy = LinearPolicy::zeros(2, 1).perturbed(5.0, &mut rng);
        let action = policy.act(&[3.0, -2.0]);
        assert_eq!(action.len(), 1);
        assert!(action[0] >= -1.0 && action[0] <= 1.0);
    }

    #[test]
    fn test_exploration_scale_anneals() {
        assert!((exploration_scale(0.1, 0.0) - 0.1).abs() < 1e-12);
        assert!((exploration_scale(0.1, 1.0) - 0.01).abs() < 1e-12);
        assert!(exploration_scale(0.1, 0.5) < 0.1);
    }

    #[test]
    fn test_hillclimb_consumes_step_budget() {
        let cfg = small_cfg("hillclimb");
        let report = run_agent(&cfg, Arc::new(TraditionalRLRewardPredictor::new())).unwrap();
        assert!(report.total_env_steps >= cfg.num_timesteps);
        assert!(report.episodes > 0);
    }

    #[test]
    fn test_threaded_consumes_step_budget() {
        let cfg = small_cfg("threaded");
        let report = run_agent(&cfg, Arc::new(TraditionalRLRewardPredictor::new())).unwrap();
        assert!(report.total_env_steps >= cfg.num_timesteps);
    }

    #[test]
    fn test_evo_consumes_step_budget() {
        let cfg = small_cfg("evo");
        let report = run_agent(&cfg, Arc::new(TraditionalRLRewardPredictor::new())).unwrap();
        assert!(report.total_env_steps >= cfg.num_timesteps);
    }
}

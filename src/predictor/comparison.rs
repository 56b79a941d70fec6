// src/predictor/comparison.rs
//
// ComparisonRewardPredictor: trains the reward network on labeled
// comparisons and serves per-step reward estimates.
//
// Loss: Bradley-Terry cross-entropy over the two segments' summed predicted
// rewards. The probability estimate is clamped away from 0/1 before the log,
// so a degenerate pair (identical segments) cannot blow up the loss.
//
// Concurrency discipline: weights live in an ArcSwap snapshot. Readers
// (predict_reward) capture the current Arc once per query; the gradient step
// clones the snapshot, updates the clone and swaps it in. A reader sees the
// old weights or the new weights, never a half-written set. The collector
// mutex is only taken by training/ingestion paths, never by reward queries,
// so a blocking human-labeling wait cannot stall rollout workers.

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

use crate::collector::ComparisonCollector;
use crate::env::EnvSpec;
use crate::error::{Error, Result};
use crate::net::{self, Adam, NetArch, NetParams};
use crate::sampling;
use crate::schedule::LabelSchedule;
use crate::segment::{now_ms, Segment};
use crate::telemetry::{NoopSink, TrainingRecord, TrainingSink};

use super::{EpisodePath, RewardBatch, RewardPredictor, TrainOutcome};

const DEFAULT_BATCH_SIZE: usize = 64;
const DEFAULT_LEARNING_RATE: f32 = 1e-3;
/// Probability clamp keeping the cross-entropy finite.
const PROB_CLAMP: f64 = 1e-6;

/// Mutable training state, all behind one mutex.
struct TrainState {
    adam: Adam,
    iteration: u64,
    rng: ChaCha8Rng,
    sink: Box<dyn TrainingSink>,
}

pub struct ComparisonRewardPredictor {
    env_id: String,
    arch: NetArch,
    clip_length_s: f64,
    clip_steps: usize,
    params: ArcSwap<NetParams>,
    /// Shared with pretraining code that seeds it with synthetic rollouts.
    collector: Arc<Mutex<dyn ComparisonCollector>>,
    schedule: Box<dyn LabelSchedule>,
    state: Mutex<TrainState>,
    batch_size: usize,
}

impl ComparisonRewardPredictor {
    pub fn new(
        spec: &EnvSpec,
        collector: Arc<Mutex<dyn ComparisonCollector>>,
        schedule: Box<dyn LabelSchedule>,
        clip_length_s: f64,
        seed: u64,
    ) -> Self {
        let arch = NetArch::for_shapes(spec.obs_shape, spec.action_dim, net::DEFAULT_HIDDEN);
        let params = NetParams::init(arch.clone(), seed);
        Self {
            env_id: spec.id.clone(),
            clip_length_s,
            clip_steps: spec.clip_steps(clip_length_s),
            params: ArcSwap::from_pointee(params),
            collector,
            schedule,
            state: Mutex::new(TrainState {
                adam: Adam::new(DEFAULT_LEARNING_RATE),
                iteration: 0,
                rng: ChaCha8Rng::seed_from_u64(seed.wrapping_add(0x9e37_79b9)),
                sink: Box::new(NoopSink),
            }),
            arch,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_learning_rate(self, lr: f32) -> Self {
        self.state.lock().expect("train state poisoned").adam = Adam::new(lr);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_sink(self, sink: Box<dyn TrainingSink>) -> Self {
        self.state.lock().expect("train state poisoned").sink = sink;
        self
    }

    pub fn arch(&self) -> &NetArch {
        &self.arch
    }

    pub fn collector(&self) -> Arc<Mutex<dyn ComparisonCollector>> {
        self.collector.clone()
    }

    /// Seed the collector and run the initial gradient steps.
    ///
    /// Clears old data, samples `2 * n_pretrain_labels` random-rollout
    /// segments across `workers` threads, invents and labels
    /// `n_pretrain_labels` comparisons, then runs `n_pretrain_iters` steps.
    /// For a human collector the labeling loop repeats bounded waits until
    /// the goal is met or the frontend goes away; partial labels are used
    /// with a warning, zero labels is fatal.
    pub fn pretrain(
        &self,
        n_pretrain_labels: usize,
        n_pretrain_iters: u64,
        workers: usize,
        seed: u64,
    ) -> Result<()> {
        info!(
            n_pretrain_labels,
            n_pretrain_iters, workers, "starting random rollouts for pretraining segments"
        );

        self.collector
            .lock()
            .expect("collector poisoned")
            .clear_old_data();

        let segments = sampling::segments_from_rand_rollout(
            &self.env_id,
            n_pretrain_labels * 2,
            self.clip_length_s,
            workers,
            seed,
        )?;

        {
            let mut collector = self.collector.lock().expect("collector poisoned");
            for segment in segments {
                collector.add_segment(segment);
            }
            for _ in 0..n_pretrain_labels {
                if collector.invent_comparison().is_none() {
                    return Err(Error::InvalidConfig(
                        "not enough segments to invent pretraining comparisons".into(),
                    ));
                }
            }
        }

        // Label to goal. Loop so a bounded-wait human collector gets polled
        // repeatedly; stop on goal or when no further labels can arrive.
        loop {
            let mut collector = self.collector.lock().expect("collector poisoned");
            collector.label_unlabeled_comparisons(n_pretrain_labels, true);
            let labeled = collector.labeled_comparison_ids().len();
            let exhausted = !collector.can_label_more();
            drop(collector);

            if labeled >= n_pretrain_labels {
                break;
            }
            if exhausted {
                if labeled == 0 {
                    return Err(Error::LabelingUnavailable);
                }
                warn!(
                    labeled,
                    goal = n_pretrain_labels,
                    "pretraining proceeding with a partial label set"
                );
                break;
            }
        }

        for i in 0..n_pretrain_iters {
            self.train_predictor(0);
            if i % 25 == 0 {
                info!(iter = i, total = n_pretrain_iters, "predictor pretraining");
            }
        }
        Ok(())
    }

    /// Sum of training-mode per-step scores plus the caches for backward.
    fn segment_return_train(
        &self,
        params: &NetParams,
        segment: &Segment,
        rng: &mut ChaCha8Rng,
    ) -> (f64, Vec<net::StepCache>) {
        let mut total = 0.0f64;
        let mut caches = Vec::with_capacity(segment.len());
        for step in &segment.steps {
            let (score, cache) =
                net::score_step(params, &step.observation, &step.action, Some(rng));
            total += score as f64;
            caches.push(cache.expect("training forward must cache"));
        }
        (total, caches)
    }
}

impl RewardPredictor for ComparisonRewardPredictor {
    fn predict_reward(&self, batch: &RewardBatch<'_>) -> Vec<f64> {
        debug_assert_eq!(batch.observations.len(), batch.actions.len());
        let snapshot = self.params.load();
        batch
            .observations
            .iter()
            .zip(batch.actions.iter())
            .map(|(obs, act)| net::score_step(&snapshot, obs, act, None).0 as f64)
            .collect()
    }

    fn train_predictor(&self, env_steps: u64) -> TrainOutcome {
        let target = self.schedule.n_desired_labels(env_steps);

        // Labeling and batch assembly under the collector lock; reward
        // queries never touch this lock.
        let batch: Vec<(crate::collector::Label, Arc<Segment>, Arc<Segment>)> = {
            let mut collector = self.collector.lock().expect("collector poisoned");
            collector.label_unlabeled_comparisons(target as usize, false);

            let labeled = collector.labeled_comparison_ids();
            if labeled.is_empty() {
                let state = self.state.lock().expect("train state poisoned");
                return TrainOutcome::skipped(state.iteration, 0);
            }

            let mut state = self.state.lock().expect("train state poisoned");
            let n = self.batch_size.min(labeled.len());
            (0..n)
                .filter_map(|_| {
                    let id = labeled[state.rng.gen_range(0..labeled.len())];
                    let c = collector.comparison(id)?;
                    let left = collector.segment(c.left)?;
                    let right = collector.segment(c.right)?;
                    Some((c.label, left, right))
                })
                .collect()
        };

        if batch.is_empty() {
            let state = self.state.lock().expect("train state poisoned");
            return TrainOutcome::skipped(state.iteration, 0);
        }

        let labeled_count = {
            let collector = self.collector.lock().expect("collector poisoned");
            collector.labeled_comparison_ids().len()
        };

        // Gradient step against a private clone of the current snapshot.
        let mut params = NetParams::clone(&self.params.load());
        let mut grads = params.zeros_like();
        let mut state = self.state.lock().expect("train state poisoned");

        let batch_n = batch.len() as f64;
        let mut total_loss = 0.0f64;
        for (label, left, right) in &batch {
            let (sum_l, caches_l) = self.segment_return_train(&params, left, &mut state.rng);
            let (sum_r, caches_r) = self.segment_return_train(&params, right, &mut state.rng);

            // Stable two-way softmax over summed returns.
            let m = sum_l.max(sum_r);
            let el = (sum_l - m).exp();
            let er = (sum_r - m).exp();
            let p_l = (el / (el + er)).clamp(PROB_CLAMP, 1.0 - PROB_CLAMP);
            let p_r = 1.0 - p_l;

            let (t_l, t_r) = label.target().expect("batch contains only labeled pairs");
            total_loss -= t_l * p_l.ln() + t_r * p_r.ln();

            let d_l = ((p_l - t_l) / batch_n) as f32;
            let d_r = ((p_r - t_r) / batch_n) as f32;
            for cache in &caches_l {
                net::backward_step(&params, cache, d_l, &mut grads);
            }
            for cache in &caches_r {
                net::backward_step(&params, cache, d_r, &mut grads);
            }
        }

        {
            let mut blocks = params.blocks_mut();
            let grad_blocks = grads.blocks();
            state.adam.step(&mut blocks, &grad_blocks);
        }
        state.iteration += 1;

        let loss = total_loss / batch_n;
        let outcome = TrainOutcome {
            trained: true,
            iteration: state.iteration,
            loss: Some(loss),
            labeled: labeled_count,
        };
        let iteration = state.iteration;
        state.sink.log_step(&TrainingRecord {
            iteration,
            loss,
            labeled_comparisons: labeled_count,
            requested_labels: target,
            env_steps,
            timestamp_ms: now_ms(),
        });
        drop(state);

        // Publish atomically; in-flight readers keep the old snapshot.
        self.params.store(Arc::new(params));
        outcome
    }

    fn path_callback(&self, path: &EpisodePath, env_steps: u64) {
        let target = self.schedule.n_desired_labels(env_steps) as usize;
        let mut state = self.state.lock().expect("train state poisoned");
        let clips = sampling::clips_from_trace(
            &path.steps,
            &self.env_id,
            path.episode_seed,
            self.clip_steps,
            &mut state.rng,
        );
        drop(state);
        if clips.is_empty() {
            return;
        }

        let mut collector = self.collector.lock().expect("collector poisoned");
        for clip in clips {
            collector.add_segment(clip);
        }
        // Top up comparisons toward the schedule target; labeling happens in
        // train_predictor. Backpressure: when most of the pool is still
        // awaiting labels, stop inventing until the labeler catches up.
        while collector.comparison_count() < target && collector.labeled_ratio() >= 0.5 {
            if collector.invent_comparison().is_none() {
                break;
            }
        }
    }

    fn save_checkpoint(&self, dir: &std::path::Path) -> Result<()> {
        let iteration = self.state.lock().expect("train state poisoned").iteration;
        let snapshot = self.params.load_full();
        crate::checkpoint::save(dir, &snapshot, iteration)
    }

    fn load_checkpoint(&self, dir: &std::path::Path) -> Result<()> {
        let (params, iteration) = crate::checkpoint::load(dir, &self.arch)?;
        self.state.lock().expect("train state poisoned").iteration = iteration;
        self.params.store(Arc::new(params));
        Ok(())
    }
}

// src/sampling.rs
//
// Random-rollout segment sampling for pretraining.
//
// Workers each own their environment instance and RNG; the only shared step
// is the final collection over an mpsc channel. Results are sorted by
// (worker, sequence) after collection so the output is deterministic for a
// given (seed, workers) pair regardless of thread scheduling.

use std::sync::mpsc;
use std::thread;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::env::{make_env, Environment};
use crate::error::Result;
use crate::segment::{Segment, SegmentStep};

/// At most this many clips are cut from a single episode, so segments spread
/// across episodes instead of clustering in one unlucky rollout.
const MAX_CLIPS_PER_EPISODE: usize = 3;

/// Sample `n_desired_segments` fixed-length clips from random-action
/// rollouts, parallelized across `workers` threads.
pub fn segments_from_rand_rollout(
    env_id: &str,
    n_desired_segments: usize,
    clip_length_s: f64,
    workers: usize,
    base_seed: u64,
) -> Result<Vec<Segment>> {
    // Resolve once up front so an unknown id fails before any thread spawns.
    let probe = make_env(env_id)?;
    let clip_steps = probe.spec().clip_steps(clip_length_s);
    drop(probe);

    let workers = workers.max(1);
    let per_worker = n_desired_segments.div_ceil(workers);

    info!(
        env_id,
        n_desired_segments, clip_steps, workers, "sampling random-rollout segments"
    );

    let (tx, rx) = mpsc::channel::<(usize, usize, Segment)>();
    let mut handles = Vec::with_capacity(workers);

    for worker_idx in 0..workers {
        let tx = tx.clone();
        let env_id = env_id.to_string();
        handles.push(thread::spawn(move || {
            // Each worker constructs its own environment; nothing is shared.
            let mut env = match make_env(&env_id) {
                Ok(env) => env,
                Err(_) => return,
            };
            let mut rng =
                ChaCha8Rng::seed_from_u64(base_seed.wrapping_add(worker_idx as u64 * 7919));

            for seq in 0..per_worker {
                // An episode can terminate before a full clip fits (e.g. the
                // goal is reached early); retry a few episodes before giving
                // up on this slot.
                for _ in 0..8 {
                    let episode_seed = rng.gen::<u64>();
                    if let Some(segment) = sample_segment_from_episode(
                        env.as_mut(),
                        episode_seed,
                        clip_steps,
                        &mut rng,
                    ) {
                        if tx.send((worker_idx, seq, segment)).is_err() {
                            return;
                        }
                        break;
                    }
                }
            }
        }));
    }
    drop(tx);

    let mut tagged: Vec<(usize, usize, Segment)> = rx.iter().collect();
    for handle in handles {
        let _ = handle.join();
    }

    // Deterministic order regardless of channel arrival.
    tagged.sort_by_key(|(w, s, _)| (*w, *s));
    let mut segments: Vec<Segment> = tagged.into_iter().map(|(_, _, s)| s).collect();
    segments.truncate(n_desired_segments);

    info!(collected = segments.len(), "segment sampling complete");
    Ok(segments)
}

/// Roll one random-action episode and cut a clip at a random offset.
///
/// Returns None when the episode ended before a full clip could be recorded.
fn sample_segment_from_episode(
    env: &mut dyn Environment,
    episode_seed: u64,
    clip_steps: usize,
    rng: &mut ChaCha8Rng,
) -> Option<Segment> {
    let max_steps = env.spec().max_episode_steps as usize;
    let env_id = env.spec().id.clone();

    let mut obs = env.reset(episode_seed);
    let mut trace: Vec<SegmentStep> = Vec::with_capacity(max_steps.min(1024));

    for _ in 0..max_steps {
        let action = env.random_action(rng);
        let step = env.step(&action);
        trace.push(SegmentStep {
            observation: obs,
            action,
            reward: step.reward,
        });
        obs = step.observation;
        if step.done {
            break;
        }
    }

    if trace.len() < clip_steps {
        return None;
    }
    let start = rng.gen_range(0..=trace.len() - clip_steps);
    let steps = trace[start..start + clip_steps].to_vec();
    Some(Segment::new(steps, &env_id, episode_seed, start as u64))
}

/// Cut up to [`MAX_CLIPS_PER_EPISODE`] clips from an already-recorded episode
/// trace. Used by the predictor's path callback during joint training.
pub fn clips_from_trace(
    trace: &[SegmentStep],
    env_id: &str,
    episode_seed: u64,
    clip_steps: usize,
    rng: &mut ChaCha8Rng,
) -> Vec<Segment> {
    if trace.len() < clip_steps {
        return Vec::new();
    }
    let n = MAX_CLIPS_PER_EPISODE.min(trace.len() / clip_steps);
    (0..n)
        .map(|_| {
            let start = rng.gen_range(0..=trace.len() - clip_steps);
            Segment::new(
                trace[start..start + clip_steps].to_vec(),
                env_id,
                episode_seed,
                start as u64,
            )
        })
        .collect()
}

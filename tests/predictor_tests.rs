// tests/predictor_tests.rs
//
// Integration tests for the comparison reward predictor.
//
// Tests:
// 1. Pretraining seeds the collector (segments, comparisons, labels)
// 2. Checkpoint round-trip reproduces eval-mode predictions
// 3. Checkpoint load against a different architecture is a shape error
// 4. Training on comparisons from a known monotone reward function drives
//    predicted rewards to the correct ordering (rank correlation >= 0.9)
// 5. predict_reward is safe while train_predictor runs on another thread
// 6. train_predictor skips cleanly when nothing is labeled

use std::sync::{Arc, Mutex};

use prefrl::collector::ComparisonCollector;
use prefrl::schedule::{LabelAnnealer, LabelSchedule};
use prefrl::telemetry::spearman_correlation;
use prefrl::{
    ComparisonRewardPredictor, EnvSpec, ObsShape, RewardBatch, RewardPredictor, Segment,
    SegmentStep, SyntheticComparisonCollector,
};

fn vector_spec(obs_len: usize, action_dim: usize) -> EnvSpec {
    EnvSpec {
        id: "pointmass-v0".to_string(),
        obs_shape: ObsShape::Vector { len: obs_len },
        action_dim,
        fps: 20.0,
        max_episode_steps: 400,
    }
}

fn shared_collector(seed: u64) -> Arc<Mutex<dyn ComparisonCollector>> {
    Arc::new(Mutex::new(SyntheticComparisonCollector::new(seed)))
}

/// One-step segment whose true reward equals the first observation feature.
fn monotone_segment(x: f32) -> Segment {
    Segment::new(
        vec![SegmentStep {
            observation: vec![x, 0.5 * x * x],
            action: vec![0.0],
            reward: x as f64,
        }],
        "pointmass-v0",
        0,
        0,
    )
}

fn schedule(labels: u64) -> Box<dyn LabelSchedule> {
    Box::new(LabelAnnealer::new(labels, labels, 1).unwrap())
}

#[test]
fn test_pretrain_seeds_collector_and_trains() {
    let collector = shared_collector(11);
    let predictor = ComparisonRewardPredictor::new(
        &vector_spec(2, 1),
        collector.clone(),
        schedule(20),
        0.5,
        11,
    );

    predictor.pretrain(20, 30, 2, 11).unwrap();

    let collector = collector.lock().unwrap();
    assert_eq!(collector.segment_count(), 40);
    assert_eq!(collector.comparison_count(), 20);
    assert_eq!(collector.labeled_comparison_ids().len(), 20);
    drop(collector);

    // Pretraining ran gradient steps; another call keeps advancing the
    // iteration counter without resetting schedule progress.
    let outcome = predictor.train_predictor(0);
    assert!(outcome.trained);
    assert_eq!(outcome.iteration, 31);
    assert!(outcome.loss.unwrap().is_finite());
}

#[test]
fn test_checkpoint_round_trip_reproduces_predictions() {
    let dir = tempfile::tempdir().unwrap();
    let spec = vector_spec(2, 1);

    let predictor = ComparisonRewardPredictor::new(&spec, shared_collector(3), schedule(16), 0.5, 3);
    predictor.pretrain(16, 40, 2, 3).unwrap();

    let obs: Vec<Vec<f32>> = (0..10).map(|i| vec![i as f32 * 0.2 - 1.0, 0.3]).collect();
    let act: Vec<Vec<f32>> = (0..10).map(|_| vec![0.1]).collect();
    let env_rewards = vec![0.0; 10];
    let batch = RewardBatch {
        observations: &obs,
        actions: &act,
        env_rewards: &env_rewards,
    };

    let before = predictor.predict_reward(&batch);
    predictor.save_checkpoint(dir.path()).unwrap();

    // A freshly-initialized predictor with the same architecture restores to
    // identical predictions.
    let restored =
        ComparisonRewardPredictor::new(&spec, shared_collector(99), schedule(16), 0.5, 77);
    let fresh = restored.predict_reward(&batch);
    assert!(
        before
            .iter()
            .zip(fresh.iter())
            .any(|(a, b)| (a - b).abs() > 1e-9),
        "fresh predictor should differ before restore"
    );

    restored.load_checkpoint(dir.path()).unwrap();
    let after = restored.predict_reward(&batch);
    for (a, b) in before.iter().zip(after.iter()) {
        assert!(
            (a - b).abs() < 1e-6,
            "round-trip prediction drifted: {a} vs {b}"
        );
    }
}

#[test]
fn test_checkpoint_shape_mismatch_is_fatal() {
    let dir = tempfile::tempdir().unwrap();

    let saved = ComparisonRewardPredictor::new(
        &vector_spec(2, 1),
        shared_collector(1),
        schedule(4),
        0.5,
        1,
    );
    saved.save_checkpoint(dir.path()).unwrap();

    let other = ComparisonRewardPredictor::new(
        &vector_spec(5, 2),
        shared_collector(1),
        schedule(4),
        0.5,
        1,
    );
    match other.load_checkpoint(dir.path()) {
        Err(prefrl::Error::CheckpointShape { expected, actual }) => {
            assert!(expected.contains("len: 5"), "expected side: {expected}");
            assert!(actual.contains("len: 2"), "actual side: {actual}");
        }
        other => panic!("expected CheckpointShape, got {other:?}"),
    }
}

#[test]
fn test_preference_loss_learns_monotone_reward() {
    let collector = shared_collector(7);
    {
        // Seed comparisons whose labels come from the known monotone true
        // reward r(obs) = obs[0].
        let mut c = collector.lock().unwrap();
        for i in 0..60 {
            let x = -1.0 + 2.0 * (i as f32) / 59.0;
            c.add_segment(monotone_segment(x));
        }
        for _ in 0..300 {
            c.invent_comparison().unwrap();
        }
        assert_eq!(c.label_unlabeled_comparisons(300, false), 300);
    }

    let predictor = ComparisonRewardPredictor::new(
        &vector_spec(2, 1),
        collector,
        schedule(300),
        0.5,
        7,
    )
    .with_learning_rate(5e-3)
    .with_batch_size(32);

    let mut last_loss = f64::INFINITY;
    for i in 0..1000 {
        let outcome = predictor.train_predictor(0);
        assert!(outcome.trained);
        if i == 0 {
            last_loss = outcome.loss.unwrap();
        }
    }

    // Loss should have come down from the first iteration.
    let final_outcome = predictor.train_predictor(0);
    assert!(final_outcome.loss.unwrap() < last_loss);

    // Predicted rewards must rank-correlate with the true reward.
    let xs: Vec<f32> = (0..41).map(|i| -1.0 + 2.0 * (i as f32) / 40.0).collect();
    let obs: Vec<Vec<f32>> = xs.iter().map(|&x| vec![x, 0.5 * x * x]).collect();
    let act: Vec<Vec<f32>> = xs.iter().map(|_| vec![0.0]).collect();
    let env_rewards = vec![0.0; xs.len()];
    let predicted = predictor.predict_reward(&RewardBatch {
        observations: &obs,
        actions: &act,
        env_rewards: &env_rewards,
    });

    let truth: Vec<f64> = xs.iter().map(|&x| x as f64).collect();
    let rho = spearman_correlation(&predicted, &truth);
    assert!(
        rho >= 0.9,
        "trained reward does not track true reward: spearman = {rho:.3}"
    );
}

#[test]
fn test_predict_reward_safe_under_concurrent_training() {
    let collector = shared_collector(13);
    let predictor = Arc::new(ComparisonRewardPredictor::new(
        &vector_spec(2, 1),
        collector,
        schedule(12),
        0.5,
        13,
    ));
    predictor.pretrain(12, 5, 2, 13).unwrap();

    let readers: Vec<_> = (0..4)
        .map(|r| {
            let predictor = predictor.clone();
            std::thread::spawn(move || {
                let obs = vec![vec![0.1 * r as f32, -0.2]];
                let act = vec![vec![0.05]];
                let env_rewards = vec![0.0];
                for _ in 0..300 {
                    let out = predictor.predict_reward(&RewardBatch {
                        observations: &obs,
                        actions: &act,
                        env_rewards: &env_rewards,
                    });
                    assert_eq!(out.len(), 1);
                    assert!(out[0].is_finite());
                }
            })
        })
        .collect();

    for _ in 0..50 {
        let outcome = predictor.train_predictor(0);
        assert!(outcome.trained);
    }
    for handle in readers {
        handle.join().unwrap();
    }
}

#[test]
fn test_train_skips_without_labels() {
    let predictor = ComparisonRewardPredictor::new(
        &vector_spec(2, 1),
        shared_collector(0),
        schedule(10),
        0.5,
        0,
    );
    let outcome = predictor.train_predictor(0);
    assert!(!outcome.trained);
    assert!(outcome.loss.is_none());
    assert_eq!(outcome.iteration, 0);
    assert_eq!(outcome.labeled, 0);
}

// tests/run_config_tests.rs
//
// Integration tests for configuration resolution.
//
// Tests:
// 1. Unknown predictor/agent/env kinds fail before any allocation
// 2. Pretrain label defaulting (quarter of the budget)
// 3. Derived directory layout

use prefrl::config::{AgentKind, PredictorKind, RawRunArgs, RunConfig};
use prefrl::{make_env, Error};

fn raw() -> RawRunArgs {
    RawRunArgs {
        env_id: "pointmass-v0".to_string(),
        predictor: "synth".to_string(),
        name: "Config Test".to_string(),
        seed: 7,
        workers: 2,
        n_labels: Some(800),
        pretrain_labels: None,
        num_timesteps: 100_000,
        agent: "evo".to_string(),
        pretrain_iters: 50,
        starting_beta: 0.1,
        clip_length_s: 1.5,
        no_videos: false,
        restore: false,
    }
}

#[test]
fn test_bogus_predictor_kind_fails_configuration() {
    let mut args = raw();
    args.predictor = "bogus".to_string();

    // RunConfig::resolve performs no I/O, so a failure here guarantees no
    // directories or networks were created.
    match RunConfig::resolve(args) {
        Err(Error::UnknownPredictor(kind)) => assert_eq!(kind, "bogus"),
        other => panic!("expected UnknownPredictor, got {other:?}"),
    }
}

#[test]
fn test_bogus_agent_kind_fails_configuration() {
    let mut args = raw();
    args.agent = "dqn".to_string();
    assert!(matches!(
        RunConfig::resolve(args),
        Err(Error::UnknownAgent(_))
    ));
}

#[test]
fn test_bogus_env_id_fails_before_allocation() {
    assert!(matches!(
        make_env("atari-breakout-v99"),
        Err(Error::UnknownEnv(_))
    ));
}

#[test]
fn test_resolved_kinds_and_defaults() {
    let cfg = RunConfig::resolve(raw()).unwrap();
    assert_eq!(cfg.predictor, PredictorKind::Synth);
    assert_eq!(cfg.agent, AgentKind::Evo);
    assert_eq!(cfg.pretrain_labels, 200, "quarter of the 800 budget");
    assert_eq!(cfg.experiment_name, "config-test");
    assert!(cfg.videos);
}

#[test]
fn test_directory_layout_derived_from_experiment() {
    let cfg = RunConfig::resolve(raw()).unwrap();
    assert_eq!(
        cfg.checkpoint_dir(),
        std::path::PathBuf::from("checkpoints/reward_model/config-test")
    );
    assert_eq!(cfg.segments_dir(), std::path::PathBuf::from("segments"));
    assert!(cfg
        .video_dir()
        .to_string_lossy()
        .contains("pointmass-v0-config-test"));
}

#[test]
fn test_explicit_pretrain_labels_win_over_default() {
    let mut args = raw();
    args.pretrain_labels = Some(33);
    let cfg = RunConfig::resolve(args).unwrap();
    assert_eq!(cfg.pretrain_labels, 33);
}

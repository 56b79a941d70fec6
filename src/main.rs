// src/main.rs
//
// CLI entrypoint for prefrl.
//
// Flow:
// 1. Parse + resolve the immutable RunConfig (no I/O; unknown kinds exit
//    nonzero before anything is allocated).
// 2. Build the predictor for the resolved kind, create the on-demand
//    directory layout, pretrain or restore.
// 3. Optionally wrap in the rollout-capture decorator.
// 4. Hand the predictor to the selected policy loop, then checkpoint.
//
// Run examples:
//   prefrl -e pointmass-v0 -p synth -n my-run -l 400 -t 50000
//   prefrl -e gridnav-v0 -p rl -n baseline -a threaded -t 100000
//   RUST_LOG=debug prefrl -e pointmass-v0 -p human -n live -L 20

use std::io::BufRead;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use clap::{ArgAction, Parser};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use prefrl::collector::{ComparisonCollector, HumanComparisonCollector, LabelingFrontend};
use prefrl::config::{PredictorKind, RawRunArgs, RunConfig};
use prefrl::schedule::{ConstantLabelSchedule, LabelAnnealer, LabelSchedule};
use prefrl::telemetry::FileSink;
use prefrl::{
    make_env, run_agent, ComparisonRewardPredictor, Label, Result, RewardPredictor,
    SegmentVideoRecorder, SyntheticComparisonCollector, TraditionalRLRewardPredictor,
};

/// Joint training stalls at most this long per labeling poll when the
/// predictor waits on a human.
const HUMAN_LABEL_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(
    name = "prefrl",
    about = "Train a reward model from segment preferences and drive a policy loop with it",
    version
)]
struct Args {
    /// Environment id (see `env_ids`): pointmass-v0, gridnav-v0.
    #[arg(short, long)]
    env_id: String,

    /// Predictor kind: rl | synth | human.
    #[arg(short, long)]
    predictor: String,

    /// Experiment name (slugified for paths and logs).
    #[arg(short, long)]
    name: String,

    #[arg(short, long, default_value_t = 1)]
    seed: u64,

    /// Rollout worker threads.
    #[arg(short, long, default_value_t = 4)]
    workers: usize,

    /// Total label budget; omit for an unbounded wall-clock schedule.
    #[arg(short = 'l', long)]
    n_labels: Option<u64>,

    /// Labels before joint training; defaults to n_labels / 4.
    #[arg(short = 'L', long)]
    pretrain_labels: Option<u64>,

    /// Total environment steps for the policy loop.
    #[arg(short = 't', long, default_value_t = 5_000_000)]
    num_timesteps: u64,

    /// Agent kind: hillclimb | threaded | evo.
    #[arg(short, long, default_value = "hillclimb")]
    agent: String,

    /// Gradient steps during pretraining.
    #[arg(short = 'i', long, default_value_t = 10_000)]
    pretrain_iters: u64,

    /// Initial exploration-bonus coefficient.
    #[arg(short = 'b', long, default_value_t = 0.1)]
    starting_beta: f64,

    /// Clip length in seconds.
    #[arg(short = 'c', long, default_value_t = 1.5)]
    clip_length: f64,

    /// Disable rollout captures.
    #[arg(short = 'V', long, action = ArgAction::SetTrue)]
    no_videos: bool,

    /// Restore the reward model from its checkpoint instead of pretraining.
    #[arg(short = 'R', long, action = ArgAction::SetTrue)]
    restore: bool,

    /// Verbosity: -v, -vv.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    // Resolve before touching the filesystem; a bad kind exits here with
    // nothing allocated.
    let cfg = RunConfig::resolve(RawRunArgs {
        env_id: args.env_id,
        predictor: args.predictor,
        name: args.name,
        seed: args.seed,
        workers: args.workers,
        n_labels: args.n_labels,
        pretrain_labels: args.pretrain_labels,
        num_timesteps: args.num_timesteps,
        agent: args.agent,
        pretrain_iters: args.pretrain_iters,
        starting_beta: args.starting_beta,
        clip_length_s: args.clip_length,
        no_videos: args.no_videos,
        restore: args.restore,
    })?;
    // Unknown env ids also die before allocation.
    let env_spec = make_env(&cfg.env_id)?.spec().clone();

    info!(
        env_id = %cfg.env_id,
        predictor = cfg.predictor.as_str(),
        agent = cfg.agent.as_str(),
        experiment = %cfg.experiment_name,
        seed = cfg.seed,
        "configuration resolved"
    );

    let predictor: Arc<dyn RewardPredictor> = match cfg.predictor {
        PredictorKind::Rl => Arc::new(TraditionalRLRewardPredictor::new()),
        PredictorKind::Synth | PredictorKind::Human => {
            let schedule: Box<dyn LabelSchedule> = match cfg.n_labels {
                Some(n) => Box::new(LabelAnnealer::new(
                    cfg.pretrain_labels,
                    n,
                    cfg.num_timesteps,
                )?),
                None => {
                    info!("no label limit given; requesting one label every few seconds");
                    Box::new(ConstantLabelSchedule::new(cfg.pretrain_labels))
                }
            };

            let collector: Arc<Mutex<dyn ComparisonCollector>> = match cfg.predictor {
                PredictorKind::Synth => {
                    Arc::new(Mutex::new(SyntheticComparisonCollector::new(cfg.seed)))
                }
                PredictorKind::Human => {
                    let (collector, frontend) = HumanComparisonCollector::new(cfg.seed);
                    spawn_console_labeler(frontend);
                    Arc::new(Mutex::new(collector.with_deadline(HUMAN_LABEL_WAIT)))
                }
                PredictorKind::Rl => unreachable!(),
            };

            let checkpoint_dir = cfg.checkpoint_dir();
            std::fs::create_dir_all(&checkpoint_dir)?;
            std::fs::create_dir_all(cfg.segments_dir())?;

            let sink = FileSink::create(&checkpoint_dir.join("training.jsonl"))?;
            let predictor = ComparisonRewardPredictor::new(
                &env_spec,
                collector,
                schedule,
                cfg.clip_length_s,
                cfg.seed,
            )
            .with_sink(Box::new(sink));

            if cfg.restore {
                predictor.load_checkpoint(&checkpoint_dir)?;
                info!("reward model restored from checkpoint");
            } else {
                predictor.pretrain(
                    cfg.pretrain_labels as usize,
                    cfg.pretrain_iters,
                    cfg.workers,
                    cfg.seed,
                )?;
            }
            Arc::new(predictor)
        }
    };

    let predictor: Arc<dyn RewardPredictor> = if cfg.videos {
        Arc::new(SegmentVideoRecorder::new(
            predictor,
            cfg.video_dir(),
            100,
        ))
    } else {
        predictor
    };

    let report = run_agent(&cfg, predictor.clone())?;
    info!(
        total_env_steps = report.total_env_steps,
        episodes = report.episodes,
        best_return = report.best_return,
        "joint training finished"
    );

    if cfg.predictor != PredictorKind::Rl {
        predictor.save_checkpoint(&cfg.checkpoint_dir())?;
    }
    Ok(())
}

/// Minimal terminal labeler: prints each requested comparison and reads a
/// judgment from stdin. Any richer frontend only needs to speak the same
/// request/response channel.
fn spawn_console_labeler(frontend: LabelingFrontend) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for request in frontend.requests.iter() {
            println!(
                "comparison #{}: [left] {} steps from episode {} | [right] {} steps from episode {}",
                request.comparison_id,
                request.left.len(),
                request.left.episode_seed,
                request.right.len(),
                request.right.episode_seed,
            );
            println!("prefer (l)eft, (r)ight, (e)qual, (s)kip?");

            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                warn!("stdin closed; console labeler exiting");
                return;
            }
            let label = match line.trim() {
                "l" => Label::Left,
                "r" => Label::Right,
                "e" => Label::Equal,
                _ => continue, // skipped: stays unlabeled
            };
            if frontend
                .responses
                .send(prefrl::ComparisonResponse {
                    comparison_id: request.comparison_id,
                    label,
                })
                .is_err()
            {
                return;
            }
        }
    });
}

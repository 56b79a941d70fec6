// src/bin/sample_segments.rs
//
// Research harness: sample random-rollout segments and dump them under a
// segments directory as JSONL, one file per clip, plus a metadata document.
//
// Run examples:
//   cargo run --bin sample_segments -- --env-id pointmass-v0 --count 50
//   cargo run --bin sample_segments -- --env-id gridnav-v0 --count 20 \
//       --clip-length 2.0 --workers 8 --output-dir segments/gridnav

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use prefrl::segments_from_rand_rollout;

#[derive(Debug, Parser)]
#[command(name = "sample_segments", about = "Dump random-rollout segments to disk")]
struct Args {
    #[arg(long)]
    env_id: String,

    #[arg(long, default_value_t = 50)]
    count: usize,

    #[arg(long, default_value_t = 1.5)]
    clip_length: f64,

    #[arg(long, default_value_t = 4)]
    workers: usize,

    #[arg(long, default_value_t = 1)]
    seed: u64,

    #[arg(long, default_value = "segments")]
    output_dir: PathBuf,
}

#[derive(Debug, Serialize)]
struct DumpMetadata {
    env_id: String,
    count: usize,
    clip_length_s: f64,
    workers: usize,
    seed: u64,
    clip_steps: usize,
    mean_total_reward: f64,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let segments = segments_from_rand_rollout(
        &args.env_id,
        args.count,
        args.clip_length,
        args.workers,
        args.seed,
    )?;

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;
    for (idx, segment) in segments.iter().enumerate() {
        segment.write_jsonl(&args.output_dir.join(format!("segment-{idx:05}.jsonl")))?;
    }

    let mean_total_reward = if segments.is_empty() {
        0.0
    } else {
        segments.iter().map(|s| s.total_reward()).sum::<f64>() / segments.len() as f64
    };
    let metadata = DumpMetadata {
        env_id: args.env_id,
        count: segments.len(),
        clip_length_s: args.clip_length,
        workers: args.workers,
        seed: args.seed,
        clip_steps: segments.first().map(|s| s.len()).unwrap_or(0),
        mean_total_reward,
    };
    std::fs::write(
        args.output_dir.join("metadata.json"),
        serde_json::to_string_pretty(&metadata)?,
    )?;

    info!(
        count = segments.len(),
        dir = %args.output_dir.display(),
        mean_total_reward,
        "segment dump complete"
    );
    Ok(())
}

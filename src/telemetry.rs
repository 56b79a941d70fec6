// src/telemetry.rs
//
// Training telemetry for the reward predictor and the policy loops.
//
// - TrainingRecord: one JSONL line per gradient step
// - TelemetrySink: buffered JSONL writer; NoopSink discards
// - OnlineStats: streaming mean/min/max/variance for progress log lines

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// One reward-model gradient step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub iteration: u64,
    pub loss: f64,
    pub labeled_comparisons: usize,
    pub requested_labels: u64,
    pub env_steps: u64,
    pub timestamp_ms: u64,
}

/// Sink for training records.
pub trait TrainingSink: Send {
    fn log_step(&mut self, record: &TrainingRecord);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl TrainingSink for NoopSink {
    fn log_step(&mut self, _record: &TrainingRecord) {}
}

/// JSONL file sink, one record per line.
pub struct FileSink {
    writer: BufWriter<File>,
}

impl FileSink {
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
        })
    }
}

impl TrainingSink for FileSink {
    fn log_step(&mut self, record: &TrainingRecord) {
        if let Ok(line) = serde_json::to_string(record) {
            let _ = writeln!(self.writer, "{line}");
            let _ = self.writer.flush();
        }
    }
}

/// Streaming summary statistics (Welford variance).
#[derive(Debug, Clone, Default)]
pub struct OnlineStats {
    n: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl OnlineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, x: f64) {
        if self.n == 0 {
            self.min = x;
            self.max = x;
        } else {
            self.min = self.min.min(x);
            self.max = self.max.max(x);
        }
        self.n += 1;
        let delta = x - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (x - self.mean);
    }

    pub fn n(&self) -> u64 {
        self.n
    }

    pub fn mean(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.mean
        }
    }

    pub fn min(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.min
        }
    }

    pub fn max(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.max
        }
    }

    pub fn variance(&self) -> f64 {
        if self.n < 2 {
            0.0
        } else {
            self.m2 / (self.n - 1) as f64
        }
    }

    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// Spearman rank correlation between two equal-length samples.
///
/// Used by evaluation code and tests to check that predicted rewards track
/// the true reward ordering.
pub fn spearman_correlation(x: &[f64], y: &[f64]) -> f64 {
    assert_eq!(x.len(), y.len());
    let n = x.len();
    if n < 2 {
        return 0.0;
    }

    let rank = |vals: &[f64]| -> Vec<f64> {
        let mut indexed: Vec<_> = vals.iter().enumerate().collect();
        indexed.sort_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal));
        let mut ranks = vec![0.0; n];
        for (rank, (idx, _)) in indexed.into_iter().enumerate() {
            ranks[idx] = rank as f64 + 1.0;
        }
        ranks
    };

    let rx = rank(x);
    let ry = rank(y);
    let mean = (n as f64 + 1.0) / 2.0;

    let mut num = 0.0;
    let mut dx2 = 0.0;
    let mut dy2 = 0.0;
    for i in 0..n {
        let a = rx[i] - mean;
        let b = ry[i] - mean;
        num += a * b;
        dx2 += a * a;
        dy2 += b * b;
    }
    if dx2 == 0.0 || dy2 == 0.0 {
        return 0.0;
    }
    num / (dx2 * dy2).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_online_stats_basic() {
        let mut s = OnlineStats::new();
        for x in [1.0, 2.0, 3.0, 4.0] {
            s.add(x);
        }
        assert_eq!(s.n(), 4);
        assert!((s.mean() - 2.5).abs() < 1e-12);
        assert_eq!(s.min(), 1.0);
        assert_eq!(s.max(), 4.0);
        assert!((s.variance() - 5.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_file_sink_writes_jsonl() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("train.jsonl");
        {
            let mut sink = FileSink::create(&path).unwrap();
            sink.log_step(&TrainingRecord {
                iteration: 1,
                loss: 0.693,
                labeled_comparisons: 10,
                requested_labels: 12,
                env_steps: 0,
                timestamp_ms: 0,
            });
        }
        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: TrainingRecord = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(parsed.iteration, 1);
        assert_eq!(parsed.labeled_comparisons, 10);
    }

    #[test]
    fn test_spearman_perfect_and_inverse() {
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let y_up: Vec<f64> = x.iter().map(|v| v * 10.0).collect();
        let y_down: Vec<f64> = x.iter().map(|v| -v).collect();
        assert!((spearman_correlation(&x, &y_up) - 1.0).abs() < 1e-12);
        assert!((spearman_correlation(&x, &y_down) + 1.0).abs() < 1e-12);
    }
}

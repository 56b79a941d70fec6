// src/schedule.rs
//
// Label schedules: how many labels should have been requested by a given
// point in training.
//
// - LabelAnnealer: linear in training progress from pretrain_labels to
//   final_labels, clamped at final_labels. Bounded; used with --n-labels.
// - ConstantLabelSchedule: wall-clock driven, one more label every
//   seconds_between_labels, unbounded; used without --n-labels for
//   open-ended human sessions. The clock is injectable so tests can advance
//   it manually. The progress-vs-wall-clock asymmetry between the two
//   variants is intentional, preserved behavior (see DESIGN.md).
//
// Both variants guarantee the requested count is non-decreasing over calls.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::error::{Error, Result};

/// Target cumulative label count as a function of training progress.
pub trait LabelSchedule: Send + Sync {
    /// Non-decreasing in `progress` and across calls.
    fn n_desired_labels(&self, progress: u64) -> u64;
}

/// Progress-annealed schedule: pretrain_labels at progress 0, linearly up to
/// final_labels at final_timesteps, flat afterwards.
#[derive(Debug)]
pub struct LabelAnnealer {
    pretrain_labels: u64,
    final_labels: u64,
    final_timesteps: u64,
    max_returned: AtomicU64,
}

impl LabelAnnealer {
    pub fn new(pretrain_labels: u64, final_labels: u64, final_timesteps: u64) -> Result<Self> {
        if final_labels == 0 {
            return Err(Error::InvalidConfig(
                "final_labels must be a positive integer".into(),
            ));
        }
        if pretrain_labels > final_labels {
            return Err(Error::InvalidConfig(format!(
                "pretrain_labels ({pretrain_labels}) exceeds final_labels ({final_labels})"
            )));
        }
        if final_timesteps == 0 {
            return Err(Error::InvalidConfig(
                "final_timesteps must be positive".into(),
            ));
        }
        Ok(Self {
            pretrain_labels,
            final_labels,
            final_timesteps,
            max_returned: AtomicU64::new(0),
        })
    }
}

impl LabelSchedule for LabelAnnealer {
    fn n_desired_labels(&self, progress: u64) -> u64 {
        let frac = (progress.min(self.final_timesteps) as f64) / self.final_timesteps as f64;
        let desired = self.pretrain_labels as f64
            + (self.final_labels - self.pretrain_labels) as f64 * frac;
        let desired = (desired.round() as u64).min(self.final_labels);
        // Monotone across calls even if a caller hands us jittery progress.
        self.max_returned.fetch_max(desired, Ordering::Relaxed);
        self.max_returned.load(Ordering::Relaxed)
    }
}

/// Clock abstraction for the constant schedule; tests install a manual one.
pub trait Clock: Send + Sync {
    fn elapsed_secs(&self) -> f64;
}

/// Real wall clock starting at construction.
pub struct WallClock {
    started: Instant,
}

impl Default for WallClock {
    fn default() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Clock for WallClock {
    fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

/// Unbounded wall-clock schedule: pretrain_labels immediately, then one more
/// label every `seconds_between_labels`.
pub struct ConstantLabelSchedule {
    pretrain_labels: u64,
    seconds_between_labels: f64,
    clock: Box<dyn Clock>,
    max_returned: AtomicU64,
}

impl ConstantLabelSchedule {
    pub const DEFAULT_SECONDS_BETWEEN_LABELS: f64 = 6.0;

    pub fn new(pretrain_labels: u64) -> Self {
        Self::with_clock(pretrain_labels, Box::<WallClock>::default())
    }

    pub fn with_clock(pretrain_labels: u64, clock: Box<dyn Clock>) -> Self {
        Self {
            pretrain_labels,
            seconds_between_labels: Self::DEFAULT_SECONDS_BETWEEN_LABELS,
            clock,
            max_returned: AtomicU64::new(0),
        }
    }

    pub fn with_rate(mut self, seconds_between_labels: f64) -> Self {
        self.seconds_between_labels = seconds_between_labels.max(f64::EPSILON);
        self
    }
}

impl LabelSchedule for ConstantLabelSchedule {
    fn n_desired_labels(&self, _progress: u64) -> u64 {
        let extra = (self.clock.elapsed_secs() / self.seconds_between_labels) as u64;
        let desired = self.pretrain_labels + extra;
        self.max_returned.fetch_max(desired, Ordering::Relaxed);
        self.max_returned.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64 as TestAtomic;
    use std::sync::Arc;

    struct ManualClock(Arc<TestAtomic>);

    impl Clock for ManualClock {
        fn elapsed_secs(&self) -> f64 {
            self.0.load(Ordering::Relaxed) as f64
        }
    }

    #[test]
    fn test_annealer_endpoints_and_midpoint() {
        let s = LabelAnnealer::new(100, 1000, 1_000_000).unwrap();
        assert_eq!(s.n_desired_labels(0), 100);
        assert_eq!(s.n_desired_labels(500_000), 550);
        assert_eq!(s.n_desired_labels(1_000_000), 1000);
        assert_eq!(s.n_desired_labels(5_000_000), 1000);
    }

    #[test]
    fn test_annealer_monotone_and_bounded() {
        let s = LabelAnnealer::new(10, 500, 100_000).unwrap();
        let mut prev = 0;
        for progress in (0..200_000).step_by(1_000) {
            let n = s.n_desired_labels(progress);
            assert!(n >= prev, "decreased at progress {progress}");
            assert!(n <= 500);
            prev = n;
        }
        // Backwards progress cannot lower the requested count.
        assert_eq!(s.n_desired_labels(0), prev);
    }

    #[test]
    fn test_annealer_rejects_zero_final_labels() {
        assert!(matches!(
            LabelAnnealer::new(0, 0, 1000),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            LabelAnnealer::new(50, 10, 1000),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_constant_schedule_grows_with_clock() {
        let ticks = Arc::new(TestAtomic::new(0));
        let s = ConstantLabelSchedule::with_clock(25, Box::new(ManualClock(ticks.clone())))
            .with_rate(6.0);

        assert_eq!(s.n_desired_labels(0), 25);
        ticks.store(5, Ordering::Relaxed);
        assert_eq!(s.n_desired_labels(0), 25);
        ticks.store(6, Ordering::Relaxed);
        assert_eq!(s.n_desired_labels(0), 26);
        ticks.store(60, Ordering::Relaxed);
        assert_eq!(s.n_desired_labels(0), 35);
        // Ignores training progress entirely.
        assert_eq!(s.n_desired_labels(u64::MAX), 35);
    }

    #[test]
    fn test_constant_schedule_monotone_under_clock_regression() {
        let ticks = Arc::new(TestAtomic::new(60));
        let s = ConstantLabelSchedule::with_clock(0, Box::new(ManualClock(ticks.clone())))
            .with_rate(1.0);
        assert_eq!(s.n_desired_labels(0), 60);
        ticks.store(10, Ordering::Relaxed);
        assert_eq!(s.n_desired_labels(0), 60);
    }
}

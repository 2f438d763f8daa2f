//! Per-user counters

use std::time::{Duration, Instant};

use crate::event::MetricCategory;

/// Counters kept by each virtual user
///
/// Only the owning user writes these; the scheduler reads them once the user
/// has stopped.
#[derive(Debug, Default, Clone)]
pub struct UserStats {
    /// Behaviors selected and invoked
    pub iterations: usize,

    /// Requests classified as success
    pub successes: usize,

    /// Requests that received an unacceptable status
    pub failures: usize,

    /// Requests that received no status
    pub exceptions: usize,

    /// Behaviors that returned an error or panicked
    pub behavior_errors: usize,

    /// User start time
    pub started_at: Option<Instant>,

    /// User stop time
    pub ended_at: Option<Instant>,
}

impl UserStats {
    /// Create new empty stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start time
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    /// Record the stop time
    pub fn stop(&mut self) {
        self.ended_at = Some(Instant::now());
    }

    /// Requests issued, whatever their outcome
    pub fn total_requests(&self) -> usize {
        self.successes + self.failures + self.exceptions
    }

    /// Fraction of requests that succeeded (0.0 - 1.0)
    pub fn success_rate(&self) -> f64 {
        if self.total_requests() == 0 {
            0.0
        } else {
            self.successes as f64 / self.total_requests() as f64
        }
    }

    /// Fraction of requests that did not succeed (0.0 - 1.0)
    pub fn error_rate(&self) -> f64 {
        if self.total_requests() == 0 {
            0.0
        } else {
            1.0 - self.success_rate()
        }
    }

    /// Time since start, frozen once stopped
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.map(|start| {
            self.ended_at
                .map(|end| end.duration_since(start))
                .unwrap_or_else(|| start.elapsed())
        })
    }

    /// Requests per second over the user's lifetime
    pub fn requests_per_second(&self) -> f64 {
        self.elapsed()
            .map(|d| {
                let secs = d.as_secs_f64();
                if secs > 0.0 {
                    self.total_requests() as f64 / secs
                } else {
                    0.0
                }
            })
            .unwrap_or(0.0)
    }

    /// Count one request outcome
    pub fn record(&mut self, category: MetricCategory) {
        match category {
            MetricCategory::Success => self.successes += 1,
            MetricCategory::Failure => self.failures += 1,
            MetricCategory::Exception => self.exceptions += 1,
        }
    }

    /// Count a behavior that failed as a whole
    pub fn record_behavior_error(&mut self) {
        self.behavior_errors += 1;
    }

    /// Add another user's counters to these
    pub fn merge(&mut self, other: &UserStats) {
        self.iterations += other.iterations;
        self.successes += other.successes;
        self.failures += other.failures;
        self.exceptions += other.exceptions;
        self.behavior_errors += other.behavior_errors;
    }
}

//! Result aggregation from multiple virtual users

use std::time::Duration;

use crate::user::UserStats;

/// Totals for one finished run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Users that were launched
    pub users_started: usize,

    /// Behaviors selected across all users
    pub iterations: usize,

    /// Requests classified as success
    pub successes: usize,

    /// Requests with an unacceptable status
    pub failures: usize,

    /// Requests without a status
    pub exceptions: usize,

    /// Behaviors that returned an error or panicked
    pub behavior_errors: usize,

    /// Wall-clock length of the run
    pub elapsed: Duration,

    /// Requests per second over the run
    pub requests_per_second: f64,

    /// Per-user counters, in start order
    pub per_user: Vec<UserStats>,
}

impl RunReport {
    /// Requests issued, whatever their outcome
    pub fn total_requests(&self) -> usize {
        self.successes + self.failures + self.exceptions
    }

    /// Fraction of requests that succeeded (0.0 - 1.0)
    pub fn success_rate(&self) -> f64 {
        let total = self.total_requests();
        if total > 0 {
            self.successes as f64 / total as f64
        } else {
            0.0
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
}

/// Aggregate counters from every user of a run lasting `elapsed`
///
/// When `elapsed` is zero the longest user lifetime is used instead.
pub fn aggregate_user_stats(stats: &[UserStats], elapsed: Duration) -> RunReport {
    if stats.is_empty() {
        return RunReport {
            elapsed,
            ..Default::default()
        };
    }

    let mut totals = UserStats::new();
    for user in stats {
        totals.merge(user);
    }

    let elapsed = if elapsed.is_zero() {
        stats
            .iter()
            .filter_map(|s| s.elapsed())
            .max()
            .unwrap_or(Duration::ZERO)
    } else {
        elapsed
    };

    let secs = elapsed.as_secs_f64();
    let requests_per_second = if secs > 0.0 {
        totals.total_requests() as f64 / secs
    } else {
        0.0
    };

    RunReport {
        users_started: stats.len(),
        iterations: totals.iterations,
        successes: totals.successes,
        failures: totals.failures,
        exceptions: totals.exceptions,
        behavior_errors: totals.behavior_errors,
        elapsed,
        requests_per_second,
        per_user: stats.to_vec(),
    }
}

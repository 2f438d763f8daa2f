//! User spawn pacing

use std::time::Duration;

use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};

/// Paces user starts at a fixed number of users per second
///
/// Uses a token bucket with a burst of one, so the first user starts at once
/// and each following user one interval later.
pub struct RampLimiter {
    limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    users_per_sec: f64,
}

impl RampLimiter {
    /// Create a limiter; a rate of 0 (or anything non-positive) starts users at once
    ///
    /// ```
    /// use loadgen_core::RampLimiter;
    ///
    /// let ramp = RampLimiter::new(2.0);
    /// assert_eq!(ramp.interval(), Some(std::time::Duration::from_millis(500)));
    ///
    /// assert!(!RampLimiter::new(0.0).is_enabled());
    /// ```
    pub fn new(users_per_sec: f64) -> Self {
        let limiter = Self::period(users_per_sec)
            .and_then(Quota::with_period)
            .map(RateLimiter::direct);

        Self {
            limiter,
            users_per_sec,
        }
    }

    /// Start every user immediately
    pub fn unlimited() -> Self {
        Self::new(0.0)
    }

    fn period(users_per_sec: f64) -> Option<Duration> {
        if !users_per_sec.is_finite() || users_per_sec <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(1.0 / users_per_sec).ok()
    }

    /// Wait until the next user may start
    pub async fn until_ready(&self) {
        if let Some(ref limiter) = self.limiter {
            limiter.until_ready().await;
        }
    }

    /// Whether starts are paced at all
    pub fn is_enabled(&self) -> bool {
        self.limiter.is_some()
    }

    /// Configured rate in users per second
    pub fn users_per_sec(&self) -> f64 {
        self.users_per_sec
    }

    /// Gap between two user starts, if paced
    pub fn interval(&self) -> Option<Duration> {
        if self.is_enabled() {
            Self::period(self.users_per_sec)
        } else {
            None
        }
    }
}

impl std::fmt::Debug for RampLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RampLimiter")
            .field("enabled", &self.is_enabled())
            .field("users_per_sec", &self.users_per_sec)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_ramp_disabled_for_zero_and_invalid_rates() {
        assert!(!RampLimiter::unlimited().is_enabled());
        assert!(!RampLimiter::new(-1.0).is_enabled());
        assert!(!RampLimiter::new(f64::NAN).is_enabled());
        assert!(RampLimiter::new(0.0).interval().is_none());
    }

    #[test]
    fn test_fractional_rate_interval() {
        let ramp = RampLimiter::new(0.5);
        assert!(ramp.is_enabled());
        assert_eq!(ramp.interval(), Some(Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn test_unlimited_never_waits() {
        let ramp = RampLimiter::unlimited();
        let start = Instant::now();
        for _ in 0..100 {
            ramp.until_ready().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_ramp_spaces_starts() {
        let ramp = RampLimiter::new(50.0);
        let start = Instant::now();
        for _ in 0..5 {
            ramp.until_ready().await;
        }
        // First start is immediate, the remaining four are 20ms apart.
        assert!(start.elapsed() >= Duration::from_millis(75));
    }
}

//! Run configuration types

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};

use crate::error::SetupError;

/// Longest accepted run duration (100 years)
pub const MAX_RUN_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 3_600);

/// Run configuration
///
/// Supplied once when a run starts and read-only afterwards. Shared by every
/// virtual user in the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Base address of the service under test (e.g. `http://localhost:5115`)
    pub target_host: String,

    /// Number of virtual users to start
    pub user_count: usize,

    /// Users started per second during ramp-up (0 = all at once)
    pub ramp_up_rate: f64,

    /// Optional wall-clock bound on the whole run
    #[serde(
        with = "duration_secs",
        skip_serializing_if = "Option::is_none",
        rename = "run_duration_secs"
    )]
    pub run_duration: Option<Duration>,

    /// Pause between two behaviors of the same user
    pub think_time: ThinkTime,

    /// Optional bound on task selections summed over all users
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<usize>,

    /// Seed for per-user random number generators (user `i` uses `seed + i`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            target_host: "http://localhost:5115".to_string(),
            user_count: 1,
            ramp_up_rate: 0.0,
            run_duration: None,
            think_time: ThinkTime::default(),
            max_iterations: None,
            seed: None,
        }
    }
}

impl RunConfig {
    /// Create a config for the given host and user count
    pub fn new(target_host: impl Into<String>, user_count: usize) -> Self {
        Self {
            target_host: target_host.into(),
            user_count,
            ..Default::default()
        }
    }

    /// Set the ramp-up rate in users per second
    pub fn with_ramp_up_rate(mut self, users_per_sec: f64) -> Self {
        self.ramp_up_rate = users_per_sec;
        self
    }

    /// Bound the run by wall-clock time
    pub fn with_run_duration(mut self, duration: Duration) -> Self {
        self.run_duration = Some(duration);
        self
    }

    /// Set the think-time range
    pub fn with_think_time(mut self, think_time: ThinkTime) -> Self {
        self.think_time = think_time;
        self
    }

    /// Bound the run by total task selections
    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = Some(iterations);
        self
    }

    /// Make per-user randomness reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SetupError> {
        if !self.ramp_up_rate.is_finite() || self.ramp_up_rate < 0.0 {
            return Err(SetupError::InvalidRampUp(self.ramp_up_rate));
        }

        self.think_time.validate()?;

        if self.target_host.trim().is_empty() {
            return Err(SetupError::InvalidTarget {
                host: self.target_host.clone(),
                detail: "host must not be empty".into(),
            });
        }

        if let Some(duration) = self.run_duration {
            if duration.is_zero() {
                return Err(SetupError::InvalidOption {
                    option: "run_duration",
                    detail: "run duration must be greater than zero".into(),
                });
            }
            if duration > MAX_RUN_DURATION {
                return Err(SetupError::InvalidOption {
                    option: "run_duration",
                    detail: format!(
                        "run duration of {}s exceeds the limit of {}s",
                        duration.as_secs(),
                        MAX_RUN_DURATION.as_secs()
                    ),
                });
            }
        }

        Ok(())
    }
}

/// Uniform think-time range in milliseconds, inclusive on both ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkTime {
    /// Shortest pause
    pub min_ms: u64,
    /// Longest pause
    pub max_ms: u64,
}

impl Default for ThinkTime {
    fn default() -> Self {
        ThinkTimeProfile::Default.think_time()
    }
}

impl ThinkTime {
    /// Create a range, rejecting `min_ms > max_ms`
    pub fn between(min_ms: u64, max_ms: u64) -> Result<Self, SetupError> {
        let think_time = Self { min_ms, max_ms };
        think_time.validate()?;
        Ok(think_time)
    }

    /// No pause at all
    pub fn none() -> Self {
        Self {
            min_ms: 0,
            max_ms: 0,
        }
    }

    /// Validate bounds
    pub fn validate(&self) -> Result<(), SetupError> {
        if self.min_ms > self.max_ms {
            return Err(SetupError::InvalidThinkTime {
                min_ms: self.min_ms,
                max_ms: self.max_ms,
            });
        }
        Ok(())
    }

    /// Draw a pause uniformly from `[min_ms, max_ms]`
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.min_ms >= self.max_ms {
            return Duration::from_millis(self.min_ms);
        }
        let ms = Uniform::new_inclusive(self.min_ms, self.max_ms).sample(rng);
        Duration::from_millis(ms)
    }
}

/// Named think-time presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkTimeProfile {
    /// 1-3 seconds between tasks
    #[default]
    Default,
    /// Fewer users, shorter pauses
    Quick,
    /// Aggressive timing
    Stress,
    /// Long pauses for soak runs
    Endurance,
}

impl ThinkTimeProfile {
    /// The think-time range this profile stands for
    pub fn think_time(&self) -> ThinkTime {
        let (min_ms, max_ms) = match self {
            ThinkTimeProfile::Default => (1_000, 3_000),
            ThinkTimeProfile::Quick => (500, 1_500),
            ThinkTimeProfile::Stress => (100, 500),
            ThinkTimeProfile::Endurance => (5_000, 10_000),
        };
        ThinkTime { min_ms, max_ms }
    }

    /// Identifier used on the command line and in config files
    pub fn id(&self) -> &'static str {
        match self {
            ThinkTimeProfile::Default => "default",
            ThinkTimeProfile::Quick => "quick",
            ThinkTimeProfile::Stress => "stress",
            ThinkTimeProfile::Endurance => "endurance",
        }
    }

    /// All presets
    pub fn all() -> &'static [ThinkTimeProfile] {
        &[
            ThinkTimeProfile::Default,
            ThinkTimeProfile::Quick,
            ThinkTimeProfile::Stress,
            ThinkTimeProfile::Endurance,
        ]
    }
}

impl fmt::Display for ThinkTimeProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ThinkTimeProfile {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ThinkTimeProfile::all()
            .iter()
            .copied()
            .find(|p| p.id().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| SetupError::InvalidOption {
                option: "profile",
                detail: format!("unknown profile '{s}'"),
            })
    }
}

/// Serializes `Option<Duration>` as fractional seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_f64(d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        match Option::<f64>::deserialize(d)? {
            Some(secs) => Duration::try_from_secs_f64(secs).map(Some).map_err(|_| {
                serde::de::Error::custom(format!(
                    "run duration must be a representable non-negative number of seconds, got {secs}"
                ))
            }),
            None => Ok(None),
        }
    }
}

//! Error types for loadgen-core
//!
//! Only [`SetupError`] ever aborts a run. Everything that goes wrong once users
//! are running (bad responses, failing behaviors, broken listeners) is turned
//! into a metric event or a log line instead.

use thiserror::Error;

/// Error raised by a behavior during one iteration.
///
/// Boxed so behaviors can use `?` on any error type. Caught by the virtual user
/// and recorded as an `exception` event.
pub type BehaviorError = Box<dyn std::error::Error + Send + Sync>;

/// Error raised by an event listener. Logged and discarded by the bus.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Invalid configuration detected before any virtual user starts
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SetupError {
    /// Task weight below 1
    #[error("invalid weight {weight} for task '{task}': weight must be at least 1")]
    InvalidWeight {
        /// Name of the offending task
        task: String,
        /// The rejected weight
        weight: u32,
    },

    /// Think-time bounds out of order
    #[error("invalid think time: min {min_ms}ms is greater than max {max_ms}ms")]
    InvalidThinkTime {
        /// Lower bound in milliseconds
        min_ms: u64,
        /// Upper bound in milliseconds
        max_ms: u64,
    },

    /// Ramp-up rate negative or not a number
    #[error("invalid ramp-up rate {0}: must be a finite value >= 0")]
    InvalidRampUp(f64),

    /// Target host that cannot be parsed
    #[error("invalid target host '{host}': {detail}")]
    InvalidTarget {
        /// The host as supplied
        host: String,
        /// Parser detail
        detail: String,
    },

    /// Users requested but no tasks registered
    #[error("task table is empty: register at least one task before starting users")]
    EmptyTaskTable,

    /// Required builder field not supplied
    #[error("missing required configuration: {0}")]
    MissingConfig(&'static str),

    /// Any other invalid option
    #[error("invalid value for {option}: {detail}")]
    InvalidOption {
        /// Option name
        option: &'static str,
        /// Explanation
        detail: String,
    },
}

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("setup error: {0}")]
    Setup(#[from] SetupError),

    /// The run supervisor task panicked or was cancelled
    #[error("run supervisor failed: {0}")]
    Join(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Join(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

//! Metric and lifecycle events

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::request::{Method, RequestOutcome};

/// How a request attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricCategory {
    /// A status was obtained and it was acceptable
    Success,
    /// A status was obtained but it was not acceptable
    Failure,
    /// No status was obtained, or the behavior itself failed
    Exception,
}

impl MetricCategory {
    /// Lower-case identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricCategory::Success => "success",
            MetricCategory::Failure => "failure",
            MetricCategory::Exception => "exception",
        }
    }

    /// Whether this category counts as success
    pub fn is_success(&self) -> bool {
        matches!(self, MetricCategory::Success)
    }
}

impl fmt::Display for MetricCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured record of a request outcome
///
/// Built by a virtual user right after the executor returns and never mutated
/// afterwards. Listeners that want to keep events clone them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEvent {
    /// Outcome classification
    pub category: MetricCategory,
    /// Report name (request name, or behavior name for behavior errors)
    pub name: String,
    /// Request method; `None` for events not tied to a single request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_type: Option<Method>,
    /// Latency in milliseconds
    pub latency_ms: f64,
    /// Response size in bytes
    pub payload_size: usize,
    /// Response status, if one was obtained
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Error description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Free-form context attached by the behavior
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
    /// Virtual user that produced the event
    pub user_id: usize,
    /// When the event was created
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl MetricEvent {
    /// Build an event from a request outcome
    pub fn from_outcome(
        name: impl Into<String>,
        method: Method,
        outcome: &RequestOutcome,
        category: MetricCategory,
        context: HashMap<String, String>,
        user_id: usize,
    ) -> Self {
        let error = match (&outcome.error, category, outcome.status_code) {
            (Some(e), _, _) => Some(e.clone()),
            (None, MetricCategory::Failure, Some(code)) => Some(format!("HTTP {code}")),
            _ => None,
        };

        Self {
            category,
            name: name.into(),
            request_type: Some(method),
            latency_ms: outcome.latency_ms,
            payload_size: outcome.payload_size,
            status_code: outcome.status_code,
            error,
            context,
            user_id,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Build an `exception` event for a behavior that failed as a whole
    pub fn behavior_error(
        name: impl Into<String>,
        error: impl Into<String>,
        latency_ms: f64,
        user_id: usize,
    ) -> Self {
        Self {
            category: MetricCategory::Exception,
            name: name.into(),
            request_type: None,
            latency_ms,
            payload_size: 0,
            status_code: None,
            error: Some(error.into()),
            context: HashMap::new(),
            user_id,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Run-level events delivered to listeners next to metric events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// Emitted once before the first user starts
    RunStarted {
        /// Target host of the run
        target_host: String,
        /// Users that will be started
        user_count: usize,
        /// When the run started
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    /// Emitted once after the last user stopped
    RunStopped {
        /// Wall-clock length of the run
        elapsed: Duration,
        /// When the run stopped
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Decides whether a response status counts as success
///
/// The default accepts exactly 200.
#[derive(Clone)]
pub struct Classifier {
    accept: Arc<dyn Fn(u16) -> bool + Send + Sync>,
    description: String,
}

impl Classifier {
    /// Accept exactly `status`
    pub fn expect(status: u16) -> Self {
        Self {
            accept: Arc::new(move |code| code == status),
            description: format!("status == {status}"),
        }
    }

    /// Accept any 2xx status
    pub fn any_2xx() -> Self {
        Self {
            accept: Arc::new(|code| (200..300).contains(&code)),
            description: "2xx".to_string(),
        }
    }

    /// Accept whatever `predicate` accepts
    pub fn from_fn<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(u16) -> bool + Send + Sync + 'static,
    {
        Self {
            accept: Arc::new(predicate),
            description: description.into(),
        }
    }

    /// Whether `status` is acceptable
    pub fn accepts(&self, status: u16) -> bool {
        (self.accept)(status)
    }

    /// Classify an outcome; `expected` overrides the predicate for one request
    pub fn classify(&self, outcome: &RequestOutcome, expected: Option<u16>) -> MetricCategory {
        match outcome.status_code {
            None => MetricCategory::Exception,
            Some(code) => {
                let accepted = match expected {
                    Some(expected) => code == expected,
                    None => self.accepts(code),
                };
                if accepted {
                    MetricCategory::Success
                } else {
                    MetricCategory::Failure
                }
            }
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::expect(200)
    }
}

impl fmt::Debug for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Classifier")
            .field("accepts", &self.description)
            .finish()
    }
}

//! HTTP client configuration

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for the connection pool shared by all virtual users
///
/// Times are plain integers so the struct reads naturally in a JSON config
/// file (`"http": { "request_timeout_ms": 5000 }`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Limit on a whole exchange, body included
    pub request_timeout_ms: u64,

    /// Limit on establishing a connection
    pub connect_timeout_ms: u64,

    /// How long an unused pooled connection is kept open
    pub idle_connection_secs: u64,

    /// Idle connections kept for the target host
    pub max_idle_connections: usize,

    /// Follow 3xx responses instead of reporting them
    pub follow_redirects: bool,

    /// Sent with every request
    pub headers: BTreeMap<String, String>,

    /// `User-Agent` header value
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 60_000,
            connect_timeout_ms: 10_000,
            idle_connection_secs: 90,
            max_idle_connections: 32,
            follow_redirects: true,
            headers: BTreeMap::new(),
            user_agent: format!("loadgen/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpConfig {
    /// Set the per-request limit
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the connect limit
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = duration_ms(timeout);
        self
    }

    /// Add a header sent with every request
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Follow or report redirects
    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    /// Per-request limit as a [`Duration`]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Connect limit as a [`Duration`]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Pooled connection idle limit as a [`Duration`]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_connection_secs)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

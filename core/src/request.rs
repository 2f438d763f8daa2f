//! Requests, outcomes and the transport seam

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Request parameters, sent by the transport as it sees fit (query string for HTTP)
pub type Params = HashMap<String, String>;

/// Request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET
    #[default]
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl Method {
    /// Upper-case method name
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request a behavior wants to issue
///
/// Built with the small builder methods:
///
/// ```
/// use loadgen_core::Request;
///
/// let request = Request::post("/chromadb/search")
///     .param("query", "vector database embeddings")
///     .name("search_text")
///     .context("query", "vector database embeddings");
/// assert_eq!(request.report_name(), "search_text");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Request method
    pub method: Method,
    /// Path relative to the target host
    pub path: String,
    /// Request parameters
    pub params: Params,
    /// Name used for reporting; defaults to the path
    pub name: Option<String>,
    /// Extra key/values copied into the resulting metric event
    pub context: HashMap<String, String>,
    /// Status that counts as success for this request, overriding the run default
    pub expected_status: Option<u16>,
}

impl Request {
    /// Create a request
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Params::new(),
            name: None,
            context: HashMap::new(),
            expected_status: None,
        }
    }

    /// GET request
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// POST request
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    /// Add a parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Set the report name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach context to the resulting metric event
    pub fn context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Treat exactly `status` as success for this request
    pub fn expect_status(mut self, status: u16) -> Self {
        self.expected_status = Some(status);
        self
    }

    /// Name used in metric events
    pub fn report_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.path)
    }
}

/// Result of one request attempt
///
/// A missing `status_code` means no response was obtained (transport error).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestOutcome {
    /// Response status, if any response arrived
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Response body size in bytes
    pub payload_size: usize,
    /// Time from just before dispatch until the response (or failure) was observed
    pub latency_ms: f64,
    /// Error description, set for transport errors and error statuses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RequestOutcome {
    /// Outcome for a response that arrived
    pub fn response(status_code: u16, payload_size: usize, latency_ms: f64) -> Self {
        Self {
            status_code: Some(status_code),
            payload_size,
            latency_ms,
            error: None,
        }
    }

    /// Outcome for a request that produced no response
    pub fn transport_error(error: impl Into<String>, latency_ms: f64) -> Self {
        Self {
            status_code: None,
            payload_size: 0,
            latency_ms,
            error: Some(error.into()),
        }
    }

    /// Attach an error description
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Whether a response status was obtained
    pub fn has_status(&self) -> bool {
        self.status_code.is_some()
    }
}

/// Milliseconds elapsed since `start`
pub fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Transport used by virtual users to reach the service under test
///
/// Implementations own connection handling and must measure `latency_ms`
/// themselves. Ordinary failures (refused connections, timeouts, error
/// statuses) are reported through the returned outcome, never as a panic.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    /// Identifier used in logs (e.g. "http")
    fn name(&self) -> &str;

    /// Issue one request and report how it went
    async fn execute(&self, request: &Request) -> RequestOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = Request::post("/chromadb/add")
            .param("text", "hello")
            .context("source", "seed")
            .expect_status(201);

        assert_eq!(request.method, Method::Post);
        assert_eq!(request.params.get("text").map(String::as_str), Some("hello"));
        assert_eq!(request.context.get("source").map(String::as_str), Some("seed"));
        assert_eq!(request.expected_status, Some(201));
        assert_eq!(request.report_name(), "/chromadb/add");
    }

    #[test]
    fn test_request_report_name_override() {
        let request = Request::get("/health").name("health_check");
        assert_eq!(request.report_name(), "health_check");
    }

    #[test]
    fn test_outcome_constructors() {
        let ok = RequestOutcome::response(200, 42, 1.5);
        assert!(ok.has_status());
        assert!(ok.error.is_none());

        let err = RequestOutcome::transport_error("connection refused", 0.3);
        assert!(!err.has_status());
        assert_eq!(err.payload_size, 0);
        assert_eq!(err.error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_method_display() {
        assert_eq!(Method::Post.to_string(), "POST");
        assert_eq!(serde_json::to_string(&Method::Delete).unwrap(), "\"DELETE\"");
    }
}

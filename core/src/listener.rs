//! Logging listener

use crate::bus::EventListener;
use crate::error::ListenerError;
use crate::event::{LifecycleEvent, MetricEvent};

/// Writes every event to `tracing`
///
/// Failed requests are logged at `error`, successful ones at `debug`, run
/// start and stop at `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogListener;

impl LogListener {
    /// Create the listener
    pub fn new() -> Self {
        Self
    }
}

impl EventListener for LogListener {
    fn name(&self) -> &str {
        "log"
    }

    fn on_event(&self, event: &MetricEvent) -> Result<(), ListenerError> {
        if event.category.is_success() {
            tracing::debug!(
                name = %event.name,
                user_id = event.user_id,
                latency_ms = event.latency_ms,
                "Request successful"
            );
        } else {
            tracing::error!(
                name = %event.name,
                user_id = event.user_id,
                category = %event.category,
                status = ?event.status_code,
                error = event.error.as_deref().unwrap_or("unknown"),
                "Request failed"
            );
        }
        Ok(())
    }

    fn on_lifecycle(&self, event: &LifecycleEvent) -> Result<(), ListenerError> {
        match event {
            LifecycleEvent::RunStarted {
                target_host,
                user_count,
                ..
            } => {
                tracing::info!(target_host = %target_host, users = user_count, "Load test started");
            }
            LifecycleEvent::RunStopped { elapsed, .. } => {
                tracing::info!(elapsed_secs = elapsed.as_secs_f64(), "Load test completed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MetricCategory;
    use crate::request::{Method, RequestOutcome};
    use std::collections::HashMap;

    #[test]
    fn test_log_listener_never_fails() {
        let listener = LogListener::new();
        for (outcome, category) in [
            (RequestOutcome::response(200, 1, 1.0), MetricCategory::Success),
            (RequestOutcome::response(503, 0, 1.0), MetricCategory::Failure),
            (
                RequestOutcome::transport_error("timeout", 1.0),
                MetricCategory::Exception,
            ),
        ] {
            let event = MetricEvent::from_outcome(
                "search_text",
                Method::Post,
                &outcome,
                category,
                HashMap::new(),
                0,
            );
            assert!(listener.on_event(&event).is_ok());
        }

        let stopped = LifecycleEvent::RunStopped {
            elapsed: std::time::Duration::from_secs(1),
            timestamp: chrono::Utc::now(),
        };
        assert!(listener.on_lifecycle(&stopped).is_ok());
        assert_eq!(listener.name(), "log");
    }
}

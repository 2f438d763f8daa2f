//! Running statistics over the metric event stream
//!
//! [`StatsCollector`] is an [`EventListener`] that keeps per-request-name
//! counters and latency histograms. It can be registered on a bus and read at
//! any time with [`StatsCollector::snapshot`].

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};

use crate::bus::EventListener;
use crate::error::ListenerError;
use crate::event::{LifecycleEvent, MetricCategory, MetricEvent};
use crate::request::Method;

/// Largest recordable latency: one hour, in microseconds
const MAX_LATENCY_MICROS: u64 = 3_600_000_000;

/// Latency percentiles (all values in milliseconds)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct LatencyPercentiles {
    /// Minimum value
    pub min: f64,
    /// 50th percentile (median)
    pub p50: f64,
    /// 75th percentile
    pub p75: f64,
    /// 90th percentile
    pub p90: f64,
    /// 95th percentile
    pub p95: f64,
    /// 99th percentile
    pub p99: f64,
    /// Maximum value
    pub max: f64,
    /// Mean value
    pub mean: f64,
    /// Standard deviation
    pub stddev: f64,
}

/// HdrHistogram of latencies with microsecond precision
pub struct LatencyHistogram {
    // None only if hdrhistogram rejected the bounds.
    histogram: Option<Histogram<u64>>,
}

impl LatencyHistogram {
    /// Histogram covering 1µs to one hour at 3 significant figures
    pub fn new() -> Self {
        Self {
            histogram: Histogram::new_with_bounds(1, MAX_LATENCY_MICROS, 3).ok(),
        }
    }

    /// Record a value in milliseconds; values above one hour are clamped
    pub fn record_ms(&mut self, ms: f64) {
        if let Some(histogram) = self.histogram.as_mut() {
            let micros = (ms.max(0.0) * 1000.0) as u64;
            let _ = histogram.record(micros.clamp(1, MAX_LATENCY_MICROS));
        }
    }

    /// Number of recorded values
    pub fn len(&self) -> u64 {
        self.histogram.as_ref().map_or(0, |h| h.len())
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Percentiles of everything recorded so far
    pub fn percentiles(&self) -> LatencyPercentiles {
        let Some(h) = self.histogram.as_ref().filter(|h| !h.is_empty()) else {
            return LatencyPercentiles::default();
        };

        let ms = |micros: u64| micros as f64 / 1000.0;
        LatencyPercentiles {
            min: ms(h.min()),
            p50: ms(h.value_at_quantile(0.50)),
            p75: ms(h.value_at_quantile(0.75)),
            p90: ms(h.value_at_quantile(0.90)),
            p95: ms(h.value_at_quantile(0.95)),
            p99: ms(h.value_at_quantile(0.99)),
            max: ms(h.max()),
            mean: h.mean() / 1000.0,
            stddev: h.stdev() / 1000.0,
        }
    }

    /// Forget every recorded value
    pub fn reset(&mut self) {
        if let Some(histogram) = self.histogram.as_mut() {
            histogram.reset();
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LatencyHistogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatencyHistogram")
            .field("len", &self.len())
            .finish()
    }
}

/// Aggregated numbers for one request name (or for all of them)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EndpointStats {
    /// Request name, or "Aggregated" for the total row
    pub name: String,
    /// Request method, if every event under this name carried one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<Method>,
    /// Events counted
    pub requests: u64,
    /// Events classified as success
    pub successes: u64,
    /// Events classified as failure
    pub failures: u64,
    /// Events classified as exception
    pub exceptions: u64,
    /// Mean payload size in bytes
    pub avg_payload_bytes: f64,
    /// Requests per second over the observed window
    pub requests_per_second: f64,
    /// Latency percentiles in milliseconds
    pub latency: LatencyPercentiles,
}

impl EndpointStats {
    /// Failures plus exceptions
    pub fn errors(&self) -> u64 {
        self.failures + self.exceptions
    }

    /// Fraction of events that did not succeed (0.0 - 1.0)
    pub fn failure_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.errors() as f64 / self.requests as f64
        }
    }
}

/// How often one error message was seen for one request name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCount {
    /// Request name
    pub name: String,
    /// Error message
    pub error: String,
    /// Occurrences
    pub occurrences: u64,
}

/// Point-in-time copy of a collector's numbers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StatsSnapshot {
    /// One row per request name, sorted by name
    pub endpoints: Vec<EndpointStats>,
    /// Totals over every name
    pub total: EndpointStats,
    /// Distinct errors, most frequent first
    pub errors: Vec<ErrorCount>,
    /// Observed window in seconds
    pub elapsed_secs: f64,
}

#[derive(Default)]
struct Tally {
    method: Option<Method>,
    mixed_methods: bool,
    successes: u64,
    failures: u64,
    exceptions: u64,
    payload_bytes: u64,
    latency: LatencyHistogram,
}

impl Tally {
    fn record(&mut self, event: &MetricEvent) {
        match (self.requests(), self.method, event.request_type) {
            (0, _, method) => self.method = method,
            (_, current, method) if current != method => self.mixed_methods = true,
            _ => {}
        }

        match event.category {
            MetricCategory::Success => self.successes += 1,
            MetricCategory::Failure => self.failures += 1,
            MetricCategory::Exception => self.exceptions += 1,
        }
        self.payload_bytes += event.payload_size as u64;
        self.latency.record_ms(event.latency_ms);
    }

    fn requests(&self) -> u64 {
        self.successes + self.failures + self.exceptions
    }

    fn to_stats(&self, name: &str, secs: f64) -> EndpointStats {
        let requests = self.requests();
        EndpointStats {
            name: name.to_string(),
            method: if self.mixed_methods { None } else { self.method },
            requests,
            successes: self.successes,
            failures: self.failures,
            exceptions: self.exceptions,
            avg_payload_bytes: if requests > 0 {
                self.payload_bytes as f64 / requests as f64
            } else {
                0.0
            },
            requests_per_second: if secs > 0.0 {
                requests as f64 / secs
            } else {
                0.0
            },
            latency: self.latency.percentiles(),
        }
    }
}

#[derive(Default)]
struct Inner {
    per_name: HashMap<String, Tally>,
    total: Tally,
    errors: HashMap<(String, String), u64>,
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
}

/// Listener that aggregates events into per-name statistics
#[derive(Default)]
pub struct StatsCollector {
    inner: Mutex<Inner>,
}

impl StatsCollector {
    /// Empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one event
    pub fn record(&self, event: &MetricEvent) {
        let mut inner = self.lock();
        inner.started_at.get_or_insert_with(Instant::now);
        inner
            .per_name
            .entry(event.name.clone())
            .or_default()
            .record(event);
        inner.total.record(event);

        if let Some(error) = &event.error {
            *inner
                .errors
                .entry((event.name.clone(), error.clone()))
                .or_default() += 1;
        }
    }

    /// Current numbers
    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.lock();
        let elapsed = match (inner.started_at, inner.stopped_at) {
            (Some(start), Some(stop)) => stop.saturating_duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        };
        let secs = elapsed.as_secs_f64();

        let mut endpoints: Vec<_> = inner
            .per_name
            .iter()
            .map(|(name, tally)| tally.to_stats(name, secs))
            .collect();
        endpoints.sort_by(|a, b| a.name.cmp(&b.name));

        let mut errors: Vec<_> = inner
            .errors
            .iter()
            .map(|((name, error), occurrences)| ErrorCount {
                name: name.clone(),
                error: error.clone(),
                occurrences: *occurrences,
            })
            .collect();
        errors.sort_by(|a, b| {
            b.occurrences
                .cmp(&a.occurrences)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.error.cmp(&b.error))
        });

        StatsSnapshot {
            endpoints,
            total: inner.total.to_stats("Aggregated", secs),
            errors,
            elapsed_secs: secs,
        }
    }

    /// Drop every counter
    pub fn reset(&self) {
        *self.lock() = Inner::default();
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EventListener for StatsCollector {
    fn name(&self) -> &str {
        "stats"
    }

    fn on_event(&self, event: &MetricEvent) -> Result<(), ListenerError> {
        self.record(event);
        Ok(())
    }

    fn on_lifecycle(&self, event: &LifecycleEvent) -> Result<(), ListenerError> {
        let mut inner = self.lock();
        match event {
            LifecycleEvent::RunStarted { .. } => {
                inner.started_at = Some(Instant::now());
                inner.stopped_at = None;
            }
            LifecycleEvent::RunStopped { .. } => {
                inner.stopped_at = Some(Instant::now());
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for StatsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("StatsCollector")
            .field("names", &inner.per_name.len())
            .field("requests", &inner.total.requests())
            .finish()
    }
}

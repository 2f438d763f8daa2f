//! CSV export functionality

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use csv::Writer;
use loadgen_core::{EventListener, ListenerError, MetricEvent, StatsSnapshot};

use crate::error::ReportError;

const EVENT_HEADERS: [&str; 10] = [
    "timestamp",
    "user_id",
    "category",
    "name",
    "request_type",
    "status_code",
    "latency_ms",
    "payload_size",
    "error",
    "context",
];

/// Bus listener appending one CSV row per metric event
///
/// Rows are written in the order the listener is called, which for a single
/// user is the order its requests completed.
pub struct CsvEventWriter<W: Write + Send> {
    writer: Mutex<Writer<W>>,
}

impl CsvEventWriter<File> {
    /// Create (or truncate) `path` and write the header row
    pub fn create(path: impl AsRef<Path>) -> Result<Self, ReportError> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "Writing event log");
        Self::new(File::create(path)?)
    }
}

impl<W: Write + Send> CsvEventWriter<W> {
    /// Wrap `inner` and write the header row
    pub fn new(inner: W) -> Result<Self, ReportError> {
        let mut writer = Writer::from_writer(inner);
        writer.write_record(EVENT_HEADERS)?;
        Ok(Self {
            writer: Mutex::new(writer),
        })
    }

    /// Write one event
    pub fn write_event(&self, event: &MetricEvent) -> Result<(), ReportError> {
        let mut context: Vec<_> = event
            .context
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        context.sort();

        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writer.write_record([
            event.timestamp.to_rfc3339(),
            event.user_id.to_string(),
            event.category.to_string(),
            event.name.clone(),
            event
                .request_type
                .map(|m| m.to_string())
                .unwrap_or_default(),
            event
                .status_code
                .map(|c| c.to_string())
                .unwrap_or_default(),
            format!("{:.3}", event.latency_ms),
            event.payload_size.to_string(),
            event.error.clone().unwrap_or_default(),
            context.join(";"),
        ])?;
        Ok(())
    }

    /// Flush buffered rows to the underlying writer
    pub fn flush(&self) -> Result<(), ReportError> {
        self.writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .flush()?;
        Ok(())
    }

    /// Flush and return the underlying writer
    pub fn into_inner(self) -> Result<W, ReportError> {
        let writer = self
            .writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writer
            .into_inner()
            .map_err(|e| ReportError::Io(e.into_error()))
    }
}

impl<W: Write + Send> EventListener for CsvEventWriter<W> {
    fn name(&self) -> &str {
        "csv"
    }

    fn on_event(&self, event: &MetricEvent) -> Result<(), ListenerError> {
        self.write_event(event)?;
        Ok(())
    }
}

/// Writes per-name summary rows
pub struct CsvExporter;

impl CsvExporter {
    /// Export the per-name table of `snapshot` to `path`, total row last
    pub fn export_summary(
        snapshot: &StatsSnapshot,
        path: impl AsRef<Path>,
    ) -> Result<(), ReportError> {
        Self::write_summary(snapshot, File::create(path)?)
    }

    /// Write the per-name table of `snapshot` to `inner`
    pub fn write_summary<W: Write>(snapshot: &StatsSnapshot, inner: W) -> Result<(), ReportError> {
        let mut wtr = Writer::from_writer(inner);

        wtr.write_record([
            "type",
            "name",
            "requests",
            "failures",
            "exceptions",
            "failure_rate",
            "avg_ms",
            "min_ms",
            "max_ms",
            "p50_ms",
            "p95_ms",
            "p99_ms",
            "avg_payload_bytes",
            "requests_per_second",
        ])?;

        for row in snapshot.endpoints.iter().chain(std::iter::once(&snapshot.total)) {
            wtr.write_record([
                row.method.map(|m| m.to_string()).unwrap_or_default(),
                row.name.clone(),
                row.requests.to_string(),
                row.failures.to_string(),
                row.exceptions.to_string(),
                format!("{:.4}", row.failure_rate()),
                format!("{:.2}", row.latency.mean),
                format!("{:.2}", row.latency.min),
                format!("{:.2}", row.latency.max),
                format!("{:.2}", row.latency.p50),
                format!("{:.2}", row.latency.p95),
                format!("{:.2}", row.latency.p99),
                format!("{:.1}", row.avg_payload_bytes),
                format!("{:.2}", row.requests_per_second),
            ])?;
        }

        wtr.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadgen_core::{MetricCategory, MetricEventBus, Method, RequestOutcome, StatsCollector};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn event(category: MetricCategory, outcome: RequestOutcome) -> MetricEvent {
        let mut context = HashMap::new();
        context.insert("query".to_string(), "semantic search".to_string());
        MetricEvent::from_outcome("search_text", Method::Post, &outcome, category, context, 2)
    }

    #[test]
    fn test_event_rows() {
        let writer = CsvEventWriter::new(Vec::new()).unwrap();
        writer
            .write_event(&event(
                MetricCategory::Success,
                RequestOutcome::response(200, 42, 12.5),
            ))
            .unwrap();
        writer
            .write_event(&event(
                MetricCategory::Exception,
                RequestOutcome::transport_error("timeout", 100.0),
            ))
            .unwrap();

        let bytes = writer.into_inner().unwrap();
        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        assert_eq!(reader.headers().unwrap().len(), EVENT_HEADERS.len());

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][1], "2");
        assert_eq!(&rows[0][2], "success");
        assert_eq!(&rows[0][4], "POST");
        assert_eq!(&rows[0][5], "200");
        assert_eq!(&rows[0][6], "12.500");
        assert_eq!(&rows[0][9], "query=semantic search");
        assert_eq!(&rows[1][2], "exception");
        assert_eq!(&rows[1][5], "");
        assert_eq!(&rows[1][8], "timeout");
    }

    #[test]
    fn test_writer_as_bus_listener() {
        let bus = MetricEventBus::new();
        let writer = Arc::new(CsvEventWriter::new(Vec::new()).unwrap());
        let id = bus.register(writer.clone());

        for _ in 0..3 {
            bus.emit(&event(
                MetricCategory::Success,
                RequestOutcome::response(200, 1, 1.0),
            ));
        }
        assert!(bus.unregister(id));
        let writer = Arc::try_unwrap(writer).ok().unwrap();
        let bytes = writer.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.lines().count(), 4);
    }

    #[test]
    fn test_summary_rows() {
        let stats = StatsCollector::new();
        stats.record(&event(
            MetricCategory::Success,
            RequestOutcome::response(200, 10, 5.0),
        ));
        stats.record(&event(
            MetricCategory::Failure,
            RequestOutcome::response(500, 0, 7.0),
        ));

        let mut out = Vec::new();
        CsvExporter::write_summary(&stats.snapshot(), &mut out).unwrap();

        let mut reader = csv::Reader::from_reader(out.as_slice());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][1], "search_text");
        assert_eq!(&rows[0][2], "2");
        assert_eq!(&rows[0][3], "1");
        assert_eq!(&rows[0][5], "0.5000");
        assert_eq!(&rows[1][1], "Aggregated");
    }
}

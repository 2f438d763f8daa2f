//! JSON export functionality

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use loadgen_core::{RunReport, StatsSnapshot};
use serde::Serialize;

use crate::error::ReportError;

/// Run-level counters taken from a [`RunReport`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunTotals {
    /// Users that were launched
    pub users_started: usize,
    /// Behaviors selected across all users
    pub iterations: usize,
    /// Requests issued across all users
    pub total_requests: usize,
    /// Behaviors that failed as a whole
    pub behavior_errors: usize,
    /// Success fraction of all requests
    pub success_rate: f64,
    /// Wall-clock length of the run in seconds
    pub elapsed_secs: f64,
    /// Requests per second over the run
    pub requests_per_second: f64,
}

impl From<&RunReport> for RunTotals {
    fn from(report: &RunReport) -> Self {
        Self {
            users_started: report.users_started,
            iterations: report.iterations,
            total_requests: report.total_requests(),
            behavior_errors: report.behavior_errors,
            success_rate: report.success_rate(),
            elapsed_secs: report.elapsed.as_secs_f64(),
            requests_per_second: report.requests_per_second,
        }
    }
}

/// Document written by [`JsonExporter`]
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Target host of the run
    pub target_host: String,
    /// When the document was produced
    pub generated_at: chrono::DateTime<chrono::Utc>,
    /// Run counters, when the run has finished
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<RunTotals>,
    /// Per-name statistics
    pub stats: StatsSnapshot,
}

impl RunSummary {
    /// Summary of a finished run
    pub fn new(
        target_host: impl Into<String>,
        stats: StatsSnapshot,
        report: Option<&RunReport>,
    ) -> Self {
        Self {
            target_host: target_host.into(),
            generated_at: chrono::Utc::now(),
            run: report.map(RunTotals::from),
            stats,
        }
    }
}

/// Writes run summaries as pretty-printed JSON
pub struct JsonExporter;

impl JsonExporter {
    /// Export `summary` to `path`
    pub fn export(summary: &RunSummary, path: impl AsRef<Path>) -> Result<(), ReportError> {
        let mut writer = BufWriter::new(File::create(path)?);
        Self::write(summary, &mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Write `summary` to `writer`
    pub fn write<W: Write>(summary: &RunSummary, writer: W) -> Result<(), ReportError> {
        serde_json::to_writer_pretty(writer, summary)?;
        Ok(())
    }
}

//! Report generation for load runs
//!
//! This crate consumes the metric event stream and the final numbers:
//!
//! - [`CsvEventWriter`]: a bus listener writing one CSV row per event
//! - [`render_summary`]: a plain-text table of a [`StatsSnapshot`](loadgen_core::StatsSnapshot)
//! - [`JsonExporter`] / [`CsvExporter`]: summary files

#![warn(missing_docs)]
#![warn(clippy::all)]

mod csv_export;
mod error;
mod json_export;
mod summary;

pub use csv_export::{CsvEventWriter, CsvExporter};
pub use error::ReportError;
pub use json_export::{JsonExporter, RunSummary, RunTotals};
pub use summary::render_summary;

//! Plain-text summary tables

use std::fmt::Write;

use loadgen_core::{EndpointStats, StatsSnapshot};

const NAME_WIDTH: usize = 32;

/// Render `snapshot` as a request table followed by an error table
///
/// ```
/// use loadgen_core::StatsSnapshot;
/// use loadgen_report::render_summary;
///
/// let table = render_summary(&StatsSnapshot::default());
/// assert!(table.starts_with("Type"));
/// ```
pub fn render_summary(snapshot: &StatsSnapshot) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "{:<7} {:<width$} {:>8} {:>14} {:>9} {:>9} {:>9} {:>9} {:>9} {:>9} {:>8}",
        "Type",
        "Name",
        "# reqs",
        "# fails",
        "Avg",
        "Min",
        "Max",
        "Med",
        "p95",
        "p99",
        "req/s",
        width = NAME_WIDTH,
    );
    let rule = "-".repeat(out.trim_end().len());
    let _ = writeln!(out, "{rule}");

    for row in &snapshot.endpoints {
        write_row(&mut out, row);
    }
    let _ = writeln!(out, "{rule}");
    write_row(&mut out, &snapshot.total);

    if !snapshot.errors.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Error report");
        let _ = writeln!(
            out,
            "{:>12}  {:<width$}  Error",
            "# occurrences",
            "Name",
            width = NAME_WIDTH,
        );
        for error in &snapshot.errors {
            let _ = writeln!(
                out,
                "{:>12}  {:<width$}  {}",
                error.occurrences,
                truncate(&error.name),
                error.error,
                width = NAME_WIDTH,
            );
        }
    }

    out
}

fn write_row(out: &mut String, row: &EndpointStats) {
    let fails = format!("{}({:.2}%)", row.errors(), row.failure_rate() * 100.0);
    let method = row.method.map(|m| m.as_str()).unwrap_or("");
    let _ = writeln!(
        out,
        "{:<7} {:<width$} {:>8} {:>14} {:>9.1} {:>9.1} {:>9.1} {:>9.1} {:>9.1} {:>9.1} {:>8.2}",
        method,
        truncate(&row.name),
        row.requests,
        fails,
        row.latency.mean,
        row.latency.min,
        row.latency.max,
        row.latency.p50,
        row.latency.p95,
        row.latency.p99,
        row.requests_per_second,
        width = NAME_WIDTH,
    );
}

fn truncate(name: &str) -> String {
    if name.chars().count() <= NAME_WIDTH {
        name.to_string()
    } else {
        let mut short: String = name.chars().take(NAME_WIDTH - 3).collect();
        short.push_str("...");
        short
    }
}

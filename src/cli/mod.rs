//! CLI argument parsing and command handling

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use loadgen_client::{HttpConfig, HttpExecutor};
use loadgen_core::{
    Classifier, LoadScheduler, LogListener, RunConfig, RunReport, StatsCollector, ThinkTime,
    ThinkTimeProfile,
};
use loadgen_report::{render_summary, CsvEventWriter, CsvExporter, JsonExporter, RunSummary};
use serde::Deserialize;

use crate::scenario;

/// loadgen - virtual-user load generator
#[derive(Parser, Debug)]
#[command(name = "loadgen")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the document-store scenario against a host
    Run(RunArgs),
    /// Parse and validate a configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List the think-time profiles
    Profiles,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Base URL of the service under test
    #[arg(long, env = "LOADGEN_HOST")]
    pub host: Option<String>,

    /// Number of virtual users
    #[arg(short, long)]
    pub users: Option<usize>,

    /// Users started per second (0 = all at once)
    #[arg(short = 'r', long)]
    pub spawn_rate: Option<f64>,

    /// Stop after this long, e.g. 30s, 5m, 1h30m
    #[arg(short = 't', long, value_parser = parse_run_time)]
    pub run_time: Option<Duration>,

    /// Think-time profile (default, quick, stress, endurance)
    #[arg(long)]
    pub profile: Option<ThinkTimeProfile>,

    /// Shortest think time in milliseconds
    #[arg(long, requires = "max_wait")]
    pub min_wait: Option<u64>,

    /// Longest think time in milliseconds
    #[arg(long, requires = "min_wait")]
    pub max_wait: Option<u64>,

    /// Stop after this many task selections over all users
    #[arg(long)]
    pub iterations: Option<usize>,

    /// Seed for reproducible task selection
    #[arg(long)]
    pub seed: Option<u64>,

    /// Path to configuration file (JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Write every metric event to this CSV file
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Write the per-name summary to this CSV file
    #[arg(long)]
    pub summary_csv: Option<PathBuf>,

    /// Write the run summary to this JSON file
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// Status code that counts as success
    #[arg(long)]
    pub expect_status: Option<u16>,
}

/// Contents of a `--config` file
///
/// Run settings sit at the top level; client settings under `http`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    #[serde(flatten)]
    pub run: RunConfig,
    pub http: HttpConfig,
}

impl Cli {
    /// Dispatch the selected command
    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Commands::Run(args) => run(args).await,
            Commands::Validate { config } => validate(config),
            Commands::Profiles => {
                print_profiles();
                Ok(())
            }
        }
    }
}

impl RunArgs {
    /// Merge the config file (if any) with flags; flags win
    pub fn resolve(&self) -> Result<(RunConfig, HttpConfig)> {
        let file = match &self.config {
            Some(path) => load_config(path)?,
            None => FileConfig::default(),
        };
        let mut config = file.run;

        if let Some(host) = &self.host {
            config.target_host = host.clone();
        }
        if let Some(users) = self.users {
            config.user_count = users;
        }
        if let Some(rate) = self.spawn_rate {
            config.ramp_up_rate = rate;
        }
        if let Some(run_time) = self.run_time {
            config.run_duration = Some(run_time);
        }
        if let Some(profile) = self.profile {
            config.think_time = profile.think_time();
        }
        if let (Some(min_ms), Some(max_ms)) = (self.min_wait, self.max_wait) {
            config.think_time = ThinkTime::between(min_ms, max_ms)?;
        }
        if let Some(iterations) = self.iterations {
            config.max_iterations = Some(iterations);
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }

        config.validate().context("Invalid run configuration")?;
        Ok((config, file.http))
    }
}

/// Parse a run time such as `90`, `30s`, `5m` or `1h30m`
pub fn parse_run_time(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("run time must not be empty".to_string());
    }

    let total = match s.parse::<u64>() {
        Ok(secs) => secs,
        Err(_) => {
            let mut total = 0u64;
            let mut digits = String::new();
            for c in s.chars() {
                if c.is_ascii_digit() {
                    digits.push(c);
                    continue;
                }
                let unit = match c.to_ascii_lowercase() {
                    'h' => 3_600,
                    'm' => 60,
                    's' => 1,
                    _ => return Err(format!("unknown unit '{c}' in run time '{s}'")),
                };
                let value: u64 = digits
                    .parse()
                    .map_err(|_| format!("missing number before '{c}' in run time '{s}'"))?;
                total = value
                    .checked_mul(unit)
                    .and_then(|v| total.checked_add(v))
                    .ok_or_else(|| format!("run time '{s}' is too large"))?;
                digits.clear();
            }
            if !digits.is_empty() {
                return Err(format!("missing unit after '{digits}' in run time '{s}'"));
            }
            total
        }
    };

    if total == 0 {
        return Err("run time must be greater than zero".to_string());
    }
    Ok(Duration::from_secs(total))
}

fn load_config(path: &Path) -> Result<FileConfig> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open config file: {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn validate(path: &Path) -> Result<()> {
    let file = load_config(path)?;
    file.run
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    HttpExecutor::new(&file.run.target_host, &file.http)
        .with_context(|| format!("Invalid target host in {}", path.display()))?;

    println!(
        "Configuration OK: {} users against {} (think time {}-{} ms)",
        file.run.user_count,
        file.run.target_host,
        file.run.think_time.min_ms,
        file.run.think_time.max_ms
    );
    Ok(())
}

fn print_profiles() {
    println!("{:<12} Think time", "Profile");
    for profile in ThinkTimeProfile::all() {
        let think_time = profile.think_time();
        println!(
            "{:<12} {}-{} ms",
            profile.id(),
            think_time.min_ms,
            think_time.max_ms
        );
    }
}

async fn run(args: &RunArgs) -> Result<()> {
    let (config, http) = args.resolve()?;

    let executor = HttpExecutor::new(&config.target_host, &http)
        .context("Failed to create HTTP client")?;
    let stats = Arc::new(StatsCollector::new());

    let mut builder = LoadScheduler::builder()
        .executor(Arc::new(executor))
        .listener(Arc::new(LogListener::new()))
        .listener(stats.clone());
    if let Some(status) = args.expect_status {
        builder = builder.classifier(Classifier::expect(status));
    }
    let event_log = match &args.csv {
        Some(path) => {
            let writer = Arc::new(
                CsvEventWriter::create(path)
                    .with_context(|| format!("Failed to create {}", path.display()))?,
            );
            builder = builder.listener(writer.clone());
            Some(writer)
        }
        None => None,
    };
    let scheduler = builder.build()?;

    print_banner(&config);

    let handle = scheduler.start(
        config.clone(),
        scenario::task_table()?,
        Some(scenario::seed_documents()),
    )?;
    let report = handle.run_with_signal_handling().await?;

    if let Some(writer) = event_log {
        writer.flush().context("Failed to flush event log")?;
    }

    let snapshot = stats.snapshot();
    println!();
    println!("{}", render_summary(&snapshot));
    print_report(&report);

    if let Some(path) = &args.summary_csv {
        CsvExporter::export_summary(&snapshot, path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Summary CSV written to {}", path.display());
    }
    if let Some(path) = &args.json {
        let summary = RunSummary::new(config.target_host.clone(), snapshot, Some(&report));
        JsonExporter::export(&summary, path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("JSON summary written to {}", path.display());
    }

    Ok(())
}

fn print_banner(config: &RunConfig) {
    println!("\n{}", "=".repeat(70));
    println!("   loadgen - document-store scenario");
    println!("{}", "=".repeat(70));
    println!("  Host:         {}", config.target_host);
    println!("  Users:        {}", config.user_count);
    println!("  Spawn rate:   {}/s", config.ramp_up_rate);
    println!(
        "  Think time:   {}-{} ms",
        config.think_time.min_ms, config.think_time.max_ms
    );
    match config.run_duration {
        Some(d) => println!("  Run time:     {}s", d.as_secs()),
        None => println!("  Run time:     until Ctrl+C"),
    }
    if let Some(iterations) = config.max_iterations {
        println!("  Iterations:   {iterations}");
    }
    println!("{}", "=".repeat(70));
    println!();
}

fn print_report(report: &RunReport) {
    println!("Users started:     {}", report.users_started);
    println!("Iterations:        {}", report.iterations);
    println!("Requests:          {}", report.total_requests());
    println!("Success rate:      {:.2}%", report.success_rate() * 100.0);
    println!("Behavior errors:   {}", report.behavior_errors);
    println!("Elapsed:           {:.2}s", report.elapsed.as_secs_f64());
    println!("Throughput:        {:.2} req/s", report.requests_per_second);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_config(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "loadgen-{name}-{}.json",
            std::process::id()
        ));
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn run_args(argv: &[&str]) -> RunArgs {
        let mut full = vec!["loadgen", "run"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Commands::Run(args) => args,
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_run_time() {
        assert_eq!(parse_run_time("90"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_run_time("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_run_time("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_run_time("1h30m"), Ok(Duration::from_secs(5_400)));
        assert_eq!(parse_run_time("1H2m3s"), Ok(Duration::from_secs(3_723)));
    }

    #[test]
    fn test_parse_run_time_rejects_garbage() {
        assert!(parse_run_time("").is_err());
        assert!(parse_run_time("0").is_err());
        assert!(parse_run_time("0s").is_err());
        assert!(parse_run_time("10x").is_err());
        assert!(parse_run_time("m").is_err());
        assert!(parse_run_time("1h30").is_err());
    }

    #[test]
    fn test_run_flags() {
        let args = run_args(&[
            "--host",
            "http://localhost:5115",
            "-u",
            "20",
            "-r",
            "5",
            "-t",
            "2m",
            "--profile",
            "stress",
            "--seed",
            "42",
        ]);
        let (config, _) = args.resolve().unwrap();

        assert_eq!(config.target_host, "http://localhost:5115");
        assert_eq!(config.user_count, 20);
        assert_eq!(config.ramp_up_rate, 5.0);
        assert_eq!(config.run_duration, Some(Duration::from_secs(120)));
        assert_eq!(config.think_time, ThinkTimeProfile::Stress.think_time());
        assert_eq!(config.seed, Some(42));
    }

    #[test]
    fn test_wait_bounds_override_profile() {
        let args = run_args(&["--profile", "endurance", "--min-wait", "10", "--max-wait", "20"]);
        let (config, _) = args.resolve().unwrap();
        assert_eq!(config.think_time, ThinkTime::between(10, 20).unwrap());
    }

    #[test]
    fn test_min_wait_requires_max_wait() {
        assert!(Cli::try_parse_from(["loadgen", "run", "--min-wait", "10"]).is_err());
    }

    #[test]
    fn test_inverted_wait_bounds_rejected() {
        let args = run_args(&["--min-wait", "50", "--max-wait", "10"]);
        assert!(args.resolve().is_err());
    }

    #[test]
    fn test_overlong_run_time_rejected() {
        let args = run_args(&["-t", "18446744073709551615"]);
        let err = args.resolve().unwrap_err();
        assert!(format!("{err:#}").contains("run_duration"));

        let args = run_args(&["-t", "876000h"]);
        assert!(args.resolve().is_ok());
    }

    #[test]
    fn test_unknown_profile_rejected() {
        assert!(Cli::try_parse_from(["loadgen", "run", "--profile", "turbo"]).is_err());
    }

    #[test]
    fn test_flags_override_config_file() {
        let path = temp_config(
            "override",
            r#"{
                "target_host": "http://from-file:8000",
                "user_count": 3,
                "ramp_up_rate": 1.5,
                "max_iterations": 99,
                "think_time": { "min_ms": 5, "max_ms": 6 }
            }"#,
        );
        let args = run_args(&["--config", path.to_str().unwrap(), "-u", "7"]);
        let (config, http) = args.resolve().unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.target_host, "http://from-file:8000");
        assert_eq!(config.user_count, 7);
        assert_eq!(config.ramp_up_rate, 1.5);
        assert_eq!(config.max_iterations, Some(99));
        assert_eq!(config.think_time, ThinkTime::between(5, 6).unwrap());
        assert_eq!(http, HttpConfig::default());
    }

    #[test]
    fn test_invalid_config_file() {
        let path = temp_config("invalid", r#"{ "ramp_up_rate": -2.0 }"#);
        assert!(validate(&path).is_err());
        std::fs::remove_file(&path).unwrap();

        let path = temp_config("malformed", "{ not json");
        assert!(validate(&path).is_err());
        std::fs::remove_file(&path).unwrap();

        assert!(validate(Path::new("/nonexistent/loadgen.json")).is_err());
    }

    #[test]
    fn test_valid_config_file() {
        let path = temp_config(
            "valid",
            r#"{ "target_host": "http://localhost:5115", "user_count": 10 }"#,
        );
        let result = validate(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn test_subcommands_parse() {
        assert!(matches!(
            Cli::try_parse_from(["loadgen", "profiles"]).unwrap().command,
            Commands::Profiles
        ));
        let cli = Cli::try_parse_from(["loadgen", "-v", "validate", "-c", "run.json"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Validate { .. }));
    }
}

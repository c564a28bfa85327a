//! CLI command definitions, routing, and tracing setup.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{Value, json};
use tenderwatch_core::{ProgressEvent, ProgressReporter, RunContext, run_all, run_source};
use tenderwatch_shared::{
    AppConfig, RunResult, RunStatus, config_file_path, init_config, init_config_at, load_config,
    load_config_from,
};
use tenderwatch_storage::Storage;
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// tenderwatch: track public procurement notices.
#[derive(Parser)]
#[command(
    name = "tenderwatch",
    version,
    about = "Fetch public tender listings and keep a deduplicated local record of new notices.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.tenderwatch/tenderwatch.toml).
    #[arg(long, global = true, env = "TENDERWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run one source (the configured default when omitted).
    Run {
        /// Source key from the config file.
        source: Option<String>,

        /// Print progress events as newline-delimited JSON instead of a spinner.
        #[arg(long)]
        events: bool,
    },

    /// Run every configured source in order.
    RunAll {
        /// Print progress events as newline-delimited JSON instead of a spinner.
        #[arg(long)]
        events: bool,
    },

    /// List configured sources.
    Sources,

    /// List recently stored notices.
    Tenders {
        /// Maximum number of notices to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Show per-source statistics and the last run time.
    Stats,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr so `--events`
/// output on stdout stays machine-readable.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "tenderwatch=info",
        1 => "tenderwatch=debug",
        _ => "tenderwatch=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Run { source, events } => {
            cmd_run(config_path, source.as_deref(), events).await
        }
        Command::RunAll { events } => cmd_run_all(config_path, events).await,
        Command::Sources => cmd_sources(config_path),
        Command::Tenders { limit } => cmd_tenders(config_path, limit).await,
        Command::Stats => cmd_stats(config_path).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn resolve_config(path: Option<PathBuf>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(&path)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// Run commands
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<PathBuf>, source: Option<&str>, events: bool) -> Result<()> {
    let config = resolve_config(config_path)?;
    let ctx = RunContext::from_config(&config)?;
    let storage = Storage::open(&config.database_path()?).await?;

    info!(source = source.unwrap_or("<default>"), "starting run");

    let result = if events {
        let result = run_source(&ctx, source, &storage, &NdjsonProgress).await;
        print_json_line(&done_line(&result));
        result
    } else {
        let reporter = CliProgress::new();
        let result = run_source(&ctx, source, &storage, &reporter).await;
        reporter.finish();
        print_summary(&result);
        result
    };

    match (&result.error, result.failed) {
        (Some(e), _) => Err(eyre!("run of '{}' failed: {e}", result.source_key)),
        (None, 0) => Ok(()),
        (None, failed) => Err(eyre!(
            "run of '{}': {failed} notices failed to store",
            result.source_key
        )),
    }
}

async fn cmd_run_all(config_path: Option<PathBuf>, events: bool) -> Result<()> {
    let config = resolve_config(config_path)?;
    let ctx = RunContext::from_config(&config)?;
    if ctx.sources().is_empty() && ctx.sources().rejected().is_empty() {
        return Err(eyre!("no sources are configured"));
    }
    let storage = Storage::open(&config.database_path()?).await?;

    let results = if events {
        let results = run_all(&ctx, &storage, &NdjsonProgress).await;
        print_json_line(&json!({ "step": "done", "results": results_json(&results) }));
        results
    } else {
        let reporter = CliProgress::new();
        let results = run_all(&ctx, &storage, &reporter).await;
        reporter.finish();
        for source in ctx.sources().iter() {
            if let Some(result) = results.get(source.key()) {
                print_summary(result);
            }
        }
        for rejected in ctx.sources().rejected() {
            if let Some(result) = results.get(&rejected.key) {
                print_summary(result);
            }
        }
        results
    };

    let failed: Vec<&str> = results
        .values()
        .filter(|r| r.status() == RunStatus::Failed)
        .map(|r| r.source_key.as_str())
        .collect();
    if failed.len() == results.len() {
        return Err(eyre!("every source failed: {}", failed.join(", ")));
    }
    let store_errors: usize = results.values().map(|r| r.failed).sum();
    if store_errors > 0 {
        return Err(eyre!("{store_errors} notices failed to store"));
    }
    Ok(())
}

fn print_summary(result: &RunResult) {
    let line = match result.status() {
        RunStatus::Failed => format!(
            "✗ {}: failed: {}",
            result.source_key,
            result.error.as_deref().unwrap_or("unknown error")
        ),
        RunStatus::StoreErrors => format!(
            "✗ {}: {} of {} notices failed to store ({} new)",
            result.source_key, result.failed, result.discovered, result.added
        ),
        RunStatus::NothingFound => format!("· {}: no notices found", result.source_key),
        RunStatus::AllDuplicates => format!(
            "· {}: {} notices found, all already stored",
            result.source_key, result.discovered
        ),
        RunStatus::Added => format!(
            "✓ {}: {} new of {} notices",
            result.source_key, result.added, result.discovered
        ),
    };
    println!("{line}");
}

// ---------------------------------------------------------------------------
// Progress reporters
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn report(&self, source_key: Option<&str>, event: ProgressEvent) {
        let prefix = source_key.map(|k| format!("[{k}] ")).unwrap_or_default();
        let message = match event {
            ProgressEvent::Start { source } => format!("Fetching {} ({})", source.label, source.url),
            ProgressEvent::Found { count } => format!("Found {count} notices"),
            ProgressEvent::Tender {
                title,
                index,
                total,
                inserted,
            } => {
                let mark = if inserted { "+" } else { "=" };
                format!("[{index}/{total}] {mark} {title}")
            }
        };
        self.spinner.set_message(format!("{prefix}{message}"));
    }
}

/// Writes each event to stdout as one JSON object per line.
struct NdjsonProgress;

impl ProgressReporter for NdjsonProgress {
    fn report(&self, source_key: Option<&str>, event: ProgressEvent) {
        print_json_line(&event_line(source_key, &event));
    }
}

fn event_line(source_key: Option<&str>, event: &ProgressEvent) -> Value {
    let mut value = serde_json::to_value(event).unwrap_or(Value::Null);
    if let (Some(key), Value::Object(map)) = (source_key, &mut value) {
        map.insert("source_key".into(), Value::String(key.to_string()));
    }
    value
}

fn done_line(result: &RunResult) -> Value {
    json!({
        "step": "done",
        "source_key": result.source_key,
        "discovered": result.discovered,
        "added": result.added,
        "failed": result.failed,
        "error": result.error,
    })
}

fn results_json(results: &BTreeMap<String, RunResult>) -> Value {
    Value::Object(
        results
            .iter()
            .map(|(key, r)| {
                (
                    key.clone(),
                    json!({
                        "discovered": r.discovered,
                        "added": r.added,
                        "failed": r.failed,
                        "error": r.error,
                    }),
                )
            })
            .collect(),
    )
}

fn print_json_line(value: &Value) {
    println!("{value}");
}

// ---------------------------------------------------------------------------
// Reporting commands
// ---------------------------------------------------------------------------

fn cmd_sources(config_path: Option<PathBuf>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let ctx = RunContext::from_config(&config)?;
    let default_key = ctx.sources().default_key().map(str::to_string);

    if ctx.sources().is_empty() && ctx.sources().rejected().is_empty() {
        println!("No sources configured.");
        return Ok(());
    }

    for source in ctx.sources().iter() {
        let marker = if default_key.as_deref() == Some(source.key()) {
            "*"
        } else {
            " "
        };
        println!(
            "{marker} {:<20} {:<8} {}  {}",
            source.key(),
            source.strategy().as_str(),
            source.label(),
            source.listing_url()
        );
    }
    for rejected in ctx.sources().rejected() {
        println!("! {:<20} invalid  {}", rejected.key, rejected.reason);
    }
    Ok(())
}

async fn cmd_tenders(config_path: Option<PathBuf>, limit: u32) -> Result<()> {
    let config = resolve_config(config_path)?;
    let storage = Storage::open_readonly(&config.database_path()?).await?;
    let tenders = storage.list_recent_tenders(limit).await?;

    if tenders.is_empty() {
        println!("No notices stored yet.");
        return Ok(());
    }

    for tender in tenders {
        println!("{}", tender.title);
        println!("  {}", tender.link);
        let mut details = vec![tender.source_label.clone()];
        if !tender.published.is_empty() {
            details.push(tender.published.clone());
        }
        if let Some(org) = &tender.organisation {
            details.push(org.clone());
        }
        if !tender.tags.is_empty() {
            details.push(format!("tags: {}", tender.tags.join(", ")));
        }
        println!("  {}", details.join(" · "));
    }
    Ok(())
}

async fn cmd_stats(config_path: Option<PathBuf>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let storage = Storage::open_readonly(&config.database_path()?).await?;

    let total = storage.count_tenders().await?;
    let organisations = storage.count_organisations(None).await?;
    let last_run = storage
        .last_run_at()
        .await?
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".into());

    println!("Notices:       {total}");
    println!("Organisations: {organisations}");
    println!("Last run:      {last_run}");

    let stats = storage.list_source_stats().await?;
    if !stats.is_empty() {
        println!();
        println!("{:<20} {:>8} {:>8}  last run", "source", "last", "total");
        for s in stats {
            println!(
                "{:<20} {:>8} {:>8}  {}",
                s.source_key,
                s.last_added,
                s.total_added,
                s.last_run_at.to_rfc3339()
            );
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

fn cmd_config_init(config_path: Option<PathBuf>) -> Result<()> {
    let path = match config_path {
        Some(path) => {
            init_config_at(&path)?;
            path
        }
        None => init_config()?,
    };
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<PathBuf>) -> Result<()> {
    let shown = match &config_path {
        Some(path) => path.clone(),
        None => config_file_path()?,
    };
    let config = resolve_config(config_path)?;
    println!("# {}", shown.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenderwatch_core::SourceSummary;

    #[test]
    fn parses_run_with_source_and_events() {
        let cli = Cli::try_parse_from(["tenderwatch", "run", "awards", "--events"]).unwrap();
        match cli.command {
            Command::Run { source, events } => {
                assert_eq!(source.as_deref(), Some("awards"));
                assert!(events);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "tenderwatch",
            "run-all",
            "--config",
            "/tmp/tw.toml",
            "-vv",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/tw.toml")));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.log_format, LogFormat::Json));
        assert!(matches!(cli.command, Command::RunAll { events: false }));
    }

    #[test]
    fn tenders_limit_defaults() {
        let cli = Cli::try_parse_from(["tenderwatch", "tenders"]).unwrap();
        assert!(matches!(cli.command, Command::Tenders { limit: 20 }));
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(Cli::try_parse_from(["tenderwatch", "crawl"]).is_err());
    }

    #[test]
    fn event_lines_carry_source_key() {
        let line = event_line(Some("awards"), &ProgressEvent::Found { count: 4 });
        assert_eq!(line, json!({"step": "found", "count": 4, "source_key": "awards"}));

        let start = ProgressEvent::Start {
            source: SourceSummary {
                label: "Awards".into(),
                url: "https://awards.example.gov/rss".into(),
            },
        };
        assert!(event_line(None, &start).get("source_key").is_none());
    }

    #[test]
    fn done_line_reports_failure() {
        let line = done_line(&RunResult::failed("awards", "HTTP 503"));
        assert_eq!(line["step"], "done");
        assert_eq!(line["added"], 0);
        assert_eq!(line["error"], "HTTP 503");
    }

    #[test]
    fn done_line_reports_store_errors() {
        let result = RunResult::completed("awards", 3, 1).with_failed(2);
        let line = done_line(&result);
        assert_eq!(line["added"], 1);
        assert_eq!(line["failed"], 2);
        assert!(line["error"].is_null());
    }
}

use std::collections::BTreeMap;
use std::{fs, path::Path};

use anyhow::{bail, Context, Result};
use clap::Parser;
use redwatch::{
    config::load_config,
    core::{event::SecurityEventType, monitor::SecurityMonitor},
};
use serde::Deserialize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "redwatch",
    about = "Security-event monitor: replay an event log and report"
)]
struct Cli {
    /// Path to config file (TOML). Default: config/redwatch.toml
    #[arg(long)]
    config: Option<String>,
    /// JSONL file of events to replay (one record per line)
    replay: String,
    /// Run one aggregation cycle every N replayed events (0 = only at end)
    #[arg(long, default_value_t = 0)]
    cycle_every: usize,
    /// Increase verbosity (info, debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Optional log file path
    #[arg(long, default_value = "data/redwatch.log")]
    log_file: String,
}

/// One line of the replay file.
#[derive(Debug, Deserialize)]
struct ReplayRecord {
    event_type: SecurityEventType,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    source_ip: Option<String>,
    #[serde(default)]
    user_agent: Option<String>,
    #[serde(default)]
    metadata: Option<BTreeMap<String, String>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli)?;

    let cfg = load_config(cli.config.as_deref()).context("loading configuration")?;
    let monitor = SecurityMonitor::new(cfg)?;

    let path = Path::new(&cli.replay);
    if !path.exists() {
        bail!("replay file not found: {}", path.display());
    }
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;

    let mut replayed = 0usize;
    let mut skipped = 0usize;
    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: ReplayRecord = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(err) => {
                tracing::warn!("skipping malformed record on line {}: {}", lineno + 1, err);
                skipped += 1;
                continue;
            }
        };
        monitor.log_event(
            record.event_type,
            record.user_id.as_deref(),
            record.source_ip.as_deref(),
            record.user_agent.as_deref(),
            record.metadata,
        );
        replayed += 1;
        if cli.cycle_every > 0 && replayed % cli.cycle_every == 0 {
            monitor.run_cycle()?;
        }
    }

    monitor.run_cycle()?;
    // let detached notification tasks drain before reading alert state
    tokio::task::yield_now().await;
    tracing::info!("replayed {} events ({} skipped)", replayed, skipped);

    let dashboard = monitor.dashboard();
    let json = serde_json::to_string_pretty(&dashboard)?;
    println!("{json}");
    Ok(())
}

fn init_tracing(cli: &Cli) -> Result<()> {
    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let log_path = Path::new(&cli.log_file);
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)?;
    }
    if log_path.exists() {
        if let Ok(meta) = fs::metadata(log_path) {
            if meta.len() > 1_000_000 {
                let rotated = log_path.with_extension("log.1");
                let _ = fs::rename(log_path, rotated);
            }
        }
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("opening log file {}", log_path.display()))?;

    let file_layer = fmt::layer()
        .with_writer(file)
        .with_ansi(false)
        .with_target(false);

    // logs go to stderr; stdout carries only the final JSON report
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("installing tracing subscriber")
}

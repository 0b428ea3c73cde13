//! bibchex - check bibliographic entries for consistency problems
//!
//! Reads entries as JSON, looks up metadata suggestions from online sources,
//! runs the consistency checks and writes a JSON report.

use anyhow::{Context, Result};
use bibchex_common::config::{load_or_default, resolve_config_path, CONFIG_ENV_VAR};
use bibchex_common::events::{EventBus, ProgressEvent};
use bibchex_engine::pipeline::Checker;
use bibchex_engine::progress::ProgressTracker;
use bibchex_engine::Entry;
use clap::Parser;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "bibchex")]
#[command(about = "Check bibliography entries for consistency problems")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Skip DOI discovery and online retrieval
    #[arg(long)]
    offline: bool,

    /// Write the report here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Entries to check (JSON array)
    entries: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_ENV_VAR);
    let config = load_or_default(config_path.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("bibchex={0},bibchex_engine={0},bibchex_common={0}", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(
        "Starting bibchex v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match &config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: built-in defaults"),
    }

    let content = std::fs::read_to_string(&args.entries)
        .with_context(|| format!("Failed to read {}", args.entries.display()))?;
    let entries: Vec<Entry> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse entries from {}", args.entries.display()))?;
    info!("Loaded {} entries from {}", entries.len(), args.entries.display());

    let bus = EventBus::new(1000);
    let mut events = bus.subscribe();
    let progress_log = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ProgressEvent::SubtaskProgress { subtask, done, total, .. } if done == total => {
                    info!("{} {} of {}", subtask, done, total);
                }
                other => debug!(event = other.event_type(), "Progress"),
            }
        }
    });

    let checker = Checker::from_config(&config, args.offline, ProgressTracker::new(bus))?;
    let report = checker.run(entries).await?;
    drop(checker);
    progress_log.abort();

    let json = serde_json::to_string_pretty(&report)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Report written to {}", path.display());
        }
        None => println!("{json}"),
    }

    info!("Done: {}", report.display_string());
    Ok(())
}

//! Watchtower main entry point
//!
//! Loads the configuration, opens the cache, and either runs the
//! long-lived scheduler or a single named crawl.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use watchtower::config::load_config_with_hash;
use watchtower::{CrawlKind, Tracker};

/// Watchtower: forum character-cache crawler
///
/// Continuously crawls the configured forum, extracting character
/// profiles, threads, dialogue quotes and member activity into a local
/// SQLite cache for downstream consumers.
#[derive(Parser, Debug)]
#[command(name = "watchtower")]
#[command(version = "1.0.0")]
#[command(about = "Forum character-cache crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Run one crawl (profile, threads, quotes, discovery, dump-sync)
    /// and exit instead of starting the scheduler
    #[arg(long, value_name = "KIND")]
    once: Option<String>,

    /// Character id for --once profile/threads crawls (omit for all)
    #[arg(long, requires = "once")]
    character: Option<String>,

    /// Clear the quote-crawl log and exit
    #[arg(long, conflicts_with = "once")]
    reset_quote_log: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) =
        load_config_with_hash(&cli.config).context("failed to load configuration")?;
    tracing::info!("Configuration loaded (hash: {})", config_hash);

    let tracker = Tracker::new(config)?;
    tracker.record_config_hash(&config_hash).await?;

    if cli.reset_quote_log {
        let cleared = tracker.reset_quote_log().await?;
        println!("Cleared {} quote-log entries", cleared);
        return Ok(());
    }

    if let Some(kind_name) = cli.once {
        return handle_once(&tracker, &kind_name, cli.character.as_deref()).await;
    }

    handle_serve(tracker).await;
    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("watchtower=info,warn"),
            1 => EnvFilter::new("watchtower=debug,info"),
            2 => EnvFilter::new("watchtower=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles --once: runs a single crawl to completion
async fn handle_once(
    tracker: &Tracker,
    kind_name: &str,
    character_id: Option<&str>,
) -> anyhow::Result<()> {
    let kind = CrawlKind::parse(kind_name)
        .ok_or_else(|| anyhow::anyhow!("unknown crawl type '{}'", kind_name))?;

    let report = tracker.run_once(kind, character_id).await?;
    tracing::info!("{} crawl finished: {:?}", kind, report);

    if report.has_failures() {
        tracing::warn!(
            "Crawl finished with failures: {} fetch, {} parse, {} store",
            report.fetch_failures,
            report.parse_failures,
            report.store_failures
        );
    }
    Ok(())
}

/// Handles the default mode: periodic scheduler until Ctrl-C
async fn handle_serve(tracker: Tracker) {
    tracing::info!("Starting scheduler; Ctrl-C to stop");

    tokio::select! {
        _ = tracker.run_scheduler() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested; stopping at the next item boundary");
            tracker.shutdown();
        }
    }
}

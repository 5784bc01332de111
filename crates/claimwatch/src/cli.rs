//! Command-line interface.

use crate::config::{OutputFormat, WatchConfig};
use crate::driver::{DriverConfig, WatchDriver};
use crate::sink::{AlertSink, JsonLinesSink, LogSink};
use crate::source::{read_listing, ClaimSource, NdjsonSource};
use crate::tracker::CapacityTracker;
use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tokio::sync::watch;

/// Format of diagnostic log output on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Top-level arguments.
#[derive(Debug, Parser)]
#[command(name = "claimwatch")]
#[command(about = "Watch persistent volume claims and alert on total claimed capacity", long_about = None)]
pub struct Cli {
    /// Config file (.toml or .json).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Capacity limit, e.g. 150Gi.
    #[arg(long, global = true, env = "CLAIMWATCH_MAX_CLAIMS")]
    pub max_claims: Option<String>,

    /// Namespace to watch; all namespaces when unset.
    #[arg(short, long, global = true, env = "K8S_NAMESPACE")]
    pub namespace: Option<String>,

    /// Label selector, e.g. app=db,tier!=cache.
    #[arg(short = 'l', long, global = true)]
    pub selector: Option<String>,

    /// Field selector, e.g. status.phase=Bound.
    #[arg(short = 'f', long, global = true)]
    pub field_selector: Option<String>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Seed from a listing, then follow watch events.
    Watch {
        /// Listing file holding `{"items": [...]}`.
        #[arg(long)]
        listing: Option<PathBuf>,
        /// Newline-delimited watch events; `-` reads stdin.
        #[arg(short, long, default_value = "-")]
        events: String,
        /// Record output format; overrides the config file.
        #[arg(short, long, value_enum)]
        output: Option<OutputFormat>,
    },
    /// Print the claim table and total for a listing.
    List {
        /// Listing file holding `{"items": [...]}`.
        listing: PathBuf,
    },
}

impl Cli {
    /// Runs the selected command until it completes or `shutdown` turns true.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let config = self.resolve_config()?;
        match self.command {
            Command::Watch {
                listing,
                events,
                output,
            } => {
                let output = output.unwrap_or(config.output);
                if events == "-" {
                    let source = NdjsonSource::stdin(listing);
                    watch_with(source, &config, output, shutdown).await
                } else {
                    let source = NdjsonSource::open(Path::new(&events), listing).await?;
                    watch_with(source, &config, output, shutdown).await
                }
            }
            Command::List { listing } => list(&listing, &config).await,
        }
    }

    /// Loads the config file, if any, and applies flag and env overrides.
    pub fn resolve_config(&self) -> Result<WatchConfig> {
        let mut config = match &self.config {
            Some(path) if path.exists() => WatchConfig::from_file(path)?,
            Some(path) => {
                tracing::warn!("Config file not found, using defaults: {}", path.display());
                WatchConfig::default()
            }
            None => WatchConfig::default(),
        };

        if let Some(max) = &self.max_claims {
            config.max_capacity = max.clone();
        }
        if let Some(ns) = &self.namespace {
            config.namespace = Some(ns.clone());
        }
        if let Some(selector) = &self.selector {
            config.selector = Some(selector.clone());
        }
        if let Some(selector) = &self.field_selector {
            config.field_selector = Some(selector.clone());
        }
        Ok(config)
    }
}

async fn watch_with<S: ClaimSource>(
    source: S,
    config: &WatchConfig,
    output: OutputFormat,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let max = config.max_quantity()?;
    let normalizer = config.normalizer()?;
    let sink: Box<dyn AlertSink> = match output {
        OutputFormat::Log => Box::new(LogSink),
        OutputFormat::Json => Box::new(JsonLinesSink::stdout()),
    };

    tracing::info!(
        max = %max,
        namespace = normalizer.namespace().unwrap_or("*"),
        selector = %normalizer.label_selector(),
        field_selector = %normalizer.field_selector(),
        "claimwatch starting"
    );

    let mut driver = WatchDriver::new(
        source,
        normalizer,
        CapacityTracker::new(max),
        DriverConfig::from(config),
    )
    .with_sink(sink);

    driver.prime().await?;
    let table = driver.tracker().claim_table();
    match output {
        OutputFormat::Log => print!("{}", table),
        OutputFormat::Json => eprint!("{}", table),
    }

    driver.stream(shutdown).await?;
    Ok(())
}

async fn list(path: &Path, config: &WatchConfig) -> Result<()> {
    let max = config.max_quantity()?;
    let normalizer = config.normalizer()?;
    let listing = normalizer.normalize_listing(read_listing(path).await?);

    let mut tracker = CapacityTracker::new(max);
    tracker.note_skipped(listing.skipped);
    tracker.seed(listing.records);

    print!("{}", tracker.claim_table());
    println!(
        "Limit: {} ({:.1}% used, {})",
        tracker.max_capacity(),
        tracker.percent_used(),
        tracker.state()
    );
    if listing.skipped > 0 {
        println!("Skipped {} unusable claims", listing.skipped);
    }
    Ok(())
}

//! Watcher configuration loaded from TOML or JSON.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{WatchError, WatchResult};
use crate::normalizer::EventNormalizer;
use crate::quantity::Quantity;
use crate::selector::Selector;

/// Default capacity limit when none is configured.
pub const DEFAULT_MAX_CAPACITY: &str = "150Gi";

/// How records are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Structured tracing events.
    #[default]
    Log,
    /// One JSON record per line on stdout.
    Json,
}

/// Watcher configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Capacity limit as a quantity literal.
    pub max_capacity: String,
    /// Namespace to watch; empty or absent watches all namespaces.
    pub namespace: Option<String>,
    /// Label selector, e.g. `app=db,tier!=cache`.
    pub selector: Option<String>,
    /// Field selector over `metadata.name`, `metadata.namespace`,
    /// `spec.volumeName` and `status.phase`.
    pub field_selector: Option<String>,
    /// Verify the running total against the ledger every N events; 0 disables.
    pub verify_every: u64,
    /// Consecutive forced relists tolerated before giving up.
    pub max_relists: u32,
    /// Record output format.
    pub output: OutputFormat,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            max_capacity: DEFAULT_MAX_CAPACITY.to_string(),
            namespace: None,
            selector: None,
            field_selector: None,
            verify_every: 1,
            max_relists: 5,
            output: OutputFormat::Log,
        }
    }
}

impl WatchConfig {
    /// Loads a `.toml` or `.json` config file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: WatchConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: WatchConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// Parses and validates the capacity limit.
    pub fn max_quantity(&self) -> WatchResult<Quantity> {
        let max = Quantity::parse(&self.max_capacity)?;
        if max <= Quantity::ZERO {
            return Err(WatchError::Config(format!(
                "max_capacity must be positive, got {}",
                self.max_capacity
            )));
        }
        Ok(max)
    }

    /// Namespace filter, with empty meaning all namespaces.
    pub fn namespace_filter(&self) -> Option<String> {
        self.namespace.clone().filter(|ns| !ns.is_empty())
    }

    /// Builds the normalizer for the configured namespace and selectors.
    pub fn normalizer(&self) -> WatchResult<EventNormalizer> {
        let labels = Selector::parse(self.selector.as_deref().unwrap_or_default())?;
        let fields = Selector::parse_fields(self.field_selector.as_deref().unwrap_or_default())?;
        Ok(EventNormalizer::new(self.namespace_filter())
            .with_label_selector(labels)
            .with_field_selector(fields))
    }
}

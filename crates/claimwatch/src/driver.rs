//! Sequencing of listing, seeding and live event processing.
//!
//! The driver seeds the tracker from a full listing before consuming any live
//! event, then processes events strictly one at a time in delivery order.
//! Integrity failures and expired streams trigger a relist and re-seed.
//! Shutdown is only observed between events, never in the middle of one.

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::WatchConfig;
use crate::error::{WatchError, WatchResult};
use crate::normalizer::{EventNormalizer, RawWatchEvent};
use crate::record::CapacityRecord;
use crate::sink::AlertSink;
use crate::source::ClaimSource;
use crate::tracker::{CapacityTracker, TrackerStats};

/// Driver tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// Verify the running total every N applied events; 0 disables.
    pub verify_every: u64,
    /// Consecutive relists tolerated without an applied event in between.
    pub max_relists: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            verify_every: 1,
            max_relists: 5,
        }
    }
}

impl From<&WatchConfig> for DriverConfig {
    fn from(config: &WatchConfig) -> Self {
        Self {
            verify_every: config.verify_every,
            max_relists: config.max_relists,
        }
    }
}

/// Drives a [`ClaimSource`] into a [`CapacityTracker`] and fans records out to sinks.
pub struct WatchDriver<S> {
    source: S,
    normalizer: EventNormalizer,
    tracker: CapacityTracker,
    sinks: Vec<Box<dyn AlertSink>>,
    config: DriverConfig,
    since_verify: u64,
    consecutive_relists: u32,
    seeded: bool,
}

impl<S: ClaimSource> WatchDriver<S> {
    /// Creates a driver with no sinks.
    pub fn new(
        source: S,
        normalizer: EventNormalizer,
        tracker: CapacityTracker,
        config: DriverConfig,
    ) -> Self {
        Self {
            source,
            normalizer,
            tracker,
            sinks: Vec::new(),
            config,
            since_verify: 0,
            consecutive_relists: 0,
            seeded: false,
        }
    }

    /// Adds a sink. Records go to sinks in the order they were added.
    pub fn with_sink(mut self, sink: Box<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// The tracker, for inspection.
    pub fn tracker(&self) -> &CapacityTracker {
        &self.tracker
    }

    /// The source, for inspection.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Consumes the driver, returning the tracker.
    pub fn into_tracker(self) -> CapacityTracker {
        self.tracker
    }

    /// Lists and seeds. Must complete before [`WatchDriver::stream`].
    pub async fn prime(&mut self) -> WatchResult<()> {
        self.seed_from_listing().await?;
        self.seeded = true;
        self.consecutive_relists = 0;
        Ok(())
    }

    /// Primes, then streams until end of stream or shutdown.
    pub async fn run(&mut self, shutdown: watch::Receiver<bool>) -> WatchResult<TrackerStats> {
        self.prime().await?;
        self.stream(shutdown).await
    }

    /// Processes live events until the source ends or `shutdown` turns true.
    ///
    /// Dropping the shutdown sender is treated as a shutdown request.
    pub async fn stream(&mut self, mut shutdown: watch::Receiver<bool>) -> WatchResult<TrackerStats> {
        if !self.seeded {
            self.prime().await?;
        }

        loop {
            if *shutdown.borrow() {
                info!("shutdown requested, stopping between events");
                break;
            }

            let next = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!("shutdown handle dropped, stopping between events");
                        break;
                    }
                    continue;
                }
                next = self.source.next_event() => next,
            };

            match next {
                Ok(Some(raw)) => self.handle_raw(raw).await?,
                Ok(None) => {
                    info!("event stream ended");
                    break;
                }
                Err(e) if e.requires_relist() => {
                    warn!(error = %e, "watch stream lost, relisting");
                    self.relist().await?;
                }
                Err(e) if e.is_per_event() => {
                    warn!(error = %e, "undecodable event skipped");
                    self.tracker.note_skipped(1);
                }
                Err(e) => return Err(e),
            }
        }

        for sink in &mut self.sinks {
            sink.flush()?;
        }
        let stats = self.tracker.stats().clone();
        info!(
            added = stats.added,
            deleted = stats.deleted,
            modified = stats.modified,
            duplicates = stats.duplicates,
            unknown_claims = stats.unknown_claims,
            skipped = stats.skipped,
            exceeded = stats.exceeded,
            restored = stats.restored,
            seeds = stats.seeds,
            relists = stats.relists,
            "claim watch stopped"
        );
        Ok(stats)
    }

    async fn handle_raw(&mut self, raw: RawWatchEvent) -> WatchResult<()> {
        let event = match self.normalizer.normalize(raw) {
            Ok(Some(event)) => event,
            Ok(None) => return Ok(()),
            Err(e) if e.requires_relist() => {
                warn!(error = %e, "watch stream reported an error, relisting");
                return self.relist().await;
            }
            Err(e) if e.is_per_event() => {
                warn!(error = %e, "claim event skipped");
                self.tracker.note_skipped(1);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match self.tracker.apply(event) {
            Ok(records) => {
                self.consecutive_relists = 0;
                self.emit(&records)?;
            }
            Err(e) if e.requires_relist() => {
                error!(error = %e, "ledger integrity lost, forcing relist");
                return self.relist().await;
            }
            Err(e) => return Err(e),
        }

        self.maybe_verify().await
    }

    async fn maybe_verify(&mut self) -> WatchResult<()> {
        if self.config.verify_every == 0 {
            return Ok(());
        }
        self.since_verify += 1;
        if self.since_verify < self.config.verify_every {
            return Ok(());
        }
        self.since_verify = 0;
        if let Err(e) = self.tracker.verify() {
            error!(error = %e, "ledger verification failed, forcing relist");
            return self.relist().await;
        }
        Ok(())
    }

    async fn relist(&mut self) -> WatchResult<()> {
        self.consecutive_relists += 1;
        if self.consecutive_relists > self.config.max_relists {
            return Err(WatchError::Source(format!(
                "gave up after {} consecutive relists",
                self.config.max_relists
            )));
        }
        self.tracker.note_relist();
        self.seed_from_listing().await
    }

    async fn seed_from_listing(&mut self) -> WatchResult<()> {
        let raw = self.source.list().await?;
        let listing = self.normalizer.normalize_listing(raw);
        self.tracker.note_skipped(listing.skipped);
        let records = self.tracker.seed(listing.records);
        self.since_verify = 0;
        self.emit(&records)
    }

    fn emit(&mut self, records: &[CapacityRecord]) -> WatchResult<()> {
        for sink in &mut self.sinks {
            for record in records {
                sink.emit(record)?;
            }
        }
        Ok(())
    }
}

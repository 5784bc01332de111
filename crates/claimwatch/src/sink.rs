//! Destinations for capacity records.
//!
//! [`AlertSink`] is the hook where external over-capacity actions attach. The
//! watcher itself only emits records; it never acts on the cluster.

use std::io::Write;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::error::WatchResult;
use crate::record::CapacityRecord;

/// Receives every record the tracker produces, in order.
pub trait AlertSink: Send {
    /// Handles one record.
    fn emit(&mut self, record: &CapacityRecord) -> WatchResult<()>;

    /// Flushes buffered output. Called when the watcher stops.
    fn flush(&mut self) -> WatchResult<()> {
        Ok(())
    }
}

/// Writes records as structured tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn emit(&mut self, record: &CapacityRecord) -> WatchResult<()> {
        match record {
            CapacityRecord::LedgerSeeded { claims, total, max } => {
                info!(claims, total = %total, max = %max, "ledger seeded from listing");
            }
            CapacityRecord::ClaimAdded { claim, size, total } => {
                info!(claim = %claim, size = %size, total = %total, "claim added");
            }
            CapacityRecord::ClaimDeleted { claim, size, total } => {
                info!(claim = %claim, size = %size, total = %total, "claim deleted");
            }
            CapacityRecord::ClaimModified {
                claim,
                previous_size,
                size,
                total,
            } => {
                info!(
                    claim = %claim,
                    previous_size = %previous_size,
                    size = %size,
                    total = %total,
                    "claim modified"
                );
            }
            CapacityRecord::UnknownClaim { claim, kind, total } => {
                warn!(claim = %claim, kind = ?kind, total = %total, "event for unknown claim ignored");
            }
            CapacityRecord::CapacityPercentage {
                total,
                max,
                percent,
            } => {
                info!(
                    total = %total,
                    max = %max,
                    percent = *percent,
                    "claimed capacity at {:.1}% ({}/{})",
                    percent,
                    total,
                    max
                );
            }
            CapacityRecord::CapacityExceeded { total, max } => {
                warn!(total = %total, max = %max, "claim capacity exceeded: max {} at {}", max, total);
            }
            CapacityRecord::CapacityRestored { total, max } => {
                info!(total = %total, max = %max, "claim capacity back to normal: max {} at {}", max, total);
            }
        }
        Ok(())
    }
}

/// Writes each record as one JSON line.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    /// Creates a sink writing to `writer`.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonLinesSink<std::io::Stdout> {
    /// Creates a sink writing to standard output.
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> AlertSink for JsonLinesSink<W> {
    fn emit(&mut self, record: &CapacityRecord) -> WatchResult<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> WatchResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Collects records in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<CapacityRecord>>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every record received so far.
    pub fn records(&self) -> Vec<CapacityRecord> {
        self.records.lock().expect("lock poisoned").clone()
    }

    /// Returns only threshold transitions.
    pub fn alerts(&self) -> Vec<CapacityRecord> {
        self.records()
            .into_iter()
            .filter(CapacityRecord::is_alert)
            .collect()
    }
}

impl AlertSink for MemorySink {
    fn emit(&mut self, record: &CapacityRecord) -> WatchResult<()> {
        self.records
            .lock()
            .expect("lock poisoned")
            .push(record.clone());
        Ok(())
    }
}

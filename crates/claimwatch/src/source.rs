//! Event sources: the boundary to the cluster transport.
//!
//! A [`ClaimSource`] provides one full listing followed by a live, possibly
//! endless stream of watch events. Connecting, authenticating and reconnecting
//! belong to the implementation; the driver only sequences calls.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing::debug;

use crate::error::{WatchError, WatchResult};
use crate::normalizer::{RawClaimList, RawWatchEvent};

/// Source of claim listings and watch events.
#[async_trait]
pub trait ClaimSource: Send {
    /// Fetches a full listing snapshot.
    ///
    /// Events returned by later [`ClaimSource::next_event`] calls must be
    /// observed after this snapshot. Calling `list` again restarts the stream
    /// from the new snapshot.
    async fn list(&mut self) -> WatchResult<RawClaimList>;

    /// Waits for the next event.
    ///
    /// Returns `Ok(None)` at end of stream. May block indefinitely; an idle
    /// stream is not an error. Must be cancel-safe: dropping the future before
    /// it completes must not lose an event.
    async fn next_event(&mut self) -> WatchResult<Option<RawWatchEvent>>;
}

/// One scripted step of a [`CannedSource`].
#[derive(Debug, Clone)]
pub enum CannedItem {
    /// Deliver an event.
    Event(RawWatchEvent),
    /// Report that the stream must be re-listed.
    Gone(String),
    /// Report a transport failure.
    Failure(String),
}

/// A finite, scripted source. Stands in for a cluster connection.
#[derive(Debug, Default)]
pub struct CannedSource {
    listings: VecDeque<RawClaimList>,
    last_listing: RawClaimList,
    items: VecDeque<CannedItem>,
    idle_when_drained: bool,
    list_calls: usize,
}

impl CannedSource {
    /// Creates a source with an empty listing and no events.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a listing. Each `list` call takes the next queued listing and
    /// repeats the last one once the queue is empty.
    pub fn with_listing(mut self, listing: RawClaimList) -> Self {
        self.listings.push_back(listing);
        self
    }

    /// Queues an event.
    pub fn with_event(mut self, event: RawWatchEvent) -> Self {
        self.items.push_back(CannedItem::Event(event));
        self
    }

    /// Queues a scripted step.
    pub fn with_item(mut self, item: CannedItem) -> Self {
        self.items.push_back(item);
        self
    }

    /// When set, the source blocks forever after its script instead of ending.
    pub fn idle_when_drained(mut self, idle: bool) -> Self {
        self.idle_when_drained = idle;
        self
    }

    /// Number of `list` calls made so far.
    pub fn list_calls(&self) -> usize {
        self.list_calls
    }
}

#[async_trait]
impl ClaimSource for CannedSource {
    async fn list(&mut self) -> WatchResult<RawClaimList> {
        self.list_calls += 1;
        if let Some(next) = self.listings.pop_front() {
            self.last_listing = next;
        }
        Ok(self.last_listing.clone())
    }

    async fn next_event(&mut self) -> WatchResult<Option<RawWatchEvent>> {
        match self.items.pop_front() {
            Some(CannedItem::Event(event)) => Ok(Some(event)),
            Some(CannedItem::Gone(reason)) => Err(WatchError::StreamGone { reason }),
            Some(CannedItem::Failure(reason)) => Err(WatchError::Source(reason)),
            None if self.idle_when_drained => std::future::pending().await,
            None => Ok(None),
        }
    }
}

/// Reads newline-delimited JSON watch events from any async reader.
///
/// Each non-blank line is one `{"type": ..., "object": ...}` event, the format
/// produced by `kubectl get pvc --watch --output-watch-events -o json`. The
/// listing comes from a JSON file holding `{"items": [...]}`; without one the
/// listing is empty. Re-listing re-reads the file but cannot rewind the stream.
pub struct NdjsonSource<R> {
    lines: Lines<R>,
    listing: Option<PathBuf>,
    line_no: u64,
}

impl<R: AsyncBufRead + Unpin + Send> NdjsonSource<R> {
    /// Creates a source over `reader`.
    pub fn new(reader: R, listing: Option<PathBuf>) -> Self {
        Self {
            lines: reader.lines(),
            listing,
            line_no: 0,
        }
    }
}

impl NdjsonSource<BufReader<tokio::io::Stdin>> {
    /// Creates a source reading events from standard input.
    pub fn stdin(listing: Option<PathBuf>) -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), listing)
    }
}

impl NdjsonSource<BufReader<tokio::fs::File>> {
    /// Creates a source reading events from a file.
    pub async fn open(path: &Path, listing: Option<PathBuf>) -> WatchResult<Self> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Self::new(BufReader::new(file), listing))
    }
}

/// Reads a listing file holding `{"items": [...]}`.
pub async fn read_listing(path: &Path) -> WatchResult<RawClaimList> {
    let contents = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&contents)?)
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> ClaimSource for NdjsonSource<R> {
    async fn list(&mut self) -> WatchResult<RawClaimList> {
        match &self.listing {
            Some(path) => read_listing(path).await,
            None => Ok(RawClaimList::default()),
        }
    }

    async fn next_event(&mut self) -> WatchResult<Option<RawWatchEvent>> {
        loop {
            let line = match self.lines.next_line().await? {
                Some(line) => line,
                None => return Ok(None),
            };
            self.line_no += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            debug!(line = self.line_no, "watch event line read");
            return Ok(Some(serde_json::from_str(line)?));
        }
    }
}

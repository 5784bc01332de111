#![warn(missing_docs)]

//! claimwatch: tracks the storage capacity claimed by persistent volume claims
//! and raises an alert when the running total crosses a configured limit.
//!
//! The pipeline is source → normalizer → tracker → sinks. A [`WatchDriver`]
//! seeds the [`CapacityTracker`] from a full listing, then applies live watch
//! events one at a time, emitting [`CapacityRecord`]s to every [`AlertSink`].

pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod ledger;
pub mod normalizer;
pub mod quantity;
pub mod record;
pub mod selector;
pub mod sink;
pub mod source;
pub mod tracker;

pub use config::{OutputFormat, WatchConfig};
pub use driver::{DriverConfig, WatchDriver};
pub use error::{WatchError, WatchResult};
pub use ledger::{ClaimIdentity, ClaimLedger, ClaimRecord};
pub use normalizer::{ClaimEvent, ClaimEventKind, EventNormalizer, RawClaimList, RawWatchEvent};
pub use quantity::{Quantity, Unit};
pub use record::CapacityRecord;
pub use selector::Selector;
pub use sink::{AlertSink, JsonLinesSink, LogSink, MemorySink};
pub use source::{CannedSource, ClaimSource, NdjsonSource};
pub use tracker::{CapacityState, CapacityTracker, TrackerStats};

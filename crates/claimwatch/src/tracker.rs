//! Running claimed-capacity total and the threshold state machine.
//!
//! The tracker exclusively owns the [`ClaimLedger`]. Every event adjusts the
//! running total by a delta derived from the ledger, then re-evaluates the
//! threshold: reaching the limit (inclusive) moves Normal to OverCapacity and
//! dropping below it moves back. Alerts fire only on those transitions.

use core::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{WatchError, WatchResult};
use crate::ledger::{ClaimIdentity, ClaimLedger, ClaimRecord};
use crate::normalizer::{ClaimEvent, ClaimEventKind};
use crate::quantity::Quantity;
use crate::record::CapacityRecord;

/// Allowed difference between the running and recomputed totals. Quantities
/// are exact byte counts, so any difference at all is a divergence.
pub const LEDGER_TOLERANCE_BYTES: i128 = 0;

/// Threshold state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CapacityState {
    /// Total is below the limit.
    #[default]
    Normal,
    /// Total is at or above the limit.
    OverCapacity,
}

impl fmt::Display for CapacityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapacityState::Normal => write!(f, "NORMAL"),
            CapacityState::OverCapacity => write!(f, "OVER_CAPACITY"),
        }
    }
}

/// Counters kept across the tracker's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerStats {
    /// ADDED events that inserted a new claim.
    pub added: u64,
    /// DELETED events that removed a known claim.
    pub deleted: u64,
    /// MODIFIED events, plus ADDED events for claims already present.
    pub modified: u64,
    /// Replayed events ignored by resource version.
    pub duplicates: u64,
    /// DELETED/MODIFIED events for claims absent from the ledger.
    pub unknown_claims: u64,
    /// Events dropped before reaching the tracker (malformed or missing size).
    pub skipped: u64,
    /// Normal to OverCapacity transitions.
    pub exceeded: u64,
    /// OverCapacity to Normal transitions.
    pub restored: u64,
    /// Times the ledger was seeded from a listing.
    pub seeds: u64,
    /// Forced relists after a lost stream or a failed integrity check.
    pub relists: u64,
}

/// Owns the ledger, the running total, and the threshold state.
#[derive(Debug)]
pub struct CapacityTracker {
    max: Quantity,
    ledger: ClaimLedger,
    total: Quantity,
    state: CapacityState,
    stats: TrackerStats,
}

impl CapacityTracker {
    /// Creates a tracker in the Normal state with an empty ledger.
    pub fn new(max: Quantity) -> Self {
        Self {
            max,
            ledger: ClaimLedger::new(),
            total: Quantity::ZERO,
            state: CapacityState::Normal,
            stats: TrackerStats::default(),
        }
    }

    /// Configured limit.
    pub fn max_capacity(&self) -> Quantity {
        self.max
    }

    /// Running total. O(1).
    pub fn total_capacity(&self) -> Quantity {
        self.total
    }

    /// Sum over ledger entries. O(n).
    pub fn recomputed_total(&self) -> Quantity {
        self.ledger.total_capacity()
    }

    /// Current threshold state.
    pub fn state(&self) -> CapacityState {
        self.state
    }

    /// Lifetime counters.
    pub fn stats(&self) -> &TrackerStats {
        &self.stats
    }

    /// Counts events that were dropped before they could be applied.
    pub fn note_skipped(&mut self, count: usize) {
        self.stats.skipped += count as u64;
    }

    /// Counts a forced relist. The re-seed that follows is counted in `seeds`.
    pub fn note_relist(&mut self) {
        self.stats.relists += 1;
    }

    /// Number of claims currently counted.
    pub fn claim_count(&self) -> usize {
        self.ledger.len()
    }

    /// Looks up a claim.
    pub fn claim(&self, identity: &ClaimIdentity) -> Option<&ClaimRecord> {
        self.ledger.get(identity)
    }

    /// Renders the current claims as a table.
    pub fn claim_table(&self) -> String {
        self.ledger.render_table()
    }

    /// `total / max * 100`.
    pub fn percent_used(&self) -> f64 {
        self.total.percent_of(&self.max)
    }

    /// Replaces the ledger with an authoritative snapshot.
    ///
    /// The state machine is re-evaluated against the new total, so seeding
    /// twice with the same snapshot yields no second transition.
    pub fn seed<I>(&mut self, records: I) -> Vec<CapacityRecord>
    where
        I: IntoIterator<Item = ClaimRecord>,
    {
        let claims = self.ledger.seed(records);
        self.total = self.ledger.total_capacity();
        self.stats.seeds += 1;
        debug!(claims, total = %self.total, "ledger seeded");

        let mut out = vec![CapacityRecord::LedgerSeeded {
            claims,
            total: self.total,
            max: self.max,
        }];
        out.extend(self.evaluate());
        out.push(self.percentage_record());
        out
    }

    /// Applies one lifecycle event.
    ///
    /// Unknown claims and replays are absorbed here; only integrity failures
    /// are returned as errors, and those require a relist.
    pub fn apply(&mut self, event: ClaimEvent) -> WatchResult<Vec<CapacityRecord>> {
        let mut out = Vec::with_capacity(3);
        let ClaimEvent { kind, record } = event;

        match kind {
            ClaimEventKind::Added => {
                if self.is_replay(&record) {
                    self.stats.duplicates += 1;
                    debug!(claim = %record.identity, "replayed ADDED ignored");
                } else {
                    let identity = record.identity.clone();
                    let size = record.requested;
                    match self.ledger.upsert(record) {
                        None => {
                            self.total += size;
                            self.stats.added += 1;
                            out.push(CapacityRecord::ClaimAdded {
                                claim: identity,
                                size,
                                total: self.total,
                            });
                        }
                        Some(prev) => {
                            debug!(claim = %identity, "ADDED for a claim already counted, applying as MODIFIED");
                            self.total += size - prev.requested;
                            self.stats.modified += 1;
                            out.push(CapacityRecord::ClaimModified {
                                claim: identity,
                                previous_size: prev.requested,
                                size,
                                total: self.total,
                            });
                        }
                    }
                }
            }
            ClaimEventKind::Modified => {
                if !self.ledger.contains(&record.identity) {
                    self.stats.unknown_claims += 1;
                    out.push(CapacityRecord::UnknownClaim {
                        claim: record.identity,
                        kind,
                        total: self.total,
                    });
                } else if self.is_replay(&record) {
                    self.stats.duplicates += 1;
                    debug!(claim = %record.identity, "replayed MODIFIED ignored");
                } else {
                    let identity = record.identity.clone();
                    let size = record.requested;
                    let previous_size = self
                        .ledger
                        .upsert(record)
                        .map(|prev| prev.requested)
                        .unwrap_or(Quantity::ZERO);
                    self.total += size - previous_size;
                    self.stats.modified += 1;
                    out.push(CapacityRecord::ClaimModified {
                        claim: identity,
                        previous_size,
                        size,
                        total: self.total,
                    });
                }
            }
            ClaimEventKind::Deleted => match self.ledger.remove(&record.identity) {
                Ok(removed) => {
                    self.total -= removed.requested;
                    self.stats.deleted += 1;
                    out.push(CapacityRecord::ClaimDeleted {
                        claim: removed.identity,
                        size: removed.requested,
                        total: self.total,
                    });
                }
                Err(WatchError::UnknownClaim { .. }) => {
                    self.stats.unknown_claims += 1;
                    out.push(CapacityRecord::UnknownClaim {
                        claim: record.identity,
                        kind,
                        total: self.total,
                    });
                }
                Err(e) => return Err(e),
            },
        }

        if self.total.is_negative() {
            return Err(WatchError::NegativeTotal {
                total: self.total.bytes(),
            });
        }

        out.extend(self.evaluate());
        out.push(self.percentage_record());
        Ok(out)
    }

    /// Checks the running total against a full recomputation.
    pub fn verify(&self) -> WatchResult<()> {
        let recomputed = self.ledger.total_capacity();
        if (recomputed - self.total).bytes().abs() > LEDGER_TOLERANCE_BYTES {
            return Err(WatchError::LedgerInconsistency {
                running: self.total.bytes(),
                recomputed: recomputed.bytes(),
            });
        }
        if self.total.is_negative() {
            return Err(WatchError::NegativeTotal {
                total: self.total.bytes(),
            });
        }
        Ok(())
    }

    fn is_replay(&self, incoming: &ClaimRecord) -> bool {
        match (
            self.ledger.get(&incoming.identity),
            incoming.resource_version.as_deref(),
        ) {
            (Some(existing), Some(version)) => {
                existing.resource_version.as_deref() == Some(version)
            }
            _ => false,
        }
    }

    fn evaluate(&mut self) -> Option<CapacityRecord> {
        let over = self.total >= self.max;
        match (self.state, over) {
            (CapacityState::Normal, true) => {
                self.state = CapacityState::OverCapacity;
                self.stats.exceeded += 1;
                Some(CapacityRecord::CapacityExceeded {
                    total: self.total,
                    max: self.max,
                })
            }
            (CapacityState::OverCapacity, false) => {
                self.state = CapacityState::Normal;
                self.stats.restored += 1;
                Some(CapacityRecord::CapacityRestored {
                    total: self.total,
                    max: self.max,
                })
            }
            _ => None,
        }
    }

    fn percentage_record(&self) -> CapacityRecord {
        CapacityRecord::CapacityPercentage {
            total: self.total,
            max: self.max,
            percent: self.percent_used(),
        }
    }

    #[cfg(test)]
    fn force_total(&mut self, total: Quantity) {
        self.total = total;
    }
}

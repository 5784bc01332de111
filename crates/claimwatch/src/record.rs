//! Structured records emitted for every processed event.

use serde::{Deserialize, Serialize};

use crate::ledger::ClaimIdentity;
use crate::normalizer::ClaimEventKind;
use crate::quantity::Quantity;

/// A log or alert record. Each one carries the running total so consumers
/// never need to re-derive state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum CapacityRecord {
    /// The ledger was (re)seeded from a full listing.
    LedgerSeeded {
        /// Claims in the snapshot.
        claims: usize,
        /// Total after seeding.
        total: Quantity,
        /// Configured limit.
        max: Quantity,
    },
    /// A new claim started counting toward the total.
    ClaimAdded {
        /// Claim identity.
        claim: ClaimIdentity,
        /// Requested size.
        size: Quantity,
        /// Total after the event.
        total: Quantity,
    },
    /// A claim stopped counting toward the total.
    ClaimDeleted {
        /// Claim identity.
        claim: ClaimIdentity,
        /// Size removed, as recorded in the ledger.
        size: Quantity,
        /// Total after the event.
        total: Quantity,
    },
    /// A known claim changed (or was re-added).
    ClaimModified {
        /// Claim identity.
        claim: ClaimIdentity,
        /// Size before the event.
        previous_size: Quantity,
        /// Size after the event.
        size: Quantity,
        /// Total after the event.
        total: Quantity,
    },
    /// An event referenced a claim the ledger has never seen.
    UnknownClaim {
        /// Claim identity.
        claim: ClaimIdentity,
        /// Kind of the offending event.
        kind: ClaimEventKind,
        /// Unchanged total.
        total: Quantity,
    },
    /// Informational usage level, emitted after every event.
    CapacityPercentage {
        /// Current total.
        total: Quantity,
        /// Configured limit.
        max: Quantity,
        /// `total / max * 100`.
        percent: f64,
    },
    /// The total reached or passed the limit.
    CapacityExceeded {
        /// Current total.
        total: Quantity,
        /// Configured limit.
        max: Quantity,
    },
    /// The total dropped back below the limit.
    CapacityRestored {
        /// Current total.
        total: Quantity,
        /// Configured limit.
        max: Quantity,
    },
}

impl CapacityRecord {
    /// Returns true for threshold transitions.
    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            CapacityRecord::CapacityExceeded { .. } | CapacityRecord::CapacityRestored { .. }
        )
    }
}

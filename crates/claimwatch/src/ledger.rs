//! Ledger of claims that currently count toward the claimed total.
//!
//! The ledger is the source of truth for which claims exist and what size each
//! one last reported. Deletions and modifications look sizes up here instead of
//! trusting the size carried by the event, which keeps replays and duplicate
//! deliveries from double-counting.

use core::fmt;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{WatchError, WatchResult};
use crate::quantity::Quantity;

/// Unique key of a claim: namespace plus name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClaimIdentity {
    /// Namespace the claim lives in.
    pub namespace: String,
    /// Claim name, unique within its namespace.
    pub name: String,
}

impl ClaimIdentity {
    /// Creates a new identity.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ClaimIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Last-known state of a single claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    /// Claim identity.
    pub identity: ClaimIdentity,
    /// Requested storage size.
    pub requested: Quantity,
    /// Bound volume name, if any.
    pub volume_ref: Option<String>,
    /// Lifecycle phase reported by the cluster (Pending, Bound, Lost).
    pub phase: Option<String>,
    /// Resource version of the object this record was built from.
    pub resource_version: Option<String>,
}

impl ClaimRecord {
    /// Creates a record with only identity and size set.
    pub fn new(identity: ClaimIdentity, requested: Quantity) -> Self {
        Self {
            identity,
            requested,
            volume_ref: None,
            phase: None,
            resource_version: None,
        }
    }

    /// Sets the bound volume name.
    pub fn with_volume(mut self, volume: impl Into<String>) -> Self {
        self.volume_ref = Some(volume.into());
        self
    }

    /// Sets the resource version.
    pub fn with_resource_version(mut self, version: impl Into<String>) -> Self {
        self.resource_version = Some(version.into());
        self
    }
}

/// Mapping from claim identity to its last-known record.
#[derive(Debug, Default, Clone)]
pub struct ClaimLedger {
    entries: BTreeMap<ClaimIdentity, ClaimRecord>,
}

impl ClaimLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the entry for `record.identity`, returning the previous record.
    pub fn upsert(&mut self, record: ClaimRecord) -> Option<ClaimRecord> {
        self.entries.insert(record.identity.clone(), record)
    }

    /// Removes the entry for `identity`.
    pub fn remove(&mut self, identity: &ClaimIdentity) -> WatchResult<ClaimRecord> {
        self.entries
            .remove(identity)
            .ok_or_else(|| WatchError::UnknownClaim {
                claim: identity.to_string(),
            })
    }

    /// Replaces every entry with the given snapshot. Later duplicates win.
    pub fn seed<I>(&mut self, records: I) -> usize
    where
        I: IntoIterator<Item = ClaimRecord>,
    {
        self.entries.clear();
        for record in records {
            if let Some(prev) = self.upsert(record) {
                debug!(claim = %prev.identity, "duplicate claim in snapshot, keeping the later entry");
            }
        }
        self.entries.len()
    }

    /// Returns the record for `identity`.
    pub fn get(&self, identity: &ClaimIdentity) -> Option<&ClaimRecord> {
        self.entries.get(identity)
    }

    /// Returns true if `identity` is present.
    pub fn contains(&self, identity: &ClaimIdentity) -> bool {
        self.entries.contains_key(identity)
    }

    /// Number of claims in the ledger.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the ledger holds no claims.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over records ordered by identity.
    pub fn records(&self) -> impl Iterator<Item = &ClaimRecord> {
        self.entries.values()
    }

    /// Sum of requested sizes over all entries. O(n).
    pub fn total_capacity(&self) -> Quantity {
        self.entries.values().map(|r| r.requested).sum()
    }

    /// Renders the ledger as a claim table with a total footer.
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "--- Claims ----");
        if self.entries.is_empty() {
            let _ = writeln!(out, "No claims found");
            return out;
        }
        let _ = writeln!(
            out,
            "{:<32}{:<16}{:<10}{:<42}{:<10}",
            "NAME", "NAMESPACE", "STATUS", "VOLUME", "CAPACITY"
        );
        for record in self.entries.values() {
            let _ = writeln!(
                out,
                "{:<32}{:<16}{:<10}{:<42}{:<10}",
                record.identity.name,
                record.identity.namespace,
                record.phase.as_deref().unwrap_or("-"),
                record.volume_ref.as_deref().unwrap_or("-"),
                record.requested.to_string(),
            );
        }
        let _ = writeln!(out, "-----------------------------");
        let _ = writeln!(out, "Total capacity claimed: {}", self.total_capacity());
        let _ = writeln!(out, "-----------------------------");
        out
    }
}

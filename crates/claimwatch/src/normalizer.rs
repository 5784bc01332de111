//! Adapts raw watch and list payloads into canonical [`ClaimEvent`]s.
//!
//! Raw payloads follow the cluster's wire format: a watch event is
//! `{"type": "ADDED", "object": {...}}` and a listing is `{"items": [...]}`,
//! where every object is a PersistentVolumeClaim. Only the fields needed for
//! capacity accounting and selection are decoded; everything else is ignored.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{WatchError, WatchResult};
use crate::ledger::{ClaimIdentity, ClaimRecord};
use crate::quantity::Quantity;
use crate::selector::Selector;

/// Resource request key holding the claim size.
pub const STORAGE_RESOURCE: &str = "storage";

/// Namespace assumed for claims that carry none.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Lifecycle kind of a claim event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClaimEventKind {
    /// Claim created (or first observed).
    Added,
    /// Claim removed.
    Deleted,
    /// Claim changed.
    Modified,
}

impl ClaimEventKind {
    /// Maps a wire event type, or None for kinds that carry no claim change.
    pub fn from_wire(kind: &str) -> Option<Self> {
        match kind {
            "ADDED" => Some(ClaimEventKind::Added),
            "DELETED" => Some(ClaimEventKind::Deleted),
            "MODIFIED" => Some(ClaimEventKind::Modified),
            _ => None,
        }
    }
}

/// Canonical event consumed by the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimEvent {
    /// What happened.
    pub kind: ClaimEventKind,
    /// Claim state carried by the event.
    pub record: ClaimRecord,
}

impl ClaimEvent {
    /// Creates a new event.
    pub fn new(kind: ClaimEventKind, record: ClaimRecord) -> Self {
        Self { kind, record }
    }
}

/// A watch event as delivered by the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawWatchEvent {
    /// Event type: ADDED, MODIFIED, DELETED, BOOKMARK or ERROR.
    #[serde(rename = "type")]
    pub kind: String,
    /// Claim object, or a status object for ERROR events.
    #[serde(default)]
    pub object: Value,
}

impl RawWatchEvent {
    /// Creates a raw event.
    pub fn new(kind: impl Into<String>, object: Value) -> Self {
        Self {
            kind: kind.into(),
            object,
        }
    }
}

/// A full listing as delivered by the list call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawClaimList {
    /// Claim objects. Kept undecoded so one bad item does not reject the listing.
    #[serde(default)]
    pub items: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawClaim {
    #[serde(default)]
    metadata: RawMetadata,
    #[serde(default)]
    spec: RawClaimSpec,
    #[serde(default)]
    status: RawClaimStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMetadata {
    name: Option<String>,
    namespace: Option<String>,
    resource_version: Option<String>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawClaimSpec {
    #[serde(default)]
    resources: RawResources,
    volume_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawResources {
    #[serde(default)]
    requests: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawClaimStatus {
    phase: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawStatus {
    code: Option<u16>,
    reason: Option<String>,
    message: Option<String>,
}

/// Result of normalizing a listing.
#[derive(Debug, Default)]
pub struct NormalizedListing {
    /// Claims that normalized cleanly.
    pub records: Vec<ClaimRecord>,
    /// Items dropped because they could not be normalized.
    pub skipped: usize,
}

/// Converts raw payloads into canonical events, applying the namespace filter
/// and any label or field selector.
#[derive(Debug, Clone, Default)]
pub struct EventNormalizer {
    namespace: Option<String>,
    labels: Selector,
    fields: Selector,
}

impl EventNormalizer {
    /// Creates a normalizer. `None` or an empty namespace watches all namespaces.
    pub fn new(namespace: Option<String>) -> Self {
        Self {
            namespace: namespace.filter(|ns| !ns.is_empty()),
            ..Self::default()
        }
    }

    /// Restricts claims to those whose labels match `selector`.
    pub fn with_label_selector(mut self, selector: Selector) -> Self {
        self.labels = selector;
        self
    }

    /// Restricts claims to those whose fields match `selector`.
    pub fn with_field_selector(mut self, selector: Selector) -> Self {
        self.fields = selector;
        self
    }

    /// The namespace filter, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// The label selector; empty when unset.
    pub fn label_selector(&self) -> &Selector {
        &self.labels
    }

    /// The field selector; empty when unset.
    pub fn field_selector(&self) -> &Selector {
        &self.fields
    }

    /// Normalizes one watch event.
    ///
    /// Returns `Ok(None)` for events that carry no claim change (bookmarks,
    /// unrecognized kinds, claims outside the watched namespace or selection).
    /// A MODIFIED event whose claim no longer matches the selectors becomes a
    /// DELETED event. An ERROR event becomes [`WatchError::StreamGone`];
    /// undecodable claims, missing sizes and malformed sizes are per-event
    /// errors, except on DELETED events, which are sized from the ledger.
    pub fn normalize(&self, raw: RawWatchEvent) -> WatchResult<Option<ClaimEvent>> {
        let kind = match ClaimEventKind::from_wire(&raw.kind) {
            Some(kind) => kind,
            None => {
                match raw.kind.as_str() {
                    "BOOKMARK" => debug!("bookmark event ignored"),
                    "ERROR" => return Err(stream_error(raw.object)),
                    other => warn!(kind = other, "unrecognized watch event kind ignored"),
                }
                return Ok(None);
            }
        };

        let (record, labels) = self.to_record(raw.object, kind == ClaimEventKind::Deleted)?;
        if !self.in_scope(&record.identity) {
            debug!(claim = %record.identity, "claim outside watched namespace ignored");
            return Ok(None);
        }
        if !self.selects(&record, &labels) {
            if kind == ClaimEventKind::Modified {
                debug!(claim = %record.identity, "claim no longer matches selectors, applying as DELETED");
                return Ok(Some(ClaimEvent::new(ClaimEventKind::Deleted, record)));
            }
            debug!(claim = %record.identity, "claim outside selectors ignored");
            return Ok(None);
        }
        Ok(Some(ClaimEvent::new(kind, record)))
    }

    /// Normalizes a listing, skipping (and logging) items that cannot be used.
    pub fn normalize_listing(&self, list: RawClaimList) -> NormalizedListing {
        let mut listing = NormalizedListing::default();
        for item in list.items {
            match self.to_record(item, false) {
                Ok((record, labels)) if self.in_scope(&record.identity) && self.selects(&record, &labels) => {
                    listing.records.push(record)
                }
                Ok((record, _)) => {
                    debug!(claim = %record.identity, "listed claim outside watch scope ignored");
                }
                Err(e) => {
                    warn!(error = %e, "listed claim skipped");
                    listing.skipped += 1;
                }
            }
        }
        listing
    }

    fn to_record(
        &self,
        object: Value,
        size_optional: bool,
    ) -> WatchResult<(ClaimRecord, BTreeMap<String, String>)> {
        let claim: RawClaim = serde_json::from_value(object)?;
        let name = claim
            .metadata
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| <serde_json::Error as serde::de::Error>::missing_field("metadata.name"))?;
        let namespace = claim
            .metadata
            .namespace
            .filter(|ns| !ns.is_empty())
            .or_else(|| self.namespace.clone())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        let identity = ClaimIdentity::new(namespace, name);

        let literal = claim.spec.resources.requests.get(STORAGE_RESOURCE);
        let requested = match literal.map(|l| Quantity::parse(l)) {
            Some(Ok(size)) => size,
            Some(Err(e)) if size_optional => {
                debug!(claim = %identity, error = %e, "unusable size on DELETED ignored");
                Quantity::ZERO
            }
            None if size_optional => Quantity::ZERO,
            Some(Err(e)) => return Err(e),
            None => {
                return Err(WatchError::MissingSizeField {
                    claim: identity.to_string(),
                })
            }
        };

        let record = ClaimRecord {
            identity,
            requested,
            volume_ref: claim.spec.volume_name.filter(|v| !v.is_empty()),
            phase: claim.status.phase,
            resource_version: claim.metadata.resource_version,
        };
        Ok((record, claim.metadata.labels))
    }

    fn selects(&self, record: &ClaimRecord, labels: &BTreeMap<String, String>) -> bool {
        if !self.labels.matches(labels) {
            return false;
        }
        if self.fields.is_empty() {
            return true;
        }
        let fields: BTreeMap<String, String> = [
            ("metadata.name", record.identity.name.as_str()),
            ("metadata.namespace", record.identity.namespace.as_str()),
            ("spec.volumeName", record.volume_ref.as_deref().unwrap_or_default()),
            ("status.phase", record.phase.as_deref().unwrap_or_default()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        self.fields.matches(&fields)
    }

    fn in_scope(&self, identity: &ClaimIdentity) -> bool {
        self.namespace
            .as_deref()
            .map_or(true, |ns| identity.namespace == ns)
    }
}

fn stream_error(object: Value) -> WatchError {
    let status: RawStatus = serde_json::from_value(object).unwrap_or_default();
    let reason = match (status.code, status.reason, status.message) {
        (code, _, Some(message)) => match code {
            Some(code) => format!("{} ({})", message, code),
            None => message,
        },
        (Some(code), Some(reason), None) => format!("{} ({})", reason, code),
        (None, Some(reason), None) => reason,
        (Some(code), None, None) => format!("status {}", code),
        (None, None, None) => "watch error".to_string(),
    };
    WatchError::StreamGone { reason }
}

/// Builds a claim object in wire shape. Used by canned sources and tests.
pub fn claim_object(namespace: &str, name: &str, size: &str) -> Value {
    serde_json::json!({
        "metadata": { "name": name, "namespace": namespace },
        "spec": { "resources": { "requests": { STORAGE_RESOURCE: size } } },
    })
}

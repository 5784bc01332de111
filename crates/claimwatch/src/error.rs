//! Error types for the claim watcher.

use thiserror::Error;

/// Result type alias for claim watcher operations.
pub type WatchResult<T> = Result<T, WatchError>;

/// Error variants for claim watcher operations.
#[derive(Debug, Error)]
pub enum WatchError {
    /// A size literal could not be parsed.
    #[error("Malformed quantity {literal:?}: {reason}")]
    MalformedQuantity {
        /// The offending literal.
        literal: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A claim has no storage request.
    #[error("Claim {claim} has no storage request")]
    MissingSizeField {
        /// The claim missing its size.
        claim: String,
    },

    /// A DELETED or MODIFIED event referenced a claim absent from the ledger.
    #[error("Unknown claim: {claim}")]
    UnknownClaim {
        /// The claim that was not found.
        claim: String,
    },

    /// The running total diverged from the sum over the ledger.
    #[error("Ledger inconsistency: running total {running} bytes, recomputed {recomputed} bytes")]
    LedgerInconsistency {
        /// Incrementally maintained total in bytes.
        running: i128,
        /// Sum over ledger entries in bytes.
        recomputed: i128,
    },

    /// The running total dropped below zero.
    #[error("Ledger inconsistency: running total went negative ({total} bytes)")]
    NegativeTotal {
        /// The negative total in bytes.
        total: i128,
    },

    /// The watch stream can no longer be resumed and must be re-listed.
    #[error("Watch stream gone: {reason}")]
    StreamGone {
        /// Reason reported by the stream.
        reason: String,
    },

    /// The event source failed.
    #[error("Event source error: {0}")]
    Source(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WatchError {
    /// Creates a `MalformedQuantity` error.
    pub fn malformed(literal: &str, reason: impl Into<String>) -> Self {
        WatchError::MalformedQuantity {
            literal: literal.to_string(),
            reason: reason.into(),
        }
    }

    /// Errors that only affect the event that raised them; the stream continues.
    pub fn is_per_event(&self) -> bool {
        matches!(
            self,
            WatchError::MalformedQuantity { .. }
                | WatchError::MissingSizeField { .. }
                | WatchError::UnknownClaim { .. }
                | WatchError::Json(_)
        )
    }

    /// Errors that invalidate the ledger or the stream position and need a full relist.
    pub fn requires_relist(&self) -> bool {
        matches!(
            self,
            WatchError::LedgerInconsistency { .. }
                | WatchError::NegativeTotal { .. }
                | WatchError::StreamGone { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_result_alias() {
        let ok: WatchResult<u32> = Ok(7);
        assert!(ok.is_ok());

        let err: WatchResult<u32> = Err(WatchError::Source("closed".to_string()));
        assert!(err.is_err());
    }

    #[test]
    fn test_malformed_quantity_message() {
        let err = WatchError::malformed("12Qi", "unknown suffix");
        let msg = format!("{}", err);
        assert!(msg.contains("\"12Qi\""));
        assert!(msg.contains("unknown suffix"));
    }

    #[test]
    fn test_ledger_inconsistency_message() {
        let err = WatchError::LedgerInconsistency {
            running: 10,
            recomputed: 12,
        };
        assert_eq!(
            format!("{}", err),
            "Ledger inconsistency: running total 10 bytes, recomputed 12 bytes"
        );
    }

    #[test]
    fn test_per_event_classification() {
        assert!(WatchError::malformed("x", "bad").is_per_event());
        assert!(WatchError::MissingSizeField {
            claim: "default/a".to_string()
        }
        .is_per_event());
        assert!(WatchError::UnknownClaim {
            claim: "default/a".to_string()
        }
        .is_per_event());
        assert!(!WatchError::Source("eof".to_string()).is_per_event());
    }

    #[test]
    fn test_relist_classification() {
        assert!(WatchError::LedgerInconsistency {
            running: 1,
            recomputed: 2
        }
        .requires_relist());
        assert!(WatchError::NegativeTotal { total: -1 }.requires_relist());
        assert!(WatchError::StreamGone {
            reason: "too old resource version".to_string()
        }
        .requires_relist());
        assert!(!WatchError::Config("bad".to_string()).requires_relist());
        assert!(!WatchError::malformed("x", "bad").requires_relist());
    }

    #[test]
    fn test_io_error_from_std() {
        let std_err = std::io::Error::new(std::io::ErrorKind::NotFound, "listing.json");
        let err: WatchError = std_err.into();
        assert!(matches!(err, WatchError::Io(_)));
    }
}

//! Relay error types.

use thiserror::Error;
use uuid::Uuid;

use crate::store::RecordStatus;

/// Top-level relay error type.
///
/// The variants follow the relay's failure taxonomy: configuration errors
/// fail fast, transport errors are the only retryable kind, and execution
/// errors are captured per record rather than propagated out of the agent
/// loop.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The store is unreachable, unauthenticated, or not configured.
    #[error("relay integration unavailable: {0}")]
    Configuration(String),

    /// A transient network failure talking to the store or broadcast layer.
    #[error("transport error: {0}")]
    Transport(String),

    /// A record, pairing, or turn event was not found.
    #[error("not found: {0}")]
    NotFound(Uuid),

    /// A status write was rejected because the record is not in a state the
    /// transition may start from.
    #[error("record {id} cannot move from {from} to {to}")]
    TransitionRejected {
        /// The record that rejected the write.
        id: Uuid,
        /// The status the record currently holds.
        from: RecordStatus,
        /// The status the caller asked for.
        to: RecordStatus,
    },

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// The tabletop surface could not carry out a directive.
    #[error("execution error: {0}")]
    Execution(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl RelayError {
    /// Returns `true` for errors worth retrying with backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_errors_are_transient() {
        assert!(RelayError::Transport("reset".into()).is_transient());
        assert!(!RelayError::Configuration("no url".into()).is_transient());
        assert!(!RelayError::Validation("bad".into()).is_transient());
        assert!(!RelayError::NotFound(Uuid::nil()).is_transient());
    }

    #[test]
    fn test_configuration_error_surfaces_verbatim() {
        let err = RelayError::Configuration("DATABASE_URL is not set".into());
        assert_eq!(
            err.to_string(),
            "relay integration unavailable: DATABASE_URL is not set"
        );
    }

    #[test]
    fn test_transition_rejected_message_names_statuses() {
        let id = Uuid::nil();
        let err = RelayError::TransitionRejected {
            id,
            from: RecordStatus::Delivered,
            to: RecordStatus::Failed,
        };
        assert_eq!(
            err.to_string(),
            format!("record {id} cannot move from delivered to failed")
        );
    }
}

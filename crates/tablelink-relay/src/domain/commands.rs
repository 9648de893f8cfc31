//! Commands for the relay context.

use serde::Deserialize;
use uuid::Uuid;

/// Command issued by a bridge agent to open a new pairing.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePairing {
    /// Identity of the agent instance asking for a code.
    pub agent_ref: String,
}

/// Command issued by the chat side to claim a pairing code.
#[derive(Debug, Clone, Deserialize)]
pub struct ClaimPairing {
    /// The code the agent displayed.
    pub code: String,
    /// Identity of the issuer claiming it.
    pub issuer_ref: String,
}

/// Command to replace a pairing's code and reopen it.
#[derive(Debug, Clone)]
pub struct ReissuePairing {
    /// The pairing to reissue.
    pub pairing_id: Uuid,
}

/// Command recording that the agent executed a record successfully.
#[derive(Debug, Clone)]
pub struct MarkDelivered {
    /// The record that was executed.
    pub record_id: Uuid,
    /// The outcome the agent observed.
    pub result: serde_json::Value,
}

/// Command recording that the agent could not execute a record.
#[derive(Debug, Clone)]
pub struct MarkFailed {
    /// The record that failed.
    pub record_id: Uuid,
    /// Why it failed.
    pub error: String,
}

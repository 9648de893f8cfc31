//! What the issuer gets back from a relayed request.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tablelink_core::dice::DiceRoll;
use tablelink_core::store::{RecordStatus, RelayRecord};
use uuid::Uuid;

/// Where an outcome's result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeOrigin {
    /// Reported by the bridge agent through the store.
    Authoritative,
    /// Computed by the issuer because the agent never answered.
    LocalFallback,
}

/// Final answer for one relayed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayOutcome {
    /// The record this outcome belongs to.
    pub record_id: Uuid,
    /// Terminal status as seen by the issuer.
    pub status: RecordStatus,
    /// Whether the result is the agent's or the issuer's own.
    pub origin: OutcomeOrigin,
    /// Success payload.
    pub result: Option<serde_json::Value>,
    /// Failure message.
    pub error: Option<String>,
}

impl RelayOutcome {
    /// Outcome mirroring a record's current state.
    #[must_use]
    pub fn from_record(record: &RelayRecord) -> Self {
        Self {
            record_id: record.id,
            status: record.status,
            origin: OutcomeOrigin::Authoritative,
            result: record.result.clone(),
            error: record.error.clone(),
        }
    }

    /// Outcome for a record nobody answered within `waited`.
    #[must_use]
    pub fn timed_out(record_id: Uuid, waited: Duration) -> Self {
        Self {
            record_id,
            status: RecordStatus::Timeout,
            origin: OutcomeOrigin::Authoritative,
            result: None,
            error: Some(format!(
                "no response from the tabletop within {}s",
                waited.as_secs()
            )),
        }
    }

    /// Replaces the result with a roll the issuer made itself.
    #[must_use]
    pub fn with_local_roll(mut self, roll: &DiceRoll) -> Self {
        self.origin = OutcomeOrigin::LocalFallback;
        self.result = Some(roll.to_result());
        self
    }

    /// Returns `true` if the caller should render the fallback path.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.origin == OutcomeOrigin::LocalFallback || self.status == RecordStatus::Timeout
    }
}

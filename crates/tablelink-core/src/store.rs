//! Shared relay store abstraction.
//!
//! The store holds three tables: pairings, relay records, and turn events.
//! Reads are filtered by pairing and status; writes are single-row updates
//! keyed by id. Status writes are conditional so that terminal statuses can
//! never be overwritten, whichever actor loses the race.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RelayError;

/// Expiry for roll records.
pub const ROLL_TTL: Duration = Duration::from_secs(30);

/// Expiry for every non-roll record.
pub const ACTION_TTL: Duration = Duration::from_secs(5 * 60);

fn unknown(column: &str, value: &str) -> RelayError {
    RelayError::Infrastructure(format!("unknown {column} value: {value}"))
}

/// Lifecycle of a pairing between one issuer and one bridge agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingStatus {
    /// Code issued by the agent, not yet claimed by an issuer.
    Pending,
    /// Claimed; records may flow.
    Connected,
    /// Never claimed before its expiry.
    Expired,
}

impl PairingStatus {
    /// Returns the stored representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Connected => "connected",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for PairingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PairingStatus {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "connected" => Ok(Self::Connected),
            "expired" => Ok(Self::Expired),
            other => Err(unknown("pairing status", other)),
        }
    }
}

/// Link between one issuer identity and one bridge-agent instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pairing {
    /// Pairing identifier; also the broadcast topic key.
    pub id: Uuid,
    /// Short single-use code shown by the agent.
    pub code: String,
    /// Issuer identity (surface + user), set on claim.
    pub issuer_ref: Option<String>,
    /// Agent identity that created the pairing.
    pub agent_ref: String,
    /// Current status.
    pub status: PairingStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time the issuer claimed the code.
    pub connected_at: Option<DateTime<Utc>>,
    /// Time after which an unclaimed code is dead.
    pub expires_at: DateTime<Utc>,
}

impl Pairing {
    /// Returns `true` if an issuer may still claim this pairing's code.
    #[must_use]
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == PairingStatus::Pending && self.expires_at > now
    }
}

/// The kind of work a record asks the agent to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// A dice roll.
    Roll,
    /// A generic character action.
    Action,
    /// A short or long rest.
    Rest,
    /// Restore hit points.
    Heal,
    /// Apply damage.
    Damage,
    /// Use an item or feature.
    Use,
}

impl RecordKind {
    /// Returns the stored representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Roll => "roll",
            Self::Action => "action",
            Self::Rest => "rest",
            Self::Heal => "heal",
            Self::Damage => "damage",
            Self::Use => "use",
        }
    }

    /// How long a freshly published record of this kind stays live.
    #[must_use]
    pub fn default_ttl(self) -> Duration {
        match self {
            Self::Roll => ROLL_TTL,
            _ => ACTION_TTL,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "roll" => Ok(Self::Roll),
            "action" => Ok(Self::Action),
            "rest" => Ok(Self::Rest),
            "heal" => Ok(Self::Heal),
            "damage" => Ok(Self::Damage),
            "use" => Ok(Self::Use),
            other => Err(unknown("record kind", other)),
        }
    }
}

/// Record status. Moves along `pending → processing → {delivered | failed}`
/// or `pending → timeout` and never leaves a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Published, waiting for an agent.
    Pending,
    /// Claimed by an agent.
    Processing,
    /// Executed; `result` holds the observed outcome.
    Delivered,
    /// Execution failed; `error` holds the message.
    Failed,
    /// Nobody picked the record up in time.
    Timeout,
}

impl RecordStatus {
    /// Returns the stored representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }

    /// Returns `true` once the record can no longer change.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Failed | Self::Timeout)
    }

    /// Returns `true` if `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing | Self::Timeout)
                | (Self::Processing, Self::Delivered | Self::Failed)
        )
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            "timeout" => Ok(Self::Timeout),
            other => Err(unknown("record status", other)),
        }
    }
}

/// A status write against one record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordTransition {
    /// The agent takes ownership of a pending record.
    Claim,
    /// The agent observed a successful outcome.
    Deliver(serde_json::Value),
    /// The agent could not execute the record.
    Fail(String),
    /// The record expired before anyone claimed it.
    Timeout,
}

impl RecordTransition {
    /// The status this transition writes.
    #[must_use]
    pub fn target(&self) -> RecordStatus {
        match self {
            Self::Claim => RecordStatus::Processing,
            Self::Deliver(_) => RecordStatus::Delivered,
            Self::Fail(_) => RecordStatus::Failed,
            Self::Timeout => RecordStatus::Timeout,
        }
    }

    /// The only status this transition may start from.
    #[must_use]
    pub fn source(&self) -> RecordStatus {
        match self {
            Self::Claim | Self::Timeout => RecordStatus::Pending,
            Self::Deliver(_) | Self::Fail(_) => RecordStatus::Processing,
        }
    }
}

/// One unit of relayed work (a roll, action, heal, rest, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayRecord {
    /// Globally unique record identifier.
    pub id: Uuid,
    /// The pairing this record travels on.
    pub pairing_id: Uuid,
    /// What the agent should do.
    pub kind: RecordKind,
    /// Issuer identity that published the record.
    pub issuer_ref: String,
    /// Kind-specific request payload.
    pub payload: serde_json::Value,
    /// Current status.
    pub status: RecordStatus,
    /// Opaque success payload, set on delivery.
    pub result: Option<serde_json::Value>,
    /// Failure message, set on failure.
    pub error: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last agent-side status write.
    pub processed_at: Option<DateTime<Utc>>,
    /// Time after which the record is no longer live.
    pub expires_at: DateTime<Utc>,
}

impl RelayRecord {
    /// Creates a new pending record with a fresh id.
    #[must_use]
    pub fn new(
        pairing_id: Uuid,
        kind: RecordKind,
        issuer_ref: String,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            pairing_id,
            kind,
            issuer_ref,
            payload,
            status: RecordStatus::Pending,
            result: None,
            error: None,
            created_at,
            processed_at: None,
            expires_at,
        }
    }

    /// Returns `true` once `expires_at` has passed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Applies a status write in memory, enforcing the status machine.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::TransitionRejected` if the record is not in the
    /// transition's source status.
    pub fn apply(
        &mut self,
        transition: RecordTransition,
        now: DateTime<Utc>,
    ) -> Result<(), RelayError> {
        let target = transition.target();
        if self.status != transition.source() || !self.status.can_transition_to(target) {
            return Err(RelayError::TransitionRejected {
                id: self.id,
                from: self.status,
                to: target,
            });
        }

        match transition {
            RecordTransition::Claim => self.processed_at = Some(now),
            RecordTransition::Deliver(result) => {
                self.result = Some(result);
                self.processed_at = Some(now);
            }
            RecordTransition::Fail(message) => {
                self.error = Some(message);
                self.processed_at = Some(now);
            }
            RecordTransition::Timeout => {}
        }
        self.status = target;
        Ok(())
    }
}

/// Kinds of combat announcements written for the chat side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnEventType {
    /// A combatant's turn began.
    TurnStart,
    /// A combatant's turn ended.
    TurnEnd,
    /// The round counter changed.
    RoundChange,
    /// Combat started.
    CombatStart,
    /// Combat ended.
    CombatEnd,
}

impl TurnEventType {
    /// Returns the stored representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TurnStart => "turn_start",
            Self::TurnEnd => "turn_end",
            Self::RoundChange => "round_change",
            Self::CombatStart => "combat_start",
            Self::CombatEnd => "combat_end",
        }
    }
}

impl fmt::Display for TurnEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TurnEventType {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "turn_start" => Ok(Self::TurnStart),
            "turn_end" => Ok(Self::TurnEnd),
            "round_change" => Ok(Self::RoundChange),
            "combat_start" => Ok(Self::CombatStart),
            "combat_end" => Ok(Self::CombatEnd),
            other => Err(unknown("turn event type", other)),
        }
    }
}

/// Whether the chat side has announced a turn event yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnEventStatus {
    /// Written by the agent, not yet announced.
    Pending,
    /// Announced by the issuer.
    Announced,
}

impl TurnEventStatus {
    /// Returns the stored representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Announced => "announced",
        }
    }
}

impl fmt::Display for TurnEventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TurnEventStatus {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "announced" => Ok(Self::Announced),
            other => Err(unknown("turn event status", other)),
        }
    }
}

/// A combat announcement travelling from the agent to the chat side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnEvent {
    /// Event identifier.
    pub id: Uuid,
    /// The pairing whose chat channel should announce this.
    pub pairing_id: Uuid,
    /// What happened.
    pub event_type: TurnEventType,
    /// The combatant concerned, if any.
    pub combatant_name: Option<String>,
    /// The round at the time of the event.
    pub round: i32,
    /// Free-form flags (e.g. which actions remain).
    pub action_flags: serde_json::Value,
    /// Announcement status.
    pub status: TurnEventStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Counts returned by one record-expiry pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExpiryCounts {
    /// Pending records moved to `timeout`.
    pub timed_out: u64,
    /// Processing records moved to `failed`.
    pub abandoned: u64,
}

/// Message written on processing records that outlive their expiry.
pub const ABANDONED_MESSAGE: &str = "expired while processing";

/// Repository trait for the shared relay store.
#[async_trait]
pub trait RelayStore: Send + Sync {
    /// Insert a new pairing.
    async fn insert_pairing(&self, pairing: &Pairing) -> Result<(), RelayError>;

    /// Load a pairing by id.
    async fn get_pairing(&self, id: Uuid) -> Result<Option<Pairing>, RelayError>;

    /// Load a pairing by its short code.
    async fn find_pairing_by_code(&self, code: &str) -> Result<Option<Pairing>, RelayError>;

    /// Move a pending, unexpired pairing to `connected`.
    ///
    /// Fails with `Validation` if the pairing is already connected or expired.
    async fn connect_pairing(
        &self,
        id: Uuid,
        issuer_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<Pairing, RelayError>;

    /// Replace a pairing's code and put it back to `pending`.
    async fn reissue_pairing(
        &self,
        id: Uuid,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Pairing, RelayError>;

    /// Insert a new record. Inserting the same id twice is a no-op so that
    /// retried inserts stay idempotent.
    async fn insert_record(&self, record: &RelayRecord) -> Result<(), RelayError>;

    /// Load a record by id.
    async fn get_record(&self, id: Uuid) -> Result<Option<RelayRecord>, RelayError>;

    /// List a pairing's records, optionally filtered by status, oldest first.
    async fn list_records(
        &self,
        pairing_id: Uuid,
        status: Option<RecordStatus>,
    ) -> Result<Vec<RelayRecord>, RelayError>;

    /// Atomically move the oldest live pending record of a pairing to
    /// `processing` and return it.
    async fn claim_next(
        &self,
        pairing_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<RelayRecord>, RelayError>;

    /// Apply a conditional status write.
    ///
    /// Fails with `NotFound` if the record does not exist and with
    /// `TransitionRejected` if it is not in the transition's source status.
    async fn transition_record(
        &self,
        id: Uuid,
        transition: RecordTransition,
        now: DateTime<Utc>,
    ) -> Result<RelayRecord, RelayError>;

    /// Insert a turn event.
    async fn insert_turn_event(&self, event: &TurnEvent) -> Result<(), RelayError>;

    /// List a pairing's turn events, optionally filtered by status, oldest
    /// first.
    async fn list_turn_events(
        &self,
        pairing_id: Uuid,
        status: Option<TurnEventStatus>,
    ) -> Result<Vec<TurnEvent>, RelayError>;

    /// Mark a turn event as announced.
    async fn mark_turn_event_announced(&self, id: Uuid) -> Result<TurnEvent, RelayError>;

    /// Time out expired pending records and fail expired processing ones.
    async fn expire_records(&self, now: DateTime<Utc>) -> Result<ExpiryCounts, RelayError>;

    /// Expire pending pairings past their expiry.
    async fn expire_pairings(&self, now: DateTime<Utc>) -> Result<u64, RelayError>;

    /// Delete terminal records created before `cutoff`.
    async fn purge_records(&self, cutoff: DateTime<Utc>) -> Result<u64, RelayError>;
}

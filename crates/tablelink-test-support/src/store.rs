//! Test stores — in-memory and failing `RelayStore` implementations.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tablelink_core::error::RelayError;
use tablelink_core::store::{
    ABANDONED_MESSAGE, ExpiryCounts, Pairing, PairingStatus, RecordStatus, RecordTransition,
    RelayRecord, RelayStore, TurnEvent, TurnEventStatus,
};
use uuid::Uuid;

/// One successful status write: record id, previous status, new status.
pub type TransitionLog = Vec<(Uuid, RecordStatus, RecordStatus)>;

#[derive(Debug, Default)]
struct Inner {
    pairings: HashMap<Uuid, Pairing>,
    records: Vec<RelayRecord>,
    turn_events: Vec<TurnEvent>,
    transitions: TransitionLog,
}

impl Inner {
    fn record_mut(&mut self, id: Uuid) -> Option<&mut RelayRecord> {
        self.records.iter_mut().find(|r| r.id == id)
    }

    fn apply(
        &mut self,
        id: Uuid,
        transition: RecordTransition,
        now: DateTime<Utc>,
    ) -> Result<RelayRecord, RelayError> {
        let record = self.record_mut(id).ok_or(RelayError::NotFound(id))?;
        let from = record.status;
        record.apply(transition, now)?;
        let updated = record.clone();
        self.transitions.push((id, from, updated.status));
        Ok(updated)
    }
}

/// A `RelayStore` kept entirely in memory with the same conditional-write
/// semantics as the PostgreSQL store. Records every successful status write
/// so tests can assert on the exact path a record took.
#[derive(Debug, Default)]
pub struct InMemoryRelayStore {
    inner: Mutex<Inner>,
}

impl InMemoryRelayStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record in insertion order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn records(&self) -> Vec<RelayRecord> {
        self.inner.lock().unwrap().records.clone()
    }

    /// Snapshot of every turn event in insertion order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn turn_events(&self) -> Vec<TurnEvent> {
        self.inner.lock().unwrap().turn_events.clone()
    }

    /// Every successful status write, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn transitions(&self) -> TransitionLog {
        self.inner.lock().unwrap().transitions.clone()
    }

    /// Status writes that touched one record.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn transitions_for(&self, id: Uuid) -> Vec<(RecordStatus, RecordStatus)> {
        self.inner
            .lock()
            .unwrap()
            .transitions
            .iter()
            .filter(|(record_id, _, _)| *record_id == id)
            .map(|(_, from, to)| (*from, *to))
            .collect()
    }
}

#[async_trait]
impl RelayStore for InMemoryRelayStore {
    async fn insert_pairing(&self, pairing: &Pairing) -> Result<(), RelayError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.pairings.values().any(|p| p.code == pairing.code) {
            return Err(RelayError::Validation(format!(
                "pairing code {} already in use",
                pairing.code
            )));
        }
        inner.pairings.insert(pairing.id, pairing.clone());
        Ok(())
    }

    async fn get_pairing(&self, id: Uuid) -> Result<Option<Pairing>, RelayError> {
        Ok(self.inner.lock().unwrap().pairings.get(&id).cloned())
    }

    async fn find_pairing_by_code(&self, code: &str) -> Result<Option<Pairing>, RelayError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .pairings
            .values()
            .find(|p| p.code == code)
            .cloned())
    }

    async fn connect_pairing(
        &self,
        id: Uuid,
        issuer_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<Pairing, RelayError> {
        let mut inner = self.inner.lock().unwrap();
        let pairing = inner.pairings.get_mut(&id).ok_or(RelayError::NotFound(id))?;
        if !pairing.is_claimable(now) {
            return Err(RelayError::Validation(format!(
                "pairing code {} is no longer claimable",
                pairing.code
            )));
        }
        pairing.status = PairingStatus::Connected;
        pairing.issuer_ref = Some(issuer_ref.to_owned());
        pairing.connected_at = Some(now);
        Ok(pairing.clone())
    }

    async fn reissue_pairing(
        &self,
        id: Uuid,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Pairing, RelayError> {
        let mut inner = self.inner.lock().unwrap();
        let pairing = inner.pairings.get_mut(&id).ok_or(RelayError::NotFound(id))?;
        code.clone_into(&mut pairing.code);
        pairing.status = PairingStatus::Pending;
        pairing.issuer_ref = None;
        pairing.connected_at = None;
        pairing.expires_at = expires_at;
        Ok(pairing.clone())
    }

    async fn insert_record(&self, record: &RelayRecord) -> Result<(), RelayError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.records.iter().all(|r| r.id != record.id) {
            inner.records.push(record.clone());
        }
        Ok(())
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<RelayRecord>, RelayError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .records
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn list_records(
        &self,
        pairing_id: Uuid,
        status: Option<RecordStatus>,
    ) -> Result<Vec<RelayRecord>, RelayError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .records
            .iter()
            .filter(|r| r.pairing_id == pairing_id)
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect())
    }

    async fn claim_next(
        &self,
        pairing_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<RelayRecord>, RelayError> {
        let mut inner = self.inner.lock().unwrap();
        let next = inner
            .records
            .iter()
            .find(|r| {
                r.pairing_id == pairing_id && r.status == RecordStatus::Pending && !r.is_expired(now)
            })
            .map(|r| r.id);
        match next {
            Some(id) => inner.apply(id, RecordTransition::Claim, now).map(Some),
            None => Ok(None),
        }
    }

    async fn transition_record(
        &self,
        id: Uuid,
        transition: RecordTransition,
        now: DateTime<Utc>,
    ) -> Result<RelayRecord, RelayError> {
        self.inner.lock().unwrap().apply(id, transition, now)
    }

    async fn insert_turn_event(&self, event: &TurnEvent) -> Result<(), RelayError> {
        self.inner.lock().unwrap().turn_events.push(event.clone());
        Ok(())
    }

    async fn list_turn_events(
        &self,
        pairing_id: Uuid,
        status: Option<TurnEventStatus>,
    ) -> Result<Vec<TurnEvent>, RelayError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .turn_events
            .iter()
            .filter(|e| e.pairing_id == pairing_id)
            .filter(|e| status.is_none_or(|s| e.status == s))
            .cloned()
            .collect())
    }

    async fn mark_turn_event_announced(&self, id: Uuid) -> Result<TurnEvent, RelayError> {
        let mut inner = self.inner.lock().unwrap();
        let event = inner
            .turn_events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(RelayError::NotFound(id))?;
        event.status = TurnEventStatus::Announced;
        Ok(event.clone())
    }

    async fn expire_records(&self, now: DateTime<Utc>) -> Result<ExpiryCounts, RelayError> {
        let mut inner = self.inner.lock().unwrap();
        let expired: Vec<(Uuid, RecordStatus)> = inner
            .records
            .iter()
            .filter(|r| r.is_expired(now))
            .map(|r| (r.id, r.status))
            .collect();

        let mut counts = ExpiryCounts::default();
        for (id, status) in expired {
            match status {
                RecordStatus::Pending => {
                    inner.apply(id, RecordTransition::Timeout, now)?;
                    counts.timed_out += 1;
                }
                RecordStatus::Processing => {
                    inner.apply(id, RecordTransition::Fail(ABANDONED_MESSAGE.to_owned()), now)?;
                    counts.abandoned += 1;
                }
                _ => {}
            }
        }
        Ok(counts)
    }

    async fn expire_pairings(&self, now: DateTime<Utc>) -> Result<u64, RelayError> {
        let mut inner = self.inner.lock().unwrap();
        let mut expired = 0;
        for pairing in inner.pairings.values_mut() {
            if pairing.status == PairingStatus::Pending && pairing.expires_at <= now {
                pairing.status = PairingStatus::Expired;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn purge_records(&self, cutoff: DateTime<Utc>) -> Result<u64, RelayError> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.records.len();
        inner
            .records
            .retain(|r| !(r.status.is_terminal() && r.created_at < cutoff));
        Ok((before - inner.records.len()) as u64)
    }
}

/// The kind of error a `FailingRelayStore` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Configuration,
    Transport,
}

/// A relay store that fails every call. Useful for testing fail-fast and
/// retry paths.
#[derive(Debug)]
pub struct FailingRelayStore {
    failure: Failure,
}

impl FailingRelayStore {
    /// A store that is not reachable at all.
    #[must_use]
    pub fn unconfigured() -> Self {
        Self {
            failure: Failure::Configuration,
        }
    }

    /// A store whose every call hits a transient network error.
    #[must_use]
    pub fn unreachable() -> Self {
        Self {
            failure: Failure::Transport,
        }
    }

    fn error(&self) -> RelayError {
        match self.failure {
            Failure::Configuration => {
                RelayError::Configuration("password authentication failed".into())
            }
            Failure::Transport => RelayError::Transport("connection refused".into()),
        }
    }
}

#[async_trait]
impl RelayStore for FailingRelayStore {
    async fn insert_pairing(&self, _pairing: &Pairing) -> Result<(), RelayError> {
        Err(self.error())
    }

    async fn get_pairing(&self, _id: Uuid) -> Result<Option<Pairing>, RelayError> {
        Err(self.error())
    }

    async fn find_pairing_by_code(&self, _code: &str) -> Result<Option<Pairing>, RelayError> {
        Err(self.error())
    }

    async fn connect_pairing(
        &self,
        _id: Uuid,
        _issuer_ref: &str,
        _now: DateTime<Utc>,
    ) -> Result<Pairing, RelayError> {
        Err(self.error())
    }

    async fn reissue_pairing(
        &self,
        _id: Uuid,
        _code: &str,
        _expires_at: DateTime<Utc>,
    ) -> Result<Pairing, RelayError> {
        Err(self.error())
    }

    async fn insert_record(&self, _record: &RelayRecord) -> Result<(), RelayError> {
        Err(self.error())
    }

    async fn get_record(&self, _id: Uuid) -> Result<Option<RelayRecord>, RelayError> {
        Err(self.error())
    }

    async fn list_records(
        &self,
        _pairing_id: Uuid,
        _status: Option<RecordStatus>,
    ) -> Result<Vec<RelayRecord>, RelayError> {
        Err(self.error())
    }

    async fn claim_next(
        &self,
        _pairing_id: Uuid,
        _now: DateTime<Utc>,
    ) -> Result<Option<RelayRecord>, RelayError> {
        Err(self.error())
    }

    async fn transition_record(
        &self,
        _id: Uuid,
        _transition: RecordTransition,
        _now: DateTime<Utc>,
    ) -> Result<RelayRecord, RelayError> {
        Err(self.error())
    }

    async fn insert_turn_event(&self, _event: &TurnEvent) -> Result<(), RelayError> {
        Err(self.error())
    }

    async fn list_turn_events(
        &self,
        _pairing_id: Uuid,
        _status: Option<TurnEventStatus>,
    ) -> Result<Vec<TurnEvent>, RelayError> {
        Err(self.error())
    }

    async fn mark_turn_event_announced(&self, _id: Uuid) -> Result<TurnEvent, RelayError> {
        Err(self.error())
    }

    async fn expire_records(&self, _now: DateTime<Utc>) -> Result<ExpiryCounts, RelayError> {
        Err(self.error())
    }

    async fn expire_pairings(&self, _now: DateTime<Utc>) -> Result<u64, RelayError> {
        Err(self.error())
    }

    async fn purge_records(&self, _cutoff: DateTime<Utc>) -> Result<u64, RelayError> {
        Err(self.error())
    }
}

//! Retry decorator for any `RelayStore`.
//!
//! Only `RelayError::Transport` failures are retried. Configuration errors
//! fail on the first attempt so a missing or unauthenticated store surfaces
//! immediately. Status writes stay safe to retry: a write that landed before
//! the transport failed is rejected on the next attempt instead of applied
//! twice, and record inserts ignore a duplicate id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tablelink_core::error::RelayError;
use tablelink_core::retry::RetryPolicy;
use tablelink_core::store::{
    ExpiryCounts, Pairing, RecordStatus, RecordTransition, RelayRecord, RelayStore, TurnEvent,
    TurnEventStatus,
};
use uuid::Uuid;

/// Wraps a store and retries transient failures with backoff.
#[derive(Debug, Clone)]
pub struct RetryingRelayStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: RelayStore> RetryingRelayStore<S> {
    /// Wrap `inner` with `policy`.
    #[must_use]
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// The wrapped store.
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: RelayStore> RelayStore for RetryingRelayStore<S> {
    async fn insert_pairing(&self, pairing: &Pairing) -> Result<(), RelayError> {
        self.policy
            .run("insert_pairing", || self.inner.insert_pairing(pairing))
            .await
    }

    async fn get_pairing(&self, id: Uuid) -> Result<Option<Pairing>, RelayError> {
        self.policy
            .run("get_pairing", || self.inner.get_pairing(id))
            .await
    }

    async fn find_pairing_by_code(&self, code: &str) -> Result<Option<Pairing>, RelayError> {
        self.policy
            .run("find_pairing_by_code", || self.inner.find_pairing_by_code(code))
            .await
    }

    async fn connect_pairing(
        &self,
        id: Uuid,
        issuer_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<Pairing, RelayError> {
        self.policy
            .run("connect_pairing", || {
                self.inner.connect_pairing(id, issuer_ref, now)
            })
            .await
    }

    async fn reissue_pairing(
        &self,
        id: Uuid,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Pairing, RelayError> {
        self.policy
            .run("reissue_pairing", || {
                self.inner.reissue_pairing(id, code, expires_at)
            })
            .await
    }

    async fn insert_record(&self, record: &RelayRecord) -> Result<(), RelayError> {
        self.policy
            .run("insert_record", || self.inner.insert_record(record))
            .await
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<RelayRecord>, RelayError> {
        self.policy
            .run("get_record", || self.inner.get_record(id))
            .await
    }

    async fn list_records(
        &self,
        pairing_id: Uuid,
        status: Option<RecordStatus>,
    ) -> Result<Vec<RelayRecord>, RelayError> {
        self.policy
            .run("list_records", || self.inner.list_records(pairing_id, status))
            .await
    }

    async fn claim_next(
        &self,
        pairing_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<RelayRecord>, RelayError> {
        self.policy
            .run("claim_next", || self.inner.claim_next(pairing_id, now))
            .await
    }

    async fn transition_record(
        &self,
        id: Uuid,
        transition: RecordTransition,
        now: DateTime<Utc>,
    ) -> Result<RelayRecord, RelayError> {
        self.policy
            .run("transition_record", || {
                self.inner.transition_record(id, transition.clone(), now)
            })
            .await
    }

    async fn insert_turn_event(&self, event: &TurnEvent) -> Result<(), RelayError> {
        self.policy
            .run("insert_turn_event", || self.inner.insert_turn_event(event))
            .await
    }

    async fn list_turn_events(
        &self,
        pairing_id: Uuid,
        status: Option<TurnEventStatus>,
    ) -> Result<Vec<TurnEvent>, RelayError> {
        self.policy
            .run("list_turn_events", || {
                self.inner.list_turn_events(pairing_id, status)
            })
            .await
    }

    async fn mark_turn_event_announced(&self, id: Uuid) -> Result<TurnEvent, RelayError> {
        self.policy
            .run("mark_turn_event_announced", || {
                self.inner.mark_turn_event_announced(id)
            })
            .await
    }

    async fn expire_records(&self, now: DateTime<Utc>) -> Result<ExpiryCounts, RelayError> {
        self.policy
            .run("expire_records", || self.inner.expire_records(now))
            .await
    }

    async fn expire_pairings(&self, now: DateTime<Utc>) -> Result<u64, RelayError> {
        self.policy
            .run("expire_pairings", || self.inner.expire_pairings(now))
            .await
    }

    async fn purge_records(&self, cutoff: DateTime<Utc>) -> Result<u64, RelayError> {
        self.policy
            .run("purge_records", || self.inner.purge_records(cutoff))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use chrono::{TimeDelta, TimeZone};
    use tablelink_core::store::RecordKind;
    use tablelink_test_support::{FailingRelayStore, InMemoryRelayStore};

    /// Fails the first `failures` calls to `get_record` and `insert_record`
    /// with a transport error, then delegates.
    struct FlakyStore {
        inner: InMemoryRelayStore,
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyStore {
        fn new(failures: u32) -> Self {
            Self {
                inner: InMemoryRelayStore::new(),
                failures,
                calls: AtomicU32::new(0),
            }
        }

        fn trip(&self) -> Result<(), RelayError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err(RelayError::Transport("connection reset by peer".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl RelayStore for FlakyStore {
        async fn insert_pairing(&self, pairing: &Pairing) -> Result<(), RelayError> {
            self.inner.insert_pairing(pairing).await
        }
        async fn get_pairing(&self, id: Uuid) -> Result<Option<Pairing>, RelayError> {
            self.inner.get_pairing(id).await
        }
        async fn find_pairing_by_code(&self, code: &str) -> Result<Option<Pairing>, RelayError> {
            self.inner.find_pairing_by_code(code).await
        }
        async fn connect_pairing(
            &self,
            id: Uuid,
            issuer_ref: &str,
            now: DateTime<Utc>,
        ) -> Result<Pairing, RelayError> {
            self.inner.connect_pairing(id, issuer_ref, now).await
        }
        async fn reissue_pairing(
            &self,
            id: Uuid,
            code: &str,
            expires_at: DateTime<Utc>,
        ) -> Result<Pairing, RelayError> {
            self.inner.reissue_pairing(id, code, expires_at).await
        }
        async fn insert_record(&self, record: &RelayRecord) -> Result<(), RelayError> {
            self.trip()?;
            self.inner.insert_record(record).await
        }
        async fn get_record(&self, id: Uuid) -> Result<Option<RelayRecord>, RelayError> {
            self.trip()?;
            self.inner.get_record(id).await
        }
        async fn list_records(
            &self,
            pairing_id: Uuid,
            status: Option<RecordStatus>,
        ) -> Result<Vec<RelayRecord>, RelayError> {
            self.inner.list_records(pairing_id, status).await
        }
        async fn claim_next(
            &self,
            pairing_id: Uuid,
            now: DateTime<Utc>,
        ) -> Result<Option<RelayRecord>, RelayError> {
            self.inner.claim_next(pairing_id, now).await
        }
        async fn transition_record(
            &self,
            id: Uuid,
            transition: RecordTransition,
            now: DateTime<Utc>,
        ) -> Result<RelayRecord, RelayError> {
            self.inner.transition_record(id, transition, now).await
        }
        async fn insert_turn_event(&self, event: &TurnEvent) -> Result<(), RelayError> {
            self.inner.insert_turn_event(event).await
        }
        async fn list_turn_events(
            &self,
            pairing_id: Uuid,
            status: Option<TurnEventStatus>,
        ) -> Result<Vec<TurnEvent>, RelayError> {
            self.inner.list_turn_events(pairing_id, status).await
        }
        async fn mark_turn_event_announced(&self, id: Uuid) -> Result<TurnEvent, RelayError> {
            self.inner.mark_turn_event_announced(id).await
        }
        async fn expire_records(&self, now: DateTime<Utc>) -> Result<ExpiryCounts, RelayError> {
            self.inner.expire_records(now).await
        }
        async fn expire_pairings(&self, now: DateTime<Utc>) -> Result<u64, RelayError> {
            self.inner.expire_pairings(now).await
        }
        async fn purge_records(&self, cutoff: DateTime<Utc>) -> Result<u64, RelayError> {
            self.inner.purge_records(cutoff).await
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
    }

    fn record() -> RelayRecord {
        RelayRecord::new(
            Uuid::new_v4(),
            RecordKind::Roll,
            "discord:42".into(),
            serde_json::json!({ "formula": "1d20+5" }),
            start(),
            start() + TimeDelta::seconds(30),
        )
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_absorbed() {
        let store = RetryingRelayStore::new(FlakyStore::new(2), policy());
        let record = record();

        store.insert_record(&record).await.unwrap();
        let loaded = store.get_record(record.id).await.unwrap();

        assert_eq!(loaded.map(|r| r.id), Some(record.id));
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_stop_at_the_budget() {
        let store = RetryingRelayStore::new(FlakyStore::new(10), policy());

        let result = store.get_record(Uuid::new_v4()).await;

        assert!(matches!(result, Err(RelayError::Transport(_))));
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_configuration_errors_are_not_retried() {
        let store = RetryingRelayStore::new(FailingRelayStore::unconfigured(), policy());

        let result = store.get_pairing(Uuid::new_v4()).await;

        assert!(matches!(result, Err(RelayError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_rejected_transitions_pass_through() {
        let store = RetryingRelayStore::new(InMemoryRelayStore::new(), policy());
        let record = record();
        store.insert_record(&record).await.unwrap();
        store
            .transition_record(record.id, RecordTransition::Timeout, start())
            .await
            .unwrap();

        let result = store
            .transition_record(record.id, RecordTransition::Claim, start())
            .await;

        assert!(matches!(
            result,
            Err(RelayError::TransitionRejected {
                from: RecordStatus::Timeout,
                ..
            })
        ));
    }
}

//! Periodic expiry sweep.
//!
//! Runs independently of any issuer or agent session: times out pending
//! records nobody claimed, fails processing records whose agent went away,
//! expires unclaimed pairing codes, and deletes terminal records past the
//! retention window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tablelink_core::clock::Clock;
use tablelink_core::error::RelayError;
use tablelink_core::store::RelayStore;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Sweep timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSettings {
    /// Time between passes.
    pub interval: Duration,
    /// How long terminal records are kept.
    pub retention: Duration,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// What one pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Pending records moved to `timeout`.
    pub timed_out: u64,
    /// Processing records moved to `failed`.
    pub abandoned: u64,
    /// Pairings moved to `expired`.
    pub expired_pairings: u64,
    /// Terminal records deleted.
    pub purged: u64,
}

impl SweepReport {
    /// Returns `true` if the pass changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn retention_cutoff(now: DateTime<Utc>, retention: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(retention)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Runs one sweep pass.
///
/// # Errors
///
/// Returns the first store error; later steps of the pass are skipped.
pub async fn run_sweep(
    settings: &SweepSettings,
    clock: &dyn Clock,
    store: &dyn RelayStore,
) -> Result<SweepReport, RelayError> {
    let now = clock.now();
    let counts = store.expire_records(now).await?;
    let expired_pairings = store.expire_pairings(now).await?;
    let purged = store
        .purge_records(retention_cutoff(now, settings.retention))
        .await?;

    Ok(SweepReport {
        timed_out: counts.timed_out,
        abandoned: counts.abandoned,
        expired_pairings,
        purged,
    })
}

/// Runs the sweep every `settings.interval` until `shutdown` is cancelled.
/// A failed pass is logged and the loop carries on.
pub async fn run(
    settings: SweepSettings,
    clock: Arc<dyn Clock>,
    store: Arc<dyn RelayStore>,
    shutdown: CancellationToken,
) {
    let mut ticker = time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval = ?settings.interval, "expiry sweep started");

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                match run_sweep(&settings, clock.as_ref(), store.as_ref()).await {
                    Ok(report) if !report.is_empty() => info!(?report, "expiry sweep"),
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "expiry sweep failed"),
                }
            }
        }
    }
    info!("expiry sweep stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tablelink_core::store::{
        ABANDONED_MESSAGE, Pairing, PairingStatus, RecordKind, RecordStatus, RecordTransition,
        RelayRecord,
    };
    use tablelink_test_support::{FailingRelayStore, FixedClock, InMemoryRelayStore, ManualClock};
    use uuid::Uuid;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
    }

    async fn record(store: &InMemoryRelayStore, created: DateTime<Utc>, ttl_secs: i64) -> Uuid {
        let record = RelayRecord::new(
            Uuid::new_v4(),
            RecordKind::Roll,
            "discord:42".into(),
            serde_json::json!({ "formula": "1d20" }),
            created,
            created + TimeDelta::seconds(ttl_secs),
        );
        store.insert_record(&record).await.unwrap();
        record.id
    }

    #[tokio::test]
    async fn test_sweep_resolves_expired_records() {
        let store = InMemoryRelayStore::new();
        let pending = record(&store, start(), 30).await;
        let processing = record(&store, start(), 30).await;
        let live = record(&store, start(), 300).await;
        store
            .transition_record(processing, RecordTransition::Claim, start())
            .await
            .unwrap();
        let clock = FixedClock(start() + TimeDelta::seconds(31));

        let report = run_sweep(&SweepSettings::default(), &clock, &store)
            .await
            .unwrap();

        assert_eq!(report.timed_out, 1);
        assert_eq!(report.abandoned, 1);
        let pending = store.get_record(pending).await.unwrap().unwrap();
        let processing = store.get_record(processing).await.unwrap().unwrap();
        let live = store.get_record(live).await.unwrap().unwrap();
        assert_eq!(pending.status, RecordStatus::Timeout);
        assert_eq!(processing.status, RecordStatus::Failed);
        assert_eq!(processing.error.as_deref(), Some(ABANDONED_MESSAGE));
        assert_eq!(live.status, RecordStatus::Pending);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let store = InMemoryRelayStore::new();
        let id = record(&store, start(), 30).await;
        let clock = FixedClock(start() + TimeDelta::seconds(60));

        run_sweep(&SweepSettings::default(), &clock, &store).await.unwrap();
        let second = run_sweep(&SweepSettings::default(), &clock, &store)
            .await
            .unwrap();

        assert!(second.is_empty());
        assert_eq!(store.transitions_for(id).len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_expires_unclaimed_pairings() {
        let store = InMemoryRelayStore::new();
        let pairing = Pairing {
            id: Uuid::new_v4(),
            code: "K7PQ2M".into(),
            issuer_ref: None,
            agent_ref: "tab-1".into(),
            status: PairingStatus::Pending,
            created_at: start(),
            connected_at: None,
            expires_at: start() + TimeDelta::minutes(10),
        };
        store.insert_pairing(&pairing).await.unwrap();
        let clock = FixedClock(start() + TimeDelta::minutes(10));

        let report = run_sweep(&SweepSettings::default(), &clock, &store)
            .await
            .unwrap();

        assert_eq!(report.expired_pairings, 1);
        assert_eq!(
            store.get_pairing(pairing.id).await.unwrap().unwrap().status,
            PairingStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_sweep_purges_terminal_records_past_retention() {
        let store = InMemoryRelayStore::new();
        let old = record(&store, start(), 30).await;
        let recent = record(&store, start() + TimeDelta::hours(20), 30).await;
        let old_pending = record(&store, start(), 1_000_000).await;
        let clock = ManualClock::new(start() + TimeDelta::minutes(1));
        run_sweep(&SweepSettings::default(), &clock, &store).await.unwrap();
        clock.advance(Duration::from_secs(24 * 60 * 60));

        let report = run_sweep(&SweepSettings::default(), &clock, &store)
            .await
            .unwrap();

        assert_eq!(report.purged, 1);
        assert!(store.get_record(old).await.unwrap().is_none());
        assert!(store.get_record(recent).await.unwrap().is_some());
        assert!(store.get_record(old_pending).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_survives_failures_and_stops_on_shutdown() {
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run(
            SweepSettings {
                interval: Duration::from_secs(1),
                ..SweepSettings::default()
            },
            Arc::new(FixedClock(start())),
            Arc::new(FailingRelayStore::unreachable()),
            shutdown.clone(),
        ));

        time::sleep(Duration::from_secs(5)).await;
        shutdown.cancel();

        handle.await.unwrap();
    }
}

//! The agent-side claim loop.
//!
//! One `ExecutionBridge` serves one pairing. It wakes on the pairing's
//! broadcast topic or on a fallback poll tick, claims every pending record
//! (moving each to `processing`), and executes each one in its own task.
//! Every claimed record ends `delivered` or `failed`; an execution error
//! or panic never escapes a task and never stops the loop.
//!
//! Native rolls go through the tabletop one at a time. The log gives no
//! correlation id, so a second roll of the same formula in flight could
//! otherwise take the first one's result.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use futures::stream::{self, BoxStream};
use tablelink_core::broadcast::RelayBroadcast;
use tablelink_core::clock::Clock;
use tablelink_core::error::RelayError;
use tablelink_core::log::LogEntry;
use tablelink_core::rng::DeterministicRng;
use tablelink_core::store::{RelayRecord, RelayStore};
use tablelink_core::surface::{ExecutionDirective, TabletopSurface};
use tablelink_core::watch::{Subscription, WatchOutcome};
use tablelink_relay::application::record_handlers;
use tablelink_relay::domain::commands::{MarkDelivered, MarkFailed};
use tokio::task::JoinSet;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::plan::{ExecutionPlan, RollStrategy, canonical_formula, roll_announcement};

/// Agent-side timing and behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeSettings {
    /// Who computes roll totals.
    pub roll_strategy: RollStrategy,
    /// How long to watch the tabletop log for a native roll result.
    pub watch_window: Duration,
    /// Fallback poll period when no broadcast arrives.
    pub poll_interval: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            roll_strategy: RollStrategy::Native,
            watch_window: Duration::from_secs(5),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Claims and executes relay records for one pairing.
#[derive(Clone)]
pub struct ExecutionBridge {
    pairing_id: Uuid,
    store: Arc<dyn RelayStore>,
    broadcast: Option<Arc<dyn RelayBroadcast>>,
    surface: Arc<dyn TabletopSurface>,
    clock: Arc<dyn Clock>,
    rng: Arc<Mutex<dyn DeterministicRng + Send>>,
    settings: BridgeSettings,
    native_roll: Arc<tokio::sync::Mutex<()>>,
}

impl ExecutionBridge {
    /// Create a bridge for `pairing_id` that only polls.
    #[must_use]
    pub fn new(
        pairing_id: Uuid,
        store: Arc<dyn RelayStore>,
        surface: Arc<dyn TabletopSurface>,
        clock: Arc<dyn Clock>,
        rng: Arc<Mutex<dyn DeterministicRng + Send>>,
        settings: BridgeSettings,
    ) -> Self {
        Self {
            pairing_id,
            store,
            broadcast: None,
            surface,
            clock,
            rng,
            settings,
            native_roll: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Also wake on announcements from a broadcast channel.
    #[must_use]
    pub fn with_broadcast(mut self, broadcast: Arc<dyn RelayBroadcast>) -> Self {
        self.broadcast = Some(broadcast);
        self
    }

    /// The pairing this bridge serves.
    #[must_use]
    pub fn pairing_id(&self) -> Uuid {
        self.pairing_id
    }

    /// Claims the oldest live pending record, moving it to `processing`.
    ///
    /// # Errors
    ///
    /// Returns any store error.
    pub async fn claim_next(&self) -> Result<Option<RelayRecord>, RelayError> {
        record_handlers::handle_claim_next(self.pairing_id, self.clock.as_ref(), self.store.as_ref())
            .await
    }

    /// Records a successful execution.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::TransitionRejected` unless the record is
    /// `processing`, or any store error.
    pub async fn mark_delivered(
        &self,
        record_id: Uuid,
        result: serde_json::Value,
    ) -> Result<RelayRecord, RelayError> {
        record_handlers::handle_mark_delivered(
            &MarkDelivered { record_id, result },
            self.clock.as_ref(),
            self.store.as_ref(),
        )
        .await
    }

    /// Records a failed execution.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::TransitionRejected` unless the record is
    /// `processing`, or any store error.
    pub async fn mark_failed(
        &self,
        record_id: Uuid,
        error: impl Into<String>,
    ) -> Result<RelayRecord, RelayError> {
        record_handlers::handle_mark_failed(
            &MarkFailed {
                record_id,
                error: error.into(),
            },
            self.clock.as_ref(),
            self.store.as_ref(),
        )
        .await
    }

    /// Executes one claimed record and writes back its terminal status.
    ///
    /// # Errors
    ///
    /// Returns an error only if the final status write fails; execution
    /// failures are written to the record instead.
    #[instrument(skip(self, record), fields(record_id = %record.id, kind = %record.kind))]
    pub async fn execute(&self, record: RelayRecord) -> Result<RelayRecord, RelayError> {
        if record.is_expired(self.clock.now()) {
            return self.mark_failed(record.id, "record expired before execution").await;
        }

        match self.perform(&record).await {
            Ok(result) => self.mark_delivered(record.id, result).await,
            Err(err) => {
                let message = match err {
                    RelayError::Execution(message) | RelayError::Validation(message) => message,
                    other => other.to_string(),
                };
                self.mark_failed(record.id, message).await
            }
        }
    }

    async fn perform(&self, record: &RelayRecord) -> Result<serde_json::Value, RelayError> {
        match ExecutionPlan::for_record(record, self.settings.roll_strategy)? {
            ExecutionPlan::LocalRoll {
                formula,
                mode,
                label,
                character,
            } => {
                let roll = {
                    let mut rng_guard = self.rng.lock().map_err(|e| {
                        RelayError::Infrastructure(format!("RNG mutex poisoned: {e}"))
                    })?;
                    formula.roll(mode, &mut *rng_guard)?
                };
                let text =
                    roll_announcement(label.as_deref(), character.as_deref(), &roll.breakdown());
                self.surface
                    .apply(&ExecutionDirective::Announce { text })
                    .await?;
                Ok(roll.to_result())
            }
            ExecutionPlan::NativeRoll {
                formula,
                label,
                character,
            } => self.roll_on_tabletop(&formula.to_string(), label, character).await,
            ExecutionPlan::Action {
                kind,
                description,
                character,
                amount,
            } => {
                let amount = match amount {
                    Some(amount) => {
                        let mut rng_guard = self.rng.lock().map_err(|e| {
                            RelayError::Infrastructure(format!("RNG mutex poisoned: {e}"))
                        })?;
                        Some(amount.resolve(&mut *rng_guard))
                    }
                    None => None,
                };
                self.surface
                    .apply(&ExecutionDirective::PerformAction {
                        kind,
                        description: description.clone(),
                        character,
                        amount,
                    })
                    .await?;
                let mut result = serde_json::json!({ "kind": kind, "description": description });
                if let Some(amount) = amount {
                    result["amount"] = amount.into();
                }
                Ok(result)
            }
        }
    }

    /// Hands the formula to the tabletop roller and waits for its inline
    /// result. The log is subscribed before the roll is submitted so a fast
    /// tabletop cannot answer unseen.
    async fn roll_on_tabletop(
        &self,
        formula: &str,
        label: Option<String>,
        character: Option<String>,
    ) -> Result<serde_json::Value, RelayError> {
        let _in_flight = self.native_roll.lock().await;

        let wanted = canonical_formula(formula);
        let speaker = character.clone();
        let wanted_label = label.clone();
        let watch = Subscription::from_broadcast(
            self.surface.subscribe_log(),
            self.settings.watch_window,
            move |entry: LogEntry| {
                if !same_name(speaker.as_deref(), entry.speaker.as_deref()) {
                    return None;
                }
                entry.inline_roll.filter(|roll| {
                    canonical_formula(&roll.formula) == wanted
                        && same_name(wanted_label.as_deref(), roll.label.as_deref())
                })
            },
        );

        self.surface
            .apply(&ExecutionDirective::SubmitRoll {
                formula: formula.to_owned(),
                label: label.clone(),
                character,
            })
            .await?;

        match watch.resolve_once().await {
            WatchOutcome::Resolved(roll) => Ok(serde_json::json!({
                "formula": formula,
                "label": label.or(roll.label),
                "total": roll.total,
                "source": "tabletop",
            })),
            WatchOutcome::TimedOut => Err(RelayError::Execution(format!(
                "tabletop did not report a result within {}s",
                self.settings.watch_window.as_secs()
            ))),
            WatchOutcome::Closed => Err(RelayError::Execution("tabletop log closed".into())),
        }
    }

    /// Claims every pending record and spawns one execution task for each.
    /// Returns how many were claimed.
    pub async fn drain(&self, tasks: &mut JoinSet<()>) -> usize {
        let mut claimed = 0;
        loop {
            match self.claim_next().await {
                Ok(Some(record)) => {
                    claimed += 1;
                    let bridge = self.clone();
                    tasks.spawn(async move {
                        let record_id = record.id;
                        match AssertUnwindSafe(bridge.execute(record)).catch_unwind().await {
                            Ok(Ok(_)) => {}
                            Ok(Err(err)) => {
                                error!(%record_id, error = %err, "could not write record outcome");
                            }
                            Err(_) => {
                                error!(%record_id, "execution task panicked");
                                if let Err(err) =
                                    bridge.mark_failed(record_id, "execution task panicked").await
                                {
                                    error!(%record_id, error = %err, "could not write record outcome");
                                }
                            }
                        }
                    });
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(pairing_id = %self.pairing_id, error = %err, "claim failed");
                    break;
                }
            }
        }
        claimed
    }

    async fn wakeups(&self) -> BoxStream<'static, Uuid> {
        let Some(broadcast) = &self.broadcast else {
            return stream::pending().boxed();
        };
        match broadcast.subscribe(self.pairing_id).await {
            Ok(announced) => announced.chain(stream::pending()).boxed(),
            Err(err) => {
                warn!(pairing_id = %self.pairing_id, error = %err, "broadcast unavailable, polling only");
                stream::pending().boxed()
            }
        }
    }

    /// Runs the claim loop until `shutdown` is cancelled, then waits for
    /// in-flight executions so none is left `processing`.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut wakeups = self.wakeups().await;
        let mut ticker = time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tasks = JoinSet::new();
        info!(pairing_id = %self.pairing_id, "execution bridge started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let claimed = self.drain(&mut tasks).await;
                    debug!(claimed, "poll tick");
                }
                Some(record_id) = wakeups.next() => {
                    debug!(%record_id, "announcement received");
                    self.drain(&mut tasks).await;
                }
                Some(joined) = tasks.join_next() => {
                    if let Err(err) = joined {
                        error!(error = %err, "execution task panicked");
                    }
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "execution task panicked");
            }
        }
        info!(pairing_id = %self.pairing_id, "execution bridge stopped");
    }
}

/// Matches when either side is unknown, otherwise compares trimmed and
/// case-insensitively.
fn same_name(wanted: Option<&str>, seen: Option<&str>) -> bool {
    match (wanted, seen) {
        (Some(wanted), Some(seen)) => wanted.trim().eq_ignore_ascii_case(seen.trim()),
        _ => true,
    }
}

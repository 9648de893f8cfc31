//! Issuer-side relay queue.
//!
//! `publish` always writes a durable `pending` row first and only then
//! announces it on the pairing's broadcast topic, so an agent that misses
//! the announcement still finds the record on its next poll. `await_outcome`
//! polls for a terminal status and, if none arrives in time, times the
//! record out and hands back a timeout outcome the caller renders as the
//! fallback path.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tablelink_core::broadcast::RelayBroadcast;
use tablelink_core::clock::Clock;
use tablelink_core::error::RelayError;
use tablelink_core::rng::DeterministicRng;
use tablelink_core::store::{PairingStatus, RelayRecord, RelayStore};
use tablelink_core::watch::{Subscription, WatchOutcome};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::application::record_handlers;
use crate::domain::outcome::RelayOutcome;
use crate::domain::requests::{ActionRequest, RelayRequest, RollRequest};

/// Issuer-side timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    /// How often `await_outcome` re-reads the record.
    pub poll_interval: Duration,
    /// How long `await_outcome` waits before timing the record out.
    pub await_timeout: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            await_timeout: Duration::from_secs(30),
        }
    }
}

/// Publishes requests and waits for their outcomes.
#[derive(Clone)]
pub struct RelayQueue {
    store: Arc<dyn RelayStore>,
    broadcast: Option<Arc<dyn RelayBroadcast>>,
    clock: Arc<dyn Clock>,
    settings: QueueSettings,
}

impl RelayQueue {
    /// Create a queue that only uses the store.
    #[must_use]
    pub fn new(store: Arc<dyn RelayStore>, clock: Arc<dyn Clock>, settings: QueueSettings) -> Self {
        Self {
            store,
            broadcast: None,
            clock,
            settings,
        }
    }

    /// Also announce published records on a broadcast channel.
    #[must_use]
    pub fn with_broadcast(mut self, broadcast: Arc<dyn RelayBroadcast>) -> Self {
        self.broadcast = Some(broadcast);
        self
    }

    /// The queue's timing.
    #[must_use]
    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Writes a pending record for `request` and announces it.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::NotFound` if the pairing does not exist,
    /// `RelayError::Validation` if it is not connected or the request is
    /// malformed, or any store error. Broadcast failures are logged and
    /// never fail the publish.
    #[instrument(skip(self, request), fields(pairing_id = %request.pairing_id(), kind = %request.kind()))]
    pub async fn publish(&self, request: &RelayRequest) -> Result<RelayRecord, RelayError> {
        let pairing_id = request.pairing_id();
        let pairing = self
            .store
            .get_pairing(pairing_id)
            .await?
            .ok_or(RelayError::NotFound(pairing_id))?;
        if pairing.status != PairingStatus::Connected {
            return Err(RelayError::Validation(format!(
                "pairing {pairing_id} is not connected"
            )));
        }

        let payload = request.to_payload()?;
        let kind = request.kind();
        let record = RelayRecord::new(
            pairing_id,
            kind,
            request.issuer_ref().to_owned(),
            payload,
            self.clock.now(),
            self.clock.deadline(kind.default_ttl()),
        );
        self.store.insert_record(&record).await?;
        info!(record_id = %record.id, "record published");

        if let Some(broadcast) = &self.broadcast {
            if let Err(err) = broadcast.announce(pairing_id, record.id).await {
                warn!(record_id = %record.id, error = %err, "broadcast failed, agent will poll");
            }
        }
        Ok(record)
    }

    /// Waits for a record to reach a terminal status.
    ///
    /// Uses the queue's default timeout when `timeout` is `None`. On timeout
    /// the record is moved to `timeout` if it is still pending.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::NotFound` for an unknown record. Configuration
    /// errors surface immediately, before any polling.
    #[instrument(skip(self))]
    pub async fn await_outcome(
        &self,
        record_id: Uuid,
        timeout: Option<Duration>,
    ) -> Result<RelayOutcome, RelayError> {
        let window = timeout.unwrap_or(self.settings.await_timeout);

        let record = record_handlers::get_record(record_id, self.store.as_ref()).await?;
        if record.status.is_terminal() {
            return Ok(RelayOutcome::from_record(&record));
        }

        let store = Arc::clone(&self.store);
        let subscription = Subscription::polling(self.settings.poll_interval, window, move || {
            let store = Arc::clone(&store);
            async move {
                match store.get_record(record_id).await {
                    Ok(Some(record)) if record.status.is_terminal() => Some(Ok(record)),
                    Ok(Some(record)) => {
                        debug!(%record_id, status = %record.status, "still waiting");
                        None
                    }
                    Ok(None) => Some(Err(RelayError::NotFound(record_id))),
                    Err(err) if err.is_transient() => {
                        warn!(%record_id, error = %err, "poll failed, retrying on next tick");
                        None
                    }
                    Err(err) => Some(Err(err)),
                }
            }
        });

        match subscription.resolve_once().await {
            WatchOutcome::Resolved(found) => found.map(|record| RelayOutcome::from_record(&record)),
            WatchOutcome::TimedOut | WatchOutcome::Closed => {
                self.time_out(record_id, window).await
            }
        }
    }

    async fn time_out(&self, record_id: Uuid, waited: Duration) -> Result<RelayOutcome, RelayError> {
        if let Some(record) =
            record_handlers::handle_mark_timeout(record_id, self.clock.as_ref(), self.store.as_ref())
                .await?
        {
            let mut outcome = RelayOutcome::from_record(&record);
            outcome.error = RelayOutcome::timed_out(record_id, waited).error;
            return Ok(outcome);
        }

        // The agent got there first; report what it wrote if it finished.
        let record = record_handlers::get_record(record_id, self.store.as_ref()).await?;
        if record.status.is_terminal() {
            return Ok(RelayOutcome::from_record(&record));
        }
        Ok(RelayOutcome::timed_out(record_id, waited))
    }

    /// Publishes a roll and waits for the tabletop's result, rolling locally
    /// if the agent never answers.
    ///
    /// The `Mutex` is locked only for the synchronous local roll.
    ///
    /// # Errors
    ///
    /// Returns any error from `publish` or `await_outcome`.
    pub async fn relay_roll(
        &self,
        request: RollRequest,
        rng: &Mutex<dyn DeterministicRng + Send>,
    ) -> Result<RelayOutcome, RelayError> {
        let formula = request.validate()?;
        let mode = request.mode;
        let record = self.publish(&RelayRequest::Roll(request)).await?;
        let outcome = self.await_outcome(record.id, None).await?;
        if !outcome.is_fallback() {
            return Ok(outcome);
        }

        let roll = {
            let mut rng_guard = rng
                .lock()
                .map_err(|e| RelayError::Infrastructure(format!("RNG mutex poisoned: {e}")))?;
            formula.roll(mode, &mut *rng_guard)?
        };
        info!(record_id = %record.id, total = roll.total, "rolled locally");
        Ok(outcome.with_local_roll(&roll))
    }

    /// Publishes an action and waits for its outcome.
    ///
    /// # Errors
    ///
    /// Returns any error from `publish` or `await_outcome`.
    pub async fn relay_action(&self, request: ActionRequest) -> Result<RelayOutcome, RelayError> {
        let record = self.publish(&RelayRequest::Action(request)).await?;
        self.await_outcome(record.id, None).await
    }
}

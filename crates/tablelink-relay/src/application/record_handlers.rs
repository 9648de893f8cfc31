//! Command and query handlers for relay records.
//!
//! These are the agent-side status writes. Each one is a single conditional
//! write against the store, so a record already resolved by someone else
//! rejects the write instead of being overwritten.

use tablelink_core::clock::Clock;
use tablelink_core::error::RelayError;
use tablelink_core::store::{RecordStatus, RecordTransition, RelayRecord, RelayStore};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::commands::{MarkDelivered, MarkFailed};

/// Claims the oldest live pending record of a pairing.
///
/// # Errors
///
/// Returns any store error.
pub async fn handle_claim_next(
    pairing_id: Uuid,
    clock: &dyn Clock,
    store: &dyn RelayStore,
) -> Result<Option<RelayRecord>, RelayError> {
    let claimed = store.claim_next(pairing_id, clock.now()).await?;
    if let Some(record) = &claimed {
        info!(record_id = %record.id, %pairing_id, kind = %record.kind, "record claimed");
    }
    Ok(claimed)
}

/// Handles the `MarkDelivered` command.
///
/// # Errors
///
/// Returns `RelayError::NotFound` for an unknown record and
/// `RelayError::TransitionRejected` unless the record is `processing`.
pub async fn handle_mark_delivered(
    command: &MarkDelivered,
    clock: &dyn Clock,
    store: &dyn RelayStore,
) -> Result<RelayRecord, RelayError> {
    let record = store
        .transition_record(
            command.record_id,
            RecordTransition::Deliver(command.result.clone()),
            clock.now(),
        )
        .await?;
    info!(record_id = %record.id, "record delivered");
    Ok(record)
}

/// Handles the `MarkFailed` command.
///
/// # Errors
///
/// Returns `RelayError::NotFound` for an unknown record and
/// `RelayError::TransitionRejected` unless the record is `processing`.
pub async fn handle_mark_failed(
    command: &MarkFailed,
    clock: &dyn Clock,
    store: &dyn RelayStore,
) -> Result<RelayRecord, RelayError> {
    let record = store
        .transition_record(
            command.record_id,
            RecordTransition::Fail(command.error.clone()),
            clock.now(),
        )
        .await?;
    warn!(record_id = %record.id, error = %command.error, "record failed");
    Ok(record)
}

/// Moves a record to `timeout` if it is still pending.
///
/// Returns `Ok(None)` when the record had already moved on; the caller then
/// reads the record to see what happened instead.
///
/// # Errors
///
/// Returns `RelayError::NotFound` for an unknown record, or any store error.
pub async fn handle_mark_timeout(
    record_id: Uuid,
    clock: &dyn Clock,
    store: &dyn RelayStore,
) -> Result<Option<RelayRecord>, RelayError> {
    match store
        .transition_record(record_id, RecordTransition::Timeout, clock.now())
        .await
    {
        Ok(record) => {
            info!(%record_id, "record timed out");
            Ok(Some(record))
        }
        Err(RelayError::TransitionRejected { from, .. }) => {
            info!(%record_id, status = %from, "timeout skipped, record already moved on");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Retrieves a record by id.
///
/// # Errors
///
/// Returns `RelayError::NotFound` if the record does not exist.
pub async fn get_record(record_id: Uuid, store: &dyn RelayStore) -> Result<RelayRecord, RelayError> {
    store
        .get_record(record_id)
        .await?
        .ok_or(RelayError::NotFound(record_id))
}

/// Lists a pairing's records, optionally filtered by status.
///
/// # Errors
///
/// Returns any store error.
pub async fn list_records(
    pairing_id: Uuid,
    status: Option<RecordStatus>,
    store: &dyn RelayStore,
) -> Result<Vec<RelayRecord>, RelayError> {
    store.list_records(pairing_id, status).await
}

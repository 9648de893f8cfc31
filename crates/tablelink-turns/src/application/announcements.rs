//! Command and query handlers for turn events.
//!
//! Agents that run their tracker outside this process post turn events
//! through here; the chat side lists the pending ones, announces them, and
//! marks them announced.

use serde::Deserialize;
use tablelink_core::clock::Clock;
use tablelink_core::error::RelayError;
use tablelink_core::store::{RelayStore, TurnEvent, TurnEventStatus, TurnEventType};
use tracing::info;
use uuid::Uuid;

/// Command recording one turn event for a pairing.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordTurnEvent {
    /// The pairing whose chat should announce the event.
    #[serde(default)]
    pub pairing_id: Uuid,
    /// What happened.
    pub event_type: TurnEventType,
    /// The combatant concerned, if any.
    #[serde(default)]
    pub combatant_name: Option<String>,
    /// Round at the time of the event.
    pub round: i32,
    /// Free-form flags.
    #[serde(default)]
    pub action_flags: serde_json::Value,
}

/// Handles the `RecordTurnEvent` command.
///
/// # Errors
///
/// Returns `RelayError::NotFound` for an unknown pairing,
/// `RelayError::Validation` for a negative round or a turn event without a
/// combatant, and any store error.
pub async fn handle_record_turn_event(
    command: RecordTurnEvent,
    clock: &dyn Clock,
    store: &dyn RelayStore,
) -> Result<TurnEvent, RelayError> {
    if command.round < 0 {
        return Err(RelayError::Validation("round must not be negative".into()));
    }
    let combatant_name = command
        .combatant_name
        .map(|name| name.trim().to_owned())
        .filter(|name| !name.is_empty());
    if matches!(
        command.event_type,
        TurnEventType::TurnStart | TurnEventType::TurnEnd
    ) && combatant_name.is_none()
    {
        return Err(RelayError::Validation(format!(
            "{} events need a combatant",
            command.event_type
        )));
    }
    store
        .get_pairing(command.pairing_id)
        .await?
        .ok_or(RelayError::NotFound(command.pairing_id))?;

    let action_flags = if command.action_flags.is_null() {
        serde_json::json!({})
    } else {
        command.action_flags
    };
    let event = TurnEvent {
        id: Uuid::new_v4(),
        pairing_id: command.pairing_id,
        event_type: command.event_type,
        combatant_name,
        round: command.round,
        action_flags,
        status: TurnEventStatus::Pending,
        created_at: clock.now(),
    };
    store.insert_turn_event(&event).await?;
    info!(event_id = %event.id, pairing_id = %event.pairing_id, event_type = %event.event_type, "turn event recorded");
    Ok(event)
}

/// Lists a pairing's turn events, oldest first.
///
/// # Errors
///
/// Returns any store error.
pub async fn list_turn_events(
    pairing_id: Uuid,
    status: Option<TurnEventStatus>,
    store: &dyn RelayStore,
) -> Result<Vec<TurnEvent>, RelayError> {
    store.list_turn_events(pairing_id, status).await
}

/// Marks a turn event announced. Marking it twice is harmless.
///
/// # Errors
///
/// Returns `RelayError::NotFound` for an unknown event.
pub async fn handle_mark_announced(
    event_id: Uuid,
    store: &dyn RelayStore,
) -> Result<TurnEvent, RelayError> {
    let event = store.mark_turn_event_announced(event_id).await?;
    info!(event_id = %event.id, "turn event announced");
    Ok(event)
}

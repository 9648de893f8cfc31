//! Relay store database schema.
//!
//! The tables themselves live in the workspace `migrations/` directory;
//! this module embeds them and names the column lists the queries select.

use sqlx::migrate::Migrator;

/// Embedded migrations for the `pairings`, `relay_records`, and
/// `turn_events` tables.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Columns selected for a `Pairing`.
pub const PAIRING_COLUMNS: &str =
    "id, code, issuer_ref, agent_ref, status, created_at, connected_at, expires_at";

/// Columns selected for a `RelayRecord`.
pub const RECORD_COLUMNS: &str = "id, pairing_id, kind, issuer_ref, payload, status, result, \
     error, created_at, processed_at, expires_at";

/// Columns selected for a `TurnEvent`.
pub const TURN_EVENT_COLUMNS: &str =
    "id, pairing_id, event_type, combatant_name, round, action_flags, status, created_at";

/// Record statuses that can no longer change, as stored.
pub const TERMINAL_STATUSES: &[&str] = &["delivered", "failed", "timeout"];

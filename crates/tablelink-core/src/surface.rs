//! Tabletop surface port.
//!
//! The bridge agent drives the third-party tabletop UI only through
//! `ExecutionDirective`s and observes it only through its chat log.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::RelayError;
use crate::log::LogEntry;
use crate::store::RecordKind;

/// An instruction the agent applies to the tabletop UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "directive", rename_all = "snake_case")]
pub enum ExecutionDirective {
    /// Post a preformatted line to the tabletop chat.
    Announce {
        /// The line to post.
        text: String,
    },
    /// Hand a formula to the tabletop's own roller.
    SubmitRoll {
        /// Dice formula.
        formula: String,
        /// Label to show next to the roll.
        label: Option<String>,
        /// Character to roll as.
        character: Option<String>,
    },
    /// Ask the character application to carry out an action.
    PerformAction {
        /// What kind of action.
        kind: RecordKind,
        /// Human-readable description.
        description: String,
        /// Character performing the action.
        character: Option<String>,
        /// Resolved amount for heal/damage.
        amount: Option<i32>,
    },
}

/// The third-party tabletop UI as seen from the bridge agent.
#[async_trait]
pub trait TabletopSurface: Send + Sync {
    /// Apply a directive.
    ///
    /// Fails with `RelayError::Execution` when the UI target is missing.
    async fn apply(&self, directive: &ExecutionDirective) -> Result<(), RelayError>;

    /// Subscribe to newly appended chat-log entries. Entries appended before
    /// the call are not replayed.
    fn subscribe_log(&self) -> broadcast::Receiver<LogEntry>;
}

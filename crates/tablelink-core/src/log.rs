//! Tabletop chat-log model.
//!
//! The bridge agent turns each newly appended chat entry of the third-party
//! UI into a `LogEntry`. Entries produced by the UI's own roller carry an
//! `InlineRoll` with the computed total.

use serde::{Deserialize, Serialize};

/// A roll the tabletop computed itself and rendered inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineRoll {
    /// Label the tabletop attached to the roll (e.g. "Initiative").
    pub label: Option<String>,
    /// The formula as the tabletop echoes it.
    pub formula: String,
    /// The computed total.
    pub total: i32,
}

/// One newly appended chat-log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// The tabletop's own id for the entry, when it exposes one.
    pub id: Option<String>,
    /// The character or player the entry is attributed to.
    pub speaker: Option<String>,
    /// Rendered text of the entry.
    pub text: String,
    /// Structured inline roll, when the entry carries one.
    pub inline_roll: Option<InlineRoll>,
}

impl LogEntry {
    /// Creates a plain-text entry.
    #[must_use]
    pub fn text(speaker: Option<&str>, text: impl Into<String>) -> Self {
        Self {
            id: None,
            speaker: speaker.map(str::to_owned),
            text: text.into(),
            inline_roll: None,
        }
    }

    /// Creates an entry carrying an inline roll.
    #[must_use]
    pub fn roll(speaker: Option<&str>, label: Option<&str>, formula: &str, total: i32) -> Self {
        let text = match label {
            Some(label) => format!("{label}: {formula} = {total}"),
            None => format!("{formula} = {total}"),
        };
        Self {
            id: None,
            speaker: speaker.map(str::to_owned),
            text,
            inline_roll: Some(InlineRoll {
                label: label.map(str::to_owned),
                formula: formula.to_owned(),
                total,
            }),
        }
    }
}

//! Execution plans.
//!
//! A claimed record is decoded into a plan before anything touches the
//! tabletop, so a malformed payload fails the record without side effects.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tablelink_core::dice::{DiceFormula, RollMode};
use tablelink_core::error::RelayError;
use tablelink_core::store::{RecordKind, RelayRecord};
use tablelink_relay::domain::requests::{ActionPayload, Amount, RollPayload};

/// Who computes a roll's total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollStrategy {
    /// The agent rolls and posts the breakdown.
    Local,
    /// The tabletop's own roller rolls; the agent reads the total back.
    #[default]
    Native,
}

/// What the agent will do for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionPlan {
    /// Roll here and announce the breakdown.
    LocalRoll {
        /// Parsed formula.
        formula: DiceFormula,
        /// Roll mode.
        mode: RollMode,
        /// Label to show.
        label: Option<String>,
        /// Character rolling.
        character: Option<String>,
    },
    /// Submit to the tabletop roller and watch its log.
    NativeRoll {
        /// Parsed formula.
        formula: DiceFormula,
        /// Label to show.
        label: Option<String>,
        /// Character rolling.
        character: Option<String>,
    },
    /// Any non-roll action.
    Action {
        /// The action kind.
        kind: RecordKind,
        /// Human-readable description.
        description: String,
        /// Character performing it.
        character: Option<String>,
        /// Heal/damage amount, still to be resolved.
        amount: Option<Amount>,
    },
}

fn decode<T: DeserializeOwned>(record: &RelayRecord) -> Result<T, RelayError> {
    serde_json::from_value(record.payload.clone())
        .map_err(|e| RelayError::Validation(format!("malformed {} payload: {e}", record.kind)))
}

impl ExecutionPlan {
    /// Decodes a record into a plan.
    ///
    /// Advantage and disadvantage are always rolled locally since the
    /// tabletop formula has no way to express them.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Validation` if the payload does not match the
    /// record kind or carries an invalid formula or amount.
    pub fn for_record(record: &RelayRecord, strategy: RollStrategy) -> Result<Self, RelayError> {
        if record.kind == RecordKind::Roll {
            let payload: RollPayload = decode(record)?;
            let formula = DiceFormula::parse(&payload.formula)?;
            if strategy == RollStrategy::Native && payload.mode == RollMode::Normal {
                return Ok(Self::NativeRoll {
                    formula,
                    label: payload.label,
                    character: payload.character,
                });
            }
            return Ok(Self::LocalRoll {
                formula,
                mode: payload.mode,
                label: payload.label,
                character: payload.character,
            });
        }

        let payload: ActionPayload = decode(record)?;
        let amount = payload.amount.as_deref().map(Amount::parse).transpose()?;
        if matches!(record.kind, RecordKind::Heal | RecordKind::Damage) && amount.is_none() {
            return Err(RelayError::Validation(format!(
                "{} payload has no amount",
                record.kind
            )));
        }
        Ok(Self::Action {
            kind: record.kind,
            description: payload.description,
            character: payload.character,
            amount,
        })
    }
}

/// Canonical spelling of a formula for matching the tabletop's echo
/// against the request ("1D20 + 5" and "1d20+5" match).
#[must_use]
pub fn canonical_formula(input: &str) -> String {
    DiceFormula::parse(input).map_or_else(
        |_| {
            input
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_lowercase()
        },
        |formula| formula.to_string(),
    )
}

/// Line posted to the tabletop after a local roll.
#[must_use]
pub fn roll_announcement(label: Option<&str>, character: Option<&str>, breakdown: &str) -> String {
    match (character, label) {
        (Some(character), Some(label)) => format!("{character} rolls {label}: {breakdown}"),
        (Some(character), None) => format!("{character} rolls {breakdown}"),
        (None, Some(label)) => format!("{label}: {breakdown}"),
        (None, None) => breakdown.to_owned(),
    }
}

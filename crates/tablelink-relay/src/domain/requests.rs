//! Issuer requests and the record payloads they produce.

use serde::{Deserialize, Serialize};
use tablelink_core::dice::{DiceError, DiceFormula, MAX_MODIFIER, RollMode};
use tablelink_core::error::RelayError;
use tablelink_core::rng::DeterministicRng;
use tablelink_core::store::RecordKind;
use uuid::Uuid;

/// Payload of a `roll` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollPayload {
    /// Dice formula, e.g. "1d20+5".
    pub formula: String,
    /// Label to show next to the roll.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Advantage, disadvantage, or a plain roll.
    #[serde(default)]
    pub mode: RollMode,
    /// Character to roll as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<String>,
}

/// Payload of every non-roll record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPayload {
    /// Human-readable description.
    pub description: String,
    /// Formula or flat number for heal/damage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    /// Character performing the action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<String>,
}

/// A heal/damage amount: either a flat number or a formula to roll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Amount {
    /// A fixed number.
    Flat(i32),
    /// A formula rolled at execution time.
    Dice(DiceFormula),
}

impl Amount {
    /// Parse "7" or "2d8+3".
    ///
    /// # Errors
    ///
    /// Returns a `DiceError` if the input is neither.
    pub fn parse(input: &str) -> Result<Self, DiceError> {
        match input.trim().parse::<i32>() {
            Ok(value) if value.unsigned_abs() > MAX_MODIFIER.unsigned_abs() => {
                Err(DiceError::Modifier(value.into()))
            }
            Ok(value) => Ok(Self::Flat(value)),
            Err(_) => DiceFormula::parse(input).map(Self::Dice),
        }
    }

    /// Resolve to a number, rolling if needed.
    pub fn resolve(&self, rng: &mut dyn DeterministicRng) -> i32 {
        match self {
            Self::Flat(value) => *value,
            Self::Dice(formula) => formula
                .roll(RollMode::Normal, rng)
                .map_or(formula.modifier, |roll| roll.total),
        }
    }
}

/// A dice roll asked for from chat.
#[derive(Debug, Clone, Deserialize)]
pub struct RollRequest {
    /// The pairing to relay through.
    pub pairing_id: Uuid,
    /// Issuer identity.
    pub issuer_ref: String,
    /// Dice formula.
    pub formula: String,
    /// Optional label.
    #[serde(default)]
    pub label: Option<String>,
    /// Roll mode.
    #[serde(default)]
    pub mode: RollMode,
    /// Character to roll as.
    #[serde(default)]
    pub character: Option<String>,
}

impl RollRequest {
    /// Parses the formula and checks that the mode applies to it.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Validation` for a bad formula or for
    /// advantage/disadvantage on a formula that does not lead with a d20.
    pub fn validate(&self) -> Result<DiceFormula, RelayError> {
        let formula = DiceFormula::parse(&self.formula)?;
        if self.mode != RollMode::Normal && !formula.leads_with_d20() {
            return Err(DiceError::NotAD20.into());
        }
        Ok(formula)
    }

    /// Record payload for this request.
    #[must_use]
    pub fn payload(&self) -> RollPayload {
        RollPayload {
            formula: self.formula.trim().to_owned(),
            label: self.label.clone(),
            mode: self.mode,
            character: self.character.clone(),
        }
    }
}

/// A non-roll action asked for from chat.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionRequest {
    /// The pairing to relay through.
    pub pairing_id: Uuid,
    /// Issuer identity.
    pub issuer_ref: String,
    /// What kind of action.
    pub kind: RecordKind,
    /// Human-readable description.
    pub description: String,
    /// Formula or flat number for heal/damage.
    #[serde(default)]
    pub amount: Option<String>,
    /// Character performing the action.
    #[serde(default)]
    pub character: Option<String>,
}

impl ActionRequest {
    /// Checks the kind, description and amount.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Validation` if the request cannot be executed.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.kind == RecordKind::Roll {
            return Err(RelayError::Validation(
                "dice rolls must be sent as roll requests".into(),
            ));
        }
        if self.description.trim().is_empty() {
            return Err(RelayError::Validation("description must not be empty".into()));
        }
        match (self.kind, self.amount.as_deref()) {
            (RecordKind::Heal | RecordKind::Damage, None) => Err(RelayError::Validation(
                format!("{} needs an amount", self.kind),
            )),
            (_, Some(amount)) => Amount::parse(amount).map(|_| ()).map_err(Into::into),
            (_, None) => Ok(()),
        }
    }

    /// Record payload for this request.
    #[must_use]
    pub fn payload(&self) -> ActionPayload {
        ActionPayload {
            description: self.description.trim().to_owned(),
            amount: self.amount.as_ref().map(|a| a.trim().to_owned()),
            character: self.character.clone(),
        }
    }
}

/// Anything the issuer can publish.
#[derive(Debug, Clone)]
pub enum RelayRequest {
    /// A dice roll.
    Roll(RollRequest),
    /// Any other action.
    Action(ActionRequest),
}

impl RelayRequest {
    /// The pairing this request travels on.
    #[must_use]
    pub fn pairing_id(&self) -> Uuid {
        match self {
            Self::Roll(r) => r.pairing_id,
            Self::Action(a) => a.pairing_id,
        }
    }

    /// Issuer identity.
    #[must_use]
    pub fn issuer_ref(&self) -> &str {
        match self {
            Self::Roll(r) => &r.issuer_ref,
            Self::Action(a) => &a.issuer_ref,
        }
    }

    /// The record kind this request becomes.
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Roll(_) => RecordKind::Roll,
            Self::Action(a) => a.kind,
        }
    }

    /// Validates the request and builds its JSON payload.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Validation` if the request is malformed and
    /// `RelayError::Infrastructure` if the payload cannot be serialized.
    pub fn to_payload(&self) -> Result<serde_json::Value, RelayError> {
        let payload = match self {
            Self::Roll(r) => {
                r.validate()?;
                serde_json::to_value(r.payload())
            }
            Self::Action(a) => {
                a.validate()?;
                serde_json::to_value(a.payload())
            }
        };
        payload.map_err(|e| RelayError::Infrastructure(format!("payload serialization failed: {e}")))
    }
}

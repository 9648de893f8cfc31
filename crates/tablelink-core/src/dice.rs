//! Dice formulas and rolls.
//!
//! Supports sums of dice terms and flat modifiers such as "1d20+5",
//! "2d6+1d4-1" or "d8". Advantage and disadvantage roll the leading d20
//! twice and keep the higher or lower draw.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::RelayError;
use crate::rng::DeterministicRng;

const MAX_DICE: u32 = 100;
const MAX_SIDES: u32 = 1000;
const MAX_TERMS: usize = 20;
/// Largest flat modifier magnitude a formula may carry.
pub const MAX_MODIFIER: i32 = 10_000;

/// Error when parsing or rolling a dice formula.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiceError {
    /// The formula string is empty.
    #[error("empty dice formula")]
    Empty,
    /// A term is neither `XdY` nor an integer.
    #[error("invalid dice term: '{0}'")]
    InvalidTerm(String),
    /// Dice count outside `1..=100`.
    #[error("dice count must be between 1 and {MAX_DICE}, got {0}")]
    DiceCount(u32),
    /// Die size outside `2..=1000`.
    #[error("die size must be between 2 and {MAX_SIDES}, got {0}")]
    DieSize(u32),
    /// Flat modifier whose magnitude exceeds 10000.
    #[error("modifier must be between -{MAX_MODIFIER} and {MAX_MODIFIER}, got {0}")]
    Modifier(i64),
    /// More than 20 terms.
    #[error("at most {MAX_TERMS} terms are allowed, got {0}")]
    TooManyTerms(usize),
    /// Advantage/disadvantage on a formula that does not start with 1d20.
    #[error("advantage and disadvantage need a formula starting with 1d20")]
    NotAD20,
}

impl From<DiceError> for RelayError {
    fn from(err: DiceError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// How the leading d20 is rolled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollMode {
    /// One draw.
    #[default]
    Normal,
    /// Two draws, keep the higher.
    Advantage,
    /// Two draws, keep the lower.
    Disadvantage,
}

/// One `XdY` term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceTerm {
    /// Number of dice.
    pub count: u32,
    /// Sides per die.
    pub sides: u32,
    /// Whether the term is subtracted.
    pub negative: bool,
}

/// A parsed dice formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceFormula {
    /// Dice terms in formula order.
    pub terms: Vec<DiceTerm>,
    /// Sum of all flat modifiers.
    pub modifier: i32,
}

impl DiceFormula {
    /// Parse a formula string.
    ///
    /// # Errors
    ///
    /// Returns a `DiceError` describing the first offending term.
    pub fn parse(input: &str) -> Result<Self, DiceError> {
        let compact: String = input
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        if compact.is_empty() {
            return Err(DiceError::Empty);
        }

        let parts = split_signed(&compact);
        if parts.len() > MAX_TERMS {
            return Err(DiceError::TooManyTerms(parts.len()));
        }

        let mut terms = Vec::new();
        let mut modifier: i64 = 0;
        for (negative, body) in parts {
            if body.is_empty() {
                return Err(DiceError::InvalidTerm(compact.clone()));
            }
            if let Some((count, sides)) = body.split_once('d') {
                let count = if count.is_empty() {
                    1
                } else {
                    count
                        .parse::<u32>()
                        .map_err(|_| DiceError::InvalidTerm(body.to_owned()))?
                };
                let sides = sides
                    .parse::<u32>()
                    .map_err(|_| DiceError::InvalidTerm(body.to_owned()))?;
                if !(1..=MAX_DICE).contains(&count) {
                    return Err(DiceError::DiceCount(count));
                }
                if !(2..=MAX_SIDES).contains(&sides) {
                    return Err(DiceError::DieSize(sides));
                }
                terms.push(DiceTerm {
                    count,
                    sides,
                    negative,
                });
            } else {
                let value = body
                    .parse::<i64>()
                    .map_err(|_| DiceError::InvalidTerm(body.to_owned()))?;
                modifier = if negative {
                    modifier.saturating_sub(value)
                } else {
                    modifier.saturating_add(value)
                };
                if modifier.unsigned_abs() > u64::from(MAX_MODIFIER.unsigned_abs()) {
                    return Err(DiceError::Modifier(modifier));
                }
            }
        }

        if terms.is_empty() {
            return Err(DiceError::InvalidTerm(compact));
        }
        let modifier = i32::try_from(modifier).map_err(|_| DiceError::Modifier(modifier))?;
        Ok(Self { terms, modifier })
    }

    /// Returns `true` if the formula leads with a single positive d20.
    #[must_use]
    pub fn leads_with_d20(&self) -> bool {
        self.terms
            .first()
            .is_some_and(|t| t.count == 1 && t.sides == 20 && !t.negative)
    }

    /// Roll the formula. Totals saturate rather than wrap, so a formula
    /// built by hand with an out-of-range modifier still rolls.
    ///
    /// # Errors
    ///
    /// Returns `DiceError::NotAD20` if `mode` is advantage or disadvantage
    /// and the formula does not lead with a d20.
    pub fn roll(
        &self,
        mode: RollMode,
        rng: &mut dyn DeterministicRng,
    ) -> Result<DiceRoll, DiceError> {
        if mode != RollMode::Normal && !self.leads_with_d20() {
            return Err(DiceError::NotAD20);
        }

        let mut rolls = Vec::new();
        let mut dropped = None;
        let mut total = self.modifier;

        for (index, term) in self.terms.iter().enumerate() {
            let mut subtotal: i32 = 0;
            if index == 0 && mode != RollMode::Normal {
                let first = rng.next_u32_range(1, term.sides);
                let second = rng.next_u32_range(1, term.sides);
                let (kept, discarded) = match mode {
                    RollMode::Advantage => (first.max(second), first.min(second)),
                    _ => (first.min(second), first.max(second)),
                };
                rolls.push(first);
                rolls.push(second);
                dropped = Some(discarded);
                subtotal = i32::try_from(kept).unwrap_or(i32::MAX);
            } else {
                for _ in 0..term.count {
                    let value = rng.next_u32_range(1, term.sides);
                    rolls.push(value);
                    subtotal = subtotal.saturating_add(i32::try_from(value).unwrap_or(i32::MAX));
                }
            }
            total = if term.negative {
                total.saturating_sub(subtotal)
            } else {
                total.saturating_add(subtotal)
            };
        }

        Ok(DiceRoll {
            formula: self.to_string(),
            mode,
            rolls,
            dropped,
            modifier: self.modifier,
            total,
        })
    }
}

/// Splits "1d20+5-1d4" into `[(false, "1d20"), (false, "5"), (true, "1d4")]`.
fn split_signed(input: &str) -> Vec<(bool, &str)> {
    let mut parts = Vec::new();
    let mut negative = false;
    let mut start = 0;
    for (index, c) in input.char_indices() {
        if c == '+' || c == '-' {
            if index > 0 {
                parts.push((negative, &input[start..index]));
            }
            negative = c == '-';
            start = index + 1;
        }
    }
    parts.push((negative, &input[start..]));
    parts
}

impl fmt::Display for DiceFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, term) in self.terms.iter().enumerate() {
            if term.negative {
                f.write_str("-")?;
            } else if index > 0 {
                f.write_str("+")?;
            }
            write!(f, "{}d{}", term.count, term.sides)?;
        }
        match self.modifier {
            0 => Ok(()),
            m if m > 0 => write!(f, "+{m}"),
            m => write!(f, "{m}"),
        }
    }
}

/// Result of rolling a formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceRoll {
    /// Normalized formula that was rolled.
    pub formula: String,
    /// Roll mode.
    pub mode: RollMode,
    /// Every die drawn, in order, including a discarded d20.
    pub rolls: Vec<u32>,
    /// The d20 discarded by advantage or disadvantage.
    pub dropped: Option<u32>,
    /// Flat modifier applied.
    pub modifier: i32,
    /// Final total.
    pub total: i32,
}

impl DiceRoll {
    /// Human-readable breakdown, e.g. "1d20+5 [12, 17 → 17] = 22".
    #[must_use]
    pub fn breakdown(&self) -> String {
        let dice: Vec<String> = self.rolls.iter().map(ToString::to_string).collect();
        match (self.mode, self.dropped) {
            (RollMode::Normal, _) | (_, None) => {
                format!("{} [{}] = {}", self.formula, dice.join(", "), self.total)
            }
            (RollMode::Advantage | RollMode::Disadvantage, Some(dropped)) => {
                let kept = if self.rolls.first() == Some(&dropped) {
                    self.rolls.get(1)
                } else {
                    self.rolls.first()
                };
                format!(
                    "{} [{} → {}] = {}",
                    self.formula,
                    dice.join(", "),
                    kept.copied().unwrap_or(dropped),
                    self.total
                )
            }
        }
    }

    /// Serializes the roll as a record result payload.
    #[must_use]
    pub fn to_result(&self) -> serde_json::Value {
        serde_json::json!({
            "formula": self.formula,
            "mode": self.mode,
            "rolls": self.rolls,
            "dropped": self.dropped,
            "modifier": self.modifier,
            "total": self.total,
            "breakdown": self.breakdown(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedRng(Vec<u32>);

    impl DeterministicRng for ScriptedRng {
        fn next_u32_range(&mut self, _min: u32, _max: u32) -> u32 {
            self.0.remove(0)
        }

        fn next_f64(&mut self) -> f64 {
            0.0
        }
    }

    #[test]
    fn test_parse_simple_d20_with_modifier() {
        let formula = DiceFormula::parse("1d20+5").unwrap();
        assert_eq!(
            formula.terms,
            vec![DiceTerm {
                count: 1,
                sides: 20,
                negative: false
            }]
        );
        assert_eq!(formula.modifier, 5);
        assert!(formula.leads_with_d20());
    }

    #[test]
    fn test_parse_shorthand_and_whitespace() {
        let formula = DiceFormula::parse("  D8 - 1 ").unwrap();
        assert_eq!(formula.terms[0].count, 1);
        assert_eq!(formula.terms[0].sides, 8);
        assert_eq!(formula.modifier, -1);
        assert_eq!(formula.to_string(), "1d8-1");
    }

    #[test]
    fn test_parse_mixed_terms() {
        let formula = DiceFormula::parse("2d6+1d4-1+3").unwrap();
        assert_eq!(formula.terms.len(), 2);
        assert_eq!(formula.modifier, 2);
        assert_eq!(formula.to_string(), "2d6+1d4+2");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(DiceFormula::parse(""), Err(DiceError::Empty));
        assert!(matches!(
            DiceFormula::parse("5"),
            Err(DiceError::InvalidTerm(_))
        ));
        assert!(matches!(
            DiceFormula::parse("1d20++5"),
            Err(DiceError::InvalidTerm(_))
        ));
        assert_eq!(DiceFormula::parse("0d6"), Err(DiceError::DiceCount(0)));
        assert_eq!(DiceFormula::parse("1d1"), Err(DiceError::DieSize(1)));
        assert!(matches!(
            DiceFormula::parse("1dx"),
            Err(DiceError::InvalidTerm(_))
        ));
    }

    #[test]
    fn test_parse_rejects_modifier_out_of_range() {
        assert_eq!(
            DiceFormula::parse("1d20+2147483647"),
            Err(DiceError::Modifier(2_147_483_647))
        );
        assert_eq!(
            DiceFormula::parse("1d20+99999999999"),
            Err(DiceError::Modifier(99_999_999_999))
        );
        assert_eq!(
            DiceFormula::parse("1d20+6000+6000"),
            Err(DiceError::Modifier(12_000))
        );
        assert_eq!(DiceFormula::parse("1d20-10000").unwrap().modifier, -10_000);
    }

    #[test]
    fn test_parse_rejects_too_many_terms() {
        let formula = vec!["1d4"; MAX_TERMS + 1].join("+");

        assert_eq!(
            DiceFormula::parse(&formula),
            Err(DiceError::TooManyTerms(MAX_TERMS + 1))
        );
    }

    #[test]
    fn test_roll_with_extreme_modifier_saturates() {
        let formula = DiceFormula {
            terms: vec![DiceTerm {
                count: 1,
                sides: 20,
                negative: false,
            }],
            modifier: i32::MAX,
        };

        let roll = formula
            .roll(RollMode::Normal, &mut ScriptedRng(vec![20]))
            .unwrap();

        assert_eq!(roll.total, i32::MAX);
    }

    #[test]
    fn test_roll_sums_dice_and_modifier() {
        let formula = DiceFormula::parse("2d6+1d4-1").unwrap();
        let mut rng = ScriptedRng(vec![3, 5, 2]);

        let roll = formula.roll(RollMode::Normal, &mut rng).unwrap();

        assert_eq!(roll.rolls, vec![3, 5, 2]);
        assert_eq!(roll.total, 9);
        assert_eq!(roll.breakdown(), "2d6+1d4-1 [3, 5, 2] = 9");
    }

    #[test]
    fn test_roll_subtracts_negative_terms() {
        let formula = DiceFormula::parse("1d20-1d4").unwrap();
        let mut rng = ScriptedRng(vec![10, 3]);

        let roll = formula.roll(RollMode::Normal, &mut rng).unwrap();

        assert_eq!(roll.total, 7);
    }

    #[test]
    fn test_advantage_keeps_higher_and_reports_dropped() {
        let formula = DiceFormula::parse("1d20+5").unwrap();
        let mut rng = ScriptedRng(vec![12, 17]);

        let roll = formula.roll(RollMode::Advantage, &mut rng).unwrap();

        assert_eq!(roll.total, 22);
        assert_eq!(roll.dropped, Some(12));
        assert_eq!(roll.breakdown(), "1d20+5 [12, 17 → 17] = 22");
    }

    #[test]
    fn test_disadvantage_keeps_lower() {
        let formula = DiceFormula::parse("1d20+2").unwrap();
        let mut rng = ScriptedRng(vec![12, 17]);

        let roll = formula.roll(RollMode::Disadvantage, &mut rng).unwrap();

        assert_eq!(roll.total, 14);
        assert_eq!(roll.dropped, Some(17));
    }

    #[test]
    fn test_advantage_requires_leading_d20() {
        let formula = DiceFormula::parse("2d6").unwrap();
        let mut rng = ScriptedRng(vec![]);

        assert_eq!(
            formula.roll(RollMode::Advantage, &mut rng),
            Err(DiceError::NotAD20)
        );
    }

    #[test]
    fn test_advantage_and_disadvantage_bounds_for_every_draw_pair() {
        let modifier = 5;
        let formula = DiceFormula::parse("1d20+5").unwrap();
        for d1 in 1..=20_u32 {
            for d2 in 1..=20_u32 {
                let advantage = formula
                    .roll(RollMode::Advantage, &mut ScriptedRng(vec![d1, d2]))
                    .unwrap();
                let disadvantage = formula
                    .roll(RollMode::Disadvantage, &mut ScriptedRng(vec![d1, d2]))
                    .unwrap();
                let single = formula
                    .roll(RollMode::Normal, &mut ScriptedRng(vec![d1]))
                    .unwrap();

                for total in [advantage.total, disadvantage.total] {
                    assert!((1 + modifier..=20 + modifier).contains(&total));
                }
                assert!(advantage.total >= single.total);
                assert!(disadvantage.total <= single.total);
            }
        }
    }

    #[test]
    fn test_to_result_carries_total() {
        let formula = DiceFormula::parse("1d20+5").unwrap();
        let roll = formula
            .roll(RollMode::Normal, &mut ScriptedRng(vec![13]))
            .unwrap();

        let result = roll.to_result();

        assert_eq!(result["total"], 18);
        assert_eq!(result["mode"], "normal");
        assert_eq!(result["formula"], "1d20+5");
    }
}

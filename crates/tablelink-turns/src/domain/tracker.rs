//! The combat turn tracker.
//!
//! Keeps combatants sorted by initiative (descending, ties in insertion
//! order) and tracks whose turn it is. Every mutating method returns a
//! `TurnTransition` describing what changed so the caller can announce it.

use serde::{Deserialize, Serialize};
use tablelink_core::error::RelayError;

use super::names::normalize_name;

/// Where a combatant's initiative came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombatantSource {
    /// Entered by hand.
    Manual,
    /// Read from the tabletop's chat log.
    Observed,
}

/// One participant in the initiative order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combatant {
    /// Display name as first seen.
    pub name: String,
    /// Initiative total.
    pub initiative: i32,
    /// Where the initiative came from.
    pub source: CombatantSource,
}

/// Tracker phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombatPhase {
    /// No combat running.
    #[default]
    Idle,
    /// Combat running; one combatant is active.
    Active,
}

/// Read-only snapshot of the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnState {
    /// Combatants in turn order.
    pub combatants: Vec<Combatant>,
    /// Index of the active combatant.
    pub current_index: usize,
    /// Current round, starting at 1.
    pub round: u32,
    /// Current phase.
    pub phase: CombatPhase,
}

/// What a tracker operation changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnTransition {
    /// Active combatant before the operation.
    pub previous: Option<String>,
    /// Active combatant after the operation.
    pub current: Option<String>,
    /// Round before the operation.
    pub previous_round: u32,
    /// Round after the operation.
    pub round: u32,
    /// Phase before the operation.
    pub previous_phase: CombatPhase,
    /// Phase after the operation.
    pub phase: CombatPhase,
}

impl TurnTransition {
    /// Combat went from idle to active, or was restarted.
    #[must_use]
    pub fn started(&self) -> bool {
        self.phase == CombatPhase::Active && self.previous_phase == CombatPhase::Idle
    }

    /// Combat went from active to idle.
    #[must_use]
    pub fn ended(&self) -> bool {
        self.phase == CombatPhase::Idle && self.previous_phase == CombatPhase::Active
    }

    /// The active combatant changed.
    #[must_use]
    pub fn turn_changed(&self) -> bool {
        self.previous != self.current
    }

    /// The round counter changed while combat is running.
    #[must_use]
    pub fn round_changed(&self) -> bool {
        self.phase == CombatPhase::Active && self.previous_round != self.round
    }

    /// One turn ended and another began. A lone combatant wrapping into
    /// the next round counts, even though the active name is unchanged.
    #[must_use]
    pub fn turn_passed(&self) -> bool {
        self.turn_changed() || self.round_changed()
    }

    /// Nothing observable changed.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        !self.turn_changed() && self.previous_round == self.round && self.previous_phase == self.phase
    }
}

#[derive(Debug, Clone)]
struct Slot {
    combatant: Combatant,
    key: String,
    inserted: u64,
}

/// Initiative order and turn pointer for one combat.
#[derive(Debug, Clone)]
pub struct TurnTracker {
    slots: Vec<Slot>,
    current_index: usize,
    round: u32,
    phase: CombatPhase,
    next_insert: u64,
}

impl Default for TurnTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnTracker {
    /// Creates an idle tracker with no combatants.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            current_index: 0,
            round: 1,
            phase: CombatPhase::Idle,
            next_insert: 0,
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> CombatPhase {
        self.phase
    }

    /// Current round.
    #[must_use]
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Index of the active combatant.
    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// Number of combatants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if there are no combatants.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The active combatant, if combat is running.
    #[must_use]
    pub fn active(&self) -> Option<&Combatant> {
        match self.phase {
            CombatPhase::Active => self.slots.get(self.current_index).map(|s| &s.combatant),
            CombatPhase::Idle => None,
        }
    }

    /// Combatants in turn order.
    pub fn combatants(&self) -> impl Iterator<Item = &Combatant> {
        self.slots.iter().map(|s| &s.combatant)
    }

    /// Snapshot of the whole tracker.
    #[must_use]
    pub fn state(&self) -> TurnState {
        TurnState {
            combatants: self.combatants().cloned().collect(),
            current_index: self.current_index,
            round: self.round,
            phase: self.phase,
        }
    }

    fn mark(&self) -> (Option<String>, u32, CombatPhase) {
        (self.active().map(|c| c.name.clone()), self.round, self.phase)
    }

    fn transition(&self, before: (Option<String>, u32, CombatPhase)) -> TurnTransition {
        let (previous, previous_round, previous_phase) = before;
        TurnTransition {
            previous,
            current: self.active().map(|c| c.name.clone()),
            previous_round,
            round: self.round,
            previous_phase,
            phase: self.phase,
        }
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.key == key)
    }

    fn sort(&mut self) {
        self.slots.sort_by(|a, b| {
            b.combatant
                .initiative
                .cmp(&a.combatant.initiative)
                .then(a.inserted.cmp(&b.inserted))
        });
    }

    fn require_active(&self) -> Result<(), RelayError> {
        if self.phase == CombatPhase::Active {
            Ok(())
        } else {
            Err(RelayError::Validation("no combat is running".into()))
        }
    }

    /// Starts (or restarts) combat at the top of the order in round 1.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Validation` if there are no combatants.
    pub fn start_combat(&mut self) -> Result<TurnTransition, RelayError> {
        if self.slots.is_empty() {
            return Err(RelayError::Validation(
                "cannot start combat without combatants".into(),
            ));
        }
        // A restart counts as a fresh start.
        let (previous, previous_round, _) = self.mark();
        self.phase = CombatPhase::Active;
        self.current_index = 0;
        self.round = 1;
        Ok(self.transition((previous, previous_round, CombatPhase::Idle)))
    }

    /// Advances to the next combatant, wrapping into the next round.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Validation` if combat is not running.
    pub fn next_turn(&mut self) -> Result<TurnTransition, RelayError> {
        self.require_active()?;
        let before = self.mark();
        self.current_index += 1;
        if self.current_index >= self.slots.len() {
            self.current_index = 0;
            self.round = self.round.saturating_add(1);
        }
        Ok(self.transition(before))
    }

    /// Steps back to the previous combatant, wrapping into the previous
    /// round (never below round 1).
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Validation` if combat is not running.
    pub fn prev_turn(&mut self) -> Result<TurnTransition, RelayError> {
        self.require_active()?;
        let before = self.mark();
        if self.current_index == 0 {
            self.current_index = self.slots.len() - 1;
            self.round = self.round.saturating_sub(1).max(1);
        } else {
            self.current_index -= 1;
        }
        Ok(self.transition(before))
    }

    /// Adds a combatant, or updates the initiative of one with the same
    /// normalized name, and re-sorts. During combat the active combatant
    /// stays active.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Validation` if the name is blank.
    pub fn add_combatant(
        &mut self,
        name: &str,
        initiative: i32,
        source: CombatantSource,
    ) -> Result<TurnTransition, RelayError> {
        let key = normalize_name(name);
        if key.is_empty() {
            return Err(RelayError::Validation("combatant name must not be blank".into()));
        }
        let before = self.mark();
        let active_key = self.active().map(|_| self.slots[self.current_index].key.clone());

        if let Some(index) = self.position(&key) {
            let slot = &mut self.slots[index];
            slot.combatant.initiative = initiative;
            slot.combatant.source = source;
        } else {
            self.slots.push(Slot {
                combatant: Combatant {
                    name: name.trim().to_owned(),
                    initiative,
                    source,
                },
                key,
                inserted: self.next_insert,
            });
            self.next_insert += 1;
        }
        self.sort();

        if let Some(active_key) = active_key {
            self.current_index = self.position(&active_key).unwrap_or(0);
        }
        Ok(self.transition(before))
    }

    /// Removes a combatant. Removing someone earlier in the order keeps the
    /// same combatant active; removing the active combatant passes the turn
    /// to whoever now holds its index, or to the top of the order. Removing
    /// the last combatant ends combat.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Validation` if no combatant has that name.
    pub fn remove_combatant(&mut self, name: &str) -> Result<TurnTransition, RelayError> {
        let key = normalize_name(name);
        let index = self
            .position(&key)
            .ok_or_else(|| RelayError::Validation(format!("no combatant named {name}")))?;
        let before = self.mark();

        self.slots.remove(index);
        if index < self.current_index {
            self.current_index -= 1;
        }
        if self.current_index >= self.slots.len() {
            self.current_index = 0;
        }
        if self.slots.is_empty() {
            self.phase = CombatPhase::Idle;
        }
        Ok(self.transition(before))
    }

    /// Ends combat and forgets every combatant.
    pub fn clear_all(&mut self) -> TurnTransition {
        let before = self.mark();
        self.slots.clear();
        self.current_index = 0;
        self.round = 1;
        self.phase = CombatPhase::Idle;
        self.transition(before)
    }
}

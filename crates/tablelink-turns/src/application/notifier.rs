//! Turn notification fan-out to registered observers.
//!
//! An observer (a companion view, an overlay) registers under a combatant
//! name and is told when that combatant's turn starts and ends. Matching is
//! by exact normalized name only. Observers are reached through message
//! passing and pruned the first time a send finds them gone.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::names::normalize_name;

/// What an observer is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnSignal {
    /// The observer's combatant is now active.
    #[serde(rename = "activate_turn")]
    Activate,
    /// The observer's combatant is no longer active.
    #[serde(rename = "deactivate_turn")]
    Deactivate,
}

/// Message sent to one observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnNotification {
    /// Activate or deactivate.
    pub signal: TurnSignal,
    /// The combatant concerned, as displayed by the tracker.
    pub combatant: String,
    /// Current round.
    pub round: u32,
}

/// Why a notification could not be delivered.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ObserverError {
    /// The observer is alive but not keeping up.
    #[error("observer queue is full")]
    Full,
    /// The observer is gone.
    #[error("observer is closed")]
    Closed,
}

/// A notification target.
pub trait TurnObserver: Send + Sync {
    /// Deliver one notification without waiting.
    ///
    /// # Errors
    ///
    /// Returns `ObserverError::Closed` once the target is unreachable.
    fn notify(&self, notification: &TurnNotification) -> Result<(), ObserverError>;
}

/// Observer backed by a bounded `mpsc` channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::Sender<TurnNotification>,
}

impl ChannelObserver {
    /// Create an observer and the receiver its target reads from.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TurnNotification>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl TurnObserver for ChannelObserver {
    fn notify(&self, notification: &TurnNotification) -> Result<(), ObserverError> {
        self.sender
            .try_send(notification.clone())
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => ObserverError::Full,
                mpsc::error::TrySendError::Closed(_) => ObserverError::Closed,
            })
    }
}

/// What one fan-out did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Keys sent `activate_turn`.
    pub activated: Vec<String>,
    /// Keys sent `deactivate_turn`.
    pub deactivated: Vec<String>,
    /// Keys dropped because their observer was closed.
    pub pruned: Vec<String>,
}

/// Observers keyed by normalized combatant name.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: BTreeMap<String, Box<dyn TurnObserver>>,
}

impl ObserverRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `observer` for the combatant `name`, replacing any earlier
    /// observer for the same normalized name. Returns the key used.
    ///
    /// Blank names are ignored and yield `None`.
    pub fn register(&mut self, name: &str, observer: Box<dyn TurnObserver>) -> Option<String> {
        let key = normalize_name(name);
        if key.is_empty() {
            return None;
        }
        if self.observers.insert(key.clone(), observer).is_some() {
            debug!(key, "replaced turn observer");
        }
        Some(key)
    }

    /// Remove the observer for `name`. Returns `true` if one was registered.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.observers.remove(&normalize_name(name)).is_some()
    }

    /// Number of registered observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Returns `true` if no observer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Tell the observer of `current` its turn started and the observer of
    /// `previous` its turn ended. Closed observers are pruned.
    pub fn fan_out(
        &mut self,
        previous: Option<&str>,
        current: Option<&str>,
        round: u32,
    ) -> FanOutReport {
        let previous_key = previous.map(normalize_name).filter(|k| !k.is_empty());
        let current_key = current.map(normalize_name).filter(|k| !k.is_empty());
        let mut report = FanOutReport::default();

        for (key, observer) in &self.observers {
            let (signal, combatant) = if current_key.as_deref() == Some(key.as_str()) {
                (TurnSignal::Activate, current)
            } else if previous_key.as_deref() == Some(key.as_str()) {
                (TurnSignal::Deactivate, previous)
            } else {
                continue;
            };
            let notification = TurnNotification {
                signal,
                combatant: combatant.unwrap_or(key.as_str()).to_owned(),
                round,
            };
            match observer.notify(&notification) {
                Ok(()) => match signal {
                    TurnSignal::Activate => report.activated.push(key.clone()),
                    TurnSignal::Deactivate => report.deactivated.push(key.clone()),
                },
                Err(ObserverError::Full) => {
                    warn!(key, ?signal, "turn observer is full, notification dropped");
                }
                Err(ObserverError::Closed) => report.pruned.push(key.clone()),
            }
        }

        for key in &report.pruned {
            warn!(key, "pruning closed turn observer");
            self.observers.remove(key);
        }
        report
    }

    /// Send `deactivate_turn` to every observer and drop every
    /// registration.
    pub fn dispose(&mut self, round: u32) -> FanOutReport {
        let mut report = FanOutReport::default();
        for (key, observer) in std::mem::take(&mut self.observers) {
            let notification = TurnNotification {
                signal: TurnSignal::Deactivate,
                combatant: key.clone(),
                round,
            };
            match observer.notify(&notification) {
                Ok(()) => report.deactivated.push(key),
                Err(ObserverError::Full) => {
                    warn!(key, "turn observer is full, deactivation dropped");
                }
                Err(ObserverError::Closed) => report.pruned.push(key),
            }
        }
        report
    }
}

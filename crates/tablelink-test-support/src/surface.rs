//! Scripted tabletop — a `TabletopSurface` driven by the test.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tablelink_core::error::RelayError;
use tablelink_core::log::LogEntry;
use tablelink_core::surface::{ExecutionDirective, TabletopSurface};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    /// Answer `SubmitRoll` with an inline roll from the scripted totals.
    Respond,
    /// Accept every directive but never write anything to the log.
    Silent,
    /// Reject every directive as if the UI target were missing.
    Missing,
    /// Panic inside `apply`.
    Panic,
}

/// A tabletop that records every directive it receives and, for rolls,
/// appends an inline-roll log entry with the next scripted total.
#[derive(Debug)]
pub struct ScriptedSurface {
    behavior: Behavior,
    totals: Mutex<VecDeque<i32>>,
    applied: Mutex<Vec<ExecutionDirective>>,
    log: broadcast::Sender<LogEntry>,
}

impl ScriptedSurface {
    fn with_behavior(behavior: Behavior, totals: Vec<i32>) -> Self {
        Self {
            behavior,
            totals: Mutex::new(totals.into()),
            applied: Mutex::new(Vec::new()),
            log: broadcast::channel(64).0,
        }
    }

    /// A tabletop whose roller returns `totals` in order.
    #[must_use]
    pub fn rolling(totals: Vec<i32>) -> Self {
        Self::with_behavior(Behavior::Respond, totals)
    }

    /// A tabletop that accepts directives but never logs a result.
    #[must_use]
    pub fn silent() -> Self {
        Self::with_behavior(Behavior::Silent, Vec::new())
    }

    /// A tabletop whose chat input cannot be found.
    #[must_use]
    pub fn missing_target() -> Self {
        Self::with_behavior(Behavior::Missing, Vec::new())
    }

    /// A tabletop whose automation panics on every directive.
    #[must_use]
    pub fn panicking() -> Self {
        Self::with_behavior(Behavior::Panic, Vec::new())
    }

    /// Every directive applied so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn applied(&self) -> Vec<ExecutionDirective> {
        self.applied.lock().unwrap().clone()
    }

    /// Append an entry to the tabletop log as if a player had typed it.
    pub fn push_log(&self, entry: LogEntry) {
        let _ = self.log.send(entry);
    }

    /// Number of live log subscribers.
    #[must_use]
    pub fn log_subscribers(&self) -> usize {
        self.log.receiver_count()
    }
}

#[async_trait]
impl TabletopSurface for ScriptedSurface {
    async fn apply(&self, directive: &ExecutionDirective) -> Result<(), RelayError> {
        if self.behavior == Behavior::Missing {
            return Err(RelayError::Execution("chat input not found".into()));
        }
        assert!(self.behavior != Behavior::Panic, "tabletop automation crashed");
        self.applied.lock().unwrap().push(directive.clone());

        if self.behavior == Behavior::Respond {
            if let ExecutionDirective::SubmitRoll {
                formula,
                label,
                character,
            } = directive
            {
                let total = self.totals.lock().unwrap().pop_front();
                if let Some(total) = total {
                    self.push_log(LogEntry::roll(
                        character.as_deref(),
                        label.as_deref(),
                        formula,
                        total,
                    ));
                }
            }
        }
        Ok(())
    }

    fn subscribe_log(&self) -> broadcast::Receiver<LogEntry> {
        self.log.subscribe()
    }
}

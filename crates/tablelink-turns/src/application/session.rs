//! One combat, end to end.
//!
//! A `CombatSession` owns the tracker and the observer registry for a
//! single combat on one pairing. Every operation mutates the tracker first;
//! the resulting transition is then written to the store as turn events,
//! fanned out to observers, and announced on the tabletop. Those side
//! effects are best-effort: a failure is logged and never undoes the
//! transition.

use std::sync::Arc;

use serde_json::json;
use tablelink_core::clock::Clock;
use tablelink_core::error::RelayError;
use tablelink_core::log::LogEntry;
use tablelink_core::store::{RelayStore, TurnEvent, TurnEventStatus, TurnEventType};
use tablelink_core::surface::{ExecutionDirective, TabletopSurface};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::ingestion::LogIngestor;
use super::notifier::{ObserverRegistry, TurnObserver};
use crate::domain::tracker::{CombatantSource, TurnTracker, TurnTransition};

/// A turn event before it is stamped with an id and time.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTurnEvent {
    /// What happened.
    pub event_type: TurnEventType,
    /// The combatant concerned, if any.
    pub combatant_name: Option<String>,
    /// Round the event belongs to.
    pub round: u32,
    /// Free-form flags.
    pub action_flags: serde_json::Value,
}

/// Actions a combatant has left at the start of its turn.
#[must_use]
pub fn fresh_turn_flags() -> serde_json::Value {
    json!({
        "action": true,
        "bonus_action": true,
        "reaction": true,
        "movement": true,
    })
}

/// Turn events describing `transition`, in announcement order.
#[must_use]
pub fn turn_events_for(transition: &TurnTransition) -> Vec<PlannedTurnEvent> {
    let event = |event_type, combatant_name: Option<&String>, round, action_flags| {
        PlannedTurnEvent {
            event_type,
            combatant_name: combatant_name.cloned(),
            round,
            action_flags,
        }
    };
    let started = transition.started();
    let turn_started = transition.current.is_some() && (started || transition.turn_passed());
    let turn_ended = transition.previous.is_some()
        && (transition.turn_changed() || (transition.round_changed() && !started));
    let mut events = Vec::new();

    if started {
        events.push(event(TurnEventType::CombatStart, None, transition.round, json!({})));
    }
    if turn_ended {
        events.push(event(
            TurnEventType::TurnEnd,
            transition.previous.as_ref(),
            transition.previous_round,
            json!({}),
        ));
    }
    if transition.round_changed() && !started {
        events.push(event(TurnEventType::RoundChange, None, transition.round, json!({})));
    }
    if turn_started {
        events.push(event(
            TurnEventType::TurnStart,
            transition.current.as_ref(),
            transition.round,
            fresh_turn_flags(),
        ));
    }
    if transition.ended() {
        events.push(event(TurnEventType::CombatEnd, None, transition.previous_round, json!({})));
    }
    events
}

/// Chat lines the tracker posts for `transition`. Each starts with one of
/// the reserved announcement markers so ingestion skips it.
#[must_use]
pub fn announcements_for(transition: &TurnTransition, initiative: Option<i32>) -> Vec<String> {
    let mut lines = Vec::new();
    if transition.started() {
        lines.push("⚔️ Combat started".to_owned());
    } else if transition.round_changed() {
        lines.push(format!("🔄 Round {}", transition.round));
    }
    if let Some(current) = &transition.current {
        if transition.started() || transition.turn_passed() {
            lines.push(match initiative {
                Some(initiative) => format!("▶️ {current}'s turn (initiative {initiative})"),
                None => format!("▶️ {current}'s turn"),
            });
        }
    }
    if transition.ended() {
        lines.push("🏁 Combat ended".to_owned());
    }
    lines
}

fn stored_round(round: u32) -> i32 {
    i32::try_from(round).unwrap_or(i32::MAX)
}

/// Tracker, observers, and side-effect sinks for one combat.
pub struct CombatSession {
    pairing_id: Uuid,
    tracker: TurnTracker,
    observers: ObserverRegistry,
    store: Option<Arc<dyn RelayStore>>,
    surface: Option<Arc<dyn TabletopSurface>>,
    clock: Arc<dyn Clock>,
    ingestor: LogIngestor,
}

impl CombatSession {
    /// Create an idle session for `pairing_id` with no store or surface.
    #[must_use]
    pub fn new(pairing_id: Uuid, clock: Arc<dyn Clock>) -> Self {
        Self {
            pairing_id,
            tracker: TurnTracker::new(),
            observers: ObserverRegistry::new(),
            store: None,
            surface: None,
            clock,
            ingestor: LogIngestor::default(),
        }
    }

    /// Write turn events to `store`.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn RelayStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Announce transitions on, and ingest initiative from, `surface`.
    #[must_use]
    pub fn with_surface(mut self, surface: Arc<dyn TabletopSurface>) -> Self {
        self.surface = Some(surface);
        self
    }

    /// Replace the default parser chain.
    #[must_use]
    pub fn with_ingestor(mut self, ingestor: LogIngestor) -> Self {
        self.ingestor = ingestor;
        self
    }

    /// The pairing this combat is announced on.
    #[must_use]
    pub fn pairing_id(&self) -> Uuid {
        self.pairing_id
    }

    /// Read access to the tracker.
    #[must_use]
    pub fn tracker(&self) -> &TurnTracker {
        &self.tracker
    }

    /// Register an observer for the combatant `name`. If that combatant is
    /// already active the observer is activated immediately.
    pub fn register_observer(&mut self, name: &str, observer: Box<dyn TurnObserver>) -> bool {
        if self.observers.register(name, observer).is_none() {
            return false;
        }
        let active = self.tracker.active().map(|c| c.name.clone());
        if let Some(active) = active {
            self.observers.fan_out(None, Some(&active), self.tracker.round());
        }
        true
    }

    /// Remove the observer for `name`.
    pub fn unregister_observer(&mut self, name: &str) -> bool {
        self.observers.unregister(name)
    }

    /// Number of live observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Start (or restart) combat.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Validation` if there are no combatants.
    #[instrument(skip(self), fields(pairing_id = %self.pairing_id))]
    pub async fn start_combat(&mut self) -> Result<TurnTransition, RelayError> {
        let transition = self.tracker.start_combat()?;
        info!(round = transition.round, active = ?transition.current, "combat started");
        self.publish(&transition).await;
        Ok(transition)
    }

    /// Advance to the next combatant.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Validation` if combat is not running.
    #[instrument(skip(self), fields(pairing_id = %self.pairing_id))]
    pub async fn next_turn(&mut self) -> Result<TurnTransition, RelayError> {
        let transition = self.tracker.next_turn()?;
        info!(round = transition.round, active = ?transition.current, "turn advanced");
        self.publish(&transition).await;
        Ok(transition)
    }

    /// Step back to the previous combatant.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Validation` if combat is not running.
    #[instrument(skip(self), fields(pairing_id = %self.pairing_id))]
    pub async fn prev_turn(&mut self) -> Result<TurnTransition, RelayError> {
        let transition = self.tracker.prev_turn()?;
        info!(round = transition.round, active = ?transition.current, "turn stepped back");
        self.publish(&transition).await;
        Ok(transition)
    }

    /// Add a combatant or update its initiative.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Validation` if the name is blank.
    #[instrument(skip(self), fields(pairing_id = %self.pairing_id))]
    pub async fn add_combatant(
        &mut self,
        name: &str,
        initiative: i32,
        source: CombatantSource,
    ) -> Result<TurnTransition, RelayError> {
        let transition = self.tracker.add_combatant(name, initiative, source)?;
        self.publish(&transition).await;
        Ok(transition)
    }

    /// Remove a combatant.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Validation` if no combatant has that name.
    #[instrument(skip(self), fields(pairing_id = %self.pairing_id))]
    pub async fn remove_combatant(&mut self, name: &str) -> Result<TurnTransition, RelayError> {
        let transition = self.tracker.remove_combatant(name)?;
        self.publish(&transition).await;
        Ok(transition)
    }

    /// End combat, deactivate every observer, and dispose the registry.
    #[instrument(skip(self), fields(pairing_id = %self.pairing_id))]
    pub async fn clear_all(&mut self) -> TurnTransition {
        let transition = self.tracker.clear_all();
        info!("combat cleared");
        self.record(&transition).await;
        let report = self.observers.dispose(transition.previous_round);
        debug!(deactivated = report.deactivated.len(), pruned = report.pruned.len(), "observers disposed");
        self.announce(&transition).await;
        transition
    }

    /// Feed one chat-log entry to the ingestor, adding or updating the
    /// combatant it declares.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Validation` if the declared name normalizes to
    /// nothing.
    pub async fn ingest(&mut self, entry: &LogEntry) -> Result<Option<TurnTransition>, RelayError> {
        let Some(declaration) = self.ingestor.ingest(entry) else {
            return Ok(None);
        };
        info!(name = %declaration.name, initiative = declaration.initiative, "initiative ingested");
        let transition = self
            .add_combatant(
                &declaration.name,
                declaration.initiative,
                CombatantSource::Observed,
            )
            .await?;
        Ok(Some(transition))
    }

    /// Ingest the tabletop log until `shutdown` fires or the log closes.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Configuration` if no surface is attached.
    pub async fn follow_log(&mut self, shutdown: CancellationToken) -> Result<(), RelayError> {
        let surface = self.surface.clone().ok_or_else(|| {
            RelayError::Configuration("no tabletop surface attached to the combat session".into())
        })?;
        let mut log = surface.subscribe_log();
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                received = log.recv() => match received {
                    Ok(entry) => {
                        if let Err(err) = self.ingest(&entry).await {
                            warn!(error = %err, "ignoring unusable initiative declaration");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "tabletop log lagged, entries skipped");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!(pairing_id = %self.pairing_id, "stopped following tabletop log");
        Ok(())
    }

    async fn publish(&mut self, transition: &TurnTransition) {
        if transition.is_noop() {
            return;
        }
        self.record(transition).await;
        if transition.started() || transition.turn_passed() {
            let report = self.observers.fan_out(
                transition.previous.as_deref(),
                transition.current.as_deref(),
                transition.round,
            );
            debug!(
                activated = report.activated.len(),
                deactivated = report.deactivated.len(),
                pruned = report.pruned.len(),
                "turn observers notified"
            );
        }
        self.announce(transition).await;
    }

    async fn record(&self, transition: &TurnTransition) {
        let Some(store) = &self.store else {
            return;
        };
        for planned in turn_events_for(transition) {
            let event = TurnEvent {
                id: Uuid::new_v4(),
                pairing_id: self.pairing_id,
                event_type: planned.event_type,
                combatant_name: planned.combatant_name,
                round: stored_round(planned.round),
                action_flags: planned.action_flags,
                status: TurnEventStatus::Pending,
                created_at: self.clock.now(),
            };
            if let Err(err) = store.insert_turn_event(&event).await {
                warn!(event_type = %event.event_type, error = %err, "failed to write turn event");
            }
        }
    }

    async fn announce(&self, transition: &TurnTransition) {
        let Some(surface) = &self.surface else {
            return;
        };
        let initiative = self.tracker.active().map(|c| c.initiative);
        for text in announcements_for(transition, initiative) {
            if let Err(err) = surface.apply(&ExecutionDirective::Announce { text }).await {
                warn!(error = %err, "failed to announce turn on the tabletop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::{DateTime, TimeZone, Utc};
    use tablelink_core::store::TurnEventType::{CombatEnd, CombatStart, RoundChange, TurnEnd, TurnStart};
    use tablelink_test_support::{FailingRelayStore, FixedClock, InMemoryRelayStore, ScriptedSurface};
    use tokio::sync::mpsc;

    use crate::application::notifier::{ChannelObserver, TurnNotification, TurnSignal};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
    }

    fn session(store: Arc<InMemoryRelayStore>) -> CombatSession {
        CombatSession::new(Uuid::new_v4(), Arc::new(FixedClock(start()))).with_store(store)
    }

    async fn seeded(session: &mut CombatSession) {
        for (name, initiative) in [("Aria", 21), ("Brom", 22), ("Cole", 15)] {
            session
                .add_combatant(name, initiative, CombatantSource::Manual)
                .await
                .unwrap();
        }
    }

    fn event_types(store: &InMemoryRelayStore) -> Vec<(TurnEventType, Option<String>, i32)> {
        store
            .turn_events()
            .into_iter()
            .map(|e| (e.event_type, e.combatant_name, e.round))
            .collect()
    }

    fn observe(session: &mut CombatSession, name: &str) -> mpsc::Receiver<TurnNotification> {
        let (observer, receiver) = ChannelObserver::channel(8);
        assert!(session.register_observer(name, Box::new(observer)));
        receiver
    }

    #[tokio::test]
    async fn test_idle_roster_changes_write_no_events() {
        let store = Arc::new(InMemoryRelayStore::new());
        let mut session = session(store.clone());

        seeded(&mut session).await;

        assert!(store.turn_events().is_empty());
        let names: Vec<_> = session.tracker().combatants().map(|c| c.name.clone()).collect();
        assert_eq!(names, vec!["Brom", "Aria", "Cole"]);
    }

    #[tokio::test]
    async fn test_full_round_writes_events_in_order() {
        let store = Arc::new(InMemoryRelayStore::new());
        let mut session = session(store.clone());
        seeded(&mut session).await;

        session.start_combat().await.unwrap();
        for _ in 0..3 {
            session.next_turn().await.unwrap();
        }

        let name = |n: &str| Some(n.to_owned());
        assert_eq!(
            event_types(&store),
            vec![
                (CombatStart, None, 1),
                (TurnStart, name("Brom"), 1),
                (TurnEnd, name("Brom"), 1),
                (TurnStart, name("Aria"), 1),
                (TurnEnd, name("Aria"), 1),
                (TurnStart, name("Cole"), 1),
                (TurnEnd, name("Cole"), 1),
                (RoundChange, None, 2),
                (TurnStart, name("Brom"), 2),
            ]
        );
        assert_eq!(session.tracker().active().unwrap().name, "Brom");
        assert_eq!(session.tracker().round(), 2);
    }

    #[tokio::test]
    async fn test_lone_combatant_wrap_ends_and_restarts_its_turn() {
        let store = Arc::new(InMemoryRelayStore::new());
        let surface = Arc::new(ScriptedSurface::silent());
        let mut session = session(store.clone()).with_surface(surface.clone());
        session
            .add_combatant("Aria", 17, CombatantSource::Manual)
            .await
            .unwrap();
        let mut aria = observe(&mut session, "Aria");

        session.start_combat().await.unwrap();
        session.next_turn().await.unwrap();

        let name = |n: &str| Some(n.to_owned());
        assert_eq!(
            event_types(&store),
            vec![
                (CombatStart, None, 1),
                (TurnStart, name("Aria"), 1),
                (TurnEnd, name("Aria"), 1),
                (RoundChange, None, 2),
                (TurnStart, name("Aria"), 2),
            ]
        );
        assert_eq!(aria.try_recv().unwrap().round, 1);
        let second = aria.try_recv().unwrap();
        assert_eq!(second.signal, TurnSignal::Activate);
        assert_eq!(second.round, 2);
        let lines: Vec<String> = surface
            .applied()
            .into_iter()
            .filter_map(|d| match d {
                ExecutionDirective::Announce { text } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(
            lines,
            vec![
                "⚔️ Combat started",
                "▶️ Aria's turn (initiative 17)",
                "🔄 Round 2",
                "▶️ Aria's turn (initiative 17)",
            ]
        );
    }

    #[tokio::test]
    async fn test_turn_start_carries_fresh_action_flags() {
        let store = Arc::new(InMemoryRelayStore::new());
        let mut session = session(store.clone());
        seeded(&mut session).await;

        session.start_combat().await.unwrap();

        let events = store.turn_events();
        let turn_start = events.iter().find(|e| e.event_type == TurnStart).unwrap();
        assert_eq!(turn_start.action_flags, fresh_turn_flags());
        assert_eq!(turn_start.status, TurnEventStatus::Pending);
        assert_eq!(turn_start.created_at, start());
    }

    #[tokio::test]
    async fn test_observers_follow_the_active_combatant() {
        let store = Arc::new(InMemoryRelayStore::new());
        let mut session = session(store);
        session
            .add_combatant("🔵 Test 2", 18, CombatantSource::Manual)
            .await
            .unwrap();
        session
            .add_combatant("Test 20", 12, CombatantSource::Manual)
            .await
            .unwrap();
        let mut test_2 = observe(&mut session, "Test 2");
        let mut test_20 = observe(&mut session, "Test 20");

        session.start_combat().await.unwrap();
        let first = test_2.try_recv().unwrap();
        assert!(test_20.try_recv().is_err());
        session.next_turn().await.unwrap();

        assert_eq!(first.signal, TurnSignal::Activate);
        assert_eq!(first.combatant, "🔵 Test 2");
        assert_eq!(test_2.try_recv().unwrap().signal, TurnSignal::Deactivate);
        assert_eq!(test_20.try_recv().unwrap().signal, TurnSignal::Activate);
    }

    #[tokio::test]
    async fn test_late_observer_of_active_combatant_is_activated() {
        let store = Arc::new(InMemoryRelayStore::new());
        let mut session = session(store);
        seeded(&mut session).await;
        session.start_combat().await.unwrap();

        let mut brom = observe(&mut session, "Brom's turn");

        assert_eq!(brom.try_recv().unwrap().signal, TurnSignal::Activate);
    }

    #[tokio::test]
    async fn test_clear_all_ends_combat_and_disposes_observers() {
        let store = Arc::new(InMemoryRelayStore::new());
        let mut session = session(store.clone());
        seeded(&mut session).await;
        let mut aria = observe(&mut session, "Aria");
        session.start_combat().await.unwrap();

        let transition = session.clear_all().await;

        assert!(transition.ended());
        assert!(session.tracker().is_empty());
        assert_eq!(session.observer_count(), 0);
        assert_eq!(aria.try_recv().unwrap().signal, TurnSignal::Deactivate);
        assert_eq!(
            event_types(&store).last().cloned(),
            Some((CombatEnd, None, 1))
        );
    }

    #[tokio::test]
    async fn test_store_failures_do_not_undo_transitions() {
        let mut session = CombatSession::new(Uuid::new_v4(), Arc::new(FixedClock(start())))
            .with_store(Arc::new(FailingRelayStore::unreachable()));
        seeded(&mut session).await;

        session.start_combat().await.unwrap();
        session.next_turn().await.unwrap();

        assert_eq!(session.tracker().active().unwrap().name, "Aria");
    }

    #[tokio::test]
    async fn test_announcements_carry_reserved_markers() {
        let surface = Arc::new(ScriptedSurface::silent());
        let mut session = CombatSession::new(Uuid::new_v4(), Arc::new(FixedClock(start())))
            .with_surface(surface.clone());
        seeded(&mut session).await;

        session.start_combat().await.unwrap();
        session.next_turn().await.unwrap();
        session.clear_all().await;

        let lines: Vec<String> = surface
            .applied()
            .into_iter()
            .filter_map(|d| match d {
                ExecutionDirective::Announce { text } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(
            lines,
            vec![
                "⚔️ Combat started",
                "▶️ Brom's turn (initiative 22)",
                "▶️ Aria's turn (initiative 21)",
                "🏁 Combat ended",
            ]
        );
        let ingestor = LogIngestor::default();
        for line in &lines {
            assert!(ingestor.ingest(&LogEntry::text(None, line.as_str())).is_none());
        }
    }

    #[tokio::test]
    async fn test_ingest_adds_observed_combatants() {
        let store = Arc::new(InMemoryRelayStore::new());
        let mut session = session(store);

        let added = session
            .ingest(&LogEntry::roll(Some("Aria"), Some("Initiative"), "1d20+3", 17))
            .await
            .unwrap();
        let ignored = session
            .ingest(&LogEntry::text(Some("Aria"), "I hide behind the crates"))
            .await
            .unwrap();
        session
            .ingest(&LogEntry::text(None, "Aria rolls initiative: 19"))
            .await
            .unwrap();

        assert!(added.is_some());
        assert!(ignored.is_none());
        let combatants: Vec<_> = session.tracker().combatants().cloned().collect();
        assert_eq!(combatants.len(), 1);
        assert_eq!(combatants[0].initiative, 19);
        assert_eq!(combatants[0].source, CombatantSource::Observed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_follow_log_ingests_until_shutdown() {
        let surface = Arc::new(ScriptedSurface::silent());
        let mut session = CombatSession::new(Uuid::new_v4(), Arc::new(FixedClock(start())))
            .with_surface(surface.clone());
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let task = tokio::spawn(async move {
            session.follow_log(token).await.unwrap();
            session
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        surface.push_log(LogEntry::text(None, "Brom rolls initiative: 14"));
        surface.push_log(LogEntry::text(None, "▶️ Brom's turn (initiative 14)"));
        surface.push_log(LogEntry::roll(Some("Cole"), Some("Initiative"), "1d20", 9));
        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.cancel();
        let session = task.await.unwrap();

        let names: Vec<_> = session.tracker().combatants().map(|c| c.name.clone()).collect();
        assert_eq!(names, vec!["Brom", "Cole"]);
        assert_eq!(surface.log_subscribers(), 0);
    }

    #[tokio::test]
    async fn test_follow_log_requires_a_surface() {
        let mut session = CombatSession::new(Uuid::new_v4(), Arc::new(FixedClock(start())));

        let result = session.follow_log(CancellationToken::new()).await;

        assert!(matches!(result, Err(RelayError::Configuration(_))));
    }

    #[test]
    fn test_restart_with_new_leader_ends_previous_turn() {
        let transition = TurnTransition {
            previous: Some("Aria".into()),
            current: Some("Brom".into()),
            previous_round: 3,
            round: 1,
            previous_phase: crate::domain::tracker::CombatPhase::Idle,
            phase: crate::domain::tracker::CombatPhase::Active,
        };

        let types: Vec<_> = turn_events_for(&transition)
            .into_iter()
            .map(|e| e.event_type)
            .collect();

        assert_eq!(types, vec![CombatStart, TurnEnd, TurnStart]);
    }
}

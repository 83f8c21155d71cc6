//! Per-widget game session facade.
//!
//! Composes the rule engine, session lifecycle, optimistic cache, and
//! change propagation for one (pair, widget) key, and is the only surface
//! the UI collaborator talks to: render snapshots out, `submit_move` /
//! `reset_game` / `set_cosmetic` commands in, typed [`WidgetEvent`]
//! signals when the other participant changes the canonical state.

use std::time::Instant;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, warn};

use crate::game::rules::{GameKind, MoveTarget, PerRole, PlayerRole};
use crate::game::session::{GameSession, MoveOutcome};
use crate::sync::cache::{OptimisticController, SubmitError};
use crate::sync::propagator::{ChangeNotifier, ChangePropagator, Delivery};
use crate::sync::store::{SessionKey, SessionStore};

/// Map the abstract current viewer to one of the two fixed roles, given
/// the pairing's member user ids.
pub fn resolve_role(members: &PerRole<String>, user_id: &str) -> Option<PlayerRole> {
    if members.one == user_id {
        Some(PlayerRole::One)
    } else if members.two == user_id {
        Some(PlayerRole::Two)
    } else {
        None
    }
}

/// Signals surfaced to the UI collaborator by [`GameWidget::pump`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetEvent {
    /// The other participant moved; the cache now holds the new record.
    OpponentMoved { revision: u64, via: Delivery },
    /// The canonical record changed for another reason (cosmetic pick,
    /// reset, our own write echoed back from another device).
    Refreshed { revision: u64, via: Delivery },
}

/// One game widget instance for one viewer of one pairing.
///
/// The per-session cache is created here and dropped with the widget;
/// nothing is shared between widget instances except the store and the
/// notification channel they coordinate through.
#[derive(Debug)]
pub struct GameWidget<S: SessionStore, N: ChangeNotifier> {
    viewer: PlayerRole,
    controller: OptimisticController<S>,
    propagator: ChangePropagator,
    notifier: N,
}

impl<S: SessionStore, N: ChangeNotifier> GameWidget<S, N> {
    pub fn new(key: SessionKey, viewer: PlayerRole, store: S, notifier: N) -> Self {
        Self {
            viewer,
            controller: OptimisticController::new(key, store),
            propagator: ChangePropagator::new(),
            notifier,
        }
    }

    /// Same as [`new`], with a custom polling fallback interval.
    ///
    /// [`new`]: GameWidget::new
    pub fn with_poll_interval(
        key: SessionKey,
        viewer: PlayerRole,
        store: S,
        notifier: N,
        poll_interval: std::time::Duration,
    ) -> Self {
        Self {
            viewer,
            controller: OptimisticController::new(key, store),
            propagator: ChangePropagator::with_poll_interval(poll_interval),
            notifier,
        }
    }

    pub fn key(&self) -> &SessionKey {
        self.controller.key()
    }

    pub fn viewer(&self) -> PlayerRole {
        self.viewer
    }

    /// The session as the UI should render it right now, if one exists.
    pub fn current(&self) -> Option<&GameSession> {
        self.controller.current()
    }

    /// Whether the cached state may be stale (a write or read failed).
    pub fn is_provisional(&self) -> bool {
        self.controller.cache().is_provisional()
    }

    /// Render snapshot mirrored for this viewer.
    pub fn render(&self) -> Option<serde_json::Value> {
        self.current().map(|s| s.render_for(self.viewer))
    }

    /// Lazy session creation on the start/play action.
    ///
    /// Adopts the live session if one already exists for the key; else
    /// creates one with a random first turn. Losing a creation race to
    /// the other participant adopts their record instead.
    pub fn start_game(
        &mut self,
        kind: GameKind,
        now: DateTime<Utc>,
    ) -> Result<&GameSession, SubmitError> {
        let first_turn = if rand::thread_rng().gen_bool(0.5) {
            PlayerRole::One
        } else {
            PlayerRole::Two
        };
        self.start_game_with_first(kind, first_turn, now)
    }

    /// [`start_game`] with an explicit first turn, for deterministic hosts
    /// and tests. The explicit turn only applies when this call actually
    /// creates the session.
    ///
    /// [`start_game`]: GameWidget::start_game
    pub fn start_game_with_first(
        &mut self,
        kind: GameKind,
        first_turn: PlayerRole,
        now: DateTime<Utc>,
    ) -> Result<&GameSession, SubmitError> {
        if self.controller.current().is_none() {
            self.controller
                .refresh()
                .map_err(|e| SubmitError::Transport(e.to_string()))?;
        }
        if self.controller.current().is_none() {
            let session = GameSession::new(kind, first_turn, PerRole::default(), now);
            match self.controller.submit_replacement(session) {
                Ok(()) => {}
                Err(SubmitError::StaleWrite { canonical }) => {
                    // Lost the creation race; the other side's session is
                    // the live one.
                    debug!(key = %self.controller.key(), "adopting session from creation race");
                    self.controller.absorb_remote(*canonical);
                }
                Err(e) => return Err(e),
            }
        }
        self.controller.current().ok_or(SubmitError::NoSession)
    }

    /// Submit a move by this viewer.
    pub fn submit_move(
        &mut self,
        target: MoveTarget,
        now: DateTime<Utc>,
    ) -> Result<MoveOutcome, SubmitError> {
        self.controller.submit_move(self.viewer, target, now)
    }

    /// Set this viewer's cosmetic choice.
    pub fn set_cosmetic(&mut self, choice: impl Into<String>) -> Result<(), SubmitError> {
        self.controller.submit_cosmetic(self.viewer, choice.into())
    }

    /// Replace a finished session with a fresh instance ("play again").
    pub fn reset_game(&mut self, now: DateTime<Utc>) -> Result<(), SubmitError> {
        let current = self
            .controller
            .cache()
            .confirmed()
            .ok_or(SubmitError::NoSession)?;
        let next = current.reset(now).map_err(SubmitError::Rejected)?;
        self.controller.submit_replacement(next)
    }

    /// The detailed view opened: attach the push subscription.
    pub fn open_view(&mut self) {
        let subscription = self.notifier.subscribe(self.controller.key());
        self.propagator.attach(subscription);
    }

    /// The detailed view closed: deterministically drop the subscription.
    pub fn close_view(&mut self) {
        self.propagator.detach();
    }

    pub fn view_open(&self) -> bool {
        self.propagator.is_attached()
    }

    /// One tick of the single-threaded event loop.
    ///
    /// Drains pushed records, runs the polling fallback when its interval
    /// elapses, absorbs whatever is newer than the cache, and returns the
    /// signals the UI should react to.
    pub fn pump(&mut self, now: Instant) -> Vec<WidgetEvent> {
        let mut events = Vec::new();

        for replaced in self.propagator.drain() {
            self.absorb_into(replaced.session, Delivery::Push, &mut events);
        }

        if self.propagator.poll_due(now) {
            match self.controller.refresh() {
                Ok(true) => {
                    if let Some(session) = self.controller.current() {
                        events.push(classify(session, self.viewer, Delivery::Poll));
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    // Cache stays provisional; the next poll retries.
                    warn!(key = %self.controller.key(), error = %e, "polling fallback failed");
                }
            }
        }

        events
    }

    fn absorb_into(
        &mut self,
        session: GameSession,
        via: Delivery,
        events: &mut Vec<WidgetEvent>,
    ) {
        let event = classify(&session, self.viewer, via);
        if self.controller.absorb_remote(session) {
            events.push(event);
        }
    }
}

/// Decide what an adopted record means for this viewer.
fn classify(session: &GameSession, viewer: PlayerRole, via: Delivery) -> WidgetEvent {
    let revision = session.revision;
    match session.log.last() {
        Some(last) if last.role != viewer => WidgetEvent::OpponentMoved { revision, via },
        _ => WidgetEvent::Refreshed { revision, via },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::rules::Coord;
    use crate::game::session::{SessionError, SessionStatus};
    use crate::sync::propagator::ChangeHub;
    use crate::sync::store::MemoryStore;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const POLL: Duration = Duration::from_secs(5);

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn key() -> SessionKey {
        SessionKey::new("pair-1", "widget-games")
    }

    /// Two facades for the two participants, coordinating only through a
    /// shared store and hub.
    fn pair() -> (
        GameWidget<MemoryStore, ChangeHub>,
        GameWidget<MemoryStore, ChangeHub>,
        MemoryStore,
        ChangeHub,
    ) {
        let hub = ChangeHub::new();
        let store = MemoryStore::with_hub(hub.clone());
        let one = GameWidget::with_poll_interval(
            key(),
            PlayerRole::One,
            store.clone(),
            hub.clone(),
            POLL,
        );
        let two = GameWidget::with_poll_interval(
            key(),
            PlayerRole::Two,
            store.clone(),
            hub.clone(),
            POLL,
        );
        (one, two, store, hub)
    }

    /// Start a session and complete cosmetic setup on both sides.
    fn started_pair(
        kind: GameKind,
    ) -> (
        GameWidget<MemoryStore, ChangeHub>,
        GameWidget<MemoryStore, ChangeHub>,
        MemoryStore,
        ChangeHub,
    ) {
        let (mut one, mut two, store, hub) = pair();
        one.open_view();
        two.open_view();

        one.start_game_with_first(kind, PlayerRole::One, now())
            .unwrap();
        two.start_game_with_first(kind, PlayerRole::Two, now())
            .unwrap();

        one.set_cosmetic("sun").unwrap();
        two.pump(Instant::now());
        two.set_cosmetic("moon").unwrap();
        one.pump(Instant::now());

        (one, two, store, hub)
    }

    #[test]
    fn test_lazy_start_adopts_existing_session() {
        let (mut one, mut two, _store, _hub) = pair();

        let created = one
            .start_game_with_first(GameKind::DropFour, PlayerRole::Two, now())
            .unwrap()
            .clone();
        // The second starter adopts, never replaces
        let adopted = two
            .start_game_with_first(GameKind::DropFour, PlayerRole::One, now())
            .unwrap();

        assert_eq!(*adopted, created);
        assert_eq!(adopted.first_turn, PlayerRole::Two);
        assert_eq!(adopted.status, SessionStatus::AwaitingSetup);
    }

    #[test]
    fn test_setup_flow_reaches_active() {
        let (one, two, _store, _hub) = started_pair(GameKind::VanishThree);

        assert_eq!(one.current().unwrap().status, SessionStatus::Active);
        assert_eq!(two.current().unwrap().status, SessionStatus::Active);
        assert_eq!(one.current(), two.current());
    }

    #[test]
    fn test_move_propagates_by_push() {
        let (mut one, mut two, _store, _hub) = started_pair(GameKind::DropFour);
        let revision = one.current().unwrap().revision;

        one.submit_move(MoveTarget::Column(3), now()).unwrap();

        let events = two.pump(Instant::now());
        assert_eq!(
            events,
            vec![WidgetEvent::OpponentMoved {
                revision: revision + 1,
                via: Delivery::Push,
            }]
        );
        assert_eq!(one.current(), two.current());
        assert_eq!(
            two.current().unwrap().board.cell(Coord::new(5, 3)),
            Some(PlayerRole::One)
        );
    }

    #[test]
    fn test_move_propagates_by_poll_when_push_dropped() {
        let (mut one, mut two, _store, _hub) = started_pair(GameKind::DropFour);
        // Two's push channel silently goes away
        two.close_view();

        one.submit_move(MoveTarget::Column(0), now()).unwrap();

        // Before the poll interval elapses nothing arrives
        assert!(two.pump(Instant::now()).is_empty());

        let events = two.pump(Instant::now() + POLL);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            WidgetEvent::OpponentMoved {
                via: Delivery::Poll,
                ..
            }
        ));
        assert_eq!(one.current(), two.current());
    }

    #[test]
    fn test_out_of_turn_rejected_locally() {
        let (_one, mut two, store, _hub) = started_pair(GameKind::DropFour);
        let before = two.current().unwrap().clone();

        let result = two.submit_move(MoveTarget::Column(0), now());
        assert_eq!(
            result,
            Err(SubmitError::Rejected(SessionError::NotYourTurn))
        );
        assert_eq!(two.current(), Some(&before));
        assert_eq!(store.load(&key()).unwrap().unwrap().revision, before.revision);
    }

    #[test]
    fn test_concurrent_submit_stale_side_loses_either_order() {
        // Two devices of the same viewer race; run both arrival orders.
        for swap in [false, true] {
            let hub = ChangeHub::new();
            let store = MemoryStore::with_hub(hub.clone());
            let mut device_a = GameWidget::with_poll_interval(
                key(),
                PlayerRole::One,
                store.clone(),
                hub.clone(),
                POLL,
            );
            let mut device_b = GameWidget::with_poll_interval(
                key(),
                PlayerRole::One,
                store.clone(),
                hub.clone(),
                POLL,
            );

            let session = GameSession::new(
                GameKind::DropFour,
                PlayerRole::One,
                PerRole::new(Some("sun".to_string()), Some("moon".to_string())),
                now(),
            );
            store.upsert(&key(), session).unwrap();
            device_a.start_game_with_first(GameKind::DropFour, PlayerRole::One, now())
                .unwrap();
            device_b.start_game_with_first(GameKind::DropFour, PlayerRole::One, now())
                .unwrap();

            let (first, second) = if swap {
                (&mut device_b, &mut device_a)
            } else {
                (&mut device_a, &mut device_b)
            };

            // Both predictions were computed against the same confirmed
            // state; whichever write lands second is rejected.
            let snapshot = second.current().unwrap().clone();
            first.submit_move(MoveTarget::Column(0), now()).unwrap();
            let result = second.submit_move(MoveTarget::Column(1), now());
            assert!(matches!(result, Err(SubmitError::StaleWrite { .. })));
            // Exact rollback on the loser
            assert_eq!(second.current(), Some(&snapshot));

            // The loser converges on the next poll
            second.pump(Instant::now() + POLL);
            assert_eq!(second.current(), first.current());
        }
    }

    #[test]
    fn test_transport_failure_is_provisional_until_poll_heals() {
        let (mut one, _two, store, _hub) = started_pair(GameKind::DropFour);
        let before = one.current().unwrap().clone();

        store.fail_next_call();
        let result = one.submit_move(MoveTarget::Column(2), now());
        assert!(matches!(result, Err(SubmitError::Transport(_))));
        assert_eq!(one.current(), Some(&before));
        assert!(one.is_provisional());

        one.pump(Instant::now() + POLL);
        assert!(!one.is_provisional());
    }

    #[test]
    fn test_win_then_reset_round_trip() {
        let (mut one, mut two, _store, _hub) = started_pair(GameKind::VanishThree);

        // One takes the top row; Two answers on the bottom row
        for (cell_one, cell_two) in [(0, 6), (1, 7)] {
            one.submit_move(MoveTarget::Cell(cell_one), now()).unwrap();
            two.pump(Instant::now());
            two.submit_move(MoveTarget::Cell(cell_two), now()).unwrap();
            one.pump(Instant::now());
        }
        let outcome = one.submit_move(MoveTarget::Cell(2), now()).unwrap();
        assert_eq!(outcome.status, SessionStatus::Won);
        two.pump(Instant::now());
        assert_eq!(two.current().unwrap().winner, Some(PlayerRole::One));

        // Loser resets; cosmetics carry, loser opens the next game
        two.reset_game(now()).unwrap();
        one.pump(Instant::now());
        let fresh = one.current().unwrap();
        assert_eq!(fresh.status, SessionStatus::Active);
        assert_eq!(fresh.current_turn, PlayerRole::Two);
        assert_eq!(
            fresh.cosmetics,
            PerRole::new(Some("sun".to_string()), Some("moon".to_string()))
        );
        assert!(fresh.log.is_empty());
    }

    #[test]
    fn test_view_lifecycle_releases_subscription() {
        let (mut one, _two, _store, hub) = pair();

        one.open_view();
        assert!(one.view_open());
        // One subscription for this facade (the other facade never opened)
        assert_eq!(hub.subscriber_count(&key()), 1);

        one.close_view();
        assert!(!one.view_open());
        assert_eq!(hub.subscriber_count(&key()), 0);
    }

    #[test]
    fn test_own_echo_produces_no_event() {
        let (mut one, _two, _store, _hub) = started_pair(GameKind::DropFour);

        one.submit_move(MoveTarget::Column(4), now()).unwrap();
        // The hub echoed our own committed write back to us; it is not
        // newer than the cache, so no event fires.
        assert!(one.pump(Instant::now()).is_empty());
    }

    #[test]
    fn test_resolve_role() {
        let members = PerRole::new("user-a".to_string(), "user-b".to_string());
        assert_eq!(resolve_role(&members, "user-a"), Some(PlayerRole::One));
        assert_eq!(resolve_role(&members, "user-b"), Some(PlayerRole::Two));
        assert_eq!(resolve_role(&members, "user-c"), None);
    }

    #[test]
    fn test_render_requires_session() {
        let (one, _two, _store, _hub) = pair();
        assert!(one.render().is_none());
    }

    #[test]
    fn test_render_mirrors_viewer() {
        let (one, two, _store, _hub) = started_pair(GameKind::DropFour);

        let for_one = one.render().unwrap();
        let for_two = two.render().unwrap();
        assert_eq!(for_one["your_turn"], serde_json::json!(true));
        assert_eq!(for_two["your_turn"], serde_json::json!(false));
        assert_eq!(for_one["board"], for_two["board"]);
    }
}

//! Optimistic session cache and mutation controller.
//!
//! Every mutation is applied twice: once against the local cache for
//! zero-latency feedback (pre-validated through the session API), and
//! once authoritatively against the canonical store, which independently
//! revalidates revision and turn ownership. A failed durable write rolls
//! the cache back to the exact pre-move confirmed state; no partial or
//! merged state is ever visible.

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::game::rules::{MoveTarget, PlayerRole};
use crate::game::session::{GameSession, MoveOutcome, SessionError};
use crate::sync::store::{SessionKey, SessionStore, StoreError};

/// Submit failure taxonomy. Nothing here is fatal; the worst case is a
/// temporarily stale cache that self-heals on the next successful read or
/// push.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitError {
    /// No confirmed session exists yet for this key.
    NoSession,
    /// Rejected locally before any mutation (illegal move, out-of-turn).
    Rejected(SessionError),
    /// The store rejected the prediction: the canonical turn had already
    /// advanced. The cache was rolled back; `canonical` is the truth.
    StaleWrite { canonical: Box<GameSession> },
    /// The store could not be reached; the cache was rolled back and is
    /// provisional until the next successful read.
    Transport(String),
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSession => write!(f, "No game session exists yet"),
            Self::Rejected(e) => write!(f, "{}", e),
            Self::StaleWrite { canonical } => write!(
                f,
                "Move lost the race; canonical game is at revision {}",
                canonical.revision
            ),
            Self::Transport(reason) => write!(f, "Could not reach the game store: {}", reason),
        }
    }
}

impl std::error::Error for SubmitError {}

impl From<SessionError> for SubmitError {
    fn from(e: SessionError) -> Self {
        Self::Rejected(e)
    }
}

/// Explicit per-session cache.
///
/// Created at facade construction, discarded at teardown; never shared
/// between sessions. `confirmed` is the last canonical record;
/// `speculative` holds the prediction while a durable write is in flight.
/// Because the confirmed record is never touched by a prediction,
/// rollback is exact by construction: dropping the speculative record
/// restores the pre-move snapshot.
#[derive(Debug, Default)]
pub struct SessionCache {
    confirmed: Option<GameSession>,
    speculative: Option<GameSession>,
    provisional: bool,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// What the UI should render right now: the in-flight prediction if
    /// one exists, else the last confirmed record.
    pub fn current(&self) -> Option<&GameSession> {
        self.speculative.as_ref().or(self.confirmed.as_ref())
    }

    /// The last confirmed canonical record.
    pub fn confirmed(&self) -> Option<&GameSession> {
        self.confirmed.as_ref()
    }

    /// Whether the cache should be treated as possibly stale (a write or
    /// read failed since the last confirmed state).
    pub fn is_provisional(&self) -> bool {
        self.provisional
    }

    /// Adopt an authoritative record delivered by push or poll.
    ///
    /// Records at or below the confirmed revision are stale and dropped.
    /// Returns whether the record was adopted. Either way this was a
    /// successful authoritative read, so the provisional flag clears.
    pub fn absorb(&mut self, session: GameSession) -> bool {
        self.provisional = false;
        if let Some(current) = &self.confirmed {
            if session.revision <= current.revision {
                debug!(
                    offered = session.revision,
                    confirmed = current.revision,
                    "stale canonical record dropped"
                );
                return false;
            }
        }
        self.confirmed = Some(session);
        true
    }

    fn predict(&mut self, predicted: GameSession) {
        self.speculative = Some(predicted);
    }

    fn commit(&mut self, canonical: GameSession) {
        self.speculative = None;
        self.confirmed = Some(canonical);
        self.provisional = false;
    }

    fn rollback(&mut self) {
        self.speculative = None;
    }

    fn mark_provisional(&mut self) {
        self.provisional = true;
    }
}

/// Optimistic mutation controller for one session key.
///
/// Owns the per-session cache and the store handle. `submit_*` methods
/// follow the command pattern: compute a prediction, swap the cache to
/// it, issue the durable write, then either commit the server-confirmed
/// record or replay the inverse (restore the snapshot).
#[derive(Debug)]
pub struct OptimisticController<S: SessionStore> {
    key: SessionKey,
    store: S,
    cache: SessionCache,
}

impl<S: SessionStore> OptimisticController<S> {
    pub fn new(key: SessionKey, store: S) -> Self {
        Self {
            key,
            store,
            cache: SessionCache::new(),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    /// What the UI should render right now.
    pub fn current(&self) -> Option<&GameSession> {
        self.cache.current()
    }

    /// Submit a move for `role`.
    pub fn submit_move(
        &mut self,
        role: PlayerRole,
        target: MoveTarget,
        now: DateTime<Utc>,
    ) -> Result<MoveOutcome, SubmitError> {
        let confirmed = self.cache.confirmed().ok_or(SubmitError::NoSession)?;
        let mut predicted = confirmed.clone();
        // Local pre-validation: a rejection here mutates nothing anywhere.
        let outcome = predicted
            .apply_move(role, target, now)
            .map_err(SubmitError::Rejected)?;
        self.commit_prediction(predicted)?;
        Ok(outcome)
    }

    /// Submit a cosmetic choice for `role`.
    pub fn submit_cosmetic(
        &mut self,
        role: PlayerRole,
        choice: String,
    ) -> Result<(), SubmitError> {
        let confirmed = self.cache.confirmed().ok_or(SubmitError::NoSession)?;
        let mut predicted = confirmed.clone();
        predicted
            .set_cosmetic(role, choice)
            .map_err(SubmitError::Rejected)?;
        self.commit_prediction(predicted)
    }

    /// Submit a wholesale replacement record: lazy session creation and
    /// the "play again" reset both go through here.
    pub fn submit_replacement(&mut self, session: GameSession) -> Result<(), SubmitError> {
        self.commit_prediction(session)
    }

    /// Adopt an authoritative record delivered by push or poll.
    pub fn absorb_remote(&mut self, session: GameSession) -> bool {
        self.cache.absorb(session)
    }

    /// Polling-fallback read: load the canonical record and absorb it.
    /// Returns whether a newer record was adopted.
    pub fn refresh(&mut self) -> Result<bool, StoreError> {
        match self.store.load(&self.key)? {
            Some(session) => Ok(self.cache.absorb(session)),
            None => Ok(false),
        }
    }

    fn commit_prediction(&mut self, predicted: GameSession) -> Result<(), SubmitError> {
        self.cache.predict(predicted.clone());
        match self.store.upsert(&self.key, predicted) {
            Ok(canonical) => {
                self.cache.commit(canonical);
                Ok(())
            }
            Err(StoreError::Conflict { canonical }) => {
                warn!(key = %self.key, "optimistic write lost the race, rolling back");
                self.cache.rollback();
                Err(SubmitError::StaleWrite { canonical })
            }
            Err(StoreError::Transport(reason)) => {
                warn!(key = %self.key, %reason, "durable write failed, rolling back");
                self.cache.rollback();
                self.cache.mark_provisional();
                Err(SubmitError::Transport(reason))
            }
        }
    }
}

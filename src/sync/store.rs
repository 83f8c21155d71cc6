//! Canonical session store.
//!
//! The persistence collaborator behind the optimistic layer: one keyed
//! record per (pair, widget), read and written wholesale. The store is the
//! single source of truth and the sole unit of mutual exclusion — no
//! client ever holds a lock; a conflicting write is rejected by the
//! store's single-key compare-and-swap on the record revision.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::game::session::{GameSession, SessionStatus};
use crate::sync::propagator::ChangeHub;

/// Identifies one widget's session within one pairing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub pair_id: String,
    pub widget_id: String,
}

impl SessionKey {
    pub fn new(pair_id: impl Into<String>, widget_id: impl Into<String>) -> Self {
        Self {
            pair_id: pair_id.into(),
            widget_id: widget_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pair_id, self.widget_id)
    }
}

/// Store errors.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The write lost the race: the canonical record already moved on.
    /// Carries the canonical state so the caller can converge.
    Conflict { canonical: Box<GameSession> },
    /// The store could not be reached.
    Transport(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict { canonical } => write!(
                f,
                "Write rejected; canonical record is at revision {}",
                canonical.revision
            ),
            Self::Transport(reason) => write!(f, "Store unreachable: {}", reason),
        }
    }
}

impl std::error::Error for StoreError {}

/// The keyed-store seam.
///
/// Records go in and out whole; there is no field-level patching.
pub trait SessionStore {
    /// Read the current canonical record, if one exists.
    fn load(&self, key: &SessionKey) -> Result<Option<GameSession>, StoreError>;

    /// Atomically replace the record for `key`.
    ///
    /// Accepted iff `session.revision` is exactly one past the stored
    /// revision (any revision is accepted when no record exists). Returns
    /// the committed canonical record.
    fn upsert(&self, key: &SessionKey, session: GameSession)
        -> Result<GameSession, StoreError>;
}

/// In-memory canonical store.
///
/// Cloneable; clones share one record map, so two participants' facades
/// coordinate through the same canonical state the way two remote
/// sessions coordinate through the real backend. Successful upserts are
/// published to the attached [`ChangeHub`], if any.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<HashMap<SessionKey, GameSession>>>,
    hub: Option<ChangeHub>,
    fail_flag: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that publishes committed records to `hub`.
    pub fn with_hub(hub: ChangeHub) -> Self {
        Self {
            hub: Some(hub),
            ..Self::default()
        }
    }

    /// Make the next store call fail with a transport error.
    pub fn fail_next_call(&self) {
        self.fail_flag.store(true, Ordering::SeqCst);
    }

    fn take_failure(&self) -> Result<(), StoreError> {
        if self.fail_flag.swap(false, Ordering::SeqCst) {
            Err(StoreError::Transport("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }
}

impl SessionStore for MemoryStore {
    fn load(&self, key: &SessionKey) -> Result<Option<GameSession>, StoreError> {
        self.take_failure()?;
        let records = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(key).cloned())
    }

    fn upsert(
        &self,
        key: &SessionKey,
        session: GameSession,
    ) -> Result<GameSession, StoreError> {
        self.take_failure()?;
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(current) = records.get(key) {
            // Single-key compare-and-swap: whichever of two concurrent
            // writers arrives second no longer matches and is rejected,
            // regardless of network order.
            if session.revision != current.revision + 1 {
                debug!(
                    key = %key,
                    stored = current.revision,
                    offered = session.revision,
                    "upsert rejected by revision check"
                );
                return Err(StoreError::Conflict {
                    canonical: Box::new(current.clone()),
                });
            }
            // Server-side turn revalidation for appended moves.
            if session.log.len() == current.log.len() + 1 {
                let holds_turn = session
                    .log
                    .last()
                    .map(|m| {
                        current.status == SessionStatus::Active
                            && m.role == current.current_turn
                    })
                    .unwrap_or(false);
                if !holds_turn {
                    debug!(key = %key, "upsert rejected by turn revalidation");
                    return Err(StoreError::Conflict {
                        canonical: Box::new(current.clone()),
                    });
                }
            }
        }

        records.insert(key.clone(), session.clone());
        drop(records);

        if let Some(hub) = &self.hub {
            hub.publish(key, &session);
        }
        Ok(session)
    }
}

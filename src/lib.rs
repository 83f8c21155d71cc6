//! Pairboard Games
//!
//! This crate provides the turn-based two-player game subsystem of the
//! Pairboard paired dashboards: the drop-style four-in-a-row widget and
//! the piece-limited vanishing three-in-a-row widget.
//!
//! # Overview
//!
//! - **Rule Engine** (`game::rules`) - pure, per-geometry move legality,
//!   application, and win/draw detection over a tagged board union.
//!
//! - **Session Lifecycle** (`game::session`) - the wholesale
//!   [`GameSession`] record with its turn/lifecycle state machine:
//!   `awaiting_setup -> active -> won | draw`, reset producing a fresh
//!   instance with cosmetics carried forward and the loser moving first.
//!
//! - **Optimistic Sync** (`sync`) - a per-session cache giving the
//!   submitter zero-latency feedback with exact rollback on conflict, a
//!   compare-and-swap canonical store seam, and a change propagator that
//!   pushes authoritative state to the other participant with a polling
//!   fallback.
//!
//! - **Facade** (`sync::facade`) - one [`GameWidget`] per
//!   (pair, widget) key and viewer; the only surface the UI talks to.
//!
//! # Design Principles
//!
//! 1. **The store is the single source of truth** - clients never hold
//!    locks; a conflicting write is rejected by the store's single-key
//!    compare-and-swap and rolled back locally.
//!
//! 2. **Rejections are values, not faults** - illegal moves, lost races,
//!    and transport failures are all recoverable `Result` errors; the
//!    visible board is never corrupted.
//!
//! 3. **No networking** - this crate is pure state. The real backend and
//!    push channel plug in behind the [`SessionStore`] and
//!    [`ChangeNotifier`] seams; [`MemoryStore`] and [`ChangeHub`] serve
//!    tests and single-process embedding.
//!
//! # Example
//!
//! ```rust
//! use std::time::Instant;
//!
//! use pairboard_games::{
//!     ChangeHub, GameKind, GameWidget, MemoryStore, MoveTarget, PlayerRole,
//!     SessionKey, SessionStatus,
//! };
//!
//! let hub = ChangeHub::new();
//! let store = MemoryStore::with_hub(hub.clone());
//! let key = SessionKey::new("pair-7", "widget-games");
//!
//! // One facade per participant; they share only the store and the hub.
//! let mut ours = GameWidget::new(key.clone(), PlayerRole::One, store.clone(), hub.clone());
//! let mut theirs = GameWidget::new(key, PlayerRole::Two, store, hub);
//! ours.open_view();
//! theirs.open_view();
//!
//! let now = chrono::Utc::now();
//! ours.start_game_with_first(GameKind::DropFour, PlayerRole::One, now).unwrap();
//! theirs.start_game(GameKind::DropFour, now).unwrap(); // adopts the live session
//!
//! ours.set_cosmetic("sun").unwrap();
//! theirs.pump(Instant::now());
//! theirs.set_cosmetic("moon").unwrap();
//! ours.pump(Instant::now());
//! assert_eq!(ours.current().unwrap().status, SessionStatus::Active);
//!
//! // Our move is visible immediately; the partner hears about it on pump.
//! ours.submit_move(MoveTarget::Column(3), chrono::Utc::now()).unwrap();
//! let events = theirs.pump(Instant::now());
//! assert_eq!(events.len(), 1);
//! ```

pub mod game;
pub mod sync;

// Re-export everything at the crate root
pub use game::*;
pub use sync::*;

//! Session synchronization between the two participants.
//!
//! The two sides of a pairing share no memory; every coordination step
//! goes through the canonical store and its change-notification channel.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      GameWidget (facade)                         │
//! │   submit_move / reset_game / set_cosmetic        render / pump   │
//! │                                                                  │
//! │  ┌────────────────────────┐      ┌───────────────────────────┐   │
//! │  │  OptimisticController  │      │     ChangePropagator      │   │
//! │  │                        │      │                           │   │
//! │  │  SessionCache          │      │  Subscription (push)      │   │
//! │  │   confirmed ──────────────────▶  polling clock (fallback) │   │
//! │  │   speculative          │      │                           │   │
//! │  └───────────┬────────────┘      └─────────────▲─────────────┘   │
//! └──────────────┼─────────────────────────────────┼─────────────────┘
//!                │ upsert (CAS, whole record)      │ publish
//!                ▼                                 │
//!        ┌───────────────┐                 ┌───────────────┐
//!        │ SessionStore  │────────────────▶│   ChangeHub   │
//!        │ (canonical)   │  on commit      │ (push channel)│
//!        └───────────────┘                 └───────────────┘
//! ```
//!
//! The store is the single source of truth. A submitter gets
//! read-your-writes through the optimistic cache; the counterpart gets
//! push-or-poll eventual consistency within the subscription/polling
//! interval. Conflicting writes are rejected by the store's single-key
//! compare-and-swap, never by a client-side lock.

pub mod cache;
pub mod facade;
pub mod propagator;
pub mod store;

// Re-export commonly used types
pub use cache::{OptimisticController, SessionCache, SubmitError};
pub use facade::{resolve_role, GameWidget, WidgetEvent};
pub use propagator::{
    ChangeHub, ChangeNotifier, ChangePropagator, Delivery, StateReplaced, Subscription,
    DEFAULT_POLL_INTERVAL,
};
pub use store::{MemoryStore, SessionKey, SessionStore, StoreError};

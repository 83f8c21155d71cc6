//! Realtime change propagation.
//!
//! Delivers authoritative post-move records to the other participant
//! without per-frame polling: a keyed push subscription while the detailed
//! view is open, plus a continuously running seconds-scale polling clock
//! as the eventual-consistency fallback when the push channel silently
//! drops. Subscriptions are cancellable handles that deterministically
//! deregister on drop, so closing a view never leaks a listener.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::game::session::GameSession;
use crate::sync::store::SessionKey;

/// Default polling fallback interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// How an authoritative record reached this side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Pushed over the subscription channel.
    Push,
    /// Fetched by the polling fallback.
    Poll,
}

/// Typed "state replaced" message emitted by the propagator.
#[derive(Debug, Clone, PartialEq)]
pub struct StateReplaced {
    pub session: GameSession,
    pub via: Delivery,
}

/// The change-notification seam: subscribe to a key, get a stream of
/// canonical records.
pub trait ChangeNotifier {
    fn subscribe(&self, key: &SessionKey) -> Subscription;
}

type SubscriberMap = HashMap<SessionKey, Vec<(u64, Sender<GameSession>)>>;

/// In-memory push channel.
///
/// Cloneable; clones share the subscriber table. [`publish`] fans a
/// committed record out to every live subscription on its key, pruning
/// receivers that have gone away.
///
/// [`publish`]: ChangeHub::publish
#[derive(Debug, Clone, Default)]
pub struct ChangeHub {
    subscribers: Arc<Mutex<SubscriberMap>>,
    next_id: Arc<AtomicU64>,
}

impl ChangeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an authoritative record to every subscriber of `key`.
    pub fn publish(&self, key: &SessionKey, session: &GameSession) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = subscribers.get_mut(key) {
            list.retain(|(_, tx)| tx.send(session.clone()).is_ok());
            if list.is_empty() {
                subscribers.remove(key);
            }
        }
    }

    /// Live subscription count for a key.
    pub fn subscriber_count(&self, key: &SessionKey) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|list| list.len())
            .unwrap_or(0)
    }
}

impl ChangeNotifier for ChangeHub {
    fn subscribe(&self, key: &SessionKey) -> Subscription {
        let (tx, rx) = mpsc::channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .push((id, tx));
        Subscription {
            key: key.clone(),
            id,
            rx,
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

/// Cancellable handle for one key-scoped subscription.
///
/// Dropping the handle (or calling [`cancel`]) removes the sender from the
/// hub, so teardown is deterministic.
///
/// [`cancel`]: Subscription::cancel
#[derive(Debug)]
pub struct Subscription {
    key: SessionKey,
    id: u64,
    rx: Receiver<GameSession>,
    subscribers: Arc<Mutex<SubscriberMap>>,
}

impl Subscription {
    /// Non-blocking read of the next pushed record.
    pub fn try_next(&self) -> Option<GameSession> {
        match self.rx.try_recv() {
            Ok(session) => Some(session),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Explicitly tear the subscription down.
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = subscribers.get_mut(&self.key) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() {
                subscribers.remove(&self.key);
            }
        }
    }
}

/// Per-facade propagation state: the optional push subscription and the
/// polling fallback clock.
#[derive(Debug)]
pub struct ChangePropagator {
    subscription: Option<Subscription>,
    poll_interval: Duration,
    last_poll: Instant,
}

impl ChangePropagator {
    pub fn new() -> Self {
        Self::with_poll_interval(DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            subscription: None,
            poll_interval,
            last_poll: Instant::now(),
        }
    }

    /// Attach a push subscription (the detailed view opened). Replaces and
    /// thereby cancels any previous one.
    pub fn attach(&mut self, subscription: Subscription) {
        self.subscription = Some(subscription);
    }

    /// Drop the push subscription (the detailed view closed).
    pub fn detach(&mut self) {
        if self.subscription.take().is_some() {
            debug!("push subscription detached");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.subscription.is_some()
    }

    /// Drain all pushed records, in arrival order.
    pub fn drain(&mut self) -> Vec<StateReplaced> {
        let mut replaced = Vec::new();
        if let Some(subscription) = &self.subscription {
            while let Some(session) = subscription.try_next() {
                replaced.push(StateReplaced {
                    session,
                    via: Delivery::Push,
                });
            }
        }
        replaced
    }

    /// Check the polling clock, arming the next interval when due.
    ///
    /// The fallback runs whether or not a subscription is attached; it is
    /// what guarantees eventual consistency for preview renderings and for
    /// a silently dropped push channel.
    pub fn poll_due(&mut self, now: Instant) -> bool {
        if now.duration_since(self.last_poll) >= self.poll_interval {
            self.last_poll = now;
            true
        } else {
            false
        }
    }
}

impl Default for ChangePropagator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::rules::{GameKind, PerRole, PlayerRole};

    fn key() -> SessionKey {
        SessionKey::new("pair-1", "widget-games")
    }

    fn session(revision: u64) -> GameSession {
        let mut s = GameSession::new(
            GameKind::VanishThree,
            PlayerRole::One,
            PerRole::default(),
            chrono::Utc::now(),
        );
        s.revision = revision;
        s
    }

    #[test]
    fn test_publish_reaches_subscriber() {
        let hub = ChangeHub::new();
        let sub = hub.subscribe(&key());

        hub.publish(&key(), &session(1));
        let received = sub.try_next().unwrap();
        assert_eq!(received.revision, 1);
        assert_eq!(sub.try_next(), None);
    }

    #[test]
    fn test_publish_scoped_to_key() {
        let hub = ChangeHub::new();
        let sub = hub.subscribe(&key());

        hub.publish(&SessionKey::new("pair-2", "widget-games"), &session(1));
        assert_eq!(sub.try_next(), None);
    }

    #[test]
    fn test_drop_deregisters_deterministically() {
        let hub = ChangeHub::new();
        let sub = hub.subscribe(&key());
        assert_eq!(hub.subscriber_count(&key()), 1);

        drop(sub);
        assert_eq!(hub.subscriber_count(&key()), 0);
    }

    #[test]
    fn test_cancel_deregisters() {
        let hub = ChangeHub::new();
        let sub = hub.subscribe(&key());
        sub.cancel();
        assert_eq!(hub.subscriber_count(&key()), 0);
    }

    #[test]
    fn test_propagator_drains_in_order() {
        let hub = ChangeHub::new();
        let mut propagator = ChangePropagator::new();
        propagator.attach(hub.subscribe(&key()));

        hub.publish(&key(), &session(1));
        hub.publish(&key(), &session(2));

        let drained = propagator.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].session.revision, 1);
        assert_eq!(drained[1].session.revision, 2);
        assert!(drained.iter().all(|r| r.via == Delivery::Push));
    }

    #[test]
    fn test_detach_stops_delivery() {
        let hub = ChangeHub::new();
        let mut propagator = ChangePropagator::new();
        propagator.attach(hub.subscribe(&key()));
        propagator.detach();

        assert!(!propagator.is_attached());
        assert_eq!(hub.subscriber_count(&key()), 0);

        hub.publish(&key(), &session(1));
        assert!(propagator.drain().is_empty());
    }

    #[test]
    fn test_poll_clock() {
        let interval = Duration::from_secs(5);
        let mut propagator = ChangePropagator::with_poll_interval(interval);
        let start = Instant::now();

        assert!(!propagator.poll_due(start));
        assert!(propagator.poll_due(start + interval));
        // Re-armed: not due again until another interval passes
        assert!(!propagator.poll_due(start + interval));
        assert!(propagator.poll_due(start + interval * 2));
    }
}

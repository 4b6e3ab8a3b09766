//! Publish/subscribe bus for Helmlink.
//!
//! Any mutation can call [`PubSub::publish`] with a dotted path; every
//! listener registered for that path is notified and the owning session
//! re-runs its subscribed procedure. The bus itself is deliberately dumb:
//! it moves payloads to listeners and nothing else — no batching, no
//! replay, no persistence.
//!
//! # Lifecycle
//!
//! The bus is an explicit, constructor-injected singleton: created once
//! per process, passed around as `Arc<PubSub>`, dropped in tests. It is
//! never reached through an ambient global, so a test can swap in its
//! own instance.
//!
//! # Ordering
//!
//! All listeners for one path are notified in registration order during
//! a single `publish` call. There is no ordering guarantee across
//! distinct paths.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::mpsc;

/// Opaque identifier for one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// One publish, as delivered to a listener.
#[derive(Debug, Clone)]
pub struct PublishEvent {
    /// The dotted path that was published.
    pub path: String,
    /// The publish payload, shared across all listeners of the path.
    pub payload: Arc<Value>,
}

/// A sender a listener registers to receive [`PublishEvent`]s on.
pub type ListenerSender = mpsc::UnboundedSender<PublishEvent>;

struct ListenerEntry {
    id: ListenerId,
    sender: ListenerSender,
}

#[derive(Default)]
struct Inner {
    /// Listeners per path, in registration order.
    listeners: HashMap<String, Vec<ListenerEntry>>,
    /// Reverse index so unsubscribe doesn't scan every path.
    paths_by_id: HashMap<ListenerId, String>,
    next_id: u64,
}

/// The process-wide event bus.
///
/// Interior mutability via a plain `std::sync::Mutex` — `publish` is
/// synchronous on the caller's turn (unbounded channel sends never
/// block), and the lock is never held across an await point.
#[derive(Default)]
pub struct PubSub {
    inner: Mutex<Inner>,
}

impl PubSub {
    /// A fresh, empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `sender` as a listener for `path`.
    ///
    /// Returns the id to later [`unsubscribe`](Self::unsubscribe) with.
    /// Many listeners may share a path; each publish reaches all of
    /// them in the order they subscribed.
    pub fn subscribe(
        &self,
        path: impl Into<String>,
        sender: ListenerSender,
    ) -> ListenerId {
        let path = path.into();
        let mut inner = self.inner.lock().expect("pubsub lock poisoned");
        inner.next_id += 1;
        let id = ListenerId(inner.next_id);
        inner.paths_by_id.insert(id, path.clone());
        inner
            .listeners
            .entry(path.clone())
            .or_default()
            .push(ListenerEntry { id, sender });
        tracing::trace!(%id, %path, "pubsub listener registered");
        id
    }

    /// Removes the listener registered under `id`.
    ///
    /// Unsubscribing an id that was never registered — or was already
    /// removed — is a no-op.
    pub fn unsubscribe(&self, id: ListenerId) {
        let mut inner = self.inner.lock().expect("pubsub lock poisoned");
        let Some(path) = inner.paths_by_id.remove(&id) else {
            return;
        };
        if let Some(entries) = inner.listeners.get_mut(&path) {
            entries.retain(|entry| entry.id != id);
            if entries.is_empty() {
                inner.listeners.remove(&path);
            }
        }
        tracing::trace!(%id, %path, "pubsub listener removed");
    }

    /// Fans `payload` out to every listener registered for `path`.
    ///
    /// Returns the number of listeners notified. Listeners whose
    /// receiving side has been dropped are pruned on the way through.
    pub fn publish(&self, path: &str, payload: Value) -> usize {
        let payload = Arc::new(payload);
        let mut inner = self.inner.lock().expect("pubsub lock poisoned");

        let Some(entries) = inner.listeners.get_mut(path) else {
            return 0;
        };

        let mut dead = Vec::new();
        let mut notified = 0;
        for entry in entries.iter() {
            let event = PublishEvent {
                path: path.to_string(),
                payload: Arc::clone(&payload),
            };
            if entry.sender.send(event).is_ok() {
                notified += 1;
            } else {
                dead.push(entry.id);
            }
        }

        if !dead.is_empty() {
            entries.retain(|entry| !dead.contains(&entry.id));
            if entries.is_empty() {
                inner.listeners.remove(path);
            }
            for id in &dead {
                inner.paths_by_id.remove(id);
            }
            tracing::debug!(
                path,
                pruned = dead.len(),
                "pruned dead pubsub listeners"
            );
        }

        notified
    }

    /// Number of live listeners for `path`.
    pub fn listener_count(&self, path: &str) -> usize {
        self.inner
            .lock()
            .expect("pubsub lock poisoned")
            .listeners
            .get(path)
            .map_or(0, Vec::len)
    }

    /// `true` if no listeners are registered at all. Teardown checks
    /// in tests hang their assertions on this.
    pub fn is_empty(&self) -> bool {
        self.inner
            .lock()
            .expect("pubsub lock poisoned")
            .listeners
            .is_empty()
    }
}

// =========================================================================
// Tests
// =========================================================================

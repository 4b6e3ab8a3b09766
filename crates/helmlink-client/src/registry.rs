//! The subscription registry: client-side dedup and the result cache.
//!
//! The registry is deliberately wire-agnostic — it emits [`ClientFrame`]s
//! into an injected sender and never touches a socket. That keeps the
//! reference-counting logic a plain single-owner struct, testable
//! without any network.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use helmlink_protocol::{
    ClientFrame, ErrorPayload, RequestId, ResponseData,
};
use rand::Rng;
use serde_json::Value;
use tokio::sync::mpsc;

/// Counter for generating unique caller IDs.
static NEXT_CALLER_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for one registered caller (one UI surface).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallerId(u64);

impl CallerId {
    fn next() -> Self {
        Self(NEXT_CALLER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "caller-{}", self.0)
    }
}

/// An update delivered to every caller of a subscription.
#[derive(Debug, Clone)]
pub enum CallerUpdate {
    /// Fresh data, shared across callers.
    Data(Arc<Value>),
    /// A server-side error scoped to this subscription.
    Error(Arc<ErrorPayload>),
}

/// Sender a caller registers to receive [`CallerUpdate`]s on.
pub type CallerSender = mpsc::UnboundedSender<CallerUpdate>;

/// Computes the stable identity of a subscription: the path plus the
/// canonical (recursively key-sorted) JSON of its params.
///
/// Two callers asking for the same path with the same params — however
/// their JSON objects happened to be ordered — get the same key and
/// share one wire subscription.
pub fn subscription_key(path: &str, params: &Value) -> String {
    format!("{path}:{}", canonical_json(params))
}

fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        Value::String(k.clone()),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let fields: Vec<String> =
                items.iter().map(canonical_json).collect();
            format!("[{}]", fields.join(","))
        }
        other => other.to_string(),
    }
}

/// Generates a random 16-character hex request id.
fn generate_request_id() -> RequestId {
    let mut rng = rand::rng();
    let bytes: [u8; 8] = rng.random();
    RequestId(bytes.iter().map(|b| format!("{b:02x}")).collect())
}

/// Which wire channel a registration rides on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChannelKind {
    NetRequest,
    DataStream,
}

struct Entry {
    kind: ChannelKind,
    path: String,
    params: Value,
    wire_id: RequestId,
    callers: HashMap<CallerId, CallerSender>,
}

impl Entry {
    fn open_frame(&self) -> ClientFrame {
        match self.kind {
            ChannelKind::NetRequest => ClientFrame::NetRequest {
                id: self.wire_id.clone(),
                path: self.path.clone(),
                params: self.params.clone(),
            },
            ChannelKind::DataStream => ClientFrame::DataStream {
                id: self.wire_id.clone(),
                path: self.path.clone(),
                params: self.params.clone(),
            },
        }
    }

    fn end_frame(&self) -> ClientFrame {
        match self.kind {
            ChannelKind::NetRequest => ClientFrame::NetRequestEnd {
                id: self.wire_id.clone(),
            },
            ChannelKind::DataStream => ClientFrame::DataStreamEnd {
                id: self.wire_id.clone(),
            },
        }
    }
}

/// Reference-counted map from subscription key to caller set.
///
/// Wire frames are emitted only on count transitions: a `netRequest`/
/// `dataStream` when a key goes 0→1, the matching `*End` when it goes
/// 1→0. Inbound results update the cache and fan out to every caller.
pub struct SubscriptionRegistry {
    wire_tx: mpsc::UnboundedSender<ClientFrame>,
    entries: HashMap<String, Entry>,
    keys_by_wire_id: HashMap<RequestId, String>,
    keys_by_caller: HashMap<CallerId, String>,
    cache: HashMap<String, Arc<Value>>,
}

impl SubscriptionRegistry {
    /// A registry that emits wire frames into `wire_tx`.
    pub fn new(wire_tx: mpsc::UnboundedSender<ClientFrame>) -> Self {
        Self {
            wire_tx,
            entries: HashMap::new(),
            keys_by_wire_id: HashMap::new(),
            keys_by_caller: HashMap::new(),
            cache: HashMap::new(),
        }
    }

    /// Registers a caller for a live query on `path` with `params`.
    ///
    /// If this is the first caller for the `(path, params)` key, a
    /// `netRequest` goes to the wire. Otherwise the caller is attached
    /// to the existing subscription and — when a cached result exists —
    /// immediately receives it, so late-mounting UI paints without a
    /// round trip.
    pub fn register(
        &mut self,
        path: &str,
        params: Value,
        sender: CallerSender,
    ) -> CallerId {
        self.register_kind(ChannelKind::NetRequest, path, params, sender)
    }

    /// Registers a caller for the entity stream on `path`.
    pub fn register_stream(
        &mut self,
        path: &str,
        params: Value,
        sender: CallerSender,
    ) -> CallerId {
        self.register_kind(ChannelKind::DataStream, path, params, sender)
    }

    fn register_kind(
        &mut self,
        kind: ChannelKind,
        path: &str,
        params: Value,
        sender: CallerSender,
    ) -> CallerId {
        let key = subscription_key(path, &params);
        let caller_id = CallerId::next();

        if let Some(entry) = self.entries.get_mut(&key) {
            entry.callers.insert(caller_id, sender.clone());
            self.keys_by_caller.insert(caller_id, key.clone());
            if let Some(cached) = self.cache.get(&key) {
                let _ = sender
                    .send(CallerUpdate::Data(Arc::clone(cached)));
            }
            tracing::debug!(
                %caller_id,
                %key,
                callers = self.entries[&key].callers.len(),
                "caller joined existing subscription"
            );
            return caller_id;
        }

        // 0 → 1: this key goes to the wire.
        let entry = Entry {
            kind,
            path: path.to_string(),
            params,
            wire_id: generate_request_id(),
            callers: HashMap::from([(caller_id, sender)]),
        };
        let _ = self.wire_tx.send(entry.open_frame());
        self.keys_by_wire_id
            .insert(entry.wire_id.clone(), key.clone());
        self.keys_by_caller.insert(caller_id, key.clone());
        tracing::debug!(%caller_id, %key, "subscription opened");
        self.entries.insert(key, entry);
        caller_id
    }

    /// Detaches a caller. When the last caller for a key leaves, the
    /// matching `*End` frame goes to the wire and the cache entry is
    /// dropped. Unregistering an unknown caller is a no-op.
    pub fn unregister(&mut self, caller_id: CallerId) {
        let Some(key) = self.keys_by_caller.remove(&caller_id) else {
            return;
        };
        let Some(entry) = self.entries.get_mut(&key) else {
            return;
        };
        entry.callers.remove(&caller_id);
        if !entry.callers.is_empty() {
            return;
        }

        // 1 → 0: tell the server and forget the key.
        let entry = self.entries.remove(&key).expect("entry exists");
        let _ = self.wire_tx.send(entry.end_frame());
        self.keys_by_wire_id.remove(&entry.wire_id);
        self.cache.remove(&key);
        tracing::debug!(%key, "subscription ended");
    }

    /// Routes one inbound `netRequestData` payload: updates the cache
    /// and notifies every caller registered for the wire id's key.
    pub fn handle_response(&mut self, response: ResponseData) {
        let Some(key) = self.keys_by_wire_id.get(&response.id) else {
            tracing::debug!(
                id = %response.id,
                "response for unknown subscription, dropping"
            );
            return;
        };
        let Some(entry) = self.entries.get(key) else {
            return;
        };

        let update = if let Some(error) = response.error {
            CallerUpdate::Error(Arc::new(error))
        } else {
            let data = Arc::new(response.data.unwrap_or(Value::Null));
            self.cache.insert(key.clone(), Arc::clone(&data));
            CallerUpdate::Data(data)
        };

        for sender in entry.callers.values() {
            let _ = sender.send(update.clone());
        }
    }

    /// Re-emits the open frame for every live subscription, exactly
    /// once each. Called after a reconnect — the server session is
    /// fresh and knows nothing, so the whole registry replays.
    pub fn replay_all(&self) {
        for entry in self.entries.values() {
            let _ = self.wire_tx.send(entry.open_frame());
        }
        tracing::info!(
            subscriptions = self.entries.len(),
            "replayed subscriptions"
        );
    }

    /// Number of live (deduplicated) subscriptions.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of callers attached to a `(path, params)` key.
    pub fn caller_count(&self, path: &str, params: &Value) -> usize {
        self.entries
            .get(&subscription_key(path, params))
            .map_or(0, |e| e.callers.len())
    }

    /// The cached result for a key, if any.
    pub fn cached(&self, path: &str, params: &Value) -> Option<Arc<Value>> {
        self.cache.get(&subscription_key(path, params)).cloned()
    }
}

// =========================================================================
// Tests
// =========================================================================

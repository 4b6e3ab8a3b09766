//! The connection session: per-socket subscription and stream owner.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use helmlink_procedure::{
    CallContext, ProcedureError, ProcedureKind, Resolved, Router,
};
use helmlink_protocol::{
    ClientFrame, EntityState, ErrorPayload, RequestId, ResponseData,
    ServerFrame, Snapshot,
};
use helmlink_pubsub::{ListenerId, PubSub, PublishEvent};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{SessionConfig, SessionError, SessionState};

/// Counter for generating unique session IDs.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocates the next process-unique session id.
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// A frame on its way out of the session, still typed.
///
/// The transport adapter encodes these: control frames as JSON text,
/// snapshots as bincode binary. Keeping the enum typed here means the
/// session never touches bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Control(ServerFrame),
    Snapshot(Snapshot),
}

/// A publish event routed to one specific subscription.
///
/// The session registers one pubsub listener per distinct subscription
/// id; a small forwarder task stamps each event with the owning id so
/// re-evaluation is exact — no fan-out guessing by path.
pub type PublishDelivery = (RequestId, PublishEvent);

/// One outstanding live-query subscription.
struct SubscriptionEntry {
    path: String,
    params: Value,
    listener: ListenerId,
}

/// One registered entity stream.
struct StreamEntry {
    path: String,
    params: Value,
}

/// Per-connection server state: subscriptions, streams, outbound frames.
///
/// Owned exclusively by the connection's handler task. All methods take
/// `&mut self`; there is no interior locking because there is no sharing.
pub struct ConnectionSession {
    id: SessionId,
    state: SessionState,
    config: SessionConfig,
    /// The client context from `clientConnect`, passed to every call.
    ctx: Value,
    router: Router,
    pubsub: Arc<PubSub>,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    /// Cloned into each subscription's forwarder task.
    publish_tx: mpsc::UnboundedSender<PublishDelivery>,
    subscriptions: HashMap<RequestId, SubscriptionEntry>,
    streams: HashMap<RequestId, StreamEntry>,
}

impl ConnectionSession {
    /// Creates a session in the `Idle` state.
    ///
    /// Returns the session and the receiver for publish deliveries —
    /// the handler task selects on it alongside the socket.
    pub fn new(
        config: SessionConfig,
        ctx: Value,
        router: Router,
        pubsub: Arc<PubSub>,
        outbound: mpsc::UnboundedSender<OutboundFrame>,
    ) -> (Self, mpsc::UnboundedReceiver<PublishDelivery>) {
        let (publish_tx, publish_rx) = mpsc::unbounded_channel();
        let session = Self {
            id: SessionId::next(),
            state: SessionState::Idle,
            config,
            ctx,
            router,
            pubsub,
            outbound,
            publish_tx,
            subscriptions: HashMap::new(),
            streams: HashMap::new(),
        };
        (session, publish_rx)
    }

    /// This session's id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The configured stream tick interval.
    pub fn stream_interval(&self) -> std::time::Duration {
        self.config.stream_interval
    }

    /// Number of outstanding live-query subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Number of registered entity streams.
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Completes the handshake: transitions to `Connected` and pushes
    /// the `connected` acknowledgment.
    pub fn open(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Connected)?;
        tracing::info!(id = %self.id, "session connected");
        self.push_control(ServerFrame::Connected)
    }

    /// Processes one inbound control frame.
    ///
    /// Procedure-local failures never bubble out of here — they are
    /// translated into `netRequestData` error payloads scoped to the
    /// offending request id. The only hard errors are lifecycle ones
    /// (frame while not open, outbound channel gone).
    pub async fn handle_frame(
        &mut self,
        frame: ClientFrame,
    ) -> Result<(), SessionError> {
        if !self.state.is_open() {
            return Err(SessionError::NotOpen {
                id: self.id,
                state: self.state,
            });
        }

        match frame {
            ClientFrame::ClientConnect { .. } => {
                // Handshake is handled before the frame loop; a second
                // clientConnect is a protocol slip, not a failure.
                tracing::debug!(
                    id = %self.id,
                    "ignoring duplicate clientConnect"
                );
                Ok(())
            }
            ClientFrame::NetRequest { id, path, params } => {
                self.handle_net_request(id, path, params).await
            }
            ClientFrame::NetRequestEnd { id } => {
                self.handle_net_request_end(&id);
                Ok(())
            }
            ClientFrame::DataStream { id, path, params } => {
                self.handle_data_stream(id, path, params)
            }
            ClientFrame::DataStreamEnd { id } => {
                if self.streams.remove(&id).is_some() {
                    tracing::debug!(
                        id = %self.id, request = %id, "stream removed"
                    );
                }
                Ok(())
            }
        }
    }

    /// Re-evaluates the subscription a publish was delivered for.
    ///
    /// A delivery for an id that has since unsubscribed is dropped —
    /// the forwarder task may race one last event past teardown.
    pub async fn handle_publish(
        &mut self,
        delivery: PublishDelivery,
    ) -> Result<(), SessionError> {
        let (id, event) = delivery;
        let Some(entry) = self.subscriptions.get(&id) else {
            return Ok(());
        };
        let call = CallContext::new(self.ctx.clone(), entry.params.clone())
            .with_trigger(Arc::clone(&event.payload));
        let path = entry.path.clone();
        self.evaluate_and_push(&id, &path, call).await
    }

    /// Runs every registered entity stream once and pushes a snapshot
    /// per stream, stamped with `now_ms`.
    ///
    /// A failing stream resolver is logged and skipped; it must not
    /// stall the other streams or the connection.
    pub async fn tick_streams(
        &mut self,
        now_ms: u64,
    ) -> Result<(), SessionError> {
        // Collect first: the borrow checker won't let us iterate the
        // map while pushing through &mut self.
        let entries: Vec<(RequestId, String, Value)> = self
            .streams
            .iter()
            .map(|(id, e)| (id.clone(), e.path.clone(), e.params.clone()))
            .collect();

        for (id, path, params) in entries {
            let call = CallContext::new(self.ctx.clone(), params);
            let resolved = self
                .router
                .call(&path, ProcedureKind::DataStream, call)
                .await;

            match resolved {
                Ok(Resolved::Value(value)) => {
                    match serde_json::from_value::<Vec<EntityState>>(value)
                    {
                        Ok(state) => {
                            self.push(OutboundFrame::Snapshot(Snapshot {
                                id: now_ms,
                                state,
                            }))?;
                        }
                        Err(e) => {
                            tracing::error!(
                                id = %self.id,
                                request = %id,
                                %path,
                                error = %e,
                                "stream resolver returned a non-entity payload"
                            );
                        }
                    }
                }
                Ok(Resolved::Skip) => {}
                Err(e) => {
                    tracing::error!(
                        id = %self.id,
                        request = %id,
                        %path,
                        error = %e,
                        "stream resolver failed"
                    );
                }
            }
        }
        Ok(())
    }

    /// Marks the transport as lost. The peer may come back, but the
    /// server keeps nothing: subscriptions are torn down immediately
    /// and rebuilt from the client's replay on the next connection.
    pub fn transport_lost(&mut self) {
        if self.transition(SessionState::Reconnecting).is_ok() {
            self.teardown();
            tracing::info!(id = %self.id, "transport lost, session torn down");
        }
    }

    /// Terminal teardown: unsubscribes every listener, clears both
    /// maps, and transitions to `Closed`. Idempotent.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.teardown();
        self.state = SessionState::Closed;
        tracing::info!(id = %self.id, "session closed");
    }

    // -- Inbound frame handlers -------------------------------------------

    async fn handle_net_request(
        &mut self,
        id: RequestId,
        path: String,
        params: Value,
    ) -> Result<(), SessionError> {
        if !self.subscriptions.contains_key(&id) {
            if self.router.get(&path, ProcedureKind::Request).is_none() {
                // Protocol error: scoped to this id, connection
                // unaffected, no listener registered.
                return self.push_error(
                    &id,
                    ErrorPayload::Message(format!(
                        "no such procedure: {path} (request)"
                    )),
                );
            }
            let listener = self.register_listener(&id, &path);
            self.subscriptions.insert(
                id.clone(),
                SubscriptionEntry {
                    path: path.clone(),
                    params: params.clone(),
                    listener,
                },
            );
            tracing::debug!(
                id = %self.id,
                request = %id,
                %path,
                "subscription created"
            );
        }
        // Whether the subscription is new or a duplicate, always push a
        // fresh fetch: first paint never waits for a mutation.
        let entry = &self.subscriptions[&id];
        let call =
            CallContext::new(self.ctx.clone(), entry.params.clone());
        let path = entry.path.clone();
        self.evaluate_and_push(&id, &path, call).await
    }

    fn handle_net_request_end(&mut self, id: &RequestId) {
        if let Some(entry) = self.subscriptions.remove(id) {
            self.pubsub.unsubscribe(entry.listener);
            tracing::debug!(
                id = %self.id,
                request = %id,
                path = %entry.path,
                "subscription ended"
            );
        }
    }

    fn handle_data_stream(
        &mut self,
        id: RequestId,
        path: String,
        params: Value,
    ) -> Result<(), SessionError> {
        if self.router.get(&path, ProcedureKind::DataStream).is_none() {
            return self.push_error(
                &id,
                ErrorPayload::Message(format!(
                    "no such procedure: {path} (dataStream)"
                )),
            );
        }
        self.streams
            .insert(id.clone(), StreamEntry { path: path.clone(), params });
        tracing::debug!(
            id = %self.id, request = %id, %path, "stream registered"
        );
        Ok(())
    }

    // -- Plumbing ---------------------------------------------------------

    /// Registers one pubsub listener for this subscription id and
    /// spawns the forwarder that stamps deliveries with the id.
    ///
    /// Dedup is by id, not by path: two ids on the same path get two
    /// listeners, because each carries its own params and filters.
    fn register_listener(
        &self,
        id: &RequestId,
        path: &str,
    ) -> ListenerId {
        let (listener_tx, mut listener_rx) = mpsc::unbounded_channel();
        let listener = self.pubsub.subscribe(path, listener_tx);

        let publish_tx = self.publish_tx.clone();
        let request_id = id.clone();
        tokio::spawn(async move {
            while let Some(event) = listener_rx.recv().await {
                if publish_tx.send((request_id.clone(), event)).is_err() {
                    // Session gone; the bus entry will be pruned.
                    break;
                }
            }
        });

        listener
    }

    /// Runs the procedure and pushes the translated result.
    ///
    /// Translation realizes the error taxonomy end-to-end:
    /// - value → `{id, data}`
    /// - validation failure → `{id, error: {fieldErrors}}`
    /// - any other failure → `{id, error: message}`, logged here
    /// - skip → nothing at all, logged nowhere
    async fn evaluate_and_push(
        &mut self,
        id: &RequestId,
        path: &str,
        call: CallContext,
    ) -> Result<(), SessionError> {
        let resolved = self
            .router
            .call(path, ProcedureKind::Request, call)
            .await;

        match resolved {
            Ok(Resolved::Value(data)) => self.push_control(
                ServerFrame::NetRequestData {
                    data: ResponseData::ok(id.clone(), data),
                },
            ),
            Ok(Resolved::Skip) => Ok(()),
            Err(ProcedureError::Validation { field_errors }) => self
                .push_error(id, ErrorPayload::Fields { field_errors }),
            Err(e) => {
                tracing::error!(
                    id = %self.id,
                    request = %id,
                    %path,
                    error = %e,
                    "procedure failed"
                );
                self.push_error(id, ErrorPayload::Message(e.to_string()))
            }
        }
    }

    fn teardown(&mut self) {
        for (_, entry) in self.subscriptions.drain() {
            self.pubsub.unsubscribe(entry.listener);
        }
        self.streams.clear();
    }

    fn transition(
        &mut self,
        to: SessionState,
    ) -> Result<(), SessionError> {
        if !self.state.can_transition_to(to) {
            return Err(SessionError::InvalidTransition {
                id: self.id,
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    fn push_control(
        &self,
        frame: ServerFrame,
    ) -> Result<(), SessionError> {
        self.push(OutboundFrame::Control(frame))
    }

    fn push_error(
        &self,
        id: &RequestId,
        error: ErrorPayload,
    ) -> Result<(), SessionError> {
        self.push_control(ServerFrame::NetRequestData {
            data: ResponseData::err(id.clone(), error),
        })
    }

    fn push(&self, frame: OutboundFrame) -> Result<(), SessionError> {
        self.outbound
            .send(frame)
            .map_err(|_| SessionError::OutboundClosed(self.id))
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        // Belt and braces: the handler calls close(), but a panicking
        // handler task must still not leak bus listeners.
        self.teardown();
    }
}

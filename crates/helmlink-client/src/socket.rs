//! The persistent socket: live queries and the snapshot stream, with
//! automatic reconnection and subscription replay.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use helmlink_protocol::{
    BincodeCodec, ClientFrame, Codec, ServerFrame, Snapshot,
};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

use crate::{CallerId, ClientError, SubscriptionRegistry};
use crate::registry::CallerSender;

/// Client-side socket lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Attempting the first connection.
    Connecting,
    /// Handshake done, frames flowing.
    Connected,
    /// The socket dropped; registrations are retained and will be
    /// replayed on the next successful connect.
    Reconnecting,
    /// Terminal; the driver task has exited.
    Closed,
}

/// Configuration for the socket client.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// WebSocket URL, e.g. `ws://127.0.0.1:8080`.
    pub url: String,
    /// The context object sent in `clientConnect`.
    pub ctx: Value,
    /// First reconnect delay; doubles per failure.
    pub reconnect_initial: Duration,
    /// Reconnect delay cap.
    pub reconnect_max: Duration,
    /// How long to wait for the server's `connected` acknowledgment.
    pub connect_timeout: Duration,
}

impl SocketConfig {
    /// Defaults for the given URL with an empty context.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ctx: Value::Object(serde_json::Map::new()),
            reconnect_initial: Duration::from_millis(250),
            reconnect_max: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Sets the `clientConnect` context.
    pub fn with_ctx(mut self, ctx: Value) -> Self {
        self.ctx = ctx;
        self
    }
}

/// Handle to the running socket driver.
///
/// Registrations survive disconnects: reference counts are untouched by
/// a socket drop, and every live subscription is replayed as a fresh
/// `netRequest`/`dataStream` after the reconnect handshake.
pub struct SocketClient {
    registry: Arc<Mutex<SubscriptionRegistry>>,
    state_rx: watch::Receiver<SocketState>,
    shutdown_tx: watch::Sender<bool>,
    driver: tokio::task::JoinHandle<()>,
}

impl SocketClient {
    /// Spawns the driver task and returns the client plus the receiver
    /// for decoded snapshot frames (feed it to the interpolation
    /// engine).
    pub fn connect(
        config: SocketConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Snapshot>) {
        let (wire_tx, wire_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SocketState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let registry =
            Arc::new(Mutex::new(SubscriptionRegistry::new(wire_tx)));

        // The driver holds only a weak reference: dropping the client
        // (even without close()) drops the registry and its wire
        // sender, and the driver winds down instead of reconnecting
        // against nothing.
        let driver = tokio::spawn(drive(
            config,
            Arc::downgrade(&registry),
            wire_rx,
            snapshot_tx,
            state_tx,
            shutdown_rx,
        ));

        (
            Self {
                registry,
                state_rx,
                shutdown_tx,
                driver,
            },
            snapshot_rx,
        )
    }

    /// Current socket state.
    pub fn state(&self) -> SocketState {
        *self.state_rx.borrow()
    }

    /// Registers a caller for a live query. See
    /// [`SubscriptionRegistry::register`].
    pub fn subscribe(
        &self,
        path: &str,
        params: Value,
        sender: CallerSender,
    ) -> CallerId {
        self.registry
            .lock()
            .expect("registry lock poisoned")
            .register(path, params, sender)
    }

    /// Registers a caller for the entity stream.
    pub fn subscribe_stream(
        &self,
        path: &str,
        params: Value,
        sender: CallerSender,
    ) -> CallerId {
        self.registry
            .lock()
            .expect("registry lock poisoned")
            .register_stream(path, params, sender)
    }

    /// Detaches a caller; the wire unsubscribes on the last one.
    pub fn unsubscribe(&self, caller: CallerId) {
        self.registry
            .lock()
            .expect("registry lock poisoned")
            .unregister(caller);
    }

    /// The cached result for a `(path, params)` key, if any.
    pub fn cached(&self, path: &str, params: &Value) -> Option<Arc<Value>> {
        self.registry
            .lock()
            .expect("registry lock poisoned")
            .cached(path, params)
    }

    /// Shuts the driver down and waits for it to exit.
    pub async fn close(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.driver.await;
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// The driver: connect, handshake, replay, pump — forever, until told
/// to stop. Each failed attempt backs off exponentially up to the cap.
async fn drive(
    config: SocketConfig,
    registry: Weak<Mutex<SubscriptionRegistry>>,
    mut wire_rx: mpsc::UnboundedReceiver<ClientFrame>,
    snapshot_tx: mpsc::UnboundedSender<Snapshot>,
    state_tx: watch::Sender<SocketState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut delay = config.reconnect_initial;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        match tokio_tungstenite::connect_async(config.url.as_str()).await
        {
            Ok((ws, _)) => {
                delay = config.reconnect_initial;
                match run_connection(
                    ws,
                    &config,
                    &registry,
                    &mut wire_rx,
                    &snapshot_tx,
                    &state_tx,
                    &mut shutdown_rx,
                )
                .await
                {
                    // Deliberate stop: shutdown, or the client handle
                    // (and with it the registry) is gone.
                    Ok(ConnectionEnd::Stop) => break,
                    Ok(ConnectionEnd::Lost) => {}
                    Err(e) => {
                        tracing::debug!(
                            error = %e,
                            "socket connection ended"
                        );
                    }
                }
                if *shutdown_rx.borrow() {
                    break;
                }
                let _ = state_tx.send(SocketState::Reconnecting);
                tracing::info!("socket lost, reconnecting");
            }
            Err(e) => {
                tracing::debug!(error = %e, "connect failed, will retry");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => {}
        }
        delay = (delay * 2).min(config.reconnect_max);
    }

    let _ = state_tx.send(SocketState::Closed);
    tracing::debug!("socket driver stopped");
}

/// Why a connection's pump loop returned.
enum ConnectionEnd {
    /// The peer went away; reconnect and replay.
    Lost,
    /// Shut down on purpose; the driver should exit.
    Stop,
}

/// One connection's lifetime: handshake, replay, then the frame pump.
async fn run_connection(
    ws: WsStream,
    config: &SocketConfig,
    registry: &Weak<Mutex<SubscriptionRegistry>>,
    wire_rx: &mut mpsc::UnboundedReceiver<ClientFrame>,
    snapshot_tx: &mpsc::UnboundedSender<Snapshot>,
    state_tx: &watch::Sender<SocketState>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<ConnectionEnd, ClientError> {
    let (mut sink, mut stream) = ws.split();

    // Handshake: clientConnect out, connected back within the timeout.
    let connect = ClientFrame::ClientConnect {
        ctx: config
            .ctx
            .as_object()
            .cloned()
            .unwrap_or_default(),
    };
    send_frame(&mut sink, &connect).await?;

    let handshake = tokio::time::timeout(
        config.connect_timeout,
        await_connected(&mut stream),
    )
    .await;
    match handshake {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            return Err(ClientError::Server(
                "handshake timed out".to_string(),
            ));
        }
    }

    let _ = state_tx.send(SocketState::Connected);
    tracing::info!(url = %config.url, "socket connected");

    // Frames queued while disconnected are stale: every live
    // subscription is about to be replayed against the fresh server
    // session, and `*End` frames for entries that died meanwhile have
    // nothing server-side to end.
    while wire_rx.try_recv().is_ok() {}
    let Some(live) = registry.upgrade() else {
        return Ok(ConnectionEnd::Stop);
    };
    live.lock().expect("registry lock poisoned").replay_all();
    drop(live);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                let _ = sink.close().await;
                return Ok(ConnectionEnd::Stop);
            }
            frame = wire_rx.recv() => {
                let Some(frame) = frame else {
                    // All registry handles dropped; nothing left to do.
                    let _ = sink.close().await;
                    return Ok(ConnectionEnd::Stop);
                };
                send_frame(&mut sink, &frame).await?;
            }
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(registry, text.as_str());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        handle_binary(snapshot_tx, &data);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Ok(ConnectionEnd::Lost);
                    }
                    Some(Ok(_)) => {} // ping/pong
                    Some(Err(e)) => {
                        return Err(ClientError::Server(e.to_string()));
                    }
                }
            }
        }
    }
}

async fn send_frame(
    sink: &mut (impl Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
          + Unpin),
    frame: &ClientFrame,
) -> Result<(), ClientError> {
    let text = serde_json::to_string(frame)?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| ClientError::Server(e.to_string()))
}

/// Reads frames until the server's `connected` acknowledgment.
async fn await_connected(
    stream: &mut (impl Stream<
        Item = Result<Message, tokio_tungstenite::tungstenite::Error>,
    > + Unpin),
) -> Result<(), ClientError> {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if let Ok(ServerFrame::Connected) =
                    serde_json::from_str(text.as_str())
                {
                    return Ok(());
                }
            }
            Ok(_) => {}
            Err(e) => return Err(ClientError::Server(e.to_string())),
        }
    }
    Err(ClientError::SocketClosed)
}

/// Dispatches one inbound control frame. Malformed frames are logged
/// and ignored — a confused server must not kill the client loop.
fn handle_text(
    registry: &Weak<Mutex<SubscriptionRegistry>>,
    text: &str,
) {
    match serde_json::from_str::<ServerFrame>(text) {
        Ok(ServerFrame::NetRequestData { data }) => {
            if let Some(registry) = registry.upgrade() {
                registry
                    .lock()
                    .expect("registry lock poisoned")
                    .handle_response(data);
            }
        }
        Ok(ServerFrame::Connected) => {
            tracing::debug!("ignoring redundant connected frame");
        }
        Err(e) => {
            tracing::debug!(error = %e, "malformed control frame, ignoring");
        }
    }
}

/// Decodes one binary snapshot frame and forwards it.
fn handle_binary(
    snapshot_tx: &mpsc::UnboundedSender<Snapshot>,
    data: &[u8],
) {
    match BincodeCodec.decode::<Snapshot>(data) {
        Ok(snapshot) => {
            let _ = snapshot_tx.send(snapshot);
        }
        Err(e) => {
            tracing::debug!(error = %e, "malformed snapshot frame, ignoring");
        }
    }
}

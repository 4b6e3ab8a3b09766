//! Per-connection handler: handshake, frame pump, stream ticking.
//!
//! Each accepted connection gets its own Tokio task running this
//! handler. The flow is:
//!   1. Receive `clientConnect` within the connect timeout
//!   2. Create the session, send `connected`
//!   3. Loop: select over inbound frames, publish deliveries, outbound
//!      frames, and the data-stream tick
//!   4. On close (either side): tear the session down completely

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use helmlink_protocol::{
    BincodeCodec, ClientFrame, Codec, JsonCodec, ProtocolError,
};
use helmlink_session::{ConnectionSession, OutboundFrame};
use helmlink_transport::{Connection, Frame, WebSocketConnection};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::HelmlinkError;
use crate::server::ServerState;

/// Milliseconds since the Unix epoch; the snapshot timestamp base.
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection(
    conn: WebSocketConnection,
    state: Arc<ServerState>,
) -> Result<(), HelmlinkError> {
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    // --- Step 1: clientConnect within the timeout, or drop ---
    let ctx = match tokio::time::timeout(
        state.session_config.connect_timeout,
        await_client_connect(&conn),
    )
    .await
    {
        Ok(result) => result?,
        Err(_) => {
            tracing::info!(%conn_id, "clientConnect timed out, dropping");
            let _ = conn.close().await;
            return Err(HelmlinkError::Protocol(
                ProtocolError::InvalidFrame(
                    "clientConnect timed out".into(),
                ),
            ));
        }
    };

    // --- Step 2: session + handshake ack ---
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let (mut session, mut publish_rx) = ConnectionSession::new(
        state.session_config.clone(),
        ctx,
        state.router.clone(),
        Arc::clone(&state.pubsub),
        outbound_tx,
    );
    session.open()?;
    tracing::info!(%conn_id, session = %session.id(), "client connected");

    let mut stream_tick =
        tokio::time::interval(session.stream_interval());
    let json = JsonCodec;
    let binary = BincodeCodec;

    // --- Step 3: the pump ---
    loop {
        tokio::select! {
            inbound = conn.recv() => {
                match inbound {
                    Ok(Some(Frame::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(frame) => {
                                session.handle_frame(frame).await?;
                            }
                            Err(e) => {
                                // Malformed top-level frame: logged and
                                // ignored, connection unaffected.
                                tracing::debug!(
                                    %conn_id,
                                    error = %e,
                                    "malformed frame, ignoring"
                                );
                            }
                        }
                    }
                    Ok(Some(Frame::Binary(_))) => {
                        tracing::debug!(
                            %conn_id,
                            "unexpected binary frame from client, ignoring"
                        );
                    }
                    Ok(None) => {
                        tracing::info!(%conn_id, "connection closed cleanly");
                        break;
                    }
                    Err(e) => {
                        // An abrupt drop, not a clean close: the peer
                        // may reconnect, but nothing survives here —
                        // it will replay its subscriptions.
                        tracing::debug!(%conn_id, error = %e, "recv error");
                        session.transport_lost();
                        break;
                    }
                }
            }
            delivery = publish_rx.recv() => {
                if let Some(delivery) = delivery {
                    session.handle_publish(delivery).await?;
                }
            }
            outbound = outbound_rx.recv() => {
                // The session's sender lives as long as the session, so
                // this channel can't be closed while we're looping.
                let Some(frame) = outbound else { break };
                let encoded = encode_outbound(&json, &binary, &frame)?;
                if conn.send(encoded).await.is_err() {
                    tracing::debug!(%conn_id, "send failed, closing");
                    break;
                }
            }
            _ = stream_tick.tick() => {
                if session.stream_count() > 0 {
                    session.tick_streams(now_ms()).await?;
                }
            }
        }
    }

    // --- Step 4: full teardown, no dangling listeners ---
    session.close();
    let _ = conn.close().await;
    Ok(())
}

/// Reads frames until `clientConnect`, returning its context object.
///
/// Anything else first is a protocol error — the handshake frame is
/// required to be the first control message on the wire.
async fn await_client_connect(
    conn: &WebSocketConnection,
) -> Result<Value, HelmlinkError> {
    loop {
        match conn.recv().await.map_err(HelmlinkError::Transport)? {
            Some(Frame::Text(text)) => {
                match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(ClientFrame::ClientConnect { ctx }) => {
                        return Ok(Value::Object(ctx));
                    }
                    Ok(_) => {
                        return Err(HelmlinkError::Protocol(
                            ProtocolError::InvalidFrame(
                                "first frame must be clientConnect"
                                    .into(),
                            ),
                        ));
                    }
                    Err(e) => {
                        tracing::debug!(
                            error = %e,
                            "malformed pre-handshake frame, ignoring"
                        );
                    }
                }
            }
            Some(Frame::Binary(_)) => {
                tracing::debug!("binary frame before handshake, ignoring");
            }
            None => {
                return Err(HelmlinkError::Protocol(
                    ProtocolError::InvalidFrame(
                        "connection closed before clientConnect".into(),
                    ),
                ));
            }
        }
    }
}

/// Encodes a typed outbound frame for the wire: control messages as
/// JSON text, snapshots as bincode binary.
fn encode_outbound(
    json: &JsonCodec,
    binary: &BincodeCodec,
    frame: &OutboundFrame,
) -> Result<Frame, HelmlinkError> {
    match frame {
        OutboundFrame::Control(control) => {
            let bytes = json.encode(control)?;
            let text = String::from_utf8(bytes).map_err(|e| {
                HelmlinkError::Protocol(ProtocolError::InvalidFrame(
                    e.to_string(),
                ))
            })?;
            Ok(Frame::Text(text))
        }
        OutboundFrame::Snapshot(snapshot) => {
            Ok(Frame::Binary(binary.encode(snapshot)?))
        }
    }
}

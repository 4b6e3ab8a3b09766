//! Reconnect-with-replay tests: after a socket drop, every live
//! subscription is re-sent to the server exactly once.
//!
//! The "server" here is a bare tokio-tungstenite acceptor driven by the
//! test, so frame-level behavior can be asserted precisely.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use helmlink_client::{CallerUpdate, SocketClient, SocketConfig};
use helmlink_protocol::ClientFrame;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

type ServerWs = WebSocketStream<TcpStream>;

async fn accept_ws(listener: &TcpListener) -> ServerWs {
    let (stream, _) = listener.accept().await.expect("accept");
    tokio_tungstenite::accept_async(stream)
        .await
        .expect("ws upgrade")
}

/// Reads the next text frame as a [`ClientFrame`], with a deadline.
async fn recv_frame(ws: &mut ServerWs) -> ClientFrame {
    loop {
        let message =
            tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("timed out waiting for client frame")
                .expect("stream ended")
                .expect("frame error");
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str())
                .expect("client frame should parse");
        }
    }
}

/// Performs the server half of the handshake.
async fn handshake(ws: &mut ServerWs) {
    let frame = recv_frame(ws).await;
    assert!(
        matches!(frame, ClientFrame::ClientConnect { .. }),
        "first frame must be clientConnect, got {frame:?}"
    );
    ws.send(Message::Text(
        json!({ "type": "connected" }).to_string().into(),
    ))
    .await
    .expect("send connected");
}

/// Asserts that no further frame arrives within `window`.
async fn assert_silent(ws: &mut ServerWs, window: Duration) {
    let next = tokio::time::timeout(window, ws.next()).await;
    assert!(next.is_err(), "unexpected frame: {next:?}");
}

fn client_config(addr: &str) -> SocketConfig {
    let mut config = SocketConfig::new(format!("ws://{addr}"));
    config.reconnect_initial = Duration::from_millis(50);
    config.reconnect_max = Duration::from_millis(200);
    config
}

#[tokio::test]
async fn test_subscription_replayed_once_after_reconnect() {
    let listener =
        TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    let (client, _snapshots) =
        SocketClient::connect(client_config(&addr));
    let (update_tx, _update_rx) =
        tokio::sync::mpsc::unbounded_channel();
    client.subscribe("navigation.course", json!({ "shipId": 1 }), update_tx);

    // First connection: handshake, then exactly one netRequest.
    let mut conn1 = accept_ws(&listener).await;
    handshake(&mut conn1).await;
    let frame = recv_frame(&mut conn1).await;
    let ClientFrame::NetRequest { id: id1, path, params } = frame else {
        panic!("expected netRequest");
    };
    assert_eq!(path, "navigation.course");
    assert_eq!(params, json!({ "shipId": 1 }));
    assert_silent(&mut conn1, Duration::from_millis(200)).await;

    // Drop the connection server-side.
    drop(conn1);

    // The client reconnects and replays: handshake, then the same
    // subscription exactly once, under the same wire id.
    let mut conn2 = accept_ws(&listener).await;
    handshake(&mut conn2).await;
    let frame = recv_frame(&mut conn2).await;
    let ClientFrame::NetRequest { id: id2, path, .. } = frame else {
        panic!("expected replayed netRequest");
    };
    assert_eq!(path, "navigation.course");
    assert_eq!(id1, id2, "replay keeps the wire id stable");
    assert_silent(&mut conn2, Duration::from_millis(200)).await;

    client.close().await;
}

#[tokio::test]
async fn test_replay_covers_all_live_subscriptions() {
    let listener =
        TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    let (client, _snapshots) =
        SocketClient::connect(client_config(&addr));
    let (tx_a, _rx_a) = tokio::sync::mpsc::unbounded_channel();
    let (tx_b, _rx_b) = tokio::sync::mpsc::unbounded_channel();
    let (tx_c, _rx_c) = tokio::sync::mpsc::unbounded_channel();
    client.subscribe("navigation.course", Value::Null, tx_a);
    client.subscribe_stream("ship.contacts", Value::Null, tx_b);
    // Second caller on an existing key: no extra wire traffic, ever.
    client.subscribe("navigation.course", Value::Null, tx_c);

    let mut conn1 = accept_ws(&listener).await;
    handshake(&mut conn1).await;
    let mut opened = vec![
        frame_kind(&recv_frame(&mut conn1).await),
        frame_kind(&recv_frame(&mut conn1).await),
    ];
    opened.sort();
    assert_eq!(opened, vec!["dataStream", "netRequest"]);
    assert_silent(&mut conn1, Duration::from_millis(200)).await;

    drop(conn1);

    let mut conn2 = accept_ws(&listener).await;
    handshake(&mut conn2).await;
    let mut replayed = vec![
        frame_kind(&recv_frame(&mut conn2).await),
        frame_kind(&recv_frame(&mut conn2).await),
    ];
    replayed.sort();
    assert_eq!(replayed, vec!["dataStream", "netRequest"]);
    assert_silent(&mut conn2, Duration::from_millis(200)).await;

    client.close().await;
}

#[tokio::test]
async fn test_unsubscribed_key_is_not_replayed() {
    let listener =
        TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    let (client, _snapshots) =
        SocketClient::connect(client_config(&addr));
    let (tx_a, _rx_a) = tokio::sync::mpsc::unbounded_channel();
    let (tx_b, _rx_b) = tokio::sync::mpsc::unbounded_channel();
    let caller_a =
        client.subscribe("navigation.course", Value::Null, tx_a);
    client.subscribe("power.reactor", Value::Null, tx_b);

    let mut conn1 = accept_ws(&listener).await;
    handshake(&mut conn1).await;
    let _ = recv_frame(&mut conn1).await;
    let _ = recv_frame(&mut conn1).await;

    // End one subscription while connected, then drop the socket.
    client.unsubscribe(caller_a);
    let frame = recv_frame(&mut conn1).await;
    assert!(matches!(frame, ClientFrame::NetRequestEnd { .. }));
    drop(conn1);

    let mut conn2 = accept_ws(&listener).await;
    handshake(&mut conn2).await;
    let frame = recv_frame(&mut conn2).await;
    let ClientFrame::NetRequest { path, .. } = frame else {
        panic!("expected netRequest");
    };
    assert_eq!(path, "power.reactor", "ended key must not be replayed");
    assert_silent(&mut conn2, Duration::from_millis(200)).await;

    client.close().await;
}

#[tokio::test]
async fn test_response_routed_to_caller_after_reconnect() {
    let listener =
        TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    let (client, _snapshots) =
        SocketClient::connect(client_config(&addr));
    let (update_tx, mut update_rx) =
        tokio::sync::mpsc::unbounded_channel();
    client.subscribe("navigation.course", Value::Null, update_tx);

    let mut conn1 = accept_ws(&listener).await;
    handshake(&mut conn1).await;
    let _ = recv_frame(&mut conn1).await;
    drop(conn1);

    let mut conn2 = accept_ws(&listener).await;
    handshake(&mut conn2).await;
    let ClientFrame::NetRequest { id, .. } =
        recv_frame(&mut conn2).await
    else {
        panic!("expected netRequest");
    };

    // Answer the replayed subscription; the original caller hears it.
    conn2
        .send(Message::Text(
            json!({
                "type": "netRequestData",
                "data": { "id": id.0, "data": { "heading": 7.0 } }
            })
            .to_string()
            .into(),
        ))
        .await
        .expect("send response");

    let update = tokio::time::timeout(
        Duration::from_secs(2),
        update_rx.recv(),
    )
    .await
    .expect("timed out")
    .expect("update expected");
    match update {
        CallerUpdate::Data(data) => {
            assert_eq!(data["heading"], 7.0);
        }
        other => panic!("expected data, got {other:?}"),
    }

    client.close().await;
}

fn frame_kind(frame: &ClientFrame) -> &'static str {
    match frame {
        ClientFrame::ClientConnect { .. } => "clientConnect",
        ClientFrame::NetRequest { .. } => "netRequest",
        ClientFrame::NetRequestEnd { .. } => "netRequestEnd",
        ClientFrame::DataStream { .. } => "dataStream",
        ClientFrame::DataStreamEnd { .. } => "dataStreamEnd",
    }
}

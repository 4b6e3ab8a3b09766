//! Integration tests for the Helmlink server: handshake, live queries,
//! mutations publishing over HTTP, data streams, and multipart uploads
//! — all over real sockets.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use helmlink::prelude::*;
use helmlink_client::{
    FilePart, HttpClient, SendValue, SocketClient, SocketConfig,
};
use helmlink_procedure::ProcedureError;
use helmlink_protocol::{BincodeCodec, Codec};
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::Message;

// =========================================================================
// Fixture: a small ship-simulation router
// =========================================================================

type Store = Arc<Mutex<Value>>;

struct TestServer {
    ws_url: String,
    http_url: String,
    pubsub: Arc<PubSub>,
}

fn build_router(store: Store, pubsub: Arc<PubSub>) -> Router {
    let course_store = Arc::clone(&store);
    let course = ProcedureBuilder::new().request(move |_| {
        let store = Arc::clone(&course_store);
        async move { Ok(store.lock().unwrap().clone()) }
    });

    let set_store = Arc::clone(&store);
    let set_course = ProcedureBuilder::new().send(move |call| {
        let store = Arc::clone(&set_store);
        let pubsub = Arc::clone(&pubsub);
        async move {
            if !call.input["heading"].is_number() {
                return Err(ProcedureError::invalid_field(
                    "heading",
                    "must be a number",
                ));
            }
            *store.lock().unwrap() = call.input.clone();
            pubsub.publish("navigation.course", call.input.clone());
            Ok(json!({ "ok": true }))
        }
    });

    let contacts = ProcedureBuilder::new().data_stream(|_| async {
        Ok(json!([
            { "id": "freighter", "x": 10.0, "y": 0.0, "z": -4.0 },
            { "id": "beacon", "x": 0.0, "y": 1.0, "z": 0.0,
              "r": { "x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0 } },
        ]))
    });

    // Echoes its input so uploads can be verified end to end.
    let manifest = ProcedureBuilder::new()
        .send(|call| async move { Ok(call.input) });

    Router::new(vec![
        (
            "navigation".to_string(),
            RouterNode::from(
                Router::new(vec![
                    ("course".to_string(), RouterNode::from(course)),
                    (
                        "setCourse".to_string(),
                        RouterNode::from(set_course),
                    ),
                ])
                .unwrap(),
            ),
        ),
        (
            "ship.contacts".to_string(),
            RouterNode::from(contacts),
        ),
        (
            "cargo.manifest".to_string(),
            RouterNode::from(manifest),
        ),
    ])
    .expect("router should build")
}

async fn start_server_with(config: SessionConfig) -> TestServer {
    let store: Store =
        Arc::new(Mutex::new(json!({ "heading": 0.0 })));
    let pubsub = Arc::new(PubSub::new());
    let router = build_router(store, Arc::clone(&pubsub));

    let server = HelmlinkServer::builder()
        .bind_ws("127.0.0.1:0")
        .bind_http("127.0.0.1:0")
        .session_config(config)
        .build(router, Arc::clone(&pubsub))
        .await
        .expect("server should build");

    let ws_addr = server.ws_addr().expect("ws addr").to_string();
    let http_addr = server.http_addr().expect("http addr").to_string();

    tokio::spawn(async move {
        let _ = server.run().await;
    });
    // Give the accept loops a moment to start.
    tokio::time::sleep(Duration::from_millis(10)).await;

    TestServer {
        ws_url: format!("ws://{ws_addr}"),
        http_url: format!("http://{http_addr}"),
        pubsub,
    }
}

async fn start_server() -> TestServer {
    start_server_with(SessionConfig::default()).await
}

// =========================================================================
// Raw socket helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn connect(url: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("should connect");
    ws
}

async fn send_json(ws: &mut ClientWs, frame: Value) {
    ws.send(Message::Text(frame.to_string().into()))
        .await
        .expect("send should succeed");
}

/// Receives the next text frame as JSON, with a deadline.
async fn recv_json(ws: &mut ClientWs) -> Value {
    loop {
        let message =
            tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("stream ended")
                .expect("frame error");
        match message {
            Message::Text(text) => {
                return serde_json::from_str(text.as_str())
                    .expect("frame should be JSON");
            }
            Message::Binary(_) => continue,
            _ => continue,
        }
    }
}

/// Receives the next binary frame, with a deadline.
async fn recv_binary(ws: &mut ClientWs) -> Vec<u8> {
    loop {
        let message =
            tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("stream ended")
                .expect("frame error");
        match message {
            Message::Binary(data) => return data.to_vec(),
            _ => continue,
        }
    }
}

/// Connects and completes the clientConnect handshake.
async fn connect_and_handshake(url: &str) -> ClientWs {
    let mut ws = connect(url).await;
    send_json(&mut ws, json!({ "type": "clientConnect", "station": "helm" }))
        .await;
    let ack = recv_json(&mut ws).await;
    assert_eq!(ack["type"], "connected");
    ws
}

// =========================================================================
// Handshake
// =========================================================================

#[tokio::test]
async fn test_handshake_yields_connected() {
    let server = start_server().await;
    let _ws = connect_and_handshake(&server.ws_url).await;
}

#[tokio::test]
async fn test_missing_handshake_drops_connection() {
    let server = start_server_with(SessionConfig {
        connect_timeout: Duration::from_millis(200),
        ..SessionConfig::default()
    })
    .await;

    let mut ws = connect(&server.ws_url).await;
    // Say nothing; the server must hang up after the timeout.
    let next =
        tokio::time::timeout(Duration::from_secs(2), ws.next()).await;
    match next.expect("server should have closed the connection") {
        None | Some(Ok(Message::Close(_))) => {}
        other => panic!("expected close, got {other:?}"),
    }
}

// =========================================================================
// Live queries over the socket
// =========================================================================

#[tokio::test]
async fn test_net_request_first_paint() {
    let server = start_server().await;
    let mut ws = connect_and_handshake(&server.ws_url).await;

    send_json(
        &mut ws,
        json!({
            "type": "netRequest",
            "id": "r1",
            "path": "navigation.course",
            "params": {}
        }),
    )
    .await;

    // No mutation ever happens; the response must arrive anyway.
    let frame = recv_json(&mut ws).await;
    assert_eq!(frame["type"], "netRequestData");
    assert_eq!(frame["data"]["id"], "r1");
    assert_eq!(frame["data"]["data"]["heading"], 0.0);
}

#[tokio::test]
async fn test_http_mutation_pushes_live_update() {
    let server = start_server().await;
    let mut ws = connect_and_handshake(&server.ws_url).await;

    send_json(
        &mut ws,
        json!({
            "type": "netRequest",
            "id": "r1",
            "path": "navigation.course",
            "params": {}
        }),
    )
    .await;
    let _first_paint = recv_json(&mut ws).await;

    // Mutate over HTTP; the resolver publishes, the session re-runs.
    let http = HttpClient::new(&server.http_url);
    http.net_send(
        "navigation.setCourse",
        vec![(
            "heading".to_string(),
            SendValue::Json(json!(90.0)),
        )],
    )
    .await
    .expect("mutation should succeed");

    let update = recv_json(&mut ws).await;
    assert_eq!(update["data"]["id"], "r1");
    assert_eq!(update["data"]["data"]["heading"], 90.0);
}

#[tokio::test]
async fn test_net_request_end_stops_updates() {
    let server = start_server().await;
    let mut ws = connect_and_handshake(&server.ws_url).await;

    send_json(
        &mut ws,
        json!({
            "type": "netRequest",
            "id": "r1",
            "path": "navigation.course",
            "params": {}
        }),
    )
    .await;
    let _ = recv_json(&mut ws).await;

    send_json(&mut ws, json!({ "type": "netRequestEnd", "id": "r1" }))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(server.pubsub.is_empty(), "listener should be gone");

    server.pubsub.publish("navigation.course", json!({}));
    let next =
        tokio::time::timeout(Duration::from_millis(300), ws.next())
            .await;
    assert!(next.is_err(), "no frame expected after netRequestEnd");
}

#[tokio::test]
async fn test_connection_close_tears_down_listeners() {
    let server = start_server().await;
    let mut ws = connect_and_handshake(&server.ws_url).await;

    send_json(
        &mut ws,
        json!({
            "type": "netRequest",
            "id": "r1",
            "path": "navigation.course",
            "params": {}
        }),
    )
    .await;
    let _ = recv_json(&mut ws).await;
    assert_eq!(server.pubsub.listener_count("navigation.course"), 1);

    ws.close(None).await.expect("close should succeed");
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(
        server.pubsub.is_empty(),
        "no dangling listeners may survive a connection"
    );
}

#[tokio::test]
async fn test_malformed_frame_is_ignored() {
    let server = start_server().await;
    let mut ws = connect_and_handshake(&server.ws_url).await;

    ws.send(Message::Text("{not json".into()))
        .await
        .expect("send should succeed");

    // The connection survives: a normal request still works.
    send_json(
        &mut ws,
        json!({
            "type": "netRequest",
            "id": "r1",
            "path": "navigation.course",
            "params": {}
        }),
    )
    .await;
    let frame = recv_json(&mut ws).await;
    assert_eq!(frame["data"]["id"], "r1");
}

// =========================================================================
// Data streams
// =========================================================================

#[tokio::test]
async fn test_data_stream_delivers_binary_snapshots() {
    let server = start_server().await;
    let mut ws = connect_and_handshake(&server.ws_url).await;

    send_json(
        &mut ws,
        json!({
            "type": "dataStream",
            "id": "s1",
            "path": "ship.contacts",
            "params": {}
        }),
    )
    .await;

    let data = recv_binary(&mut ws).await;
    let snapshot: Snapshot =
        BincodeCodec.decode(&data).expect("snapshot should decode");
    assert!(snapshot.id > 0, "snapshot must be timestamped");
    assert_eq!(snapshot.state.len(), 2);
    assert_eq!(snapshot.state[0].id, "freighter");
    assert_eq!(snapshot.state[1].r.as_ref().unwrap().w, 1.0);
}

// =========================================================================
// HTTP one-shots
// =========================================================================

#[tokio::test]
async fn test_http_net_request_returns_procedure_output() {
    let server = start_server().await;
    let http = HttpClient::new(&server.http_url);

    let course = http
        .net_request("navigation.course", json!({}))
        .await
        .expect("request should succeed");
    assert_eq!(course["heading"], 0.0);
}

#[tokio::test]
async fn test_http_unknown_path_rejects_with_error() {
    let server = start_server().await;
    let http = HttpClient::new(&server.http_url);

    let err = http
        .net_request("ghost.path", json!({}))
        .await
        .expect_err("unknown path must fail");
    assert!(
        err.to_string().contains("no such procedure"),
        "got: {err}"
    );
}

#[tokio::test]
async fn test_http_validation_failure_reports_field_errors() {
    let server = start_server().await;
    let http = HttpClient::new(&server.http_url);

    let err = http
        .net_send(
            "navigation.setCourse",
            vec![(
                "heading".to_string(),
                SendValue::Json(json!("north")),
            )],
        )
        .await
        .expect_err("bad heading must fail");
    assert!(err.to_string().contains("heading"), "got: {err}");
}

#[tokio::test]
async fn test_multipart_round_trip() {
    let server = start_server().await;
    let http = HttpClient::new(&server.http_url);
    let image_bytes = vec![0x89u8, 0x50, 0x4e, 0x47, 1, 2, 3, 4];

    let echoed = http
        .net_send(
            "cargo.manifest",
            vec![
                (
                    "label".to_string(),
                    SendValue::Json(json!("star chart")),
                ),
                (
                    "image".to_string(),
                    SendValue::File(FilePart {
                        file_name: "chart.png".to_string(),
                        bytes: image_bytes.clone(),
                    }),
                ),
            ],
        )
        .await
        .expect("upload should succeed");

    // The scalar arrived untouched.
    assert_eq!(echoed["label"], "star chart");
    // The file field resolved to a readable temporary path holding the
    // original bytes.
    let temp_path = echoed["image"]
        .as_str()
        .expect("image should be a path");
    assert_ne!(temp_path, "file:image", "placeholder must be resolved");
    let on_disk = tokio::fs::read(temp_path)
        .await
        .expect("temp file should be readable");
    assert_eq!(on_disk, image_bytes);
}

// =========================================================================
// SocketClient end to end
// =========================================================================

#[tokio::test]
async fn test_socket_client_live_query_updates() {
    let server = start_server().await;

    let (client, _snapshots) = SocketClient::connect(
        SocketConfig::new(&server.ws_url)
            .with_ctx(json!({ "station": "helm" })),
    );
    let (update_tx, mut update_rx) =
        tokio::sync::mpsc::unbounded_channel();
    client.subscribe("navigation.course", json!({}), update_tx);

    // First paint through the whole stack.
    let first = tokio::time::timeout(
        Duration::from_secs(2),
        update_rx.recv(),
    )
    .await
    .expect("timed out")
    .expect("update expected");
    match first {
        helmlink_client::CallerUpdate::Data(data) => {
            assert_eq!(data["heading"], 0.0);
        }
        other => panic!("expected data, got {other:?}"),
    }

    // Mutate over HTTP; the live query refreshes.
    let http = HttpClient::new(&server.http_url);
    http.net_send(
        "navigation.setCourse",
        vec![("heading".to_string(), SendValue::Json(json!(45.0)))],
    )
    .await
    .expect("mutation should succeed");

    let second = tokio::time::timeout(
        Duration::from_secs(2),
        update_rx.recv(),
    )
    .await
    .expect("timed out")
    .expect("update expected");
    match second {
        helmlink_client::CallerUpdate::Data(data) => {
            assert_eq!(data["heading"], 45.0);
        }
        other => panic!("expected data, got {other:?}"),
    }

    client.close().await;
}

#[tokio::test]
async fn test_socket_client_receives_snapshots() {
    let server = start_server().await;

    let (client, mut snapshots) = SocketClient::connect(
        SocketConfig::new(&server.ws_url),
    );
    let (update_tx, _update_rx) =
        tokio::sync::mpsc::unbounded_channel();
    client.subscribe_stream("ship.contacts", json!({}), update_tx);

    let snapshot = tokio::time::timeout(
        Duration::from_secs(2),
        snapshots.recv(),
    )
    .await
    .expect("timed out")
    .expect("snapshot expected");
    assert_eq!(snapshot.state.len(), 2);

    client.close().await;
}

//! Control-frame types for Helmlink's wire format.
//!
//! Everything here travels as JSON inside WebSocket text frames. The
//! exact JSON shapes are contractual — browser clients parse them with
//! plain `JSON.parse`, so every serde attribute below is load-bearing.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A client-chosen identifier for one logical request.
///
/// The client mints these (opaque strings, typically random hex) and uses
/// the same id to later end the subscription. Dedup on the server is keyed
/// by this id — two different ids on the same path are two subscriptions.
///
/// `#[serde(transparent)]` keeps the JSON representation a plain string:
/// `RequestId("ab12")` serializes as `"ab12"`, not `{"0":"ab12"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// ClientFrame — everything a client can say
// ---------------------------------------------------------------------------

/// Messages sent from client to server over the persistent socket.
///
/// `#[serde(tag = "type", rename_all = "camelCase")]` produces internally
/// tagged JSON with camelCase tags, matching what the browser sends:
///
/// ```json
/// { "type": "netRequest", "id": "ab12", "path": "navigation.course", "params": {} }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    /// First frame on every connection, required within the connect
    /// timeout. Carries the client context (ship id, station, …) flattened
    /// into the frame itself: `{ "type": "clientConnect", "shipId": 4 }`.
    ClientConnect {
        #[serde(flatten)]
        ctx: serde_json::Map<String, serde_json::Value>,
    },

    /// Subscribe to a live query (or re-fetch if `id` is already live).
    NetRequest {
        id: RequestId,
        path: String,
        #[serde(default)]
        params: serde_json::Value,
    },

    /// End the subscription registered under `id`.
    NetRequestEnd { id: RequestId },

    /// Register a high-frequency entity stream under `id`.
    DataStream {
        id: RequestId,
        path: String,
        #[serde(default)]
        params: serde_json::Value,
    },

    /// Remove the entity stream registered under `id`.
    DataStreamEnd { id: RequestId },
}

// ---------------------------------------------------------------------------
// ServerFrame — everything the server can say (in text frames)
// ---------------------------------------------------------------------------

/// Control messages sent from server to client.
///
/// Snapshots are *not* here: they travel as binary frames and are decoded
/// separately (see [`Snapshot`](crate::Snapshot)).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    /// Handshake acknowledgment, sent once after `clientConnect`.
    Connected,

    /// A live-query result (or error) scoped to one request id.
    NetRequestData { data: ResponseData },
}

/// The payload of a `netRequestData` frame.
///
/// Exactly one of `data` / `error` is present. Absent fields are omitted
/// from the JSON entirely rather than serialized as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    /// The request id this result belongs to. Errors are scoped to this
    /// one id — other subscriptions on the connection are unaffected.
    pub id: RequestId,

    /// The procedure output on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// The error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl ResponseData {
    /// A successful result for `id`.
    pub fn ok(id: RequestId, data: serde_json::Value) -> Self {
        Self {
            id,
            data: Some(data),
            error: None,
        }
    }

    /// A failed result for `id`.
    pub fn err(id: RequestId, error: ErrorPayload) -> Self {
        Self {
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// The two wire shapes an error can take.
///
/// Validation failures carry per-field messages so forms can highlight
/// the offending inputs; everything else is a single message string.
///
/// `#[serde(untagged)]` lets the JSON be either
/// `{ "fieldErrors": { "speed": "not a number" } }` or `"boom"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorPayload {
    /// Input validation failed; one message per offending field.
    Fields {
        #[serde(rename = "fieldErrors")]
        field_errors: BTreeMap<String, String>,
    },

    /// Any other failure, as a human-readable message.
    Message(String),
}

// =========================================================================
// Tests
// =========================================================================

//! Error types for the client transport.

/// Errors that can occur in the client transport.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The HTTP request itself failed (connection refused, timeout at
    /// the reqwest level, TLS trouble).
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with an error payload. The string is the
    /// response body's `error` field (or the raw body when the shape
    /// was unexpected).
    #[error("server error: {0}")]
    Server(String),

    /// A response body couldn't be parsed as JSON.
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// `net_request`/`net_send` input must be a JSON object (or null).
    #[error("input must be a JSON object, got {0}")]
    InvalidInput(String),

    /// The socket driver has shut down; no further wire traffic is
    /// possible from this client.
    #[error("socket closed")]
    SocketClosed,
}

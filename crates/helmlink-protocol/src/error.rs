//! Error types for the protocol layer.
//!
//! Each crate in Helmlink defines its own error enum. A `ProtocolError`
//! always means a serialization/deserialization problem, never a
//! networking or procedure-dispatch one.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// JSON serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// JSON deserialization failed — malformed JSON, missing required
    /// fields, wrong data types, or an unknown frame tag.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// Binary (bincode) serialization failed.
    #[cfg(feature = "binary")]
    #[error("binary encode failed: {0}")]
    EncodeBinary(bincode::Error),

    /// Binary (bincode) deserialization failed — usually a truncated or
    /// corrupted snapshot frame.
    #[cfg(feature = "binary")]
    #[error("binary decode failed: {0}")]
    DecodeBinary(bincode::Error),

    /// The frame decoded fine but violates protocol rules — e.g. a
    /// control message arriving before `clientConnect`.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

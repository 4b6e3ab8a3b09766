//! Codec trait and implementations for serializing/deserializing messages.
//!
//! A codec converts between Rust types and raw bytes. The protocol layer
//! doesn't care HOW messages are serialized — it just needs something that
//! implements the [`Codec`] trait.
//!
//! Helmlink ships two: [`JsonCodec`] for the control channel (readable in
//! browser DevTools, debuggable in logs) and [`BincodeCodec`] for the
//! snapshot stream, where twenty captures per second of every moving
//! entity make compactness matter.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because codecs are stored in long-lived server
/// state shared across Tokio tasks. `DeserializeOwned` (vs `Deserialize`)
/// means decoded values own their data, so the input buffer can be dropped
/// immediately.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns a `ProtocolError` encode variant if serialization fails.
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns a `ProtocolError` decode variant if the bytes are
    /// malformed, incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Used for all control frames. Behind the `json` feature (default).
///
/// ## Example
///
/// ```rust
/// use helmlink_protocol::{Codec, JsonCodec, ServerFrame};
///
/// let codec = JsonCodec;
/// let bytes = codec.encode(&ServerFrame::Connected).unwrap();
/// let decoded: ServerFrame = codec.decode(&bytes).unwrap();
/// assert_eq!(decoded, ServerFrame::Connected);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

// ---------------------------------------------------------------------------
// BincodeCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses bincode — compact binary, no field names.
///
/// Used for [`Snapshot`](crate::Snapshot) frames on the data stream.
/// Behind the `binary` feature (default).
#[cfg(feature = "binary")]
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

#[cfg(feature = "binary")]
impl Codec for BincodeCodec {
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(value).map_err(ProtocolError::EncodeBinary)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        bincode::deserialize(data).map_err(ProtocolError::DecodeBinary)
    }
}

//! Wire protocol for Helmlink.
//!
//! This crate defines the "language" that clients and servers speak:
//!
//! - **Types** ([`ClientFrame`], [`ServerFrame`], [`Snapshot`], etc.) —
//!   the message structures that travel on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`], [`BincodeCodec`]) — how
//!   those messages are converted to/from bytes.
//! - **Errors** ([`ProtocolError`]) — what can go wrong during
//!   encoding/decoding.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw frames) and session
//! (subscription bookkeeping). It doesn't know about connections or
//! procedures — it only knows how to serialize and deserialize messages.
//!
//! ```text
//! Transport (frames) → Protocol (ClientFrame/ServerFrame) → Session
//! ```
//!
//! # Two channels, two encodings
//!
//! Control traffic (`clientConnect`, `netRequest`, `netRequestData`, …)
//! is JSON in WebSocket *text* frames. The high-frequency entity stream
//! is a bincode-encoded [`Snapshot`] in *binary* frames. The frame kind
//! is the only discriminant — a receiver never has to sniff payloads.

mod codec;
mod error;
mod snapshot;
mod types;

pub use codec::Codec;
#[cfg(feature = "binary")]
pub use codec::BincodeCodec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use snapshot::{EntityState, Rotation, Snapshot};
pub use types::{
    ClientFrame, ErrorPayload, RequestId, ResponseData, ServerFrame,
};

//! Client transport for Helmlink.
//!
//! Two independent channels, mirroring the server's split:
//!
//! - **One-shot HTTP** ([`HttpClient`]) — `net_request` for reads,
//!   `net_send` for mutations, with multipart upload support when an
//!   input value is a file.
//! - **The persistent socket** ([`SocketClient`]) — live-query
//!   subscriptions and the snapshot stream, with automatic reconnection
//!   and subscription replay.
//!
//! # Client-side deduplication
//!
//! Many UI surfaces subscribe to the same data: six consoles all
//! watching `navigation.course` must not cost six server subscriptions.
//! The [`SubscriptionRegistry`] reference-counts callers per
//! `(path, params)` key and talks to the wire only on the 0→1 and 1→0
//! transitions; everyone else is served from the local cache and the
//! shared update fan-out.

mod error;
mod http;
mod registry;
mod socket;

pub use error::ClientError;
pub use http::{FilePart, HttpClient, SendInput, SendValue};
pub use registry::{
    CallerId, CallerSender, CallerUpdate, SubscriptionRegistry,
    subscription_key,
};
pub use socket::{SocketClient, SocketConfig, SocketState};

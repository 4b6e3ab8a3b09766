//! Connection sessions for Helmlink.
//!
//! One [`ConnectionSession`] exists per live socket. It owns, exclusively:
//!
//! 1. **Subscription bookkeeping** — which request ids are live, which
//!    pubsub listeners back them, deduplicated by id.
//! 2. **The data-stream map** — which entity streams this connection
//!    has registered, consulted on every stream tick.
//! 3. **The outbound channel** — every frame the connection sends flows
//!    through the session's sender, in order.
//!
//! Nothing here is shared across sessions except the injected
//! [`PubSub`](helmlink_pubsub::PubSub) bus, so there is no cross-session
//! locking — a session's maps are plain `HashMap`s owned by one task.
//!
//! # How it fits in the stack
//!
//! ```text
//! Transport adapter (above)  ← feeds decoded ClientFrames in, frames out
//!     ↕
//! Session layer (this crate)  ← subscription lifecycle, error translation
//!     ↕
//! Procedure layer (below)  ← Router::call does the actual work
//! ```

mod error;
mod session;
mod state;

pub use error::SessionError;
pub use session::{
    ConnectionSession, OutboundFrame, PublishDelivery, SessionId,
};
pub use state::{SessionConfig, SessionState};

//! Error types for the session layer.

use crate::{SessionId, SessionState};

/// Errors that can occur during session management.
///
/// Note what is *not* here: procedure failures. Those are translated
/// into wire payloads scoped to one request id and never surface as
/// Rust errors from the session — a resolver blowing up must not take
/// the connection with it.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A frame arrived in a state that doesn't allow it.
    #[error("session {id} is {state}, cannot process frames")]
    NotOpen {
        id: SessionId,
        state: SessionState,
    },

    /// An invalid lifecycle transition was attempted.
    #[error("session {id}: invalid transition {from} → {to}")]
    InvalidTransition {
        id: SessionId,
        from: SessionState,
        to: SessionState,
    },

    /// The outbound channel's receiving side is gone — the connection
    /// writer has shut down, so the session is effectively dead.
    #[error("session {0}: outbound channel closed")]
    OutboundClosed(SessionId),
}

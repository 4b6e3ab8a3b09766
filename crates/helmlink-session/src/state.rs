//! Session configuration and lifecycle state machine.

use std::time::Duration;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for connection-session behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a freshly accepted connection has to send its
    /// `clientConnect` frame before it is dropped.
    pub connect_timeout: Duration,

    /// Interval between data-stream snapshots. This is the server tick
    /// for the entity channel — clients interpolate across it.
    pub stream_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            stream_interval: Duration::from_millis(100),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// The lifecycle state of a connection session.
///
/// ```text
///   Idle ──(open)──→ Connected ──(transport loss)──→ Reconnecting
///                        ↑                                │
///                        └───────────(resume)─────────────┘
///                        │
///                     (close)
///                        ↓
///                     Closed
/// ```
///
/// - **Idle**: accepted, `clientConnect` not yet received.
/// - **Connected**: handshake done, frames flowing.
/// - **Reconnecting**: the transport dropped and the peer is expected
///   back; subscriptions are retained only on the client side — the
///   server tears down and waits for replay.
/// - **Closed**: terminal. All listeners unsubscribed, maps cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connected,
    Reconnecting,
    Closed,
}

impl SessionState {
    /// Returns `true` if frames may be processed in this state.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` if transitioning to `target` is valid.
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Idle, Self::Connected)
                | (Self::Connected, Self::Reconnecting)
                | (Self::Reconnecting, Self::Connected)
                | (Self::Idle, Self::Closed)
                | (Self::Connected, Self::Closed)
                | (Self::Reconnecting, Self::Closed)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connected => write!(f, "Connected"),
            Self::Reconnecting => write!(f, "Reconnecting"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

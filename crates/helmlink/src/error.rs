//! Unified error type for the Helmlink framework.

use helmlink_procedure::ProcedureError;
use helmlink_protocol::ProtocolError;
use helmlink_session::SessionError;
use helmlink_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `helmlink` meta-crate, you deal with this single
/// error type instead of importing errors from each sub-crate.
#[derive(Debug, thiserror::Error)]
pub enum HelmlinkError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid frame).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A procedure-level error (router construction, dispatch).
    #[error(transparent)]
    Procedure(#[from] ProcedureError),

    /// A session-level error (lifecycle, outbound channel).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Binding or serving the HTTP endpoints failed.
    #[error("http server error: {0}")]
    Http(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let wrapped: HelmlinkError = err.into();
        assert!(matches!(wrapped, HelmlinkError::Transport(_)));
        assert!(wrapped.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidFrame("bad".into());
        let wrapped: HelmlinkError = err.into();
        assert!(matches!(wrapped, HelmlinkError::Protocol(_)));
    }

    #[test]
    fn test_from_procedure_error() {
        let err = ProcedureError::failed("boom");
        let wrapped: HelmlinkError = err.into();
        assert!(matches!(wrapped, HelmlinkError::Procedure(_)));
    }
}

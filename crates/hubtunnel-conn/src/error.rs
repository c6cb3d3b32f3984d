use std::time::Duration;

use crate::state::ConnectionState;

/// Errors that can occur in hub connection operations.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] hubtunnel_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] hubtunnel_frame::FrameError),

    /// The hub rejected the handshake or answered with garbage.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The handshake did not complete in time.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// The operation is not allowed in the current lifecycle state.
    #[error("cannot {operation} while the connection is {state}")]
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },

    /// The connection has been disposed.
    #[error("connection has been disposed")]
    Disposed,

    /// The caller cancelled the operation.
    #[error("operation was canceled")]
    Canceled,

    /// The connection closed while the operation was pending.
    #[error("connection closed: {}", .0.as_deref().unwrap_or("no error reported"))]
    Closed(Option<String>),

    /// The remote method failed.
    #[error("hub method failed: {0}")]
    Hub(String),

    /// A local subscription handler failed to process an invocation.
    #[error("handler for '{target}' failed: {reason}")]
    Dispatch { target: String, reason: String },

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ConnectionError>;

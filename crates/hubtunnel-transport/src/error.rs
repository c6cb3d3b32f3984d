use std::path::PathBuf;

/// Errors that can occur while establishing or using a tunnel transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind a pipe listener to the specified path.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the specified endpoint.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The URL could not be parsed or names an unsupported scheme.
    #[error("invalid transport url {url:?}: {reason}")]
    Url { url: String, reason: String },

    /// The websocket upgrade or the websocket stream failed.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// The access token provider failed to produce a token.
    #[error("access token provider failed: {0}")]
    AccessToken(String),

    /// The requested transport is not available on this platform.
    #[error("unsupported transport: {0}")]
    Unsupported(String),

    /// A one-shot connector was asked for a second stream.
    #[error("transport stream already consumed")]
    Consumed,
}

pub type Result<T> = std::result::Result<T, TransportError>;

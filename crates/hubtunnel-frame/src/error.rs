/// Errors that can occur during hub message framing and encoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The varint length prefix is malformed (over-long, padded, or out of range).
    #[error("invalid length prefix: {0}")]
    InvalidLengthPrefix(&'static str),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The frame body is not a valid hub message.
    #[error("invalid message payload: {0}")]
    InvalidPayload(String),

    /// The message kind cannot be written by this codec.
    #[error("encoding {0} messages is not supported")]
    UnsupportedMessage(&'static str),

    /// A handshake record was not valid.
    #[error("invalid handshake record: {0}")]
    InvalidRecord(String),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;

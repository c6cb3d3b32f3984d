use std::fmt;
use std::io;

use hubtunnel_conn::ConnectionError;
use hubtunnel_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const USAGE: i32 = 2;
pub const CONNECT: i32 = 3;
pub const TIMEOUT: i32 = 4;
pub const REMOTE: i32 = 5;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::NotFound
        | io::ErrorKind::PermissionDenied => CONNECT,
        _ => FAILURE,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Url { .. } | TransportError::PathTooLong { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        TransportError::Io(source) => io_error(context, source),
        other => CliError::new(CONNECT, format!("{context}: {other}")),
    }
}

pub fn connection_error(context: &str, err: ConnectionError) -> CliError {
    match err {
        ConnectionError::Transport(err) => transport_error(context, err),
        ConnectionError::Handshake(_) => CliError::new(CONNECT, format!("{context}: {err}")),
        ConnectionError::HandshakeTimeout(_) => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        ConnectionError::Hub(_) => CliError::new(REMOTE, format!("{context}: {err}")),
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_errors_are_remote_failures() {
        let err = connection_error("invoke failed", ConnectionError::Hub("boom".to_string()));
        assert_eq!(err.code, REMOTE);
        assert_eq!(err.message, "invoke failed: hub method failed: boom");
    }

    #[test]
    fn refused_connects_map_to_connect() {
        let err = transport_error(
            "connect failed",
            TransportError::Connect {
                endpoint: "pipe".to_string(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            },
        );
        assert_eq!(err.code, CONNECT);
    }
}

use std::fmt;

use crate::error::{ConnectionError, Result};

/// Lifecycle of a hub connection.
///
/// ```text
/// Created ──start──▶ Starting ──▶ Started ──stop──▶ Stopping ──▶ Stopped
///                        │           │  ▲                          │
///                        │     lost  ▼  │ reconnected              │
///                        │       Reconnecting ─exhausted─▶ Stopped │
///                        └────────── failed ──────────────▶ Stopped ◀┘ (start again)
///
/// any state ──dispose──▶ Disposing ──▶ Disposed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ConnectionState {
    Created = 0,
    Starting = 1,
    Started = 2,
    Reconnecting = 3,
    Stopping = 4,
    Stopped = 5,
    Disposing = 6,
    Disposed = 7,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Reconnecting => "reconnecting",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Disposing => "disposing",
            Self::Disposed => "disposed",
        }
    }

    pub fn is_disposed(self) -> bool {
        matches!(self, Self::Disposing | Self::Disposed)
    }

    /// Reject everything once disposal has begun.
    pub(crate) fn ensure_live(self) -> Result<()> {
        if self.is_disposed() {
            Err(ConnectionError::Disposed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn ensure_startable(self) -> Result<()> {
        self.ensure_live()?;
        match self {
            Self::Created | Self::Stopped => Ok(()),
            state => Err(ConnectionError::InvalidState {
                operation: "start",
                state,
            }),
        }
    }

    /// Invoke, send and subscribe need a running connection.
    pub(crate) fn ensure_started(self, operation: &'static str) -> Result<()> {
        self.ensure_live()?;
        match self {
            Self::Started => Ok(()),
            state => Err(ConnectionError::InvalidState { operation, state }),
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_only_from_created_or_stopped() {
        assert!(ConnectionState::Created.ensure_startable().is_ok());
        assert!(ConnectionState::Stopped.ensure_startable().is_ok());
        for state in [
            ConnectionState::Starting,
            ConnectionState::Started,
            ConnectionState::Reconnecting,
            ConnectionState::Stopping,
        ] {
            assert!(matches!(
                state.ensure_startable(),
                Err(ConnectionError::InvalidState {
                    operation: "start",
                    ..
                })
            ));
        }
    }

    #[test]
    fn disposed_states_reject_with_disposed() {
        for state in [ConnectionState::Disposing, ConnectionState::Disposed] {
            assert!(matches!(state.ensure_startable(), Err(ConnectionError::Disposed)));
            assert!(matches!(state.ensure_started("send"), Err(ConnectionError::Disposed)));
        }
    }

    #[test]
    fn invalid_state_message_names_operation() {
        let err = ConnectionState::Stopped.ensure_started("invoke").unwrap_err();
        assert_eq!(err.to_string(), "cannot invoke while the connection is stopped");
    }
}

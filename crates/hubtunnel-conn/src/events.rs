use crate::ack::PendingAck;

/// Lifecycle notifications.
///
/// Each callback returns a [`PendingAck`]; the connection waits for it
/// before moving on. All methods default to an immediate acknowledgement.
pub trait ConnectionEvents: Send + Sync {
    /// The connection stopped. `error` is `None` for a requested stop.
    fn closed(&self, error: Option<&str>) -> PendingAck {
        let _ = error;
        PendingAck::ready()
    }

    /// The connection was lost and reconnect attempts are starting.
    fn reconnecting(&self, error: Option<&str>) -> PendingAck {
        let _ = error;
        PendingAck::ready()
    }

    /// A reconnect attempt succeeded.
    fn reconnected(&self) -> PendingAck {
        PendingAck::ready()
    }
}

/// Ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEvents;

impl ConnectionEvents for NoEvents {}

use tokio::sync::oneshot;

/// Completion signal for work handed to a handler or event sink.
///
/// The connection awaits the [`PendingAck`] before dispatching the next
/// message (or continuing its reconnect state machine), so a slow handler
/// applies backpressure instead of racing the connection.
pub fn ack_pair() -> (Acknowledger, PendingAck) {
    let (tx, rx) = oneshot::channel();
    (Acknowledger(tx), PendingAck(Inner::Waiting(rx)))
}

/// Sending half: consumed on use, so it can signal at most once.
#[derive(Debug)]
pub struct Acknowledger(oneshot::Sender<Result<(), String>>);

impl Acknowledger {
    /// Report that processing finished.
    pub fn ack(self) {
        let _ = self.0.send(Ok(()));
    }

    /// Report that processing failed.
    pub fn fail(self, reason: impl Into<String>) {
        let _ = self.0.send(Err(reason.into()));
    }
}

#[derive(Debug)]
pub struct PendingAck(Inner);

#[derive(Debug)]
enum Inner {
    Ready(Result<(), String>),
    Waiting(oneshot::Receiver<Result<(), String>>),
}

impl PendingAck {
    /// An acknowledgement that has already arrived.
    pub fn ready() -> Self {
        Self(Inner::Ready(Ok(())))
    }

    /// A failure known up front.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self(Inner::Ready(Err(reason.into())))
    }

    /// Wait for the acknowledgement.
    ///
    /// Dropping the [`Acknowledger`] without signalling counts as a failure.
    pub async fn wait(self) -> Result<(), String> {
        match self.0 {
            Inner::Ready(result) => result,
            Inner::Waiting(rx) => rx
                .await
                .unwrap_or_else(|_| Err("acknowledgement was dropped".to_string())),
        }
    }
}

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Result, TransportError};
use crate::stream::TunnelStream;

/// Produces a fresh connected stream each time a connection (re)starts.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new duplex stream to the hub.
    async fn connect(&self) -> Result<TunnelStream>;

    /// Short description of the endpoint for logs.
    fn describe(&self) -> String;
}

/// A connector over a stream that is already connected.
///
/// The stream is handed out once. Restarting a connection built on a
/// `StreamConnector` fails with [`TransportError::Consumed`].
pub struct StreamConnector {
    stream: Mutex<Option<TunnelStream>>,
    description: String,
}

impl StreamConnector {
    pub fn new(stream: TunnelStream) -> Self {
        let description = format!("{}:{}", stream.transport_name(), stream.peer());
        Self {
            stream: Mutex::new(Some(stream)),
            description,
        }
    }
}

#[async_trait]
impl Connector for StreamConnector {
    async fn connect(&self) -> Result<TunnelStream> {
        self.stream.lock().await.take().ok_or(TransportError::Consumed)
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stream_connector_hands_out_stream_once() {
        let (client, _server) = TunnelStream::pair(64);
        let connector = StreamConnector::new(client);
        assert_eq!(connector.describe(), "memory:memory:client");

        let stream = connector.connect().await.unwrap();
        assert_eq!(stream.peer(), "memory:client");

        let err = connector.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::Consumed));
    }
}

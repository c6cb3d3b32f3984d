use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::connector::Connector;
use crate::error::{Result, TransportError};
use crate::pipe::{NamedPipeConnector, LOCAL_SERVER};
use crate::stream::TunnelStream;
use crate::websocket;

/// Supplies a bearer token before each websocket connect.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// Return the token to send, or `None` to connect anonymously.
    async fn access_token(&self) -> Result<Option<String>>;
}

/// A fixed token.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(<redacted>)")
    }
}

#[async_trait]
impl AccessTokenProvider for StaticToken {
    async fn access_token(&self) -> Result<Option<String>> {
        Ok(Some(self.0.clone()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    Tcp,
    Unix,
    Pipe,
    WebSocket,
}

/// Connects to a URL-addressed hub.
///
/// Supported schemes:
/// - `tcp://host:port`
/// - `unix:///path/to/socket`
/// - `pipe://server/name` (`pipe:///name` for the local machine)
/// - `ws://`, `wss://` (and `http://`, `https://`, rewritten to websockets)
pub struct UrlConnector {
    url: Url,
    scheme: Scheme,
    token_provider: Option<Arc<dyn AccessTokenProvider>>,
}

impl UrlConnector {
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = |reason: String| TransportError::Url {
            url: url.to_string(),
            reason,
        };
        let mut parsed = Url::parse(url).map_err(|err| invalid(err.to_string()))?;

        let scheme = match parsed.scheme() {
            "tcp" => Scheme::Tcp,
            "unix" => Scheme::Unix,
            "pipe" => Scheme::Pipe,
            "ws" | "wss" => Scheme::WebSocket,
            "http" | "https" => {
                let rewritten = if parsed.scheme() == "http" { "ws" } else { "wss" };
                parsed
                    .set_scheme(rewritten)
                    .map_err(|()| invalid("cannot rewrite scheme".to_string()))?;
                Scheme::WebSocket
            }
            other => return Err(invalid(format!("unsupported scheme {other:?}"))),
        };

        match scheme {
            Scheme::Tcp if parsed.host_str().is_none() || parsed.port().is_none() => {
                return Err(invalid("tcp urls need a host and a port".to_string()));
            }
            Scheme::Unix | Scheme::Pipe if parsed.path().trim_matches('/').is_empty() => {
                return Err(invalid("missing socket path".to_string()));
            }
            _ => {}
        }

        Ok(Self {
            url: parsed,
            scheme,
            token_provider: None,
        })
    }

    /// Attach a token provider, consulted on every websocket connect.
    pub fn with_access_token_provider(mut self, provider: Arc<dyn AccessTokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn access_token(&self) -> Result<Option<String>> {
        match &self.token_provider {
            Some(provider) => provider.access_token().await,
            None => Ok(None),
        }
    }

    fn pipe_connector(&self) -> Result<NamedPipeConnector> {
        let server = match self.url.host_str() {
            Some(host) if !host.is_empty() => host,
            _ => LOCAL_SERVER,
        };
        NamedPipeConnector::new(self.url.path().trim_start_matches('/'), server)
    }
}

#[async_trait]
impl Connector for UrlConnector {
    async fn connect(&self) -> Result<TunnelStream> {
        match self.scheme {
            Scheme::Tcp => {
                let host = self.url.host_str().unwrap_or_default();
                let port = self.url.port().unwrap_or_default();
                let stream = tokio::net::TcpStream::connect((host, port))
                    .await
                    .map_err(|source| TransportError::Connect {
                        endpoint: format!("{host}:{port}"),
                        source,
                    })?;
                stream.set_nodelay(true)?;
                debug!(%host, port, "connected over tcp");
                Ok(TunnelStream::from_tcp(stream, format!("tcp:{host}:{port}")))
            }
            #[cfg(unix)]
            Scheme::Unix => {
                let path = self.url.path();
                let stream = tokio::net::UnixStream::connect(path).await.map_err(|source| {
                    TransportError::Connect {
                        endpoint: path.to_string(),
                        source,
                    }
                })?;
                debug!(%path, "connected over unix socket");
                Ok(TunnelStream::from_unix(stream, format!("unix:{path}")))
            }
            #[cfg(not(unix))]
            Scheme::Unix => Err(TransportError::Unsupported(
                "unix sockets on this platform".to_string(),
            )),
            Scheme::Pipe => self.pipe_connector()?.connect().await,
            Scheme::WebSocket => {
                let token = self.access_token().await?;
                websocket::connect(&self.url, token).await
            }
        }
    }

    fn describe(&self) -> String {
        let mut shown = self.url.clone();
        let _ = shown.set_password(None);
        shown.to_string()
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[test]
    fn parse_rejects_unknown_scheme() {
        let err = UrlConnector::parse("ftp://example.com/hub").err().unwrap();
        assert!(matches!(err, TransportError::Url { .. }));
    }

    #[test]
    fn parse_requires_tcp_port() {
        assert!(UrlConnector::parse("tcp://localhost").is_err());
        assert!(UrlConnector::parse("tcp://localhost:5000").is_ok());
    }

    #[test]
    fn http_is_rewritten_to_websocket() {
        let connector = UrlConnector::parse("https://example.com/hub").unwrap();
        assert_eq!(connector.url().scheme(), "wss");
        assert_eq!(connector.scheme, Scheme::WebSocket);
    }

    #[test]
    fn pipe_urls_default_to_local_server() {
        let connector = UrlConnector::parse("pipe:///orders").unwrap();
        let pipe = connector.pipe_connector().unwrap();
        assert_eq!(pipe.pipe_name(), "orders");
        assert_eq!(pipe.server_name(), ".");
    }

    #[test]
    fn describe_hides_password() {
        let connector = UrlConnector::parse("ws://user:secret@localhost:5000/hub").unwrap();
        assert!(!connector.describe().contains("secret"));
    }

    #[tokio::test]
    async fn static_token_is_returned() {
        let connector = UrlConnector::parse("ws://localhost:5000/hub")
            .unwrap()
            .with_access_token_provider(Arc::new(StaticToken::new("abc")));
        assert_eq!(connector.access_token().await.unwrap().as_deref(), Some("abc"));
        assert_eq!(format!("{:?}", StaticToken::new("abc")), "StaticToken(<redacted>)");
    }

    #[tokio::test]
    async fn tcp_connect_round_trip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 3];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let connector = UrlConnector::parse(&format!("tcp://{addr}")).unwrap();
        let mut stream = connector.connect().await.unwrap();
        assert_eq!(stream.transport_name(), "tcp");
        stream.write_all(b"hub").await.unwrap();

        assert_eq!(&server.await.unwrap(), b"hub");
    }
}

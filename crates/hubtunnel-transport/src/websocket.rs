use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

use crate::error::{Result, TransportError};
use crate::stream::TunnelStream;

/// Buffer between the websocket pump and the byte-stream side.
const PUMP_BUFFER_SIZE: usize = 64 * 1024;
const READ_CHUNK_SIZE: usize = 4 * 1024;

type ClientSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Open a websocket and expose it as a byte stream.
///
/// Outgoing bytes become binary websocket messages; incoming binary messages
/// are concatenated back into the byte stream. A spawned pump task owns the
/// socket until either side closes.
pub(crate) async fn connect(url: &Url, access_token: Option<String>) -> Result<TunnelStream> {
    if url.scheme() == "wss" {
        install_crypto_provider();
    }

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|err| TransportError::WebSocket(err.to_string()))?;

    if let Some(token) = access_token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|err| TransportError::AccessToken(err.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    let (socket, response) =
        connect_async(request)
            .await
            .map_err(|err| TransportError::Connect {
                endpoint: url.to_string(),
                source: std::io::Error::other(err),
            })?;
    debug!(%url, status = %response.status(), "websocket connected");

    let (local, remote) = tokio::io::duplex(PUMP_BUFFER_SIZE);
    tokio::spawn(pump(socket, remote, url.to_string()));
    Ok(TunnelStream::from_duplex(local, url.to_string()))
}

/// Make ring the process default unless the host installed a provider.
fn install_crypto_provider() {
    if rustls::crypto::CryptoProvider::get_default().is_none() {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
}

async fn pump(socket: ClientSocket, bytes: DuplexStream, endpoint: String) {
    let (mut sink, mut source) = socket.split();
    let (mut reader, mut writer) = tokio::io::split(bytes);
    let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);

    loop {
        buf.reserve(READ_CHUNK_SIZE);
        tokio::select! {
            incoming = source.next() => match incoming {
                Some(Ok(Message::Binary(data))) => {
                    if writer.write_all(&data).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(%endpoint, ?frame, "websocket closed by peer");
                    break;
                }
                Some(Ok(other)) => trace!(%endpoint, kind = ?other, "ignoring websocket message"),
                Some(Err(err)) => {
                    debug!(%endpoint, %err, "websocket receive failed");
                    break;
                }
                None => break,
            },
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) | Err(_) => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                Ok(_) => {
                    let chunk = buf.split().freeze();
                    if let Err(err) = sink.send(Message::Binary(chunk)).await {
                        debug!(%endpoint, %err, "websocket send failed");
                        break;
                    }
                }
            },
        }
    }

    let _ = writer.shutdown().await;
    debug!(%endpoint, "websocket pump finished");
}

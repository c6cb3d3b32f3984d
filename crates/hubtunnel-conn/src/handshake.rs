use std::time::Duration;

use hubtunnel_frame::{FrameReader, FrameWriter};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::error::{ConnectionError, Result};

/// Hub protocol spoken after the handshake.
pub const PROTOCOL_NAME: &str = "messagepack";
pub const PROTOCOL_VERSION: u32 = 1;

const MAX_PROTOCOL_LEN: usize = 32;

/// Client handshake request, sent as one JSON record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub protocol: String,
    pub version: u32,
}

/// Server handshake response. An empty object accepts the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Configuration for handshake negotiation.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Upper bound for the whole exchange.
    pub timeout: Duration,
    pub protocol_name: String,
    pub protocol_version: u32,
    /// Maximum handshake record size in bytes, separator excluded.
    pub max_record_len: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            protocol_name: PROTOCOL_NAME.to_string(),
            protocol_version: PROTOCOL_VERSION,
            max_record_len: 16 * 1024,
        }
    }
}

/// Perform the client side of the handshake.
pub async fn handshake_client<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    config: &HandshakeConfig,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    validate_protocol_name(&config.protocol_name)?;

    let exchange = async {
        let request = HandshakeRequest {
            protocol: config.protocol_name.clone(),
            version: config.protocol_version,
        };
        writer.write_record(&serde_json::to_vec(&request)?).await?;

        let record = reader.read_record(config.max_record_len).await?;
        let response: HandshakeResponse = serde_json::from_slice(&record).map_err(|err| {
            ConnectionError::Handshake(format!("malformed handshake response: {err}"))
        })?;
        match response.error {
            Some(error) => Err(ConnectionError::Handshake(error)),
            None => Ok(()),
        }
    };

    tokio::time::timeout(config.timeout, exchange)
        .await
        .map_err(|_| ConnectionError::HandshakeTimeout(config.timeout))??;
    debug!(protocol = %config.protocol_name, version = config.protocol_version, "handshake complete");
    Ok(())
}

/// Perform the server side of the handshake.
///
/// A request for a different protocol or version is answered with an error
/// record before this returns `Err`.
pub async fn handshake_server<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    config: &HandshakeConfig,
) -> Result<HandshakeRequest>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let exchange = async {
        let record = reader.read_record(config.max_record_len).await?;
        let request: HandshakeRequest = match serde_json::from_slice(&record) {
            Ok(request) => request,
            Err(err) => {
                let reason = format!("malformed handshake request: {err}");
                send_response(writer, Some(reason.clone())).await?;
                return Err(ConnectionError::Handshake(reason));
            }
        };

        let rejection = if request.protocol != config.protocol_name {
            Some(format!(
                "The protocol '{}' is not supported.",
                request.protocol
            ))
        } else if request.version != config.protocol_version {
            Some(format!(
                "The server does not support version {} of the '{}' protocol.",
                request.version, request.protocol
            ))
        } else {
            None
        };

        send_response(writer, rejection.clone()).await?;
        match rejection {
            Some(reason) => Err(ConnectionError::Handshake(reason)),
            None => Ok(request),
        }
    };

    tokio::time::timeout(config.timeout, exchange)
        .await
        .map_err(|_| ConnectionError::HandshakeTimeout(config.timeout))?
}

async fn send_response<W: AsyncWrite + Unpin>(
    writer: &mut FrameWriter<W>,
    error: Option<String>,
) -> Result<()> {
    let payload = serde_json::to_vec(&HandshakeResponse { error })?;
    writer.write_record(&payload).await?;
    Ok(())
}

fn validate_protocol_name(protocol: &str) -> Result<()> {
    if protocol.is_empty() || protocol.len() > MAX_PROTOCOL_LEN {
        return Err(ConnectionError::Handshake(format!(
            "invalid protocol name length: {}",
            protocol.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use hubtunnel_frame::{FrameError, HubMessage};
    use tokio::io::{
        duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf,
        WriteHalf,
    };

    use super::*;

    type Reader = FrameReader<ReadHalf<DuplexStream>>;
    type Writer = FrameWriter<WriteHalf<DuplexStream>>;

    fn endpoints() -> ((Reader, Writer), (Reader, Writer)) {
        let (a, b) = duplex(4096);
        let (ar, aw) = split(a);
        let (br, bw) = split(b);
        (
            (FrameReader::new(ar), FrameWriter::new(aw)),
            (FrameReader::new(br), FrameWriter::new(bw)),
        )
    }

    /// Read the client's request record, separator included.
    async fn read_request(server: &mut DuplexStream) -> Vec<u8> {
        let mut record = Vec::new();
        BufReader::new(server).read_until(0x1E, &mut record).await.unwrap();
        record
    }

    #[tokio::test]
    async fn successful_handshake() {
        let ((mut cr, mut cw), (mut sr, mut sw)) = endpoints();
        let config = HandshakeConfig::default();

        let server_config = config.clone();
        let server =
            tokio::spawn(async move { handshake_server(&mut sr, &mut sw, &server_config).await });

        handshake_client(&mut cr, &mut cw, &config).await.unwrap();
        let request = server.await.unwrap().unwrap();
        assert_eq!(request.protocol, "messagepack");
        assert_eq!(request.version, 1);
    }

    #[tokio::test]
    async fn wire_records_are_separator_terminated_json() {
        let (client, mut server) = duplex(4096);
        let (cr, cw) = split(client);
        let mut reader = FrameReader::new(cr);
        let mut writer = FrameWriter::new(cw);

        let peer = tokio::spawn(async move {
            let sent = read_request(&mut server).await;
            server.write_all(b"{}\x1e").await.unwrap();
            sent
        });

        handshake_client(&mut reader, &mut writer, &HandshakeConfig::default())
            .await
            .unwrap();
        let sent = peer.await.unwrap();
        assert_eq!(sent, b"{\"protocol\":\"messagepack\",\"version\":1}\x1e");
    }

    #[tokio::test]
    async fn error_response_is_reported() {
        let ((mut cr, mut cw), (mut sr, mut sw)) = endpoints();
        let client_config = HandshakeConfig {
            protocol_name: "json".to_string(),
            ..HandshakeConfig::default()
        };

        let server = tokio::spawn(async move {
            handshake_server(&mut sr, &mut sw, &HandshakeConfig::default()).await
        });

        let err = handshake_client(&mut cr, &mut cw, &client_config)
            .await
            .unwrap_err();
        match err {
            ConnectionError::Handshake(reason) => {
                assert_eq!(reason, "The protocol 'json' is not supported.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(server.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn version_mismatch_rejected() {
        let ((mut cr, mut cw), (mut sr, mut sw)) = endpoints();
        let client_config = HandshakeConfig {
            protocol_version: 2,
            ..HandshakeConfig::default()
        };

        let server = tokio::spawn(async move {
            handshake_server(&mut sr, &mut sw, &HandshakeConfig::default()).await
        });

        let err = handshake_client(&mut cr, &mut cw, &client_config)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Handshake(reason) if reason.contains("version 2")));
        assert!(server.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn invalid_json_rejected() {
        let (client, mut server) = duplex(4096);
        let (cr, cw) = split(client);
        let mut reader = FrameReader::new(cr);
        let mut writer = FrameWriter::new(cw);

        tokio::spawn(async move {
            read_request(&mut server).await;
            server.write_all(b"not json\x1e").await.unwrap();
            server
        });

        let err = handshake_client(&mut reader, &mut writer, &HandshakeConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Handshake(reason) if reason.contains("malformed")));
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_timeout() {
        let ((mut cr, mut cw), (_sr, _sw)) = endpoints();
        let config = HandshakeConfig {
            timeout: Duration::from_millis(50),
            ..HandshakeConfig::default()
        };

        let err = handshake_client(&mut cr, &mut cw, &config).await.unwrap_err();
        assert!(matches!(err, ConnectionError::HandshakeTimeout(t) if t == Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn peer_hangup_during_handshake() {
        let (client, server) = duplex(4096);
        let (cr, cw) = split(client);
        let mut reader = FrameReader::new(cr);
        let mut writer = FrameWriter::new(cw);
        drop(server);

        let err = handshake_client(&mut reader, &mut writer, &HandshakeConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Frame(FrameError::ConnectionClosed | FrameError::Io(_))
        ));
    }

    #[tokio::test]
    async fn frames_after_response_stay_buffered() {
        let (client, mut server) = duplex(4096);
        let (cr, cw) = split(client);
        let mut reader = FrameReader::new(cr);
        let mut writer = FrameWriter::new(cw);

        tokio::spawn(async move {
            read_request(&mut server).await;
            // response and a ping frame in one write
            server.write_all(b"{}\x1e\x01\x91\x06").await.unwrap();
            server
        });

        handshake_client(&mut reader, &mut writer, &HandshakeConfig::default())
            .await
            .unwrap();
        assert_eq!(reader.read_message().await.unwrap(), HubMessage::Ping);
    }

    #[test]
    fn rejects_empty_protocol_name() {
        assert!(validate_protocol_name("").is_err());
        assert!(validate_protocol_name(&"x".repeat(33)).is_err());
        assert!(validate_protocol_name("messagepack").is_ok());
    }
}

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

use crate::codec::{decode_payload, peek_frame, FrameConfig, Payload};
use crate::error::{FrameError, Result};
use crate::message::HubMessage;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Separator terminating each handshake record.
pub const RECORD_SEPARATOR: u8 = 0x1E;

/// Reads complete hub messages from any `AsyncRead` stream.
///
/// Handles partial reads internally. Frames of kinds this side does not
/// handle are consumed and skipped, so callers only ever see messages.
/// `read_message` is cancel safe: bytes already read stay buffered.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: AsyncRead + Unpin> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete message.
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub async fn read_message(&mut self) -> Result<HubMessage> {
        loop {
            while let Some(prefix) = peek_frame(&self.buf, self.config.max_payload_size)? {
                let mut frame = self.buf.split_to(prefix.frame_len()).freeze();
                frame.advance(prefix.prefix_len);
                match decode_payload(&frame)? {
                    Payload::Message(message) => {
                        trace!(kind = message.kind().name(), len = frame.len(), "decoded frame");
                        return Ok(message);
                    }
                    Payload::Unsupported(kind) => {
                        debug!(kind, len = frame.len(), "dropped unsupported frame");
                    }
                }
            }

            self.fill().await?;
        }
    }

    /// Read one `0x1E`-terminated record, returning it without the separator.
    ///
    /// Bytes after the separator stay buffered for [`read_message`](Self::read_message).
    pub async fn read_record(&mut self, max_len: usize) -> Result<Bytes> {
        loop {
            if let Some(end) = self.buf.iter().position(|&b| b == RECORD_SEPARATOR) {
                let record = self.buf.split_to(end).freeze();
                self.buf.advance(1);
                return Ok(record);
            }
            if self.buf.len() > max_len {
                return Err(FrameError::InvalidRecord(format!(
                    "no record separator within {max_len} bytes"
                )));
            }

            self.fill().await?;
        }
    }

    async fn fill(&mut self) -> Result<()> {
        self.buf.reserve(READ_CHUNK_SIZE);
        let read = self.inner.read_buf(&mut self.buf).await?;
        if read == 0 {
            return Err(FrameError::ConnectionClosed);
        }
        Ok(())
    }

    /// Bytes received but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum payload size for subsequent frame decoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use bytes::BytesMut;
    use tokio::io::{AsyncWriteExt, ReadBuf};

    use super::*;
    use crate::codec::encode_message;
    use crate::message::{CloseMessage, InvocationMessage};

    fn wire(messages: &[HubMessage]) -> Vec<u8> {
        let mut out = BytesMut::new();
        for message in messages {
            encode_message(message, &mut out).unwrap();
        }
        out.to_vec()
    }

    /// Yields one byte per poll.
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl AsyncRead for ByteByByteReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if self.pos < self.bytes.len() && buf.remaining() > 0 {
                let byte = self.bytes[self.pos];
                buf.put_slice(&[byte]);
                self.pos += 1;
            }
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn read_multiple_messages() {
        let messages = vec![
            HubMessage::Ping,
            HubMessage::Invocation(InvocationMessage::new("Notify", vec![0x91, 0x01])),
            HubMessage::Close(CloseMessage::default()),
        ];
        let bytes = wire(&messages);
        let mut reader = FrameReader::new(&bytes[..]);

        for expected in &messages {
            assert_eq!(&reader.read_message().await.unwrap(), expected);
        }
        assert!(matches!(
            reader.read_message().await,
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn partial_read_handling() {
        let message = HubMessage::Invocation(
            InvocationMessage::new("Slow", vec![0x91, 0xA4, b's', b'l', b'o', b'w'])
                .with_invocation_id("3"),
        );
        let mut reader = FrameReader::new(ByteByByteReader {
            bytes: wire(std::slice::from_ref(&message)),
            pos: 0,
        });
        assert_eq!(reader.read_message().await.unwrap(), message);
    }

    #[tokio::test]
    async fn unsupported_frames_are_skipped() {
        let mut bytes = vec![0x02, 0x91, 0x63];
        bytes.extend(wire(&[HubMessage::Ping]));
        let mut reader = FrameReader::new(&bytes[..]);
        assert_eq!(reader.read_message().await.unwrap(), HubMessage::Ping);
        assert_eq!(reader.buffered(), 0);
    }

    #[tokio::test]
    async fn connection_closed_mid_frame() {
        let bytes = wire(&[HubMessage::Ping]);
        let mut reader = FrameReader::new(&bytes[..bytes.len() - 1]);
        assert!(matches!(
            reader.read_message().await,
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let large = HubMessage::Invocation(InvocationMessage::new("Big", vec![0x90; 256]));
        let bytes = wire(&[large]);
        let mut reader = FrameReader::new(&bytes[..]);
        reader.set_max_payload_size(64);
        assert!(matches!(
            reader.read_message().await,
            Err(FrameError::PayloadTooLarge { max: 64, .. })
        ));
    }

    #[tokio::test]
    async fn record_then_frames_share_buffer() {
        let (mut tx, rx) = tokio::io::duplex(256);
        let mut payload = b"{}".to_vec();
        payload.push(RECORD_SEPARATOR);
        payload.extend(wire(&[HubMessage::Ping]));
        tx.write_all(&payload).await.unwrap();

        let mut reader = FrameReader::new(rx);
        assert_eq!(reader.read_record(1024).await.unwrap().as_ref(), b"{}");
        assert_eq!(reader.read_message().await.unwrap(), HubMessage::Ping);
    }

    #[tokio::test]
    async fn record_without_separator_is_bounded() {
        let bytes = vec![b'x'; 64];
        let mut reader = FrameReader::new(&bytes[..]);
        assert!(matches!(
            reader.read_record(16).await,
            Err(FrameError::InvalidRecord(_))
        ));
    }
}

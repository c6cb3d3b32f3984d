use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::codec::{encode_payload, FrameConfig};
use crate::error::{FrameError, Result};
use crate::message::HubMessage;
use crate::reader::RECORD_SEPARATOR;
use crate::varint::{write_length_prefix, MAX_PREFIX_LEN};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Largest single write handed to the underlying stream.
pub const WRITE_CHUNK_SIZE: usize = 4 * 1024;

/// Writes complete hub messages to any `AsyncWrite` stream.
///
/// Each message is serialized into a reusable scratch buffer, then the
/// length prefix and the scratch contents are written in chunks of at most
/// [`WRITE_CHUNK_SIZE`] bytes.
pub struct FrameWriter<T> {
    inner: T,
    scratch: Vec<u8>,
    config: FrameConfig,
}

impl<T: AsyncWrite + Unpin> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            scratch: Vec::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode and write one message, then flush.
    ///
    /// Not cancel safe: dropping the future midway can leave a partial frame
    /// on the stream. Callers serialize writes and let them run to completion.
    pub async fn write_message(&mut self, message: &HubMessage) -> Result<()> {
        self.scratch.clear();
        encode_payload(message, &mut self.scratch)?;

        if self.scratch.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: self.scratch.len(),
                max: self.config.max_payload_size,
            });
        }

        let mut prefix = [0u8; MAX_PREFIX_LEN];
        let used = write_length_prefix(self.scratch.len(), &mut prefix)?;
        self.inner.write_all(&prefix[..used]).await?;
        for chunk in self.scratch.chunks(WRITE_CHUNK_SIZE) {
            self.inner.write_all(chunk).await?;
        }
        self.inner.flush().await?;

        trace!(
            kind = message.kind().name(),
            len = used + self.scratch.len(),
            "wrote frame"
        );
        Ok(())
    }

    /// Write one `0x1E`-terminated record, then flush.
    pub async fn write_record(&mut self, record: &[u8]) -> Result<()> {
        self.inner.write_all(record).await?;
        self.inner.write_all(&[RECORD_SEPARATOR]).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Flush and shut down the write side of the stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum payload size for subsequent frame encoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::Decoder;

use crate::codec::{LineCodec, WireConfig};
use crate::error::{Result, WireError};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `AsyncRead` stream.
///
/// Handles partial reads internally: callers always get complete lines.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    codec: LineCodec,
    config: WireConfig,
}

impl<T: AsyncRead + Unpin> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, WireConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: WireConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            codec: LineCodec::new(config.max_frame_size),
            config,
        }
    }

    /// Read the next complete frame.
    ///
    /// Returns `Ok(None)` on a clean end of stream and
    /// `Err(WireError::IncompleteFrame)` when the stream ends mid-line.
    pub async fn read_frame(&mut self) -> Result<Option<Bytes>> {
        match self.config.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.fill_frame())
                .await
                .map_err(|_| WireError::Timeout(limit))?,
            None => self.fill_frame().await,
        }
    }

    async fn fill_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buf)? {
                return Ok(Some(frame));
            }

            self.buf.reserve(READ_CHUNK_SIZE);
            if self.inner.read_buf(&mut self.buf).await? == 0 {
                return self.codec.decode_eof(&mut self.buf);
            }
        }
    }

    /// Read the next frame as UTF-8 text.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        match self.read_frame().await? {
            Some(frame) => String::from_utf8(frame.to_vec())
                .map(Some)
                .map_err(|e| WireError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))),
            None => Ok(None),
        }
    }
}

impl<T> FrameReader<T> {
    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    ///
    /// Bytes already buffered but not yet decoded are lost.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Swap the underlying stream, keeping buffered bytes.
    pub fn map_inner<U>(self, f: impl FnOnce(T) -> U) -> FrameReader<U> {
        FrameReader {
            inner: f(self.inner),
            buf: self.buf,
            codec: self.codec,
            config: self.config,
        }
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &WireConfig {
        &self.config
    }
}

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Encoder;

use crate::codec::{LineCodec, WireConfig};
use crate::error::{Result, WireError};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to any `AsyncWrite` stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    codec: LineCodec,
    config: WireConfig,
}

impl<T: AsyncWrite + Unpin> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, WireConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: WireConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            codec: LineCodec::new(config.max_frame_size),
            config,
        }
    }

    /// Encode a payload as one frame, write it and flush.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        self.buf.clear();
        self.codec.encode(payload, &mut self.buf)?;

        match self.config.write_timeout {
            Some(limit) => tokio::time::timeout(limit, self.write_buffered())
                .await
                .map_err(|_| WireError::Timeout(limit))?,
            None => self.write_buffered().await,
        }
    }

    async fn write_buffered(&mut self) -> Result<()> {
        self.inner.write_all(&self.buf).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Shut down the write side of the stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

impl<T> FrameWriter<T> {
    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Swap the underlying stream.
    pub fn map_inner<U>(self, f: impl FnOnce(T) -> U) -> FrameWriter<U> {
        FrameWriter {
            inner: f(self.inner),
            buf: self.buf,
            codec: self.codec,
            config: self.config,
        }
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &WireConfig {
        &self.config
    }
}

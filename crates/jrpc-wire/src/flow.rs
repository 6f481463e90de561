use std::sync::Arc;

use jrpc_transport::{BoxedStream, Connection, Identity};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::codec::WireConfig;
use crate::conn::Conn;
use crate::error::Result;
use crate::reader::FrameReader;
use crate::serializer::{encode_failure, read_value, write_value, BoxedReader, BoxedWriter, Serializer};
use crate::writer::FrameWriter;

/// Persistent connection: one open stream serving many exchanges.
///
/// Copies share the same stream. Reads and writes are locked separately, so
/// one copy can wait for a frame while another writes. [`Conn::flush`] does
/// nothing; the stream stays open until [`Flow::close`] or the last copy is
/// dropped.
#[derive(Clone)]
pub struct Flow {
    reader: Arc<Mutex<FrameReader<BoxedReader>>>,
    writer: Arc<Mutex<FrameWriter<BoxedWriter>>>,
    remote: Identity,
}

impl Flow {
    pub fn new(stream: BoxedStream, remote: Identity) -> Self {
        Self::from(Serializer::new(stream, remote))
    }

    pub fn with_config(stream: BoxedStream, remote: Identity, config: WireConfig) -> Self {
        Self::from(Serializer::with_config(stream, remote, config))
    }

    pub fn from_connection(conn: Connection, config: WireConfig) -> Self {
        Self::from(Serializer::from_connection(conn, config))
    }

    /// Read one raw text line; `None` at end of stream.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        self.reader.lock().await.read_line().await
    }

    /// Close the write side of the shared stream.
    pub async fn close(&self) -> Result<()> {
        self.writer.lock().await.shutdown().await
    }
}

impl From<Serializer> for Flow {
    fn from(serializer: Serializer) -> Self {
        let (reader, writer, remote) = serializer.into_parts();
        Self {
            reader: Arc::new(Mutex::new(reader)),
            writer: Arc::new(Mutex::new(writer)),
            remote,
        }
    }
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

impl Conn for Flow {
    fn remote_identity(&self) -> Identity {
        self.remote.clone()
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.writer.lock().await.write_frame(line.as_bytes()).await
    }

    async fn encode<T>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        write_value(&mut *self.writer.lock().await, value).await
    }

    async fn encode_error(&mut self, message: &str) -> Result<()> {
        let payload = encode_failure(message)?;
        self.writer.lock().await.write_frame(&payload).await
    }

    async fn decode<T>(&mut self) -> Result<T>
    where
        T: DeserializeOwned + Send,
    {
        read_value(&mut *self.reader.lock().await).await
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn copy(&self) -> Self {
        self.clone()
    }
}

use jrpc_transport::{BoxedStream, Connection, Identity};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::WireConfig;
use crate::error::{Result, WireError};
use crate::logger::WireLogger;
use crate::reader::FrameReader;
use crate::writer::FrameWriter;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Failure frame payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub error: String,
}

/// Serialize a value frame payload.
///
/// Objects with a non-empty string `error` field would read back as
/// failures, so they are refused.
pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    if failure_message(&value).is_some() {
        return Err(WireError::ReservedField);
    }
    Ok(serde_json::to_vec(&value)?)
}

/// Serialize a failure frame payload.
pub fn encode_failure(message: &str) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&Failure {
        error: message.to_string(),
    })?)
}

/// Decode a frame payload, failure shape first.
pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    if let Ok(failure) = serde_json::from_slice::<Failure>(payload) {
        if !failure.error.is_empty() {
            return Err(WireError::Remote(failure.error));
        }
    }
    Ok(serde_json::from_slice(payload)?)
}

fn failure_message(value: &Value) -> Option<&str> {
    value
        .get("error")
        .and_then(Value::as_str)
        .filter(|message| !message.is_empty())
}

/// JSON frame codec over one owned stream.
pub struct Serializer {
    reader: FrameReader<BoxedReader>,
    writer: FrameWriter<BoxedWriter>,
    remote: Identity,
}

impl Serializer {
    pub fn new(stream: BoxedStream, remote: Identity) -> Self {
        Self::with_config(stream, remote, WireConfig::default())
    }

    pub fn with_config(stream: BoxedStream, remote: Identity, config: WireConfig) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            reader: FrameReader::with_config(Box::new(read), config.clone()),
            writer: FrameWriter::with_config(Box::new(write), config),
            remote,
        }
    }

    /// Wrap an accepted or dialed transport connection.
    pub fn from_connection(conn: Connection, config: WireConfig) -> Self {
        Self::with_config(conn.stream, conn.remote, config)
    }

    /// Mirror all traffic to `tracing` under `label`.
    pub fn with_logger(self, label: &str) -> Self {
        Self {
            reader: self
                .reader
                .map_inner(|r| Box::new(WireLogger::new(r, label)) as BoxedReader),
            writer: self
                .writer
                .map_inner(|w| Box::new(WireLogger::new(w, label)) as BoxedWriter),
            remote: self.remote,
        }
    }

    pub fn remote_identity(&self) -> &Identity {
        &self.remote
    }

    /// Write one value frame.
    pub async fn encode<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let payload = encode_value(value)?;
        self.writer.write_frame(&payload).await
    }

    /// Write one failure frame.
    pub async fn encode_error(&mut self, message: &str) -> Result<()> {
        let payload = encode_failure(message)?;
        self.writer.write_frame(&payload).await
    }

    /// Write a raw text line, such as a query.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_frame(line.as_bytes()).await
    }

    /// Read one frame, returning failures as [`WireError::Remote`].
    pub async fn decode<T: DeserializeOwned>(&mut self) -> Result<T> {
        read_value(&mut self.reader).await
    }

    /// Read one raw text line; `None` at end of stream.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        self.reader.read_line().await
    }

    /// Close the write side.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await
    }

    pub fn into_parts(self) -> (FrameReader<BoxedReader>, FrameWriter<BoxedWriter>, Identity) {
        (self.reader, self.writer, self.remote)
    }
}

pub(crate) async fn read_value<T: DeserializeOwned>(
    reader: &mut FrameReader<BoxedReader>,
) -> Result<T> {
    let frame = reader
        .read_frame()
        .await?
        .ok_or(WireError::ConnectionClosed)?;
    decode_payload(&frame)
}

pub(crate) async fn write_value<T: Serialize + ?Sized>(
    writer: &mut FrameWriter<BoxedWriter>,
    value: &T,
) -> Result<()> {
    let payload = encode_value(value)?;
    writer.write_frame(&payload).await
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn pair() -> (Serializer, Serializer) {
        let (a, b) = tokio::io::duplex(4096);
        (
            Serializer::new(Box::new(a), Identity::new("b")),
            Serializer::new(Box::new(b), Identity::new("a")),
        )
    }

    #[tokio::test]
    async fn value_round_trip() {
        let (mut left, mut right) = pair();
        let value = json!({"i": 1, "tags": ["x", "y"], "nested": {"ok": true}});
        left.encode(&value).await.unwrap();
        let decoded: Value = right.decode().await.unwrap();
        assert_eq!(decoded, value);
    }

    #[tokio::test]
    async fn error_round_trip_keeps_message() {
        let (mut left, mut right) = pair();
        left.encode_error("test error 3").await.unwrap();
        let err = right.decode::<Value>().await.unwrap_err();
        assert!(matches!(&err, WireError::Remote(m) if m == "test error 3"));
        assert_eq!(err.to_string(), "test error 3");
    }

    #[tokio::test]
    async fn failure_frame_wins_over_target_type() {
        let (mut left, mut right) = pair();
        left.send_line(r#"{"error":"boom","i":1}"#).await.unwrap();
        let err = right.decode::<Value>().await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn empty_error_field_is_a_value() {
        let (mut left, mut right) = pair();
        left.encode(&json!({"error": ""})).await.unwrap();
        let decoded: Value = right.decode().await.unwrap();
        assert_eq!(decoded, json!({"error": ""}));
    }

    #[test]
    fn reserved_error_field_is_refused() {
        let err = encode_value(&json!({"error": "looks like a failure"})).unwrap_err();
        assert!(matches!(err, WireError::ReservedField));
        assert!(encode_value(&json!({"error": 5})).is_ok());
        assert!(encode_value(&json!(["error"])).is_ok());
    }

    #[tokio::test]
    async fn decode_at_end_of_stream_is_closed() {
        let (left, mut right) = pair();
        drop(left);
        let err = right.decode::<Value>().await.unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn lines_and_values_share_the_stream() {
        let (mut left, mut right) = pair();
        left.send_line("func2 1").await.unwrap();
        left.encode(&json!(1)).await.unwrap();
        assert_eq!(right.read_line().await.unwrap().as_deref(), Some("func2 1"));
        assert_eq!(right.decode::<i64>().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn logger_is_transparent() {
        let (left, mut right) = pair();
        let mut left = left.with_logger("test");
        left.encode(&json!([true, 1, "a"])).await.unwrap();
        let decoded: (bool, i64, String) = right.decode().await.unwrap();
        assert_eq!(decoded, (true, 1, "a".to_string()));
        assert_eq!(left.remote_identity(), &Identity::new("b"));
    }
}

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Result, WireError};

/// Frame terminator.
pub const DELIMITER: u8 = b'\n';

/// Default maximum frame size: 16 MiB.
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

/// Encode one frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────────────────────┬──────┐
/// │ Payload (compact JSON / text)│ "\n" │
/// └──────────────────────────────┴──────┘
/// ```
///
/// The payload itself must not contain a line break.
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.contains(&DELIMITER) {
        return Err(WireError::EmbeddedNewline);
    }
    dst.reserve(payload.len() + 1);
    dst.put_slice(payload);
    dst.put_u8(DELIMITER);
    Ok(())
}

/// Decode one frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete line yet.
/// On success, consumes the line and its terminator from the buffer. A
/// trailing `\r` is stripped.
pub fn decode_frame(src: &mut BytesMut, max_frame_size: usize) -> Result<Option<Bytes>> {
    LineCodec::new(max_frame_size).decode(src)
}

/// `tokio_util` codec for newline-delimited frames.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_frame_size: usize,
    /// Bytes already scanned for a delimiter.
    next_index: usize,
}

impl LineCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            next_index: 0,
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}

impl Decoder for LineCodec {
    type Item = Bytes;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        let start = self.next_index.min(src.len());
        match src[start..].iter().position(|b| *b == DELIMITER) {
            Some(offset) => {
                self.next_index = 0;
                let end = start + offset;
                if end > self.max_frame_size {
                    src.clear();
                    return Err(WireError::FrameTooLarge {
                        size: end,
                        max: self.max_frame_size,
                    });
                }
                let mut line = src.split_to(end + 1);
                line.truncate(end);
                if line.last() == Some(&b'\r') {
                    line.truncate(end - 1);
                }
                Ok(Some(line.freeze()))
            }
            None => {
                if src.len() > self.max_frame_size {
                    let size = src.len();
                    src.clear();
                    self.next_index = 0;
                    return Err(WireError::FrameTooLarge {
                        size,
                        max: self.max_frame_size,
                    });
                }
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None if src.is_empty() => Ok(None),
            None => {
                src.clear();
                self.next_index = 0;
                Err(WireError::IncompleteFrame)
            }
        }
    }
}

impl<T: AsRef<[u8]>> Encoder<T> for LineCodec {
    type Error = WireError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<()> {
        let payload = item.as_ref();
        if payload.len() > self.max_frame_size {
            return Err(WireError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame_size,
            });
        }
        encode_frame(payload, dst)
    }
}

/// Configuration for the wire codec.
#[derive(Debug, Clone)]
pub struct WireConfig {
    /// Maximum frame size in bytes, terminator excluded. Default: 16 MiB.
    pub max_frame_size: usize,
    /// Upper bound for waiting on one frame. Default: none.
    pub read_timeout: Option<Duration>,
    /// Upper bound for writing one frame. Default: none.
    pub write_timeout: Option<Duration>,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

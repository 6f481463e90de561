/// Errors that can occur while encoding, decoding or moving frames.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// An I/O error occurred while reading or writing frames.
    #[error("wire I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended at a frame boundary.
    #[error("connection closed")]
    ConnectionClosed,

    /// The stream ended in the middle of a frame.
    #[error("connection closed (incomplete frame)")]
    IncompleteFrame,

    /// The frame exceeds the configured maximum size.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A raw line to be sent contains a line break.
    #[error("line contains an embedded newline")]
    EmbeddedNewline,

    /// The frame is not valid JSON for the requested type.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The remote side answered with a failure frame.
    ///
    /// Displays as the remote message, unchanged.
    #[error("{0}")]
    Remote(String),

    /// A value object carries the `error` field reserved for failure frames.
    #[error("value carries the reserved \"error\" field")]
    ReservedField,

    /// Dialing or accepting the underlying stream failed.
    #[error("transport error: {0}")]
    Transport(#[from] jrpc_transport::TransportError),

    /// A per-call connection was read before anything was sent on it.
    #[error("no request in flight")]
    NotConnected,

    /// A read or write did not finish in time.
    #[error("wire operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl WireError {
    /// Whether this error marks the end of the stream rather than a fault.
    pub fn is_closed(&self) -> bool {
        matches!(self, WireError::ConnectionClosed)
    }

    /// Whether the session that produced this error can keep going.
    ///
    /// Remote failures, malformed JSON and encode-side refusals leave the
    /// stream usable; everything else does not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            WireError::Remote(_) | WireError::Json(_) | WireError::ReservedField
        )
    }
}

pub type Result<T> = std::result::Result<T, WireError>;

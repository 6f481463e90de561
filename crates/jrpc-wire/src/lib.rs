//! Newline-delimited JSON wire codec.
//!
//! One logical value travels as one line of compact JSON. Errors share the
//! channel as failure frames:
//!
//! ```text
//! {"error":"<message>"}\n
//! ```
//!
//! The decoder always tries the failure shape first, so a value object whose
//! top-level `error` field is a non-empty string is indistinguishable from an
//! error. The encoder refuses to write such values
//! ([`WireError::ReservedField`]).
//!
//! Two connection lifetimes implement [`Conn`]:
//! - [`Flow`] keeps one stream open for many exchanges
//! - [`Request`] dials a fresh stream per call and closes it on flush

pub mod codec;
pub mod conn;
pub mod error;
pub mod flow;
pub mod logger;
pub mod method;
pub mod reader;
pub mod request;
pub mod serializer;
pub mod writer;

pub use codec::{decode_frame, encode_frame, LineCodec, WireConfig, DEFAULT_MAX_FRAME};
pub use conn::Conn;
pub use error::{Result, WireError};
pub use flow::Flow;
pub use logger::WireLogger;
pub use method::MethodCall;
pub use reader::FrameReader;
pub use request::Request;
pub use serializer::{decode_payload, encode_failure, encode_value, Failure, Serializer};
pub use writer::FrameWriter;

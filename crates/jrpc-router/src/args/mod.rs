//! Argument decoders.
//!
//! A decoder reads from the front of a [`Payload`] and yields exactly one
//! JSON value per open handler parameter. Callers try their decoders in
//! order; the first whose values all convert to the parameter types wins,
//! and the payload is rewound between attempts.

mod flags;
mod json;

use std::sync::Arc;

use serde_json::Value;

use crate::error::DecodeError;
use crate::payload::Payload;

pub use flags::FlagArgs;
pub use json::JsonArgs;

/// Turns argument text into one JSON value per open parameter.
pub trait ArgsDecoder: Send + Sync {
    /// Decode `pending` values from the front of `payload`.
    ///
    /// Implementations consume only what they used. On error the caller
    /// rewinds the payload.
    fn decode(&self, payload: &mut Payload, pending: usize) -> Result<Vec<Value>, DecodeError>;
}

/// The default chain: a JSON value first, then command-line style flags.
pub fn default_decoders() -> Vec<Arc<dyn ArgsDecoder>> {
    vec![Arc::new(JsonArgs), Arc::new(FlagArgs)]
}

/// Source of values for the parameters an environment left open.
///
/// `apply` converts a candidate set of values into the parameters and
/// reports whether they fit.
pub trait ArgSource {
    fn fill(
        &mut self,
        pending: usize,
        apply: &mut dyn FnMut(Vec<Value>) -> Result<(), DecodeError>,
    ) -> Result<(), DecodeError>;
}

/// Runs a decoder chain over a shared payload.
pub(crate) struct DecoderChain<'a> {
    pub(crate) payload: &'a mut Payload,
    pub(crate) decoders: &'a [Arc<dyn ArgsDecoder>],
}

impl ArgSource for DecoderChain<'_> {
    fn fill(
        &mut self,
        pending: usize,
        apply: &mut dyn FnMut(Vec<Value>) -> Result<(), DecodeError>,
    ) -> Result<(), DecodeError> {
        let mut last = None;
        for decoder in self.decoders {
            let mark = self.payload.mark();
            let attempt = decoder
                .decode(self.payload, pending)
                .and_then(|values| apply(values));
            match attempt {
                Ok(()) => return Ok(()),
                Err(err) => {
                    self.payload.reset(mark);
                    last = Some(err);
                }
            }
        }
        Err(last.unwrap_or(DecodeError::NoDecoder))
    }
}

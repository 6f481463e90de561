use std::fmt::Display;

use jrpc_transport::TransportError;
use jrpc_wire::WireError;

/// Errors raised while turning argument text into handler parameters.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The payload holds no argument text for this decoder.
    #[error("no arguments to decode")]
    Empty,

    /// The payload is not valid JSON.
    #[error("invalid json arguments: {0}")]
    Json(#[from] serde_json::Error),

    /// More values were supplied than the handler has open parameters.
    #[error("too many arguments: expected at most {expected}, got {got}")]
    TooMany { expected: usize, got: usize },

    /// A scalar was supplied for several open parameters.
    #[error("cannot spread a single {kind} over {pending} parameters")]
    Shape { kind: &'static str, pending: usize },

    /// A quoted token never closes.
    #[error("unterminated quote in arguments")]
    UnterminatedQuote,

    /// A decoded value does not fit the parameter type.
    #[error("argument {index}: {source}")]
    Param {
        index: usize,
        source: serde_json::Error,
    },

    /// A parameter that only the environment can supply was left unbound.
    #[error("argument {index}: no {type_name} in the call environment")]
    Unbound {
        index: usize,
        type_name: &'static str,
    },

    /// Argument text was left after every parameter was filled.
    #[error("unexpected trailing arguments: {0}")]
    Trailing(String),

    /// The caller has no decoders configured.
    #[error("no argument decoders configured")]
    NoDecoder,
}

/// Errors that can occur while routing and answering queries.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Argument decoding failed; displays as the decoder's message.
    #[error("{0}")]
    Decode(#[from] DecodeError),

    /// The query matched a route prefix but no callable.
    #[error("route not found for query {0}")]
    RouteNotFound(String),

    /// The query matched nothing in the registry.
    #[error("malformed request")]
    MalformedRequest,

    /// A guard on the route denied the caller.
    #[error("unauthorized")]
    Unauthorized,

    /// A handler reported a failure; displays as the handler's message.
    #[error("{0}")]
    Invocation(String),

    /// A handler result could not be turned into JSON.
    #[error("cannot encode result: {0}")]
    Encode(serde_json::Error),

    /// A stream result was returned together with other results.
    #[error("a stream result must be the only result")]
    StreamNotAlone,

    /// The service has no method of this name.
    #[error("invalid method {0}")]
    InvalidMethod(String),

    /// Framing or JSON failure on the connection.
    #[error("{0}")]
    Wire(#[from] WireError),

    /// Registering, dialing or accepting failed.
    #[error("{0}")]
    Transport(#[from] TransportError),
}

impl Error {
    /// Handler failure carrying `message` verbatim to the remote side.
    pub fn invocation(message: impl Display) -> Self {
        Error::Invocation(message.to_string())
    }

    /// An error returned by a handler, as the session should see it.
    ///
    /// Wire and transport failures raised inside a handler come from some
    /// other connection it used, so they answer as plain failures instead of
    /// ending the caller's session.
    pub(crate) fn from_handler(self) -> Self {
        match self {
            Error::Wire(_) | Error::Transport(_) => Error::Invocation(self.to_string()),
            other => other,
        }
    }

    /// Whether the connection that produced this error is gone.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Wire(err) => !err.is_recoverable(),
            Error::Transport(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_reach_the_wire_unchanged() {
        assert_eq!(Error::invocation("test error 3").to_string(), "test error 3");
        assert_eq!(
            Error::RouteNotFound("a.c".into()).to_string(),
            "route not found for query a.c"
        );
        assert_eq!(
            Error::Wire(WireError::Remote("boom".into())).to_string(),
            "boom"
        );
    }

    #[test]
    fn fatal_classification() {
        assert!(Error::Wire(WireError::ConnectionClosed).is_fatal());
        assert!(!Error::Wire(WireError::ReservedField).is_fatal());
        assert!(!Error::Unauthorized.is_fatal());
        assert!(Error::Transport(TransportError::Shutdown).is_fatal());
    }

    #[test]
    fn handler_side_connection_errors_are_not_fatal() {
        let err = Error::Transport(TransportError::Rejected("other.svc".into())).from_handler();
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "query rejected: \"other.svc\"");

        let err = Error::Wire(WireError::ConnectionClosed).from_handler();
        assert!(matches!(err, Error::Invocation(_)));

        let err = Error::invocation("kept").from_handler();
        assert_eq!(err.to_string(), "kept");
    }
}

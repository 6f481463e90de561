use std::fmt;
use std::io;

use jrpc_router::Error as RouterError;
use jrpc_transport::TransportError;
use jrpc_wire::WireError;

// Exit codes follow sysexits(3) and timeout(1) where one fits.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::Rejected(_) => CliError::new(PERMISSION_DENIED, format!("{context}: {err}")),
        TransportError::AlreadyRegistered(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn wire_error(context: &str, err: WireError) -> CliError {
    match err {
        WireError::Io(source) => io_error(context, source),
        WireError::Transport(err) => transport_error(context, err),
        WireError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        WireError::Remote(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        WireError::Json(_) | WireError::FrameTooLarge { .. } | WireError::ReservedField => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        WireError::ConnectionClosed | WireError::IncompleteFrame => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn router_error(context: &str, err: RouterError) -> CliError {
    match err {
        RouterError::Wire(err) => wire_error(context, err),
        RouterError::Transport(err) => transport_error(context, err),
        RouterError::Decode(_) | RouterError::Encode(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        RouterError::Unauthorized => CliError::new(PERMISSION_DENIED, format!("{context}: {err}")),
        RouterError::RouteNotFound(_)
        | RouterError::MalformedRequest
        | RouterError::InvalidMethod(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

pub fn timeout(context: &str, after: std::time::Duration) -> CliError {
    CliError::new(TIMEOUT, format!("{context}: timed out after {after:?}"))
}

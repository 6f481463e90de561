use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The port socket could not be created.
    #[error("cannot listen on {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot dial {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(std::io::Error),

    #[error("transport io: {0}")]
    Io(#[from] std::io::Error),

    /// Unix socket paths are limited by `sun_path`.
    #[error("socket path for port exceeds {max} bytes ({len}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// A listener for this port is already registered.
    #[error("port already registered: {0}")]
    AlreadyRegistered(String),

    /// No listener accepts the query.
    #[error("no listener for query {0:?}")]
    NoListener(String),

    /// The listener refused the query.
    #[error("query rejected: {0:?}")]
    Rejected(String),

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;

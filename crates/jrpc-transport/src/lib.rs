//! Identity-carrying duplex stream transports.
//!
//! The RPC layers above never open connections themselves. They consume a
//! [`Transport`], which knows how to:
//! - register a port and hand out incoming queries through a [`Listener`]
//! - dial a query against a remote identity, yielding a [`Connection`]
//!
//! Two backends ship with this crate:
//! - [`MemoryTransport`], an in-process hub built on `tokio::io::duplex`
//! - [`UnixTransport`], one Unix domain socket per port (Linux/macOS)

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use memory::MemoryTransport;
pub use traits::{BoxedStream, Connection, Duplex, Identity, IncomingQuery, Listener, Transport};

#[cfg(unix)]
pub use uds::UnixTransport;

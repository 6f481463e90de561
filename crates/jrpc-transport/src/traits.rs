use std::fmt;
use std::future::Future;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::Result;

/// Any bidirectional byte stream a transport can hand out.
pub trait Duplex: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Duplex for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// A type-erased duplex stream.
pub type BoxedStream = Box<dyn Duplex>;

/// Authenticated identity of a transport endpoint.
///
/// The empty identity stands for "anyone": as a dial target it matches any
/// listener, as a caller it means the transport could not attribute the
/// connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(String);

impl Identity {
    /// Create an identity from its textual form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The wildcard identity.
    pub fn anyone() -> Self {
        Self(String::new())
    }

    pub fn is_anyone(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_anyone() {
            f.write_str("anyone")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// An open stream together with what the transport knows about it.
pub struct Connection {
    /// The byte stream.
    pub stream: BoxedStream,
    /// Identity of the other side.
    pub remote: Identity,
    /// The query this connection was opened with.
    pub query: String,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("remote", &self.remote)
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

/// A query waiting for the listener's decision.
pub struct IncomingQuery {
    query: String,
    caller: Identity,
    responder: Responder,
}

pub(crate) enum Responder {
    /// The dialer waits on the other end of a oneshot for its stream half.
    Memory {
        reply: oneshot::Sender<BoxedStream>,
        buffer: usize,
    },
    /// The stream is already established; rejecting drops it.
    Stream(BoxedStream),
}

impl IncomingQuery {
    pub(crate) fn new(query: String, caller: Identity, responder: Responder) -> Self {
        Self {
            query,
            caller,
            responder,
        }
    }

    /// The full query string as dialed, port included.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Identity of the dialing side.
    pub fn caller(&self) -> &Identity {
        &self.caller
    }

    /// Accept the query and take ownership of its stream.
    pub fn accept(self) -> Connection {
        let stream = match self.responder {
            Responder::Memory { reply, buffer } => {
                let (local, remote) = tokio::io::duplex(buffer);
                if reply.send(Box::new(remote)).is_err() {
                    debug!(query = %self.query, "dialer went away before accept");
                }
                Box::new(local) as BoxedStream
            }
            Responder::Stream(stream) => stream,
        };
        Connection {
            stream,
            remote: self.caller,
            query: self.query,
        }
    }

    /// Refuse the query. The dialer observes a rejection or a closed stream.
    pub fn reject(self) {
        debug!(query = %self.query, caller = %self.caller, "query rejected");
    }
}

impl fmt::Debug for IncomingQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingQuery")
            .field("query", &self.query)
            .field("caller", &self.caller)
            .finish_non_exhaustive()
    }
}

/// A registered port delivering incoming queries.
pub trait Listener: Send + 'static {
    /// The port this listener was registered under.
    fn port(&self) -> &str;

    /// Wait for the next incoming query. `None` once the listener is closed.
    fn next(&mut self) -> impl Future<Output = Option<IncomingQuery>> + Send;
}

/// Establishes identity-carrying streams.
///
/// Ports ending in `*` match every query that starts with the port prefix;
/// other ports match their exact name only.
pub trait Transport: Send + Sync + 'static {
    type Listener: Listener;

    /// Identity of this endpoint.
    fn identity(&self) -> Identity;

    /// Register a port and start receiving queries for it.
    fn register(&self, port: &str) -> impl Future<Output = Result<Self::Listener>> + Send;

    /// Dial `query` on `target`.
    fn query(
        &self,
        target: &Identity,
        query: &str,
    ) -> impl Future<Output = Result<Connection>> + Send;
}

/// Whether a registered port accepts a query.
pub fn port_matches(port: &str, query: &str) -> bool {
    match port.strip_suffix('*') {
        Some(prefix) => query.starts_with(prefix),
        None => port == query,
    }
}

/// Pick the most specific port for a query: exact match first, then the
/// longest wildcard prefix.
pub fn best_port<'a, I>(ports: I, query: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<&'a str> = None;
    for port in ports {
        if !port_matches(port, query) {
            continue;
        }
        if port == query {
            return Some(port);
        }
        if best.is_none_or(|current| port.len() > current.len()) {
            best = Some(port);
        }
    }
    best
}

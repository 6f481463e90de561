use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{best_port, Connection, Identity, IncomingQuery, Listener, Responder, Transport};

/// Default in-memory pipe capacity per direction: 64 KiB.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

const QUERY_BACKLOG: usize = 32;

/// In-process transport.
///
/// All handles created from one hub (via [`MemoryTransport::endpoint`]) can
/// reach each other's listeners. Each handle carries its own identity, which
/// the remote side sees as the caller.
#[derive(Clone)]
pub struct MemoryTransport {
    hub: Arc<Hub>,
    identity: Identity,
}

struct Hub {
    routes: Mutex<HashMap<String, Route>>,
    buffer: usize,
}

struct Route {
    owner: Identity,
    queries: mpsc::Sender<IncomingQuery>,
}

impl Hub {
    fn routes(&self) -> MutexGuard<'_, HashMap<String, Route>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MemoryTransport {
    /// Create a new hub and return its first endpoint.
    pub fn new(identity: Identity) -> Self {
        Self::with_buffer_size(identity, DEFAULT_BUFFER_SIZE)
    }

    /// Create a new hub with an explicit per-direction pipe capacity.
    pub fn with_buffer_size(identity: Identity, buffer: usize) -> Self {
        Self {
            hub: Arc::new(Hub {
                routes: Mutex::new(HashMap::new()),
                buffer,
            }),
            identity,
        }
    }

    /// Another endpoint on the same hub.
    pub fn endpoint(&self, identity: Identity) -> Self {
        Self {
            hub: self.hub.clone(),
            identity,
        }
    }

    /// Ports currently registered on the hub.
    pub fn ports(&self) -> Vec<String> {
        let mut ports: Vec<String> = self.hub.routes().keys().cloned().collect();
        ports.sort();
        ports
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl Transport for MemoryTransport {
    type Listener = MemoryListener;

    fn identity(&self) -> Identity {
        self.identity.clone()
    }

    async fn register(&self, port: &str) -> Result<MemoryListener> {
        let (tx, rx) = mpsc::channel(QUERY_BACKLOG);
        {
            let mut routes = self.hub.routes();
            if let Some(existing) = routes.get(port) {
                if !existing.queries.is_closed() {
                    return Err(TransportError::AlreadyRegistered(port.to_string()));
                }
            }
            routes.insert(
                port.to_string(),
                Route {
                    owner: self.identity.clone(),
                    queries: tx,
                },
            );
        }
        info!(port, identity = %self.identity, "registered in-memory port");
        Ok(MemoryListener {
            port: port.to_string(),
            queries: rx,
            hub: self.hub.clone(),
        })
    }

    async fn query(&self, target: &Identity, query: &str) -> Result<Connection> {
        let (owner, queries) = {
            let routes = self.hub.routes();
            let candidates = routes
                .iter()
                .filter(|(_, route)| target.is_anyone() || route.owner == *target)
                .filter(|(_, route)| !route.queries.is_closed())
                .map(|(port, _)| port.as_str());
            let port = best_port(candidates, query)
                .ok_or_else(|| TransportError::NoListener(query.to_string()))?;
            let route = &routes[port];
            (route.owner.clone(), route.queries.clone())
        };

        let (reply, accepted) = oneshot::channel();
        let incoming = IncomingQuery::new(
            query.to_string(),
            self.identity.clone(),
            Responder::Memory {
                reply,
                buffer: self.hub.buffer,
            },
        );
        queries
            .send(incoming)
            .await
            .map_err(|_| TransportError::NoListener(query.to_string()))?;

        let stream = accepted
            .await
            .map_err(|_| TransportError::Rejected(query.to_string()))?;
        debug!(query, remote = %owner, "in-memory query accepted");
        Ok(Connection {
            stream,
            remote: owner,
            query: query.to_string(),
        })
    }
}

/// Receiving side of a registered in-memory port.
pub struct MemoryListener {
    port: String,
    queries: mpsc::Receiver<IncomingQuery>,
    hub: Arc<Hub>,
}

impl Listener for MemoryListener {
    fn port(&self) -> &str {
        &self.port
    }

    async fn next(&mut self) -> Option<IncomingQuery> {
        self.queries.recv().await
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.queries.close();
        let mut routes = self.hub.routes();
        if routes
            .get(&self.port)
            .is_some_and(|route| route.queries.is_closed())
        {
            routes.remove(&self.port);
            debug!(port = %self.port, "unregistered in-memory port");
        }
    }
}

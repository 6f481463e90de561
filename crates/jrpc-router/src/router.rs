use std::sync::Arc;

use jrpc_transport::{Connection, Identity, IncomingQuery, Listener, Transport};
use jrpc_wire::{Flow, Serializer, WireConfig};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::caller::Caller;
use crate::context::Context;
use crate::env::{EnvValue, Query};
use crate::error::{DecodeError, Error, Result};
use crate::handler::Handler;
use crate::naming::method_route;
use crate::payload::Payload;
use crate::registry::{Registry, Target, Unfold, WILDCARD};
use crate::reply::Output;
use crate::session::{Authorization, Session};

/// Routes queries on a port to registered callables.
///
/// Build it with the chained methods, wrap it in an [`Arc`], then
/// [`start`](Router::start) or [`run`](Router::run) it on a transport. Once
/// serving, the route table is shared read-only by every session.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use jrpc_router::{Context, Router};
/// # use jrpc_transport::{Identity, MemoryTransport};
/// # async fn demo() -> jrpc_router::Result<()> {
/// let router = Arc::new(
///     Router::new("demo")
///         .routes(["*"])
///         .func("add", |a: i64, b: i64| a + b),
/// );
/// let transport = MemoryTransport::new(Identity::new("server"));
/// router.run(&Context::new(), &transport).await
/// # }
/// ```
pub struct Router {
    port: String,
    routes: Vec<String>,
    registry: Registry,
    env: Vec<EnvValue>,
    logger: Option<String>,
    config: WireConfig,
}

impl Router {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            routes: Vec::new(),
            registry: Registry::new(),
            env: Vec::new(),
            logger: None,
            config: WireConfig::default(),
        }
    }

    /// Sub-routes to listen on, relative to the port. `"*"` listens on
    /// everything under it.
    pub fn routes<I, S>(mut self, routes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.routes.extend(routes.into_iter().map(Into::into));
        self
    }

    /// Make `value` available to every callable.
    pub fn with<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.env.push(EnvValue::new(value));
        self
    }

    /// Register a handler under a dotted route name.
    pub fn func<H, Args>(self, name: &str, handler: H) -> Self
    where
        H: Handler<Args>,
        Args: 'static,
    {
        self.caller(name, Caller::new(handler))
    }

    /// Register a configured [`Caller`].
    pub fn caller(mut self, name: &str, caller: Caller) -> Self {
        self.registry.add(name, caller);
        self
    }

    /// Register a handler under the route derived from a method name.
    pub fn method<H, Args>(self, method: &str, handler: H) -> Self
    where
        H: Handler<Args>,
        Args: 'static,
    {
        let route = method_route(method);
        self.func(&route, handler)
    }

    /// Mirror session traffic to `tracing` under `label`.
    pub fn logger(mut self, label: impl Into<String>) -> Self {
        self.logger = Some(label.into());
        self
    }

    pub fn config(mut self, config: WireConfig) -> Self {
        self.config = config;
        self
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Transport ports this router listens on.
    pub fn listen_ports(&self) -> Vec<String> {
        if self.routes.is_empty() {
            return vec![self.port.clone()];
        }
        self.routes
            .iter()
            .map(|route| {
                if route == WILDCARD {
                    format!("{}{WILDCARD}", self.port)
                } else {
                    format!("{}.{route}", self.port)
                }
            })
            .collect()
    }

    /// Strip the port and the separating `.` from a query line.
    ///
    /// The port only counts as a prefix when a separator or argument text
    /// follows it.
    pub fn resolve<'q>(&self, query: &'q str) -> &'q str {
        let rest = match query.strip_prefix(self.port.as_str()) {
            Some(rest) if is_boundary(rest) => rest,
            _ => query,
        };
        rest.strip_prefix('.').unwrap_or(rest)
    }

    /// Register every listen port and start accepting.
    pub async fn start<T: Transport>(
        self: &Arc<Self>,
        ctx: &Context,
        transport: &T,
    ) -> Result<Running> {
        let ports = self.listen_ports();
        let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(ports.len());
        for port in &ports {
            let listener = match transport.register(port).await {
                Ok(listener) => listener,
                Err(err) => {
                    for task in &tasks {
                        task.abort();
                    }
                    return Err(err.into());
                }
            };
            info!(port = %port, identity = %transport.identity(), "listening");
            tasks.push(tokio::spawn(Arc::clone(self).accept_loop(ctx.child(), listener)));
        }
        Ok(Running { ports, tasks })
    }

    /// Serve until `ctx` is cancelled or every listener closes.
    pub async fn run<T: Transport>(self: &Arc<Self>, ctx: &Context, transport: &T) -> Result<()> {
        self.start(ctx, transport).await?.wait().await;
        Ok(())
    }

    async fn accept_loop<L: Listener>(self: Arc<Self>, ctx: Context, mut listener: L) {
        loop {
            let incoming = tokio::select! {
                _ = ctx.cancelled() => break,
                next = listener.next() => match next {
                    Some(incoming) => incoming,
                    None => break,
                },
            };
            let router = Arc::clone(&self);
            let session_ctx = ctx.child();
            tokio::spawn(async move { router.admit(session_ctx, incoming).await });
        }
        debug!(port = listener.port(), "listener stopped");
    }

    /// Accept or reject one incoming query, then serve it.
    ///
    /// Queries that match nothing, or whose guards deny the caller, are
    /// rejected before a stream is opened.
    async fn admit(&self, ctx: Context, incoming: IncomingQuery) {
        let query = incoming.query().to_string();
        let remote = incoming.caller().clone();
        let line = self.resolve(&query);
        let unfold = self.registry.unfold(line);

        if unfold.target.is_none() && !unfold.matched() && !unfold.rest.trim().is_empty() {
            debug!(query = %query, %remote, "rejecting malformed query");
            incoming.reject();
            return;
        }
        let env = self.base_env(&ctx, &query, &remote);
        if !run_guards(&unfold.guards, &env).await {
            debug!(query = %query, %remote, "rejecting unauthorized query");
            incoming.reject();
            return;
        }
        let granted = Authorization::granted(unfold.scope.clone());
        let conn = incoming.accept();
        self.serve(ctx, conn, granted).await;
    }

    /// Run a session over an already open stream.
    pub async fn handle(&self, ctx: &Context, conn: Connection) {
        self.serve(ctx.child(), conn, Authorization::default()).await;
    }

    async fn serve(&self, ctx: Context, conn: Connection, authorization: Authorization) {
        let query = conn.query.clone();
        let remote = conn.remote.clone();
        let mut serializer = Serializer::from_connection(conn, self.config.clone());
        if let Some(label) = &self.logger {
            serializer = serializer.with_logger(label);
        }
        let first = self.resolve(&query).to_string();
        debug!(query = %query, %remote, "session opened");
        Session::new(self, ctx, Query(query), remote, Flow::from(serializer), authorization)
            .run(first)
            .await;
    }

    /// Whether the guards on `query`'s route admit `remote`.
    pub async fn authorize(&self, ctx: &Context, query: &str, remote: &Identity) -> bool {
        let unfold = self.registry.unfold(self.resolve(query));
        let env = self.base_env(ctx, query, remote);
        run_guards(&unfold.guards, &env).await
    }

    /// Resolve, authorize and invoke `query` without a connection.
    pub async fn call(&self, ctx: &Context, remote: &Identity, query: &str) -> Result<Vec<Output>> {
        let line = self.resolve(query);
        let unfold = self.registry.unfold(line);
        let env = self.base_env(ctx, query, remote);
        if !run_guards(&unfold.guards, &env).await {
            return Err(Error::Unauthorized);
        }
        let target = checked_target(&unfold, line)?;
        dispatch(target, unfold.rest, &env).await
    }

    /// Environment shared by every invocation: router values, then the
    /// context, the query and the caller's identity.
    pub(crate) fn base_env(&self, ctx: &Context, query: &str, remote: &Identity) -> Vec<EnvValue> {
        let mut env = self.env.clone();
        env.push(EnvValue::new(ctx.clone()));
        env.push(EnvValue::new(Query(query.to_string())));
        env.push(EnvValue::new(remote.clone()));
        env
    }
}

/// Handle on a started router.
#[derive(Debug)]
pub struct Running {
    ports: Vec<String>,
    tasks: Vec<JoinHandle<()>>,
}

impl Running {
    pub fn ports(&self) -> &[String] {
        &self.ports
    }

    /// Wait for every accept loop to finish.
    pub async fn wait(self) {
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "accept loop ended abnormally");
            }
        }
    }
}

fn is_boundary(rest: &str) -> bool {
    match rest.chars().next() {
        None => true,
        Some(c) => matches!(c, '.' | '[' | '{' | '?') || c.is_whitespace(),
    }
}

/// The target of an unfold, or the error answering a miss.
pub(crate) fn checked_target<'r>(unfold: &Unfold<'r, '_>, line: &str) -> Result<Target<'r>> {
    match &unfold.target {
        Some(Target::Caller(caller)) => Ok(Target::Caller(*caller)),
        Some(Target::Api(names)) => Ok(Target::Api(names.clone())),
        None if unfold.matched() => Err(Error::RouteNotFound(line.to_string())),
        None => Err(Error::MalformedRequest),
    }
}

/// Run every guard in order; the first denial or failure stops the walk.
///
/// A guard denies by answering exactly `false` first.
pub(crate) async fn run_guards(guards: &[&Caller], env: &[EnvValue]) -> bool {
    for guard in guards {
        match guard.call(env, &mut Payload::default()).await {
            Ok(outputs) => {
                if matches!(outputs.first(), Some(Output::Value(Value::Bool(false)))) {
                    return false;
                }
            }
            Err(err) => {
                debug!(error = %err, "guard failed");
                return false;
            }
        }
    }
    true
}

/// Invoke a resolved target with the argument text after its route.
///
/// Every argument must be used, continuations included.
pub(crate) async fn dispatch(
    target: Target<'_>,
    rest: &str,
    env: &[EnvValue],
) -> Result<Vec<Output>> {
    match target {
        Target::Api(names) => Ok(vec![Output::Value(Value::from(names))]),
        Target::Caller(caller) => {
            let mut payload = Payload::new(rest.strip_prefix('?').unwrap_or(rest));
            let outputs = caller
                .call(env, &mut payload)
                .await
                .map_err(Error::from_handler)?;
            if !payload.is_blank() {
                let trailing = payload.rest().trim().to_string();
                return Err(DecodeError::Trailing(trailing).into());
            }
            Ok(outputs)
        }
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;

use jrpc_transport::{Connection, IncomingQuery, Listener, Transport};
use jrpc_wire::{Conn, Flow, MethodCall, Serializer, WireConfig};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::args::JsonArgs;
use crate::caller::Caller;
use crate::context::Context;
use crate::env::{EnvValue, Query};
use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::payload::Payload;
use crate::registry::API_ROUTE;
use crate::reply::Output;
use crate::respond::{respond, send_error, Answered};

/// A named table of methods answering method frames.
///
/// Method names match case-insensitively. Arguments arrive as a JSON array
/// and spread over the parameters the environment leaves open.
#[derive(Debug, Clone)]
pub struct Service {
    name: String,
    methods: BTreeMap<String, (String, Caller)>,
    env: Vec<EnvValue>,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: BTreeMap::new(),
            env: Vec::new(),
        }
    }

    pub fn method<H, Args>(self, name: &str, handler: H) -> Self
    where
        H: Handler<Args>,
        Args: 'static,
    {
        self.caller(name, Caller::new(handler))
    }

    /// Register a configured caller; its decoders are replaced by JSON.
    pub fn caller(mut self, name: &str, caller: Caller) -> Self {
        let caller = caller.decoders(vec![Arc::new(JsonArgs)]);
        self.methods
            .insert(name.to_lowercase(), (name.to_string(), caller));
        self
    }

    /// Make `value` available to every method.
    pub fn with<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.env.push(EnvValue::new(value));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Method names as registered, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .methods
            .values()
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Run one method frame with `env` after the service's own values.
    pub async fn invoke(&self, env: &[EnvValue], call: &MethodCall) -> Result<Vec<Output>> {
        let key = call.name.to_lowercase();
        let Some((_, caller)) = self.methods.get(&key) else {
            if key == API_ROUTE {
                return Ok(vec![Output::Value(Value::from(self.methods()))]);
            }
            return Err(Error::InvalidMethod(call.name.clone()));
        };
        let args = serde_json::to_string(&call.args).map_err(Error::Encode)?;
        let mut full = self.env.clone();
        full.extend_from_slice(env);
        caller
            .call(&full, &mut Payload::new(args))
            .await
            .map_err(Error::from_handler)
    }
}

/// Builds a fresh [`Service`] for every accepted connection.
pub trait ServiceFactory: Send + Sync + 'static {
    fn build(&self, ctx: &Context, flow: &Flow) -> Result<Service>;
}

impl<F> ServiceFactory for F
where
    F: Fn(&Context, &Flow) -> Result<Service> + Send + Sync + 'static,
{
    fn build(&self, ctx: &Context, flow: &Flow) -> Result<Service> {
        self(ctx, flow)
    }
}

/// Per-connection dispatcher for method frames.
///
/// Listens on `<name>*`. Each connection gets its own service instance; the
/// first method frame may ride in the query after the name, the rest are
/// read from the stream.
pub struct Server<F> {
    name: String,
    factory: F,
    logger: Option<String>,
    config: WireConfig,
}

impl<F: ServiceFactory> Server<F> {
    pub fn new(name: impl Into<String>, factory: F) -> Self {
        Self {
            name: name.into(),
            factory,
            logger: None,
            config: WireConfig::default(),
        }
    }

    /// Mirror connection traffic to `tracing` under `label`.
    pub fn logger(mut self, label: impl Into<String>) -> Self {
        self.logger = Some(label.into());
        self
    }

    pub fn config(mut self, config: WireConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register `<name>*` and start accepting.
    pub async fn start<T: Transport>(
        self: &Arc<Self>,
        ctx: &Context,
        transport: &T,
    ) -> Result<JoinHandle<()>> {
        let port = format!("{}*", self.name);
        let listener = transport.register(&port).await?;
        info!(port = %port, identity = %transport.identity(), "service listening");
        Ok(tokio::spawn(Arc::clone(self).accept_loop(ctx.child(), listener)))
    }

    /// Serve until `ctx` is cancelled or the listener closes.
    pub async fn run<T: Transport>(self: &Arc<Self>, ctx: &Context, transport: &T) -> Result<()> {
        let task = self.start(ctx, transport).await?;
        if let Err(err) = task.await {
            debug!(error = %err, "service accept loop ended abnormally");
        }
        Ok(())
    }

    async fn accept_loop<L: Listener>(self: Arc<Self>, ctx: Context, mut listener: L) {
        loop {
            let incoming: IncomingQuery = tokio::select! {
                _ = ctx.cancelled() => break,
                next = listener.next() => match next {
                    Some(incoming) => incoming,
                    None => break,
                },
            };
            let server = Arc::clone(&self);
            let conn_ctx = ctx.child();
            let conn = incoming.accept();
            tokio::spawn(async move { server.handle(&conn_ctx, conn).await });
        }
        debug!(port = listener.port(), "service listener stopped");
    }

    /// Serve method frames on one open stream.
    pub async fn handle(&self, ctx: &Context, conn: Connection) {
        let ctx = ctx.child();
        let query = conn.query.clone();
        let remote = conn.remote.clone();
        let mut serializer = Serializer::from_connection(conn, self.config.clone());
        if let Some(label) = &self.logger {
            serializer = serializer.with_logger(label);
        }
        let mut flow = Flow::from(serializer);
        debug!(query = %query, %remote, "service connection opened");

        match self.factory.build(&ctx, &flow) {
            Ok(service) => {
                let env = vec![
                    EnvValue::new(ctx.clone()),
                    EnvValue::new(Query(query.clone())),
                    EnvValue::new(remote.clone()),
                    EnvValue::new(flow.copy()),
                ];
                let mut first = query
                    .strip_prefix(self.name.as_str())
                    .map(str::trim)
                    .filter(|rest| !rest.is_empty());
                loop {
                    let call = match first.take() {
                        Some(text) => serde_json::from_str::<MethodCall>(text)
                            .map_err(|err| Error::Wire(err.into())),
                        None => flow.decode::<MethodCall>().await.map_err(Error::from),
                    };
                    let call = match call {
                        Ok(call) => call,
                        Err(Error::Wire(err)) if err.is_closed() => break,
                        Err(err) => {
                            debug!(error = %err, "bad method frame");
                            if !err.is_fatal() {
                                send_error(&mut flow, &err.to_string()).await;
                            }
                            break;
                        }
                    };
                    debug!(method = %call.name, "dispatching method");
                    let result = service.invoke(&env, &call).await;
                    match respond(&mut flow, &ctx, result, false).await {
                        Answered::Ready(_) => {}
                        Answered::Closed => break,
                    }
                }
            }
            Err(err) => {
                debug!(error = %err, "service construction failed");
                send_error(&mut flow, &err.to_string()).await;
            }
        }

        ctx.cancel();
        if let Err(err) = flow.close().await {
            debug!(error = %err, "close after service connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use jrpc_transport::Identity;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::env::Env;
    use crate::reply::{Json, ValueStream};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Entry {
        s: String,
        i: i64,
    }

    fn test_service(_: &Context, _: &Flow) -> Result<Service> {
        Ok(Service::new("testApi")
            .method("Method1", |b: bool, i: i64, s: String| (b, i, s))
            .method("Method2", |entry: Entry| Json(entry))
            .method("Method3", || -> Result<()> { Err(Error::invocation("method3 failed")) })
            .method("Peer", |Env(id): Env<jrpc_transport::Identity>| id.to_string())
            .method("Relay", || -> Result<i64> {
                Err(jrpc_transport::TransportError::NoListener("upstream".into()).into())
            })
            .method("Stream", |n: i64| {
                let (tx, rx) = mpsc::channel(4);
                tokio::spawn(async move {
                    for i in 0..n {
                        if tx.send(i).await.is_err() {
                            break;
                        }
                    }
                });
                ValueStream::from_receiver(rx)
            }))
    }

    fn connect(server: Arc<Server<fn(&Context, &Flow) -> Result<Service>>>, query: &str) -> Flow {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let conn = Connection {
            stream: Box::new(a),
            remote: Identity::new("client"),
            query: query.to_string(),
        };
        tokio::spawn(async move { server.handle(&Context::new(), conn).await });
        Flow::new(Box::new(b), Identity::new("server"))
    }

    fn server() -> Arc<Server<fn(&Context, &Flow) -> Result<Service>>> {
        Arc::new(Server::new(
            "testApi",
            test_service as fn(&Context, &Flow) -> Result<Service>,
        ))
    }

    #[tokio::test]
    async fn methods_from_stream_frames() {
        let mut client = connect(server(), "testApi");

        client.encode(&json!(["method1", true, 10, "example"])).await.unwrap();
        assert_eq!(
            client.decode::<Value>().await.unwrap(),
            json!([true, 10, "example"])
        );

        client.encode(&json!(["METHOD2", {"s": "x", "i": 1}])).await.unwrap();
        assert_eq!(
            client.decode::<Entry>().await.unwrap(),
            Entry { s: "x".into(), i: 1 }
        );

        client.encode(&json!(["method3"])).await.unwrap();
        assert_eq!(
            client.decode::<Value>().await.unwrap_err().to_string(),
            "method3 failed"
        );

        client.encode(&json!(["peer"])).await.unwrap();
        assert_eq!(client.decode::<String>().await.unwrap(), "client");

        client.encode(&json!(["api"])).await.unwrap();
        assert_eq!(
            client.decode::<Value>().await.unwrap(),
            json!(["Method1", "Method2", "Method3", "Peer", "Relay", "Stream"])
        );

        client.encode(&json!(["nope"])).await.unwrap();
        assert_eq!(
            client.decode::<Value>().await.unwrap_err().to_string(),
            "invalid method nope"
        );
    }

    #[tokio::test]
    async fn downstream_failures_keep_the_connection() {
        let mut client = connect(server(), "testApi");
        client.encode(&json!(["relay"])).await.unwrap();
        assert_eq!(
            client.decode::<Value>().await.unwrap_err().to_string(),
            "no listener for query \"upstream\""
        );
        client.encode(&json!(["peer"])).await.unwrap();
        assert_eq!(client.decode::<String>().await.unwrap(), "client");
    }

    #[tokio::test]
    async fn first_method_rides_in_the_query() {
        let mut client = connect(server(), r#"testApi["method1", false, 2, "q"]"#);
        assert_eq!(client.decode::<Value>().await.unwrap(), json!([false, 2, "q"]));
        client.encode(&json!(["method2", {"s": "y", "i": 2}])).await.unwrap();
        assert_eq!(client.decode::<Value>().await.unwrap(), json!({"s": "y", "i": 2}));
    }

    #[tokio::test]
    async fn stream_result_is_drained() {
        let mut client = connect(server(), "testApi");
        client.encode(&json!(["stream", 3])).await.unwrap();
        for i in 0..3 {
            assert_eq!(client.decode::<i64>().await.unwrap(), i);
        }
    }

    #[tokio::test]
    async fn bad_frame_is_answered_then_closed() {
        let mut client = connect(server(), "testApi");
        client.encode(&json!([1, 2])).await.unwrap();
        assert!(client.decode::<Value>().await.is_err());
        assert!(client.decode::<Value>().await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn factory_failure_is_reported() {
        let server = Arc::new(Server::new(
            "broken",
            |_: &Context, _: &Flow| -> Result<Service> {
                Err(Error::invocation("service unavailable"))
            },
        ));
        let (a, b) = tokio::io::duplex(4096);
        let conn = Connection {
            stream: Box::new(a),
            remote: Identity::anyone(),
            query: "broken".into(),
        };
        tokio::spawn(async move { server.handle(&Context::new(), conn).await });
        let mut client = Flow::new(Box::new(b), Identity::anyone());
        assert_eq!(
            client.decode::<Value>().await.unwrap_err().to_string(),
            "service unavailable"
        );
    }
}

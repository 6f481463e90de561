use jrpc_transport::Identity;
use jrpc_wire::{Conn, Flow};
use tracing::{debug, trace};

use crate::context::Context;
use crate::env::{EnvValue, Query};
use crate::error::Error;
use crate::respond::{respond, send_error, Answered};
use crate::router::{checked_target, dispatch, run_guards, Router};

/// Where a session is in answering its current line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    /// Waiting for the next query line.
    Idle,
    /// The line has been unfolded against the registry.
    Resolved,
    /// Guards for a new scope are running.
    Authorizing,
    /// The callable runs and its results are being written.
    Dispatched,
    /// The stream is done; nothing more is read or written.
    Closed,
}

/// Authorization outcome cached for one guard scope.
#[derive(Debug, Clone)]
pub(crate) struct Authorization {
    scope: Option<String>,
    granted: bool,
}

impl Authorization {
    pub(crate) fn granted(scope: Option<String>) -> Self {
        Self {
            scope,
            granted: true,
        }
    }
}

/// Nothing is guarded until a line says otherwise.
impl Default for Authorization {
    fn default() -> Self {
        Self::granted(None)
    }
}

/// One connection's conversation with a router.
///
/// Lines are answered strictly in order. Guards only run again when a line
/// lands in a different guard scope than the one before.
pub(crate) struct Session<'r> {
    router: &'r Router,
    ctx: Context,
    query: Query,
    remote: Identity,
    flow: Flow,
    state: State,
    authorization: Authorization,
}

impl<'r> Session<'r> {
    pub(crate) fn new(
        router: &'r Router,
        ctx: Context,
        query: Query,
        remote: Identity,
        flow: Flow,
        authorization: Authorization,
    ) -> Self {
        Self {
            router,
            ctx,
            query,
            remote,
            flow,
            state: State::Idle,
            authorization,
        }
    }

    /// Answer `first`, then every line the peer sends, until the stream or
    /// the context ends.
    pub(crate) async fn run(mut self, first: String) {
        let mut next = Some(first);
        loop {
            let line = match next.take() {
                Some(line) => line,
                None => match self.read_line().await {
                    Some(line) => line,
                    None => break,
                },
            };
            match self.serve_line(&line).await {
                Answered::Ready(pending) => {
                    self.transition(State::Idle);
                    next = pending;
                }
                Answered::Closed => break,
            }
        }
        self.transition(State::Closed);
        self.ctx.cancel();
        if let Err(err) = self.flow.close().await {
            trace!(error = %err, "close after session end");
        }
        debug!(query = %self.query.as_str(), remote = %self.remote, "session closed");
    }

    async fn read_line(&mut self) -> Option<String> {
        tokio::select! {
            _ = self.ctx.cancelled() => None,
            line = self.flow.read_line() => match line {
                Ok(line) => line,
                Err(err) => {
                    debug!(error = %err, "session read failed");
                    None
                }
            },
        }
    }

    async fn serve_line(&mut self, line: &str) -> Answered {
        let line = self.router.resolve(line);
        if line.trim().is_empty() {
            return Answered::Ready(None);
        }

        let unfold = self.router.registry().unfold(line);
        self.transition(State::Resolved);

        // Guards answer before a route miss does.
        let env = self.env();
        if unfold.scope != self.authorization.scope {
            self.transition(State::Authorizing);
            let granted = run_guards(&unfold.guards, &env).await;
            self.authorization = Authorization {
                scope: unfold.scope.clone(),
                granted,
            };
        }
        if !self.authorization.granted {
            return send_error(&mut self.flow, &Error::Unauthorized.to_string()).await;
        }
        let target = match checked_target(&unfold, line) {
            Ok(target) => target,
            Err(err) => return send_error(&mut self.flow, &err.to_string()).await,
        };

        self.transition(State::Dispatched);
        let result = dispatch(target, unfold.rest, &env).await;
        respond(&mut self.flow, &self.ctx, result, true).await
    }

    /// Router values, then context, query, caller identity and the flow.
    fn env(&self) -> Vec<EnvValue> {
        let mut env = self
            .router
            .base_env(&self.ctx, self.query.as_str(), &self.remote);
        env.push(EnvValue::new(self.flow.copy()));
        env
    }

    fn transition(&mut self, next: State) {
        trace!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use jrpc_transport::Connection;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    use super::*;
    use crate::env::Env;
    use crate::reply::ValueStream;

    fn client_pair(router: Arc<Router>, query: &str) -> (Flow, tokio::task::JoinHandle<()>) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let conn = Connection {
            stream: Box::new(a),
            remote: Identity::new("client"),
            query: query.to_string(),
        };
        let task = tokio::spawn(async move { router.handle(&Context::new(), conn).await });
        (Flow::new(Box::new(b), Identity::new("server")), task)
    }

    #[tokio::test]
    async fn answers_lines_in_order() {
        let router = Arc::new(
            Router::new("app")
                .func("double", |n: i64| n * 2)
                .func("fail", || -> crate::Result<()> { Err(Error::invocation("nope")) }),
        );
        let (mut client, task) = client_pair(router, "app");

        client.send_line("double 2").await.unwrap();
        client.send_line("fail").await.unwrap();
        client.send_line("").await.unwrap();
        client.send_line("app.double[21]").await.unwrap();
        client.send_line("missing").await.unwrap();

        assert_eq!(client.decode::<i64>().await.unwrap(), 4);
        assert_eq!(client.decode::<Value>().await.unwrap_err().to_string(), "nope");
        assert_eq!(client.decode::<i64>().await.unwrap(), 42);
        assert_eq!(
            client.decode::<Value>().await.unwrap_err().to_string(),
            "malformed request"
        );

        drop(client);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn downstream_failures_are_framed_and_the_session_lives() {
        let router = Arc::new(
            Router::new("app")
                .func("relay", || -> crate::Result<i64> {
                    Err(jrpc_transport::TransportError::Rejected("other.svc".into()).into())
                })
                .func("lost", || -> crate::Result<i64> {
                    Err(jrpc_wire::WireError::ConnectionClosed.into())
                })
                .func("ping", || "pong"),
        );
        let (mut client, _task) = client_pair(router, "app");

        client.send_line("relay").await.unwrap();
        assert_eq!(
            client.decode::<Value>().await.unwrap_err().to_string(),
            "query rejected: \"other.svc\""
        );
        client.send_line("lost").await.unwrap();
        let err = client.decode::<Value>().await.unwrap_err();
        assert!(!err.is_closed(), "{err}");
        client.send_line("ping").await.unwrap();
        assert_eq!(client.decode::<String>().await.unwrap(), "pong");
    }

    #[tokio::test]
    async fn leftover_arguments_answer_a_failure() {
        let router = Arc::new(Router::new("app").func("double", |n: i64| n * 2));
        let (mut client, _task) = client_pair(router, "app");
        client.send_line("double 1 2").await.unwrap();
        assert_eq!(
            client.decode::<Value>().await.unwrap_err().to_string(),
            "unexpected trailing arguments: 2"
        );
        client.send_line("double[1] junk").await.unwrap();
        assert!(client.decode::<Value>().await.is_err());
        client.send_line("double 4").await.unwrap();
        assert_eq!(client.decode::<i64>().await.unwrap(), 8);
    }

    #[tokio::test]
    async fn denied_scope_hides_its_routes() {
        let router = Arc::new(
            Router::new("app")
                .func("vault.open", || "opened")
                .func("vault!", || false),
        );
        let (mut client, _task) = client_pair(router, "app");
        client.send_line("vault.missing").await.unwrap();
        assert_eq!(
            client.decode::<Value>().await.unwrap_err().to_string(),
            "unauthorized"
        );
    }

    #[tokio::test]
    async fn first_line_comes_from_the_query() {
        let router = Arc::new(Router::new("app").func("double", |n: i64| n * 2));
        let (mut client, _task) = client_pair(router, "app.double 5");
        assert_eq!(client.decode::<i64>().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn guards_run_once_per_scope() {
        let (calls_tx, mut calls) = mpsc::unbounded_channel();
        let router = Arc::new(
            Router::new("app")
                .func("a.x", || 1)
                .func("a.y", || 2)
                .func("b", || 3)
                .func("a!", move || {
                    let _ = calls_tx.send(());
                    true
                }),
        );
        let (mut client, _task) = client_pair(router, "app");
        for line in ["a.x", "a.y", "b", "a.x"] {
            client.send_line(line).await.unwrap();
        }
        for expected in [1, 2, 3, 1] {
            assert_eq!(client.decode::<i64>().await.unwrap(), expected);
        }
        let mut runs = 0;
        while calls.try_recv().is_ok() {
            runs += 1;
        }
        // a.x and a.y share a scope; b leaves it, so the last a.x re-runs.
        assert_eq!(runs, 2);
    }

    #[tokio::test]
    async fn handlers_reach_the_flow() {
        let router = Arc::new(Router::new("app").func(
            "whoami",
            |Env(remote): Env<Identity>, Env(flow): Env<Flow>| {
                format!("{remote}/{}", flow.remote_identity())
            },
        ));
        let (mut client, _task) = client_pair(router, "app");
        client.send_line("whoami").await.unwrap();
        assert_eq!(client.decode::<String>().await.unwrap(), "client/client");
    }

    #[tokio::test]
    async fn stream_then_next_query() {
        let router = Arc::new(
            Router::new("app")
                .func("count", |n: i64| {
                    let (tx, rx) = mpsc::channel(8);
                    tokio::spawn(async move {
                        for i in 0..n {
                            if tx.send(json!({"i": i})).await.is_err() {
                                break;
                            }
                        }
                    });
                    ValueStream::from_receiver(rx)
                })
                .func("ping", || "pong"),
        );
        let (mut client, _task) = client_pair(router, "app");
        client.send_line("count 5").await.unwrap();
        for i in 0..5 {
            assert_eq!(client.decode::<Value>().await.unwrap(), json!({"i": i}));
        }
        client.send_line("ping").await.unwrap();
        assert_eq!(client.decode::<String>().await.unwrap(), "pong");
    }

    #[tokio::test]
    async fn cancelled_context_closes_the_session() {
        let router = Arc::new(Router::new("app").func("ping", || "pong"));
        let (a, b) = tokio::io::duplex(4096);
        let ctx = Context::new();
        let session_ctx = ctx.clone();
        let task = tokio::spawn(async move {
            let conn = Connection {
                stream: Box::new(a),
                remote: Identity::anyone(),
                query: "app".into(),
            };
            router.handle(&session_ctx, conn).await
        });
        let mut client = Flow::new(Box::new(b), Identity::anyone());
        client.send_line("ping").await.unwrap();
        assert_eq!(client.decode::<String>().await.unwrap(), "pong");

        ctx.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("session should end after cancel")
            .unwrap();
        assert!(client.decode::<Value>().await.unwrap_err().is_closed());
    }
}

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use jrpc_router::{Context, Env, Router, ValueStream};
use jrpc_transport::{Identity, Transport, UnixTransport};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::cmd::ServeArgs;
use crate::exit::{io_error, router_error, CliError, CliResult, INTERNAL, SUCCESS};

const TICK: Duration = Duration::from_millis(100);

/// Handle for stopping the whole router from inside a route.
#[derive(Clone)]
struct Shutdown(Context);

/// The owner of the router: the identity it was started as.
#[derive(Clone, PartialEq)]
struct Owner(Identity);

pub async fn run(args: ServeArgs, dir: &Path) -> CliResult<i32> {
    std::fs::create_dir_all(dir)
        .map_err(|err| io_error(&format!("creating {}", dir.display()), err))?;
    let transport = UnixTransport::new(dir);
    let ctx = Context::new();

    let mut router = demo_router(&args.port, Owner(transport.identity()), Shutdown(ctx.clone()));
    if args.trace {
        router = router.logger(args.port.as_str());
    }
    let running = Arc::new(router)
        .start(&ctx, &transport)
        .await
        .map_err(|err| router_error("serve failed", err))?;
    tracing::info!(ports = ?running.ports(), dir = %dir.display(), "demo router ready");

    tokio::select! {
        _ = ctx.cancelled() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|err| {
                CliError::new(INTERNAL, format!("signal handler setup failed: {err}"))
            })?;
            tracing::info!("interrupted, shutting down");
            ctx.cancel();
        }
    }
    running.wait().await;
    Ok(SUCCESS)
}

fn demo_router(port: &str, owner: Owner, shutdown: Shutdown) -> Router {
    Router::new(port)
        .routes(["*"])
        .with(owner)
        .with(shutdown)
        .func("ping", || "pong")
        .func("add", |a: f64, b: f64| a + b)
        .func("echo", |value: Value| value)
        .func("whoami", |Env(remote): Env<Identity>| remote.to_string())
        .func("ticks", |ctx: Context, n: u64| {
            let (tx, rx) = mpsc::channel(1);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(TICK);
                for tick in 1..=n {
                    tokio::select! {
                        _ = ctx.cancelled() => break,
                        _ = interval.tick() => {}
                    }
                    if tx.send(json!({"tick": tick})).await.is_err() {
                        break;
                    }
                }
            });
            ValueStream::from_receiver(rx)
        })
        .func("admin!", |Env(owner): Env<Owner>, Env(remote): Env<Identity>| {
            owner.0 == remote
        })
        .func("admin.stop", |Env(shutdown): Env<Shutdown>| {
            shutdown.0.cancel();
            "stopping"
        })
}

//! Minimal router on a Unix socket: echoes values and counts on request.
//!
//! Run with:
//!   cargo run --example echo-router
//!
//! In another terminal (use the directory printed on startup):
//!   cargo run --features cli -- --dir <DIR> call 'echo.say {"hello":"world"}'
//!   cargo run --features cli -- --dir <DIR> call 'echo.count 3' --count 3

use std::fs;
use std::sync::Arc;

use jrpc::router::{Context, Router, ValueStream};
use jrpc::transport::UnixTransport;
use serde_json::Value;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = std::env::temp_dir().join(format!("jrpc-echo-{}", std::process::id()));
    fs::create_dir_all(&dir)?;
    eprintln!("Sockets in {}", dir.display());

    let router = Arc::new(
        Router::new("echo")
            .routes(["*"])
            .func("say", |value: Value| value)
            .func("count", |n: u32| {
                let (tx, rx) = mpsc::channel(4);
                tokio::spawn(async move {
                    for i in 1..=n {
                        if tx.send(i).await.is_err() {
                            break;
                        }
                    }
                });
                ValueStream::from_receiver(rx)
            }),
    );

    let ctx = Context::new();
    let running = router.start(&ctx, &UnixTransport::new(&dir)).await?;
    eprintln!("Listening on {:?}", running.ports());

    tokio::signal::ctrl_c().await?;
    ctx.cancel();
    running.wait().await;

    let _ = fs::remove_dir_all(&dir);
    Ok(())
}

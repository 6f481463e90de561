//! Calling routers and services from the other side of a [`Conn`].
//!
//! Every helper works over both connection lifetimes: on a
//! [`Flow`](jrpc_wire::Flow) each call is one more line on the open stream,
//! on a [`Request`](jrpc_wire::Request) each call dials its own stream and
//! closes it once the reply is in.

use jrpc_wire::{Conn, MethodCall};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};

/// Query line for `route` with `args` as a JSON array, if any.
pub fn query_line(route: &str, args: &[Value]) -> Result<String> {
    if args.is_empty() {
        return Ok(route.to_string());
    }
    let args = serde_json::to_string(args).map_err(Error::Encode)?;
    Ok(format!("{route}{args}"))
}

/// Send one query without waiting for the reply.
pub async fn call<C: Conn>(conn: &mut C, route: &str, args: &[Value]) -> Result<()> {
    let line = query_line(route, args)?;
    conn.send_line(&line).await?;
    Ok(())
}

/// Wait for one reply frame and discard its value.
pub async fn await_reply<C: Conn>(conn: &mut C) -> Result<()> {
    conn.decode::<Value>().await?;
    Ok(())
}

/// Call and wait for completion. A stream that closes instead of replying
/// counts as done.
pub async fn command<C: Conn>(conn: &mut C, route: &str, args: &[Value]) -> Result<()> {
    call(conn, route, args).await?;
    let reply = match await_reply(conn).await {
        Err(Error::Wire(err)) if err.is_closed() => Ok(()),
        other => other,
    };
    conn.flush().await?;
    reply
}

/// Call and decode the reply.
pub async fn query<C, R>(conn: &mut C, route: &str, args: &[Value]) -> Result<R>
where
    C: Conn,
    R: DeserializeOwned + Send,
{
    call(conn, route, args).await?;
    let reply = conn.decode::<R>().await;
    conn.flush().await?;
    Ok(reply?)
}

/// Call and forward every reply frame to a channel.
///
/// The receiver yields items until the stream ends; a failure frame is
/// delivered once as an error and ends the subscription. Dropping the
/// receiver closes the connection at the next frame.
pub async fn subscribe<C, R>(
    mut conn: C,
    route: &str,
    args: &[Value],
    buffer: usize,
) -> Result<mpsc::Receiver<Result<R>>>
where
    C: Conn + 'static,
    R: DeserializeOwned + Send + 'static,
{
    call(&mut conn, route, args).await?;
    let (tx, rx) = mpsc::channel(buffer.max(1));
    tokio::spawn(async move {
        loop {
            match conn.decode::<R>().await {
                Ok(item) => {
                    if tx.send(Ok(item)).await.is_err() {
                        debug!("subscriber went away");
                        break;
                    }
                }
                Err(err) if err.is_closed() => break,
                Err(err) => {
                    let _ = tx.send(Err(err.into())).await;
                    break;
                }
            }
        }
        if let Err(err) = conn.flush().await {
            debug!(error = %err, "closing subscription");
        }
    });
    Ok(rx)
}

/// Send a method frame to a [`Server`](crate::Server) and decode the reply.
pub async fn invoke<C, R>(conn: &mut C, call: &MethodCall) -> Result<R>
where
    C: Conn,
    R: DeserializeOwned + Send,
{
    conn.encode(call).await?;
    let reply = conn.decode::<R>().await;
    conn.flush().await?;
    Ok(reply?)
}

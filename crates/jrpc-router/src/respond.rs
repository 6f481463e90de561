use jrpc_wire::{Conn, Flow};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::reply::{Output, ValueStream};

/// What is left of a connection after answering one request.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Answered {
    /// Ready for the next request, with a line already read during a drain.
    Ready(Option<String>),
    /// The stream is gone or the context was cancelled.
    Closed,
}

/// Write the outcome of one request.
///
/// No results answer `{}`, one value answers itself, several values answer
/// as one array, and a lone stream is drained frame by frame. Errors answer
/// a failure frame unless the connection itself failed.
pub(crate) async fn respond(
    flow: &mut Flow,
    ctx: &Context,
    result: Result<Vec<Output>>,
    watch_peer: bool,
) -> Answered {
    let outputs = match result {
        Ok(outputs) => outputs,
        Err(err) if err.is_fatal() => {
            debug!(error = %err, "connection lost while handling request");
            return Answered::Closed;
        }
        Err(err) => return send_error(flow, &err.to_string()).await,
    };

    let mut outputs = outputs.into_iter();
    match (outputs.next(), outputs.next()) {
        (None, _) => send_value(flow, &Value::Object(Map::new())).await,
        (Some(Output::Value(value)), None) => send_value(flow, &value).await,
        (Some(Output::Stream(stream)), None) => drain(flow, ctx, stream, watch_peer).await,
        (Some(first), Some(second)) => {
            let values: Option<Vec<Value>> = [first, second]
                .into_iter()
                .chain(outputs)
                .map(|output| match output {
                    Output::Value(value) => Some(value),
                    Output::Stream(_) => None,
                })
                .collect();
            match values {
                Some(values) => send_value(flow, &Value::Array(values)).await,
                None => send_error(flow, &Error::StreamNotAlone.to_string()).await,
            }
        }
    }
}

pub(crate) async fn send_value(flow: &mut Flow, value: &Value) -> Answered {
    match flow.encode(value).await {
        Ok(()) => Answered::Ready(None),
        Err(err) if err.is_recoverable() => {
            warn!(error = %err, "result could not be encoded");
            send_error(flow, &err.to_string()).await
        }
        Err(err) => {
            debug!(error = %err, "write failed");
            Answered::Closed
        }
    }
}

pub(crate) async fn send_error(flow: &mut Flow, message: &str) -> Answered {
    match flow.encode_error(message).await {
        Ok(()) => Answered::Ready(None),
        Err(err) => {
            debug!(error = %err, "write failed");
            Answered::Closed
        }
    }
}

/// Forward stream items until the producer ends, the context is cancelled
/// or the peer goes away.
///
/// With `watch_peer` the read side is polled too, so a peer hanging up is
/// noticed even while the producer is quiet. A line that arrives meanwhile
/// is kept for the caller.
async fn drain(flow: &mut Flow, ctx: &Context, mut stream: ValueStream, watch_peer: bool) -> Answered {
    let mut reader = flow.copy();
    let mut pending: Option<String> = None;
    let mut sent = 0usize;
    loop {
        tokio::select! {
            biased;

            _ = ctx.cancelled() => {
                debug!(sent, "stream cancelled");
                return Answered::Closed;
            }

            line = reader.read_line(), if watch_peer && pending.is_none() => match line {
                Ok(Some(line)) => pending = Some(line),
                Ok(None) | Err(_) => {
                    debug!(sent, "peer closed during stream");
                    return Answered::Closed;
                }
            },

            item = stream.next() => match item {
                None => {
                    debug!(sent, "stream finished");
                    return Answered::Ready(pending);
                }
                Some(Ok(value)) => match send_value(flow, &value).await {
                    Answered::Ready(_) => sent += 1,
                    Answered::Closed => return Answered::Closed,
                },
                Some(Err(err)) => {
                    return match send_error(flow, &err.to_string()).await {
                        Answered::Ready(_) => Answered::Ready(pending),
                        Answered::Closed => Answered::Closed,
                    };
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use jrpc_transport::Identity;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;

    fn pair() -> (Flow, Flow) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (
            Flow::new(Box::new(a), Identity::new("client")),
            Flow::new(Box::new(b), Identity::new("server")),
        )
    }

    #[tokio::test]
    async fn shapes_of_results() {
        let (mut server, mut client) = pair();
        let ctx = Context::new();

        respond(&mut server, &ctx, Ok(vec![]), false).await;
        respond(&mut server, &ctx, Ok(vec![Output::Value(json!(1))]), false).await;
        respond(
            &mut server,
            &ctx,
            Ok(vec![Output::Value(json!(1)), Output::Value(json!("a"))]),
            false,
        )
        .await;
        respond(&mut server, &ctx, Err(Error::invocation("test error 3")), false).await;

        assert_eq!(client.decode::<Value>().await.unwrap(), json!({}));
        assert_eq!(client.decode::<Value>().await.unwrap(), json!(1));
        assert_eq!(client.decode::<Value>().await.unwrap(), json!([1, "a"]));
        let err = client.decode::<Value>().await.unwrap_err();
        assert_eq!(err.to_string(), "test error 3");
    }

    #[tokio::test]
    async fn reserved_field_becomes_failure() {
        let (mut server, mut client) = pair();
        let answered = respond(
            &mut server,
            &Context::new(),
            Ok(vec![Output::Value(json!({"error": "x"}))]),
            false,
        )
        .await;
        assert_eq!(answered, Answered::Ready(None));
        assert!(client.decode::<Value>().await.is_err());
    }

    #[tokio::test]
    async fn stream_beside_values_is_refused() {
        let (mut server, mut client) = pair();
        let (_tx, rx) = mpsc::channel::<i64>(1);
        respond(
            &mut server,
            &Context::new(),
            Ok(vec![
                Output::Value(json!(1)),
                Output::Stream(ValueStream::from_receiver(rx)),
            ]),
            false,
        )
        .await;
        let err = client.decode::<Value>().await.unwrap_err();
        assert_eq!(err.to_string(), Error::StreamNotAlone.to_string());
    }

    #[tokio::test]
    async fn drains_until_producer_is_done() {
        let (mut server, mut client) = pair();
        let (tx, rx) = mpsc::channel(8);
        for n in 0..5 {
            tx.send(json!({"n": n})).await.unwrap();
        }
        drop(tx);

        let answered = respond(
            &mut server,
            &Context::new(),
            Ok(vec![Output::Stream(ValueStream::from_receiver(rx))]),
            true,
        )
        .await;
        assert_eq!(answered, Answered::Ready(None));
        for n in 0..5 {
            assert_eq!(client.decode::<Value>().await.unwrap(), json!({"n": n}));
        }
    }

    #[tokio::test]
    async fn cancellation_stops_the_drain() {
        let (mut server, mut client) = pair();
        let (tx, rx) = mpsc::channel(8);
        tx.send(json!(1)).await.unwrap();
        let ctx = Context::new();

        let drain_ctx = ctx.clone();
        let task = tokio::spawn(async move {
            respond(
                &mut server,
                &drain_ctx,
                Ok(vec![Output::Stream(ValueStream::from_receiver(rx))]),
                false,
            )
            .await
        });

        assert_eq!(client.decode::<Value>().await.unwrap(), json!(1));
        ctx.cancel();
        assert_eq!(task.await.unwrap(), Answered::Closed);
        drop(tx);
    }

    #[tokio::test]
    async fn peer_hangup_stops_a_quiet_stream() {
        let (mut server, client) = pair();
        let (tx, rx) = mpsc::channel::<Value>(1);
        drop(client);
        let answered = respond(
            &mut server,
            &Context::new(),
            Ok(vec![Output::Stream(ValueStream::from_receiver(rx))]),
            true,
        )
        .await;
        assert_eq!(answered, Answered::Closed);
        drop(tx);
    }

    #[tokio::test]
    async fn line_read_during_drain_is_kept() {
        let (mut server, mut client) = pair();
        let (tx, rx) = mpsc::channel(1);
        client.send_line("next query").await.unwrap();

        let task = tokio::spawn(async move {
            respond(
                &mut server,
                &Context::new(),
                Ok(vec![Output::Stream(ValueStream::from_receiver(rx))]),
                true,
            )
            .await
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        tx.send(json!("late")).await.unwrap();
        drop(tx);

        assert_eq!(client.decode::<Value>().await.unwrap(), json!("late"));
        assert_eq!(
            task.await.unwrap(),
            Answered::Ready(Some("next query".to_string()))
        );
    }
}

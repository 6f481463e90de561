use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use futures_core::Stream;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::handler::{erase, ErasedHandler, Handler};

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a handler produced, before it is written to the wire.
pub enum Reply {
    /// Nothing to report; answered as `{}`.
    Empty,
    /// One JSON value.
    Value(Value),
    /// Several results; answered as one JSON array.
    Many(Vec<Reply>),
    /// Values produced over time, one frame each.
    Stream(ValueStream),
    /// Work still running; its result is answered when it completes.
    Deferred(BoxFuture<'static, Result<Reply>>),
    /// Another callable to run against the rest of the payload.
    Continue(Chain),
}

impl Reply {
    /// Wrap a future whose output becomes the reply.
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future + Send + 'static,
        F::Output: IntoReply,
    {
        Reply::Deferred(Box::pin(async move { future.await.into_reply() }))
    }

    /// Several results, with trailing nulls dropped.
    ///
    /// At least one result is kept, so a list of nulls answers `null`.
    pub fn many(items: Vec<Reply>) -> Self {
        let mut items = items;
        while items.len() > 1 && items.last().is_some_and(Reply::is_null) {
            items.pop();
        }
        Reply::Many(items)
    }

    pub fn value<T: Serialize>(value: T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Reply::Value)
            .map_err(Error::Encode)
    }

    fn is_null(&self) -> bool {
        matches!(self, Reply::Empty | Reply::Value(Value::Null))
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Empty => f.write_str("Empty"),
            Reply::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Reply::Many(items) => f.debug_tuple("Many").field(items).finish(),
            Reply::Stream(_) => f.write_str("Stream(..)"),
            Reply::Deferred(_) => f.write_str("Deferred(..)"),
            Reply::Continue(_) => f.write_str("Continue(..)"),
        }
    }
}

/// Conversion from a handler's return value.
///
/// Implemented for `()`, scalars, strings, [`Value`], vectors, options and
/// tuples of serializable values. Wrap any other serializable type in
/// [`Json`].
pub trait IntoReply {
    fn into_reply(self) -> Result<Reply>;
}

/// A serializable value answered as itself.
///
/// ```
/// # use jrpc_router::Json;
/// #[derive(serde::Serialize)]
/// struct Point {
///     x: i64,
///     y: i64,
/// }
///
/// let handler = |x: i64, y: i64| Json(Point { x, y });
/// # let _ = handler;
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoReply for Json<T> {
    fn into_reply(self) -> Result<Reply> {
        Reply::value(self.0)
    }
}

impl IntoReply for () {
    fn into_reply(self) -> Result<Reply> {
        Ok(Reply::Empty)
    }
}

macro_rules! impl_value_reply {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl IntoReply for $ty {
                fn into_reply(self) -> Result<Reply> {
                    Reply::value(self)
                }
            }
        )+
    };
}

impl_value_reply!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64,
    String, &'static str, Value,
);

impl<T: Serialize> IntoReply for Vec<T> {
    fn into_reply(self) -> Result<Reply> {
        Reply::value(self)
    }
}

/// `None` answers `null`.
impl<T: Serialize> IntoReply for Option<T> {
    fn into_reply(self) -> Result<Reply> {
        Reply::value(self)
    }
}

macro_rules! impl_tuple_reply {
    ($($ty:ident),+) => {
        /// A tuple answers as an array.
        impl<$($ty: Serialize,)+> IntoReply for ($($ty,)+) {
            fn into_reply(self) -> Result<Reply> {
                Reply::value(self)
            }
        }
    };
}

impl_tuple_reply!(A1);
impl_tuple_reply!(A1, A2);
impl_tuple_reply!(A1, A2, A3);
impl_tuple_reply!(A1, A2, A3, A4);
impl_tuple_reply!(A1, A2, A3, A4, A5);
impl_tuple_reply!(A1, A2, A3, A4, A5, A6);
impl_tuple_reply!(A1, A2, A3, A4, A5, A6, A7);
impl_tuple_reply!(A1, A2, A3, A4, A5, A6, A7, A8);

/// A failed handler answers with a failure frame carrying the message.
impl<T: IntoReply> IntoReply for Result<T> {
    fn into_reply(self) -> Result<Reply> {
        self?.into_reply()
    }
}

impl IntoReply for Reply {
    fn into_reply(self) -> Result<Reply> {
        Ok(self)
    }
}

impl IntoReply for ValueStream {
    fn into_reply(self) -> Result<Reply> {
        Ok(Reply::Stream(self))
    }
}

impl IntoReply for Chain {
    fn into_reply(self) -> Result<Reply> {
        Ok(Reply::Continue(self))
    }
}

/// A result ready to write: a value, or a stream to drain.
pub enum Output {
    Value(Value),
    Stream(ValueStream),
}

impl Output {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Output::Value(value) => Some(value),
            Output::Stream(_) => None,
        }
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Output::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Values produced over time, each answered as its own frame.
///
/// The stream ends when the producer is done or dropped; the session then
/// goes back to reading queries.
pub struct ValueStream {
    inner: Pin<Box<dyn Stream<Item = Result<Value>> + Send>>,
}

impl ValueStream {
    /// Stream everything sent on `receiver` until its senders are dropped.
    pub fn from_receiver<T>(receiver: mpsc::Receiver<T>) -> Self
    where
        T: Serialize + Send + 'static,
    {
        Self::from_stream(ReceiverStream(receiver))
    }

    /// Stream the items of any serializable stream.
    pub fn from_stream<S, T>(stream: S) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
        T: Serialize,
    {
        Self {
            inner: Box::pin(SerializeStream {
                inner: Box::pin(stream),
            }),
        }
    }

    /// Next value; `None` once the producer is done.
    pub async fn next(&mut self) -> Option<Result<Value>> {
        std::future::poll_fn(|cx| self.inner.as_mut().poll_next(cx)).await
    }
}

impl Stream for ValueStream {
    type Item = Result<Value>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

struct ReceiverStream<T>(mpsc::Receiver<T>);

impl<T> Stream for ReceiverStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<T>> {
        self.0.poll_recv(cx)
    }
}

struct SerializeStream<S> {
    inner: Pin<Box<S>>,
}

impl<S> Stream for SerializeStream<S>
where
    S: Stream,
    S::Item: Serialize,
{
    type Item = Result<Value>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx).map(|item| {
            item.map(|item| serde_json::to_value(item).map_err(Error::Encode))
        })
    }
}

/// A continuation: the callable to run next on the same payload.
///
/// The nested call inherits the environment and decoders of the call that
/// returned it.
#[derive(Clone)]
pub struct Chain {
    pub(crate) handler: Arc<dyn ErasedHandler>,
}

impl Chain {
    pub fn new<H, Args>(handler: H) -> Self
    where
        H: Handler<Args>,
        Args: 'static,
    {
        Self {
            handler: erase(handler),
        }
    }
}

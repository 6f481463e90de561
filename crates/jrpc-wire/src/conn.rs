use std::future::Future;

use jrpc_transport::Identity;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// One side of an RPC exchange, independent of connection lifetime.
///
/// [`Flow`](crate::Flow) and [`Request`](crate::Request) both implement it, so
/// client helpers work the same whether the stream is persistent or dialed
/// per call.
pub trait Conn: Send + Sized {
    /// Identity of the other side.
    fn remote_identity(&self) -> Identity;

    /// Send a raw query line.
    fn send_line(&mut self, line: &str) -> impl Future<Output = Result<()>> + Send;

    /// Send one value frame.
    fn encode<T>(&mut self, value: &T) -> impl Future<Output = Result<()>> + Send
    where
        T: Serialize + Sync + ?Sized;

    /// Send one failure frame.
    fn encode_error(&mut self, message: &str) -> impl Future<Output = Result<()>> + Send;

    /// Receive one frame; failure frames surface as `WireError::Remote`.
    fn decode<T>(&mut self) -> impl Future<Output = Result<T>> + Send
    where
        T: DeserializeOwned + Send;

    /// Finish the current exchange.
    fn flush(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Another handle to the same remote.
    fn copy(&self) -> Self;
}

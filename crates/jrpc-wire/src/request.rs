use std::sync::Arc;

use jrpc_transport::{Identity, Transport};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::codec::WireConfig;
use crate::conn::Conn;
use crate::error::{Result, WireError};
use crate::serializer::Serializer;

/// Per-call connection: every exchange dials a fresh stream.
///
/// `send_line` and `encode` open the stream, `decode` reads from it, and
/// `flush` closes it. Only the target identity and service name persist
/// between calls.
pub struct Request<T> {
    transport: Arc<T>,
    target: Identity,
    service: String,
    logger: Option<String>,
    config: WireConfig,
    open: Option<Serializer>,
}

impl<T: Transport> Request<T> {
    pub fn new(transport: Arc<T>, target: Identity, service: impl Into<String>) -> Self {
        Self {
            transport,
            target,
            service: service.into(),
            logger: None,
            config: WireConfig::default(),
            open: None,
        }
    }

    /// Mirror the traffic of every dialed stream to `tracing`.
    pub fn with_logger(mut self, label: impl Into<String>) -> Self {
        self.logger = Some(label.into());
        self
    }

    pub fn with_config(mut self, config: WireConfig) -> Self {
        self.config = config;
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Whether a stream from a previous send is still open.
    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    async fn dial(&mut self, query: &str) -> Result<&mut Serializer> {
        if let Some(mut previous) = self.open.take() {
            if let Err(err) = previous.shutdown().await {
                debug!(error = %err, "closing previous request stream");
            }
        }
        let conn = self.transport.query(&self.target, query).await?;
        debug!(query, remote = %conn.remote, "request stream opened");
        let mut serializer = Serializer::from_connection(conn, self.config.clone());
        if let Some(label) = &self.logger {
            serializer = serializer.with_logger(label);
        }
        Ok(self.open.insert(serializer))
    }
}

/// Join a service name and a query line into one dialable query.
///
/// Lines that already start with an argument marker are appended as-is;
/// anything else becomes a dotted sub-route.
pub fn join_query(service: &str, line: &str) -> String {
    match line.chars().next() {
        None => service.to_string(),
        Some('.' | '[' | '{' | '?' | ' ') => format!("{service}{line}"),
        Some(_) if service.is_empty() => line.to_string(),
        Some(_) => format!("{service}.{line}"),
    }
}

impl<T: Transport> Conn for Request<T> {
    fn remote_identity(&self) -> Identity {
        self.target.clone()
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        let query = join_query(&self.service, line);
        self.dial(&query).await?;
        Ok(())
    }

    async fn encode<V>(&mut self, value: &V) -> Result<()>
    where
        V: Serialize + Sync + ?Sized,
    {
        let service = self.service.clone();
        self.dial(&service).await?.encode(value).await
    }

    async fn encode_error(&mut self, message: &str) -> Result<()> {
        let service = self.service.clone();
        self.dial(&service).await?.encode_error(message).await
    }

    async fn decode<V>(&mut self) -> Result<V>
    where
        V: DeserializeOwned + Send,
    {
        self.open
            .as_mut()
            .ok_or(WireError::NotConnected)?
            .decode()
            .await
    }

    async fn flush(&mut self) -> Result<()> {
        match self.open.take() {
            Some(mut serializer) => serializer.shutdown().await,
            None => Ok(()),
        }
    }

    fn copy(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            target: self.target.clone(),
            service: self.service.clone(),
            logger: self.logger.clone(),
            config: self.config.clone(),
            open: None,
        }
    }
}

//! Query routing and dispatch for jrpc.
//!
//! A [`Router`] listens on a transport port and answers query lines such as
//! `app.sum 2 3` or `app.sum[2,3]` by calling the registered handler for the
//! longest matching dotted route. Handler parameters are bound from the
//! session environment first ([`Context`], [`Query`], `Env<Identity>`,
//! `Env<Flow>` and anything added with [`Router::with`]), and the rest are
//! decoded from the argument text.
//!
//! Routes ending in `!` are guards: they run before anything beneath them
//! and deny the caller by answering `false`.
//!
//! A [`Server`] is the object-style counterpart: each connection gets a
//! fresh [`Service`] and is driven by method frames instead of query lines.

pub mod args;
pub mod caller;
pub mod client;
pub mod context;
pub mod env;
pub mod error;
pub mod handler;
pub mod naming;
pub mod payload;
pub mod registry;
pub mod reply;
mod respond;
pub mod router;
pub mod server;
mod session;

pub use args::{default_decoders, ArgSource, ArgsDecoder, FlagArgs, JsonArgs};
pub use caller::Caller;
pub use context::Context;
pub use env::{ArgError, Env, EnvValue, Param, Query};
pub use error::{DecodeError, Error, Result};
pub use handler::Handler;
pub use naming::method_route;
pub use payload::Payload;
pub use registry::{Registry, Target, Unfold, API_ROUTE, GUARD_SUFFIX, WILDCARD};
pub use reply::{Chain, IntoReply, Json, Output, Reply, ValueStream};
pub use router::{Router, Running};
pub use server::{Server, Service, ServiceFactory};

//! Line-oriented JSON RPC over local transports.
//!
//! A query such as `notes.list 10` or `notes.list[10]` is dialed like an
//! address, answered by the router listening on the `notes` port, and every
//! reply travels back as one line of JSON.
//!
//! # Crate Structure
//!
//! - [`transport`]: identities, ports and the in-memory and Unix socket transports
//! - [`wire`]: the newline-delimited frame codec and the `Flow`/`Request` connections
//! - [`router`]: route registry, argument decoding, sessions and method servers
//!   (behind the `router` feature)

/// Re-export transport types.
pub mod transport {
    pub use jrpc_transport::*;
}

/// Re-export wire types.
pub mod wire {
    pub use jrpc_wire::*;
}

/// Re-export router types (requires `router` feature).
#[cfg(feature = "router")]
pub mod router {
    pub use jrpc_router::*;
}

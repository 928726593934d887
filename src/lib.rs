//! A small RPC framework built on a self-describing binary value codec and
//! a channel transport abstraction.
//!
//! The value codec ([`types`], [`value`]) lets a `Value` describe its own
//! shape on the wire so a receiver never needs out-of-band schema
//! information. [`channel`] is the transport contract shared by in-process
//! and file-descriptor-backed carriers. [`rpc`] layers a fixed
//! request/response protocol, an endpoint registry, a worker-pool server,
//! and a polling client on top of the two.

pub mod channel;
pub mod error;
pub mod rpc;
pub mod types;
pub mod value;

pub use channel::{Channel, ChannelResult};
pub use error::{ChannelError, CodecError, RpcStatus};
pub use rpc::client::{ClientAttrs, RpcClient};
pub use rpc::server::{RpcServer, ServerConfig};
pub use rpc::{ConnectionId, Directive, Endpoint, EndpointSet};
pub use types::Type;
pub use value::Value;

/// The current version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

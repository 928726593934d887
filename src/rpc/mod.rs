//! Endpoints, the endpoint registry, and the fixed RPC wire protocol.

pub mod client;
pub mod server;
mod wire;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::RpcStatus;
use crate::types::Type;
use crate::value::Value;

/// Identifies one connected client channel for the lifetime of its connection.
pub type ConnectionId = u64;

/// Maximum number of arguments an endpoint may declare.
pub const MAX_ENDPOINT_ARGS: usize = 10;
/// Maximum number of endpoints an [`EndpointSet`] may hold.
pub const MAX_ENDPOINT_SET_SIZE: usize = 300;

/// What a worker should do with the connection after replying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    KeepAlive,
    Disconnect,
}

type EndpointFn<S> =
    dyn Fn(&S, ConnectionId, &[Value]) -> (Option<Value>, Directive) + Send + Sync;

/// A named, typed remote procedure.
pub struct Endpoint<S> {
    pub(crate) name: String,
    pub(crate) args: Vec<Type>,
    pub(crate) ret: Option<Type>,
    pub(crate) func: Arc<EndpointFn<S>>,
}

impl<S> Endpoint<S> {
    pub fn new(
        name: impl Into<String>,
        args: Vec<Type>,
        ret: Option<Type>,
        func: impl Fn(&S, ConnectionId, &[Value]) -> (Option<Value>, Directive) + Send + Sync + 'static,
    ) -> Result<Endpoint<S>, RpcStatus> {
        if args.len() > MAX_ENDPOINT_ARGS {
            return Err(RpcStatus::TooManyArguments);
        }
        Ok(Endpoint { name: name.into(), args, ret, func: Arc::new(func) })
    }

    /// Convenience constructor for an endpoint with no return value.
    pub fn argless(
        name: impl Into<String>,
        func: impl Fn(&S, ConnectionId, &[Value]) -> (Option<Value>, Directive) + Send + Sync + 'static,
    ) -> Result<Endpoint<S>, RpcStatus> {
        Endpoint::new(name, Vec::new(), None, func)
    }
}

/// An immutable, name-indexed set of [`Endpoint`]s.
pub struct EndpointSet<S> {
    by_name: HashMap<String, Endpoint<S>>,
}

impl<S> EndpointSet<S> {
    pub fn new(endpoints: Vec<Endpoint<S>>) -> Result<EndpointSet<S>, RpcStatus> {
        if endpoints.is_empty() || endpoints.len() > MAX_ENDPOINT_SET_SIZE {
            return Err(RpcStatus::ServerCreationError);
        }

        let mut by_name = HashMap::with_capacity(endpoints.len());
        for endpoint in endpoints {
            if by_name.contains_key(&endpoint.name) {
                return Err(RpcStatus::ServerCreationError);
            }
            by_name.insert(endpoint.name.clone(), endpoint);
        }
        Ok(EndpointSet { by_name })
    }

    pub fn lookup(&self, name: &str) -> Option<&Endpoint<S>> {
        self.by_name.get(name)
    }
}

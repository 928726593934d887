//! The worker-pool RPC server: a queue of connected channels drained by a
//! fixed pool of worker threads dispatching requests through an
//! [`EndpointSet`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::client::{ClientAttrs, RpcClient};
use super::wire;
use super::{ConnectionId, Directive, EndpointSet};
use crate::channel::local::LocalChannelConfig;
use crate::channel::paired::PairedChannel;
use crate::channel::Channel;
use crate::error::{ChannelError, RpcStatus};
use crate::value::Value;

/// Minimum `max_msg_size` the server will accept from an admitted channel.
pub const MIN_MSG_SIZE: usize = 64;

/// Tuning knobs for an [`RpcServer`].
#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    pub max_connections: usize,
    pub num_workers: usize,
    pub max_msg_size: usize,
    /// `Duration::ZERO` disables idle disconnection.
    pub idle_timeout: Duration,
    /// Back-off sleep a worker takes when it finds nothing to do.
    pub worker_usleep_amt: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            max_connections: 64,
            num_workers: 4,
            max_msg_size: 8192,
            idle_timeout: Duration::from_secs(30),
            worker_usleep_amt: Duration::from_millis(10),
        }
    }
}

struct ServerChannelEntry {
    id: ConnectionId,
    channel: Arc<dyn Channel>,
    last_activity: Instant,
}

struct Shared<S> {
    state: Arc<S>,
    endpoints: Arc<EndpointSet<S>>,
    cfg: ServerConfig,
    queue: Mutex<VecDeque<ServerChannelEntry>>,
    num_channels: Mutex<usize>,
    next_id: AtomicU64,
    should_exit: AtomicBool,
}

/// A running RPC server: `num_workers` threads draining a queue of
/// connected channels, dispatching requests to `S`-bound endpoints.
pub struct RpcServer<S> {
    shared: Arc<Shared<S>>,
    workers: Vec<JoinHandle<()>>,
}

impl<S: Send + Sync + 'static> RpcServer<S> {
    pub fn new(
        state: S,
        endpoints: EndpointSet<S>,
        cfg: ServerConfig,
    ) -> Result<RpcServer<S>, RpcStatus> {
        if cfg.max_connections == 0
            || cfg.num_workers == 0
            || cfg.num_workers > cfg.max_connections
            || cfg.max_msg_size < MIN_MSG_SIZE
        {
            return Err(RpcStatus::ServerCreationError);
        }

        let shared = Arc::new(Shared {
            state: Arc::new(state),
            endpoints: Arc::new(endpoints),
            cfg,
            queue: Mutex::new(VecDeque::new()),
            num_channels: Mutex::new(0),
            next_id: AtomicU64::new(1),
            should_exit: AtomicBool::new(false),
        });

        let workers = (0..cfg.num_workers)
            .map(|idx| spawn_worker(idx, shared.clone()))
            .collect();

        Ok(RpcServer { shared, workers })
    }

    /// Admit a new channel into the server's round-robin work queue.
    pub fn give_channel(&self, channel: Arc<dyn Channel>) -> Result<ConnectionId, RpcStatus> {
        let size = channel.max_msg_size();
        if size < MIN_MSG_SIZE || size > self.shared.cfg.max_msg_size {
            return Err(RpcStatus::BufferTooSmall);
        }

        let mut num_channels = self.shared.num_channels.lock().unwrap();
        if *num_channels >= self.shared.cfg.max_connections {
            return Err(RpcStatus::ServerFull);
        }

        let id = self
            .shared
            .next_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| {
                if id == u64::MAX {
                    None
                } else {
                    Some(id + 1)
                }
            })
            .map_err(|_| RpcStatus::ServerFull)?;
        self.shared.queue.lock().unwrap().push_back(ServerChannelEntry {
            id,
            channel,
            last_activity: Instant::now(),
        });
        *num_channels += 1;
        debug!(connection_id = id, "rpc server: channel admitted");
        Ok(id)
    }

    /// Build an in-process paired channel, give one end to this server, and
    /// hand back a client wired to the other end.
    pub fn local_client(&self, attrs: ClientAttrs) -> Result<RpcClient, RpcStatus> {
        let cfg = LocalChannelConfig {
            queue_depth: 16,
            max_msg_size: self.shared.cfg.max_msg_size,
            write_over: false,
        };
        let (server_side, client_side) = PairedChannel::new_pair(cfg);
        self.give_channel(Arc::new(server_side))?;
        RpcClient::new(Arc::new(client_side), attrs)
    }

    pub fn num_channels(&self) -> usize {
        *self.shared.num_channels.lock().unwrap()
    }
}

impl<S> Drop for RpcServer<S> {
    fn drop(&mut self) {
        self.shared.should_exit.store(true, Ordering::Release);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        let mut queue = self.shared.queue.lock().unwrap();
        for entry in queue.drain(..) {
            let _ = entry.channel.close();
        }
        debug!("rpc server: shutdown complete");
    }
}

fn spawn_worker<S: Send + Sync + 'static>(idx: usize, shared: Arc<Shared<S>>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("chrpc-worker-{idx}"))
        .spawn(move || worker_loop(shared))
        .expect("failed to spawn rpc worker thread")
}

fn worker_loop<S: Send + Sync + 'static>(shared: Arc<Shared<S>>) {
    let mut scratch = vec![0u8; shared.cfg.max_msg_size];

    loop {
        if shared.should_exit.load(Ordering::Acquire) {
            return;
        }

        let mut entry = match shared.queue.lock().unwrap().pop_front() {
            Some(entry) => entry,
            None => {
                std::thread::sleep(shared.cfg.worker_usleep_amt);
                continue;
            }
        };

        match service_one(&shared, &mut entry, &mut scratch) {
            WorkerOutcome::Requeue => {
                shared.queue.lock().unwrap().push_back(entry);
            }
            WorkerOutcome::Idle => {
                std::thread::sleep(shared.cfg.worker_usleep_amt);
                shared.queue.lock().unwrap().push_back(entry);
            }
            WorkerOutcome::Disconnect => {
                let _ = entry.channel.close();
                *shared.num_channels.lock().unwrap() -= 1;
                debug!(connection_id = entry.id, "rpc server: channel disconnected");
            }
        }
    }
}

enum WorkerOutcome {
    Requeue,
    Idle,
    Disconnect,
}

fn service_one<S: Send + Sync + 'static>(
    shared: &Shared<S>,
    entry: &mut ServerChannelEntry,
    scratch: &mut [u8],
) -> WorkerOutcome {
    if entry.channel.refresh().is_err() {
        return WorkerOutcome::Disconnect;
    }

    let received = match entry.channel.receive(scratch) {
        Ok(n) => n,
        Err(ChannelError::NoIncomingMsg) => {
            let timeout = shared.cfg.idle_timeout;
            if !timeout.is_zero() && entry.last_activity.elapsed() > timeout {
                debug!(connection_id = entry.id, "rpc server: idle timeout");
                return WorkerOutcome::Disconnect;
            }
            return WorkerOutcome::Idle;
        }
        Err(_) => return WorkerOutcome::Disconnect,
    };

    let (name, arg_bytes) = match wire::unpack_request(&scratch[..received]) {
        Ok(parsed) => parsed,
        Err(status) => return reply_and_requeue(entry, scratch, status, None),
    };

    let endpoint = match shared.endpoints.lookup(&name) {
        Some(endpoint) => endpoint,
        None => {
            warn!(endpoint = %name, connection_id = entry.id, "rpc server: unknown endpoint");
            return reply_and_requeue(entry, scratch, RpcStatus::UnknownEndpoint, None);
        }
    };

    if arg_bytes.len() != endpoint.args.len() {
        return reply_and_requeue(entry, scratch, RpcStatus::ArgumentMismatch, None);
    }

    let mut args = Vec::with_capacity(arg_bytes.len());
    for (bytes, expected_ty) in arg_bytes.iter().zip(&endpoint.args) {
        let parsed = Value::value_from_buffer_with_length(bytes);
        match parsed {
            Ok((value, _)) if value.get_type() == *expected_ty => args.push(value),
            Ok(_) | Err(_) => {
                return reply_and_requeue(entry, scratch, RpcStatus::ArgumentMismatch, None);
            }
        }
    }

    trace!(endpoint = %name, connection_id = entry.id, "rpc server: dispatching request");
    let (ret, directive) = (endpoint.func)(&shared.state, entry.id, &args);

    let ret_ty_ok = match (&ret, &endpoint.ret) {
        (None, None) => true,
        (Some(v), Some(expected)) => v.get_type() == *expected,
        _ => false,
    };
    if !ret_ty_ok {
        warn!(endpoint = %name, connection_id = entry.id, "rpc server: endpoint returned a mismatched type");
        return reply_and_requeue(entry, scratch, RpcStatus::ServerInternalError, None);
    }

    if !reply(entry, scratch, RpcStatus::Success, ret.as_ref()) {
        return WorkerOutcome::Disconnect;
    }

    entry.last_activity = Instant::now();
    match directive {
        Directive::KeepAlive => WorkerOutcome::Requeue,
        Directive::Disconnect => WorkerOutcome::Disconnect,
    }
}

/// Send an error response and, if delivery succeeds, refresh
/// `last_activity` the same way a full successful invocation would — a
/// client that is actively (if fruitlessly) calling the server is not idle.
fn reply_and_requeue(
    entry: &mut ServerChannelEntry,
    scratch: &mut [u8],
    status: RpcStatus,
    ret: Option<&Value>,
) -> WorkerOutcome {
    if reply(entry, scratch, status, ret) {
        entry.last_activity = Instant::now();
        WorkerOutcome::Requeue
    } else {
        WorkerOutcome::Disconnect
    }
}

/// Build and send a response. Returns `false` if the channel itself failed
/// (caller should disconnect); a message that is merely too big to encode
/// degrades to a `BUFFER_TOO_SMALL` response rather than dropping the
/// connection.
fn reply(
    entry: &ServerChannelEntry,
    scratch: &mut [u8],
    status: RpcStatus,
    ret: Option<&Value>,
) -> bool {
    let response = match wire::build_response(status, ret) {
        Ok(response) => response,
        Err(_) => wire::build_response(RpcStatus::ServerInternalError, None)
            .expect("fallback error response always encodes"),
    };

    let written = match wire::encode(&response, scratch) {
        Ok(n) => n,
        Err(_) => {
            let fallback = wire::build_response(RpcStatus::BufferTooSmall, None)
                .expect("fallback error response always encodes");
            match wire::encode(&fallback, scratch) {
                Ok(n) => n,
                Err(_) => return false,
            }
        }
    };

    match entry.channel.send(&scratch[..written]) {
        Ok(()) => true,
        Err(ChannelError::InvalidMsgSize) => {
            let fallback = wire::build_response(RpcStatus::BufferTooSmall, None)
                .expect("fallback error response always encodes");
            match wire::encode(&fallback, scratch) {
                Ok(n) => entry.channel.send(&scratch[..n]).is_ok(),
                Err(_) => false,
            }
        }
        Err(_) => false,
    }
}

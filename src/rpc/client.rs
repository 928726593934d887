//! Synchronous RPC client: one request at a time, polled to completion.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::{wire, MAX_ENDPOINT_ARGS};
use crate::channel::Channel;
use crate::error::{ChannelError, RpcStatus};
use crate::value::Value;

/// Poll cadence and overall timeout for [`RpcClient::call`].
#[derive(Debug, Clone, Copy)]
pub struct ClientAttrs {
    /// How long to sleep between unsuccessful polls of the channel.
    pub cadence: Duration,
    /// Total time to wait for a response before giving up.
    pub timeout: Duration,
}

impl Default for ClientAttrs {
    fn default() -> Self {
        ClientAttrs {
            cadence: Duration::from_millis(50),
            timeout: Duration::from_secs(5),
        }
    }
}

/// A synchronous, polling RPC client bound to one channel.
///
/// Once a channel-level error occurs the client drops its channel; every
/// subsequent `call` then fails fast with `CLIENT_CHANNEL_ERROR` without
/// touching any transport.
pub struct RpcClient {
    channel: Option<Arc<dyn Channel>>,
    attrs: ClientAttrs,
    scratch: Vec<u8>,
}

impl RpcClient {
    pub fn new(channel: Arc<dyn Channel>, attrs: ClientAttrs) -> Result<RpcClient, RpcStatus> {
        if attrs.cadence.is_zero() {
            return Err(RpcStatus::ClientCreationError);
        }
        let scratch = vec![0u8; channel.max_msg_size()];
        Ok(RpcClient { channel: Some(channel), attrs, scratch })
    }

    pub fn with_default_attrs(channel: Arc<dyn Channel>) -> Result<RpcClient, RpcStatus> {
        RpcClient::new(channel, ClientAttrs::default())
    }

    /// Is the client still backed by a live channel?
    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    /// Invoke `name` with `args`, blocking until a response arrives or the
    /// client's timeout elapses.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Option<Value>, RpcStatus> {
        if args.len() > MAX_ENDPOINT_ARGS {
            return Err(RpcStatus::TooManyArguments);
        }

        let channel = self.channel.clone().ok_or(RpcStatus::ClientChannelError)?;

        let request = wire::build_request(name, args)?;
        let written = wire::encode(&request, &mut self.scratch)?;

        if channel.send(&self.scratch[..written]).is_err() {
            warn!(endpoint = name, "rpc client: send failed, dropping channel");
            self.channel = None;
            return Err(RpcStatus::ClientChannelError);
        }

        let received = self.poll_for_response(&channel)?;

        let (status, ret_bytes) = wire::unpack_response(&self.scratch[..received])
            .map_err(|_| RpcStatus::BadResponse)?;

        if status != RpcStatus::Success {
            return Err(status);
        }

        if ret_bytes.is_empty() {
            return Ok(None);
        }

        let (value, _) = Value::value_from_buffer_with_length(&ret_bytes)
            .map_err(|_| RpcStatus::BadResponse)?;
        Ok(Some(value))
    }

    fn poll_for_response(&mut self, channel: &Arc<dyn Channel>) -> Result<usize, RpcStatus> {
        let mut waited = Duration::ZERO;
        loop {
            if channel.refresh().is_err() {
                self.channel = None;
                return Err(RpcStatus::ClientChannelError);
            }

            match channel.receive(&mut self.scratch) {
                Ok(n) => {
                    trace!(bytes = n, "rpc client: response received");
                    return Ok(n);
                }
                Err(ChannelError::NoIncomingMsg) => {
                    if waited >= self.attrs.timeout {
                        debug!("rpc client: timed out waiting for a response");
                        self.channel = None;
                        return Err(RpcStatus::Disconnect);
                    }
                    std::thread::sleep(self.attrs.cadence);
                    waited += self.attrs.cadence;
                }
                Err(_) => {
                    self.channel = None;
                    return Err(RpcStatus::ClientChannelError);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::local::{LocalChannel, LocalChannelConfig};

    #[test]
    fn call_without_a_channel_fails_fast() {
        let local = LocalChannel::new(LocalChannelConfig::default());
        let channel: Arc<dyn Channel> = Arc::new(local);
        let mut client = RpcClient::with_default_attrs(channel).unwrap();
        client.channel = None;
        assert_eq!(client.call("anything", &[]), Err(RpcStatus::ClientChannelError));
    }

    #[test]
    fn zero_cadence_is_rejected_at_construction() {
        let local = LocalChannel::new(LocalChannelConfig::default());
        let channel: Arc<dyn Channel> = Arc::new(local);
        let attrs = ClientAttrs { cadence: Duration::ZERO, ..ClientAttrs::default() };
        assert_eq!(RpcClient::new(channel, attrs).err(), Some(RpcStatus::ClientCreationError));
    }

    #[test]
    fn too_many_arguments_is_rejected_before_touching_the_channel() {
        let local = LocalChannel::new(LocalChannelConfig::default());
        let channel: Arc<dyn Channel> = Arc::new(local);
        let mut client = RpcClient::with_default_attrs(channel).unwrap();
        let args = vec![Value::Byte(0); MAX_ENDPOINT_ARGS + 1];
        assert_eq!(client.call("f", &args), Err(RpcStatus::TooManyArguments));
        assert!(client.is_connected());
    }

    #[test]
    fn timeout_disconnects_when_no_response_ever_arrives() {
        let local = LocalChannel::new(LocalChannelConfig { max_msg_size: 4096, ..Default::default() });
        let channel: Arc<dyn Channel> = Arc::new(local);
        let attrs = ClientAttrs {
            cadence: Duration::from_millis(5),
            timeout: Duration::from_millis(20),
        };
        let mut client = RpcClient::new(channel, attrs).unwrap();
        let result = client.call("echo", &[Value::string("hi")]);
        assert_eq!(result, Err(RpcStatus::Disconnect));
        assert!(!client.is_connected());
    }
}

//! In-process, single-ended channel: a bounded FIFO of owned byte buffers.

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::trace;

use super::{Channel, ChannelResult};
use crate::error::ChannelError;

/// Tuning knobs for a [`LocalChannel`].
#[derive(Debug, Clone, Copy)]
pub struct LocalChannelConfig {
    /// Maximum number of queued messages. `0` means unbounded.
    pub queue_depth: usize,
    /// Upper bound on the size of a single message.
    pub max_msg_size: usize,
    /// When the queue is at `queue_depth`, drop the oldest message to make
    /// room for a new one instead of failing the `send`.
    pub write_over: bool,
}

impl Default for LocalChannelConfig {
    fn default() -> Self {
        LocalChannelConfig {
            queue_depth: 16,
            max_msg_size: 8192,
            write_over: false,
        }
    }
}

/// A bounded, mutex-protected FIFO of byte messages.
pub struct LocalChannel {
    cfg: LocalChannelConfig,
    queue: Mutex<VecDeque<Vec<u8>>>,
}

impl LocalChannel {
    pub fn new(cfg: LocalChannelConfig) -> LocalChannel {
        LocalChannel {
            cfg,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    fn is_full(&self, queue: &VecDeque<Vec<u8>>) -> bool {
        self.cfg.queue_depth != 0 && queue.len() >= self.cfg.queue_depth
    }
}

impl Channel for LocalChannel {
    fn max_msg_size(&self) -> usize {
        self.cfg.max_msg_size
    }

    fn send(&self, msg: &[u8]) -> ChannelResult<()> {
        if msg.is_empty() || msg.len() > self.cfg.max_msg_size {
            return Err(ChannelError::InvalidMsgSize);
        }

        let mut queue = self.queue.lock().unwrap();
        if self.is_full(&queue) {
            if !self.cfg.write_over {
                return Err(ChannelError::ChannelFull);
            }
            queue.pop_front();
        }
        queue.push_back(msg.to_vec());
        trace!(depth = queue.len(), "local channel: message queued");
        Ok(())
    }

    fn refresh(&self) -> ChannelResult<()> {
        Ok(())
    }

    fn incoming_len(&self) -> ChannelResult<usize> {
        let queue = self.queue.lock().unwrap();
        queue.front().map(|m| m.len()).ok_or(ChannelError::NoIncomingMsg)
    }

    fn receive(&self, buf: &mut [u8]) -> ChannelResult<usize> {
        let mut queue = self.queue.lock().unwrap();
        let len = queue.front().ok_or(ChannelError::NoIncomingMsg)?.len();
        if buf.len() < len {
            return Err(ChannelError::BufferTooSmall);
        }
        let message = queue.pop_front().unwrap();
        buf[..len].copy_from_slice(&message);
        Ok(len)
    }

    fn close(&self) -> ChannelResult<()> {
        self.queue.lock().unwrap().clear();
        Ok(())
    }
}

//! File-descriptor-backed channel.
//!
//! The original implementation this crate is modelled on left this
//! transport as a stub (`send`/`receive`/`refresh` all unimplemented). This
//! is a full completion of the design sketched by the rest of that
//! codebase: outgoing messages are queued and drained by a dedicated
//! writer thread doing blocking, length-prefixed writes; incoming bytes
//! are reassembled from non-blocking reads performed by `refresh`.

use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd;
use tracing::{debug, error, trace, warn};

use super::{Channel, ChannelResult};
use crate::error::ChannelError;

/// Tuning knobs for an [`FdChannel`].
#[derive(Debug, Clone, Copy)]
pub struct FdChannelConfig {
    /// Maximum number of queued outgoing messages. `0` means unbounded.
    pub queue_depth: usize,
    pub write_fd: RawFd,
    /// `None` means the read side shares `write_fd`.
    pub read_fd: Option<RawFd>,
    pub write_over: bool,
    pub max_msg_size: usize,
    /// Size of each non-blocking read performed by `refresh`.
    pub read_chunk_size: usize,
}

impl FdChannelConfig {
    fn read_fd(&self) -> RawFd {
        self.read_fd.unwrap_or(self.write_fd)
    }
}

struct Outgoing {
    queue: Mutex<VecDeque<Vec<u8>>>,
    ready: Condvar,
    write_failed: AtomicBool,
}

struct Incoming {
    partial: Vec<u8>,
    ready: VecDeque<Vec<u8>>,
}

/// A channel riding on a pair of raw file descriptors.
pub struct FdChannel {
    cfg: FdChannelConfig,
    outgoing: Arc<Outgoing>,
    incoming: Mutex<Incoming>,
    writer: Mutex<Option<JoinHandle<()>>>,
    should_exit: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl FdChannel {
    pub fn new(cfg: FdChannelConfig) -> ChannelResult<FdChannel> {
        if cfg.max_msg_size == 0 || cfg.read_chunk_size == 0 {
            return Err(ChannelError::InvalidArgs);
        }

        set_nonblocking(cfg.read_fd())?;

        let outgoing = Arc::new(Outgoing {
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            write_failed: AtomicBool::new(false),
        });
        let should_exit = Arc::new(AtomicBool::new(false));

        let writer = spawn_writer(cfg.write_fd, outgoing.clone(), should_exit.clone());

        Ok(FdChannel {
            cfg,
            outgoing,
            incoming: Mutex::new(Incoming { partial: Vec::new(), ready: VecDeque::new() }),
            writer: Mutex::new(Some(writer)),
            should_exit,
            closed: AtomicBool::new(false),
        })
    }

    fn queue_is_full(&self, queue: &VecDeque<Vec<u8>>) -> bool {
        self.cfg.queue_depth != 0 && queue.len() >= self.cfg.queue_depth
    }
}

fn set_nonblocking(fd: RawFd) -> ChannelResult<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(|_| ChannelError::InvalidArgs)?;
    let mut flags = OFlag::from_bits_truncate(flags);
    flags.insert(OFlag::O_NONBLOCK);
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(|_| ChannelError::InvalidArgs)?;
    Ok(())
}

fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(4 + payload.len());
    framed.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    framed.extend_from_slice(payload);
    framed
}

fn write_all_blocking(fd: RawFd, mut bytes: &[u8]) -> ChannelResult<()> {
    while !bytes.is_empty() {
        match unistd::write(fd, bytes) {
            Ok(0) => return Err(ChannelError::CannotWrite),
            Ok(n) => bytes = &bytes[n..],
            Err(Errno::EINTR) => continue,
            Err(_) => return Err(ChannelError::CannotWrite),
        }
    }
    Ok(())
}

fn spawn_writer(
    write_fd: RawFd,
    outgoing: Arc<Outgoing>,
    should_exit: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || loop {
        if should_exit.load(Ordering::Acquire) {
            return;
        }

        let next = {
            let mut queue = outgoing.queue.lock().unwrap();
            if queue.is_empty() {
                let (_guard, _timeout) = outgoing
                    .ready
                    .wait_timeout(queue, Duration::from_millis(50))
                    .unwrap();
                continue;
            }
            queue.pop_front()
        };

        if let Some(message) = next {
            let framed = encode_frame(&message);
            if write_all_blocking(write_fd, &framed).is_err() {
                error!("fd channel: write failed, marking channel unwritable");
                outgoing.write_failed.store(true, Ordering::Release);
            } else {
                trace!(len = message.len(), "fd channel: frame written");
            }
        }
    })
}

impl Channel for FdChannel {
    fn max_msg_size(&self) -> usize {
        self.cfg.max_msg_size
    }

    fn send(&self, msg: &[u8]) -> ChannelResult<()> {
        if msg.is_empty() || msg.len() > self.cfg.max_msg_size {
            return Err(ChannelError::InvalidMsgSize);
        }
        if self.outgoing.write_failed.load(Ordering::Acquire) {
            return Err(ChannelError::CannotWrite);
        }

        let mut queue = self.outgoing.queue.lock().unwrap();
        if self.queue_is_full(&queue) {
            if !self.cfg.write_over {
                return Err(ChannelError::ChannelFull);
            }
            queue.pop_front();
        }
        queue.push_back(msg.to_vec());
        self.outgoing.ready.notify_one();
        Ok(())
    }

    fn refresh(&self) -> ChannelResult<()> {
        let mut incoming = self.incoming.lock().unwrap();
        let mut chunk = vec![0u8; self.cfg.read_chunk_size];

        loop {
            match unistd::read(self.cfg.read_fd(), &mut chunk) {
                Ok(0) => break,
                Ok(n) => incoming.partial.extend_from_slice(&chunk[..n]),
                Err(Errno::EAGAIN) => break,
                Err(Errno::EINTR) => continue,
                Err(_) => return Err(ChannelError::Unknown),
            }
        }

        while let Some(frame) = try_extract_frame(&mut incoming.partial) {
            incoming.ready.push_back(frame);
        }
        Ok(())
    }

    fn incoming_len(&self) -> ChannelResult<usize> {
        let incoming = self.incoming.lock().unwrap();
        incoming.ready.front().map(|m| m.len()).ok_or(ChannelError::NoIncomingMsg)
    }

    fn receive(&self, buf: &mut [u8]) -> ChannelResult<usize> {
        let mut incoming = self.incoming.lock().unwrap();
        let len = incoming.ready.front().ok_or(ChannelError::NoIncomingMsg)?.len();
        if buf.len() < len {
            return Err(ChannelError::BufferTooSmall);
        }
        let message = incoming.ready.pop_front().unwrap();
        buf[..len].copy_from_slice(&message);
        Ok(len)
    }

    fn close(&self) -> ChannelResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.should_exit.store(true, Ordering::Release);
        self.outgoing.ready.notify_all();
        if let Some(handle) = self.writer.lock().unwrap().take() {
            let _ = handle.join();
        }

        let read_fd = self.cfg.read_fd();
        if unistd::close(self.cfg.write_fd).is_err() {
            warn!("fd channel: error closing write fd");
        }
        if read_fd != self.cfg.write_fd && unistd::close(read_fd).is_err() {
            warn!("fd channel: error closing read fd");
        }
        debug!("fd channel closed");
        Ok(())
    }
}

impl Drop for FdChannel {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn try_extract_frame(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    if buf.len() < 4 {
        return None;
    }
    let len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    if buf.len() < 4 + len {
        return None;
    }
    let frame = buf[4..4 + len].to_vec();
    buf.drain(0..4 + len);
    Some(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::contract_tests::empty_channel_reports_no_incoming_msg;
    use std::os::unix::io::IntoRawFd;

    fn pipe_pair() -> ((RawFd, RawFd), (RawFd, RawFd)) {
        let (a_read, b_write) = nix::unistd::pipe().unwrap();
        let (b_read, a_write) = nix::unistd::pipe().unwrap();
        (
            (a_read.into_raw_fd(), a_write.into_raw_fd()),
            (b_read.into_raw_fd(), b_write.into_raw_fd()),
        )
    }

    fn make_channel(read_fd: RawFd, write_fd: RawFd) -> FdChannel {
        FdChannel::new(FdChannelConfig {
            queue_depth: 8,
            write_fd,
            read_fd: Some(read_fd),
            write_over: false,
            max_msg_size: 4096,
            read_chunk_size: 512,
        })
        .unwrap()
    }

    #[test]
    fn round_trips_a_message_over_a_pipe() {
        let ((a_read, a_write), (b_read, b_write)) = pipe_pair();
        let a = make_channel(a_read, a_write);
        let b = make_channel(b_read, b_write);

        a.send(b"hello over fd").unwrap();
        std::thread::sleep(Duration::from_millis(100));
        b.refresh().unwrap();

        let mut buf = vec![0u8; 64];
        let read = b.receive(&mut buf).unwrap();
        assert_eq!(&buf[..read], b"hello over fd");
    }

    #[test]
    fn empty_channel_reports_no_message_after_refresh() {
        let ((a_read, a_write), (_b_read, b_write)) = pipe_pair();
        let a = make_channel(a_read, a_write);
        empty_channel_reports_no_incoming_msg(&a);
        let _ = b_write;
    }

    #[test]
    fn rejects_oversized_sends() {
        let ((a_read, a_write), (_b_read, b_write)) = pipe_pair();
        let chan = make_channel(a_read, a_write);
        assert_eq!(chan.send(&vec![0u8; 5000]), Err(ChannelError::InvalidMsgSize));
        let _ = b_write;
    }
}

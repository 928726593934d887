//! In-process, bidirectional channel: two single-ended queues sharing a
//! core, with each endpoint routing `send` to one queue and
//! `refresh`/`incoming_len`/`receive` to the other.

use std::sync::Arc;

use super::local::{LocalChannel, LocalChannelConfig};
use super::{Channel, ChannelResult};

struct PairedCore {
    a2b: LocalChannel,
    b2a: LocalChannel,
}

/// One end of an in-process bidirectional channel pair.
pub struct PairedChannel {
    core: Arc<PairedCore>,
    /// `true` selects `a2b` for sending and `b2a` for receiving; `false` is the reverse.
    a_side: bool,
}

impl PairedChannel {
    /// Build a connected pair of endpoints sharing one configuration.
    pub fn new_pair(cfg: LocalChannelConfig) -> (PairedChannel, PairedChannel) {
        let core = Arc::new(PairedCore {
            a2b: LocalChannel::new(cfg),
            b2a: LocalChannel::new(cfg),
        });
        (
            PairedChannel { core: core.clone(), a_side: true },
            PairedChannel { core, a_side: false },
        )
    }

    fn outgoing(&self) -> &LocalChannel {
        if self.a_side {
            &self.core.a2b
        } else {
            &self.core.b2a
        }
    }

    fn incoming(&self) -> &LocalChannel {
        if self.a_side {
            &self.core.b2a
        } else {
            &self.core.a2b
        }
    }
}

impl Channel for PairedChannel {
    fn max_msg_size(&self) -> usize {
        self.core.a2b.max_msg_size()
    }

    fn send(&self, msg: &[u8]) -> ChannelResult<()> {
        self.outgoing().send(msg)
    }

    fn refresh(&self) -> ChannelResult<()> {
        self.incoming().refresh()
    }

    fn incoming_len(&self) -> ChannelResult<usize> {
        self.incoming().incoming_len()
    }

    fn receive(&self, buf: &mut [u8]) -> ChannelResult<usize> {
        self.incoming().receive(buf)
    }

    fn close(&self) -> ChannelResult<()> {
        self.outgoing().close()?;
        self.incoming().close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelError;

    #[test]
    fn messages_flow_in_both_directions() {
        let (a, b) = PairedChannel::new_pair(LocalChannelConfig::default());

        a.send(b"ping").unwrap();
        b.refresh().unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(b.receive(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"ping");

        b.send(b"pong").unwrap();
        a.refresh().unwrap();
        assert_eq!(a.receive(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"pong");
    }

    #[test]
    fn a_side_never_receives_its_own_send() {
        let (a, _b) = PairedChannel::new_pair(LocalChannelConfig::default());
        a.send(b"hello").unwrap();
        assert_eq!(a.incoming_len(), Err(ChannelError::NoIncomingMsg));
    }

    #[test]
    fn both_ends_agree_on_max_msg_size() {
        let cfg = LocalChannelConfig { max_msg_size: 123, ..Default::default() };
        let (a, b) = PairedChannel::new_pair(cfg);
        assert_eq!(a.max_msg_size(), 123);
        assert_eq!(b.max_msg_size(), 123);
    }
}

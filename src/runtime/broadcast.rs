//! Announcement formatting and fan-out.
//!
//! Three payload shapes exist on the wire:
//!
//! ```text
//! server: client {id} just arrived\n
//! Client {id}: {line}          ({line} keeps its own \n)
//! server: client {id} just left\n
//! ```
//!
//! A payload is formatted once into a scratch buffer and written to every
//! registered client except its source. A failed write to one recipient is
//! counted and otherwise ignored; that recipient is reaped when its own
//! socket reports the close.

use crate::runtime::connection::{ClientId, ConnectionRegistry, Handle};
use bytes::{BufMut, BytesMut};
use std::fmt::Write as _;
use std::io::Write;
use tracing::{debug, trace};

/// Why a broadcast is being sent on behalf of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent<'a> {
    Joined,
    Message(&'a [u8]),
    Left,
}

impl ClientEvent<'_> {
    fn kind(&self) -> &'static str {
        match self {
            ClientEvent::Joined => "joined",
            ClientEvent::Message(_) => "message",
            ClientEvent::Left => "left",
        }
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: usize,
}

/// Write one formatted event payload into `out`, replacing its contents.
pub fn format_event(out: &mut BytesMut, id: ClientId, event: ClientEvent<'_>) {
    out.clear();
    // Writing into a BytesMut only grows it and never fails.
    match event {
        ClientEvent::Joined => {
            let _ = writeln!(out, "server: client {id} just arrived");
        }
        ClientEvent::Message(line) => {
            let _ = write!(out, "Client {id}: ");
            out.put_slice(line);
        }
        ClientEvent::Left => {
            let _ = writeln!(out, "server: client {id} just left");
        }
    }
}

/// Formats announcements and delivers them to every other live client.
#[derive(Debug, Default)]
pub struct Broadcaster {
    payload: BytesMut,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn announce_join<S: Write>(
        &mut self,
        registry: &mut ConnectionRegistry<S>,
        source: Handle,
        id: ClientId,
    ) -> Delivery {
        self.broadcast(registry, source, id, ClientEvent::Joined)
    }

    /// `line` must already end in `\n`.
    pub fn announce_message<S: Write>(
        &mut self,
        registry: &mut ConnectionRegistry<S>,
        source: Handle,
        id: ClientId,
        line: &[u8],
    ) -> Delivery {
        self.broadcast(registry, source, id, ClientEvent::Message(line))
    }

    pub fn announce_leave<S: Write>(
        &mut self,
        registry: &mut ConnectionRegistry<S>,
        source: Handle,
        id: ClientId,
    ) -> Delivery {
        self.broadcast(registry, source, id, ClientEvent::Left)
    }

    /// Deliver `event` to every registered client except `source`.
    ///
    /// Prefix and line body go out in a single write so that recipients
    /// never see them split by another broadcast.
    pub fn broadcast<S: Write>(
        &mut self,
        registry: &mut ConnectionRegistry<S>,
        source: Handle,
        id: ClientId,
        event: ClientEvent<'_>,
    ) -> Delivery {
        format_event(&mut self.payload, id, event);

        let payload = &self.payload[..];
        let mut delivery = Delivery::default();
        registry.for_each_live_except(source, |handle, client| {
            match client.stream.write_all(payload) {
                Ok(()) => delivery.delivered += 1,
                Err(e) => {
                    trace!(handle, recipient = %client.id, error = %e, "Delivery failed");
                    delivery.failed += 1;
                }
            }
        });

        debug!(
            client = %id,
            kind = event.kind(),
            delivered = delivery.delivered,
            failed = delivery.failed,
            "Broadcast"
        );
        delivery
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    /// In-memory writer. `Broken` behaves like a peer that already hung up.
    #[derive(Debug)]
    enum Sink {
        Ok(Vec<u8>),
        Broken,
    }

    impl Write for Sink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            match self {
                Sink::Ok(out) => out.write(buf),
                Sink::Broken => Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone")),
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn received(registry: &ConnectionRegistry<Sink>, handle: Handle) -> String {
        match &registry.get(handle).unwrap().stream {
            Sink::Ok(out) => String::from_utf8(out.clone()).unwrap(),
            Sink::Broken => String::new(),
        }
    }

    fn format(id: u64, event: ClientEvent<'_>) -> Vec<u8> {
        let mut out = BytesMut::new();
        format_event(&mut out, ClientId(id), event);
        out.to_vec()
    }

    #[test]
    fn test_templates() {
        assert_eq!(format(0, ClientEvent::Joined), b"server: client 0 just arrived\n");
        assert_eq!(format(12, ClientEvent::Left), b"server: client 12 just left\n");
        assert_eq!(format(3, ClientEvent::Message(b"hi\n")), b"Client 3: hi\n");
    }

    #[test]
    fn test_format_replaces_previous_payload() {
        let mut out = BytesMut::new();
        format_event(&mut out, ClientId(7), ClientEvent::Message(b"a much longer line\n"));
        format_event(&mut out, ClientId(8), ClientEvent::Joined);
        assert_eq!(&out[..], b"server: client 8 just arrived\n");
    }

    #[test]
    fn test_message_reaches_everyone_but_sender() {
        let mut registry = ConnectionRegistry::new();
        let (a, a_id) = registry.insert(Sink::Ok(Vec::new()));
        let (b, _) = registry.insert(Sink::Ok(Vec::new()));
        let (c, _) = registry.insert(Sink::Ok(Vec::new()));

        let mut broadcaster = Broadcaster::new();
        let delivery = broadcaster.announce_message(&mut registry, a, a_id, b"hello\n");

        assert_eq!(delivery, Delivery { delivered: 2, failed: 0 });
        assert_eq!(received(&registry, a), "");
        assert_eq!(received(&registry, b), "Client 0: hello\n");
        assert_eq!(received(&registry, c), "Client 0: hello\n");
    }

    #[test]
    fn test_join_and_leave_skip_subject() {
        let mut registry = ConnectionRegistry::new();
        let (a, _) = registry.insert(Sink::Ok(Vec::new()));
        let (b, b_id) = registry.insert(Sink::Ok(Vec::new()));

        let mut broadcaster = Broadcaster::new();
        broadcaster.announce_join(&mut registry, b, b_id);
        broadcaster.announce_leave(&mut registry, b, b_id);

        assert_eq!(
            received(&registry, a),
            "server: client 1 just arrived\nserver: client 1 just left\n"
        );
        assert_eq!(received(&registry, b), "");
    }

    #[test]
    fn test_broken_recipient_does_not_abort_fanout() {
        let mut registry = ConnectionRegistry::new();
        let (a, a_id) = registry.insert(Sink::Ok(Vec::new()));
        registry.insert(Sink::Broken);
        let (c, _) = registry.insert(Sink::Ok(Vec::new()));

        let mut broadcaster = Broadcaster::new();
        let delivery = broadcaster.announce_message(&mut registry, a, a_id, b"x\n");

        assert_eq!(delivery, Delivery { delivered: 1, failed: 1 });
        assert_eq!(received(&registry, c), "Client 0: x\n");
    }

    #[test]
    fn test_lone_client_reaches_nobody() {
        let mut registry = ConnectionRegistry::new();
        let (a, a_id) = registry.insert(Sink::Ok(Vec::new()));

        let mut broadcaster = Broadcaster::new();
        let delivery = broadcaster.announce_join(&mut registry, a, a_id);
        assert_eq!(delivery, Delivery::default());
    }
}

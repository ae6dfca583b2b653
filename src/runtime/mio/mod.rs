//! mio-based readiness multiplexing.
//!
//! Readiness-based I/O using mio (epoll on Linux, kqueue on macOS).
//! `Readiness` wraps a `Poll` and its event buffer and copies the ready
//! tokens out, so the event loop can mutate its connection table while
//! walking the ready set.

mod event_loop;

pub use event_loop::Relay;

use mio::event::Source;
use mio::{Events, Interest, Poll, Token};
use std::io;

/// Token reserved for the listening socket.
pub const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Waits until one or more registered handles are readable.
pub struct Readiness {
    poll: Poll,
    events: Events,
}

impl Readiness {
    /// Create a multiplexer collecting up to `capacity` events per wait.
    pub fn new(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(capacity),
        })
    }

    pub fn register<S: Source + ?Sized>(&self, source: &mut S, token: Token) -> io::Result<()> {
        self.poll
            .registry()
            .register(source, token, Interest::READABLE)
    }

    pub fn deregister<S: Source + ?Sized>(&self, source: &mut S) -> io::Result<()> {
        self.poll.registry().deregister(source)
    }

    /// Block without timeout until at least one handle is ready, replacing
    /// the contents of `ready` with the ready tokens in reported order.
    ///
    /// Interrupted waits are retried. Any other error is fatal to the caller.
    pub fn wait(&mut self, ready: &mut Vec<Token>) -> io::Result<()> {
        loop {
            match self.poll.poll(&mut self.events, None) {
                Ok(()) => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        ready.clear();
        ready.extend(self.events.iter().map(|event| event.token()));
        Ok(())
    }
}

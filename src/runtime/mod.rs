//! Event-driven relay runtime.
//!
//! Readiness-based I/O via mio (epoll on Linux, kqueue on macOS), driven
//! from a single thread. The pieces, leaf first:
//! - `LineBuffer`: per-client accumulation of newline-terminated lines
//! - `ConnectionRegistry`: live clients keyed by handle, with sequential ids
//! - `Broadcaster`: announcement formatting and fan-out
//! - `mio::Relay`: the event loop tying them together

mod broadcast;
mod connection;
mod line_buffer;
mod mio;

pub(crate) use broadcast::Broadcaster;
pub(crate) use connection::{ConnectionRegistry, Handle};

pub use self::mio::Relay;

use crate::config::Config;

/// Bind the relay and serve until the multiplexer fails.
pub fn run(config: &Config) -> std::io::Result<()> {
    let mut relay = Relay::bind(config)?;
    relay.run()
}

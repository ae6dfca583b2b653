//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking accept/read syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! mio readiness is edge-triggered, so a ready listener is accepted until
//! `WouldBlock` and a ready client is read until `WouldBlock`. Complete lines
//! are broadcast after every chunk, before the next read.
//!
//! A client that keeps its socket full keeps the loop on its handle until
//! the kernel buffer runs dry, delaying other ready clients in the same batch.

use crate::config::Config;
use crate::runtime::mio::{Readiness, LISTENER_TOKEN};
use crate::runtime::{Broadcaster, ConnectionRegistry, Handle};
use mio::net::{TcpListener, TcpStream};
use mio::Token;
use std::io::{self, Read};
use std::net::SocketAddr;
use tracing::{debug, error, info, warn};

/// Single-threaded relay: listener, live clients and the scratch buffers
/// shared by every iteration.
pub struct Relay {
    readiness: Readiness,
    listener: TcpListener,
    registry: ConnectionRegistry<TcpStream>,
    broadcaster: Broadcaster,
    read_buf: Vec<u8>,
    ready: Vec<Token>,
}

impl Relay {
    /// Bind the listener and set up the multiplexer.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let addr = config.listen_addr();
        let readiness = Readiness::new(config.event_capacity)?;

        let listener = create_listener(addr, config.backlog)?;
        let mut listener = TcpListener::from_std(listener);
        readiness.register(&mut listener, LISTENER_TOKEN)?;

        Ok(Self {
            readiness,
            listener,
            registry: ConnectionRegistry::new(),
            broadcaster: Broadcaster::new(),
            read_buf: vec![0u8; config.read_chunk_size],
            ready: Vec::with_capacity(config.event_capacity),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    /// Serve until the multiplexer fails.
    ///
    /// On failure every client connection is closed before the error is
    /// returned.
    pub fn run(&mut self) -> io::Result<()> {
        info!(addr = %self.local_addr()?, "Relay listening");

        loop {
            if let Err(e) = self.turn() {
                error!(error = %e, clients = self.client_count(), "Readiness wait failed");
                self.close_all();
                return Err(e);
            }
        }
    }

    /// Wait for readiness once and dispatch every ready handle.
    pub fn turn(&mut self) -> io::Result<()> {
        let mut ready = std::mem::take(&mut self.ready);
        self.readiness.wait(&mut ready)?;

        for &token in &ready {
            match token {
                LISTENER_TOKEN => self.accept_connections(),
                Token(handle) => self.handle_readable(handle),
            }
        }

        self.ready = ready;
        Ok(())
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    let (handle, id) = self.registry.insert(stream);

                    let registered = match self.registry.get_mut(handle) {
                        Ok(client) => self.readiness.register(&mut client.stream, Token(handle)),
                        Err(e) => Err(io::Error::new(io::ErrorKind::NotFound, e)),
                    };
                    if let Err(e) = registered {
                        warn!(client = %id, error = %e, "Failed to register connection");
                        let _ = self.registry.remove(handle);
                        continue;
                    }

                    debug!(client = %id, handle, peer = %peer_addr, "Accepted connection");
                    self.broadcaster.announce_join(&mut self.registry, handle, id);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "Accept error");
                    break;
                }
            }
        }
    }

    fn handle_readable(&mut self, handle: Handle) {
        loop {
            // Stale readiness for a client removed earlier in this batch.
            let Ok(client) = self.registry.get_mut(handle) else {
                return;
            };

            match client.stream.read(&mut self.read_buf) {
                Ok(0) => {
                    self.close_client(handle, "closed by peer");
                    return;
                }
                Ok(n) => {
                    client.inbound.append(&self.read_buf[..n]);
                    self.broadcast_lines(handle);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(handle, error = %e, "Read error");
                    self.close_client(handle, "read error");
                    return;
                }
            }
        }
    }

    /// Broadcast every complete line buffered for `handle`, oldest first.
    fn broadcast_lines(&mut self, handle: Handle) {
        loop {
            let Ok(client) = self.registry.get_mut(handle) else {
                return;
            };
            let id = client.id;
            let Some(line) = client.inbound.extract_line() else {
                return;
            };
            self.broadcaster
                .announce_message(&mut self.registry, handle, id, &line);
        }
    }

    /// Announce the departure, then drop the client. Any incomplete line it
    /// left behind is discarded.
    fn close_client(&mut self, handle: Handle, reason: &'static str) {
        let Ok(id) = self.registry.get(handle).map(|client| client.id) else {
            return;
        };

        self.broadcaster
            .announce_leave(&mut self.registry, handle, id);

        if let Ok(mut client) = self.registry.remove(handle) {
            let _ = self.readiness.deregister(&mut client.stream);
            debug!(
                client = %id,
                handle,
                reason,
                discarded = client.inbound.len(),
                "Connection closed"
            );
        }
    }

    fn close_all(&mut self) {
        for mut client in self.registry.drain() {
            let _ = self.readiness.deregister(&mut client.stream);
        }
    }
}

/// Create a loopback TCP listener that can be rebound immediately after
/// a restart.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

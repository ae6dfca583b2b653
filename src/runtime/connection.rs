//! Registry of live client connections.
//!
//! Each accepted connection gets a slab slot (its handle, also used as the
//! mio token) and a sequential client id. Handles may be reused once a slot
//! is freed; ids come from a separate counter and never are.

use crate::runtime::line_buffer::LineBuffer;
use slab::Slab;
use std::fmt;

/// Registry key for a connection. Doubles as the readiness token.
pub type Handle = usize;

/// Sequential identifier shown to other clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A single client connection.
#[derive(Debug)]
pub struct Client<S> {
    /// Identifier assigned at accept time.
    pub id: ClientId,
    /// Socket (or any writer in tests).
    pub stream: S,
    /// Bytes received but not yet resolved into a line.
    pub inbound: LineBuffer,
}

impl<S> Client<S> {
    fn new(id: ClientId, stream: S) -> Self {
        Self {
            id,
            stream,
            inbound: LineBuffer::new(),
        }
    }
}

/// Lookup failure for a handle that is not registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    NotFound(Handle),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::NotFound(handle) => write!(f, "no client registered at handle {handle}"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Registry of active connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove. Iteration visits handles in
/// ascending order.
pub struct ConnectionRegistry<S> {
    clients: Slab<Client<S>>,
    next_id: u64,
}

impl<S> Default for ConnectionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> ConnectionRegistry<S> {
    pub fn new() -> Self {
        Self {
            clients: Slab::new(),
            next_id: 0,
        }
    }

    /// Register a new connection, assigning it the next client id.
    pub fn insert(&mut self, stream: S) -> (Handle, ClientId) {
        let id = ClientId(self.next_id);
        self.next_id += 1;
        let handle = self.clients.insert(Client::new(id, stream));
        (handle, id)
    }

    pub fn get(&self, handle: Handle) -> Result<&Client<S>, RegistryError> {
        self.clients.get(handle).ok_or(RegistryError::NotFound(handle))
    }

    pub fn get_mut(&mut self, handle: Handle) -> Result<&mut Client<S>, RegistryError> {
        self.clients
            .get_mut(handle)
            .ok_or(RegistryError::NotFound(handle))
    }

    /// Remove a connection, handing it back so the caller can close it.
    pub fn remove(&mut self, handle: Handle) -> Result<Client<S>, RegistryError> {
        self.clients
            .try_remove(handle)
            .ok_or(RegistryError::NotFound(handle))
    }

    /// Apply `f` to every registered client except `handle`, in ascending
    /// handle order.
    pub fn for_each_live_except<F>(&mut self, handle: Handle, mut f: F)
    where
        F: FnMut(Handle, &mut Client<S>),
    {
        for (h, client) in self.clients.iter_mut() {
            if h != handle {
                f(h, client);
            }
        }
    }

    /// Remove every client, yielding each one.
    pub fn drain(&mut self) -> impl Iterator<Item = Client<S>> + '_ {
        self.clients.drain()
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_sequential() {
        let mut registry = ConnectionRegistry::new();

        let ids: Vec<ClientId> = (0..4).map(|_| registry.insert(()).1).collect();
        assert_eq!(ids, vec![ClientId(0), ClientId(1), ClientId(2), ClientId(3)]);
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_ids_not_reused_after_remove() {
        let mut registry = ConnectionRegistry::new();

        let (h0, _) = registry.insert(());
        let (_h1, _) = registry.insert(());
        registry.remove(h0).unwrap();

        // The slot may be recycled, the id must not be.
        let (h2, id2) = registry.insert(());
        assert_eq!(h2, h0);
        assert_eq!(id2, ClientId(2));
        assert_eq!(registry.get(h2).unwrap().id, ClientId(2));
    }

    #[test]
    fn test_absent_handle_is_not_found() {
        let mut registry: ConnectionRegistry<()> = ConnectionRegistry::new();
        assert_eq!(registry.get(7).unwrap_err(), RegistryError::NotFound(7));
        assert!(registry.remove(7).is_err());

        let (h, _) = registry.insert(());
        registry.remove(h).unwrap();
        assert!(registry.remove(h).is_err());
        assert!(registry.get(h).is_err());
    }

    #[test]
    fn test_for_each_live_except_skips_sender() {
        let mut registry = ConnectionRegistry::new();
        let handles: Vec<Handle> = (0..3).map(|_| registry.insert(()).0).collect();

        let mut seen = Vec::new();
        registry.for_each_live_except(handles[1], |h, client| seen.push((h, client.id)));

        assert_eq!(
            seen,
            vec![(handles[0], ClientId(0)), (handles[2], ClientId(2))]
        );
    }

    #[test]
    fn test_for_each_live_except_unknown_handle_visits_all() {
        let mut registry = ConnectionRegistry::new();
        registry.insert(());
        registry.insert(());

        let mut count = 0;
        registry.for_each_live_except(usize::MAX, |_, _| count += 1);
        assert_eq!(count, 2);
    }

    #[test]
    fn test_drain_empties_registry() {
        let mut registry = ConnectionRegistry::new();
        registry.insert("a");
        registry.insert("b");

        let streams: Vec<&str> = registry.drain().map(|c| c.stream).collect();
        assert_eq!(streams, vec!["a", "b"]);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_client_id_display() {
        assert_eq!(ClientId(42).to_string(), "42");
    }
}

//! Table of live connections keyed by stable identifiers.
//!
//! Identifiers are slab keys, not socket descriptors. A key is only handed
//! out again after its connection has been reaped, and reaping is deferred
//! to the end of a dispatch batch, so a readiness event that was already
//! reported for a closed connection can never be routed to a newer one.

use crate::runtime::connection::Connection;
use mio::net::TcpStream;
use slab::Slab;

/// Stable connection identifier, also used as the poller token.
pub type ConnId = usize;

/// Registry of active connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove operations.
pub struct ConnectionTable<S = TcpStream> {
    connections: Slab<Connection<S>>,
    max_connections: usize,
    /// Closed connections awaiting removal.
    closed: Vec<ConnId>,
}

impl<S> ConnectionTable<S> {
    /// Create a new table with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections.min(4096)),
            max_connections,
            closed: Vec::new(),
        }
    }

    /// Insert a new connection.
    ///
    /// Returns `None` if the table is at capacity; the connection is dropped,
    /// which closes its socket.
    pub fn insert(&mut self, conn: Connection<S>) -> Option<ConnId> {
        if self.is_full() {
            return None;
        }
        Some(self.connections.insert(conn))
    }

    pub fn get(&self, id: ConnId) -> Option<&Connection<S>> {
        self.connections.get(id)
    }

    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut Connection<S>> {
        self.connections.get_mut(id)
    }

    #[cfg(test)]
    pub fn contains(&self, id: ConnId) -> bool {
        self.connections.contains(id)
    }

    /// Queue a closed connection for removal at the end of the batch.
    pub fn schedule_reap(&mut self, id: ConnId) {
        if self.connections.contains(id) && !self.closed.contains(&id) {
            self.closed.push(id);
        }
    }

    /// Remove every queued connection, closing its socket.
    ///
    /// Returns how many were removed.
    pub fn reap(&mut self) -> usize {
        let mut removed = 0;
        for id in self.closed.drain(..) {
            if self.connections.try_remove(id).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Connections not yet closed.
    pub fn live(&self) -> usize {
        self.connections.len() - self.closed.len()
    }

    /// Slots in use, including closed connections not yet reaped.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.max_connections
    }

    /// Snapshot of current identifiers, safe to hold while mutating.
    pub fn ids(&self) -> Vec<ConnId> {
        self.connections.iter().map(|(id, _)| id).collect()
    }
}

//! Connection registry.
//!
//! Owns every live [`Connection`] keyed by [`ConnectionId`] and hands out ids
//! from a monotonic counter. Ids are allocated in increasing order, so the
//! ordered map doubles as insertion order for broadcast.
//!
//! The registry only touches output buffers. It never performs I/O and never
//! talks to the reactor: [`ConnectionRegistry::broadcast`] returns the ids
//! whose write interest must be enabled and leaves that to the server.

use std::collections::BTreeMap;

use crate::{
    connection::{Connection, ConnectionId},
    error::RegistryError,
    reactor::Socket,
};

/// Registry of live connections.
#[derive(Debug)]
pub struct ConnectionRegistry<S> {
    /// Connection ID → connection
    connections: BTreeMap<ConnectionId, Connection<S>>,
    /// Next id to hand out. Starts at 1; 0 is the listener token.
    next_id: u64,
}

impl<S> Default for ConnectionRegistry<S> {
    fn default() -> Self {
        Self { connections: BTreeMap::new(), next_id: 1 }
    }
}

impl<S: Socket> ConnectionRegistry<S> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next connection id.
    pub fn allocate_id(&mut self) -> ConnectionId {
        let id = ConnectionId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Register a connection under its id.
    ///
    /// # Errors
    ///
    /// - `RegistryError::DuplicateId` if the id is already registered
    pub fn add(&mut self, connection: Connection<S>) -> Result<(), RegistryError> {
        let id = connection.id();
        if self.connections.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id));
        }
        self.connections.insert(id, connection);
        Ok(())
    }

    /// Remove and return a connection.
    ///
    /// # Errors
    ///
    /// - `RegistryError::NotFound` if the id is not registered
    pub fn remove(&mut self, id: ConnectionId) -> Result<Connection<S>, RegistryError> {
        self.connections.remove(&id).ok_or(RegistryError::NotFound(id))
    }

    /// Append `payload` to the output buffer of every connection except
    /// `sender`, or of every connection when `include_sender` is set.
    ///
    /// Returns the ids whose buffer went from empty to non-empty, in
    /// insertion order.
    pub fn broadcast(
        &mut self,
        sender: ConnectionId,
        payload: &[u8],
        include_sender: bool,
    ) -> Vec<ConnectionId> {
        self.connections
            .values_mut()
            .filter(|conn| include_sender || conn.id() != sender)
            .filter_map(|conn| conn.queue(payload).then(|| conn.id()))
            .collect()
    }

    /// Connection by id. `None` if not registered.
    pub fn get(&self, id: ConnectionId) -> Option<&Connection<S>> {
        self.connections.get(&id)
    }

    /// Mutable connection by id. `None` if not registered.
    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection<S>> {
        self.connections.get_mut(&id)
    }

    /// Check if a connection is registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// True when no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Registered ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.connections.keys().copied()
    }

    /// Registered connections in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Connection<S>> + '_ {
        self.connections.values()
    }
}

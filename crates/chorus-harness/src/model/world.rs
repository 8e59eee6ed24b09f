//! Model world: the oracle for what every client should have received.
//!
//! The model knows nothing about sockets or readiness. It tracks who is
//! connected, whose writes are broken, and the exact byte transcript each
//! healthy client should end up with once the server goes idle.
//!
//! # Departures
//!
//! A client whose writes are broken stays connected until the server first
//! tries to flush something to it. Departures therefore happen in waves: the
//! broken clients that were just queued output leave in id order, each
//! departure notifies everyone remaining, and broken clients queued output
//! by those notices leave in the next wave.

use chorus_core::{ConnectionId, message};

use super::operation::{ClientIndex, Operation, OperationError, OperationResult};

/// Observable state for oracle comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservableState {
    /// Per-client connection status, in connection order.
    pub connected: Vec<bool>,
    /// Per-client bytes received, in connection order.
    pub transcripts: Vec<Vec<u8>>,
}

/// One client as the model sees it.
#[derive(Debug, Clone)]
struct ModelClient {
    id: ConnectionId,
    connected: bool,
    broken: bool,
    transcript: Vec<u8>,
}

/// Reference implementation of the broadcast server.
#[derive(Debug, Clone, Default)]
pub struct ModelWorld {
    /// Every client that ever connected, in connection order.
    clients: Vec<ModelClient>,
}

impl ModelWorld {
    /// Create an empty world.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of clients that ever connected.
    pub fn num_clients(&self) -> usize {
        self.clients.len()
    }

    /// Number of clients still connected.
    pub fn connected_count(&self) -> usize {
        self.clients.iter().filter(|c| c.connected).count()
    }

    /// Resolve an operation's client index to a live client.
    ///
    /// Shared with the real-system driver so both sides reject the same
    /// operations.
    pub fn resolve(&self, client: ClientIndex) -> Result<usize, OperationError> {
        if self.clients.is_empty() {
            return Err(OperationError::NoClients);
        }
        let index = usize::from(client) % self.clients.len();
        if self.clients[index].connected { Ok(index) } else { Err(OperationError::Departed) }
    }

    /// Apply an operation and return the result.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        match op {
            Operation::Connect => {
                self.apply_connect();
                OperationResult::Ok
            },
            Operation::Send { client, content } => {
                let data = content.to_bytes();
                self.with_client(*client, |world, index| world.apply_send(index, &data))
            },
            Operation::Disconnect { client } | Operation::ResetRead { client } => {
                self.with_client(*client, Self::depart_and_settle)
            },
            Operation::BreakWrite { client, .. } => {
                self.with_client(*client, |world, index| world.clients[index].broken = true)
            },
        }
    }

    /// Extract observable state for comparison.
    pub fn observable_state(&self) -> ObservableState {
        ObservableState {
            connected: self.clients.iter().map(|c| c.connected).collect(),
            transcripts: self.clients.iter().map(|c| c.transcript.clone()).collect(),
        }
    }

    fn with_client(
        &mut self,
        client: ClientIndex,
        f: impl FnOnce(&mut Self, usize),
    ) -> OperationResult {
        match self.resolve(client) {
            Ok(index) => {
                f(self, index);
                OperationResult::Ok
            },
            Err(e) => OperationResult::Error(e),
        }
    }

    fn apply_connect(&mut self) {
        let id = ConnectionId::new(self.clients.len() as u64 + 1);
        let alone = self.connected_count() == 0;

        let client = ModelClient { id, connected: true, broken: false, transcript: Vec::new() };
        self.clients.push(client);

        let welcome = message::welcome(id, alone);
        let doomed = self.broadcast(None, welcome.as_bytes());
        self.settle(doomed);
    }

    fn apply_send(&mut self, index: usize, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let said = message::said(self.clients[index].id, data);
        let doomed = self.broadcast(Some(index), &said);
        self.settle(doomed);
    }

    fn depart_and_settle(&mut self, index: usize) {
        let doomed = self.depart(index);
        self.settle(doomed);
    }

    /// Remove a client and tell everyone remaining.
    fn depart(&mut self, index: usize) -> Vec<usize> {
        self.clients[index].connected = false;
        let left = message::left(self.clients[index].id);
        self.broadcast(Some(index), left.as_bytes())
    }

    /// Deliver `payload` to every connected client except `sender`.
    ///
    /// Returns the broken recipients, which will leave once the server tries
    /// to write to them.
    fn broadcast(&mut self, sender: Option<usize>, payload: &[u8]) -> Vec<usize> {
        let mut doomed = Vec::new();
        for (index, client) in self.clients.iter_mut().enumerate() {
            if !client.connected || Some(index) == sender {
                continue;
            }
            if client.broken {
                doomed.push(index);
            } else {
                client.transcript.extend_from_slice(payload);
            }
        }
        doomed
    }

    /// Process departure waves until no broken client has output queued.
    fn settle(&mut self, mut wave: Vec<usize>) {
        while !wave.is_empty() {
            wave.sort_unstable();
            wave.dedup();

            let mut next = Vec::new();
            for index in wave {
                if self.clients[index].connected {
                    next.extend(self.depart(index));
                }
            }
            wave = next;
        }
    }
}

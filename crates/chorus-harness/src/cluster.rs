//! Simulated cluster: one real [`Server`] and any number of simulated
//! clients on a shared in-memory network.
//!
//! Every client-facing action runs the server until it goes idle, so tests
//! read as a sequence of steps with fully settled state in between.

use std::io::ErrorKind;

use chorus_core::{ConnectionId, Server, ServerConfig, ServerError};
use thiserror::Error;

use crate::{
    invariants::SystemSnapshot,
    model::{ClientIndex, ObservableState, Operation, OperationError, OperationResult},
    sim_network::{SimClient, SimNetwork, WriteFault},
    sim_reactor::SimReactor,
    sim_transport::SimListener,
};

/// Turns after which a server that keeps reporting events is considered
/// stuck.
pub const MAX_TURNS_TO_IDLE: usize = 10_000;

/// Simulation failures.
#[derive(Debug, Error)]
pub enum SimError {
    /// Server never stopped reporting events
    #[error("server still busy after {turns} turns")]
    NotIdle {
        /// Turns run before giving up
        turns: usize,
    },

    /// Server failed
    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Server plus simulated clients.
#[derive(Debug)]
pub struct SimCluster {
    net: SimNetwork,
    server: Server<SimReactor>,
    clients: Vec<SimClient>,
}

impl SimCluster {
    /// Cluster with default configuration over a lossless network.
    pub fn new() -> Result<Self, SimError> {
        Self::with_network(SimNetwork::new(), ServerConfig::default())
    }

    /// Cluster whose network splits writes pseudo-randomly.
    pub fn with_seed(seed: u64) -> Result<Self, SimError> {
        Self::with_network(SimNetwork::with_seed(seed), ServerConfig::default())
    }

    /// Cluster with a custom server configuration.
    pub fn with_config(config: ServerConfig) -> Result<Self, SimError> {
        Self::with_network(SimNetwork::new(), config)
    }

    /// Cluster over a prepared network.
    pub fn with_network(net: SimNetwork, config: ServerConfig) -> Result<Self, SimError> {
        let reactor = SimReactor::new(&net);
        let listener = SimListener::new(&net);
        let mut server = Server::new(reactor, listener, config);
        server.start()?;

        Ok(Self { net, server, clients: Vec::new() })
    }

    /// Connect a new client and let the server settle.
    pub fn connect(&mut self) -> Result<SimClient, SimError> {
        let client = self.net.connect();
        self.clients.push(client.clone());
        self.run_until_idle()?;
        Ok(client)
    }

    /// Run turns until a poll reports nothing.
    ///
    /// Returns the number of busy turns.
    pub fn run_until_idle(&mut self) -> Result<usize, SimError> {
        for turn in 0..MAX_TURNS_TO_IDLE {
            if self.server.turn()? == 0 {
                return Ok(turn);
            }
        }
        tracing::warn!(turns = MAX_TURNS_TO_IDLE, "server did not settle");
        Err(SimError::NotIdle { turns: MAX_TURNS_TO_IDLE })
    }

    /// Run a single turn.
    pub fn turn(&mut self) -> Result<usize, SimError> {
        Ok(self.server.turn()?)
    }

    /// Shut the server down.
    pub fn shutdown(&mut self) {
        self.server.shutdown();
    }

    /// Connection id the server assigned to `client`. `None` once it is gone.
    pub fn connection_of(&self, client: &SimClient) -> Option<ConnectionId> {
        self.server
            .registry()
            .iter()
            .find(|conn| conn.socket().pipe_id() == client.pipe_id())
            .map(chorus_core::Connection::id)
    }

    /// Server under test.
    pub fn server(&self) -> &Server<SimReactor> {
        &self.server
    }

    /// Mutable server under test.
    pub fn server_mut(&mut self) -> &mut Server<SimReactor> {
        &mut self.server
    }

    /// Shared network.
    pub fn network(&self) -> &SimNetwork {
        &self.net
    }

    /// Every client that ever connected, in connection order.
    pub fn clients(&self) -> &[SimClient] {
        &self.clients
    }

    /// Snapshot for invariant checks.
    pub fn snapshot(&self) -> SystemSnapshot {
        SystemSnapshot::capture(&self.server, &self.net)
    }

    /// Apply a model operation to the real server and let it settle.
    pub fn apply(&mut self, op: &Operation) -> Result<OperationResult, SimError> {
        let client = match op {
            Operation::Connect => {
                self.connect()?;
                return Ok(OperationResult::Ok);
            },
            Operation::Send { client, .. }
            | Operation::Disconnect { client }
            | Operation::ResetRead { client }
            | Operation::BreakWrite { client, .. } => match self.resolve(*client) {
                Ok(client) => client,
                Err(e) => return Ok(OperationResult::Error(e)),
            },
        };

        match op {
            Operation::Connect => {},
            Operation::Send { content, .. } => client.send(&content.to_bytes()),
            Operation::Disconnect { .. } => client.close(),
            Operation::ResetRead { .. } => client.fail_next_read(ErrorKind::ConnectionReset),
            Operation::BreakWrite { zero, .. } => {
                let fault =
                    if *zero { WriteFault::Zero } else { WriteFault::Error(ErrorKind::BrokenPipe) };
                client.break_writes(fault);
            },
        }

        self.run_until_idle()?;
        Ok(OperationResult::Ok)
    }

    /// Observable state for comparison against the model.
    pub fn observable_state(&self) -> ObservableState {
        ObservableState {
            connected: self.clients.iter().map(|c| self.connection_of(c).is_some()).collect(),
            transcripts: self.clients.iter().map(SimClient::received).collect(),
        }
    }

    fn resolve(&self, client: ClientIndex) -> Result<SimClient, OperationError> {
        if self.clients.is_empty() {
            return Err(OperationError::NoClients);
        }
        let client = &self.clients[usize::from(client) % self.clients.len()];
        match self.connection_of(client) {
            Some(_) => Ok(client.clone()),
            None => Err(OperationError::Departed),
        }
    }
}

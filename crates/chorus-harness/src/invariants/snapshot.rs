//! Observable state snapshots for invariant checking.
//!
//! Snapshots capture server, reactor, and network state at a turn boundary.
//! Invariants operate on snapshots rather than live state so a check never
//! observes a half-dispatched event.

use chorus_core::{ConnectionId, ConnectionState, Server};

use crate::{
    sim_network::{PipeId, SimNetwork},
    sim_reactor::{SimReactor, Watch},
};

/// Snapshot of the whole simulated system.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Registered connections in id order.
    pub connections: Vec<ConnectionSnapshot>,
    /// Every pipe the network ever opened, in pipe order.
    pub pipes: Vec<PipeSnapshot>,
    /// Sockets the reactor still watches.
    pub watched: usize,
    /// Whether the listener is registered with the reactor.
    pub listening: bool,
}

impl SystemSnapshot {
    /// Create an empty snapshot (no connections).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Capture the state of `server` running over `net`.
    pub fn capture(server: &Server<SimReactor>, net: &SimNetwork) -> Self {
        let reactor = server.reactor();

        let connections = server
            .registry()
            .iter()
            .map(|conn| {
                let id = conn.id();
                ConnectionSnapshot {
                    id,
                    state: conn.state(),
                    pipe: conn.socket().pipe_id(),
                    pending_output: conn.pending_output().len(),
                    read_interest: conn.read_interest(),
                    write_interest: conn.write_interest(),
                    watch: reactor.watch(id.token()),
                }
            })
            .collect();

        let pipes = net
            .server_closes()
            .into_iter()
            .map(|(pipe, server_closes)| PipeSnapshot { pipe, server_closes })
            .collect();

        Self {
            connections,
            pipes,
            watched: reactor.watched_count(),
            listening: reactor.is_listening(),
        }
    }

    /// Connection snapshot by id.
    pub fn connection(&self, id: ConnectionId) -> Option<&ConnectionSnapshot> {
        self.connections.iter().find(|c| c.id == id)
    }
}

/// Snapshot of one registered connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    /// Connection id.
    pub id: ConnectionId,
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Pipe behind the socket.
    pub pipe: PipeId,
    /// Bytes queued but not yet written.
    pub pending_output: usize,
    /// Read interest as the connection records it.
    pub read_interest: bool,
    /// Write interest as the connection records it.
    pub write_interest: bool,
    /// Reactor's view of the same token. `None` if not watched.
    pub watch: Option<Watch>,
}

/// Snapshot of one simulated pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeSnapshot {
    /// Pipe id.
    pub pipe: PipeId,
    /// Times the server closed its end.
    pub server_closes: usize,
}

//! Standard invariant checks.
//!
//! Each check holds at every turn boundary, whatever the network does.

use std::collections::BTreeSet;

use chorus_core::ConnectionState;

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// Write interest is on exactly when output is pending.
///
/// A connection with queued bytes and no write interest would never be
/// flushed; one with write interest and nothing queued spins the loop.
pub struct WriteInterestMatchesBuffer;

impl Invariant for WriteInterestMatchesBuffer {
    fn name(&self) -> &'static str {
        "write_interest_matches_buffer"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for conn in &state.connections {
            if conn.write_interest != (conn.pending_output > 0) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "connection {}: write_interest={} with {} bytes pending",
                        conn.id, conn.write_interest, conn.pending_output
                    ),
                });
            }
        }
        Ok(())
    }
}

/// The reactor watches exactly the registered connections, with the
/// interests each connection believes it has.
pub struct ReactorAgreesWithRegistry;

impl Invariant for ReactorAgreesWithRegistry {
    fn name(&self) -> &'static str {
        "reactor_agrees_with_registry"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        if state.watched != state.connections.len() {
            return Err(Violation {
                invariant: self.name(),
                message: format!(
                    "reactor watches {} sockets for {} connections",
                    state.watched,
                    state.connections.len()
                ),
            });
        }

        for conn in &state.connections {
            let Some(watch) = conn.watch else {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("connection {} is not watched", conn.id),
                });
            };

            let agrees = watch.pipe == conn.pipe
                && watch.readable
                && conn.read_interest
                && watch.write_registered
                && watch.write_enabled == conn.write_interest;
            if !agrees {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "connection {}: reactor has {watch:?}, connection has {conn:?}",
                        conn.id
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Registered connections are active; closing ones are never left behind.
pub struct ConnectionsActive;

impl Invariant for ConnectionsActive {
    fn name(&self) -> &'static str {
        "connections_active"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for conn in &state.connections {
            if conn.state != ConnectionState::Active {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("connection {} registered in state {:?}", conn.id, conn.state),
                });
            }
        }
        Ok(())
    }
}

/// Every socket is closed at most once, and live ones not at all.
pub struct ClosedAtMostOnce;

impl Invariant for ClosedAtMostOnce {
    fn name(&self) -> &'static str {
        "closed_at_most_once"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        let live: BTreeSet<_> = state.connections.iter().map(|c| c.pipe).collect();

        for pipe in &state.pipes {
            let limit = usize::from(!live.contains(&pipe.pipe));
            if pipe.server_closes > limit {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "pipe {} closed {} times (live: {})",
                        pipe.pipe.0,
                        pipe.server_closes,
                        limit == 0
                    ),
                });
            }
        }
        Ok(())
    }
}

/// No two connections share an id or a socket.
pub struct UniqueConnections;

impl Invariant for UniqueConnections {
    fn name(&self) -> &'static str {
        "unique_connections"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        let mut ids = BTreeSet::new();
        let mut pipes = BTreeSet::new();

        for conn in &state.connections {
            if !ids.insert(conn.id) || !pipes.insert(conn.pipe) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "connection {} on pipe {} is not unique",
                        conn.id, conn.pipe.0
                    ),
                });
            }
        }
        Ok(())
    }
}

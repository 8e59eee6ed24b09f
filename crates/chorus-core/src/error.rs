//! Error types for the Chorus core.
//!
//! Strongly-typed errors for each layer: registry bookkeeping, per-connection
//! socket failures, and server-level failures (accept, reactor).
//!
//! Per-connection errors never leave the connection's cleanup path. Only
//! [`ServerError::Reactor`] is allowed to stop the event loop.

use std::io;

use thiserror::Error;

use crate::connection::{ConnectionId, ConnectionState};

/// Registry bookkeeping errors.
///
/// Both variants indicate a logic bug: ids are allocated from a monotonic
/// counter, and cleanup checks membership before removing.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// A connection with this id is already registered
    #[error("connection {0} already registered")]
    DuplicateId(ConnectionId),

    /// No connection with this id is registered
    #[error("connection {0} not found")]
    NotFound(ConnectionId),
}

/// Why a socket was declared dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeathCause {
    /// Peer closed its side (read returned zero bytes)
    EndOfStream,
    /// Write accepted zero bytes of a non-empty buffer
    WriteZero,
    /// Read or write failed with an OS error other than would-block
    Io(io::ErrorKind),
}

impl std::fmt::Display for DeathCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EndOfStream => write!(f, "end of stream"),
            Self::WriteZero => write!(f, "write accepted zero bytes"),
            Self::Io(kind) => write!(f, "{kind}"),
        }
    }
}

/// Errors from a single connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The socket is gone; the connection must be cleaned up
    #[error("connection {id} socket dead: {cause}")]
    SocketDead {
        /// Connection whose socket died
        id: ConnectionId,
        /// What the liveness check observed
        cause: DeathCause,
    },

    /// Invalid state transition attempted
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidState {
        /// Current state when error occurred
        state: ConnectionState,
        /// Operation that was attempted
        operation: &'static str,
    },
}

impl ConnectionError {
    /// Returns true if the connection cannot make further progress.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SocketDead { .. })
    }
}

/// Server-level errors.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Accepting a pending connection failed with something other than
    /// would-block. The accept loop stops for this notification.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// The reactor failed to register interest or to poll.
    #[error("reactor error: {0}")]
    Reactor(#[source] io::Error),

    /// Registry invariant violated.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

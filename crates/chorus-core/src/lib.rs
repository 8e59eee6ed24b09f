//! Chorus core: a readiness-driven broadcast server.
//!
//! Every client's input is forwarded to every other connected client. The
//! core owns the protocol-free parts that need care: non-blocking accept,
//! bounded reads, partial-write buffering, write-interest toggling, and
//! exactly-once connection teardown.
//!
//! # Architecture
//!
//! The core does no I/O multiplexing of its own. [`Server`] consumes an
//! abstract [`Reactor`] and is generic over its socket types, so the same
//! logic runs against mio in production (`chorus-server`) and against a
//! deterministic in-memory network in tests (`chorus-harness`).
//!
//! # Components
//!
//! - [`ConnectionRegistry`]: live connections keyed by id, broadcast
//! - [`Connection`]: per-socket state machine and output buffer
//! - [`Server`]: accept/read/write/cleanup handlers and the event loop
//! - [`Reactor`]: event-notification contract

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod connection;
pub mod error;
pub mod message;
pub mod reactor;
pub mod registry;
pub mod server;

pub use connection::{Connection, ConnectionId, ConnectionState, FlushOutcome, ReadOutcome};
pub use error::{ConnectionError, DeathCause, RegistryError, ServerError};
pub use reactor::{Listener, Reactor, Readiness, ShutdownHandle, Socket, Token};
pub use registry::ConnectionRegistry;
pub use server::{DEFAULT_MAX_CONNECTIONS, DEFAULT_READ_CHUNK_SIZE, Server, ServerConfig};

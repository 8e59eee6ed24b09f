//! Deterministic simulation harness for the Chorus server.
//!
//! An in-memory network ([`SimNetwork`]), sockets over it ([`SimStream`],
//! [`SimListener`]), and a level-triggered reactor ([`SimReactor`]) let the
//! real [`chorus_core::Server`] run single-threaded with no OS sockets. The
//! network can fail reads, writes, and accepts on demand, or split writes
//! at seeded random points.
//!
//! # Model-Based Testing
//!
//! The `model` module provides a reference implementation that predicts each
//! client's transcript. [`SimCluster::apply`] and [`ModelWorld::apply`] take
//! the same [`Operation`]s, and their [`ObservableState`]s are compared.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks properties that hold at every turn
//! boundary. Use [`InvariantRegistry::standard()`] for the server
//! invariants.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cluster;
pub mod invariants;
pub mod model;
pub mod sim_network;
pub mod sim_reactor;
pub mod sim_transport;

pub use cluster::{MAX_TURNS_TO_IDLE, SimCluster, SimError};
pub use invariants::{
    ClosedAtMostOnce, ConnectionSnapshot, ConnectionsActive, Invariant, InvariantRegistry,
    InvariantResult, PipeSnapshot, ReactorAgreesWithRegistry, SystemSnapshot, UniqueConnections,
    Violation, WriteInterestMatchesBuffer,
};
pub use model::{
    ClientIndex, ModelWorld, ObservableState, Operation, OperationError, OperationResult,
    SmallMessage,
};
pub use sim_network::{PipeId, SIM_LISTEN_ADDR, SimClient, SimNetwork, WriteFault};
pub use sim_reactor::{ReactorStats, SimReactor, Watch};
pub use sim_transport::{SimListener, SimStream};

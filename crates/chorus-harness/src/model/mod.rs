//! Model-based testing infrastructure.
//!
//! A reference model of the broadcast server that predicts every client's
//! transcript without touching sockets. Random operation sequences are
//! applied to both the model and a [`SimCluster`](crate::SimCluster), and
//! their observable states must match after every step.
//!
//! # Architecture
//!
//! ```text
//! proptest generates: Vec<Operation>
//!                          │
//!           ┌──────────────┼──────────────┐
//!           ▼              ▼              ▼
//!      ModelWorld     SimCluster       Compare
//!      (reference)    (real server)    ObservableState
//! ```

mod operation;
mod world;

pub use operation::{ClientIndex, Operation, OperationError, OperationResult, SmallMessage};
pub use world::{ModelWorld, ObservableState};

//! Operations for model-based testing.
//!
//! Operations are generated randomly by proptest (or decoded from fuzz input
//! through `arbitrary`) and applied to both the model and the simulated
//! server.

use arbitrary::Arbitrary;

/// Client index, in connection order. Reduced modulo the number of clients
/// that ever connected, so every value names somebody once anyone has.
pub type ClientIndex = u8;

/// Operations that can be applied to the system.
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// A new client connects.
    Connect,

    /// A client sends bytes.
    Send {
        /// Sending client.
        client: ClientIndex,
        /// Bytes to send.
        content: SmallMessage,
    },

    /// A client shuts down its connection.
    Disconnect {
        /// Client disconnecting.
        client: ClientIndex,
    },

    /// The server's next read from a client fails with a reset.
    ResetRead {
        /// Affected client.
        client: ClientIndex,
    },

    /// Every later server write to a client fails.
    BreakWrite {
        /// Affected client.
        client: ClientIndex,
        /// Writes accept zero bytes instead of erroring.
        zero: bool,
    },
}

/// Small message content for testing.
///
/// A compact representation keeps shrunk cases readable. The bytes are
/// deterministic from the seed.
#[derive(Debug, Clone, Arbitrary)]
pub struct SmallMessage {
    /// Message seed.
    pub seed: u8,
    /// Message length hint (0-3 maps to empty/small/medium/large).
    pub size_class: u8,
}

impl SmallMessage {
    /// Expand to actual message bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let len = match self.size_class % 4 {
            0 => 0,
            1 => 8,
            2 => 64,
            _ => 256,
        };

        (0..len).map(|i| self.seed.wrapping_add(i as u8)).collect()
    }
}

/// Result of applying an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// Operation applied.
    Ok,

    /// Operation was rejected before reaching the server.
    Error(OperationError),
}

impl OperationResult {
    /// Check if operation succeeded.
    pub fn is_ok(&self) -> bool {
        matches!(self, OperationResult::Ok)
    }
}

/// Reasons an operation cannot be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationError {
    /// Nobody has connected yet.
    NoClients,

    /// The addressed client is no longer connected.
    Departed,
}

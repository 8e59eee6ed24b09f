//! Invariant checking for deterministic simulation testing.
//!
//! Invariants are properties that must hold at every turn boundary of the
//! event loop, whatever sequence of connects, sends, disconnects, and
//! injected faults led there.
//!
//! # Usage
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! let snapshot = cluster.snapshot();
//! registry.assert_all(&snapshot, "after disconnect");
//! ```

mod checks;
mod snapshot;

pub use checks::{
    ClosedAtMostOnce, ConnectionsActive, ReactorAgreesWithRegistry, UniqueConnections,
    WriteInterestMatchesBuffer,
};
pub use snapshot::{ConnectionSnapshot, PipeSnapshot, SystemSnapshot};

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// An invariant that can be checked against system state.
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against a snapshot.
    ///
    /// Returns `Ok(())` if the invariant holds, or a [`Violation`]
    /// describing what went wrong.
    fn check(&self, state: &SystemSnapshot) -> InvariantResult;
}

/// Registry of invariants to check.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Create a registry with the standard server invariants.
    ///
    /// Includes:
    /// - [`WriteInterestMatchesBuffer`]: write interest iff output pending
    /// - [`ReactorAgreesWithRegistry`]: reactor watches match connections
    /// - [`ConnectionsActive`]: registered connections are active
    /// - [`ClosedAtMostOnce`]: sockets are closed at most once
    /// - [`UniqueConnections`]: ids and sockets are not shared
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(WriteInterestMatchesBuffer);
        registry.add(ReactorAgreesWithRegistry);
        registry.add(ConnectionsActive);
        registry.add(ClosedAtMostOnce);
        registry.add(UniqueConnections);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants against the given state.
    ///
    /// Returns `Ok(())` if all invariants hold, or all violations found.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking with every violation found.
    ///
    /// Use this in tests where you want immediate failure with context.
    pub fn assert_all(&self, state: &SystemSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("Invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}

//! Fuzz target for the broadcast server against its reference model.
//!
//! # Strategy
//!
//! - Arbitrary interleavings of connects, sends, disconnects, read resets,
//!   and broken writers
//! - Optional seeded network that splits and delays every write
//!
//! # Invariants
//!
//! - Every client's transcript matches the model byte for byte
//! - Write interest is enabled exactly when output is pending
//! - Reactor watches match the registry
//! - Every socket is closed at most once, live ones never
//! - Shutdown closes every accepted socket exactly once

#![no_main]

use arbitrary::Arbitrary;
use chorus_harness::{InvariantRegistry, ModelWorld, Operation, SimCluster};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Scenario {
    chaos_seed: Option<u64>,
    ops: Vec<Operation>,
}

fuzz_target!(|scenario: Scenario| {
    let cluster = match scenario.chaos_seed {
        Some(seed) => SimCluster::with_seed(seed),
        None => SimCluster::new(),
    };
    let Ok(mut real) = cluster else {
        return;
    };
    let mut model = ModelWorld::new();
    let invariants = InvariantRegistry::standard();

    for (i, op) in scenario.ops.iter().take(64).enumerate() {
        let expected = model.apply(op);
        let actual = real.apply(op).unwrap_or_else(|e| panic!("operation {i} {op:?} failed: {e}"));
        assert_eq!(expected, actual, "result divergence at {i}: {op:?}");

        invariants.assert_all(&real.snapshot(), &format!("after operation {i}"));
        assert_eq!(
            model.observable_state(),
            real.observable_state(),
            "state divergence at {i}: {op:?}"
        );
    }

    real.shutdown();
    for (pipe, closes) in real.network().server_closes() {
        assert_eq!(closes, 1, "pipe {pipe:?} closed {closes} times");
    }
});

//! Fuzz target for read chunking and partial writes.
//!
//! # Strategy
//!
//! - Tiny read chunk sizes so one send becomes many messages
//! - Arbitrary payloads, including newlines and invalid UTF-8
//! - Seeded network that splits writes at random points
//!
//! # Invariants
//!
//! - Each send arrives as consecutive `"<id> said: <chunk>\n"` messages, one
//!   per read of at most the chunk size, in order
//! - The sender never receives its own data

#![no_main]

use arbitrary::Arbitrary;
use chorus_core::ServerConfig;
use chorus_harness::{SimCluster, SimNetwork};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    chunk_size: u8,
    seed: u64,
    sends: Vec<Vec<u8>>,
}

fuzz_target!(|input: Input| {
    let chunk = usize::from(input.chunk_size % 32) + 1;
    let config = ServerConfig { read_chunk_size: chunk, ..ServerConfig::default() };
    let Ok(mut cluster) = SimCluster::with_network(SimNetwork::with_seed(input.seed), config) else {
        return;
    };
    let (Ok(sender), Ok(receiver)) = (cluster.connect(), cluster.connect()) else {
        return;
    };
    sender.take_received();
    receiver.take_received();

    let mut expected = Vec::new();
    for data in input.sends.iter().take(16) {
        // One read per turn; keep a send well inside the turn limit.
        let data = &data[..data.len().min(1024)];
        sender.send(data);
        for piece in data.chunks(chunk) {
            expected.extend_from_slice(b"1 said: ");
            expected.extend_from_slice(piece);
            expected.push(b'\n');
        }
        cluster.run_until_idle().unwrap_or_else(|e| panic!("server did not settle: {e}"));
    }

    assert_eq!(receiver.received(), expected);
    assert!(sender.received().is_empty());
});

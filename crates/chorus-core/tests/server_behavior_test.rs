//! Server behavior over the simulated network.
//!
//! Each test drives the real [`Server`] through [`SimCluster`] and checks
//! what clients receive, how connections are torn down, and how the server
//! survives accept, read, write, and reactor failures.

use std::io::ErrorKind;

use chorus_core::{ConnectionId, ConnectionState, Server, ServerConfig, message};
use chorus_harness::{
    InvariantRegistry, SimCluster, SimListener, SimNetwork, SimReactor, WriteFault,
};

fn welcome(id: u64, alone: bool) -> String {
    message::welcome(ConnectionId::new(id), alone)
}

#[test]
fn three_client_session() {
    let mut cluster = SimCluster::new().unwrap();

    let a = cluster.connect().unwrap();
    assert_eq!(a.received_text(), welcome(1, true));

    let b = cluster.connect().unwrap();
    assert_eq!(a.received_text(), format!("{}{}", welcome(1, true), welcome(2, false)));
    assert_eq!(b.received_text(), welcome(2, false));

    let c = cluster.connect().unwrap();
    assert_eq!(c.received_text(), welcome(3, false));
    a.take_received();
    b.take_received();
    c.take_received();

    b.send(b"hello");
    cluster.run_until_idle().unwrap();
    assert_eq!(a.received_text(), "2 said: hello\n");
    assert_eq!(b.received_text(), "");
    assert_eq!(c.received_text(), "2 said: hello\n");

    a.close();
    cluster.run_until_idle().unwrap();
    assert_eq!(b.received_text(), "1 left\n");
    assert_eq!(c.received_text(), "2 said: hello\n1 left\n");
    assert!(a.is_closed_by_server());
    assert_eq!(cluster.server().connection_count(), 2);

    InvariantRegistry::standard().assert_all(&cluster.snapshot(), "after session");
}

#[test]
fn newline_is_not_a_message_boundary() {
    let mut cluster = SimCluster::new().unwrap();
    let a = cluster.connect().unwrap();
    let b = cluster.connect().unwrap();
    b.take_received();

    a.send(b"one\ntwo\n");
    cluster.run_until_idle().unwrap();

    assert_eq!(b.received(), b"1 said: one\ntwo\n\n");
}

#[test]
fn read_is_chunked_by_configured_size() {
    let config = ServerConfig { read_chunk_size: 4, ..ServerConfig::default() };
    let mut cluster = SimCluster::with_config(config).unwrap();
    let a = cluster.connect().unwrap();
    let b = cluster.connect().unwrap();
    b.take_received();

    a.send(b"abcdefghij");
    cluster.run_until_idle().unwrap();

    assert_eq!(b.received_text(), "1 said: abcd\n1 said: efgh\n1 said: ij\n");
}

#[test]
fn one_read_per_readiness() {
    let config = ServerConfig { read_chunk_size: 4, ..ServerConfig::default() };
    let mut cluster = SimCluster::with_config(config).unwrap();
    let a = cluster.connect().unwrap();
    let b = cluster.connect().unwrap();
    b.take_received();
    b.set_write_budget(Some(0));
    let id = cluster.connection_of(&b).unwrap();

    a.send(&[b'x'; 40_000]);
    assert_eq!(cluster.turn().unwrap(), 1);

    let pending = cluster.server().registry().get(id).unwrap().pending_output().to_vec();
    assert_eq!(pending, b"1 said: xxxx\n");

    cluster.turn().unwrap();
    let pending = cluster.server().registry().get(id).unwrap().pending_output().len();
    assert_eq!(pending, 2 * b"1 said: xxxx\n".len());
}

#[test]
fn busy_sender_shares_the_loop_with_writes() {
    let config = ServerConfig { read_chunk_size: 4, ..ServerConfig::default() };
    let mut cluster = SimCluster::with_config(config).unwrap();
    let a = cluster.connect().unwrap();
    let b = cluster.connect().unwrap();
    b.take_received();

    a.send(&[b'y'; 4_000]);
    cluster.turn().unwrap();
    cluster.turn().unwrap();
    assert_eq!(b.received_text(), "1 said: yyyy\n".repeat(2));

    cluster.run_until_idle().unwrap();
    assert_eq!(b.received_text(), "1 said: yyyy\n".repeat(1_000));
}

#[test]
fn write_ready_on_idle_connection_changes_nothing() {
    let mut cluster = SimCluster::new().unwrap();
    let a = cluster.connect().unwrap();
    a.take_received();
    let id = cluster.connection_of(&a).unwrap();
    let before = cluster.server().reactor().stats();

    for _ in 0..3 {
        cluster.server_mut().write_ready(id);
    }

    assert_eq!(cluster.server().reactor().stats(), before);
    assert!(!cluster.server().reactor().write_enabled(id.token()));
    let conn = cluster.server().registry().get(id).unwrap();
    assert_eq!(conn.state(), ConnectionState::Active);
    assert!(!conn.write_interest());
    assert!(a.received().is_empty());
}

#[test]
fn sole_client_messages_go_nowhere() {
    let mut cluster = SimCluster::new().unwrap();
    let a = cluster.connect().unwrap();
    a.take_received();

    a.send(b"anyone?");
    cluster.run_until_idle().unwrap();

    assert!(a.received().is_empty());
    assert!(!cluster.server().reactor().write_enabled(ConnectionId::new(1).token()));
}

#[test]
fn read_error_cleans_up_once() {
    let mut cluster = SimCluster::new().unwrap();
    let a = cluster.connect().unwrap();
    let b = cluster.connect().unwrap();
    a.take_received();

    b.fail_next_read(ErrorKind::ConnectionReset);
    cluster.run_until_idle().unwrap();

    assert_eq!(a.received_text(), "2 left\n");
    assert_eq!(b.server_closes(), 1);
    assert_eq!(cluster.connection_of(&b), None);
}

#[test]
fn write_error_cleans_up_once() {
    for fault in [WriteFault::Error(ErrorKind::BrokenPipe), WriteFault::Zero] {
        let mut cluster = SimCluster::new().unwrap();
        let a = cluster.connect().unwrap();
        let b = cluster.connect().unwrap();
        let c = cluster.connect().unwrap();
        c.take_received();

        b.break_writes(fault);
        a.send(b"ping");
        cluster.run_until_idle().unwrap();

        assert_eq!(c.received_text(), "1 said: ping\n2 left\n", "{fault:?}");
        assert_eq!(b.server_closes(), 1);
        assert_eq!(cluster.server().connection_count(), 2);
        InvariantRegistry::standard().assert_all(&cluster.snapshot(), "after write failure");
    }
}

#[test]
fn eof_after_data_forwards_data_first() {
    let mut cluster = SimCluster::new().unwrap();
    let a = cluster.connect().unwrap();
    let b = cluster.connect().unwrap();
    b.take_received();

    a.send(b"bye");
    a.close();
    cluster.run_until_idle().unwrap();

    assert_eq!(b.received_text(), "1 said: bye\n1 left\n");
    assert_eq!(a.server_closes(), 1);
}

#[test]
fn cleanup_is_idempotent() {
    let mut cluster = SimCluster::new().unwrap();
    let a = cluster.connect().unwrap();
    let b = cluster.connect().unwrap();
    b.take_received();
    let id = cluster.connection_of(&a).unwrap();

    assert!(cluster.server_mut().cleanup(id));
    assert!(!cluster.server_mut().cleanup(id));
    cluster.run_until_idle().unwrap();

    assert_eq!(a.server_closes(), 1);
    assert_eq!(b.received_text(), "1 left\n");
}

#[test]
fn accept_error_keeps_listening() {
    let net = SimNetwork::new();
    let mut cluster = SimCluster::with_network(net.clone(), ServerConfig::default()).unwrap();

    net.fail_next_accept(ErrorKind::ConnectionAborted);
    cluster.run_until_idle().unwrap();
    assert_eq!(cluster.server().connection_count(), 0);

    let a = cluster.connect().unwrap();
    assert_eq!(a.received_text(), welcome(1, true));
}

#[test]
fn accept_drains_whole_backlog() {
    let mut cluster = SimCluster::new().unwrap();
    let net = cluster.network().clone();
    let clients: Vec<_> = (0..5).map(|_| net.connect()).collect();

    cluster.turn().unwrap();

    assert_eq!(net.backlog_len(), 0);
    assert_eq!(cluster.server().connection_count(), 5);
    cluster.run_until_idle().unwrap();
    let joins: String = (2..=5).map(|i| welcome(i, false)).collect();
    assert_eq!(clients[0].received_text(), welcome(1, true) + &joins);
}

#[test]
fn connection_limit_closes_excess() {
    let config = ServerConfig { max_connections: 2, ..ServerConfig::default() };
    let mut cluster = SimCluster::with_config(config).unwrap();

    let a = cluster.connect().unwrap();
    let _b = cluster.connect().unwrap();
    let rejected = cluster.connect().unwrap();

    assert_eq!(cluster.server().connection_count(), 2);
    assert!(rejected.is_closed_by_server());
    assert!(rejected.received().is_empty());
    assert!(!a.received_text().contains("3 joined"));

    let d = cluster.connect().unwrap();
    assert!(d.is_closed_by_server());
}

#[test]
fn refused_write_interest_cleans_up() {
    let mut cluster = SimCluster::new().unwrap();
    let a = cluster.connect().unwrap();
    let b = cluster.connect().unwrap();
    let c = cluster.connect().unwrap();
    c.take_received();

    b.refuse_write_interest();
    a.send(b"x");
    cluster.run_until_idle().unwrap();

    assert_eq!(cluster.connection_of(&b), None);
    assert_eq!(b.server_closes(), 1);
    assert_eq!(c.received_text(), "1 said: x\n2 left\n");
    InvariantRegistry::standard().assert_all(&cluster.snapshot(), "after refusal");
}

#[test]
fn refused_departure_notices_clean_up_in_id_order() {
    let mut cluster = SimCluster::new().unwrap();
    let a = cluster.connect().unwrap();
    let b = cluster.connect().unwrap();
    let c = cluster.connect().unwrap();
    let d = cluster.connect().unwrap();
    c.take_received();

    b.refuse_write_interest();
    d.refuse_write_interest();
    a.close();
    cluster.run_until_idle().unwrap();

    assert_eq!(c.received_text(), "1 left\n2 left\n4 left\n");
    assert_eq!((b.server_closes(), d.server_closes()), (1, 1));
    assert_eq!(cluster.server().connection_count(), 1);
}

#[test]
fn shutdown_closes_everything() {
    let mut cluster = SimCluster::new().unwrap();
    let clients: Vec<_> = (0..3).map(|_| cluster.connect().unwrap()).collect();

    cluster.shutdown();

    for client in &clients {
        assert_eq!(client.server_closes(), 1);
    }
    assert_eq!(cluster.server().connection_count(), 0);
    assert!(!cluster.snapshot().listening);
}

#[test]
fn run_returns_after_shutdown_request() {
    let net = SimNetwork::new();
    let mut server =
        Server::new(SimReactor::new(&net), SimListener::new(&net), ServerConfig::default());
    let client = net.connect();

    server.shutdown_handle().shutdown().unwrap();
    server.run().unwrap();

    assert_eq!(server.connection_count(), 0);
    assert!(client.received().is_empty());
}

#[test]
fn ids_are_never_reused() {
    let mut cluster = SimCluster::new().unwrap();
    let a = cluster.connect().unwrap();
    let first = cluster.connection_of(&a).unwrap();
    a.close();
    cluster.run_until_idle().unwrap();

    let b = cluster.connect().unwrap();
    let second = cluster.connection_of(&b).unwrap();

    assert!(second > first);
    assert_eq!(b.received_text(), welcome(2, true));
}

// Integration tests for the UI client talking to the engine server.
//
// These tests verify that:
// 1. A config/ack exchange works end to end in both directions
// 2. Stopping the server is observed by the client as a disconnect
// 3. The server re-accepts after a client leaves
// 4. stop() from another thread unblocks a waiting server (Linux)
//
// Every test binds its own socket inside a temp dir, so they can run in
// parallel.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use smartpiano_ipc::{
    ClientTransport, Message, RecvError, ServerState, Transport, TransportConfig, UdsTransport,
};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Poll `cond` until it holds or `timeout` elapses.
fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn config(tmp: &tempfile::TempDir) -> TransportConfig {
    TransportConfig::with_socket_path(tmp.path().join("smartpiano.sock"))
}

/// Start a server and connect a client to it.
fn connected_pair(tmp: &tempfile::TempDir) -> (Arc<UdsTransport>, ClientTransport) {
    let config = config(tmp);
    let server = Arc::new(UdsTransport::from_config(&config));
    assert!(server.start());

    let acceptor = Arc::clone(&server);
    let accept = thread::spawn(move || acceptor.wait_for_client());

    let client = ClientTransport::from_config(&config);
    assert!(client.connect());
    accept.join().unwrap();
    assert_eq!(server.state(), ServerState::ClientConnected);

    (server, client)
}

#[test]
fn test_config_and_ack_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let (server, client) = connected_pair(&tmp);

    client.send(&Message::with_fields("config", [("game", "note")]));

    let received = server.receive();
    assert_eq!(received.kind(), "config");
    assert_eq!(received.field("game"), "note");

    server.send(&Message::with_fields("ack", [("status", "ok")]));

    assert!(wait_until(TIMEOUT, || client.pop_message().map_or(false, |ack| {
        assert_eq!(ack.kind(), "ack");
        assert_eq!(ack.field("status"), "ok");
        true
    })));
}

#[test]
fn test_messages_keep_order() {
    let tmp = tempfile::tempdir().unwrap();
    let (server, client) = connected_pair(&tmp);

    for i in 0..20 {
        client.send(&Message::with_fields("note", [("index", i.to_string())]));
    }
    for i in 0..20 {
        let msg = server.try_receive().unwrap();
        assert_eq!(msg.field("index"), i.to_string());
    }

    for i in 0..20 {
        server.send(&Message::with_fields("tick", [("index", i.to_string())]));
    }
    let mut received = Vec::new();
    assert!(wait_until(TIMEOUT, || {
        received.extend(client.drain_messages());
        received.len() == 20
    }));
    for (i, msg) in received.iter().enumerate() {
        assert_eq!(msg.kind(), "tick");
        assert_eq!(msg.field("index"), i.to_string());
    }
}

#[test]
fn test_client_sees_server_stop() {
    let tmp = tempfile::tempdir().unwrap();
    let (server, client) = connected_pair(&tmp);

    server.stop();
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(wait_until(TIMEOUT, || !client.is_connected()));

    // Sending after the peer is gone is logged, never a panic.
    client.send(&Message::new("quit"));
    assert!(!client.is_connected());
}

#[test]
fn test_server_sees_client_disconnect() {
    let tmp = tempfile::tempdir().unwrap();
    let (server, client) = connected_pair(&tmp);

    client.send(&Message::new("ready"));
    client.disconnect();

    assert_eq!(server.try_receive().unwrap().kind(), "ready");
    assert!(matches!(server.try_receive(), Err(RecvError::Disconnected)));
    assert_eq!(server.state(), ServerState::Listening);
    assert!(server.receive().is_error());
}

#[test]
fn test_server_accepts_next_client() {
    let tmp = tempfile::tempdir().unwrap();
    let (server, first) = connected_pair(&tmp);
    drop(first);
    assert!(matches!(server.try_receive(), Err(RecvError::Disconnected)));

    let acceptor = Arc::clone(&server);
    let accept = thread::spawn(move || acceptor.wait_for_client());
    let second = ClientTransport::from_config(&config(&tmp));
    assert!(second.connect());
    accept.join().unwrap();

    second.send(&Message::with_fields("config", [("game", "chord")]));
    assert_eq!(server.receive().field("game"), "chord");
}

#[test]
fn test_client_reconnects_after_disconnect() {
    let tmp = tempfile::tempdir().unwrap();
    let (server, client) = connected_pair(&tmp);

    client.disconnect();
    client.disconnect();
    assert!(matches!(server.try_receive(), Err(RecvError::Disconnected)));

    let acceptor = Arc::clone(&server);
    let accept = thread::spawn(move || acceptor.wait_for_client());
    assert!(client.connect());
    accept.join().unwrap();

    client.send(&Message::new("ready"));
    assert_eq!(server.receive().kind(), "ready");
}

#[test]
fn test_connect_without_server_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let client = ClientTransport::from_config(&config(&tmp));
    assert!(!client.connect());
    assert!(!client.is_connected());
    assert!(client.pop_message().is_none());
}

#[test]
fn test_lifecycle_idempotence() {
    let tmp = tempfile::tempdir().unwrap();
    let server = UdsTransport::from_config(&config(&tmp));

    server.stop();
    assert_eq!(server.state(), ServerState::Idle);

    assert!(server.start());
    assert!(server.start());
    assert_eq!(server.state(), ServerState::Listening);

    server.stop();
    server.stop();
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(!server.start());
    assert!(!server.is_client_connected());
}

// Closing a listening socket wakes a blocked accept() on Linux only.
#[cfg(target_os = "linux")]
#[test]
fn test_stop_unblocks_wait_for_client() {
    let tmp = tempfile::tempdir().unwrap();
    let server = Arc::new(UdsTransport::from_config(&config(&tmp)));
    assert!(server.start());

    let acceptor = Arc::clone(&server);
    let accept = thread::spawn(move || acceptor.wait_for_client());

    thread::sleep(Duration::from_millis(100));
    server.stop();

    assert!(wait_until(TIMEOUT, || accept.is_finished()));
    accept.join().unwrap();
    assert!(!server.is_client_connected());
    assert_eq!(server.state(), ServerState::Stopped);
}

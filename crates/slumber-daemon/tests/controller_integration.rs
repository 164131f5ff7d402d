//! Integration tests for the port controller over real loopback TCP.
//!
//! # Purpose
//!
//! These tests drive [`PortController`] through its public API the way the
//! binary does, with a [`MockLauncher`] standing in for the game server.
//! They verify:
//!
//! - Status queries and pings are answered while the server sleeps.
//! - A login attempt releases the port *before* the launch and triggers
//!   exactly one launch.
//! - After the server exits (cleanly or not) the controller listens on the
//!   same port again.
//! - Garbage on one connection never takes the listener down.
//! - Shutdown stops the controller without relaunching anything, including
//!   while it is still re-acquiring the port after an exit.
//!
//! # How the port check works
//!
//! The mock launcher is given the controller's address.  On every launch it
//! tries to bind that address itself; success proves the controller had
//! already closed its listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use slumber_core::protocol::{
    encode_packet, read_packet, read_string, write_packet, HandshakeRequest, NextState, Packet,
    PingPayload, PONG_ID, STATUS_REQUEST_ID, STATUS_RESPONSE_ID,
};
use slumber_core::ServerLifecycleState;
use slumber_daemon::application::handle_connection::StatusResponder;
use slumber_daemon::infrastructure::network::controller::{
    ControllerConfig, ControllerError, ControllerHandle, ControllerStatus, PortController,
    RetryPolicy,
};
use slumber_daemon::infrastructure::supervisor::mock::MockLauncher;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const MOTD: &str = "Sleeping. Join to wake the server!";
const STEP: Duration = Duration::from_secs(5);

struct Harness {
    addr: SocketAddr,
    handle: ControllerHandle,
    launcher: MockLauncher,
    run: JoinHandle<Result<(), ControllerError>>,
}

fn start_controller() -> Harness {
    let config = ControllerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        connection_timeout: Duration::from_secs(2),
        rebind: RetryPolicy {
            attempts: 20,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
        },
    };
    let launcher = MockLauncher::new();
    let responder = StatusResponder::new(
        slumber_core::StatusResponse::sleeping(MOTD),
        Duration::from_millis(500),
    );

    let (controller, handle) =
        PortController::bind(config, responder, Arc::new(launcher.clone())).expect("bind");
    let addr = controller.local_addr();
    launcher.set_probe_addr(addr);
    let run = tokio::spawn(controller.run());

    Harness {
        addr,
        handle,
        launcher,
        run,
    }
}

fn handshake(port: u16, next_state: NextState) -> Packet {
    HandshakeRequest {
        protocol_version: 763,
        server_address: "localhost".to_string(),
        server_port: port,
        next_state,
    }
    .to_packet()
}

async fn wait_for<F>(handle: &ControllerHandle, predicate: F) -> ControllerStatus
where
    F: FnMut(&ControllerStatus) -> bool,
{
    timeout(STEP, handle.wait_until(predicate))
        .await
        .expect("status change timed out")
        .expect("controller stopped")
}

/// Runs a full status + ping exchange and returns the MOTD from the reply.
async fn query_status(addr: SocketAddr) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    write_packet(&mut stream, &handshake(addr.port(), NextState::Status)).await.unwrap();
    write_packet(&mut stream, &Packet::new(STATUS_REQUEST_ID, Vec::new())).await.unwrap();

    let reply = timeout(STEP, read_packet(&mut stream)).await.unwrap().unwrap();
    assert_eq!(reply.id, STATUS_RESPONSE_ID);
    let (json, _) = read_string(&reply.payload, 0).unwrap();
    let json: serde_json::Value = serde_json::from_str(&json).unwrap();

    let token = 0x1122_3344_5566_7788_i64;
    write_packet(&mut stream, &PingPayload(token).to_ping_packet()).await.unwrap();
    let pong = timeout(STEP, read_packet(&mut stream)).await.unwrap().unwrap();
    assert_eq!(pong.id, PONG_ID);
    assert_eq!(PingPayload::decode(&pong.payload).unwrap(), PingPayload(token));

    json["description"]["text"].as_str().unwrap().to_string()
}

/// Sends a login handshake and asserts the controller closes without replying.
async fn request_wake(addr: SocketAddr) {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream
        .write_all(&encode_packet(&handshake(addr.port(), NextState::Login)))
        .await
        .unwrap();
    let mut buf = [0u8; 16];
    let n = timeout(STEP, stream.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(n, 0, "no bytes may be sent on a login attempt");
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_status_and_ping_answered_while_sleeping() {
    // Arrange
    let h = start_controller();

    // Act
    let motd = query_status(h.addr).await;

    // Assert
    assert_eq!(motd, MOTD);
    assert_eq!(h.launcher.launch_count(), 0);
    assert_eq!(h.handle.status().state, ServerLifecycleState::Listening);
    h.handle.shutdown();
}

#[tokio::test]
async fn test_login_releases_port_then_launches_once() {
    // Arrange
    let h = start_controller();

    // Act
    request_wake(h.addr).await;
    let status = wait_for(&h.handle, |s| s.state == ServerLifecycleState::Running).await;

    // Assert
    assert_eq!(status.local_addr, None);
    assert_eq!(status.wakes, 1);
    let launches = h.launcher.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].port_was_free, Some(true), "listener must close before launch");

    // A second client cannot reach the sleeping front while the server runs.
    assert!(TcpStream::connect(h.addr).await.is_err());
    h.handle.shutdown();
}

#[tokio::test]
async fn test_listener_resumes_on_same_port_after_clean_and_failed_exit() {
    // Arrange
    let h = start_controller();

    for (round, code) in [(1u64, 0), (2u64, 1)] {
        // Act – wake, let the fake server exit with `code`
        request_wake(h.addr).await;
        wait_for(&h.handle, |s| s.state == ServerLifecycleState::Running && s.wakes == round).await;
        assert!(h.launcher.exit_child(code));

        // Assert – back on the same address and serving status again
        let status = wait_for(&h.handle, |s| {
            s.state == ServerLifecycleState::Listening && s.wakes == round
        })
        .await;
        assert_eq!(status.local_addr, Some(h.addr));
        assert_eq!(query_status(h.addr).await, MOTD);
    }

    assert_eq!(h.launcher.launch_count(), 2);
    h.handle.shutdown();
}

#[tokio::test]
async fn test_malformed_varint_drops_only_that_connection() {
    // Arrange
    let h = start_controller();

    // Act – six continuation bytes as the length prefix
    let mut bad = TcpStream::connect(h.addr).await.unwrap();
    bad.write_all(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x80]).await.unwrap();
    let mut buf = [0u8; 8];
    let closed = timeout(STEP, bad.read(&mut buf)).await.unwrap();

    // Assert – the bad peer is closed, the next one is served
    assert!(matches!(closed, Ok(0) | Err(_)));
    assert_eq!(query_status(h.addr).await, MOTD);
    assert_eq!(h.launcher.launch_count(), 0);
    h.handle.shutdown();
}

#[tokio::test]
async fn test_unknown_first_packet_is_dropped_without_wake() {
    let h = start_controller();

    let mut stream = TcpStream::connect(h.addr).await.unwrap();
    write_packet(&mut stream, &Packet::new(0x42, vec![0xDE, 0xAD])).await.unwrap();
    let mut buf = [0u8; 8];
    let n = timeout(STEP, stream.read(&mut buf)).await.unwrap().unwrap();

    assert_eq!(n, 0);
    assert_eq!(h.launcher.launch_count(), 0);
    assert_eq!(query_status(h.addr).await, MOTD);
    h.handle.shutdown();
}

#[tokio::test]
async fn test_shutdown_while_listening_stops_cleanly() {
    // Arrange
    let h = start_controller();

    // Act
    h.handle.shutdown();
    let result = timeout(STEP, h.run).await.unwrap().unwrap();

    // Assert
    assert!(result.is_ok());
    assert_eq!(h.launcher.launch_count(), 0);
}

#[tokio::test]
async fn test_shutdown_while_running_does_not_rebind() {
    // Arrange
    let h = start_controller();
    request_wake(h.addr).await;
    wait_for(&h.handle, |s| s.state == ServerLifecycleState::Running).await;

    // Act
    h.handle.shutdown();
    let result = timeout(STEP, h.run).await.unwrap().unwrap();

    // Assert – the port is left to the server, nothing relaunched
    assert!(result.is_ok());
    assert_eq!(h.handle.status().state, ServerLifecycleState::Running);
    assert_eq!(h.launcher.launch_count(), 1);
    assert!(TcpStream::connect(h.addr).await.is_err());
}

#[tokio::test]
async fn test_failed_launch_surfaces_as_error() {
    // Arrange
    let h = start_controller();
    h.launcher.fail_next_launch();

    // Act
    request_wake(h.addr).await;
    let result = timeout(STEP, h.run).await.unwrap().unwrap();

    // Assert
    assert!(matches!(result, Err(ControllerError::Launch(_))));
    assert_eq!(h.launcher.launch_count(), 0);
    assert_eq!(h.handle.status().state, ServerLifecycleState::HandingOff);
}

#[tokio::test]
async fn test_shutdown_while_restarting_on_busy_port_stops_cleanly() {
    // Arrange – the "server" keeps the port after its exit is reported
    let h = start_controller();
    request_wake(h.addr).await;
    wait_for(&h.handle, |s| s.state == ServerLifecycleState::Running).await;
    let held = std::net::TcpListener::bind(h.addr).expect("port is free while running");
    assert!(h.launcher.exit_child(0));
    wait_for(&h.handle, |s| s.state == ServerLifecycleState::Restarting).await;

    // Act
    h.handle.shutdown();
    let result = timeout(Duration::from_secs(1), h.run)
        .await
        .expect("shutdown must not wait out the rebind backoff")
        .unwrap();

    // Assert – a requested stop, not a rebind failure
    assert!(result.is_ok(), "expected Ok, got {result:?}");
    let status = h.handle.status();
    assert_eq!(status.state, ServerLifecycleState::Restarting);
    assert_eq!(status.local_addr, None);
    assert_eq!(h.launcher.launch_count(), 1);
    drop(held);
}

#[tokio::test]
async fn test_shutdown_while_restarting_does_not_reclaim_released_port() {
    // Arrange
    let h = start_controller();
    request_wake(h.addr).await;
    wait_for(&h.handle, |s| s.state == ServerLifecycleState::Running).await;
    let held = std::net::TcpListener::bind(h.addr).expect("port is free while running");
    assert!(h.launcher.exit_child(1));
    wait_for(&h.handle, |s| s.state == ServerLifecycleState::Restarting).await;

    // Act – stop first, then free the port while a retry is still pending
    h.handle.shutdown();
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(held);
    let result = timeout(STEP, h.run).await.unwrap().unwrap();

    // Assert – never went back to Listening, and nobody holds the port
    assert!(result.is_ok());
    assert_eq!(h.handle.status().state, ServerLifecycleState::Restarting);
    assert!(h.handle.wait_until(|s| s.state == ServerLifecycleState::Listening).await.is_none());
    assert!(std::net::TcpListener::bind(h.addr).is_ok(), "controller must not re-acquire the port");
}

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Integration tests for the shared, reference-counted connection.

mod common;

use cfh_client::{CfhError, ConnectionConfig, ConnectionManager, ConnectionState};
use common::{settle, wait_for_state, MockConnector, STEP};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

fn manager() -> (ConnectionManager, common::MockServer) {
    let (connector, server) = MockConnector::new();
    (
        ConnectionManager::new(connector, ConnectionConfig::default()),
        server,
    )
}

#[tokio::test]
async fn consumers_share_one_physical_connection() {
    let (manager, mut server) = manager();
    let lobby = manager.acquire();
    let roster = manager.acquire();
    let mut peer = server.accept().await;
    wait_for_state(&mut lobby.watch_state(), ConnectionState::Open).await;

    lobby.send(json!({"msg": "CreateGame"}).to_string());
    roster.send(json!({"msg": "SetUsername", "username": "alice"}).to_string());

    assert_eq!(peer.recv_json().await["msg"], "CreateGame");
    assert_eq!(peer.recv_json().await["msg"], "SetUsername");
    assert_eq!(server.connects(), 1);
    assert_eq!(manager.ref_count(), 2);
}

#[tokio::test]
async fn releasing_one_reference_keeps_the_socket_open() {
    let (manager, mut server) = manager();
    let first = manager.acquire();
    let second = manager.acquire();
    let mut peer = server.accept().await;
    wait_for_state(&mut first.watch_state(), ConnectionState::Open).await;

    drop(first);
    settle().await;
    assert_eq!(manager.state(), ConnectionState::Open);
    assert!(!peer.client_closed());

    second.send(r#"{"msg":"CreateGame"}"#);
    assert_eq!(peer.recv_json().await["msg"], "CreateGame");
}

#[tokio::test]
async fn last_release_closes_the_socket() {
    let (manager, mut server) = manager();
    let handle = manager.acquire();
    let peer = server.accept().await;
    wait_for_state(&mut handle.watch_state(), ConnectionState::Open).await;

    manager.release(handle);
    assert_eq!(manager.ref_count(), 0);
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    tokio::time::timeout(STEP, async {
        while !peer.client_closed() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("transport was never closed");
}

#[tokio::test]
async fn acquire_after_full_release_dials_again() {
    let (manager, mut server) = manager();
    let first = manager.acquire();
    let _first_peer = server.accept().await;
    wait_for_state(&mut first.watch_state(), ConnectionState::Open).await;
    drop(first);

    let handle = manager.acquire();
    let mut peer = server.accept().await;
    wait_for_state(&mut handle.watch_state(), ConnectionState::Open).await;
    assert_eq!(server.connects(), 2);

    handle.send(r#"{"msg":"CreateGame"}"#);
    assert_eq!(peer.recv_json().await["msg"], "CreateGame");
}

#[tokio::test]
async fn sends_before_open_are_dropped_silently() {
    let (manager, mut server) = manager();
    let handle = manager.acquire();
    assert_eq!(handle.state(), ConnectionState::Connecting);
    handle.send(r#"{"msg":"Early"}"#);
    assert_err!(handle.try_send(r#"{"msg":"Early"}"#));

    let mut peer = server.accept().await;
    wait_for_state(&mut handle.watch_state(), ConnectionState::Open).await;
    assert_ok!(handle.try_send(r#"{"msg":"OnTime"}"#));
    assert_eq!(peer.recv_json().await["msg"], "OnTime");
    settle().await;
    assert!(peer.is_quiet());
}

#[tokio::test]
async fn server_hang_up_disconnects_without_redialing() {
    let (manager, mut server) = manager();
    let handle = manager.acquire();
    let mut peer = server.accept().await;
    let mut states = handle.watch_state();
    wait_for_state(&mut states, ConnectionState::Open).await;

    peer.hang_up();
    wait_for_state(&mut states, ConnectionState::Disconnected).await;
    assert!(matches!(
        handle.try_send(r#"{"msg":"CreateGame"}"#),
        Err(CfhError::NotConnected)
    ));
    handle.send(r#"{"msg":"CreateGame"}"#);
    settle().await;
    assert_eq!(server.connects(), 1);
}

#[tokio::test]
async fn reconnect_opens_a_fresh_connection() {
    let (manager, mut server) = manager();
    let handle = manager.acquire();
    let mut peer = server.accept().await;
    let mut states = handle.watch_state();
    wait_for_state(&mut states, ConnectionState::Open).await;
    assert!(!handle.reconnect());

    peer.hang_up();
    wait_for_state(&mut states, ConnectionState::Disconnected).await;

    assert!(handle.reconnect());
    let mut fresh = server.accept().await;
    wait_for_state(&mut states, ConnectionState::Open).await;
    handle.send(r#"{"msg":"CreateGame"}"#);
    assert_eq!(fresh.recv_json().await["msg"], "CreateGame");
    assert_eq!(server.connects(), 2);
}

#[tokio::test]
async fn frames_arrive_in_order() {
    let (manager, mut server) = manager();
    let handle = manager.acquire();
    let mut frames = handle.frames();
    let peer = server.accept().await;
    wait_for_state(&mut handle.watch_state(), ConnectionState::Open).await;

    for n in 0..20 {
        peer.push(format!(r#"{{"msg":"Tick","n":{n}}}"#));
    }
    for n in 0..20 {
        let frame = tokio::time::timeout(STEP, frames.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, format!(r#"{{"msg":"Tick","n":{n}}}"#));
    }
}

#[tokio::test]
async fn shutdown_closes_regardless_of_references() {
    let (manager, mut server) = manager();
    let a = manager.acquire();
    let _b = manager.acquire();
    let peer = server.accept().await;
    wait_for_state(&mut a.watch_state(), ConnectionState::Open).await;

    manager.shutdown().await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(peer.client_closed());
    assert!(!a.reconnect());

    let _c = manager.acquire();
    settle().await;
    assert_eq!(server.connects(), 1);
}

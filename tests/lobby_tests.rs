#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! End-to-end lobby handshake tests against an in-memory server.

mod common;

use cfh_client::{
    CfhClient, CfhError, ConnectionConfig, ConnectionState, GameId, Ids, LobbyError, LobbyState,
};
use common::{
    accepted, not_found, player_list, rejected, settle, wait_for_lobby, wait_for_state,
    MockConnector, MockPeer, MockServer,
};
use serde_json::json;
use tokio_test::assert_ok;

/// An open client that has not picked a username.
async fn connected_anonymous() -> (CfhClient, MockServer, MockPeer) {
    let (connector, mut server) = MockConnector::new();
    let client = CfhClient::start(connector, ConnectionConfig::default());
    let peer = server.accept().await;
    wait_for_state(&mut client.manager().watch_state(), ConnectionState::Open).await;
    (client, server, peer)
}

/// An open client named "alice", with the `SetUsername` frame consumed.
async fn connected() -> (CfhClient, MockServer, MockPeer) {
    let (client, server, mut peer) = connected_anonymous().await;
    assert_ok!(client.set_username("alice"));
    assert_eq!(peer.recv_json().await["msg"], "SetUsername");
    (client, server, peer)
}

fn ids(game_id: u16, player_id: u32) -> Ids {
    Ids {
        game_id: GameId::new(game_id),
        player_id,
    }
}

#[tokio::test]
async fn create_game_joins_the_new_room() {
    let (client, _server, mut peer) = connected().await;
    let lobby = client.lobby();
    let mut states = lobby.watch();

    assert_ok!(lobby.create_game());
    assert!(lobby.state().is_submitting());
    assert_eq!(peer.recv_json().await, json!({"msg": "CreateGame"}));

    peer.push_json(&accepted(0xD332, 7));
    let state = wait_for_lobby(&mut states, |s| s.joined().is_some()).await;
    assert_eq!(state, LobbyState::Joined(ids(0xD332, 7)));
    assert_eq!(client.snapshot().ids, Some(ids(0xD332, 7)));
}

#[tokio::test]
async fn joining_a_missing_room_reports_not_found() {
    let (client, _server, mut peer) = connected().await;
    let lobby = client.lobby();
    let mut states = lobby.watch();

    let id = assert_ok!(lobby.join_game("D332"));
    assert_eq!(id, GameId::new(0xD332));
    assert_eq!(peer.recv_json().await, json!({"msg": "JoinGame", "id": 54066}));

    peer.push_json(&not_found());
    let state = wait_for_lobby(&mut states, LobbyState::is_idle).await;
    assert_eq!(state.error(), Some(LobbyError::NotFound));
    assert_eq!(state.error().unwrap().to_string(), "room not found");
    assert!(client.snapshot().ids.is_none());
}

#[tokio::test]
async fn joining_a_full_room_reports_full() {
    let (client, _server, mut peer) = connected().await;
    let lobby = client.lobby();
    let mut states = lobby.watch();

    assert_ok!(lobby.join_game("d332"));
    peer.recv_json().await;
    peer.push_json(&rejected());

    let state = wait_for_lobby(&mut states, LobbyState::is_idle).await;
    assert_eq!(state.error(), Some(LobbyError::Full));
    assert_eq!(state.error().unwrap().to_string(), "room is full");
    assert!(client.snapshot().ids.is_none());
}

#[tokio::test]
async fn malformed_room_id_sends_nothing() {
    let (client, _server, mut peer) = connected().await;
    let lobby = client.lobby();

    let err = lobby.join_game("ZZZZ").unwrap_err();
    assert!(matches!(err, CfhError::InvalidGameId(_)));
    assert_eq!(lobby.state(), LobbyState::failed(LobbyError::InvalidGameId));

    for input in ["D33", "D3321", "", " D33"] {
        assert!(lobby.join_game(input).is_err(), "input {input:?}");
    }
    settle().await;
    assert!(peer.is_quiet());
}

#[tokio::test]
async fn live_input_feedback() {
    let (client, _server, _peer) = connected().await;
    let lobby = client.lobby();
    assert_eq!(lobby.input_error(""), None);
    assert_eq!(lobby.input_error("D3"), Some(LobbyError::InvalidGameId));
    assert_eq!(lobby.input_error("D332"), None);
}

#[tokio::test]
async fn second_request_while_pending_is_refused() {
    let (client, _server, mut peer) = connected().await;
    let lobby = client.lobby();

    assert_ok!(lobby.create_game());
    assert!(matches!(lobby.join_game("D332"), Err(CfhError::RequestPending)));
    assert!(matches!(lobby.create_game(), Err(CfhError::RequestPending)));

    assert_eq!(peer.recv_json().await["msg"], "CreateGame");
    settle().await;
    assert!(peer.is_quiet());
}

#[tokio::test]
async fn failed_attempt_can_be_retried() {
    let (client, _server, mut peer) = connected().await;
    let lobby = client.lobby();
    let mut states = lobby.watch();

    assert_ok!(lobby.join_game("0001"));
    peer.recv_json().await;
    peer.push_json(&not_found());
    wait_for_lobby(&mut states, LobbyState::is_idle).await;

    assert_ok!(lobby.create_game());
    assert_eq!(lobby.state().error(), None);
    peer.recv_json().await;
    peer.push_json(&accepted(0xBEEF, 1));
    let state = wait_for_lobby(&mut states, |s| s.joined().is_some()).await;
    assert_eq!(state.joined(), Some(ids(0xBEEF, 1)));
}

#[tokio::test]
async fn joined_lobby_refuses_further_requests() {
    let (client, _server, mut peer) = connected().await;
    let lobby = client.lobby();
    let mut states = lobby.watch();

    assert_ok!(lobby.create_game());
    peer.recv_json().await;
    peer.push_json(&accepted(1, 2));
    wait_for_lobby(&mut states, |s| s.joined().is_some()).await;

    assert!(matches!(lobby.create_game(), Err(CfhError::AlreadyJoined)));
    assert!(matches!(lobby.join_game("0002"), Err(CfhError::AlreadyJoined)));
}

#[tokio::test]
async fn unsolicited_response_is_ignored() {
    let (client, _server, peer) = connected().await;
    let lobby = client.lobby();
    let mut everything = client.bus().subscribe_all();

    peer.push_json(&accepted(0xD332, 7));
    // Once the client's own bus has it, the lobby's has too.
    tokio::time::timeout(common::STEP, everything.recv())
        .await
        .unwrap()
        .unwrap();
    settle().await;

    assert_eq!(lobby.state(), LobbyState::default());
    assert!(client.snapshot().ids.is_none());
}

#[tokio::test]
async fn other_messages_do_not_affect_the_lobby() {
    let (client, _server, mut peer) = connected().await;
    let lobby = client.lobby();
    let mut states = lobby.watch();

    assert_ok!(lobby.create_game());
    peer.recv_json().await;
    peer.push_json(&player_list(1, &["alice"]));
    peer.push(r#"{"msg":"JoinResponse","response":{"type":"Perhaps"}}"#);
    settle().await;
    assert!(lobby.state().is_submitting());

    peer.push_json(&accepted(3, 4));
    wait_for_lobby(&mut states, |s| s.joined().is_some()).await;
}

#[tokio::test]
async fn connection_loss_fails_the_pending_request() {
    let (client, _server, mut peer) = connected().await;
    let lobby = client.lobby();
    let mut states = lobby.watch();

    assert_ok!(lobby.create_game());
    peer.recv_json().await;
    peer.hang_up();

    let state = wait_for_lobby(&mut states, LobbyState::is_idle).await;
    assert_eq!(state.error(), Some(LobbyError::ConnectionLost));
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    assert!(matches!(lobby.create_game(), Err(CfhError::NotConnected)));
    assert_eq!(lobby.state().error(), Some(LobbyError::ConnectionLost));
}

#[tokio::test]
async fn lobby_resumes_after_manual_reconnect() {
    let (client, mut server, mut peer) = connected().await;
    let lobby = client.lobby();
    let mut states = lobby.watch();
    let mut conn = client.manager().watch_state();

    peer.hang_up();
    wait_for_state(&mut conn, ConnectionState::Disconnected).await;
    assert!(client.bus().connection().reconnect());

    let mut fresh = server.accept().await;
    wait_for_state(&mut conn, ConnectionState::Open).await;
    assert_ok!(lobby.create_game());
    assert_eq!(fresh.recv_json().await["msg"], "CreateGame");
    fresh.push_json(&accepted(9, 9));
    wait_for_lobby(&mut states, |s| s.joined().is_some()).await;
}

#[tokio::test]
async fn later_mounts_stay_in_the_first_room() {
    let (client, _server, mut peer) = connected().await;

    let first = client.lobby();
    let mut first_states = first.watch();
    assert_ok!(first.create_game());
    peer.recv_json().await;
    peer.push_json(&accepted(0xD332, 7));
    wait_for_lobby(&mut first_states, |s| s.joined().is_some()).await;
    drop(first);

    let second = client.lobby();
    assert_eq!(second.state(), LobbyState::Joined(ids(0xD332, 7)));
    assert!(matches!(second.join_game("BEEF"), Err(CfhError::AlreadyJoined)));
    assert!(matches!(second.create_game(), Err(CfhError::AlreadyJoined)));

    settle().await;
    assert!(peer.is_quiet());
    assert_eq!(client.snapshot().ids, Some(ids(0xD332, 7)));
}

#[tokio::test]
async fn idle_mount_catches_up_when_another_joins() {
    let (client, _server, mut peer) = connected().await;
    let idle = client.lobby();
    let active = client.lobby();
    let mut states = active.watch();

    assert_ok!(active.join_game("D332"));
    peer.recv_json().await;
    peer.push_json(&accepted(0xD332, 7));
    wait_for_lobby(&mut states, |s| s.joined().is_some()).await;

    assert!(matches!(idle.create_game(), Err(CfhError::AlreadyJoined)));
    assert_eq!(idle.state(), LobbyState::Joined(ids(0xD332, 7)));
    settle().await;
    assert!(peer.is_quiet());
}

#[tokio::test]
async fn lobby_requests_need_a_username() {
    let (client, _server, mut peer) = connected_anonymous().await;
    let lobby = client.lobby();

    assert!(matches!(lobby.create_game(), Err(CfhError::UsernameRequired)));
    assert!(matches!(lobby.join_game("D332"), Err(CfhError::UsernameRequired)));
    assert_eq!(lobby.state(), LobbyState::default());
    settle().await;
    assert!(peer.is_quiet());

    assert_ok!(client.set_username("bob"));
    peer.recv_json().await;
    assert_ok!(lobby.create_game());
    assert_eq!(peer.recv_json().await, json!({"msg": "CreateGame"}));
}

#[tokio::test]
async fn reconnect_fails_a_request_sent_on_the_old_link() {
    let (client, mut server, mut peer) = connected().await;
    let lobby = client.lobby();
    let mut states = lobby.watch();
    let mut conn = client.manager().watch_state();

    assert_ok!(lobby.create_game());
    peer.recv_json().await;
    peer.hang_up();
    wait_for_state(&mut conn, ConnectionState::Disconnected).await;
    assert!(client.bus().connection().reconnect());
    let _fresh = server.accept().await;

    let state = wait_for_lobby(&mut states, LobbyState::is_idle).await;
    assert_eq!(state.error(), Some(LobbyError::ConnectionLost));
}

#[tokio::test]
async fn lobby_mounts_share_the_client_connection() {
    let (client, server, _peer) = connected().await;
    let lobby = client.lobby();
    let other = client.lobby();
    assert_eq!(client.manager().ref_count(), 3);
    drop(lobby);
    drop(other);
    settle().await;
    assert_eq!(client.manager().ref_count(), 1);
    assert!(client.is_connected());
    assert_eq!(server.connects(), 1);
}

#[tokio::test]
async fn set_username_updates_session_and_server() {
    let (client, _server, mut peer) = connected_anonymous().await;
    let mut session = client.session().watch();

    assert_ok!(client.set_username("alice"));
    assert_eq!(client.snapshot().username, "alice");
    assert!(session.has_changed().unwrap());
    assert_eq!(
        peer.recv_json().await,
        json!({"msg": "SetUsername", "username": "alice"})
    );

    assert!(matches!(
        client.set_username(" \t"),
        Err(CfhError::EmptyUsername)
    ));
    assert_eq!(session.borrow_and_update().username, "alice");
    settle().await;
    assert!(peer.is_quiet());
}

#[tokio::test]
async fn shutdown_disconnects_every_mount() {
    let (client, _server, peer) = connected().await;
    let lobby = client.lobby();
    client.shutdown().await;
    assert!(peer.client_closed());
    assert!(matches!(lobby.create_game(), Err(CfhError::NotConnected)));
}

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for CFH client integration tests.
//!
//! [`MockConnector`] hands out in-memory transports. For every physical
//! connection the manager opens, the test side receives a [`MockPeer`] that
//! plays the server: it reads what the client sent and pushes frames back.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cfh_client::{CfhError, ConnectionState, Connector, LobbyState, Transport};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};

/// How long a test waits for something that should happen promptly.
pub const STEP: Duration = Duration::from_secs(2);

// ── Loopback transport ──────────────────────────────────────────────

struct LoopbackTransport {
    to_server: mpsc::UnboundedSender<String>,
    from_server: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, message: String) -> Result<(), CfhError> {
        self.to_server
            .send(message)
            .map_err(|e| CfhError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, CfhError>> {
        self.from_server.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), CfhError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// The server end of one physical connection.
pub struct MockPeer {
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: Option<mpsc::UnboundedSender<String>>,
    closed: Arc<AtomicBool>,
}

impl MockPeer {
    /// Next frame the client sent, parsed as JSON.
    pub async fn recv_json(&mut self) -> Value {
        let frame = tokio::time::timeout(STEP, self.from_client.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client side of the connection is gone");
        serde_json::from_str(&frame).expect("client sent invalid JSON")
    }

    /// Returns `true` if no client frame is queued.
    pub fn is_quiet(&mut self) -> bool {
        self.from_client.try_recv().is_err()
    }

    /// Push a raw frame to the client.
    pub fn push(&self, frame: impl Into<String>) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(frame.into());
        }
    }

    /// Push a JSON value to the client.
    pub fn push_json(&self, value: &Value) {
        self.push(value.to_string());
    }

    /// Simulate the server dropping the connection.
    pub fn hang_up(&mut self) {
        self.to_client = None;
    }

    /// Returns `true` once the client closed its transport.
    pub fn client_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Connector producing loopback transports.
pub struct MockConnector {
    peers: mpsc::UnboundedSender<MockPeer>,
    connects: Arc<AtomicUsize>,
}

/// Test-side view of a [`MockConnector`].
pub struct MockServer {
    peers: mpsc::UnboundedReceiver<MockPeer>,
    connects: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> (Self, MockServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connects = Arc::new(AtomicUsize::new(0));
        (
            Self {
                peers: tx,
                connects: Arc::clone(&connects),
            },
            MockServer {
                peers: rx,
                connects,
            },
        )
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, CfhError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let peer = MockPeer {
            from_client,
            to_client: Some(to_client),
            closed: Arc::clone(&closed),
        };
        self.peers
            .send(peer)
            .map_err(|_| CfhError::TransportClosed)?;
        Ok(Box::new(LoopbackTransport {
            to_server,
            from_server,
            closed,
        }))
    }
}

impl MockServer {
    /// Wait for the client to open its next physical connection.
    pub async fn accept(&mut self) -> MockPeer {
        tokio::time::timeout(STEP, self.peers.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }

    /// Number of physical connections opened so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

// ── Waiting helpers ─────────────────────────────────────────────────

/// Wait until the connection reaches `target`.
pub async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, target: ConnectionState) {
    tokio::time::timeout(STEP, rx.wait_for(|state| *state == target))
        .await
        .expect("timed out waiting for connection state")
        .expect("connection manager dropped");
}

/// Wait until the lobby state satisfies `pred`, returning it.
pub async fn wait_for_lobby<F>(rx: &mut watch::Receiver<LobbyState>, pred: F) -> LobbyState
where
    F: FnMut(&LobbyState) -> bool,
{
    let state = tokio::time::timeout(STEP, rx.wait_for(pred))
        .await
        .expect("timed out waiting for lobby state")
        .expect("lobby controller dropped");
    *state
}

/// Let spawned tasks run until the runtime is idle.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

// ── Server frames ───────────────────────────────────────────────────

pub fn accepted(game_id: u16, player_id: u32) -> Value {
    json!({
        "msg": "JoinResponse",
        "response": {"type": "Accepted", "game_id": game_id, "player_id": player_id}
    })
}

pub fn rejected() -> Value {
    json!({"msg": "JoinResponse", "response": {"type": "Rejected"}})
}

pub fn not_found() -> Value {
    json!({"msg": "JoinResponse", "response": null})
}

pub fn player_list(host: u32, names: &[&str]) -> Value {
    let players: Vec<Value> = names
        .iter()
        .zip(1u32..)
        .map(|(name, id)| json!({"id": id, "name": name, "points": 0}))
        .collect();
    json!({"msg": "PlayerListUpdate", "host": host, "players": players})
}

//! # Loopback Lobby Example
//!
//! Runs the whole lobby handshake without a network: a custom [`Connector`]
//! hands the client one end of an in-memory channel pair, and a tiny fake
//! server task on the other end answers `CreateGame` and `JoinGame`.
//!
//! This is also the template for plugging in a custom transport.
//!
//! ## Running
//!
//! ```sh
//! cargo run --example loopback_lobby
//! ```

use async_trait::async_trait;
use cfh_client::{
    CfhClient, CfhError, ConnectionConfig, ConnectionState, Connector, Envelope, LobbyState,
    Transport,
};
use serde_json::json;
use tokio::sync::mpsc;

// ── Transport ───────────────────────────────────────────────────────

/// Client end of an in-memory channel pair.
struct ChannelTransport {
    outgoing: mpsc::UnboundedSender<String>,
    incoming: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, message: String) -> Result<(), CfhError> {
        self.outgoing
            .send(message)
            .map_err(|e| CfhError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, CfhError>> {
        // `mpsc::UnboundedReceiver::recv` is cancel-safe.
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), CfhError> {
        self.incoming.close();
        Ok(())
    }
}

/// Spawns a fake server for every connection it opens.
struct LoopbackConnector;

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, CfhError> {
        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        tokio::spawn(fake_server(from_client, to_client));
        Ok(Box::new(ChannelTransport {
            outgoing: to_server,
            incoming: from_server,
        }))
    }
}

// ── Fake server ─────────────────────────────────────────────────────

async fn fake_server(
    mut from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<String>,
) {
    let mut username: Option<String> = None;
    let mut next_player = 1u32;

    while let Some(frame) = from_client.recv().await {
        let Some(envelope) = Envelope::parse(&frame) else {
            continue;
        };
        let reply = match envelope.msg.as_str() {
            "SetUsername" => {
                if let Some(name) = envelope.field("username").and_then(|v| v.as_str()) {
                    username = Some(name.to_string());
                }
                continue;
            }
            // Like the real server: no name, no room, no reply.
            "CreateGame" | "JoinGame" if username.is_none() => continue,
            "CreateGame" => json!({
                "msg": "JoinResponse",
                "response": {"type": "Accepted", "game_id": 0xD332, "player_id": next_player}
            }),
            // Only room D332 exists in this demo.
            "JoinGame" if envelope.field("id") == Some(&json!(0xD332)) => json!({
                "msg": "JoinResponse",
                "response": {"type": "Accepted", "game_id": 0xD332, "player_id": next_player}
            }),
            "JoinGame" => json!({"msg": "JoinResponse", "response": null}),
            _ => continue,
        };
        let _ = to_client.send(reply.to_string());

        let roster = json!({
            "msg": "PlayerListUpdate",
            "host": 1,
            "players": [{"id": next_player, "name": username, "points": 0}]
        });
        let _ = to_client.send(roster.to_string());
        next_player += 1;
    }
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let client = CfhClient::start(LoopbackConnector, ConnectionConfig::default());
    client
        .manager()
        .watch_state()
        .wait_for(|state| *state == ConnectionState::Open)
        .await?;
    client.set_username("loopback")?;

    // A bad room id never reaches the server.
    let lobby = client.lobby();
    if let Err(e) = lobby.join_game("ZZZZ") {
        tracing::info!("Rejected locally: {e}");
    }

    // A room that does not exist.
    let mut states = lobby.watch();
    lobby.join_game("0001")?;
    let state = *states
        .wait_for(|s| matches!(s, LobbyState::Idle { error: Some(_) }))
        .await?;
    tracing::info!("Join 0001: {}", state.error().map_or("ok", |e| e.description()));

    // The one that does.
    lobby.join_game("D332")?;
    let state = *states.wait_for(|s| s.joined().is_some()).await?;
    tracing::info!("Join D332: {state:?}");
    tracing::info!("Session: {:?}", client.snapshot());

    client.shutdown().await;
    Ok(())
}

//! # Basic Lobby Example
//!
//! Demonstrates a complete CFH client lifecycle:
//!
//! 1. Connect to a game server via WebSocket
//! 2. Announce a username
//! 3. Create a room, or join one when a room id is given
//! 4. Print roster updates until Ctrl+C or disconnect
//!
//! ## Running
//!
//! ```sh
//! # Start a CFH server on localhost:8000, then:
//! cargo run --example basic_lobby
//!
//! # Join an existing room on another host:
//! CFH_HOST=my-server:8000 cargo run --example basic_lobby -- D332
//! ```

use cfh_client::{
    CfhClient, ConnectionConfig, ConnectionState, LobbyState, ServerMessage, WebSocketConnector,
};

/// Default server host when `CFH_HOST` is not set.
const DEFAULT_HOST: &str = "localhost:8000";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Initialize tracing. Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let host = std::env::var("CFH_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
    let room = std::env::args().nth(1);
    let connector = WebSocketConnector::new(host);
    tracing::info!("Connecting to {}", connector.url());

    // ── Connect ─────────────────────────────────────────────────────
    let client = CfhClient::start(connector, ConnectionConfig::default());
    let mut connection = client.manager().watch_state();
    connection
        .wait_for(|state| *state != ConnectionState::Connecting)
        .await?;
    if !client.is_connected() {
        tracing::error!("Could not reach the server");
        return Ok(());
    }

    client.set_username("RustPlayer")?;

    // ── Lobby ───────────────────────────────────────────────────────
    let lobby = client.lobby();
    match &room {
        Some(room_id) => {
            lobby.join_game(room_id)?;
            tracing::info!("Joining room {room_id}…");
        }
        None => {
            lobby.create_game()?;
            tracing::info!("Creating a room…");
        }
    }

    let mut rosters = client.subscribe_to("PlayerListUpdate");
    let mut lobby_state = lobby.watch();

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            changed = lobby_state.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *lobby_state.borrow_and_update();
                match state {
                    LobbyState::Joined(ids) => {
                        tracing::info!("Seated in room {} as player {}", ids.game_id, ids.player_id);
                    }
                    LobbyState::Idle { error: Some(error) } => {
                        tracing::error!("Could not join: {error}");
                        break;
                    }
                    other => tracing::debug!("Lobby: {other:?}"),
                }
            }

            envelope = rosters.recv() => {
                let Some(envelope) = envelope else {
                    break;
                };
                match envelope.decode::<ServerMessage>() {
                    Ok(ServerMessage::PlayerListUpdate { host, players }) => {
                        let names: Vec<_> = players.iter().map(|p| p.name.as_str()).collect();
                        tracing::info!("Players (host {host}): {}", names.join(", "));
                    }
                    Ok(other) => tracing::debug!("Message: {other:?}"),
                    Err(e) => tracing::warn!("Bad roster update: {e}"),
                }
            }

            changed = connection.changed() => {
                if changed.is_err() || *connection.borrow_and_update() == ConnectionState::Disconnected {
                    tracing::warn!("Disconnected from the server");
                    break;
                }
            }

            // Ctrl+C: shut down gracefully.
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down…");
                break;
            }
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    client.shutdown().await;
    tracing::info!("Client shut down. Goodbye!");
    Ok(())
}

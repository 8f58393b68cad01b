//! # Cards From Hell Client
//!
//! Async client for the Cards From Hell multiplayer card game server.
//!
//! The server speaks JSON envelopes over a single WebSocket; every envelope is
//! an object whose `msg` field names its kind. This crate shares that one
//! socket among any number of consumers and implements the lobby handshake
//! that seats the local player in a room.
//!
//! ## Layers
//!
//! - [`ConnectionManager`]: one reference-counted physical connection
//! - [`MessageBus`]: envelope parsing, typed sends and filtered subscriptions
//! - [`SessionStore`]: the local player's name and assigned ids
//! - [`LobbyController`]: the create/join room handshake
//! - [`CfhClient`]: a facade owning all of the above
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement [`Connector`] and [`Transport`] for any backend
//! - **WebSocket built-in**: the default `transport-websocket` feature provides
//!   `WebSocketConnector`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cfh_client::{CfhClient, ConnectionConfig, WebSocketConnector};
//!
//! let client = CfhClient::start(
//!     WebSocketConnector::new("localhost:8000"),
//!     ConnectionConfig::default(),
//! );
//! client.set_username("alice")?;
//! let lobby = client.lobby();
//! lobby.join_game("D332")?;
//! ```

pub mod bus;
pub mod client;
pub mod connection;
pub mod controller;
pub mod error;
pub mod game_id;
pub mod lobby;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use bus::{MessageBus, Subscription};
pub use client::CfhClient;
pub use connection::{ConnectionConfig, ConnectionHandle, ConnectionManager, ConnectionState};
pub use controller::LobbyController;
pub use error::CfhError;
pub use game_id::{GameId, GameIdError};
pub use lobby::{LobbyError, LobbyRequest, LobbyState};
pub use protocol::{ClientMessage, Envelope, JoinReply, PlayerInfo, ServerMessage};
pub use session::{Ids, Session, SessionAction, SessionStore};
pub use transport::{Connector, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};

//! Top-level client for the Cards From Hell game server.
//!
//! [`CfhClient`] ties the pieces together: one [`ConnectionManager`] holding
//! the shared socket, a [`MessageBus`] on a reference the client keeps for
//! itself, and the [`SessionStore`] every lobby records into. Each screen of
//! the UI mounts its own consumers (a [`LobbyController`], extra buses) on the
//! same manager; they share the socket and release their reference when
//! dropped.
//!
//! # Example
//!
//! ```rust,ignore
//! let client = CfhClient::start(
//!     WebSocketConnector::new("localhost:8000"),
//!     ConnectionConfig::default(),
//! );
//! client.set_username("alice")?;
//!
//! let lobby = client.lobby();
//! lobby.create_game()?;
//! ```

use serde_json::Value;
use tracing::{debug, info};

use crate::bus::{MessageBus, Subscription};
use crate::connection::{ConnectionConfig, ConnectionManager, ConnectionState};
use crate::controller::LobbyController;
use crate::error::{CfhError, Result};
use crate::protocol::ClientMessage;
use crate::session::{Session, SessionAction, SessionStore};
use crate::transport::Connector;

/// Handle to a running client.
pub struct CfhClient {
    manager: ConnectionManager,
    bus: MessageBus,
    session: SessionStore,
}

impl CfhClient {
    /// Build the shared connection and open it.
    ///
    /// The client holds one connection reference for its own bus, so the
    /// socket stays up until [`shutdown`](Self::shutdown) or drop. Must be
    /// called from within a tokio runtime.
    pub fn start(connector: impl Connector, config: ConnectionConfig) -> Self {
        let manager = ConnectionManager::new(connector, config);
        let bus = MessageBus::mount(&manager);
        info!("client started");
        Self {
            manager,
            bus,
            session: SessionStore::new(),
        }
    }

    /// Pick the local display name and announce it.
    ///
    /// The session is updated right away; the server does not acknowledge
    /// the change. While the connection is not open the announcement is
    /// dropped.
    ///
    /// # Errors
    ///
    /// - [`CfhError::EmptyUsername`] if `name` is empty or only whitespace
    /// - [`CfhError::Serialization`] if encoding fails
    pub fn set_username(&self, name: impl Into<String>) -> Result<()> {
        let username = name.into();
        if username.trim().is_empty() {
            return Err(CfhError::EmptyUsername);
        }
        self.session
            .dispatch(SessionAction::SetUsername(username.clone()));
        self.bus
            .send_message(&ClientMessage::SetUsername { username })
    }

    /// Mount a lobby on the shared connection.
    pub fn lobby(&self) -> LobbyController {
        LobbyController::mount(&self.manager, self.session.clone())
    }

    /// Send a raw envelope on the client's own bus.
    ///
    /// # Errors
    ///
    /// See [`MessageBus::send`].
    pub fn send(&self, msg: &str, payload: Value) -> Result<()> {
        self.bus.send(msg, payload)
    }

    /// Subscribe to envelopes with the discriminator `msg`.
    pub fn subscribe_to(&self, msg: impl Into<String>) -> Subscription {
        self.bus.subscribe_to(msg)
    }

    /// The session store shared with every lobby.
    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// Copy of the current session.
    pub fn snapshot(&self) -> Session {
        self.session.snapshot()
    }

    /// The shared connection.
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// The client's own bus.
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Returns `true` if frames can currently be sent.
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Open
    }

    /// Close the connection, even if other consumers still hold references.
    ///
    /// No new connection is opened afterwards. Calling this twice is
    /// harmless.
    pub async fn shutdown(&self) {
        debug!("client shutdown requested");
        self.manager.shutdown().await;
    }
}

impl std::fmt::Debug for CfhClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CfhClient")
            .field("connection", &self.connection_state())
            .field("session", &self.session)
            .finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::transport::Transport;
    use async_trait::async_trait;

    struct RefusingConnector;

    #[async_trait]
    impl Connector for RefusingConnector {
        async fn connect(&self) -> Result<Box<dyn Transport>> {
            Err(CfhError::TransportClosed)
        }
    }

    #[tokio::test]
    async fn start_holds_one_reference() {
        let client = CfhClient::start(RefusingConnector, ConnectionConfig::default());
        assert_eq!(client.manager().ref_count(), 1);
        let lobby = client.lobby();
        assert_eq!(client.manager().ref_count(), 2);
        drop(lobby);
        assert_eq!(client.manager().ref_count(), 1);
    }

    #[tokio::test]
    async fn blank_username_is_rejected() {
        let client = CfhClient::start(RefusingConnector, ConnectionConfig::default());
        assert!(matches!(
            client.set_username(""),
            Err(CfhError::EmptyUsername)
        ));
        assert!(matches!(
            client.set_username("   "),
            Err(CfhError::EmptyUsername)
        ));
        assert!(client.snapshot().username.is_empty());
    }

    #[tokio::test]
    async fn username_is_recorded_while_offline() {
        let client = CfhClient::start(RefusingConnector, ConnectionConfig::default());
        client.set_username("alice").unwrap();
        assert_eq!(client.snapshot().username, "alice");
    }

    #[tokio::test]
    async fn double_shutdown_does_not_panic() {
        let client = CfhClient::start(RefusingConnector, ConnectionConfig::default());
        client.shutdown().await;
        client.shutdown().await;
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn debug_impl_for_client() {
        let client = CfhClient::start(RefusingConnector, ConnectionConfig::default());
        let debug = format!("{client:?}");
        assert!(debug.contains("CfhClient"));
    }
}

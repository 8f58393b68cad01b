//! Drives the lobby handshake over the message bus.
//!
//! [`LobbyController`] owns a [`MessageBus`] subscribed to `JoinResponse`
//! only, and a background driver task that feeds responses and connection
//! losses into the [`LobbyState`] machine. The current state is published on
//! a watch channel for the UI layer; on success the driver also records the
//! assigned ids in the [`SessionStore`].
//!
//! A session is seated once. A controller mounted after that starts out
//! [`Joined`](LobbyState::Joined) and refuses further requests.
//!
//! # Example
//!
//! ```rust,ignore
//! let lobby = LobbyController::mount(&manager, session.clone());
//! lobby.join_game("D332")?;
//!
//! let mut state = lobby.watch();
//! while state.changed().await.is_ok() {
//!     match *state.borrow_and_update() {
//!         LobbyState::Joined(ids) => break,
//!         LobbyState::Idle { error: Some(e) } => eprintln!("{e}"),
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{MessageBus, Subscription};
use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::{CfhError, Result};
use crate::game_id::GameId;
use crate::lobby::{self, LobbyError, LobbyRequest, LobbyState};
use crate::protocol::{Envelope, ServerMessage, JOIN_RESPONSE};
use crate::session::{SessionAction, SessionStore};

/// The create/join room handshake for one lobby mount.
pub struct LobbyController {
    bus: MessageBus,
    session: SessionStore,
    state: Arc<watch::Sender<LobbyState>>,
    /// Generation of the link the pending request went out on.
    sent_on: Arc<AtomicU64>,
    driver: JoinHandle<()>,
}

impl LobbyController {
    /// Build a controller on `bus` and start its driver.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(bus: MessageBus, session: SessionStore) -> Self {
        let initial = session
            .snapshot()
            .ids
            .map_or_else(LobbyState::default, LobbyState::Joined);
        let (state_tx, _) = watch::channel(initial);
        let state = Arc::new(state_tx);
        let sent_on = Arc::new(AtomicU64::new(0));
        let responses = bus.subscribe(|envelope| envelope.is(JOIN_RESPONSE));
        let link = LinkWatch {
            states: bus.connection().watch_state(),
            manager: bus.connection().manager().clone(),
            sent_on: Arc::clone(&sent_on),
        };
        let driver = tokio::spawn(drive(responses, link, Arc::clone(&state), session.clone()));
        Self {
            bus,
            session,
            state,
            sent_on,
            driver,
        }
    }

    /// Take a connection reference from `manager` and build a controller on it.
    pub fn mount(manager: &ConnectionManager, session: SessionStore) -> Self {
        Self::new(MessageBus::mount(manager), session)
    }

    /// Ask the server for a new room.
    ///
    /// # Errors
    ///
    /// - [`CfhError::RequestPending`] if a request is awaiting its response
    /// - [`CfhError::AlreadyJoined`] once the session is seated in a room
    /// - [`CfhError::UsernameRequired`] until a username was set
    /// - [`CfhError::NotConnected`] if the connection is not open
    pub fn create_game(&self) -> Result<()> {
        self.submit(LobbyRequest::Create)
    }

    /// Ask to join the room typed as `input` (four hex digits).
    ///
    /// An invalid `input` leaves the controller idle with
    /// [`LobbyError::InvalidGameId`] and sends nothing.
    ///
    /// # Errors
    ///
    /// - [`CfhError::InvalidGameId`] if `input` is not four hex digits
    /// - any error [`create_game`](Self::create_game) may return
    pub fn join_game(&self, input: &str) -> Result<GameId> {
        self.ensure_seatable()?;
        let id = match input.parse::<GameId>() {
            Ok(id) => id,
            Err(e) => {
                debug!(input, "rejecting malformed room id");
                self.state
                    .send_replace(LobbyState::failed(LobbyError::InvalidGameId));
                return Err(e.into());
            }
        };
        self.submit(LobbyRequest::Join(id))?;
        Ok(id)
    }

    /// Live validation feedback for a partially typed room id.
    pub fn input_error(&self, input: &str) -> Option<LobbyError> {
        lobby::input_error(input)
    }

    /// Current handshake state.
    pub fn state(&self) -> LobbyState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch(&self) -> watch::Receiver<LobbyState> {
        self.state.subscribe()
    }

    /// The session this controller records ids into.
    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// Refuse while a request is pending or once the session has a room.
    ///
    /// Another mount may have seated the session after this one started, in
    /// which case the state catches up to `Joined`.
    fn ensure_seatable(&self) -> Result<()> {
        if let Some(ids) = self.session.snapshot().ids {
            self.state.send_if_modified(|state| {
                if state.is_idle() {
                    *state = LobbyState::Joined(ids);
                    return true;
                }
                false
            });
        }
        self.state.borrow().ensure_idle()
    }

    fn submit(&self, request: LobbyRequest) -> Result<()> {
        self.ensure_seatable()?;
        // The server ignores lobby requests from a nameless client.
        if self.session.snapshot().username.is_empty() {
            return Err(CfhError::UsernameRequired);
        }
        if !self.bus.is_open() {
            return Err(CfhError::NotConnected);
        }
        let Some(generation) = self.bus.connection().manager().link_generation() else {
            return Err(CfhError::NotConnected);
        };
        self.sent_on.store(generation, Ordering::SeqCst);

        let mut outcome = Ok(());
        self.state.send_if_modified(|state| match state.begin(request) {
            Ok(next) => {
                *state = next;
                true
            }
            Err(e) => {
                outcome = Err(e);
                false
            }
        });
        outcome?;

        if let Err(e) = self.bus.send_message(&request.to_message()) {
            self.state.send_replace(LobbyState::default());
            return Err(e);
        }
        debug!(?request, "lobby request submitted");
        Ok(())
    }
}

impl Drop for LobbyController {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

impl std::fmt::Debug for LobbyController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LobbyController")
            .field("state", &self.state())
            .field("bus", &self.bus)
            .finish()
    }
}

// ── Driver ──────────────────────────────────────────────────────────

/// What the driver needs to tell whether a pending request lost its link.
struct LinkWatch {
    states: watch::Receiver<ConnectionState>,
    manager: ConnectionManager,
    sent_on: Arc<AtomicU64>,
}

impl LinkWatch {
    /// `true` while the link the request went out on is still open.
    ///
    /// A watch keeps only the latest value, so a drop followed by a quick
    /// reconnect shows up as `Open` on a newer link.
    fn request_link_alive(&self, current: ConnectionState) -> bool {
        current == ConnectionState::Open
            && self.manager.link_generation() == Some(self.sent_on.load(Ordering::SeqCst))
    }
}

async fn drive(
    mut responses: Subscription,
    mut link: LinkWatch,
    state: Arc<watch::Sender<LobbyState>>,
    session: SessionStore,
) {
    loop {
        tokio::select! {
            envelope = responses.recv() => {
                let Some(envelope) = envelope else {
                    break;
                };
                on_envelope(&envelope, &state, &session);
            }

            changed = link.states.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *link.states.borrow_and_update();
                if !link.request_link_alive(current) {
                    state.send_if_modified(|lobby| match lobby.on_disconnect() {
                        Some(next) => {
                            warn!("connection lost while a lobby request was pending");
                            *lobby = next;
                            true
                        }
                        None => false,
                    });
                }
            }
        }
    }
    debug!("lobby driver exited");
}

fn on_envelope(envelope: &Envelope, state: &watch::Sender<LobbyState>, session: &SessionStore) {
    let response = match envelope.decode::<ServerMessage>() {
        Ok(ServerMessage::JoinResponse { response }) => response,
        Ok(other) => {
            debug!(?other, "lobby ignoring unrelated message");
            return;
        }
        Err(e) => {
            warn!("malformed JoinResponse ignored: {e}");
            return;
        }
    };

    let mut joined = None;
    let applied = state.send_if_modified(|lobby| match lobby.on_join_response(response) {
        Some(next) => {
            joined = next.joined();
            *lobby = next;
            true
        }
        None => false,
    });

    if !applied {
        debug!(?response, "JoinResponse with no pending request ignored");
        return;
    }
    match joined {
        Some(ids) => {
            info!(game_id = %ids.game_id, player_id = ids.player_id, "joined room");
            session.dispatch(SessionAction::SetIds(ids));
        }
        None => debug!(?response, "join attempt failed"),
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
    use crate::connection::ConnectionConfig;
    use crate::session::Ids;
    use crate::transport::{Connector, Transport};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Connector whose connection never completes, so the link stays put.
    struct StalledConnector;

    #[async_trait]
    impl Connector for StalledConnector {
        async fn connect(&self) -> Result<Box<dyn Transport>> {
            std::future::pending().await
        }
    }

    /// Run a driver for a pending request sent on link `sent_on`, feeding it
    /// connection states by hand.
    fn spawn_driver(
        sent_on: u64,
    ) -> (
        watch::Sender<ConnectionState>,
        watch::Receiver<LobbyState>,
        ConnectionManager,
        MessageBus,
    ) {
        let manager = ConnectionManager::new(StalledConnector, ConnectionConfig::default());
        let bus = MessageBus::mount(&manager);
        let (conn_tx, conn_rx) = watch::channel(ConnectionState::Open);
        let state = Arc::new(submitting_state());
        let lobby = state.subscribe();
        let link = LinkWatch {
            states: conn_rx,
            manager: manager.clone(),
            sent_on: Arc::new(AtomicU64::new(sent_on)),
        };
        tokio::spawn(drive(
            bus.subscribe(|e| e.is(JOIN_RESPONSE)),
            link,
            state,
            SessionStore::new(),
        ));
        (conn_tx, lobby, manager, bus)
    }

    fn submitting_state() -> watch::Sender<LobbyState> {
        let (tx, _) = watch::channel(LobbyState::Submitting {
            request: LobbyRequest::Create,
        });
        tx
    }

    fn envelope(json: &str) -> Envelope {
        Envelope::parse(json).unwrap()
    }

    #[test]
    fn accepted_response_records_ids() {
        let state = submitting_state();
        let session = SessionStore::new();
        on_envelope(
            &envelope(
                r#"{"msg":"JoinResponse","response":{"type":"Accepted","game_id":54066,"player_id":7}}"#,
            ),
            &state,
            &session,
        );
        let ids = Ids {
            game_id: GameId::new(0xD332),
            player_id: 7,
        };
        assert_eq!(*state.borrow(), LobbyState::Joined(ids));
        assert_eq!(session.snapshot().ids, Some(ids));
    }

    #[test]
    fn missing_response_field_means_not_found() {
        let state = submitting_state();
        let session = SessionStore::new();
        on_envelope(&envelope(r#"{"msg":"JoinResponse"}"#), &state, &session);
        assert_eq!(*state.borrow(), LobbyState::failed(LobbyError::NotFound));
        assert!(session.snapshot().ids.is_none());
    }

    #[test]
    fn legacy_accepted_name_is_understood() {
        let state = submitting_state();
        let session = SessionStore::new();
        on_envelope(
            &envelope(
                r#"{"msg":"JoinResponse","response":{"type":"JoinAsPlayer","game_id":1,"player_id":2}}"#,
            ),
            &state,
            &session,
        );
        assert!(state.borrow().joined().is_some());
    }

    #[test]
    fn malformed_response_leaves_state_alone() {
        let state = submitting_state();
        let session = SessionStore::new();
        on_envelope(
            &envelope(r#"{"msg":"JoinResponse","response":{"type":"Perhaps"}}"#),
            &state,
            &session,
        );
        assert!(state.borrow().is_submitting());
    }

    #[tokio::test]
    async fn reopened_link_fails_the_pending_request() {
        // The request went out on an earlier link than the current one.
        let (conn_tx, mut lobby, manager, _bus) = spawn_driver(0);
        assert_eq!(manager.link_generation(), Some(1));

        conn_tx.send_replace(ConnectionState::Open);
        let state = tokio::time::timeout(Duration::from_secs(2), lobby.wait_for(|s| s.is_idle()))
            .await
            .unwrap()
            .map(|s| *s)
            .unwrap();
        assert_eq!(state.error(), Some(LobbyError::ConnectionLost));
    }

    #[tokio::test]
    async fn same_link_keeps_the_request_pending() {
        let (conn_tx, lobby, manager, _bus) = spawn_driver(1);
        assert_eq!(manager.link_generation(), Some(1));

        conn_tx.send_replace(ConnectionState::Open);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(lobby.borrow().is_submitting());
    }

    #[tokio::test]
    async fn mount_on_a_seated_session_starts_joined() {
        let manager = ConnectionManager::new(StalledConnector, ConnectionConfig::default());
        let session = SessionStore::new();
        let ids = Ids {
            game_id: GameId::new(0xD332),
            player_id: 7,
        };
        session.dispatch(SessionAction::SetIds(ids));

        let lobby = LobbyController::mount(&manager, session);
        assert_eq!(lobby.state(), LobbyState::Joined(ids));
        assert!(matches!(lobby.create_game(), Err(CfhError::AlreadyJoined)));
        assert!(matches!(lobby.join_game("BEEF"), Err(CfhError::AlreadyJoined)));
    }

    #[tokio::test]
    async fn nameless_session_cannot_request_a_room() {
        let manager = ConnectionManager::new(StalledConnector, ConnectionConfig::default());
        let lobby = LobbyController::mount(&manager, SessionStore::new());
        assert!(matches!(lobby.create_game(), Err(CfhError::UsernameRequired)));
        assert!(matches!(lobby.join_game("D332"), Err(CfhError::UsernameRequired)));
        assert_eq!(lobby.state(), LobbyState::default());
    }

    #[test]
    fn response_without_pending_request_is_ignored() {
        let (state, _) = watch::channel(LobbyState::default());
        let session = SessionStore::new();
        on_envelope(
            &envelope(r#"{"msg":"JoinResponse","response":{"type":"Rejected"}}"#),
            &state,
            &session,
        );
        assert_eq!(*state.borrow(), LobbyState::default());
    }
}

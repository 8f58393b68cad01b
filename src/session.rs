//! The local player's identity.
//!
//! [`Session`] is changed only by [`reduce`], a pure function over
//! [`SessionAction`]s. [`SessionStore`] is the single owner that applies
//! actions and publishes each new session to its watchers.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::game_id::GameId;
use crate::protocol::PlayerId;

/// Room and seat assigned by a successful join or create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ids {
    pub game_id: GameId,
    pub player_id: PlayerId,
}

/// The local player's view of itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// Display name; empty until the player picks one.
    pub username: String,
    /// Set once, when a handshake succeeds.
    pub ids: Option<Ids>,
}

/// Changes a [`Session`] can undergo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    SetUsername(String),
    SetIds(Ids),
}

/// Apply `action` to `session`, returning the new session.
///
/// `SetIds` only takes effect while no ids are set; a session never moves
/// to another room.
pub fn reduce(session: &Session, action: SessionAction) -> Session {
    match action {
        SessionAction::SetUsername(username) => Session {
            username,
            ..session.clone()
        },
        SessionAction::SetIds(ids) => match session.ids {
            Some(current) => {
                warn!(?current, ?ids, "session ids already set, ignoring");
                session.clone()
            }
            None => Session {
                ids: Some(ids),
                ..session.clone()
            },
        },
    }
}

/// Owner of the current [`Session`].
///
/// Clones share the same session.
#[derive(Clone)]
pub struct SessionStore {
    tx: Arc<watch::Sender<Session>>,
}

impl SessionStore {
    /// A store holding an empty session.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Session::default());
        Self { tx: Arc::new(tx) }
    }

    /// Apply an action.
    pub fn dispatch(&self, action: SessionAction) {
        debug!(?action, "session action");
        self.tx.send_if_modified(|session| {
            let next = reduce(session, action);
            if next == *session {
                return false;
            }
            *session = next;
            true
        });
    }

    /// Copy of the current session.
    pub fn snapshot(&self) -> Session {
        self.tx.borrow().clone()
    }

    /// Receiver that observes every session change.
    pub fn watch(&self) -> watch::Receiver<Session> {
        self.tx.subscribe()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SessionStore").field(&*self.tx.borrow()).finish()
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

    fn ids(game: u16, player: PlayerId) -> Ids {
        Ids {
            game_id: GameId::new(game),
            player_id: player,
        }
    }

    #[test]
    fn new_session_is_empty() {
        let session = Session::default();
        assert!(session.username.is_empty());
        assert!(session.ids.is_none());
    }

    #[test]
    fn set_username_keeps_ids() {
        let session = Session {
            username: "old".into(),
            ids: Some(ids(1, 2)),
        };
        let next = reduce(&session, SessionAction::SetUsername("new".into()));
        assert_eq!(next.username, "new");
        assert_eq!(next.ids, Some(ids(1, 2)));
        // The input is untouched.
        assert_eq!(session.username, "old");
    }

    #[test]
    fn set_ids_applies_once() {
        let session = reduce(&Session::default(), SessionAction::SetIds(ids(0xD332, 7)));
        assert_eq!(session.ids, Some(ids(0xD332, 7)));

        let again = reduce(&session, SessionAction::SetIds(ids(1, 1)));
        assert_eq!(again.ids, Some(ids(0xD332, 7)));
    }

    #[tokio::test]
    async fn store_publishes_changes() {
        let store = SessionStore::new();
        let mut rx = store.watch();

        store.dispatch(SessionAction::SetUsername("alice".into()));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().username, "alice");

        store.dispatch(SessionAction::SetIds(ids(3, 4)));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().ids, Some(ids(3, 4)));
    }

    #[tokio::test]
    async fn ignored_action_does_not_notify() {
        let store = SessionStore::new();
        store.dispatch(SessionAction::SetIds(ids(3, 4)));
        let rx = store.watch();
        store.dispatch(SessionAction::SetIds(ids(5, 6)));
        assert!(!rx.has_changed().unwrap());
        assert_eq!(store.snapshot().ids, Some(ids(3, 4)));
    }

    #[test]
    fn clones_share_state() {
        let store = SessionStore::new();
        let other = store.clone();
        other.dispatch(SessionAction::SetUsername("bob".into()));
        assert_eq!(store.snapshot().username, "bob");
    }
}

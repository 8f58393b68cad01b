//! The create/join handshake as a pure state machine.
//!
//! ```text
//!            begin(Create | Join(id))
//!    Idle ───────────────────────────▶ Submitting
//!     ▲                                  │
//!     │  response: null      → NotFound  │
//!     ├──────────────────────────────────┤
//!     │  response: Rejected  → Full      │
//!     ├──────────────────────────────────┤
//!     │  connection lost → ConnectionLost│
//!     └──────────────────────────────────┤
//!                                        │ response: Accepted(g, p)
//!                                        ▼
//!                                  Joined(Ids)
//! ```
//!
//! Every transition is a method returning the next state; nothing here
//! touches the network. [`LobbyController`](crate::controller::LobbyController)
//! drives it.

use std::fmt;

use crate::error::{CfhError, Result};
use crate::game_id::{self, GameId};
use crate::protocol::{ClientMessage, JoinReply};
use crate::session::Ids;

/// Problems shown next to the lobby form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyError {
    /// The typed room id is not four hex digits.
    InvalidGameId,
    /// No room has the requested id.
    NotFound,
    /// The room exists but has no free seat.
    Full,
    /// The connection dropped before the server answered.
    ConnectionLost,
}

impl LobbyError {
    /// Human-readable explanation for the player.
    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidGameId => "room id must be four hex characters",
            Self::NotFound => "room not found",
            Self::Full => "room is full",
            Self::ConnectionLost => "connection to the server was lost",
        }
    }
}

impl fmt::Display for LobbyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// What the player asked the server for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyRequest {
    Create,
    Join(GameId),
}

impl LobbyRequest {
    /// The envelope that carries this request.
    pub fn to_message(self) -> ClientMessage {
        match self {
            Self::Create => ClientMessage::CreateGame,
            Self::Join(id) => ClientMessage::JoinGame { id },
        }
    }
}

/// Where the handshake stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyState {
    /// Waiting for the player, possibly showing why the last attempt failed.
    Idle { error: Option<LobbyError> },
    /// A request was sent and its `JoinResponse` has not arrived.
    Submitting { request: LobbyRequest },
    /// Seated in a room.
    Joined(Ids),
}

impl Default for LobbyState {
    fn default() -> Self {
        Self::Idle { error: None }
    }
}

impl LobbyState {
    /// An idle state carrying `error`.
    pub fn failed(error: LobbyError) -> Self {
        Self::Idle { error: Some(error) }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle { .. })
    }

    pub fn is_submitting(&self) -> bool {
        matches!(self, Self::Submitting { .. })
    }

    /// The assigned ids, once joined.
    pub fn joined(&self) -> Option<Ids> {
        match self {
            Self::Joined(ids) => Some(*ids),
            _ => None,
        }
    }

    /// The error shown in the idle state, if any.
    pub fn error(&self) -> Option<LobbyError> {
        match self {
            Self::Idle { error } => *error,
            _ => None,
        }
    }

    /// Check that a new request may start from this state.
    ///
    /// # Errors
    ///
    /// [`CfhError::RequestPending`] while submitting, [`CfhError::AlreadyJoined`]
    /// once joined.
    pub fn ensure_idle(&self) -> Result<()> {
        match self {
            Self::Idle { .. } => Ok(()),
            Self::Submitting { .. } => Err(CfhError::RequestPending),
            Self::Joined(_) => Err(CfhError::AlreadyJoined),
        }
    }

    /// Start `request`, clearing any previous error.
    ///
    /// # Errors
    ///
    /// See [`ensure_idle`](Self::ensure_idle).
    pub fn begin(&self, request: LobbyRequest) -> Result<Self> {
        self.ensure_idle()?;
        Ok(Self::Submitting { request })
    }

    /// Apply the server's `JoinResponse`.
    ///
    /// Returns `None` when no request is pending, in which case the response
    /// is stale and the state stays as it is.
    pub fn on_join_response(&self, response: Option<JoinReply>) -> Option<Self> {
        if !self.is_submitting() {
            return None;
        }
        Some(match response {
            None => Self::failed(LobbyError::NotFound),
            Some(JoinReply::Rejected) => Self::failed(LobbyError::Full),
            Some(JoinReply::Accepted { game_id, player_id }) => {
                Self::Joined(Ids { game_id, player_id })
            }
        })
    }

    /// Apply a connection loss. Only a pending request is affected.
    pub fn on_disconnect(&self) -> Option<Self> {
        self.is_submitting()
            .then(|| Self::failed(LobbyError::ConnectionLost))
    }
}

/// Validate a room id typed into the join field.
///
/// # Errors
///
/// [`LobbyError::InvalidGameId`] unless `display` is four hex digits.
pub fn parse_room_input(display: &str) -> std::result::Result<GameId, LobbyError> {
    game_id::decode(display)
        .map(GameId::new)
        .map_err(|_| LobbyError::InvalidGameId)
}

/// Live validation feedback for the join field.
///
/// An empty field is not an error: the player has not typed anything yet.
pub fn input_error(display: &str) -> Option<LobbyError> {
    if display.is_empty() {
        return None;
    }
    parse_room_input(display).err()
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

    fn submitting() -> LobbyState {
        LobbyState::default().begin(LobbyRequest::Create).unwrap()
    }

    #[test]
    fn idle_accepts_both_requests() {
        let idle = LobbyState::default();
        assert_eq!(
            idle.begin(LobbyRequest::Create).unwrap(),
            LobbyState::Submitting {
                request: LobbyRequest::Create
            }
        );
        let id = GameId::new(0xD332);
        assert_eq!(
            idle.begin(LobbyRequest::Join(id)).unwrap(),
            LobbyState::Submitting {
                request: LobbyRequest::Join(id)
            }
        );
    }

    #[test]
    fn begin_clears_previous_error() {
        let failed = LobbyState::failed(LobbyError::Full);
        let next = failed.begin(LobbyRequest::Create).unwrap();
        assert_eq!(next.error(), None);
        assert!(next.is_submitting());
    }

    #[test]
    fn second_request_while_pending_is_refused() {
        let err = submitting().begin(LobbyRequest::Create).unwrap_err();
        assert!(matches!(err, CfhError::RequestPending));
    }

    #[test]
    fn joined_refuses_new_requests() {
        let joined = submitting()
            .on_join_response(Some(JoinReply::Accepted {
                game_id: GameId::new(1),
                player_id: 2,
            }))
            .unwrap();
        assert!(matches!(
            joined.begin(LobbyRequest::Create),
            Err(CfhError::AlreadyJoined)
        ));
    }

    #[test]
    fn responses_map_to_outcomes() {
        assert_eq!(
            submitting().on_join_response(None),
            Some(LobbyState::failed(LobbyError::NotFound))
        );
        assert_eq!(
            submitting().on_join_response(Some(JoinReply::Rejected)),
            Some(LobbyState::failed(LobbyError::Full))
        );
        let joined = submitting()
            .on_join_response(Some(JoinReply::Accepted {
                game_id: GameId::new(0xD332),
                player_id: 7,
            }))
            .unwrap();
        assert_eq!(
            joined.joined(),
            Some(Ids {
                game_id: GameId::new(0xD332),
                player_id: 7
            })
        );
    }

    #[test]
    fn stale_response_is_ignored() {
        assert_eq!(LobbyState::default().on_join_response(None), None);
        let joined = LobbyState::Joined(Ids {
            game_id: GameId::new(1),
            player_id: 1,
        });
        assert_eq!(joined.on_join_response(Some(JoinReply::Rejected)), None);
    }

    #[test]
    fn disconnect_only_affects_pending_request() {
        assert_eq!(
            submitting().on_disconnect(),
            Some(LobbyState::failed(LobbyError::ConnectionLost))
        );
        assert_eq!(LobbyState::default().on_disconnect(), None);
    }

    #[test]
    fn error_descriptions() {
        assert_eq!(
            LobbyError::InvalidGameId.to_string(),
            "room id must be four hex characters"
        );
        assert_eq!(LobbyError::NotFound.to_string(), "room not found");
        assert_eq!(LobbyError::Full.to_string(), "room is full");
    }

    #[test]
    fn input_validation() {
        assert_eq!(input_error(""), None);
        assert_eq!(input_error("D332"), None);
        assert_eq!(input_error("D33"), Some(LobbyError::InvalidGameId));
        assert_eq!(input_error("ZZZZ"), Some(LobbyError::InvalidGameId));
        assert_eq!(parse_room_input("d332"), Ok(GameId::new(0xD332)));
    }

    #[test]
    fn requests_map_to_messages() {
        assert_eq!(LobbyRequest::Create.to_message(), ClientMessage::CreateGame);
        assert_eq!(
            LobbyRequest::Join(GameId::new(9)).to_message(),
            ClientMessage::JoinGame {
                id: GameId::new(9)
            }
        );
    }
}

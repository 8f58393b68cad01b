//! Wire types for the CFH lobby protocol.
//!
//! Every frame is a JSON object carrying a string discriminator under `msg`
//! with the message fields flat alongside it:
//!
//! ```json
//! {"msg": "JoinGame", "id": 54066}
//! {"msg": "JoinResponse", "response": {"type": "Accepted", "game_id": 54066, "player_id": 7}}
//! ```
//!
//! [`Envelope`] is the untyped view every subscriber sees. [`ClientMessage`]
//! and [`ServerMessage`] are the typed views of the kinds this crate sends
//! and consumes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::game_id::GameId;

/// Name of the discriminator field.
pub const DISCRIMINATOR: &str = "msg";

/// Discriminator of the server's answer to `CreateGame` / `JoinGame`.
pub const JOIN_RESPONSE: &str = "JoinResponse";

/// Identifier the server assigns to a player inside one game.
pub type PlayerId = u32;

// ── Envelope ────────────────────────────────────────────────────────

/// One parsed frame: a string discriminator plus its flat fields.
///
/// Anything that is not a JSON object with a string `msg` is not an
/// envelope; [`Envelope::parse`] returns `None` for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message discriminator.
    pub msg: String,
    /// Remaining message-specific fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Envelope {
    /// Build an envelope from a discriminator and a field map.
    pub fn new(msg: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            msg: msg.into(),
            fields,
        }
    }

    /// Parse a raw text frame, returning `None` if it is not an envelope.
    pub fn parse(frame: &str) -> Option<Self> {
        serde_json::from_str(frame).ok()
    }

    /// Returns `true` if the discriminator equals `msg`.
    pub fn is(&self, msg: &str) -> bool {
        self.msg == msg
    }

    /// Look up a payload field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Decode the envelope into a typed message.
    ///
    /// # Errors
    ///
    /// Returns [`CfhError::Serialization`](crate::CfhError::Serialization) if
    /// the fields do not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let value = serde_json::to_value(self)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Serialize the envelope as a single text frame.
    ///
    /// # Errors
    ///
    /// Returns [`CfhError::Serialization`](crate::CfhError::Serialization) if
    /// serialization fails.
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ── Payload types ───────────────────────────────────────────────────

/// Outcome carried by a `JoinResponse` when the room exists.
///
/// A missing or `null` `response` (room not found) is modelled as
/// `Option::None` around this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JoinReply {
    /// The player was seated in the room.
    #[serde(alias = "JoinAsPlayer")]
    Accepted {
        game_id: GameId,
        player_id: PlayerId,
    },
    /// The room exists but has no free seat.
    Rejected,
}

/// A player entry in a roster update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: PlayerId,
    pub name: String,
    pub points: u32,
}

// ── Messages ────────────────────────────────────────────────────────

/// Message kinds sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "msg")]
pub enum ClientMessage {
    /// Announce the local player's display name.
    SetUsername { username: String },
    /// Create a new room and join it.
    CreateGame,
    /// Join the room with the given id.
    JoinGame { id: GameId },
}

impl ClientMessage {
    /// The discriminator this message is sent under.
    pub fn discriminator(&self) -> &'static str {
        match self {
            Self::SetUsername { .. } => "SetUsername",
            Self::CreateGame => "CreateGame",
            Self::JoinGame { .. } => "JoinGame",
        }
    }
}

/// Message kinds sent from server to client that this crate understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "msg")]
pub enum ServerMessage {
    /// Answer to the most recent `CreateGame` / `JoinGame`.
    JoinResponse {
        #[serde(default)]
        response: Option<JoinReply>,
    },
    /// Roster of the joined room changed.
    PlayerListUpdate {
        host: PlayerId,
        players: Vec<PlayerInfo>,
    },
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
    use serde_json::json;

    #[test]
    fn parse_keeps_fields_flat() {
        let env = Envelope::parse(r#"{"msg":"JoinGame","id":54066}"#).unwrap();
        assert!(env.is("JoinGame"));
        assert_eq!(env.field("id"), Some(&json!(54066)));
        assert_eq!(env.fields.len(), 1);
    }

    #[test]
    fn parse_rejects_non_envelopes() {
        for frame in [
            "not json",
            "",
            "[1,2,3]",
            "\"JoinResponse\"",
            r#"{"response":null}"#,
            r#"{"msg":5}"#,
            r#"{"msg":null}"#,
            r#"{"msg":{"nested":true}}"#,
        ] {
            assert!(Envelope::parse(frame).is_none(), "frame {frame:?}");
        }
    }

    #[test]
    fn envelope_serializes_msg_alongside_fields() {
        let mut fields = Map::new();
        fields.insert("username".into(), json!("alice"));
        let env = Envelope::new("SetUsername", fields);
        let value: Value = serde_json::from_str(&env.to_frame().unwrap()).unwrap();
        assert_eq!(value, json!({"msg": "SetUsername", "username": "alice"}));
    }

    #[test]
    fn decode_typed_join_response() {
        let env = Envelope::parse(
            r#"{"msg":"JoinResponse","response":{"type":"Accepted","game_id":54066,"player_id":7}}"#,
        )
        .unwrap();
        let msg: ServerMessage = env.decode().unwrap();
        assert_eq!(
            msg,
            ServerMessage::JoinResponse {
                response: Some(JoinReply::Accepted {
                    game_id: GameId::new(0xD332),
                    player_id: 7,
                }),
            }
        );
    }

    #[test]
    fn decode_fails_for_mismatched_fields() {
        let env = Envelope::parse(r#"{"msg":"JoinResponse","response":{"type":"Maybe"}}"#).unwrap();
        assert!(env.decode::<ServerMessage>().is_err());
    }

    #[test]
    fn client_message_discriminators_match_wire() {
        for msg in [
            ClientMessage::SetUsername {
                username: "bob".into(),
            },
            ClientMessage::CreateGame,
            ClientMessage::JoinGame {
                id: GameId::new(1),
            },
        ] {
            let value = serde_json::to_value(&msg).unwrap();
            assert_eq!(value[DISCRIMINATOR], json!(msg.discriminator()));
        }
    }
}

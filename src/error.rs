//! Error types for the CFH client.

use thiserror::Error;

use crate::game_id::GameIdError;

/// Errors that can occur when using the CFH client.
#[derive(Debug, Error)]
pub enum CfhError {
    /// Failed to send a frame through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires an open connection.
    #[error("not connected to server")]
    NotConnected,

    /// A display room identifier did not decode.
    #[error(transparent)]
    InvalidGameId(#[from] GameIdError),

    /// An outbound payload was not a JSON object.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// A create/join request is already awaiting its `JoinResponse`.
    #[error("a lobby request is already pending")]
    RequestPending,

    /// The session already joined a room.
    #[error("already joined a room")]
    AlreadyJoined,

    /// A username was empty or whitespace only.
    #[error("username must not be empty")]
    EmptyUsername,

    /// Lobby requests need a username first; the server ignores them otherwise.
    #[error("set a username before creating or joining a room")]
    UsernameRequired,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for CFH client operations.
pub type Result<T> = std::result::Result<T, CfhError>;

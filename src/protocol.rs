use crate::error::{ShuffleError, StoreError};
use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Room document as sent to watchers. The host's identity stays on the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub phase: RoomPhase,
    pub winner_id: Option<ParticipantId>,
    pub created_at: DateTime<Utc>,
}

impl From<RoomDoc> for RoomView {
    fn from(doc: RoomDoc) -> Self {
        Self {
            phase: doc.phase,
            winner_id: doc.winner_id,
            created_at: doc.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Stream `room`/`players` snapshots for a room until it closes
    Watch {
        code: RoomCode,
    },
    Unwatch {
        code: RoomCode,
    },
    // Player messages
    JoinRoom {
        code: RoomCode,
        name: String,
    },
    LeaveRoom {
        code: RoomCode,
    },
    UploadPhoto {
        code: RoomCode,
        photo: Option<String>,
    },
    // Host-only messages
    CreateRoom,
    CloseRoom {
        code: RoomCode,
    },
    PublishPhase {
        code: RoomCode,
        phase: RoomPhase,
        winner_id: Option<ParticipantId>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        protocol: String,
        role: Role,
        id: ParticipantId,
        /// Secret for reconnecting as `id`; only ever sent to its owner
        token: String,
        server_now: String,
    },
    RoomCreated {
        code: RoomCode,
    },
    Joined {
        code: RoomCode,
        id: ParticipantId,
    },
    Left {
        code: RoomCode,
    },
    Published {
        code: RoomCode,
        phase: RoomPhase,
    },
    Room {
        code: RoomCode,
        room: RoomView,
    },
    Players {
        code: RoomCode,
        players: Vec<PlayerRecord>,
    },
    /// Terminal: the room document is gone
    RoomClosed {
        code: RoomCode,
    },
    Error {
        code: String,
        msg: String,
    },
}

impl ServerMessage {
    pub fn error(code: &str, msg: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.to_string(),
            msg: msg.into(),
        }
    }
}

/// Stable machine-readable code for an error
pub fn error_code(err: &ShuffleError) -> &'static str {
    match err {
        ShuffleError::NotEnoughPlayers { .. } => "NOT_ENOUGH_PLAYERS",
        ShuffleError::AlreadySpinning => "ALREADY_SPINNING",
        ShuffleError::NotSpinning => "NOT_SPINNING",
        ShuffleError::InvalidTransition { .. } => "INVALID_TRANSITION",
        ShuffleError::NoLandingTarget { .. } => "NO_LANDING_TARGET",
        ShuffleError::EmptyName => "EMPTY_NAME",
        ShuffleError::RoomClosed => "ROOM_CLOSED",
        ShuffleError::SessionEnded => "SESSION_ENDED",
        ShuffleError::Store(StoreError::RoomNotFound(_)) => "ROOM_NOT_FOUND",
        ShuffleError::Store(StoreError::RoomExists(_)) => "ROOM_EXISTS",
        ShuffleError::Store(StoreError::PlayerNotFound(_)) => "PLAYER_NOT_FOUND",
        ShuffleError::Store(StoreError::Disconnected) => "STORE_UNAVAILABLE",
        ShuffleError::Store(StoreError::WriteFailed(_)) => "WRITE_FAILED",
    }
}

impl From<ShuffleError> for ServerMessage {
    fn from(err: ShuffleError) -> Self {
        ServerMessage::error(error_code(&err), err.to_string())
    }
}

impl From<StoreError> for ServerMessage {
    fn from(err: StoreError) -> Self {
        ShuffleError::from(err).into()
    }
}

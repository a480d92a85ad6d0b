use crate::types::{ParticipantId, RoomCode, RoomPhase};

/// Result type for shared room store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by the shared room store
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Room {0} not found")]
    RoomNotFound(RoomCode),

    #[error("Room {0} already exists")]
    RoomExists(RoomCode),

    #[error("Player {0} not found")]
    PlayerNotFound(ParticipantId),

    #[error("Store connection lost")]
    Disconnected,

    #[error("Write failed: {0}")]
    WriteFailed(String),
}

/// Errors surfaced by the shuffle engine and session layer
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ShuffleError {
    #[error("Need at least 2 players to shuffle (have {count})")]
    NotEnoughPlayers { count: usize },

    #[error("A shuffle is already in progress")]
    AlreadySpinning,

    #[error("No shuffle is in progress")]
    NotSpinning,

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidTransition { from: RoomPhase, to: RoomPhase },

    #[error("No landing target ahead of offset {offset}")]
    NoLandingTarget { offset: f64 },

    #[error("Display name must not be empty")]
    EmptyName,

    #[error("Room is closed")]
    RoomClosed,

    #[error("Session has ended")]
    SessionEnded,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the local camera collaborator
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CaptureError {
    #[error("Camera unavailable: {0}")]
    Unavailable(String),

    #[error("Frame encoding failed: {0}")]
    Encode(String),
}

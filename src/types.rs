use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque ID types for type safety
pub type ParticipantId = String;
pub type RoomCode = String;

/// Allocate a fresh participant identity.
///
/// Identity bootstrap normally happens outside this crate; this is what the
/// relay and tests use when nobody hands us one.
pub fn new_participant_id() -> ParticipantId {
    ulid::Ulid::new().to_string()
}

/// Shared room phase. The host is the only writer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RoomPhase {
    Waiting,
    Spinning,
    Finished,
}

impl std::fmt::Display for RoomPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RoomPhase::Waiting => "waiting",
            RoomPhase::Spinning => "spinning",
            RoomPhase::Finished => "finished",
        };
        f.write_str(s)
    }
}

/// The `Room` document as held by the shared room store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomDoc {
    pub host_id: ParticipantId,
    pub phase: RoomPhase,
    pub winner_id: Option<ParticipantId>,
    pub created_at: DateTime<Utc>,
}

impl RoomDoc {
    pub fn new(host_id: ParticipantId) -> Self {
        Self {
            host_id,
            phase: RoomPhase::Waiting,
            winner_id: None,
            created_at: Utc::now(),
        }
    }

    /// The phase/outcome pair carried by this document
    pub fn outcome(&self) -> RoomUpdate {
        RoomUpdate {
            phase: self.phase,
            winner_id: self.winner_id.clone(),
        }
    }
}

/// One atomic write of the phase/outcome fields of a room document.
///
/// Both fields always travel together so no reader can observe a phase
/// paired with the previous round's winner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomUpdate {
    pub phase: RoomPhase,
    pub winner_id: Option<ParticipantId>,
}

impl RoomUpdate {
    pub fn waiting() -> Self {
        Self {
            phase: RoomPhase::Waiting,
            winner_id: None,
        }
    }

    pub fn spinning() -> Self {
        Self {
            phase: RoomPhase::Spinning,
            winner_id: None,
        }
    }

    pub fn finished(winner_id: ParticipantId) -> Self {
        Self {
            phase: RoomPhase::Finished,
            winner_id: Some(winner_id),
        }
    }
}

/// A `Player` document as written by its owning participant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerDoc {
    pub name: String,
    /// Opaque encoded image payload, replaced wholesale on every upload
    pub photo: Option<String>,
}

/// A player document as delivered by store subscriptions, with the
/// store-assigned fields filled in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub id: ParticipantId,
    pub name: String,
    pub photo: Option<String>,
    /// Monotonic arrival key assigned by the store on join
    pub joined_at: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Player,
}

//! Live participant roster, mirrored from the store's player collection.
//!
//! Order is arrival order. A new arrival is always appended, so the index of
//! every participant already present is stable across joins.

use crate::types::{ParticipantId, PlayerRecord};

#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub photo: Option<String>,
    pub joined_at: u64,
}

impl From<&PlayerRecord> for Participant {
    fn from(r: &PlayerRecord) -> Self {
        Self {
            id: r.id.clone(),
            name: r.name.clone(),
            photo: r.photo.clone(),
            joined_at: r.joined_at,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Roster {
    participants: Vec<Participant>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Participant> {
        self.participants.get(index)
    }

    pub fn find(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// Record a join. A participant already present is updated in place.
    pub fn join(&mut self, participant: Participant) {
        if let Some(existing) = self.participants.iter_mut().find(|p| p.id == participant.id) {
            existing.name = participant.name;
            existing.photo = participant.photo;
            return;
        }
        tracing::debug!("Roster join: {} ({})", participant.name, participant.id);
        self.participants.push(participant);
    }

    /// Replace a participant's photo wholesale. Returns false for unknown ids.
    pub fn set_photo(&mut self, id: &str, photo: Option<String>) -> bool {
        match self.participants.iter_mut().find(|p| p.id == id) {
            Some(p) => {
                p.photo = photo;
                true
            }
            None => false,
        }
    }

    pub fn leave(&mut self, id: &str) -> Option<Participant> {
        let pos = self.participants.iter().position(|p| p.id == id)?;
        let removed = self.participants.remove(pos);
        tracing::debug!("Roster leave: {} ({})", removed.name, removed.id);
        Some(removed)
    }

    /// Bring the roster in line with a full collection snapshot from the store.
    ///
    /// Known participants keep their position, departures are removed, and
    /// arrivals are appended in `joined_at` order.
    pub fn sync(&mut self, records: &[PlayerRecord]) {
        self.participants
            .retain(|p| records.iter().any(|r| r.id == p.id));

        for p in &mut self.participants {
            if let Some(r) = records.iter().find(|r| r.id == p.id) {
                p.name = r.name.clone();
                p.photo = r.photo.clone();
            }
        }

        let mut arrivals: Vec<&PlayerRecord> = records
            .iter()
            .filter(|r| self.find(&r.id).is_none())
            .collect();
        arrivals.sort_by_key(|r| r.joined_at);
        for r in arrivals {
            self.join(Participant::from(r));
        }
    }

    /// Freeze the current roster as the selection pool for one spin
    pub fn snapshot(&self) -> Vec<Participant> {
        self.participants.clone()
    }
}

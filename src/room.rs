//! Room phase state machine.
//!
//! `Waiting -> Spinning -> Finished`, and `Finished -> Spinning` for the next
//! round. Every transition produces the complete [`RoomUpdate`] to publish.

use crate::error::ShuffleError;
use crate::types::{ParticipantId, RoomPhase, RoomUpdate};

/// Minimum roster size for a shuffle
pub const MIN_PLAYERS: usize = 2;

/// Check if a phase transition is valid
pub fn is_valid_transition(from: RoomPhase, to: RoomPhase) -> bool {
    use RoomPhase::*;

    matches!(
        (from, to),
        (Waiting, Spinning) | (Spinning, Finished) | (Finished, Spinning)
    )
}

/// Validate a complete phase/outcome write against the current phase.
///
/// `Spinning` must clear the winner and `Finished` must name one.
pub fn validate_update(from: RoomPhase, update: &RoomUpdate) -> Result<(), ShuffleError> {
    if !is_valid_transition(from, update.phase) {
        return Err(ShuffleError::InvalidTransition {
            from,
            to: update.phase,
        });
    }
    let well_formed = match update.phase {
        RoomPhase::Spinning | RoomPhase::Waiting => update.winner_id.is_none(),
        RoomPhase::Finished => update.winner_id.is_some(),
    };
    if !well_formed {
        return Err(ShuffleError::InvalidTransition {
            from,
            to: update.phase,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMachine {
    phase: RoomPhase,
    winner_id: Option<ParticipantId>,
}

impl Default for RoomMachine {
    fn default() -> Self {
        Self {
            phase: RoomPhase::Waiting,
            winner_id: None,
        }
    }
}

impl RoomMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> RoomPhase {
        self.phase
    }

    pub fn winner_id(&self) -> Option<&ParticipantId> {
        self.winner_id.as_ref()
    }

    pub fn current(&self) -> RoomUpdate {
        RoomUpdate {
            phase: self.phase,
            winner_id: self.winner_id.clone(),
        }
    }

    /// Start a shuffle. Fails without touching state when the roster is too
    /// small or a shuffle is already running.
    pub fn begin_spin(&mut self, roster_size: usize) -> Result<RoomUpdate, ShuffleError> {
        if self.phase == RoomPhase::Spinning {
            return Err(ShuffleError::AlreadySpinning);
        }
        if roster_size < MIN_PLAYERS {
            return Err(ShuffleError::NotEnoughPlayers { count: roster_size });
        }
        let update = RoomUpdate::spinning();
        validate_update(self.phase, &update)?;

        self.phase = RoomPhase::Spinning;
        self.winner_id = None;
        Ok(update)
    }

    /// Resolve the running shuffle
    pub fn finish(&mut self, winner_id: ParticipantId) -> Result<RoomUpdate, ShuffleError> {
        if self.phase != RoomPhase::Spinning {
            return Err(ShuffleError::NotSpinning);
        }
        let update = RoomUpdate::finished(winner_id);
        validate_update(self.phase, &update)?;

        self.phase = update.phase;
        self.winner_id = update.winner_id.clone();
        Ok(update)
    }

    /// Overwrite local state with a confirmed document (reconciliation/rollback)
    pub fn restore(&mut self, update: &RoomUpdate) {
        self.phase = update.phase;
        self.winner_id = match update.phase {
            RoomPhase::Finished => update.winner_id.clone(),
            _ => None,
        };
    }
}

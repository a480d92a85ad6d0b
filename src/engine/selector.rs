//! Winner selection and terminal offset computation.
//!
//! The index draw and the offset computation are separate steps: the offset
//! is a pure function of the drawn index, so nothing downstream can influence
//! which participant wins.

use rand::Rng;

use super::strip;
use crate::config::{SpinTiming, StripGeometry};
use crate::error::ShuffleError;

/// What triggered the stop. Only affects how far the strip keeps travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopPolicy {
    /// The randomized spin timer expired
    Natural,
    /// The host pressed stop
    Forced,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection {
    pub winner_index: usize,
    pub target_offset: f64,
}

/// Compute the offset at which `winner_index` lands under the indicator.
///
/// Starts from the winner's first alignment point strictly ahead of
/// `current_offset`, then adds `extra_cycles` plus `overshoot_cycles` full
/// strip widths of run-out for the deceleration. The cycle count is computed
/// in closed form, so far-out offsets cost the same as small ones. Degenerate
/// geometry yields a non-finite result, which [`WinnerSelector`] rejects.
pub fn target_offset(
    geometry: &StripGeometry,
    roster_size: usize,
    winner_index: usize,
    current_offset: f64,
    extra_cycles: u32,
    overshoot_cycles: u32,
) -> f64 {
    let total = geometry.total_width(roster_size);
    let aligned = strip::aligned_offset(geometry, winner_index);

    let ahead = ((current_offset - aligned) / total).floor() + 1.0;
    let cycles = ahead + extra_cycles as f64 + overshoot_cycles as f64;
    aligned + cycles * total
}

pub struct WinnerSelector<R> {
    rng: R,
    geometry: StripGeometry,
    timing: SpinTiming,
}

impl<R: Rng> WinnerSelector<R> {
    pub fn new(rng: R, geometry: StripGeometry, timing: SpinTiming) -> Self {
        Self {
            rng,
            geometry,
            timing,
        }
    }

    /// Draw a winner uniformly from `[0, roster_size)` and compute where the
    /// strip has to stop for it.
    pub fn select_winner(
        &mut self,
        roster_size: usize,
        current_offset: f64,
        policy: StopPolicy,
    ) -> Result<Selection, ShuffleError> {
        if roster_size < 2 {
            return Err(ShuffleError::NotEnoughPlayers { count: roster_size });
        }

        // The offset must resolve individual cards, or no target can align
        let item = self.geometry.item_width();
        if !current_offset.is_finite() || current_offset.abs() * f64::EPSILON >= item / 2.0 {
            return Err(ShuffleError::NoLandingTarget {
                offset: current_offset,
            });
        }

        let winner_index = self.rng.random_range(0..roster_size);

        let extra_cycles = match policy {
            StopPolicy::Natural => self.timing.natural_extra_cycles,
            StopPolicy::Forced => self.timing.forced_extra_cycles,
        };
        let target_offset = target_offset(
            &self.geometry,
            roster_size,
            winner_index,
            current_offset,
            extra_cycles,
            self.timing.overshoot_cycles,
        );

        if !target_offset.is_finite() || target_offset <= current_offset {
            tracing::error!(
                "No usable landing target from offset {} (got {})",
                current_offset,
                target_offset
            );
            return Err(ShuffleError::NoLandingTarget {
                offset: current_offset,
            });
        }

        tracing::debug!(
            "Selected winner index {} of {} ({:?}), target offset {:.1} from {:.1}",
            winner_index,
            roster_size,
            policy,
            target_offset,
            current_offset
        );

        Ok(Selection {
            winner_index,
            target_offset,
        })
    }

    /// Draw a natural-stop spin duration from the configured range
    pub fn spin_duration(&mut self) -> std::time::Duration {
        let (min, max) = (self.timing.min_spin, self.timing.max_spin);
        if max <= min {
            return min;
        }
        self.rng.random_range(min..=max)
    }
}

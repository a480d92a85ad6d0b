//! Per-renderer spin simulation.
//!
//! Each renderer owns exactly one [`PhysicsEngine`]. Other components never
//! touch its state directly; they push a [`Command`] and the owning loop
//! applies it at the start of the next [`PhysicsEngine::tick`].

use std::collections::VecDeque;

use crate::config::PhysicsParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinPhase {
    Idle,
    Accelerating,
    Decelerating,
}

/// Continuous simulation state. Never persisted or shared across devices.
#[derive(Debug, Clone, PartialEq)]
pub struct SpinState {
    pub offset: f64,
    pub velocity: f64,
    pub phase: SpinPhase,
    pub target_offset: Option<f64>,
    pub winner_index: Option<usize>,
}

impl Default for SpinState {
    fn default() -> Self {
        Self {
            offset: 0.0,
            velocity: 0.0,
            phase: SpinPhase::Idle,
            target_offset: None,
            winner_index: None,
        }
    }
}

/// Control messages accepted by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Accelerate without a known target
    Spin,
    /// Settle onto `target`, then report `winner_index` as landed
    DecelerateTo { target: f64, winner_index: usize },
    /// Let the strip drift to rest
    Idle,
}

/// Emitted once when deceleration converges on the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Landed {
    pub winner_index: usize,
}

#[derive(Debug, Clone)]
pub struct PhysicsEngine {
    params: PhysicsParams,
    state: SpinState,
    commands: VecDeque<Command>,
}

impl PhysicsEngine {
    pub fn new(params: PhysicsParams) -> Self {
        Self::with_state(params, SpinState::default())
    }

    pub fn with_state(params: PhysicsParams, state: SpinState) -> Self {
        Self {
            params,
            state,
            commands: VecDeque::new(),
        }
    }

    pub fn state(&self) -> &SpinState {
        &self.state
    }

    pub fn offset(&self) -> f64 {
        self.state.offset
    }

    pub fn phase(&self) -> SpinPhase {
        self.state.phase
    }

    /// Queue a command for the next tick
    pub fn send(&mut self, command: Command) {
        self.commands.push_back(command);
    }

    fn apply(&mut self, command: Command) {
        tracing::trace!("Physics command: {:?}", command);
        match command {
            Command::Spin => {
                self.state.phase = SpinPhase::Accelerating;
                self.state.target_offset = None;
                self.state.winner_index = None;
            }
            Command::DecelerateTo {
                target,
                winner_index,
            } => {
                self.state.phase = SpinPhase::Decelerating;
                self.state.target_offset = Some(target);
                self.state.winner_index = Some(winner_index);
            }
            Command::Idle => {
                self.state.phase = SpinPhase::Idle;
                self.state.target_offset = None;
            }
        }
    }

    /// Advance one animation frame
    pub fn tick(&mut self) -> Option<Landed> {
        while let Some(command) = self.commands.pop_front() {
            self.apply(command);
        }

        let p = &self.params;
        let s = &mut self.state;
        let mut landed = None;

        match s.phase {
            SpinPhase::Idle => {
                s.velocity *= p.idle_damping;
                if s.velocity.abs() < p.idle_epsilon {
                    s.velocity = 0.0;
                }
            }
            SpinPhase::Accelerating => {
                s.velocity = (s.velocity + p.acceleration).min(p.max_speed);
            }
            SpinPhase::Decelerating => {
                // DecelerateTo always sets a target; treat a missing one as "stop here"
                let target = s.target_offset.unwrap_or(s.offset);
                let dist = target - s.offset;

                s.velocity *= p.decel_damping;
                s.velocity += dist * p.restoring_force;
                s.velocity = s.velocity.clamp(-p.max_decel_speed, p.max_decel_speed);

                if dist.abs() < p.land_distance && s.velocity.abs() < p.land_velocity {
                    s.offset = target;
                    s.velocity = 0.0;
                    s.phase = SpinPhase::Idle;
                    s.target_offset = None;
                    landed = s.winner_index.map(|winner_index| Landed { winner_index });
                }
            }
        }

        s.offset += s.velocity;
        landed
    }
}

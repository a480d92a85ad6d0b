//! The shuffle engine: strip layout, spin physics and winner selection.

pub mod physics;
pub mod selector;
pub mod strip;

pub use physics::{Command, Landed, PhysicsEngine, SpinPhase, SpinState};
pub use selector::{Selection, StopPolicy, WinnerSelector};
pub use strip::SlotView;

use crate::config::{PhysicsParams, StripGeometry};

/// Everything a UI needs to draw one frame of the strip
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    pub offset: f64,
    pub slots: Vec<SlotView>,
}

/// A physics engine paired with the geometry it is drawn with
#[derive(Debug, Clone)]
pub struct Renderer {
    engine: PhysicsEngine,
    geometry: StripGeometry,
}

impl Renderer {
    pub fn new(params: PhysicsParams, geometry: StripGeometry) -> Self {
        Self {
            engine: PhysicsEngine::new(params),
            geometry,
        }
    }

    pub fn engine(&self) -> &PhysicsEngine {
        &self.engine
    }

    pub fn send(&mut self, command: Command) {
        self.engine.send(command);
    }

    pub fn tick(&mut self) -> Option<Landed> {
        self.engine.tick()
    }

    pub fn set_viewport_width(&mut self, width: f64) {
        self.geometry.viewport_width = width;
    }

    /// Lay out the current offset for a strip of `roster_size` cards
    pub fn frame(&self, roster_size: usize) -> Frame {
        let state = self.engine.state();
        let highlight = match state.phase {
            SpinPhase::Decelerating => state.winner_index,
            _ => None,
        };
        Frame {
            offset: state.offset,
            slots: strip::visible_slots(&self.geometry, state.offset, roster_size, highlight),
        }
    }
}

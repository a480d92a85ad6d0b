//! Time sources, cancellable timers and the frame scheduler.
//!
//! Controllers never read the wall clock themselves; they are handed `now`
//! from a [`Clock`]. Sessions default to [`TokioClock`] and can be given a
//! [`ManualClock`] to hold spin timers still.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Monotonic time since some fixed origin
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Clock backed by the tokio timer (respects paused time in tests)
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven clock for deterministic tests
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.lock().map(|n| *n).unwrap_or_default()
    }
}

/// A single-shot deadline. At most one deadline is outstanding; arming again
/// replaces it. Cancelling is idempotent.
#[derive(Debug, Clone, Default)]
pub struct Timer {
    deadline: Option<Duration>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, deadline: Duration) {
        self.deadline = Some(deadline);
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Returns whether a pending deadline was actually cancelled
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    /// Returns true exactly once, on the first call at or after the deadline
    pub fn fire(&mut self, now: Duration) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Periodic frame source for one renderer.
///
/// `start` is a no-op while running, so a renderer can never end up with two
/// loops driving it.
#[derive(Debug)]
pub struct FrameScheduler {
    period: Duration,
    interval: Option<Interval>,
}

impl FrameScheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
        }
    }

    /// Returns false if the scheduler was already running
    pub fn start(&mut self) -> bool {
        if self.interval.is_some() {
            return false;
        }
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.interval = Some(interval);
        true
    }

    pub fn stop(&mut self) {
        self.interval = None;
    }

    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    /// Wait for the next frame. Never resolves while stopped.
    pub async fn next_frame(&mut self) {
        match &mut self.interval {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

//! Environment-driven configuration
//!
//! Every knob has a default so an empty environment yields a working setup.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Read `key` from the environment, falling back to `default` when unset or unparsable
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!("Ignoring unparsable {}={:?}", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

fn env_millis(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_or(key, default_ms))
}

/// Card strip geometry shared by the selector and the frame layout
#[derive(Debug, Clone, PartialEq)]
pub struct StripGeometry {
    pub card_width: f64,
    pub gap: f64,
    pub viewport_width: f64,
}

impl StripGeometry {
    /// Horizontal distance between consecutive card origins
    pub fn item_width(&self) -> f64 {
        self.card_width + self.gap
    }

    /// Width of one full cycle of the roster
    pub fn total_width(&self, roster_size: usize) -> f64 {
        roster_size as f64 * self.item_width()
    }

    /// Cards need a positive, finite width and a non-negative gap
    pub fn is_valid(&self) -> bool {
        self.card_width.is_finite()
            && self.card_width > 0.0
            && self.gap.is_finite()
            && self.gap >= 0.0
    }
}

impl Default for StripGeometry {
    fn default() -> Self {
        Self {
            card_width: 220.0,
            gap: 40.0,
            viewport_width: 1280.0,
        }
    }
}

/// Per-tick physics constants
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicsParams {
    pub max_speed: f64,
    pub acceleration: f64,
    pub idle_damping: f64,
    pub idle_epsilon: f64,
    pub decel_damping: f64,
    /// Restoring force per unit of remaining distance
    pub restoring_force: f64,
    pub max_decel_speed: f64,
    pub land_distance: f64,
    pub land_velocity: f64,
}

impl Default for PhysicsParams {
    fn default() -> Self {
        Self {
            max_speed: 40.0,
            acceleration: 1.5,
            idle_damping: 0.98,
            idle_epsilon: 0.1,
            decel_damping: 0.95,
            restoring_force: 0.02,
            max_decel_speed: 15.0,
            land_distance: 5.0,
            land_velocity: 2.0,
        }
    }
}

/// Timing and stop-policy tunables for a spin
#[derive(Debug, Clone, PartialEq)]
pub struct SpinTiming {
    pub min_spin: Duration,
    pub max_spin: Duration,
    pub natural_extra_cycles: u32,
    pub forced_extra_cycles: u32,
    pub overshoot_cycles: u32,
    pub frame_interval: Duration,
    pub publish_retry_delay: Duration,
}

impl Default for SpinTiming {
    fn default() -> Self {
        Self {
            min_spin: Duration::from_millis(3000),
            max_spin: Duration::from_millis(5000),
            natural_extra_cycles: 2,
            forced_extra_cycles: 1,
            overshoot_cycles: 1,
            frame_interval: Duration::from_millis(16),
            publish_retry_delay: Duration::from_millis(1000),
        }
    }
}

/// Everything a renderer and the host controller need
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    pub strip: StripGeometry,
    pub physics: PhysicsParams,
    pub timing: SpinTiming,
}

impl EngineConfig {
    /// Load engine config from environment variables
    pub fn from_env() -> Self {
        let strip_defaults = StripGeometry::default();
        let physics_defaults = PhysicsParams::default();
        let timing_defaults = SpinTiming::default();

        let mut strip = StripGeometry {
            card_width: env_or("CAMSPIN_CARD_WIDTH", strip_defaults.card_width),
            gap: env_or("CAMSPIN_CARD_GAP", strip_defaults.gap),
            viewport_width: env_or("CAMSPIN_VIEWPORT_WIDTH", strip_defaults.viewport_width),
        };
        if !strip.is_valid() {
            tracing::warn!(
                "Ignoring card width {} / gap {}: item width must be positive",
                strip.card_width,
                strip.gap
            );
            strip.card_width = strip_defaults.card_width;
            strip.gap = strip_defaults.gap;
        }
        if !(strip.viewport_width.is_finite() && strip.viewport_width >= 0.0) {
            tracing::warn!("Ignoring viewport width {}", strip.viewport_width);
            strip.viewport_width = strip_defaults.viewport_width;
        }

        let physics = PhysicsParams {
            max_speed: env_or("CAMSPIN_MAX_SPEED", physics_defaults.max_speed),
            acceleration: env_or("CAMSPIN_ACCELERATION", physics_defaults.acceleration),
            ..physics_defaults
        };

        let mut timing = SpinTiming {
            min_spin: env_millis("CAMSPIN_SPIN_MIN_MS", 3000),
            max_spin: env_millis("CAMSPIN_SPIN_MAX_MS", 5000),
            natural_extra_cycles: env_or(
                "CAMSPIN_NATURAL_EXTRA_CYCLES",
                timing_defaults.natural_extra_cycles,
            ),
            forced_extra_cycles: env_or(
                "CAMSPIN_FORCED_EXTRA_CYCLES",
                timing_defaults.forced_extra_cycles,
            ),
            frame_interval: env_millis("CAMSPIN_FRAME_MS", 16),
            publish_retry_delay: env_millis("CAMSPIN_PUBLISH_RETRY_MS", 1000),
            ..timing_defaults
        };

        if timing.max_spin < timing.min_spin {
            tracing::warn!(
                "CAMSPIN_SPIN_MAX_MS is below CAMSPIN_SPIN_MIN_MS, using a fixed {:?} spin",
                timing.min_spin
            );
            timing.max_spin = timing.min_spin;
        }
        if timing.frame_interval.is_zero() {
            timing.frame_interval = timing_defaults.frame_interval;
        }

        Self {
            strip,
            physics,
            timing,
        }
    }
}

/// Photo upload throttling for the local participant
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    pub interval: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(400),
        }
    }
}

impl CaptureConfig {
    pub fn from_env() -> Self {
        Self {
            interval: env_millis("CAMSPIN_CAPTURE_INTERVAL_MS", 400),
        }
    }
}

/// Relay server settings
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    pub addr: SocketAddr,
}

impl RelayConfig {
    pub fn from_env() -> Self {
        let port: u16 = env_or("CAMSPIN_PORT", 7746);
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "CAMSPIN_CARD_WIDTH",
            "CAMSPIN_CARD_GAP",
            "CAMSPIN_VIEWPORT_WIDTH",
            "CAMSPIN_MAX_SPEED",
            "CAMSPIN_ACCELERATION",
            "CAMSPIN_SPIN_MIN_MS",
            "CAMSPIN_SPIN_MAX_MS",
            "CAMSPIN_NATURAL_EXTRA_CYCLES",
            "CAMSPIN_FORCED_EXTRA_CYCLES",
            "CAMSPIN_FRAME_MS",
            "CAMSPIN_PUBLISH_RETRY_MS",
            "CAMSPIN_CAPTURE_INTERVAL_MS",
            "CAMSPIN_PORT",
            "CAMSPIN_SESSION_FILE",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_from_empty_env() {
        clear_env();
        let config = EngineConfig::from_env();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.strip.item_width(), 260.0);
        assert_eq!(CaptureConfig::from_env(), CaptureConfig::default());

        let relay = RelayConfig::from_env();
        assert_eq!(relay.addr.port(), 7746);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var("CAMSPIN_CARD_WIDTH", "100");
        std::env::set_var("CAMSPIN_CARD_GAP", "20");
        std::env::set_var("CAMSPIN_SPIN_MIN_MS", "1000");
        std::env::set_var("CAMSPIN_SPIN_MAX_MS", "2000");
        std::env::set_var("CAMSPIN_PORT", "9000");

        let config = EngineConfig::from_env();
        assert_eq!(config.strip.item_width(), 120.0);
        assert_eq!(config.timing.min_spin, Duration::from_millis(1000));
        assert_eq!(config.timing.max_spin, Duration::from_millis(2000));
        assert_eq!(RelayConfig::from_env().addr.port(), 9000);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_garbage_values_fall_back_to_defaults() {
        clear_env();
        std::env::set_var("CAMSPIN_MAX_SPEED", "fast");
        std::env::set_var("CAMSPIN_FRAME_MS", "0");

        let config = EngineConfig::from_env();
        assert_eq!(config.physics.max_speed, 40.0);
        assert_eq!(config.timing.frame_interval, Duration::from_millis(16));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_degenerate_card_geometry_falls_back() {
        clear_env();
        std::env::set_var("CAMSPIN_CARD_WIDTH", "0");
        std::env::set_var("CAMSPIN_CARD_GAP", "0");
        let config = EngineConfig::from_env();
        assert_eq!(config.strip, StripGeometry::default());

        std::env::set_var("CAMSPIN_CARD_WIDTH", "NaN");
        std::env::set_var("CAMSPIN_CARD_GAP", "-50");
        let config = EngineConfig::from_env();
        assert!(config.strip.is_valid());
        assert_eq!(config.strip.item_width(), 260.0);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_inverted_spin_range_is_collapsed() {
        clear_env();
        std::env::set_var("CAMSPIN_SPIN_MIN_MS", "4000");
        std::env::set_var("CAMSPIN_SPIN_MAX_MS", "1000");

        let config = EngineConfig::from_env();
        assert_eq!(config.timing.max_spin, config.timing.min_spin);
        clear_env();
    }
}

//! Control mode and arbiter state

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

use super::EffectiveCommand;

/// Which source drives the actuators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Joystick input is fresh and preempts everything else
    Manual,
    /// No fresh manual input; the latest autonomous command is fresh
    Autonomous,
    /// Neither source is fresh; actuation is zeroed
    SafeStop,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Manual => "manual",
            Mode::Autonomous => "autonomous",
            Mode::SafeStop => "safe_stop",
        }
    }

    /// Wire representation
    pub fn to_u8(self) -> u8 {
        match self {
            Mode::Manual => 1,
            Mode::Autonomous => 2,
            Mode::SafeStop => 0,
        }
    }

    /// Parse the wire representation; unknown values decode as `SafeStop`
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Mode::Manual,
            2 => Mode::Autonomous,
            _ => Mode::SafeStop,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the mode arbiter
///
/// Written only by the control tick; everything else receives read-only copies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlState {
    /// Current mode
    pub mode: Mode,

    /// Command applied on the most recent tick
    pub last_applied: EffectiveCommand,

    /// Receipt time of the manual input seen on the last tick
    pub manual_seen_at: Option<Instant>,

    /// Receipt time of the autonomous command seen on the last tick
    pub autonomous_seen_at: Option<Instant>,

    /// Number of ticks evaluated so far
    pub ticks: u64,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            mode: Mode::SafeStop,
            last_applied: EffectiveCommand::SAFE_STOP,
            manual_seen_at: None,
            autonomous_seen_at: None,
            ticks: 0,
        }
    }
}

/// Periodic report of the edge's control state sent to the vision server
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub mode: Mode,
    pub velocity: f32,
    pub steering: f32,
    /// Report time in microseconds since the UNIX epoch (edge clock)
    pub reported_at_us: u64,
}

impl From<&ControlState> for StatusReport {
    fn from(state: &ControlState) -> Self {
        Self {
            mode: state.mode,
            velocity: state.last_applied.velocity,
            steering: state.last_applied.steering,
            reported_at_us: super::unix_micros(),
        }
    }
}

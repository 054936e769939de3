//! Mode arbiter
//!
//! Decides every control tick which source drives the robot:
//!
//! 1. fresh manual input wins unconditionally,
//! 2. otherwise a fresh autonomous command,
//! 3. otherwise SafeStop with zero output.
//!
//! The decision depends only on the two most recent values and their receipt
//! times. There is no hysteresis, so a source that goes stale hands over on
//! the very next tick.

use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

use crate::config::FreshnessConfig;
use crate::register::Stamped;
use crate::types::{Command, ControlState, EffectiveCommand, ManualInput, Mode};

/// Freshness windows for the two control sources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessWindows {
    pub manual: Duration,
    pub autonomous: Duration,
}

impl FreshnessWindows {
    pub fn from_config(config: &FreshnessConfig) -> Self {
        Self { manual: config.manual(), autonomous: config.autonomous() }
    }
}

impl Default for FreshnessWindows {
    fn default() -> Self {
        Self::from_config(&FreshnessConfig::default())
    }
}

/// Pick the effective command for one tick
pub fn decide(
    now: Instant,
    windows: FreshnessWindows,
    manual: Option<&Stamped<ManualInput>>,
    autonomous: Option<&Stamped<Command>>,
) -> EffectiveCommand {
    if let Some(input) = manual.filter(|m| m.is_fresh(now, windows.manual)) {
        return EffectiveCommand::from_manual(&input.value);
    }
    if let Some(command) = autonomous.filter(|c| c.is_fresh(now, windows.autonomous)) {
        return EffectiveCommand::from_autonomous(&command.value);
    }
    EffectiveCommand::SAFE_STOP
}

/// Owner of the [`ControlState`]
#[derive(Debug, Clone)]
pub struct ModeArbiter {
    windows: FreshnessWindows,
    state: ControlState,
}

impl ModeArbiter {
    /// Start in SafeStop
    pub fn new(windows: FreshnessWindows) -> Self {
        Self { windows, state: ControlState::default() }
    }

    pub fn windows(&self) -> FreshnessWindows {
        self.windows
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    pub fn mode(&self) -> Mode {
        self.state.mode
    }

    /// Evaluate one tick and return the command to apply
    pub fn tick(
        &mut self,
        now: Instant,
        manual: Option<Stamped<ManualInput>>,
        autonomous: Option<Stamped<Command>>,
    ) -> EffectiveCommand {
        let command = decide(now, self.windows, manual.as_ref(), autonomous.as_ref());

        self.state.manual_seen_at = manual.map(|m| m.received_at);
        self.state.autonomous_seen_at = autonomous.map(|c| c.received_at);
        self.apply(command);
        command
    }

    /// Enter SafeStop regardless of inputs, as on shutdown
    pub fn force_safe_stop(&mut self) -> EffectiveCommand {
        self.apply(EffectiveCommand::SAFE_STOP);
        EffectiveCommand::SAFE_STOP
    }

    fn apply(&mut self, command: EffectiveCommand) {
        if command.mode != self.state.mode {
            info!(
                "Mode {} -> {} (v={:.2}, s={:.2}, tick {})",
                self.state.mode, command.mode, command.velocity, command.steering, self.state.ticks
            );
        }
        self.state.mode = command.mode;
        self.state.last_applied = command;
        self.state.ticks += 1;
    }
}

//! Actuation sink
//!
//! The motor driver sits behind [`ActuationSink`]. The control loop calls it
//! exactly once per tick with the arbiter's decision. A failing sink is logged
//! and the loop carries on; the next tick retries with fresh input.

use tracing::{debug, info};

use crate::Result;
use crate::types::{EffectiveCommand, MotorDrive};

/// Consumer of effective commands, typically a motor driver
pub trait ActuationSink: Send + 'static {
    /// Deliver one command; values are already clamped to `[-1, 1]`
    fn apply(&mut self, command: EffectiveCommand) -> Result<()>;
}

impl<S: ActuationSink + ?Sized> ActuationSink for Box<S> {
    fn apply(&mut self, command: EffectiveCommand) -> Result<()> {
        (**self).apply(command)
    }
}

/// Sink for running without motor hardware
///
/// Logs the motor outputs each command would produce, at `info` when they
/// change and at `debug` otherwise.
#[derive(Debug, Default)]
pub struct LoggingSink {
    last: Option<MotorDrive>,
    applied: u64,
}

impl LoggingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commands delivered
    pub fn applied(&self) -> u64 {
        self.applied
    }

    /// Motor outputs of the most recent command
    pub fn last_drive(&self) -> Option<MotorDrive> {
        self.last
    }
}

impl ActuationSink for LoggingSink {
    fn apply(&mut self, command: EffectiveCommand) -> Result<()> {
        let drive = command.to_motor_drive();
        self.applied += 1;

        if self.last != Some(drive) {
            info!(
                "[motor] {} locomotion {} {:.2}, steering {} {:.2}",
                command.mode,
                if drive.locomotion.forward { "forward" } else { "reverse" },
                drive.locomotion.duty,
                if drive.steering.forward { "right" } else { "left" },
                drive.steering.duty
            );
        } else {
            debug!("[motor] holding {} output", command.mode);
        }
        self.last = Some(drive);
        Ok(())
    }
}

//! Actuation command types
//!
//! Both control sources boil down to a velocity/steering pair. The arbiter picks
//! one of them per tick and emits an [`EffectiveCommand`].

use serde::{Deserialize, Serialize};

use super::Mode;

/// Origin of a velocity/steering pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    /// Human operator via joystick
    Manual,
    /// Vision decision engine
    Autonomous,
}

/// Autonomous command issued by the vision decision engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Sequence number of the frame this command was derived from
    pub seq: u64,

    /// Epoch of the frame session the source frame belonged to
    pub frame_epoch: u32,

    /// Issue time in microseconds since the UNIX epoch (server clock)
    pub issued_at_us: u64,

    /// Linear velocity in `[-1, 1]`, positive is forward
    pub velocity: f32,

    /// Steering in `[-1, 1]`, positive is right
    pub steering: f32,
}

impl Command {
    /// Create a command for the given source frame
    pub fn new(frame_epoch: u32, seq: u64, velocity: f32, steering: f32) -> Self {
        Self { seq, frame_epoch, issued_at_us: super::unix_micros(), velocity, steering }
    }

    /// Explicit stop derived from the given source frame
    ///
    /// Distinct from the absence of a command: an explicit stop keeps the
    /// autonomous source fresh while holding the robot still.
    pub fn stop(frame_epoch: u32, seq: u64) -> Self {
        Self::new(frame_epoch, seq, 0.0, 0.0)
    }

    pub fn source(&self) -> Source {
        Source::Autonomous
    }
}

/// Operator input derived from joystick axes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ManualInput {
    /// Linear velocity in `[-1, 1]`, positive is forward
    pub velocity: f32,

    /// Steering in `[-1, 1]`, positive is right
    pub steering: f32,

    /// Sample time in microseconds since the UNIX epoch
    pub sampled_at_us: u64,
}

impl ManualInput {
    pub fn new(velocity: f32, steering: f32) -> Self {
        Self { velocity, steering, sampled_at_us: super::unix_micros() }
    }

    pub fn source(&self) -> Source {
        Source::Manual
    }
}

/// The single command applied to the actuators on a control tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectiveCommand {
    /// Mode that produced this command
    pub mode: Mode,

    /// Linear velocity in `[-1, 1]`
    pub velocity: f32,

    /// Steering in `[-1, 1]`
    pub steering: f32,
}

impl EffectiveCommand {
    /// Zero actuation emitted whenever no control source is fresh
    pub const SAFE_STOP: EffectiveCommand =
        EffectiveCommand { mode: Mode::SafeStop, velocity: 0.0, steering: 0.0 };

    /// Build a command for the given mode, clamping both axes to `[-1, 1]`.
    ///
    /// Non-finite inputs are treated as zero.
    pub fn new(mode: Mode, velocity: f32, steering: f32) -> Self {
        if mode == Mode::SafeStop {
            return Self::SAFE_STOP;
        }
        Self { mode, velocity: clamp_unit(velocity), steering: clamp_unit(steering) }
    }

    pub fn from_manual(input: &ManualInput) -> Self {
        Self::new(Mode::Manual, input.velocity, input.steering)
    }

    pub fn from_autonomous(command: &Command) -> Self {
        Self::new(Mode::Autonomous, command.velocity, command.steering)
    }

    /// True when both axes are zero
    pub fn is_zero(&self) -> bool {
        self.velocity == 0.0 && self.steering == 0.0
    }

    /// Split into locomotion and steering motor outputs for an H-bridge driver.
    ///
    /// Magnitudes below [`MOTOR_DEAD_BAND`] are treated as stopped.
    pub fn to_motor_drive(&self) -> MotorDrive {
        MotorDrive {
            locomotion: MotorOutput::from_signed(self.velocity),
            steering: MotorOutput::from_signed(self.steering),
        }
    }
}

/// Duty cycles below this magnitude leave the motor stopped
pub const MOTOR_DEAD_BAND: f32 = 1e-2;

/// Duty cycle and direction for a single DC motor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorOutput {
    /// Duty cycle in `[0, 1]`
    pub duty: f32,
    /// Direction, `true` for forward/right
    pub forward: bool,
}

impl MotorOutput {
    pub const STOPPED: MotorOutput = MotorOutput { duty: 0.0, forward: true };

    fn from_signed(value: f32) -> Self {
        let value = clamp_unit(value);
        if value.abs() < MOTOR_DEAD_BAND {
            return Self::STOPPED;
        }
        Self { duty: value.abs(), forward: value > 0.0 }
    }
}

/// Motor outputs for a locomotion + steering drive train
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorDrive {
    pub locomotion: MotorOutput,
    pub steering: MotorOutput,
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_finite() { value.clamp(-1.0, 1.0) } else { 0.0 }
}

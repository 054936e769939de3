//! Detection to command mapping

use crate::config::PolicyConfig;
use crate::types::{Command, Frame};

use super::detector::Detection;

/// Deterministic obstacle-avoidance policy
///
/// - no obstacle: cruise straight ahead
/// - nearest obstacle closer than `stop_proximity`: explicit stop
/// - closer than `slow_proximity`: slow down linearly towards the stop
///   threshold and steer away from the obstacle
///
/// An obstacle dead ahead is avoided to the right.
#[derive(Debug, Clone)]
pub struct SteeringPolicy {
    config: PolicyConfig,
}

impl SteeringPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    /// Command for `detection`, tagged with `frame`'s epoch and sequence number
    pub fn decide(&self, frame: &Frame, detection: &Detection) -> Command {
        let (velocity, steering) = self.velocity_and_steering(detection);
        Command::new(frame.epoch, frame.seq, velocity, steering)
    }

    pub fn velocity_and_steering(&self, detection: &Detection) -> (f32, f32) {
        let cruise = self.config.cruise_velocity.clamp(-1.0, 1.0);
        let Some(obstacle) = detection.nearest() else {
            return (cruise, 0.0);
        };

        let proximity = obstacle.proximity.clamp(0.0, 1.0);
        if proximity >= self.config.stop_proximity {
            return (0.0, 0.0);
        }
        if proximity < self.config.slow_proximity {
            return (cruise, 0.0);
        }

        let band = self.config.stop_proximity - self.config.slow_proximity;
        let velocity = cruise * (self.config.stop_proximity - proximity) / band;
        // steer towards the side opposite the obstacle
        let away = if obstacle.bearing > 0.0 { -1.0 } else { 1.0 };
        let steering = (away * self.config.avoid_gain * proximity).clamp(-1.0, 1.0);
        (velocity, steering)
    }
}

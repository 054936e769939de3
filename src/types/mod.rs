//! Core data model shared by the edge controller and the vision server.
//!
//! ## Architecture
//!
//! - [`Frame`] is an encoded camera image tagged with its frame session epoch and sequence number
//! - [`Command`] is an autonomous velocity/steering decision tied to the frame it came from
//! - [`ManualInput`] is the operator's velocity/steering pair from the joystick
//! - [`EffectiveCommand`] is the one command applied to the motors on a control tick
//! - [`Session`] tracks one transport's connection identity and liveness
//! - [`ControlState`] is the mode arbiter's state, published read-only
//!
//! Velocity and steering are normalised to `[-1, 1]` everywhere. Positive
//! velocity drives forward, positive steering turns right.
//!
//! ## Example
//!
//! ```rust
//! use rovelink::types::{EffectiveCommand, ManualInput, Mode};
//!
//! let input = ManualInput::new(1.5, -0.25);
//! let command = EffectiveCommand::from_manual(&input);
//! assert_eq!(command.mode, Mode::Manual);
//! assert_eq!(command.velocity, 1.0); // clamped
//! assert_eq!(command.steering, -0.25);
//! ```

mod command;
mod control;
mod frame;
mod rate;
mod session;

pub use command::*;
pub use control::*;
pub use frame::*;
pub use rate::*;
pub use session::*;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in microseconds since the UNIX epoch.
///
/// Used only for informational timestamps that cross the network. Freshness
/// decisions use the local monotonic clock instead.
pub fn unix_micros() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|elapsed| elapsed.as_micros() as u64).unwrap_or(0)
}

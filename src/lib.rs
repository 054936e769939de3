//! Edge/vision control loop for a teleoperated robot.
//!
//! rovelink pairs an edge controller on the robot with a remote vision server.
//! The robot is driven either by an operator's joystick or autonomously from
//! camera-derived commands, with continuous arbitration between the two and a
//! hard SafeStop whenever neither source is fresh.
//!
//! # Features
//!
//! - **Frame transport**: best-effort UDP, one datagram per frame, never queued
//! - **Command transport**: TCP with heartbeats, session epochs and backoff
//! - **Mode arbiter**: Manual > Autonomous > SafeStop, decided every tick
//! - **Latest-wins registers**: no backlog can build up between tasks
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use rovelink::{Config, IdleJoystick, LoggingSink, Rovelink, SyntheticCamera};
//!
//! #[tokio::main]
//! async fn main() -> rovelink::Result<()> {
//!     let config = Config::load("rovelink.yaml")?;
//!     let camera = SyntheticCamera::new(config.edge.camera_fps);
//!     let edge = Rovelink::edge(&config, camera, IdleJoystick, LoggingSink::new())?;
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     let last = edge.shutdown().await;
//!     println!("stopped in {}", last.mode);
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod config;
mod error;
pub mod logging;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;
pub mod wire;

// Coordination primitives
pub mod register;
pub mod sequence;
pub mod stream;
pub mod watchdog;

// Control and decision logic
pub mod arbiter;
pub mod control;
pub mod vision;

// Transports
pub mod transport;

// External collaborators
pub mod actuation;
pub mod camera;
pub mod joystick;

// Process wiring
pub mod edge;
pub mod server;

// Core exports
pub use config::Config;
pub use error::*;
pub use types::*;

// Component exports
pub use actuation::{ActuationSink, LoggingSink};
pub use arbiter::{FreshnessWindows, ModeArbiter};
pub use camera::{CameraSource, SyntheticCamera};
pub use control::ControlLoop;
pub use edge::{EdgeController, EdgeHandle};
pub use joystick::{IdleJoystick, JoystickMapping, JoystickSource, JoystickState};
pub use register::{Freshness, RegisterReader, RegisterWriter, Stamped};
pub use server::{ServerHandle, VisionServer};
pub use transport::{CommandLink, SendOutcome};
pub use vision::{CenterBiasDetector, Detection, Detector, VisionEngine};
pub use watchdog::{Channel, HealthSnapshot, HealthStatus, Watchdog};

/// Unified entry point for the two processes.
///
/// # Examples
///
/// ## Vision server
/// ```rust,no_run
/// use rovelink::{CenterBiasDetector, Config, Rovelink};
///
/// #[tokio::main]
/// async fn main() -> rovelink::Result<()> {
///     let server = Rovelink::server(&Config::default(), CenterBiasDetector::new(64)).await?;
///     println!("commands on {}", server.command_addr());
///     Ok(())
/// }
/// ```
pub struct Rovelink;

impl Rovelink {
    /// Start the edge controller.
    ///
    /// Spawns frame capture, joystick polling, the command link client and the
    /// control tick. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The frame server address cannot be resolved
    /// - The frame socket cannot be created
    ///
    /// The command link is not required to be up; it connects in the background.
    pub fn edge<C, J, S>(config: &Config, camera: C, joystick: J, sink: S) -> Result<EdgeHandle>
    where
        C: CameraSource,
        J: JoystickSource,
        S: ActuationSink,
    {
        EdgeController::spawn(config, camera, joystick, sink)
    }

    /// Start the vision server.
    ///
    /// # Errors
    ///
    /// Returns an error if either bind address cannot be resolved or bound.
    pub async fn server<D: Detector>(config: &Config, detector: D) -> Result<ServerHandle> {
        VisionServer::spawn(config, detector).await
    }
}

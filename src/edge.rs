//! Edge controller
//!
//! Wires the robot side together:
//!
//! ```text
//! camera ──▶ FrameSender ──UDP──▶ (vision server)
//! (vision server) ──TCP──▶ CommandClient ──▶ command register ─┐
//! joystick ──▶ JoystickMapping ──▶ manual register ───────────┼─▶ ControlLoop ──▶ sink
//!                                                             │
//!                            control state register ◀─────────┘
//! ```
//!
//! Every arrow between tasks is a latest-wins register; no task ever waits on
//! another.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::actuation::ActuationSink;
use crate::arbiter::{FreshnessWindows, ModeArbiter};
use crate::camera::CameraSource;
use crate::config::Config;
use crate::control::ControlLoop;
use crate::joystick::{JoystickMapping, JoystickSource};
use crate::register::{Freshness, RegisterReader, RegisterWriter, register};
use crate::transport::{CommandClient, CommandLink, FrameSender, SendOutcome};
use crate::types::{Command, ControlState, ManualInput, Session, period_for};
use crate::watchdog::{Channel, HealthSnapshot, Watchdog, WatchdogWindows};

/// Spawns the edge tasks
pub struct EdgeController;

impl EdgeController {
    /// Start every edge task
    ///
    /// Must be called from within a tokio runtime. Fails only if the frame
    /// socket cannot be created; the command link retries on its own.
    pub fn spawn<C, J, S>(config: &Config, camera: C, joystick: J, sink: S) -> Result<EdgeHandle>
    where
        C: CameraSource,
        J: JoystickSource,
        S: ActuationSink,
    {
        let cancel = CancellationToken::new();
        let watchdog = Arc::new(Watchdog::new(WatchdogWindows::from_config(config)));

        let (manual_tx, manual_rx) = register::<ManualInput>();
        let (state_tx, state_rx) = register::<ControlState>();

        let frame_sender = FrameSender::new(config.edge.frame_server_addr()?, config)?;
        let (frame_session_tx, frame_session_rx) = watch::channel(frame_sender.session());

        let link = CommandClient::spawn(
            config.edge.command_server.clone(),
            config,
            state_rx.clone(),
            watchdog.clone(),
            cancel.child_token(),
        );

        tokio::spawn(frame_task(camera, frame_sender, frame_session_tx, watchdog.clone(), cancel.child_token()));

        tokio::spawn(joystick_task(
            joystick,
            JoystickMapping::new(config.joystick.clone()),
            period_for(config.edge.joystick_poll_hz),
            manual_tx,
            watchdog.clone(),
            cancel.child_token(),
        ));

        let control = ControlLoop::new(
            ModeArbiter::new(FreshnessWindows::from_config(&config.freshness)),
            sink,
            manual_rx,
            link.commands(),
            state_tx,
            period_for(config.edge.tick_rate_hz),
        );
        let control_task = tokio::spawn(control.run(cancel.clone()));

        info!(
            "Edge controller started (frames -> {}, commands -> {})",
            config.edge.frame_server, config.edge.command_server
        );

        Ok(EdgeHandle {
            control_state: state_rx,
            link,
            frame_session: frame_session_rx,
            watchdog,
            cancel,
            control_task: Some(control_task),
        })
    }
}

async fn frame_task<C: CameraSource>(
    mut camera: C,
    mut sender: FrameSender,
    session_tx: watch::Sender<Session>,
    watchdog: Arc<Watchdog>,
    cancel: CancellationToken,
) {
    let retry = period_for(camera.fps());
    debug!("Frame task started at {} fps", camera.fps());

    loop {
        let captured = tokio::select! {
            _ = cancel.cancelled() => break,
            captured = camera.capture() => captured,
        };

        match captured {
            Ok(Some(image)) => {
                if let SendOutcome::Sent { .. } = sender.send(&image) {
                    watchdog.touch(Channel::Frames);
                }
                session_tx.send_replace(sender.session());
            }
            Ok(None) => {
                info!("Camera closed");
                break;
            }
            Err(e) => {
                warn!("Camera capture failed: {}", e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(retry) => {}
                }
            }
        }
    }

    let stats = sender.stats();
    info!("Frame task stopped: {} sent, {} dropped, {} sessions", stats.sent, stats.dropped, stats.renegotiations);
}

async fn joystick_task<J: JoystickSource>(
    mut joystick: J,
    mapping: JoystickMapping,
    period: Duration,
    manual: RegisterWriter<ManualInput>,
    watchdog: Arc<Watchdog>,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut connected = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(state) = joystick.poll() else {
            if connected {
                warn!("Joystick disconnected");
                connected = false;
            }
            continue;
        };
        if !connected {
            info!("Joystick connected ({} axes, {} buttons)", state.axes.len(), state.buttons.len());
            connected = true;
        }

        let now = Instant::now();
        watchdog.touch_at(Channel::Joystick, now);
        if let Some(input) = mapping.map(&state) {
            manual.publish_at(input, now);
        }
    }

    debug!("Joystick task stopped");
}

/// Handle to a running edge controller
///
/// Dropping the handle cancels every edge task.
pub struct EdgeHandle {
    control_state: RegisterReader<ControlState>,
    link: CommandLink,
    frame_session: watch::Receiver<Session>,
    watchdog: Arc<Watchdog>,
    cancel: CancellationToken,
    control_task: Option<JoinHandle<ControlState>>,
}

impl EdgeHandle {
    /// Most recently published control state
    pub fn control_state(&self) -> ControlState {
        self.control_state.latest().map(|stamped| stamped.value).unwrap_or_default()
    }

    /// Register reader for control state updates
    pub fn control_states(&self) -> RegisterReader<ControlState> {
        self.control_state.clone()
    }

    /// Most recent autonomous command if it is no older than `max_age`
    pub fn latest_command_or_stale(&self, max_age: Duration) -> Freshness<Command> {
        self.link.latest_command_or_stale(max_age)
    }

    pub fn command_link(&self) -> &CommandLink {
        &self.link
    }

    pub fn command_session(&self) -> Session {
        self.link.session()
    }

    pub fn frame_session(&self) -> Session {
        *self.frame_session.borrow()
    }

    /// Channel liveness at this instant
    pub fn health(&self) -> HealthSnapshot {
        self.watchdog.snapshot(Instant::now())
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop every task and wait for the final SafeStop to be applied
    pub async fn shutdown(mut self) -> ControlState {
        self.cancel.cancel();
        match self.control_task.take() {
            Some(task) => task.await.unwrap_or_else(|e| {
                warn!("Control task ended abnormally: {}", e);
                ControlState::default()
            }),
            None => ControlState::default(),
        }
    }
}

impl Drop for EdgeHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

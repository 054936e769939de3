//! Vision server
//!
//! ```text
//! (edge) ──UDP──▶ FrameReceiver ──▶ frame register ──▶ VisionEngine
//!                                                         │
//! (edge) ◀──TCP── CommandSession ◀── command register ◀───┘
//!                       │
//!                       └──▶ edge status register
//! ```
//!
//! One command session is active at a time. A new connection from the edge
//! replaces the previous one.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::config::Config;
use crate::register::{RegisterReader, RegisterWriter, register};
use crate::transport::{CommandServer, FrameReceiver};
use crate::types::{Command, Frame, RateLimit, Session, StatusReport};
use crate::vision::{Detector, VisionEngine, VisionStats};

/// Spawns the vision server tasks
pub struct VisionServer;

impl VisionServer {
    /// Bind both transports and start every server task
    pub async fn spawn<D: Detector>(config: &Config, detector: D) -> Result<ServerHandle> {
        let cancel = CancellationToken::new();

        let receiver = FrameReceiver::bind(config.server.frame_bind_addr()?, config).await?;
        let command_server = CommandServer::bind(config.server.command_bind_addr()?, config).await?;
        let frame_addr = receiver.local_addr()?;
        let command_addr = command_server.local_addr()?;

        let (frame_tx, frame_rx) = register::<Frame>();
        let (command_tx, command_rx) = register::<Command>();
        let (status_tx, status_rx) = register::<StatusReport>();
        let (frame_session_tx, frame_session_rx) = watch::channel(receiver.session());
        let (command_session_tx, command_session_rx) = watch::channel(Session::disconnected(0));

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(frame_receive_task(
            receiver,
            frame_tx,
            frame_session_tx,
            config.link.frame_idle_timeout(),
            cancel.child_token(),
        )));
        tasks.push(tokio::spawn(command_accept_task(
            command_server,
            command_tx.reader(),
            Arc::new(status_tx),
            command_session_tx,
            config.server.heartbeat_interval(),
            cancel.child_token(),
        )));

        let engine = VisionEngine::from_config(detector, config);
        let vision_task = tokio::spawn(engine.run(
            frame_rx.clone(),
            command_tx,
            RateLimit::from_hz(config.server.max_inference_hz),
            config.server.expected_frame_hz as f64,
            cancel.child_token(),
        ));

        info!("Vision server listening (frames on {}, commands on {})", frame_addr, command_addr);

        Ok(ServerHandle {
            frame_addr,
            command_addr,
            latest_frame: frame_rx,
            latest_command: command_rx,
            edge_status: status_rx,
            frame_session: frame_session_rx,
            command_session: command_session_rx,
            cancel,
            tasks,
            vision_task: Some(vision_task),
        })
    }
}

async fn frame_receive_task(
    mut receiver: FrameReceiver,
    frames: RegisterWriter<Frame>,
    session_tx: watch::Sender<Session>,
    idle_timeout: Duration,
    cancel: CancellationToken,
) {
    let mut idle_check = interval((idle_timeout / 4).max(Duration::from_millis(10)));
    idle_check.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = receiver.recv() => match received {
                Ok(frame) => {
                    frames.publish(frame);
                    session_tx.send_replace(receiver.session());
                }
                Err(e) => {
                    warn!("Frame receive error: {}", e);
                }
            },
            _ = idle_check.tick() => {
                if receiver.check_idle(Instant::now()) {
                    session_tx.send_replace(receiver.session());
                }
            }
        }
    }

    let stats = receiver.stats();
    info!(
        "Frame receiver stopped: {} accepted, {} discarded, {} malformed",
        stats.accepted, stats.discarded, stats.malformed
    );
}

async fn command_accept_task(
    mut server: CommandServer,
    commands: RegisterReader<Command>,
    status: Arc<RegisterWriter<StatusReport>>,
    session_tx: watch::Sender<Session>,
    heartbeat_interval: Duration,
    cancel: CancellationToken,
) {
    let mut current: Option<(CancellationToken, JoinHandle<()>)> = None;
    let session_tx = Arc::new(session_tx);

    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = server.accept() => accepted,
        };

        let session = match accepted {
            Ok(session) => session,
            Err(e) => {
                warn!("Command accept failed: {}", e);
                continue;
            }
        };

        if let Some((previous, _)) = current.take() {
            info!("New edge connection replaces the current command session");
            previous.cancel();
        }

        let epoch = session.session().epoch;
        session_tx.send_replace(session.session());

        let child = cancel.child_token();
        let commands = commands.clone();
        let status = status.clone();
        let sessions = session_tx.clone();
        let serve_cancel = child.clone();
        let task = tokio::spawn(async move {
            match session.serve(commands, &status, heartbeat_interval, serve_cancel).await {
                Ok(()) => debug!("Command session {} closed", epoch),
                Err(e) => warn!("Command session {} ended: {}", epoch, e),
            }
            sessions.send_if_modified(|current| {
                if current.epoch == epoch {
                    current.disconnect();
                    true
                } else {
                    false
                }
            });
        });
        current = Some((child, task));
    }

    // let the active session tell the edge it is ending
    if let Some((token, task)) = current {
        token.cancel();
        let _ = task.await;
    }
    debug!("Command listener stopped");
}

/// Handle to a running vision server
///
/// Dropping the handle cancels every server task.
pub struct ServerHandle {
    frame_addr: SocketAddr,
    command_addr: SocketAddr,
    latest_frame: RegisterReader<Frame>,
    latest_command: RegisterReader<Command>,
    edge_status: RegisterReader<StatusReport>,
    frame_session: watch::Receiver<Session>,
    command_session: watch::Receiver<Session>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    vision_task: Option<JoinHandle<VisionStats>>,
}

impl ServerHandle {
    /// Bound frame address (UDP)
    pub fn frame_addr(&self) -> SocketAddr {
        self.frame_addr
    }

    /// Bound command address (TCP)
    pub fn command_addr(&self) -> SocketAddr {
        self.command_addr
    }

    /// Latest status report from the edge
    pub fn edge_status(&self) -> Option<StatusReport> {
        self.edge_status.latest().map(|stamped| stamped.value)
    }

    /// Most recently accepted frame
    pub fn latest_frame(&self) -> Option<Frame> {
        self.latest_frame.latest().map(|stamped| stamped.value)
    }

    /// Most recently decided command
    pub fn latest_command(&self) -> Option<Command> {
        self.latest_command.latest().map(|stamped| stamped.value)
    }

    pub fn frame_session(&self) -> Session {
        *self.frame_session.borrow()
    }

    pub fn command_session(&self) -> Session {
        *self.command_session.borrow()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop every task; the edge is told with `Shutdown` on the command link
    pub async fn shutdown(mut self) -> VisionStats {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        match self.vision_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => VisionStats::default(),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

//! Edge side of the command link

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, sleep, sleep_until, timeout};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::transport::backoff::Backoff;
use crate::config::Config;
use crate::register::{Freshness, RegisterReader, RegisterWriter, Stamped, register};
use crate::sequence::SequenceGate;
use crate::types::{Command, ControlState, LinkState, Session, StatusReport};
use crate::watchdog::{Channel, Watchdog};
use crate::wire::{CommandCodec, Message};
use crate::{LinkError, Result};

/// Read side of the command link handed to the control loop
#[derive(Debug, Clone)]
pub struct CommandLink {
    commands: RegisterReader<Command>,
    session: watch::Receiver<Session>,
}

impl CommandLink {
    /// Most recent command if it was received within `max_age`
    ///
    /// Age is measured from local receipt time, so clock skew between the
    /// edge and the server has no effect.
    pub fn latest_command_or_stale(&self, max_age: Duration) -> Freshness<Command> {
        self.latest_command_or_stale_at(Instant::now(), max_age)
    }

    pub fn latest_command_or_stale_at(&self, now: Instant, max_age: Duration) -> Freshness<Command> {
        self.commands.latest_within(now, max_age)
    }

    /// Reader of the command register, for the control loop
    pub fn commands(&self) -> RegisterReader<Command> {
        self.commands.clone()
    }

    /// Most recent command with its receipt time, regardless of age
    pub fn latest(&self) -> Option<Stamped<Command>> {
        self.commands.latest()
    }

    /// Current command link session
    pub fn session(&self) -> Session {
        *self.session.borrow()
    }

    /// Watch command link session changes
    pub fn sessions(&self) -> watch::Receiver<Session> {
        self.session.clone()
    }
}

enum SessionEnd {
    Cancelled,
    RemoteShutdown,
}

/// Connects to the vision server and keeps the command link up
pub struct CommandClient {
    server: String,
    connect_timeout: Duration,
    idle_timeout: Duration,
    status_interval: Duration,
    backoff: Backoff,
    gate: SequenceGate,
    commands: RegisterWriter<Command>,
    session_tx: watch::Sender<Session>,
    status: RegisterReader<ControlState>,
    watchdog: Arc<Watchdog>,
}

impl CommandClient {
    /// Spawn the client task
    ///
    /// `status` is the control state register whose latest value is reported
    /// back to the server every `edge.status_interval`.
    pub fn spawn(
        server: impl Into<String>,
        config: &Config,
        status: RegisterReader<ControlState>,
        watchdog: Arc<Watchdog>,
        cancel: CancellationToken,
    ) -> CommandLink {
        let (commands_tx, commands_rx) = register();
        let (session_tx, session_rx) = watch::channel(Session::disconnected(0));

        let client = Self {
            server: server.into(),
            connect_timeout: config.link.connect_timeout(),
            idle_timeout: config.link.command_idle_timeout(),
            status_interval: config.edge.status_interval(),
            backoff: Backoff::new(config.link.backoff_base(), config.link.backoff_cap()),
            gate: SequenceGate::new(),
            commands: commands_tx,
            session_tx,
            status,
            watchdog,
        };

        tokio::spawn(client.run(cancel));

        CommandLink { commands: commands_rx, session: session_rx }
    }

    async fn run(mut self, cancel: CancellationToken) {
        info!("Command client started for {}", self.server);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.set_state(LinkState::Connecting);

            let connect = tokio::select! {
                _ = cancel.cancelled() => break,
                result = timeout(self.connect_timeout, TcpStream::connect(self.server.as_str())) => result,
            };

            match connect {
                Ok(Ok(stream)) => {
                    let _ = stream.set_nodelay(true);
                    let result = self.run_session(stream, &cancel).await;
                    self.end_session();
                    match result {
                        Ok(SessionEnd::Cancelled) => break,
                        Ok(SessionEnd::RemoteShutdown) => {
                            info!("Vision server ended the command session");
                        }
                        Err(e) => warn!("Command link lost: {}", e),
                    }
                }
                Ok(Err(e)) => {
                    self.set_state(LinkState::Disconnected);
                    debug!("Command connect to {} failed: {}", self.server, e);
                }
                Err(_) => {
                    self.set_state(LinkState::Disconnected);
                    debug!("Command connect to {} timed out after {:?}", self.server, self.connect_timeout);
                }
            }

            let delay = self.backoff.next_delay();
            warn!("Reconnecting command link in {:?} (attempt {})", delay, self.backoff.attempts());
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        self.end_session();
        info!("Command client stopped");
    }

    async fn run_session(&mut self, stream: TcpStream, cancel: &CancellationToken) -> Result<SessionEnd> {
        let mut framed = Framed::new(stream, CommandCodec);
        let mut epoch: Option<u32> = None;
        let mut last_rx = Instant::now();

        let mut status_tick = tokio::time::interval(self.status_interval);
        status_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
                _ = sleep_until(last_rx + self.idle_timeout) => {
                    return Err(LinkError::Timeout { duration: self.idle_timeout });
                }
                message = framed.next() => {
                    let now = Instant::now();
                    let message = match message {
                        Some(message) => message?,
                        None => return Err(LinkError::connection_failed("vision server closed the command link")),
                    };
                    last_rx = now;
                    self.watchdog.touch_at(Channel::Commands, now);

                    match message {
                        Message::Hello { epoch: announced } => {
                            self.commands.clear();
                            self.gate.reset();
                            self.backoff.reset();
                            epoch = Some(announced);
                            self.session_tx.send_replace(Session::connected(announced, now));
                            info!("Command session {} established with {}", announced, self.server);
                        }
                        Message::Command(command) => {
                            if epoch.is_none() {
                                trace!("Discarding command {} received before hello", command.seq);
                                continue;
                            }
                            let admission = self.gate.admit(command.frame_epoch, command.seq);
                            if admission.is_accepted() {
                                self.commands.publish_at(command, now);
                            } else {
                                trace!(
                                    "Discarding command {}:{} ({})",
                                    command.frame_epoch, command.seq, admission.as_str()
                                );
                            }
                            self.session_tx.send_modify(|session| session.touch(now));
                        }
                        Message::Heartbeat { .. } => {
                            self.session_tx.send_modify(|session| session.touch(now));
                        }
                        Message::Shutdown => return Ok(SessionEnd::RemoteShutdown),
                        Message::Status(_) => trace!("Ignoring status message from server"),
                    }
                }
                _ = status_tick.tick(), if epoch.is_some() => {
                    if let Some(state) = self.status.latest() {
                        let report = Message::Status(StatusReport::from(&state.value));
                        timeout(self.idle_timeout, framed.send(report))
                            .await
                            .map_err(|_| LinkError::Timeout { duration: self.idle_timeout })??;
                    }
                }
            }
        }
    }

    /// Forget everything learned in the session that just ended
    fn end_session(&mut self) {
        self.commands.clear();
        self.gate.reset();
        self.set_state(LinkState::Disconnected);
    }

    fn set_state(&self, state: LinkState) {
        self.session_tx.send_modify(|session| session.state = state);
    }
}

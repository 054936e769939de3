//! Vision server side of the command link

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::config::Config;
use crate::register::{RegisterReader, RegisterWriter};
use crate::types::{Command, EpochCounter, Session, StatusReport, unix_micros};
use crate::wire::{CommandCodec, Message};
use crate::{LinkError, Result};

/// Accepts command link connections from the edge
#[derive(Debug)]
pub struct CommandServer {
    listener: TcpListener,
    epochs: EpochCounter,
    write_timeout: Duration,
}

impl CommandServer {
    pub async fn bind(addr: SocketAddr, config: &Config) -> Result<Self> {
        Self::bind_with_epochs(addr, config, EpochCounter::new()).await
    }

    pub async fn bind_with_epochs(addr: SocketAddr, config: &Config, epochs: EpochCounter) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| LinkError::io(format!("binding command listener on {addr}"), e))?;
        debug!("Command listener bound on {:?}", listener.local_addr());
        Ok(Self { listener, epochs, write_timeout: config.link.command_idle_timeout() })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(|e| LinkError::io("reading command listener address", e))
    }

    /// Accept the next connection and open a session on it
    ///
    /// The new session's epoch is announced to the edge with `Hello` before
    /// this returns.
    pub async fn accept(&mut self) -> Result<CommandSession> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| LinkError::io("accepting command connection", e))?;
        let _ = stream.set_nodelay(true);

        let epoch = self.epochs.next_epoch();
        let mut session = CommandSession {
            framed: Framed::new(stream, CommandCodec),
            session: Session::connected(epoch, Instant::now()),
            peer,
            write_timeout: self.write_timeout,
            last_write: Instant::now(),
        };
        session.write(Message::Hello { epoch }).await?;
        info!("Command session {} opened with {}", epoch, peer);
        Ok(session)
    }
}

/// One accepted command link connection
#[derive(Debug)]
pub struct CommandSession {
    framed: Framed<TcpStream, CommandCodec>,
    session: Session,
    peer: SocketAddr,
    write_timeout: Duration,
    last_write: Instant,
}

impl CommandSession {
    pub fn session(&self) -> Session {
        self.session
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Write one command; any failure is reported, nothing is dropped silently
    pub async fn send(&mut self, command: Command) -> Result<()> {
        self.write(Message::Command(command)).await
    }

    pub async fn send_heartbeat(&mut self) -> Result<()> {
        self.write(Message::Heartbeat { sent_at_us: unix_micros() }).await
    }

    /// Tell the edge this session is ending
    pub async fn send_shutdown(&mut self) -> Result<()> {
        self.write(Message::Shutdown).await
    }

    /// Next message from the edge, or `None` once it closed the connection
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        self.framed.next().await.transpose()
    }

    async fn write(&mut self, message: Message) -> Result<()> {
        match timeout(self.write_timeout, self.framed.send(message)).await {
            Ok(Ok(())) => {
                let now = Instant::now();
                self.last_write = now;
                self.session.touch(now);
                trace!("Wrote {} to {}", message.kind(), self.peer);
                Ok(())
            }
            Ok(Err(e)) => {
                self.session.disconnect();
                Err(e)
            }
            Err(_) => {
                self.session.disconnect();
                Err(LinkError::Timeout { duration: self.write_timeout })
            }
        }
    }

    /// Drive the session until the link fails or `cancel` fires
    ///
    /// Forwards every command written to `commands` after the session started,
    /// keeps the link alive with heartbeats when no command went out for
    /// `heartbeat_interval`, and publishes status reports from the edge.
    pub async fn serve(
        mut self,
        mut commands: RegisterReader<Command>,
        status: &RegisterWriter<StatusReport>,
        heartbeat_interval: Duration,
        cancel: CancellationToken,
    ) -> Result<()> {
        // Commands decided before this session existed belong to an older link
        commands.mark_seen();
        let epoch = self.session.epoch;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Command session {} cancelled", epoch);
                    let _ = self.send_shutdown().await;
                    return Ok(());
                }
                changed = commands.changed() => {
                    if changed.is_err() {
                        debug!("Command source closed, ending session {}", epoch);
                        let _ = self.send_shutdown().await;
                        return Ok(());
                    }
                    // a cleared register wakes us too; there is nothing to send then
                    if let Some(command) = commands.latest() {
                        self.send(command.value).await?;
                    }
                }
                _ = sleep_until(self.last_write + heartbeat_interval) => {
                    self.send_heartbeat().await?;
                }
                message = self.framed.next() => match message {
                    Some(Ok(Message::Status(report))) => {
                        self.session.touch(Instant::now());
                        trace!("Edge status: {} v={:.2} s={:.2}", report.mode, report.velocity, report.steering);
                        status.publish(report);
                    }
                    Some(Ok(other)) => {
                        trace!("Ignoring {} from edge", other.kind());
                    }
                    Some(Err(e)) => {
                        self.session.disconnect();
                        return Err(e);
                    }
                    None => {
                        self.session.disconnect();
                        return Err(LinkError::connection_failed(format!(
                            "edge {} closed command session {}",
                            self.peer, epoch
                        )));
                    }
                },
            }
        }
    }
}

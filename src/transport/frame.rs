//! UDP frame transport
//!
//! The edge pushes one datagram per camera frame to the vision server. Sending
//! never blocks and never queues: a frame that cannot go out right now is
//! dropped and the next capture replaces it. There is no retransmission.
//!
//! Each side owns its own [`Session`]. The sender opens a new epoch (and
//! restarts sequence numbers at 0) whenever its socket is rebuilt; the receiver
//! forgets the epoch after an idle period and then follows whatever epoch
//! arrives next.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::sequence::{Admission, SequenceGate};
use crate::types::{CapturedImage, EpochCounter, Frame, LinkState, Session, unix_micros};
use crate::wire::{decode_frame, encode_frame};
use crate::{LinkError, Result};

/// Largest datagram the receiver will read
const RECV_BUFFER_LEN: usize = 65_536;

/// Why a frame was not sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The socket send buffer is full
    Saturated,
    /// Payload is larger than the configured limit
    Oversize { len: usize, max: usize },
    /// Frame was already older than the drop-after age
    TooOld { age: Duration },
    /// The socket failed and the session is being rebuilt
    LinkDown,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Saturated => "saturated",
            DropReason::Oversize { .. } => "oversize",
            DropReason::TooOld { .. } => "too_old",
            DropReason::LinkDown => "link_down",
        }
    }
}

/// Result of [`FrameSender::send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { epoch: u32, seq: u64 },
    Dropped(DropReason),
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent { .. })
    }
}

/// Counters kept by both ends of the frame transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub sent: u64,
    pub dropped: u64,
    pub received: u64,
    pub accepted: u64,
    pub discarded: u64,
    pub malformed: u64,
    pub renegotiations: u64,
}

/// Edge side of the frame transport
#[derive(Debug)]
pub struct FrameSender {
    server: SocketAddr,
    socket: Option<UdpSocket>,
    session: Session,
    epochs: EpochCounter,
    next_seq: u64,
    max_payload: usize,
    drop_after: Option<Duration>,
    idle_timeout: Duration,
    buf: Vec<u8>,
    stats: FrameStats,
}

impl FrameSender {
    /// Create a sender for `server` and open the first session
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(server: SocketAddr, config: &Config) -> Result<Self> {
        Self::with_epochs(server, config, EpochCounter::new())
    }

    /// Like [`FrameSender::new`] with an explicit epoch source
    pub fn with_epochs(server: SocketAddr, config: &Config, epochs: EpochCounter) -> Result<Self> {
        let mut sender = Self {
            server,
            socket: None,
            session: Session::disconnected(0),
            epochs,
            next_seq: 0,
            max_payload: config.frames.max_payload_bytes,
            drop_after: config.frames.drop_after(),
            idle_timeout: config.link.frame_idle_timeout(),
            buf: Vec::with_capacity(config.frames.max_payload_bytes + crate::wire::FRAME_HEADER_LEN),
            stats: FrameStats::default(),
        };
        sender.renegotiate(Instant::now())?;
        Ok(sender)
    }

    pub fn session(&self) -> Session {
        self.session
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Local address of the current socket
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|socket| socket.local_addr().ok())
    }

    /// Stamp `image` into the current session and send it without blocking
    pub fn send(&mut self, image: &CapturedImage) -> SendOutcome {
        self.send_at(image, Instant::now())
    }

    /// [`FrameSender::send`] with an explicit clock reading
    pub fn send_at(&mut self, image: &CapturedImage, now: Instant) -> SendOutcome {
        if self.session.is_idle(now, self.idle_timeout) {
            warn!(
                "Frame session {} idle for more than {:?}, opening a new session",
                self.session.epoch, self.idle_timeout
            );
            self.session.disconnect();
        }

        if self.session.state != LinkState::Connected {
            if let Err(e) = self.renegotiate(now) {
                debug!("Frame socket rebind failed: {}", e);
                return self.drop_frame(DropReason::LinkDown);
            }
        }

        if image.payload.len() > self.max_payload {
            return self.drop_frame(DropReason::Oversize { len: image.payload.len(), max: self.max_payload });
        }

        if let Some(limit) = self.drop_after {
            let age = Duration::from_micros(unix_micros().saturating_sub(image.captured_at_us));
            if age > limit {
                return self.drop_frame(DropReason::TooOld { age });
            }
        }

        let Some(socket) = self.socket.as_ref() else {
            return self.drop_frame(DropReason::LinkDown);
        };

        let epoch = self.session.epoch;
        let seq = self.next_seq;
        let frame = Frame::new(epoch, seq, image.captured_at_us, image.payload.clone());
        encode_frame(&frame, &mut self.buf);

        match socket.try_send(&self.buf) {
            Ok(_) => {
                self.next_seq += 1;
                self.session.touch(now);
                self.stats.sent += 1;
                trace!("Sent frame {}:{} ({} bytes)", epoch, seq, self.buf.len());
                SendOutcome::Sent { epoch, seq }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => self.drop_frame(DropReason::Saturated),
            Err(e) => {
                // ECONNREFUSED and friends surface here on a connected UDP socket
                debug!("Frame send to {} failed: {}", self.server, e);
                self.session.disconnect();
                self.socket = None;
                self.drop_frame(DropReason::LinkDown)
            }
        }
    }

    fn drop_frame(&mut self, reason: DropReason) -> SendOutcome {
        self.stats.dropped += 1;
        trace!("Dropped frame: {}", reason.as_str());
        SendOutcome::Dropped(reason)
    }

    /// Rebuild the socket and open a new epoch with sequence numbers from 0
    fn renegotiate(&mut self, now: Instant) -> Result<()> {
        self.session.state = LinkState::Connecting;
        self.socket = None;

        let local: SocketAddr = match self.server {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let std_socket = std::net::UdpSocket::bind(local)
            .map_err(|e| LinkError::io(format!("binding frame socket {local}"), e))?;
        std_socket
            .connect(self.server)
            .map_err(|e| LinkError::io(format!("connecting frame socket to {}", self.server), e))?;
        std_socket
            .set_nonblocking(true)
            .map_err(|e| LinkError::io("configuring frame socket", e))?;
        let socket = UdpSocket::from_std(std_socket)
            .map_err(|e| LinkError::io("registering frame socket", e))?;

        let epoch = self.epochs.next_epoch();
        self.socket = Some(socket);
        self.session = Session::connected(epoch, now);
        self.next_seq = 0;
        self.stats.renegotiations += 1;
        debug!("Frame session {} opened towards {}", epoch, self.server);
        Ok(())
    }
}

/// Vision server side of the frame transport
#[derive(Debug)]
pub struct FrameReceiver {
    socket: UdpSocket,
    gate: SequenceGate,
    session: Session,
    idle_timeout: Duration,
    buf: Vec<u8>,
    stats: FrameStats,
}

impl FrameReceiver {
    /// Bind the receive socket
    pub async fn bind(addr: SocketAddr, config: &Config) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| LinkError::io(format!("binding frame receiver on {addr}"), e))?;

        debug!("Frame receiver listening on {:?}", socket.local_addr());

        Ok(Self {
            socket,
            gate: SequenceGate::new(),
            session: Session::disconnected(0),
            idle_timeout: config.link.frame_idle_timeout(),
            buf: vec![0u8; RECV_BUFFER_LEN],
            stats: FrameStats::default(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(|e| LinkError::io("reading frame receiver address", e))
    }

    pub fn session(&self) -> Session {
        self.session
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Next acceptable frame already waiting on the socket, without blocking
    pub fn receive(&mut self) -> Option<Frame> {
        loop {
            let len = match self.socket.try_recv_from(&mut self.buf) {
                Ok((len, _from)) => len,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return None,
                Err(e) => {
                    debug!("Frame receive failed: {}", e);
                    return None;
                }
            };
            if let Some(frame) = self.accept(len, Instant::now()) {
                return Some(frame);
            }
        }
    }

    /// Wait for the next acceptable frame
    ///
    /// Cancel safe: no datagram is lost if the future is dropped.
    pub async fn recv(&mut self) -> Result<Frame> {
        loop {
            let (len, _from) = self
                .socket
                .recv_from(&mut self.buf)
                .await
                .map_err(|e| LinkError::io("receiving frame datagram", e))?;
            if let Some(frame) = self.accept(len, Instant::now()) {
                return Ok(frame);
            }
        }
    }

    /// Drop the session if nothing arrived within the idle timeout
    ///
    /// Returns true when the session was dropped by this call.
    pub fn check_idle(&mut self, now: Instant) -> bool {
        if !self.session.is_idle(now, self.idle_timeout) {
            return false;
        }
        warn!(
            "No frames in session {} for {:?}, waiting for a new session",
            self.session.epoch, self.idle_timeout
        );
        self.session.disconnect();
        self.gate.reset();
        true
    }

    fn accept(&mut self, len: usize, now: Instant) -> Option<Frame> {
        self.stats.received += 1;
        self.check_idle(now);

        let frame = match decode_frame(&self.buf[..len]) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.malformed += 1;
                trace!("Discarding datagram: {}", e);
                return None;
            }
        };

        match self.gate.admit(frame.epoch, frame.seq) {
            Admission::Accepted => {
                self.session.touch(now);
            }
            Admission::NewEpoch => {
                info!("Frame session {} started", frame.epoch);
                self.session = Session::connected(frame.epoch, now);
            }
            other => {
                self.stats.discarded += 1;
                trace!("Discarding frame {}:{} ({})", frame.epoch, frame.seq, other.as_str());
                return None;
            }
        }

        self.stats.accepted += 1;
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CapturedImage;

    fn loopback_config() -> Config {
        let mut config = Config::default();
        config.frames.drop_after_ms = 0;
        config
    }

    async fn receiver_pair(config: &Config) -> (FrameReceiver, FrameSender) {
        let receiver = FrameReceiver::bind("127.0.0.1:0".parse().unwrap(), config).await.unwrap();
        let sender = FrameSender::with_epochs(
            receiver.local_addr().unwrap(),
            config,
            EpochCounter::starting_at(10),
        )
        .unwrap();
        (receiver, sender)
    }

    async fn recv_one(receiver: &mut FrameReceiver) -> Frame {
        tokio::time::timeout(Duration::from_secs(2), receiver.recv())
            .await
            .expect("frame should arrive")
            .unwrap()
    }

    #[tokio::test]
    async fn frames_arrive_in_order_with_epoch() {
        let config = loopback_config();
        let (mut receiver, mut sender) = receiver_pair(&config).await;

        for i in 0..3u8 {
            let outcome = sender.send(&CapturedImage::now(vec![i; 16]));
            assert_eq!(outcome, SendOutcome::Sent { epoch: 10, seq: i as u64 });
        }

        for i in 0..3u64 {
            let frame = recv_one(&mut receiver).await;
            assert_eq!(frame.epoch, 10);
            assert_eq!(frame.seq, i);
            assert_eq!(frame.payload_len(), 16);
        }
        assert_eq!(receiver.session().epoch, 10);
        assert!(receiver.session().is_connected());
    }

    #[tokio::test]
    async fn oversize_payload_is_dropped() {
        let mut config = loopback_config();
        config.frames.max_payload_bytes = 8;
        let (_receiver, mut sender) = receiver_pair(&config).await;

        let outcome = sender.send(&CapturedImage::now(vec![0; 9]));
        assert_eq!(outcome, SendOutcome::Dropped(DropReason::Oversize { len: 9, max: 8 }));
        assert_eq!(sender.stats().dropped, 1);
    }

    #[tokio::test]
    async fn old_frames_are_dropped_at_send_time() {
        let mut config = loopback_config();
        config.frames.drop_after_ms = 100;
        let (_receiver, mut sender) = receiver_pair(&config).await;

        let stale = CapturedImage { payload: vec![1, 2, 3], captured_at_us: unix_micros() - 1_000_000 };
        assert!(matches!(sender.send(&stale), SendOutcome::Dropped(DropReason::TooOld { .. })));

        let fresh = CapturedImage::now(vec![1, 2, 3]);
        assert!(sender.send(&fresh).is_sent());
    }

    #[tokio::test]
    async fn idle_sender_opens_new_epoch_and_restarts_sequence() {
        let config = loopback_config();
        let (mut receiver, mut sender) = receiver_pair(&config).await;

        let start = Instant::now();
        sender.send_at(&CapturedImage::now(vec![1]), start);
        sender.send_at(&CapturedImage::now(vec![2]), start);

        let later = start + config.link.frame_idle_timeout() + Duration::from_millis(1);
        let outcome = sender.send_at(&CapturedImage::now(vec![3]), later);
        assert_eq!(outcome, SendOutcome::Sent { epoch: 11, seq: 0 });
        assert_eq!(sender.stats().renegotiations, 2);

        let seen: Vec<(u32, u64)> = [
            recv_one(&mut receiver).await,
            recv_one(&mut receiver).await,
            recv_one(&mut receiver).await,
        ]
        .iter()
        .map(|f| (f.epoch, f.seq))
        .collect();
        assert_eq!(seen, vec![(10, 0), (10, 1), (11, 0)]);
    }

    #[tokio::test]
    async fn receiver_discards_replays_and_old_epochs() {
        let config = loopback_config();
        let mut receiver = FrameReceiver::bind("127.0.0.1:0".parse().unwrap(), &config).await.unwrap();
        let target = receiver.local_addr().unwrap();
        let raw = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();

        let mut buf = Vec::new();
        for (epoch, seq) in [(5u32, 3u64), (5, 3), (5, 2), (4, 9), (5, 4), (6, 0)] {
            encode_frame(&Frame::new(epoch, seq, unix_micros(), vec![0xAB]), &mut buf);
            raw.send_to(&buf, target).unwrap();
        }
        raw.send_to(b"not a frame", target).unwrap();

        let accepted: Vec<(u32, u64)> = [
            recv_one(&mut receiver).await,
            recv_one(&mut receiver).await,
            recv_one(&mut receiver).await,
        ]
        .iter()
        .map(|f| (f.epoch, f.seq))
        .collect();
        assert_eq!(accepted, vec![(5, 3), (5, 4), (6, 0)]);

        // the malformed datagram is still queued behind the accepted ones
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(receiver.receive().is_none());

        let stats = receiver.stats();
        assert_eq!(stats.accepted, 3);
        assert_eq!(stats.discarded, 3);
        assert_eq!(stats.malformed, 1);
    }

    #[tokio::test]
    async fn idle_receiver_accepts_any_epoch_afterwards() {
        let config = loopback_config();
        let mut receiver = FrameReceiver::bind("127.0.0.1:0".parse().unwrap(), &config).await.unwrap();
        let target = receiver.local_addr().unwrap();
        let raw = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut buf = Vec::new();

        encode_frame(&Frame::new(50, 0, 0, vec![]), &mut buf);
        raw.send_to(&buf, target).unwrap();
        assert_eq!(recv_one(&mut receiver).await.epoch, 50);

        let later = Instant::now() + config.link.frame_idle_timeout() + Duration::from_millis(1);
        assert!(receiver.check_idle(later));
        assert_eq!(receiver.session().state, LinkState::Disconnected);

        // a restarted edge may come back with a lower epoch
        encode_frame(&Frame::new(7, 0, 0, vec![]), &mut buf);
        raw.send_to(&buf, target).unwrap();
        assert_eq!(recv_one(&mut receiver).await.epoch, 7);
    }

    #[tokio::test]
    async fn non_blocking_receive_returns_none_when_empty() {
        let config = loopback_config();
        let mut receiver = FrameReceiver::bind("127.0.0.1:0".parse().unwrap(), &config).await.unwrap();
        assert!(receiver.receive().is_none());
    }
}

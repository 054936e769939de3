//! Transport session state

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Connection state of a transport session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
        }
    }
}

/// Connection identity of one transport
///
/// Each transport owns its own session. A session is torn down and rebuilt
/// with a fresh epoch on timeout; data tagged with an older epoch is never
/// accepted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    /// Session epoch; strictly increases across reconnects
    pub epoch: u32,

    /// Current connection state
    pub state: LinkState,

    /// Time of the last frame/message sent or received in this session
    pub last_activity: Option<Instant>,
}

impl Session {
    /// A session that has not connected yet
    pub fn disconnected(epoch: u32) -> Self {
        Self { epoch, state: LinkState::Disconnected, last_activity: None }
    }

    /// A freshly established session
    pub fn connected(epoch: u32, now: Instant) -> Self {
        Self { epoch, state: LinkState::Connected, last_activity: Some(now) }
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// Record activity on the session
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = Some(now);
    }

    /// True when a connected session saw no activity for longer than `timeout`
    pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        match (self.state, self.last_activity) {
            (LinkState::Connected, Some(last)) => now.saturating_duration_since(last) > timeout,
            _ => false,
        }
    }

    /// Mark the session as lost, keeping its epoch for reference
    pub fn disconnect(&mut self) {
        self.state = LinkState::Disconnected;
    }
}

/// Monotonic source of session epochs
///
/// Seeded from wall-clock seconds so that a restarted process still produces
/// epochs newer than the ones its peer saw before the restart.
#[derive(Debug, Clone)]
pub struct EpochCounter {
    next: u32,
}

impl EpochCounter {
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as u32)
            .unwrap_or(1);
        Self::starting_at(seed.max(1))
    }

    pub fn starting_at(first: u32) -> Self {
        Self { next: first }
    }

    /// Take the next epoch
    pub fn next_epoch(&mut self) -> u32 {
        let epoch = self.next;
        self.next = self.next.wrapping_add(1).max(1);
        epoch
    }
}

impl Default for EpochCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epochs_increase() {
        let mut counter = EpochCounter::starting_at(41);
        assert_eq!(counter.next_epoch(), 41);
        assert_eq!(counter.next_epoch(), 42);
        assert_eq!(counter.next_epoch(), 43);
    }

    #[tokio::test(start_paused = true)]
    async fn connected_session_goes_idle_after_timeout() {
        let start = Instant::now();
        let session = Session::connected(7, start);
        let timeout = Duration::from_secs(2);

        assert!(!session.is_idle(start + Duration::from_millis(1999), timeout));
        assert!(session.is_idle(start + Duration::from_millis(2001), timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_session_is_never_idle() {
        let session = Session::disconnected(1);
        assert!(!session.is_idle(Instant::now() + Duration::from_secs(60), Duration::from_secs(1)));
    }
}

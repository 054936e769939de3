//! Input liveness watchdog.
//!
//! Tracks last activity for the frame link, the command link and the joystick
//! independently. The per-channel predicate [`Watchdog::is_alive`] and the mode
//! arbiter's freshness checks share [`within_window`], so "alive" means the same
//! thing everywhere.
//!
//! The aggregate [`HealthSnapshot`] is for observability only (operator displays,
//! logs). Control decisions never consult it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::Config;

/// True if `last` is no older than `window` at `now`
///
/// Timestamps in the future (clock skew between tasks) count as fresh.
pub fn within_window(last: Instant, now: Instant, window: Duration) -> bool {
    now.saturating_duration_since(last) <= window
}

/// Monitored input channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Camera frames sent (edge) or received (server)
    Frames,
    /// Commands or heartbeats received over the command link
    Commands,
    /// Operator input from the joystick
    Joystick,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Frames, Channel::Commands, Channel::Joystick];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Frames => "frames",
            Channel::Commands => "commands",
            Channel::Joystick => "joystick",
        }
    }
}

/// Aggregate health of the edge's inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// All channels alive
    Healthy,
    /// At least one channel is down but a control source is still alive
    Degraded,
    /// Neither the joystick nor the command link is alive
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Critical => "critical",
        }
    }
}

/// Health of a single channel at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelHealth {
    pub alive: bool,
    /// Time since the last activity, `None` if the channel was never active
    pub since_last: Option<Duration>,
}

/// A point-in-time snapshot of input health
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub frames: ChannelHealth,
    pub commands: ChannelHealth,
    pub joystick: ChannelHealth,
}

/// Liveness windows per channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogWindows {
    pub frames: Duration,
    pub commands: Duration,
    pub joystick: Duration,
}

impl WatchdogWindows {
    pub fn from_config(config: &Config) -> Self {
        Self {
            frames: config.link.frame_idle_timeout(),
            commands: config.link.command_idle_timeout(),
            joystick: config.freshness.manual(),
        }
    }
}

struct ChannelMonitor {
    window: Duration,
    /// Microseconds since the watchdog base, plus one. Zero means never.
    last_micros: AtomicU64,
}

impl ChannelMonitor {
    fn new(window: Duration) -> Self {
        Self { window, last_micros: AtomicU64::new(0) }
    }
}

/// Per-channel activity tracker
///
/// Lock-free; every input task touches its own channel and any task may read.
pub struct Watchdog {
    base: Instant,
    frames: ChannelMonitor,
    commands: ChannelMonitor,
    joystick: ChannelMonitor,
}

impl Watchdog {
    pub fn new(windows: WatchdogWindows) -> Self {
        Self {
            base: Instant::now(),
            frames: ChannelMonitor::new(windows.frames),
            commands: ChannelMonitor::new(windows.commands),
            joystick: ChannelMonitor::new(windows.joystick),
        }
    }

    fn monitor(&self, channel: Channel) -> &ChannelMonitor {
        match channel {
            Channel::Frames => &self.frames,
            Channel::Commands => &self.commands,
            Channel::Joystick => &self.joystick,
        }
    }

    /// Record activity on `channel` now
    pub fn touch(&self, channel: Channel) {
        self.touch_at(channel, Instant::now());
    }

    /// Record activity on `channel` at an explicit time
    pub fn touch_at(&self, channel: Channel, at: Instant) {
        let micros = at.saturating_duration_since(self.base).as_micros() as u64 + 1;
        self.monitor(channel).last_micros.fetch_max(micros, Ordering::Release);
    }

    /// Time of the last activity on `channel`
    pub fn last_activity(&self, channel: Channel) -> Option<Instant> {
        match self.monitor(channel).last_micros.load(Ordering::Acquire) {
            0 => None,
            micros => Some(self.base + Duration::from_micros(micros - 1)),
        }
    }

    /// Liveness window configured for `channel`
    pub fn window(&self, channel: Channel) -> Duration {
        self.monitor(channel).window
    }

    /// True if `channel` was active within its window at `now`
    pub fn is_alive(&self, channel: Channel, now: Instant) -> bool {
        self.last_activity(channel)
            .is_some_and(|last| within_window(last, now, self.monitor(channel).window))
    }

    fn channel_health(&self, channel: Channel, now: Instant) -> ChannelHealth {
        ChannelHealth {
            alive: self.is_alive(channel, now),
            since_last: self.last_activity(channel).map(|last| now.saturating_duration_since(last)),
        }
    }

    /// Aggregate health at `now`
    pub fn snapshot(&self, now: Instant) -> HealthSnapshot {
        let frames = self.channel_health(Channel::Frames, now);
        let commands = self.channel_health(Channel::Commands, now);
        let joystick = self.channel_health(Channel::Joystick, now);

        let status = if frames.alive && commands.alive && joystick.alive {
            HealthStatus::Healthy
        } else if commands.alive || joystick.alive {
            HealthStatus::Degraded
        } else {
            HealthStatus::Critical
        };

        HealthSnapshot { status, frames, commands, joystick }
    }
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("frames", &self.last_activity(Channel::Frames))
            .field("commands", &self.last_activity(Channel::Commands))
            .field("joystick", &self.last_activity(Channel::Joystick))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn windows() -> WatchdogWindows {
        WatchdogWindows {
            frames: Duration::from_secs(2),
            commands: Duration::from_secs(1),
            joystick: Duration::from_millis(300),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn channels_start_dead() {
        let watchdog = Watchdog::new(windows());
        let now = Instant::now();
        for channel in Channel::ALL {
            assert!(!watchdog.is_alive(channel, now));
            assert!(watchdog.last_activity(channel).is_none());
        }
        assert_eq!(watchdog.snapshot(now).status, HealthStatus::Critical);
    }

    #[tokio::test(start_paused = true)]
    async fn channels_expire_independently() {
        let watchdog = Watchdog::new(windows());
        let start = Instant::now();
        for channel in Channel::ALL {
            watchdog.touch_at(channel, start);
        }

        let later = start + Duration::from_millis(500);
        assert!(watchdog.is_alive(Channel::Frames, later));
        assert!(watchdog.is_alive(Channel::Commands, later));
        assert!(!watchdog.is_alive(Channel::Joystick, later));
        assert_eq!(watchdog.snapshot(later).status, HealthStatus::Degraded);

        let much_later = start + Duration::from_millis(1500);
        assert!(watchdog.is_alive(Channel::Frames, much_later));
        assert!(!watchdog.is_alive(Channel::Commands, much_later));
        assert_eq!(watchdog.snapshot(much_later).status, HealthStatus::Critical);
    }

    #[tokio::test(start_paused = true)]
    async fn all_channels_alive_is_healthy() {
        let watchdog = Watchdog::new(windows());
        let now = Instant::now();
        for channel in Channel::ALL {
            watchdog.touch_at(channel, now);
        }
        let snapshot = watchdog.snapshot(now);
        assert_eq!(snapshot.status, HealthStatus::Healthy);
        assert_eq!(snapshot.joystick.since_last, Some(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn older_touch_does_not_rewind_activity() {
        let watchdog = Watchdog::new(windows());
        let start = Instant::now();
        watchdog.touch_at(Channel::Commands, start + Duration::from_millis(100));
        watchdog.touch_at(Channel::Commands, start + Duration::from_millis(50));
        assert_eq!(
            watchdog.last_activity(Channel::Commands),
            Some(start + Duration::from_millis(100))
        );
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let start = Instant::now();
        let window = Duration::from_millis(300);
        assert!(within_window(start, start + window, window));
        assert!(!within_window(start, start + window + Duration::from_millis(1), window));
        assert!(within_window(start + Duration::from_secs(1), start, window));
    }
}

//! Configuration for the edge controller and the vision server.
//!
//! Both processes read the same YAML document; each uses the sections it
//! needs. Every section and field has a default, so an empty file is a valid
//! configuration for a loopback setup.
//!
//! ```yaml
//! edge:
//!   frame_server: "192.168.11.20:6000"
//!   command_server: "192.168.11.20:5051"
//!   tick_rate_hz: 50
//! freshness:
//!   manual_ms: 300
//!   autonomous_ms: 500
//! link:
//!   backoff_base_ms: 200
//!   backoff_cap_ms: 5000
//! ```

use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::{LinkError, Result};

/// Largest payload that fits in a single UDP datagram after the frame header
pub const MAX_DATAGRAM_PAYLOAD: usize = 65_507 - crate::wire::FRAME_HEADER_LEN;

/// Complete configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub edge: EdgeConfig,
    pub server: ServerConfig,
    pub freshness: FreshnessConfig,
    pub link: LinkConfig,
    pub frames: FrameConfig,
    pub joystick: JoystickConfig,
    pub policy: PolicyConfig,
}

impl Config {
    /// Load and validate a YAML configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| LinkError::config(path, format!("cannot read file: {e}")))?;
        let config = Self::parse(&text).map_err(|details| LinkError::config(path, details))?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate a YAML configuration document
    pub fn from_yaml(text: &str) -> Result<Self> {
        Self::parse(text).map_err(|details| LinkError::config("<inline>", details))
    }

    fn parse(text: &str) -> std::result::Result<Self, String> {
        let config: Config = if text.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml_ng::from_str(text).map_err(|e| e.to_string())?
        };
        config.check()?;
        Ok(config)
    }

    /// Validate value ranges
    pub fn validate(&self) -> Result<()> {
        self.check().map_err(|details| LinkError::config("<in-memory>", details))
    }

    fn check(&self) -> std::result::Result<(), String> {
        let nonzero = [
            ("edge.tick_rate_hz", self.edge.tick_rate_hz as u64),
            ("edge.camera_fps", self.edge.camera_fps as u64),
            ("edge.joystick_poll_hz", self.edge.joystick_poll_hz as u64),
            ("edge.status_interval_ms", self.edge.status_interval_ms),
            ("server.expected_frame_hz", self.server.expected_frame_hz as u64),
            ("server.inference_timeout_ms", self.server.inference_timeout_ms),
            ("server.heartbeat_interval_ms", self.server.heartbeat_interval_ms),
            ("freshness.manual_ms", self.freshness.manual_ms),
            ("freshness.autonomous_ms", self.freshness.autonomous_ms),
            ("link.frame_idle_timeout_ms", self.link.frame_idle_timeout_ms),
            ("link.command_idle_timeout_ms", self.link.command_idle_timeout_ms),
            ("link.connect_timeout_ms", self.link.connect_timeout_ms),
            ("link.backoff_base_ms", self.link.backoff_base_ms),
            ("frames.max_payload_bytes", self.frames.max_payload_bytes as u64),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, value)| *value == 0) {
            return Err(format!("{name} must be greater than zero"));
        }
        if self.link.backoff_cap_ms < self.link.backoff_base_ms {
            return Err("link.backoff_cap_ms must be at least link.backoff_base_ms".to_string());
        }
        if self.frames.max_payload_bytes > MAX_DATAGRAM_PAYLOAD {
            return Err(format!("frames.max_payload_bytes must not exceed {MAX_DATAGRAM_PAYLOAD}"));
        }
        if self.server.heartbeat_interval_ms >= self.link.command_idle_timeout_ms {
            return Err(
                "server.heartbeat_interval_ms must be shorter than link.command_idle_timeout_ms"
                    .to_string(),
            );
        }
        if !(0.0..1.0).contains(&self.joystick.deadzone) {
            return Err("joystick.deadzone must be in [0, 1)".to_string());
        }
        if !(self.policy.slow_proximity < self.policy.stop_proximity) {
            return Err("policy.slow_proximity must be below policy.stop_proximity".to_string());
        }
        Ok(())
    }
}

/// Resolve a configured `host:port` address to its first socket address
pub fn resolve_addr(field: &str, value: &str) -> Result<SocketAddr> {
    value
        .to_socket_addrs()
        .map_err(|e| LinkError::config("<in-memory>", format!("{field}: cannot resolve {value:?}: {e}")))?
        .next()
        .ok_or_else(|| LinkError::config("<in-memory>", format!("{field}: {value:?} resolved to no address")))
}

/// Edge controller settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EdgeConfig {
    /// Vision server frame endpoint (UDP)
    pub frame_server: String,
    /// Vision server command endpoint (TCP)
    pub command_server: String,
    /// Control tick rate
    pub tick_rate_hz: u32,
    /// Camera capture rate
    pub camera_fps: u32,
    /// Joystick poll rate
    pub joystick_poll_hz: u32,
    /// Interval between status reports to the server
    pub status_interval_ms: u64,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            frame_server: "127.0.0.1:6000".to_string(),
            command_server: "127.0.0.1:5051".to_string(),
            tick_rate_hz: 50,
            camera_fps: 20,
            joystick_poll_hz: 100,
            status_interval_ms: 500,
        }
    }
}

impl EdgeConfig {
    pub fn frame_server_addr(&self) -> Result<SocketAddr> {
        resolve_addr("edge.frame_server", &self.frame_server)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }
}

/// Vision server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Frame listen address (UDP)
    pub frame_bind: String,
    /// Command listen address (TCP)
    pub command_bind: String,
    /// Maximum inference rate; `0` processes every frame
    pub max_inference_hz: u32,
    /// Frame rate the edge is expected to stream at
    pub expected_frame_hz: u32,
    /// Inference deadline per frame
    pub inference_timeout_ms: u64,
    /// Heartbeat interval while no command is pending
    pub heartbeat_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            frame_bind: "0.0.0.0:6000".to_string(),
            command_bind: "0.0.0.0:5051".to_string(),
            max_inference_hz: 10,
            expected_frame_hz: 20,
            inference_timeout_ms: 200,
            heartbeat_interval_ms: 100,
        }
    }
}

impl ServerConfig {
    pub fn frame_bind_addr(&self) -> Result<SocketAddr> {
        resolve_addr("server.frame_bind", &self.frame_bind)
    }

    pub fn command_bind_addr(&self) -> Result<SocketAddr> {
        resolve_addr("server.command_bind", &self.command_bind)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// Freshness windows for the two control sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FreshnessConfig {
    pub manual_ms: u64,
    pub autonomous_ms: u64,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self { manual_ms: 300, autonomous_ms: 500 }
    }
}

impl FreshnessConfig {
    pub fn manual(&self) -> Duration {
        Duration::from_millis(self.manual_ms)
    }

    pub fn autonomous(&self) -> Duration {
        Duration::from_millis(self.autonomous_ms)
    }
}

/// Transport liveness and reconnection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
    /// Frame session is renegotiated after this long without traffic
    pub frame_idle_timeout_ms: u64,
    /// Command link is declared dead after this long without a message
    pub command_idle_timeout_ms: u64,
    /// Deadline for a single TCP connect attempt
    pub connect_timeout_ms: u64,
    /// First reconnect delay
    pub backoff_base_ms: u64,
    /// Upper bound on the reconnect delay
    pub backoff_cap_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            frame_idle_timeout_ms: 2000,
            command_idle_timeout_ms: 1000,
            connect_timeout_ms: 1000,
            backoff_base_ms: 200,
            backoff_cap_ms: 5000,
        }
    }
}

impl LinkConfig {
    pub fn frame_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_idle_timeout_ms)
    }

    pub fn command_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.command_idle_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }
}

/// Frame drop policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FrameConfig {
    /// Frames with larger payloads are dropped instead of sent
    pub max_payload_bytes: usize,
    /// Frames older than this at send time are dropped; `0` disables the check
    pub drop_after_ms: u64,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self { max_payload_bytes: 60_000, drop_after_ms: 100 }
    }
}

impl FrameConfig {
    pub fn drop_after(&self) -> Option<Duration> {
        (self.drop_after_ms > 0).then(|| Duration::from_millis(self.drop_after_ms))
    }
}

/// Joystick axis mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JoystickConfig {
    /// Axis index for forward/backward
    pub throttle_axis: usize,
    /// Axis index for left/right
    pub steering_axis: usize,
    /// Throttle axis reports negative values for "forward"
    pub invert_throttle: bool,
    /// Axis magnitudes at or below this are treated as centred
    pub deadzone: f32,
    /// Button that keeps manual control engaged with a centred stick
    pub deadman_button: Option<usize>,
}

impl Default for JoystickConfig {
    fn default() -> Self {
        Self {
            throttle_axis: 1,
            steering_axis: 0,
            invert_throttle: true,
            deadzone: 0.1,
            deadman_button: Some(4),
        }
    }
}

/// Constants for mapping detections to commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    /// Velocity with a clear path
    pub cruise_velocity: f32,
    /// Obstacle proximity at which the robot starts slowing down
    pub slow_proximity: f32,
    /// Obstacle proximity at which an explicit stop is issued
    pub stop_proximity: f32,
    /// Steering magnitude per unit of obstacle proximity
    pub avoid_gain: f32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self { cruise_velocity: 0.5, slow_proximity: 0.4, stop_proximity: 0.8, avoid_gain: 1.2 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().expect("default config should validate");
    }

    #[test]
    fn empty_document_yields_defaults() {
        assert_eq!(Config::from_yaml("").unwrap(), Config::default());
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config = Config::from_yaml(
            "edge:\n  frame_server: \"10.0.0.2:7000\"\n  tick_rate_hz: 20\nfreshness:\n  manual_ms: 250\n",
        )
        .unwrap();
        assert_eq!(config.edge.frame_server, "10.0.0.2:7000");
        assert_eq!(config.edge.tick_rate_hz, 20);
        assert_eq!(config.edge.camera_fps, 20);
        assert_eq!(config.freshness.manual(), Duration::from_millis(250));
        assert_eq!(config.freshness.autonomous(), Duration::from_millis(500));
        assert_eq!(config.link, LinkConfig::default());
    }

    #[test]
    fn zero_tick_rate_is_rejected() {
        let err = Config::from_yaml("edge:\n  tick_rate_hz: 0\n").unwrap_err();
        assert!(err.to_string().contains("<inline>"));
        assert!(matches!(err, LinkError::Config { ref details, .. } if details.contains("tick_rate_hz")));
    }

    #[test]
    fn server_owns_its_expected_frame_rate() {
        let config = Config::from_yaml("edge:\n  camera_fps: 30\nserver:\n  expected_frame_hz: 15\n").unwrap();
        assert_eq!(config.server.expected_frame_hz, 15);
        let err = Config::from_yaml("server:\n  expected_frame_hz: 0\n").unwrap_err();
        assert!(matches!(err, LinkError::Config { ref details, .. } if details.contains("expected_frame_hz")));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(Config::from_yaml("edge:\n  tick_rate: 50\n").is_err());
    }

    #[test]
    fn backoff_cap_below_base_is_rejected() {
        let err = Config::from_yaml("link:\n  backoff_base_ms: 500\n  backoff_cap_ms: 100\n").unwrap_err();
        assert!(matches!(err, LinkError::Config { ref details, .. } if details.contains("backoff_cap_ms")));
    }

    #[test]
    fn heartbeat_must_be_shorter_than_idle_timeout() {
        let err = Config::from_yaml("server:\n  heartbeat_interval_ms: 1000\n").unwrap_err();
        assert!(matches!(err, LinkError::Config { ref details, .. } if details.contains("heartbeat")));
    }

    #[test]
    fn oversized_payload_limit_is_rejected() {
        assert!(Config::from_yaml("frames:\n  max_payload_bytes: 70000\n").is_err());
    }

    #[test]
    fn drop_after_zero_disables_age_check() {
        let config = Config::from_yaml("frames:\n  drop_after_ms: 0\n").unwrap();
        assert_eq!(config.frames.drop_after(), None);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = Config::load("/definitely/not/here/rovelink.yaml").unwrap_err();
        assert!(err.to_string().contains("rovelink.yaml"));
    }

    #[test]
    fn serialized_config_parses_back() {
        let mut config = Config::default();
        config.joystick.deadman_button = None;
        config.server.max_inference_hz = 0;
        let yaml = serde_yaml_ng::to_string(&config).unwrap();
        assert_eq!(Config::from_yaml(&yaml).unwrap(), config);
    }

    #[test]
    fn addresses_resolve() {
        let config = Config::default();
        assert_eq!(config.edge.frame_server_addr().unwrap().port(), 6000);
        assert_eq!(config.server.command_bind_addr().unwrap().port(), 5051);
        assert!(resolve_addr("edge.frame_server", "no-port-here").is_err());
    }
}

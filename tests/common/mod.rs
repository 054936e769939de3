//! Fakes and helpers shared by the integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rovelink::vision::{Detection, Detector};
use rovelink::{
    ActuationSink, Config, EffectiveCommand, Frame, JoystickSource, JoystickState, Result,
};

/// Loopback configuration with short reconnect delays
pub fn loopback_config() -> Config {
    let mut config = Config::default();
    config.server.frame_bind = "127.0.0.1:0".to_string();
    config.server.command_bind = "127.0.0.1:0".to_string();
    config.link.backoff_base_ms = 50;
    config.link.backoff_cap_ms = 200;
    config.frames.drop_after_ms = 0;
    config
}

/// Poll `condition` every 10 ms until it holds or `limit` passes
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Detector that always returns the same detection
pub struct FixedDetector(pub Detection);

#[async_trait::async_trait]
impl Detector for FixedDetector {
    async fn detect(&mut self, _frame: &Frame) -> Result<Detection> {
        Ok(self.0.clone())
    }
}

/// Sink recording every command into shared storage
#[derive(Clone, Default)]
pub struct SharedSink(pub Arc<Mutex<Vec<EffectiveCommand>>>);

impl SharedSink {
    pub fn last(&self) -> Option<EffectiveCommand> {
        self.0.lock().unwrap().last().copied()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

impl ActuationSink for SharedSink {
    fn apply(&mut self, command: EffectiveCommand) -> Result<()> {
        self.0.lock().unwrap().push(command);
        Ok(())
    }
}

/// Joystick whose reading is set from the test
#[derive(Clone, Default)]
pub struct SharedJoystick(pub Arc<Mutex<Option<JoystickState>>>);

impl SharedJoystick {
    pub fn set(&self, state: Option<JoystickState>) {
        *self.0.lock().unwrap() = state;
    }
}

impl JoystickSource for SharedJoystick {
    fn poll(&mut self) -> Option<JoystickState> {
        self.0.lock().unwrap().clone()
    }
}

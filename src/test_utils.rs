//! Scripted collaborators for unit tests and benchmarks
//!
//! Each fake hands out a cloneable handle so a test can steer or inspect it
//! after the fake itself has been moved into a spawned task.

#![cfg(any(test, feature = "benchmark"))]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::actuation::ActuationSink;
use crate::camera::CameraSource;
use crate::config::Config;
use crate::joystick::{JoystickSource, JoystickState};
use crate::types::{CapturedImage, EffectiveCommand, Frame};
use crate::vision::{Detection, Detector};
use crate::{LinkError, Result};

/// Configuration bound to loopback with OS-assigned ports
pub fn loopback_config() -> Config {
    let mut config = Config::default();
    config.server.frame_bind = "127.0.0.1:0".to_string();
    config.server.command_bind = "127.0.0.1:0".to_string();
    config.frames.drop_after_ms = 0;
    config
}

/// Detector that replays a script of results
///
/// `None` entries fail. Once the script runs out the fallback is used.
#[derive(Debug)]
pub struct ScriptedDetector {
    script: VecDeque<Option<Detection>>,
    fallback: Option<Detection>,
    delay: Option<Duration>,
    calls: Arc<AtomicU64>,
}

impl ScriptedDetector {
    pub fn always(detection: Detection) -> Self {
        Self { script: VecDeque::new(), fallback: Some(detection), delay: None, calls: Arc::default() }
    }

    pub fn failing() -> Self {
        Self { script: VecDeque::new(), fallback: None, delay: None, calls: Arc::default() }
    }

    pub fn script(results: Vec<Option<Detection>>, fallback: Detection) -> Self {
        Self { script: results.into(), fallback: Some(fallback), delay: None, calls: Arc::default() }
    }

    /// Wait `delay` before answering each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Shared call counter
    pub fn calls(&self) -> Arc<AtomicU64> {
        self.calls.clone()
    }
}

#[async_trait::async_trait]
impl Detector for ScriptedDetector {
    async fn detect(&mut self, _frame: &Frame) -> Result<Detection> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.pop_front().unwrap_or_else(|| self.fallback.clone());
        next.ok_or_else(|| LinkError::inference("scripted failure"))
    }
}

/// Sink that records every command it receives
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    applied: Arc<Mutex<Vec<EffectiveCommand>>>,
    fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that records and then reports an actuation fault
    pub fn failing() -> Self {
        Self { applied: Arc::default(), fail: true }
    }

    pub fn applied(&self) -> Vec<EffectiveCommand> {
        self.applied.lock().map(|applied| applied.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Option<EffectiveCommand> {
        self.applied.lock().ok().and_then(|applied| applied.last().copied())
    }
}

impl ActuationSink for RecordingSink {
    fn apply(&mut self, command: EffectiveCommand) -> Result<()> {
        if let Ok(mut applied) = self.applied.lock() {
            applied.push(command);
        }
        if self.fail {
            return Err(LinkError::actuation("scripted motor fault"));
        }
        Ok(())
    }
}

/// Joystick whose reading is set from the test
#[derive(Debug, Clone, Default)]
pub struct ScriptedJoystick {
    state: Arc<Mutex<Option<JoystickState>>>,
}

impl ScriptedJoystick {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, state: JoystickState) {
        if let Ok(mut current) = self.state.lock() {
            *current = Some(state);
        }
    }

    /// Simulate the device going away
    pub fn disconnect(&self) {
        if let Ok(mut current) = self.state.lock() {
            *current = None;
        }
    }
}

impl JoystickSource for ScriptedJoystick {
    fn poll(&mut self) -> Option<JoystickState> {
        self.state.lock().ok().and_then(|state| state.clone())
    }
}

/// Camera fed from a channel
#[derive(Debug)]
pub struct ScriptedCamera {
    fps: u32,
    images: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl ScriptedCamera {
    /// Camera plus the sender that feeds it; dropping the sender closes the camera
    pub fn new(fps: u32) -> (Self, mpsc::UnboundedSender<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { fps, images: rx }, tx)
    }
}

#[async_trait::async_trait]
impl CameraSource for ScriptedCamera {
    async fn capture(&mut self) -> Result<Option<CapturedImage>> {
        Ok(self.images.recv().await.map(CapturedImage::now))
    }

    fn fps(&self) -> u32 {
        self.fps
    }
}

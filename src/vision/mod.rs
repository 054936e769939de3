//! Vision decision engine
//!
//! Turns the freshest received frame into an autonomous [`Command`]. Frames are
//! taken from a latest-wins register, so while the detector is busy newer
//! frames simply replace older ones. A failed or slow inference produces no
//! command for that frame; the edge falls back on its freshness windows.

mod detector;
mod policy;

pub use detector::{CenterBiasDetector, Detection, Detector, Obstacle};
pub use policy::SteeringPolicy;

use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::register::{RegisterReader, RegisterWriter, Stamped};
use crate::sequence::SequenceGate;
use crate::stream::ThrottleExt;
use crate::types::{Command, Frame, RateLimit};

/// Counters for the decision engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VisionStats {
    /// Frames handed to the detector
    pub processed: u64,
    /// Frames refused by the sequence gate
    pub skipped: u64,
    /// Detector errors
    pub failed: u64,
    /// Detector calls that exceeded the inference timeout
    pub timed_out: u64,
    /// Commands produced
    pub emitted: u64,
}

/// Detector + policy, gated by frame sequence
pub struct VisionEngine<D> {
    detector: D,
    policy: SteeringPolicy,
    gate: SequenceGate,
    inference_timeout: Duration,
    stats: VisionStats,
}

impl<D: Detector> VisionEngine<D> {
    pub fn new(detector: D, policy: SteeringPolicy, inference_timeout: Duration) -> Self {
        Self { detector, policy, gate: SequenceGate::new(), inference_timeout, stats: VisionStats::default() }
    }

    pub fn from_config(detector: D, config: &Config) -> Self {
        Self::new(detector, SteeringPolicy::new(config.policy.clone()), config.server.inference_timeout())
    }

    pub fn stats(&self) -> VisionStats {
        self.stats
    }

    /// Decide on one frame
    ///
    /// Returns `None` if the frame is not newer than the last processed one in
    /// its session, or if inference fails or times out. Which session is
    /// current is decided by the frame receiver: a frame from any other epoch
    /// restarts the gate, even one with a lower epoch after an edge restart.
    pub async fn process(&mut self, frame: &Frame) -> Option<Command> {
        if let Some(previous) = self.gate.epoch().filter(|&epoch| epoch != frame.epoch) {
            debug!("Frame session changed from {} to {}", previous, frame.epoch);
            self.gate.reset();
        }

        let admission = self.gate.admit(frame.epoch, frame.seq);
        if !admission.is_accepted() {
            self.stats.skipped += 1;
            trace!("Skipping frame {}:{} ({})", frame.epoch, frame.seq, admission.as_str());
            return None;
        }

        self.stats.processed += 1;
        match timeout(self.inference_timeout, self.detector.detect(frame)).await {
            Ok(Ok(detection)) => {
                let command = self.policy.decide(frame, &detection);
                self.stats.emitted += 1;
                trace!(
                    "Frame {}:{} -> v={:.2} s={:.2} ({} obstacles)",
                    frame.epoch,
                    frame.seq,
                    command.velocity,
                    command.steering,
                    detection.obstacles.len()
                );
                Some(command)
            }
            Ok(Err(e)) => {
                self.stats.failed += 1;
                warn!("Inference failed on frame {}:{}: {}", frame.epoch, frame.seq, e);
                None
            }
            Err(_) => {
                self.stats.timed_out += 1;
                warn!(
                    "Inference on frame {}:{} exceeded {:?}",
                    frame.epoch, frame.seq, self.inference_timeout
                );
                None
            }
        }
    }

    /// Process frames from `frames` until cancelled, publishing to `commands`
    ///
    /// `rate` caps the inference rate relative to the expected frame rate
    /// `source_hz`; frames arriving faster are skipped.
    pub async fn run(
        mut self,
        frames: RegisterReader<Frame>,
        commands: RegisterWriter<Command>,
        rate: RateLimit,
        source_hz: f64,
        cancel: CancellationToken,
    ) -> VisionStats {
        let mut stream: Pin<Box<dyn Stream<Item = Stamped<Frame>> + Send>> = match rate.interval(source_hz) {
            Some(period) => {
                debug!("Inference limited to one frame every {:?}", period);
                Box::pin(frames.into_stream().throttle(period))
            }
            None => Box::pin(frames.into_stream()),
        };

        info!("Vision engine started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = stream.next() => match next {
                    Some(stamped) => tokio::select! {
                        _ = cancel.cancelled() => break,
                        decided = self.process(&stamped.value) => {
                            if let Some(command) = decided {
                                commands.publish(command);
                            }
                        }
                    },
                    None => {
                        debug!("Frame register closed");
                        break;
                    }
                },
            }
        }

        info!(
            "Vision engine stopped: {} processed, {} emitted, {} failed, {} timed out, {} skipped",
            self.stats.processed, self.stats.emitted, self.stats.failed, self.stats.timed_out, self.stats.skipped
        );
        self.stats
    }
}

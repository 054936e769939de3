//! Camera capture
//!
//! Capture drivers sit behind [`CameraSource`]. They pace themselves: a call
//! to `capture` returns once the next frame is available.

use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior, interval};

use crate::Result;
use crate::types::{CapturedImage, period_for};

/// Source of encoded camera images
#[async_trait::async_trait]
pub trait CameraSource: Send + 'static {
    /// Wait for the next image
    ///
    /// Returns:
    /// - `Ok(Some(image))` - New image captured
    /// - `Ok(None)` - Camera closed (normal termination)
    /// - `Err(e)` - Capture failed, a later call may succeed
    async fn capture(&mut self) -> Result<Option<CapturedImage>>;

    /// Nominal capture rate in Hz
    fn fps(&self) -> u32;
}

#[async_trait::async_trait]
impl<S: CameraSource + ?Sized> CameraSource for Box<S> {
    async fn capture(&mut self) -> Result<Option<CapturedImage>> {
        (**self).capture().await
    }

    fn fps(&self) -> u32 {
        (**self).fps()
    }
}

/// Grayscale test pattern camera
///
/// Produces `width × height` 8-bit images with a bright vertical bar that
/// sweeps left to right, one column per frame.
#[derive(Debug)]
pub struct SyntheticCamera {
    fps: u32,
    width: usize,
    height: usize,
    bar_width: usize,
    frame: u64,
    ticker: Option<Interval>,
}

impl SyntheticCamera {
    pub const DEFAULT_WIDTH: usize = 64;
    pub const DEFAULT_HEIGHT: usize = 48;

    pub fn new(fps: u32) -> Self {
        Self::with_size(fps, Self::DEFAULT_WIDTH, Self::DEFAULT_HEIGHT)
    }

    pub fn with_size(fps: u32, width: usize, height: usize) -> Self {
        let width = width.max(1);
        Self { fps, width, height: height.max(1), bar_width: (width / 8).max(1), frame: 0, ticker: None }
    }

    pub fn frame_period(&self) -> Duration {
        period_for(self.fps)
    }

    /// Pattern for frame number `frame`
    pub fn render(&self, frame: u64) -> Vec<u8> {
        let bar_start = (frame % self.width as u64) as usize;
        let mut image = vec![32u8; self.width * self.height];
        for row in image.chunks_exact_mut(self.width) {
            for offset in 0..self.bar_width {
                row[(bar_start + offset) % self.width] = 240;
            }
        }
        image
    }
}

#[async_trait::async_trait]
impl CameraSource for SyntheticCamera {
    async fn capture(&mut self) -> Result<Option<CapturedImage>> {
        let period = self.frame_period();
        let ticker = self.ticker.get_or_insert_with(|| {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });
        ticker.tick().await;
        let image = CapturedImage::now(self.render(self.frame));
        self.frame += 1;
        Ok(Some(image))
    }

    fn fps(&self) -> u32 {
        self.fps
    }
}

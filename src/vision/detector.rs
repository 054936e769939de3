//! Detection model boundary

use crate::types::Frame;
use crate::Result;

/// Something in the camera's view the robot should steer around
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Obstacle {
    /// Horizontal position in `[-1, 1]`, negative is left of centre
    pub bearing: f32,
    /// Closeness in `[0, 1]`, where `1` is touching
    pub proximity: f32,
}

/// Model output for one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    pub obstacles: Vec<Obstacle>,
}

impl Detection {
    /// A frame with nothing in the way
    pub fn clear() -> Self {
        Self::default()
    }

    pub fn with_obstacle(bearing: f32, proximity: f32) -> Self {
        Self { obstacles: vec![Obstacle { bearing, proximity }] }
    }

    /// Obstacle with the highest proximity
    pub fn nearest(&self) -> Option<&Obstacle> {
        self.obstacles
            .iter()
            .filter(|o| o.proximity.is_finite() && o.bearing.is_finite())
            .max_by(|a, b| a.proximity.total_cmp(&b.proximity))
    }
}

/// Inference model
#[async_trait::async_trait]
pub trait Detector: Send + 'static {
    async fn detect(&mut self, frame: &Frame) -> Result<Detection>;
}

#[async_trait::async_trait]
impl<D: Detector + ?Sized> Detector for Box<D> {
    async fn detect(&mut self, frame: &Frame) -> Result<Detection> {
        (**self).detect(frame).await
    }
}

/// Brightness heuristic over 8-bit grayscale payloads
///
/// Treats the payload as rows of `width` pixels. Bright pixels are taken to be
/// one obstacle: its bearing is their mean column and its proximity the share
/// of the image they cover, scaled by `gain`.
#[derive(Debug, Clone)]
pub struct CenterBiasDetector {
    width: usize,
    threshold: u8,
    gain: f32,
}

impl CenterBiasDetector {
    pub fn new(width: usize) -> Self {
        Self { width: width.max(1), threshold: 200, gain: 4.0 }
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    /// Run the heuristic on raw pixels
    pub fn analyse(&self, pixels: &[u8]) -> Detection {
        let rows = pixels.len() / self.width;
        if rows == 0 {
            return Detection::clear();
        }

        let mut bright = 0usize;
        let mut column_sum = 0usize;
        for row in pixels.chunks_exact(self.width) {
            for (column, &pixel) in row.iter().enumerate() {
                if pixel >= self.threshold {
                    bright += 1;
                    column_sum += column;
                }
            }
        }
        if bright == 0 {
            return Detection::clear();
        }

        let mean_column = column_sum as f32 / bright as f32;
        let span = (self.width.max(2) - 1) as f32;
        let bearing = (mean_column / span) * 2.0 - 1.0;
        let coverage = bright as f32 / (rows * self.width) as f32;

        Detection::with_obstacle(bearing.clamp(-1.0, 1.0), (coverage * self.gain).clamp(0.0, 1.0))
    }
}

#[async_trait::async_trait]
impl Detector for CenterBiasDetector {
    async fn detect(&mut self, frame: &Frame) -> Result<Detection> {
        Ok(self.analyse(&frame.payload))
    }
}

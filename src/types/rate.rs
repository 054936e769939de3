//! Rate limits for periodic work

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on how often a consumer processes the latest value of a source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RateLimit {
    /// Process every value at the source rate
    Native,

    /// Process at most this many values per second.
    /// If the limit meets or exceeds the source rate, Native is used
    Max(u32),
}

impl RateLimit {
    /// Build a limit from a configured rate where `0` means unlimited
    pub fn from_hz(hz: u32) -> Self {
        if hz == 0 { RateLimit::Native } else { RateLimit::Max(hz) }
    }

    /// Normalize against the source frequency
    pub fn normalize(self, source_hz: f64) -> Self {
        match self {
            RateLimit::Native => RateLimit::Native,
            RateLimit::Max(hz) if hz as f64 >= source_hz => RateLimit::Native,
            RateLimit::Max(hz) => RateLimit::Max(hz),
        }
    }

    /// Minimum spacing between processed values, if throttling is needed
    pub fn interval(self, source_hz: f64) -> Option<Duration> {
        match self.normalize(source_hz) {
            RateLimit::Native => None,
            RateLimit::Max(hz) => Some(Duration::from_secs_f64(1.0 / hz as f64)),
        }
    }
}

/// Period of a fixed-rate loop running at `hz`
pub fn period_for(hz: u32) -> Duration {
    Duration::from_secs_f64(1.0 / hz.max(1) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_at_or_above_source_rate_is_native() {
        assert_eq!(RateLimit::Max(30).normalize(20.0), RateLimit::Native);
        assert_eq!(RateLimit::Max(20).normalize(20.0), RateLimit::Native);
        assert_eq!(RateLimit::Max(10).normalize(20.0), RateLimit::Max(10));
    }

    #[test]
    fn zero_hz_means_unlimited() {
        assert_eq!(RateLimit::from_hz(0), RateLimit::Native);
        assert_eq!(RateLimit::from_hz(0).interval(20.0), None);
    }

    #[test]
    fn interval_matches_limit() {
        assert_eq!(RateLimit::Max(10).interval(30.0), Some(Duration::from_millis(100)));
        assert_eq!(period_for(50), Duration::from_millis(20));
    }
}

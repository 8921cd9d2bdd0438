//! Configuration for transfer engines.

use std::time::Duration;

use crate::planner::{
    SegmentPlanner, DEFAULT_MAX_SEGMENTS, DEFAULT_MIN_SEGMENTS, DEFAULT_MIN_SEGMENT_SIZE,
};

/// Default delay unit for segment retries (1 second).
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Default time without data before an attempt counts as stalled.
pub const DEFAULT_STALL_TIMEOUT_SECS: u64 = 60;

/// Default sink write buffer (64KB).
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Settings shared by every engine an orchestrator creates.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-transfer ceiling on segments and concurrent workers.
    pub max_segments: usize,

    /// Smallest segment the planner will create.
    pub min_segment_size: u64,

    /// Planner floor for resources large enough to split.
    pub min_segments: usize,

    /// Linear backoff unit: attempt `n` waits `n * retry_delay`.
    pub retry_delay: Duration,

    /// An attempt that receives nothing for this long is abandoned.
    pub stall_timeout: Duration,

    /// Cadence of per-segment speed sampling.
    pub speed_interval: Duration,

    /// Cadence of aggregate progress events and persisted progress.
    pub progress_interval: Duration,

    /// Capacity of each sink's write buffer.
    pub buffer_size: usize,

    /// Digest every segment sink after it completes.
    pub segment_digests: bool,

    /// Fail the transfer when the merged digest does not match.
    pub strict_integrity: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_segments: DEFAULT_MAX_SEGMENTS,
            min_segment_size: DEFAULT_MIN_SEGMENT_SIZE,
            min_segments: DEFAULT_MIN_SEGMENTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            stall_timeout: Duration::from_secs(DEFAULT_STALL_TIMEOUT_SECS),
            speed_interval: Duration::from_secs(1),
            progress_interval: Duration::from_secs(1),
            buffer_size: DEFAULT_BUFFER_SIZE,
            segment_digests: false,
            strict_integrity: false,
        }
    }
}

impl EngineConfig {
    /// Planner for a transfer that asked for `segment_hint` segments.
    pub fn planner(&self, segment_hint: usize) -> SegmentPlanner {
        SegmentPlanner::new(self.max_segments, self.min_segment_size)
            .with_min_segments(self.min_segments)
            .capped(segment_hint)
    }

    pub fn with_max_segments(mut self, max: usize) -> Self {
        self.max_segments = max.max(1);
        self
    }

    pub fn with_min_segment_size(mut self, size: u64) -> Self {
        self.min_segment_size = size.max(1);
        self
    }

    pub fn with_min_segments(mut self, min: usize) -> Self {
        self.min_segments = min;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Floored at one millisecond.
    pub fn with_speed_interval(mut self, interval: Duration) -> Self {
        self.speed_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    pub fn with_segment_digests(mut self, enabled: bool) -> Self {
        self.segment_digests = enabled;
        self
    }

    pub fn with_strict_integrity(mut self, strict: bool) -> Self {
        self.strict_integrity = strict;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_segments, 32);
        assert_eq!(config.min_segment_size, 1024 * 1024);
        assert_eq!(config.retry_delay, Duration::from_secs(1));
        assert!(!config.strict_integrity);
    }

    #[test]
    fn test_planner_respects_hint_and_cap() {
        let config = EngineConfig::default().with_max_segments(4);
        assert_eq!(config.planner(8).max_segments, 4);
        assert_eq!(config.planner(2).max_segments, 2);
    }

    #[test]
    fn test_builder_pattern() {
        let config = EngineConfig::default()
            .with_retry_delay(Duration::from_millis(5))
            .with_stall_timeout(Duration::from_secs(2))
            .with_buffer_size(0)
            .with_strict_integrity(true);

        assert_eq!(config.retry_delay, Duration::from_millis(5));
        assert_eq!(config.stall_timeout, Duration::from_secs(2));
        assert_eq!(config.buffer_size, 1);
        assert!(config.strict_integrity);
    }
}

//! Orchestrator configuration.

use crate::engine::{EngineConfig, DEFAULT_EVENT_CAPACITY};

/// Default ceiling on concurrently active transfers.
pub const DEFAULT_MAX_ACTIVE: usize = 10;

/// Default number of transfers that may wait in the queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Transfers allowed in `Active` or `Merging` at once.
    pub max_active: usize,

    /// Submissions beyond this many queued transfers are rejected.
    pub queue_capacity: usize,

    /// Buffered events per subscriber before the slowest one lags.
    pub event_capacity: usize,

    /// Settings for every engine the orchestrator creates.
    pub engine: EngineConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_active: DEFAULT_MAX_ACTIVE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            engine: EngineConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_active(mut self, max: usize) -> Self {
        self.max_active = max.max(1);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_active, 10);
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.engine.max_segments, 32);
    }

    #[test]
    fn test_zero_ceiling_clamped() {
        assert_eq!(OrchestratorConfig::new().with_max_active(0).max_active, 1);
    }
}

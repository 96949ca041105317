//! Scheduler configuration

use std::time::Duration;

/// Default number of rows a task processes before offering to yield
pub const DEFAULT_YIELD_INTERVAL_ROWS: u64 = 128;

/// Default longest slice before a task offers to yield
pub const DEFAULT_MAX_SLICE_MS: u64 = 10;

/// Default wait on the inbox when no task can make progress
pub const DEFAULT_IDLE_WAIT_MS: u64 = 1;

/// Configuration for a cooperative scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Rows processed in one slice before the yield checkpoint suspends
    pub yield_interval_rows: u64,

    /// Slice duration after which the yield checkpoint suspends
    pub max_slice: Duration,

    /// How long the loop sleeps when every ready task is blocked
    pub idle_wait: Duration,

    /// Yield even when no other task is ready
    pub yield_when_idle: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            yield_interval_rows: DEFAULT_YIELD_INTERVAL_ROWS,
            max_slice: Duration::from_millis(DEFAULT_MAX_SLICE_MS),
            idle_wait: Duration::from_millis(DEFAULT_IDLE_WAIT_MS),
            yield_when_idle: false,
        }
    }
}

impl SchedulerConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the yield interval; zero is treated as one row
    pub fn with_yield_interval_rows(mut self, rows: u64) -> Self {
        self.yield_interval_rows = rows.max(1);
        self
    }

    /// Set the maximum slice duration
    pub fn with_max_slice(mut self, max_slice: Duration) -> Self {
        self.max_slice = max_slice;
        self
    }

    /// Set the idle wait
    pub fn with_idle_wait(mut self, idle_wait: Duration) -> Self {
        self.idle_wait = idle_wait;
        self
    }

    /// Yield at every checkpoint interval even with nothing else to run
    pub fn with_yield_when_idle(mut self, enabled: bool) -> Self {
        self.yield_when_idle = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = SchedulerConfig::new()
            .with_yield_interval_rows(0)
            .with_max_slice(Duration::from_millis(5))
            .with_yield_when_idle(true);
        assert_eq!(config.yield_interval_rows, 1);
        assert_eq!(config.max_slice, Duration::from_millis(5));
        assert!(config.yield_when_idle);
        assert_eq!(config.idle_wait, Duration::from_millis(DEFAULT_IDLE_WAIT_MS));
    }
}

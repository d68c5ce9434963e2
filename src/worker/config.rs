//! Worker configuration

use super::retry::RetryPolicy;
use std::time::Duration;

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Time between poller cycles
    pub poll_interval: Duration,

    /// Max items requested from a source per task per cycle
    pub batch_size: usize,

    /// Upper bound on handling one message
    pub handler_timeout: Duration,

    /// How long one receive call waits for a message
    pub receive_wait: Duration,

    /// Sleep after a broker error before trying again
    pub reconnect_interval: Duration,

    /// Deliveries after which a message is dropped instead of requeued
    pub max_deliveries: u32,

    /// Backoff for transient classifier failures
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(300), // 5 minutes
            batch_size: 25,
            handler_timeout: Duration::from_secs(120),
            receive_wait: Duration::from_secs(5),
            reconnect_interval: Duration::from_secs(5),
            max_deliveries: 10,
            retry: RetryPolicy::default(),
        }
    }
}

impl WorkerConfig {
    /// Create a new config builder
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder::default()
    }
}

/// Builder for WorkerConfig
#[derive(Default)]
pub struct WorkerConfigBuilder {
    config: WorkerConfig,
}

impl WorkerConfigBuilder {
    pub fn poll_interval(mut self, duration: Duration) -> Self {
        self.config.poll_interval = duration;
        self
    }

    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.config.poll_interval = Duration::from_secs(secs);
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size.max(1);
        self
    }

    pub fn handler_timeout(mut self, duration: Duration) -> Self {
        self.config.handler_timeout = duration;
        self
    }

    pub fn receive_wait(mut self, duration: Duration) -> Self {
        self.config.receive_wait = duration;
        self
    }

    pub fn reconnect_interval(mut self, duration: Duration) -> Self {
        self.config.reconnect_interval = duration;
        self
    }

    pub fn max_deliveries(mut self, max_deliveries: u32) -> Self {
        self.config.max_deliveries = max_deliveries.max(1);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Build the config
    pub fn build(self) -> WorkerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment_values() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(300));
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.reconnect_interval, Duration::from_secs(5));
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn builder_overrides_and_clamps() {
        let config = WorkerConfig::builder()
            .poll_interval_secs(60)
            .batch_size(0)
            .max_deliveries(0)
            .retry(RetryPolicy::immediate(5))
            .build();
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.max_deliveries, 1);
        assert_eq!(config.retry.max_attempts, 5);
    }
}

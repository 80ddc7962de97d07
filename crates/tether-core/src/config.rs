//! Centralized configuration for the dispatch core.
//!
//! Constants live on holder structs; [`ReconnectConfig`] is the runtime
//! configuration surface for stream recovery.

use std::time::Duration;

/// Stream-level defaults.
pub struct StreamConfig;

impl StreamConfig {
    /// Delay between a stream error and the resubscribe attempt.
    pub const RECONNECT_DELAY: Duration = Duration::from_millis(1000);
}

/// Event loop defaults.
pub struct LoopConfig;

impl LoopConfig {
    pub const THREAD_NAME: &'static str = "tether-loop";
}

/// Worker thread names used by the in-process channel.
pub struct LocalChannelConfig;

impl LocalChannelConfig {
    pub const CALL_THREAD_NAME: &'static str = "tether-local-call";
    pub const STREAM_THREAD_NAME: &'static str = "tether-local-stream";
}

/// Configuration for automatic stream resubscription.
///
/// There is no backoff: every error schedules one attempt after `delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before resubscribing after an error.
    pub delay: Duration,
    /// Maximum consecutive errors (without an intervening message) that are
    /// retried. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: StreamConfig::RECONNECT_DELAY,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the resubscribe delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the retry ceiling.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Whether another attempt is allowed after `attempts` consecutive errors.
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts <= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay, Duration::from_millis(1000));
        assert_eq!(config.max_attempts, None);
        assert!(config.allows(u32::MAX));
    }

    #[test]
    fn test_retry_ceiling() {
        let config = ReconnectConfig::new()
            .with_delay(Duration::from_millis(10))
            .with_max_attempts(2);
        assert!(config.allows(1));
        assert!(config.allows(2));
        assert!(!config.allows(3));
    }
}

//! Channel configuration.

use bookwell_runtime::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Connection settings for an [`EventChannel`](crate::EventChannel).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// WebSocket endpoint, e.g. `ws://localhost:8080/ws`
    pub url: String,
    /// Retries after a failed or lost connection
    pub max_retries: usize,
    /// Pause between retries
    pub retry_interval: Duration,
    /// Limit for a single connection attempt
    pub connect_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            max_retries: 5,
            retry_interval: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ChannelConfig {
    /// Defaults overridden by `BOOKWELL_SOCKET_URL`,
    /// `BOOKWELL_SOCKET_MAX_RETRIES`, `BOOKWELL_SOCKET_RETRY_MS` and
    /// `BOOKWELL_SOCKET_TIMEOUT_MS`
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: env::var("BOOKWELL_SOCKET_URL").unwrap_or(defaults.url),
            max_retries: env::var("BOOKWELL_SOCKET_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            retry_interval: env::var("BOOKWELL_SOCKET_RETRY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.retry_interval, Duration::from_millis),
            connect_timeout: env::var("BOOKWELL_SOCKET_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.connect_timeout, Duration::from_millis),
        }
    }

    /// Set the endpoint
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set the retry bound
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the pause between retries
    #[must_use]
    pub const fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the per-attempt timeout
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Evenly spaced reconnect policy
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_retries, self.retry_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_interval, Duration::from_secs(3));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));

        let policy = config.retry_policy();
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(3));
    }

    #[test]
    fn setters_chain() {
        let config = ChannelConfig::default()
            .with_url("ws://example.test/ws")
            .with_max_retries(2)
            .with_retry_interval(Duration::from_millis(250));
        assert_eq!(config.url, "ws://example.test/ws");
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.retry_policy().delay_for_attempt(0), Duration::from_millis(250));
    }
}

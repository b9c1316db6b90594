//! Configuration types for sessions, work queues and the lifecycle correlator.

use crate::errors::NetpipeError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a work queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue name, used in logs.
    #[serde(default = "default_queue_name")]
    pub name: String,
    /// Maximum number of items running at once. `0` means unbounded.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_queue_name() -> String {
    "netpipe.queue".to_string()
}

fn default_max_concurrency() -> usize {
    1
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl QueueConfig {
    /// Creates a new queue configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue that runs one item at a time.
    #[must_use]
    pub fn sequential(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_concurrency: 1,
        }
    }

    /// Sets the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the concurrency limit. `0` means unbounded.
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Returns true if the queue runs one item at a time.
    #[must_use]
    pub fn is_sequential(&self) -> bool {
        self.max_concurrency == 1
    }
}

/// Configuration for the task lifecycle correlator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatorConfig {
    /// How long an unconsumed record (or a consumed id's tombstone) is kept.
    #[serde(default = "default_record_ttl")]
    pub record_ttl_seconds: f64,
    /// How often the sweeper evicts expired entries.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: f64,
}

fn default_record_ttl() -> f64 {
    300.0
}

fn default_sweep_interval() -> f64 {
    60.0
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            record_ttl_seconds: default_record_ttl(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

impl CorrelatorConfig {
    /// Creates a new correlator configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the record TTL.
    #[must_use]
    pub fn with_record_ttl(mut self, seconds: f64) -> Self {
        self.record_ttl_seconds = seconds;
        self
    }

    /// Sets the sweep interval.
    #[must_use]
    pub fn with_sweep_interval(mut self, seconds: f64) -> Self {
        self.sweep_interval_seconds = seconds;
        self
    }

    /// Gets the record TTL as a Duration.
    #[must_use]
    pub fn record_ttl(&self) -> Duration {
        Duration::from_secs_f64(self.record_ttl_seconds.max(0.0))
    }

    /// Gets the sweep interval as a Duration (at least one millisecond).
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs_f64(self.sweep_interval_seconds.max(0.001))
    }
}

/// Configuration for a [`Session`](crate::session::Session).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session name, used in logs.
    #[serde(default = "default_session_name")]
    pub name: String,
    /// Queue settings for pipelines built by the session.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Correlator settings.
    #[serde(default)]
    pub correlator: CorrelatorConfig,
    /// Whether to log each request as its task starts.
    #[serde(default = "default_log_requests")]
    pub log_requests: bool,
}

fn default_session_name() -> String {
    "netpipe".to_string()
}

fn default_log_requests() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: default_session_name(),
            queue: QueueConfig::default(),
            correlator: CorrelatorConfig::default(),
            log_requests: default_log_requests(),
        }
    }
}

impl SessionConfig {
    /// Creates a new session configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the queue configuration.
    #[must_use]
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Sets the correlator configuration.
    #[must_use]
    pub fn with_correlator(mut self, correlator: CorrelatorConfig) -> Self {
        self.correlator = correlator;
        self
    }

    /// Enables or disables request logging.
    #[must_use]
    pub fn with_log_requests(mut self, enabled: bool) -> Self {
        self.log_requests = enabled;
        self
    }

    /// Parses a configuration from JSON, filling missing fields with defaults.
    pub fn from_json_str(json: &str) -> Result<Self, NetpipeError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration to pretty JSON.
    pub fn to_json(&self) -> Result<String, NetpipeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), NetpipeError> {
        if !self.correlator.record_ttl_seconds.is_finite() || self.correlator.record_ttl_seconds < 0.0 {
            return Err(NetpipeError::Config(format!(
                "correlator.record_ttl_seconds must be a non-negative number, got {}",
                self.correlator.record_ttl_seconds
            )));
        }
        if !self.correlator.sweep_interval_seconds.is_finite()
            || self.correlator.sweep_interval_seconds <= 0.0
        {
            return Err(NetpipeError::Config(format!(
                "correlator.sweep_interval_seconds must be positive, got {}",
                self.correlator.sweep_interval_seconds
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.name, "netpipe");
        assert!(config.queue.is_sequential());
        assert_eq!(config.correlator.record_ttl(), Duration::from_secs(300));
        assert!(config.log_requests);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = SessionConfig::from_json_str(
            r#"{"name": "api", "queue": {"max_concurrency": 4}}"#,
        )
        .unwrap();

        assert_eq!(config.name, "api");
        assert_eq!(config.queue.max_concurrency, 4);
        assert_eq!(config.queue.name, "netpipe.queue");
        assert_eq!(config.correlator, CorrelatorConfig::default());
    }

    #[test]
    fn test_json_roundtrip_preserves_builders() {
        let config = SessionConfig::new()
            .with_name("uploads")
            .with_queue(QueueConfig::sequential("uploads.queue"))
            .with_correlator(CorrelatorConfig::new().with_record_ttl(30.0))
            .with_log_requests(false);

        let parsed = SessionConfig::from_json_str(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_invalid_sweep_interval_rejected() {
        let err = SessionConfig::from_json_str(r#"{"correlator": {"sweep_interval_seconds": 0}}"#)
            .unwrap_err();
        assert!(matches!(err, NetpipeError::Config(_)));
    }

    #[test]
    fn test_malformed_json_is_serialization_error() {
        let err = SessionConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, NetpipeError::Serialization(_)));
    }
}

//! Client configuration structures

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_DELAY_MS,
    DEFAULT_MAX_PARALLEL_BATCHES, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT,
};
use crate::{CourierError, Result};

/// Configuration for a service client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub user_agent: String,
    pub default_headers: BTreeMap<String, String>,
    pub batch: BatchConfig,
    pub backoff: BackoffConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            default_headers: BTreeMap::new(),
            batch: BatchConfig::default(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), ..Self::default() }
    }

    /// Check the values that cannot be expressed in the types
    ///
    /// # Errors
    /// Returns `CourierError::Config` for an empty base URL, a zero batch
    /// size or parallelism, or a base delay larger than the maximum delay.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(CourierError::Config("base_url must not be empty".to_string()));
        }
        if self.batch.max_batch_size == 0 {
            return Err(CourierError::Config("batch.max_batch_size must be at least 1".to_string()));
        }
        if self.batch.max_parallel == 0 {
            return Err(CourierError::Config("batch.max_parallel must be at least 1".to_string()));
        }
        if self.backoff.base_delay_ms > self.backoff.max_delay_ms {
            return Err(CourierError::Config(format!(
                "backoff.base_delay_ms ({}) exceeds backoff.max_delay_ms ({})",
                self.backoff.base_delay_ms, self.backoff.max_delay_ms
            )));
        }
        Ok(())
    }
}

/// Batch transfer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_batch_size: usize,
    /// Chunks transferred concurrently
    pub max_parallel: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { max_batch_size: DEFAULT_MAX_BATCH_SIZE, max_parallel: DEFAULT_MAX_PARALLEL_BATCHES }
    }
}

/// Exponential backoff configuration
///
/// Retries are opt-in: nothing is retried unless `enabled` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub enabled: bool,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_sections() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"base_url": "https://api.example.com"}"#).unwrap();

        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.batch.max_batch_size, 50);
        assert_eq!(config.backoff.max_retries, 3);
        assert!(!config.backoff.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_inconsistent_values() {
        assert!(ClientConfig::default().validate().is_err());

        let mut config = ClientConfig::new("https://api.example.com");
        config.batch.max_batch_size = 0;
        assert!(matches!(config.validate(), Err(CourierError::Config(_))));

        let mut config = ClientConfig::new("https://api.example.com");
        config.backoff.base_delay_ms = 120_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }
}

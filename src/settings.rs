//! Bus settings loaded with the `config` crate.
//!
//! Sources, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. `config/conveyor.{toml,yaml,json,...}` (optional)
//! 3. `CONVEYOR_*` environment variables, e.g. `CONVEYOR_POLL_INTERVAL_MS=250`

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::bus::RetryPolicy;
use crate::message::EnvelopeOptions;
use crate::processor::PollingOptions;

/// Everything a service needs to wire a bus.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub connection_string: String,
    pub default_queue: String,
    pub application_id: Option<String>,
    pub poll_interval_ms: u64,
    pub delete_processed_events: bool,
    pub max_claim_batch: usize,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub include_null_fields: bool,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            connection_string: "sqlite://conveyor.db".to_string(),
            default_queue: "default".to_string(),
            application_id: None,
            poll_interval_ms: 100,
            delete_processed_events: false,
            max_claim_batch: 10,
            retry_attempts: 3,
            retry_base_delay_ms: 200,
            retry_max_delay_ms: 5000,
            include_null_fields: false,
        }
    }
}

impl BusSettings {
    /// Load from `config/conveyor` and `CONVEYOR_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/conveyor").required(false))
            .add_source(Environment::with_prefix("CONVEYOR").try_parsing(true))
            .build()?;
        Self::from_config(config)
    }

    /// Read settings from a caller-built configuration. Missing keys keep
    /// their defaults.
    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        config.try_deserialize()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.retry_attempts)
            .with_base_delay(Duration::from_millis(self.retry_base_delay_ms))
            .with_max_delay(Duration::from_millis(self.retry_max_delay_ms))
    }

    pub fn polling_options(&self) -> PollingOptions {
        PollingOptions::default()
            .with_poll_interval(self.poll_interval())
            .with_batch_size(self.max_claim_batch)
    }

    pub fn envelope_options(&self) -> EnvelopeOptions {
        EnvelopeOptions {
            include_nulls: self.include_null_fields,
        }
    }

    #[cfg(feature = "sqlite")]
    pub fn sqlite_options(&self) -> crate::sqlite::SqliteQueueOptions {
        crate::sqlite::SqliteQueueOptions::new(self.connection_string.clone())
            .with_delete_processed(self.delete_processed_events)
    }
}

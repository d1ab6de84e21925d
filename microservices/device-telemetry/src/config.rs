//! Service configuration

use std::time::Duration;

use telemetry_core::config::env_or;
use telemetry_core::{Result, ServiceConfig, TelemetryError};
use telemetry_docdb::DocDbConfig;

use crate::error::AlarmsError;

/// Minimum spacing between in-progress delete status writes.
pub const DELETE_STATUS_UPDATE_INTERVAL: Duration = Duration::from_secs(30);

/// Alarm storage and delete-by-rule tuning.
#[derive(Debug, Clone)]
pub struct AlarmsConfig {
    pub database: String,
    pub collection: String,
    /// Attempts per batch, including the first.
    pub max_retry_count: u32,
    pub delete_batch_size: usize,
    /// Minimum wall time per batch.
    pub delete_interval: Duration,
    pub status_update_interval: Duration,
    /// How long shutdown waits for running jobs to record a final status.
    pub shutdown_timeout: Duration,
}

impl AlarmsConfig {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
            max_retry_count: 3,
            delete_batch_size: 1000,
            delete_interval: Duration::from_millis(1000),
            status_update_interval: DELETE_STATUS_UPDATE_INTERVAL,
            shutdown_timeout: Duration::from_secs(10),
        }
    }

    pub fn from_env() -> Result<Self> {
        let config = Self {
            database: env_or("ALARMS_DATABASE", "pcs-iothub-stream".to_string())?,
            collection: env_or("ALARMS_COLLECTION", "alarms".to_string())?,
            max_retry_count: env_or("ALARMS_MAX_DELETE_RETRIES", 3)?,
            delete_batch_size: env_or("ALARMS_DELETE_BATCH_SIZE", 1000)?,
            delete_interval: Duration::from_millis(env_or("ALARMS_DELETE_INTERVAL_MSEC", 1000)?),
            status_update_interval: DELETE_STATUS_UPDATE_INTERVAL,
            shutdown_timeout: Duration::from_secs(env_or("ALARMS_SHUTDOWN_TIMEOUT_SECS", 10)?),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_retry_count(mut self, count: u32) -> Self {
        self.max_retry_count = count;
        self
    }

    pub fn with_delete_batch_size(mut self, size: usize) -> Self {
        self.delete_batch_size = size;
        self
    }

    pub fn with_delete_interval(mut self, interval: Duration) -> Self {
        self.delete_interval = interval;
        self
    }

    pub fn with_status_update_interval(mut self, interval: Duration) -> Self {
        self.status_update_interval = interval;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.database.is_empty() || self.collection.is_empty() {
            return Err(AlarmsError::InvalidConfig(
                "Alarm database and collection must be set".into(),
            ));
        }
        if self.max_retry_count == 0 {
            return Err(AlarmsError::InvalidConfig(
                "ALARMS_MAX_DELETE_RETRIES must be at least 1".into(),
            ));
        }
        if self.delete_batch_size == 0 {
            return Err(AlarmsError::InvalidConfig(
                "ALARMS_DELETE_BATCH_SIZE must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Age after which a non-terminal delete status is reported as unknown.
    pub fn stale_after(&self) -> Duration {
        self.status_update_interval * 2
    }
}

/// Everything the service binary needs at startup.
#[derive(Debug, Clone)]
pub struct DeviceTelemetryConfig {
    pub service: ServiceConfig,
    pub http_bind: String,
    pub docdb: DocDbConfig,
    pub alarms: AlarmsConfig,
}

impl DeviceTelemetryConfig {
    pub fn from_env() -> Result<Self> {
        let docdb = DocDbConfig::from_env().map_err(|e| TelemetryError::Config(e.to_string()))?;

        Ok(Self {
            service: ServiceConfig::from_env()?,
            http_bind: env_or("HTTP_BIND", "0.0.0.0:9004".to_string())?,
            docdb,
            alarms: AlarmsConfig::from_env()?,
        })
    }
}

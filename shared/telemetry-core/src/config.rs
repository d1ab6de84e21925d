//! Configuration management for microservices

use crate::error::{Result, TelemetryError};
use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub service_name: String,
    pub log_level: String,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "unknown".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

/// Read `key` from the environment, falling back to `default` when unset.
///
/// A value that is present but does not parse is a configuration error
/// rather than a silent fallback.
pub fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| TelemetryError::Config(format!("Invalid {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_default_when_unset() {
        let value: u32 = env_or("TELEMETRY_CORE_TEST_UNSET_VALUE", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_env_or_rejects_garbage() {
        env::set_var("TELEMETRY_CORE_TEST_GARBAGE", "not-a-number");
        let result: Result<u32> = env_or("TELEMETRY_CORE_TEST_GARBAGE", 1);
        assert!(matches!(result, Err(TelemetryError::Config(_))));
    }
}

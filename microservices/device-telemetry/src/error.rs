//! Alarm service errors

use telemetry_core::TelemetryError;
use telemetry_docdb::DocDbError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AlarmsError>;

#[derive(Debug, Error)]
pub enum AlarmsError {
    /// A caller-supplied identifier failed the allow-list check.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error(transparent)]
    Storage(#[from] DocDbError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<AlarmsError> for TelemetryError {
    fn from(err: AlarmsError) -> Self {
        match err {
            AlarmsError::InvalidInput(msg) => TelemetryError::Validation(msg),
            AlarmsError::InvalidConfig(msg) => TelemetryError::Config(msg),
            AlarmsError::ResourceNotFound(msg) => TelemetryError::NotFound(msg),
            AlarmsError::Storage(DocDbError::NotFound { id }) => TelemetryError::NotFound(id),
            AlarmsError::Storage(e @ DocDbError::Transient { .. }) => TelemetryError::Unavailable(e.to_string()),
            AlarmsError::Storage(e) => TelemetryError::Storage(e.to_string()),
            AlarmsError::Serialization(e) => TelemetryError::Internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_maps_to_http_status() {
        let invalid: TelemetryError = AlarmsError::InvalidInput("rule id".into()).into();
        assert_eq!(invalid.status_code(), 400);

        let missing: TelemetryError = AlarmsError::ResourceNotFound("alarm a1".into()).into();
        assert_eq!(missing.status_code(), 404);

        let throttled: TelemetryError = AlarmsError::Storage(DocDbError::Transient {
            message: "429".into(),
            retry_after: Some(Duration::from_millis(10)),
        })
        .into();
        assert_eq!(throttled.status_code(), 503);

        let fatal: TelemetryError = AlarmsError::Storage(DocDbError::Fatal("400".into())).into();
        assert_eq!(fatal.status_code(), 500);
    }
}

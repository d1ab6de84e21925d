//! Device Telemetry REST API

use std::sync::Arc;

use axum::{
    extract::{FromRef, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use telemetry_core::{HealthStatus, ReadinessStatus, TelemetryError, TelemetryService};
use tracing::warn;
use uuid::Uuid;

use crate::types::{AlarmFilter, AlarmStatus};
use crate::{AlarmsError, AlarmsService};

#[derive(Clone)]
pub struct AppState {
    pub alarms: AlarmsService,
    pub service: Arc<dyn TelemetryService>,
}

impl FromRef<AppState> for Arc<dyn TelemetryService> {
    fn from_ref(state: &AppState) -> Self {
        state.service.clone()
    }
}

/// `service` answers the health and readiness routes.
pub fn create_router(alarms: AlarmsService, service: Arc<dyn TelemetryService>) -> Router {
    let state = AppState { alarms, service };

    Router::new()
        // Health
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Alarms
        .route("/v1/alarms", get(list_alarms))
        .route("/v1/alarms/{id}", get(get_alarm).patch(update_alarm))
        // Alarms by rule
        .route("/v1/alarmsbyrule/{id}", get(list_alarms_by_rule))
        .route("/v1/alarmsbyrule/{id}/count", get(count_alarms_by_rule))
        .route("/v1/alarmsbyrule/{id}/delete", post(delete_alarms_by_rule))
        .route("/v1/deleteoperations/{operation_id}", get(delete_status))
        .with_state(state)
}

async fn health(State(service): State<Arc<dyn TelemetryService>>) -> (StatusCode, Json<HealthStatus>) {
    let status = service.health().await;
    (status_code_for(status.healthy), Json(status))
}

async fn ready(State(service): State<Arc<dyn TelemetryService>>) -> (StatusCode, Json<ReadinessStatus>) {
    let status = service.ready().await;
    if !status.ready {
        warn!(dependencies = ?status.dependencies, "Service not ready");
    }
    (status_code_for(status.ready), Json(status))
}

fn status_code_for(ok: bool) -> StatusCode {
    if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Error body: `{"error": code, "message": text}` with the matching status.
pub struct ApiError(TelemetryError);

impl From<AlarmsError> for ApiError {
    fn from(err: AlarmsError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(error = %self.0, "Request failed");
        }
        let body = serde_json::json!({
            "error": self.0.error_code(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
pub struct AlarmQuery {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    order: Option<String>,
    skip: Option<usize>,
    limit: Option<usize>,
    /// Comma separated device ids.
    devices: Option<String>,
}

impl AlarmQuery {
    pub fn into_filter(self) -> AlarmFilter {
        let devices = self
            .devices
            .as_deref()
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        AlarmFilter {
            from: self.from,
            to: self.to,
            order: self.order,
            skip: self.skip.unwrap_or(0),
            limit: self.limit,
            devices,
        }
    }
}

// Alarm endpoints

async fn list_alarms(
    State(state): State<AppState>,
    Query(query): Query<AlarmQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let alarms = state.alarms.list(&query.into_filter()).await?;
    Ok(Json(serde_json::json!({ "items": alarms })))
}

async fn get_alarm(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let alarm = state.alarms.get(&id).await?;
    Ok(Json(serde_json::json!(alarm)))
}

#[derive(Deserialize)]
struct UpdateAlarmRequest {
    #[serde(rename = "Status", alias = "status")]
    status: String,
}

async fn update_alarm(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateAlarmRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let status: AlarmStatus = req.status.parse()?;
    let alarm = state.alarms.update(&id, status).await?;
    Ok(Json(serde_json::json!(alarm)))
}

// Alarms-by-rule endpoints

async fn list_alarms_by_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<String>,
    Query(query): Query<AlarmQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let alarms = state.alarms.list_by_rule(&rule_id, &query.into_filter()).await?;
    Ok(Json(serde_json::json!({ "items": alarms })))
}

async fn count_alarms_by_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<String>,
    Query(query): Query<AlarmQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let count = state.alarms.get_count_by_rule(&rule_id, &query.into_filter()).await?;
    Ok(Json(serde_json::json!({ "rule_id": rule_id, "count": count })))
}

async fn delete_alarms_by_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<String>,
    Query(query): Query<AlarmQuery>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let handle = state
        .alarms
        .start_delete_by_rule(&rule_id, query.into_filter(), Uuid::new_v4())
        .await?;

    let operation_id = handle.operation_id().to_string();
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "operation_id": operation_id,
            "status_url": format!("/v1/deleteoperations/{}", operation_id),
        })),
    ))
}

async fn delete_status(
    State(state): State<AppState>,
    Path(operation_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let status = state.alarms.get_delete_by_rule_status(&operation_id).await?;
    Ok(Json(serde_json::json!(status)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemetry_core::DependencyStatus;

    struct StubService {
        store_up: bool,
    }

    #[async_trait::async_trait]
    impl TelemetryService for StubService {
        fn service_id(&self) -> &'static str {
            "device-telemetry"
        }

        async fn health(&self) -> HealthStatus {
            HealthStatus {
                healthy: true,
                service_id: self.service_id().to_string(),
                version: self.version().to_string(),
                uptime_seconds: 12,
            }
        }

        async fn ready(&self) -> ReadinessStatus {
            ReadinessStatus {
                ready: self.store_up,
                dependencies: vec![DependencyStatus {
                    name: "documentdb".into(),
                    available: self.store_up,
                    latency_ms: Some(3),
                }],
            }
        }

        async fn shutdown(&self) -> telemetry_core::Result<()> {
            Ok(())
        }

        async fn start(self: Arc<Self>) -> telemetry_core::Result<()> {
            Ok(())
        }
    }

    fn stub(store_up: bool) -> State<Arc<dyn TelemetryService>> {
        let service: Arc<dyn TelemetryService> = Arc::new(StubService { store_up });
        State(service)
    }

    #[tokio::test]
    async fn test_ready_reports_store_outage() {
        let (code, Json(body)) = ready(stub(false)).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body.ready);
        assert_eq!(body.dependencies[0].name, "documentdb");
        assert!(!body.dependencies[0].available);

        let (code, Json(body)) = ready(stub(true)).await;
        assert_eq!(code, StatusCode::OK);
        assert!(body.ready);
    }

    #[tokio::test]
    async fn test_health_reports_service() {
        let (code, Json(body)) = health(stub(false)).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body.service_id, "device-telemetry");
        assert_eq!(body.uptime_seconds, 12);
    }

    #[test]
    fn test_alarm_query_defaults() {
        let filter = AlarmQuery::default().into_filter();
        assert_eq!(filter.skip, 0);
        assert_eq!(filter.limit, None);
        assert!(filter.devices.is_empty());
        assert!(filter.order.is_none());
    }

    #[test]
    fn test_alarm_query_splits_devices() {
        let query = AlarmQuery {
            devices: Some("chiller-01.0, chiller-02.0,,".into()),
            skip: Some(5),
            limit: Some(10),
            ..Default::default()
        };

        let filter = query.into_filter();
        assert_eq!(filter.devices, vec!["chiller-01.0", "chiller-02.0"]);
        assert_eq!(filter.skip, 5);
        assert_eq!(filter.limit, Some(10));
    }

    #[test]
    fn test_error_response_status() {
        let response = ApiError::from(AlarmsError::InvalidInput("bad".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ApiError::from(AlarmsError::ResourceNotFound("alarm a1".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

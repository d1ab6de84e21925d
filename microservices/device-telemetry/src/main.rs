//! Device Telemetry Service
//!
//! Alarm management over a DocumentDB collection:
//! - Alarm listing, lookup and status updates
//! - Per-rule alarm counts
//! - Background delete-by-rule with progress tracking

use std::sync::Arc;
use std::time::Instant;

use device_telemetry::api;
use device_telemetry::{AlarmsService, DeviceTelemetryConfig};
use telemetry_core::{
    DependencyStatus, HealthStatus, MicroserviceRuntime, ReadinessStatus, Result, TelemetryError,
    TelemetryService,
};
use telemetry_docdb::DocumentDbClient;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = DeviceTelemetryConfig::from_env()?;

    let directive = format!("device_telemetry={}", config.service.log_level)
        .parse::<tracing_subscriber::filter::Directive>()
        .map_err(|e| TelemetryError::Config(format!("Invalid LOG_LEVEL: {}", e)))?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .json()
        .init();

    info!("Starting Device Telemetry Service");

    let runtime = MicroserviceRuntime::new(config.service.clone());
    let service = Arc::new(DeviceTelemetryService::new(config)?);
    runtime.run(service).await
}

pub struct DeviceTelemetryService {
    config: DeviceTelemetryConfig,
    storage: DocumentDbClient,
    alarms: AlarmsService,
    start_time: Instant,
}

impl DeviceTelemetryService {
    pub fn new(config: DeviceTelemetryConfig) -> Result<Self> {
        let storage = DocumentDbClient::new(config.docdb.clone())
            .map_err(|e| TelemetryError::Config(e.to_string()))?;
        let alarms = AlarmsService::new(Arc::new(storage.clone()), config.alarms.clone())?;

        info!(
            endpoint = %storage.endpoint(),
            database = %config.alarms.database,
            collection = %config.alarms.collection,
            "Alarm storage configured"
        );

        Ok(Self {
            config,
            storage,
            alarms,
            start_time: Instant::now(),
        })
    }
}

#[async_trait::async_trait]
impl TelemetryService for DeviceTelemetryService {
    fn service_id(&self) -> &'static str {
        "device-telemetry"
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus {
            healthy: true,
            service_id: self.service_id().to_string(),
            version: self.version().to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    async fn ready(&self) -> ReadinessStatus {
        let ping_started = Instant::now();
        let available = self.storage.is_healthy().await;

        ReadinessStatus {
            ready: available,
            dependencies: vec![DependencyStatus {
                name: "documentdb".to_string(),
                available,
                latency_ms: Some(ping_started.elapsed().as_millis() as u64),
            }],
        }
    }

    async fn shutdown(&self) -> Result<()> {
        info!("Shutting down Device Telemetry Service");
        let drained = self.alarms.shutdown().await;
        info!(drained, "Delete jobs stopped");
        Ok(())
    }

    async fn start(self: Arc<Self>) -> Result<()> {
        info!(http = %self.config.http_bind, "Starting Device Telemetry HTTP server");

        let router = api::rest::create_router(self.alarms.clone(), self.clone());
        let listener = tokio::net::TcpListener::bind(&self.config.http_bind).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}

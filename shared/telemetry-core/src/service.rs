//! Service lifecycle: health payloads, startup and signal-driven drain

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::signal;
use tracing::{error, info, warn};

use crate::config::ServiceConfig;
use crate::error::{Result, TelemetryError};

/// Body of the `/health` route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub service_id: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Body of the `/ready` route. `ready` is false when any dependency is down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessStatus {
    pub ready: bool,
    pub dependencies: Vec<DependencyStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub name: String,
    pub available: bool,
    pub latency_ms: Option<u64>,
}

#[async_trait]
pub trait TelemetryService: Send + Sync + 'static {
    fn service_id(&self) -> &'static str;

    fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    async fn health(&self) -> HealthStatus;

    /// Check every backing dependency.
    async fn ready(&self) -> ReadinessStatus;

    /// Stop background work and wait for it to record its outcome.
    async fn shutdown(&self) -> Result<()>;

    /// Serve requests until the listener fails. Receives the shared handle
    /// so routes can call back into `health` and `ready`.
    async fn start(self: Arc<Self>) -> Result<()>;
}

pub struct MicroserviceRuntime {
    config: ServiceConfig,
    started: Instant,
}

impl MicroserviceRuntime {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            started: Instant::now(),
        }
    }

    /// Run `service` until SIGINT or SIGTERM.
    pub async fn run<S: TelemetryService>(self, service: Arc<S>) -> Result<()> {
        self.run_until(service, shutdown_signal()).await
    }

    /// Run `service` until `stop` resolves or the service stops on its own.
    /// `shutdown` is called in both cases before returning. A service that
    /// fails makes the whole run fail.
    pub async fn run_until<S, F>(self, service: Arc<S>, stop: F) -> Result<()>
    where
        S: TelemetryService,
        F: Future<Output = ()> + Send,
    {
        info!(
            service_id = service.service_id(),
            service_name = %self.config.service_name,
            version = service.version(),
            "Starting microservice"
        );

        let mut server = tokio::spawn(service.clone().start());

        let exited = tokio::select! {
            _ = stop => {
                info!("Shutdown signal received, draining background work");
                None
            }
            joined = &mut server => Some(joined),
        };

        if let Err(e) = service.shutdown().await {
            warn!(error = %e, "Error during shutdown");
        }

        let result = match exited {
            None => {
                server.abort();
                Ok(())
            }
            Some(Ok(Ok(()))) => {
                warn!("Service stopped without a shutdown signal");
                Ok(())
            }
            Some(Ok(Err(e))) => {
                error!(error = %e, "Service failed");
                Err(e)
            }
            Some(Err(e)) => Err(TelemetryError::Internal(format!("Service task failed: {}", e))),
        };

        info!(
            uptime_seconds = self.started.elapsed().as_secs(),
            "Microservice stopped"
        );
        result
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    enum Serve {
        Forever,
        Fail,
    }

    struct StubService {
        serve: Serve,
        shutdowns: AtomicUsize,
    }

    impl StubService {
        fn new(serve: Serve) -> Arc<Self> {
            Arc::new(Self {
                serve,
                shutdowns: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TelemetryService for StubService {
        fn service_id(&self) -> &'static str {
            "stub"
        }

        async fn health(&self) -> HealthStatus {
            HealthStatus {
                healthy: true,
                service_id: self.service_id().to_string(),
                version: self.version().to_string(),
                uptime_seconds: 0,
            }
        }

        async fn ready(&self) -> ReadinessStatus {
            ReadinessStatus {
                ready: true,
                dependencies: Vec::new(),
            }
        }

        async fn shutdown(&self) -> Result<()> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn start(self: Arc<Self>) -> Result<()> {
            match self.serve {
                Serve::Forever => std::future::pending().await,
                Serve::Fail => Err(TelemetryError::Network("address in use".into())),
            }
        }
    }

    fn runtime() -> MicroserviceRuntime {
        MicroserviceRuntime::new(ServiceConfig {
            service_name: "stub".into(),
            log_level: "info".into(),
        })
    }

    #[tokio::test]
    async fn test_stop_signal_drains_service() {
        let service = StubService::new(Serve::Forever);

        let result = runtime()
            .run_until(service.clone(), tokio::time::sleep(Duration::from_millis(10)))
            .await;

        assert!(result.is_ok());
        assert_eq!(service.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_service_still_drains() {
        let service = StubService::new(Serve::Fail);

        let result = runtime()
            .run_until(service.clone(), std::future::pending())
            .await;

        assert!(matches!(result, Err(TelemetryError::Network(_))));
        assert_eq!(service.shutdowns.load(Ordering::SeqCst), 1);
    }
}

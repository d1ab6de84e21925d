//! Telemetry Core - Shared service infrastructure
//!
//! This crate provides:
//! - Standard service trait every telemetry microservice implements
//! - Error type with HTTP status mapping
//! - Environment-driven configuration

pub mod config;
pub mod error;
pub mod service;

pub use config::ServiceConfig;
pub use error::{Result, TelemetryError};
pub use service::{DependencyStatus, HealthStatus, MicroserviceRuntime, ReadinessStatus, TelemetryService};

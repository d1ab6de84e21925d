//! Device Telemetry Service
//!
//! Alarm records stored in a DocumentDB collection:
//! - Filtered, paged alarm listings and per-rule counts
//! - Alarm status updates
//! - Background delete-by-rule jobs with batching, retry and progress tracking
//! - Injection-safe SQL construction for every caller-supplied identifier

pub mod alarms;
pub mod api;
pub mod config;
pub mod error;
pub mod query;
pub mod types;


pub use alarms::{AlarmsService, DeleteJobHandle};
pub use config::{AlarmsConfig, DeviceTelemetryConfig};
pub use error::{AlarmsError, Result};
pub use types::*;

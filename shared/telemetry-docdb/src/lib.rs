//! Telemetry DocumentDB Client
//!
//! SQL-API document store access for telemetry services.
//! Provides the `StorageClient` abstraction, an HTTP implementation with
//! master-key request signing, and a tagged error type that separates
//! missing documents from throttling and unrecoverable failures.

mod auth;
mod client;
mod config;
mod error;
mod types;

pub use auth::master_key_token;
pub use client::{DocumentDbClient, StorageClient};
pub use config::DocDbConfig;
pub use error::{DocDbError, Result};
pub use types::*;

//! Connection configuration for DocumentDB

use std::fmt;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::{DocDbError, Result};

/// Account endpoint, decoded master key and request tuning.
#[derive(Clone)]
pub struct DocDbConfig {
    pub endpoint: String,
    pub account_key: Vec<u8>,
    pub request_timeout: Duration,
    pub max_item_count: u32,
}

impl fmt::Debug for DocDbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocDbConfig")
            .field("endpoint", &self.endpoint)
            .field("account_key", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .field("max_item_count", &self.max_item_count)
            .finish()
    }
}

impl DocDbConfig {
    /// Parse `AccountEndpoint=https://…;AccountKey=…;`.
    pub fn from_connection_string(conn: &str) -> Result<Self> {
        let mut endpoint = None;
        let mut key = None;

        for part in conn.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, value) = part.split_once('=').ok_or_else(|| {
                DocDbError::Configuration("Malformed connection string segment".to_string())
            })?;
            match name.trim().to_ascii_lowercase().as_str() {
                "accountendpoint" => endpoint = Some(value.trim().trim_end_matches('/').to_string()),
                "accountkey" => key = Some(value.trim().to_string()),
                _ => {}
            }
        }

        let endpoint = endpoint
            .filter(|e| !e.is_empty())
            .ok_or_else(|| DocDbError::Configuration("AccountEndpoint is missing".to_string()))?;
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(DocDbError::Configuration(format!(
                "AccountEndpoint must be an http(s) URL, got '{}'",
                endpoint
            )));
        }
        let key = key.ok_or_else(|| DocDbError::Configuration("AccountKey is missing".to_string()))?;
        let account_key = STANDARD
            .decode(key.as_bytes())
            .map_err(|e| DocDbError::Configuration(format!("AccountKey is not valid base64: {}", e)))?;

        Ok(Self {
            endpoint,
            account_key,
            request_timeout: Duration::from_secs(30),
            max_item_count: 1000,
        })
    }

    pub fn from_env() -> Result<Self> {
        let conn = std::env::var("DOCUMENTDB_CONNSTRING")
            .map_err(|_| DocDbError::Configuration("DOCUMENTDB_CONNSTRING is not set".to_string()))?;
        let mut config = Self::from_connection_string(&conn)?;
        if let Some(timeout) = parse_timeout_secs(std::env::var("DOCUMENTDB_TIMEOUT_SECS").ok().as_deref())? {
            config.request_timeout = timeout;
        }
        Ok(config)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// `None` when unset. A value that is set must be a whole number of seconds.
fn parse_timeout_secs(raw: Option<&str>) -> Result<Option<Duration>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(|secs| Some(Duration::from_secs(secs)))
        .map_err(|e| DocDbError::Configuration(format!("Invalid DOCUMENTDB_TIMEOUT_SECS {:?}: {}", raw, e)))
}

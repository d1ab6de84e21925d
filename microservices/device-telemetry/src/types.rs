//! Alarm and delete-status models

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use telemetry_docdb::Document;

use crate::error::AlarmsError;

// Storage property names
pub const ALARM_SCHEMA_KEY: &str = "alarm";
pub const DELETE_STATUS_SCHEMA_KEY: &str = "deleteStatus";
pub const SCHEMA_PROPERTY: &str = "doc.schema";
pub const SCHEMA_VERSION_PROPERTY: &str = "doc.schemaVersion";
pub const MESSAGE_RECEIVED_KEY: &str = "device.msg.received";
pub const RULE_ID_KEY: &str = "rule.id";
pub const DEVICE_ID_KEY: &str = "device.id";
pub const STATUS_KEY: &str = "status";
pub const CREATED_KEY: &str = "created";
pub const MODIFIED_KEY: &str = "modified";

/// Statuses an alarm counts under while it still needs attention.
pub const ACTIVE_ALARM_STATUSES: [&str; 2] = ["open", "acknowledged"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmStatus {
    Open,
    Acknowledged,
    Closed,
}

impl AlarmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmStatus::Open => "open",
            AlarmStatus::Acknowledged => "acknowledged",
            AlarmStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for AlarmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlarmStatus {
    type Err = AlarmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(AlarmStatus::Open),
            "acknowledged" => Ok(AlarmStatus::Acknowledged),
            "closed" => Ok(AlarmStatus::Closed),
            _ => Err(AlarmsError::InvalidInput(format!("Unknown alarm status: {}", s))),
        }
    }
}

/// Caller-facing view of a stored alarm document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alarm {
    pub id: String,
    pub etag: Option<String>,
    pub date_created: Option<DateTime<Utc>>,
    pub date_modified: Option<DateTime<Utc>>,
    pub message_received: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub group_id: Option<String>,
    pub device_id: Option<String>,
    pub status: Option<String>,
    pub rule_id: Option<String>,
    pub rule_severity: Option<String>,
    pub rule_description: Option<String>,
}

impl From<&Document> for Alarm {
    fn from(doc: &Document) -> Self {
        let text = |key: &str| doc.get_str(key).map(str::to_string);
        let millis = |key: &str| doc.get_i64(key).and_then(DateTime::<Utc>::from_timestamp_millis);

        Self {
            id: doc.id.clone(),
            etag: text("_etag"),
            date_created: millis(CREATED_KEY),
            date_modified: millis(MODIFIED_KEY),
            message_received: millis(MESSAGE_RECEIVED_KEY),
            description: text("description"),
            group_id: text("group.id"),
            device_id: text(DEVICE_ID_KEY),
            status: text(STATUS_KEY),
            rule_id: text(RULE_ID_KEY),
            rule_severity: text("rule.severity"),
            rule_description: text("rule.description"),
        }
    }
}

/// Selection shared by list, count and delete operations.
#[derive(Debug, Clone, Default)]
pub struct AlarmFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// `asc` (any case) sorts ascending, anything else descending.
    pub order: Option<String>,
    pub skip: usize,
    /// `None` means every match.
    pub limit: Option<usize>,
    pub devices: Vec<String>,
}

/// Lifecycle of a delete-by-rule operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteState {
    Started,
    #[serde(rename = "In Progress")]
    InProgress,
    Success,
    Failed,
    #[serde(rename = "Nothing to Delete")]
    NothingToDelete,
    Unknown,
}

impl DeleteState {
    pub fn is_running(&self) -> bool {
        matches!(self, DeleteState::Started | DeleteState::InProgress)
    }
}

/// Progress record for one delete-by-rule operation, keyed by operation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteStatus {
    #[serde(rename = "id")]
    pub id: String,
    pub status: DeleteState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records_deleted: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records_left_to_delete: Option<u64>,
}

impl DeleteStatus {
    pub fn started(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: DeleteState::Started,
            timestamp: Some(Utc::now()),
            records_deleted: Some(0),
            records_left_to_delete: None,
        }
    }

    pub fn in_progress(id: &str, deleted: u64, left: u64) -> Self {
        Self {
            id: id.to_string(),
            status: DeleteState::InProgress,
            timestamp: Some(Utc::now()),
            records_deleted: Some(deleted),
            records_left_to_delete: Some(left),
        }
    }

    pub fn finished(id: &str, state: DeleteState, deleted: u64) -> Self {
        Self {
            id: id.to_string(),
            status: state,
            timestamp: Some(Utc::now()),
            records_deleted: Some(deleted),
            records_left_to_delete: None,
        }
    }

    /// Nothing known about the operation, or its record went stale.
    pub fn unknown(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: DeleteState::Unknown,
            timestamp: None,
            records_deleted: None,
            records_left_to_delete: None,
        }
    }

    /// A running operation whose last write is older than `threshold` has
    /// most likely died with its process.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        if !self.status.is_running() {
            return false;
        }
        self.timestamp
            .and_then(|ts| (now - ts).to_std().ok())
            .is_some_and(|age| age > threshold)
    }

    pub fn to_document(&self) -> serde_json::Result<Document> {
        Document::from_value(&StoredDeleteStatus {
            status: self.clone(),
            schema: DELETE_STATUS_SCHEMA_KEY.to_string(),
            schema_version: 1,
        })
    }

    pub fn from_document(doc: &Document) -> serde_json::Result<Self> {
        doc.to_typed::<StoredDeleteStatus>().map(|stored| stored.status)
    }
}

#[derive(Serialize, Deserialize)]
struct StoredDeleteStatus {
    #[serde(flatten)]
    status: DeleteStatus,
    #[serde(rename = "doc.schema", default)]
    schema: String,
    #[serde(rename = "doc.schemaVersion", default)]
    schema_version: u32,
}

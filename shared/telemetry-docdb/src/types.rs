//! Common Types for DocumentDB

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A stored document: its id plus every other top-level property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            properties: Map::new(),
        }
    }

    /// Build a document from any serializable value carrying an `id` field.
    pub fn from_value<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        serde_json::from_value(serde_json::to_value(value)?)
    }

    /// Deserialize the whole document (id included) into `T`.
    pub fn to_typed<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(serde_json::to_value(self)?)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }
}

/// Named query parameter, bound server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParameter {
    pub name: String,
    pub value: Value,
}

impl QueryParameter {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// SQL query text with its ordered parameter bindings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlQuerySpec {
    pub query: String,
    pub parameters: Vec<QueryParameter>,
}

impl SqlQuerySpec {
    pub fn with_parameters(query: impl Into<String>, parameters: Vec<QueryParameter>) -> Self {
        Self {
            query: query.into(),
            parameters,
        }
    }

    /// Value bound to `name`, if the parameter exists.
    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }
}

/// Per-request feed options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub enable_cross_partition_query: bool,
    pub enable_scan_in_query: bool,
    pub max_item_count: Option<u32>,
}

impl QueryOptions {
    /// Fan out across partitions and allow scans on unindexed paths.
    pub fn cross_partition() -> Self {
        Self {
            enable_cross_partition_query: true,
            enable_scan_in_query: true,
            max_item_count: None,
        }
    }
}

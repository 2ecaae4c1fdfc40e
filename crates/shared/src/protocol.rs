//! JSON bodies exchanged with the generic record endpoints.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Draft, Record, RecordId};

/// Record lookup criteria. `equals` maps JSON pointers into the record data
/// (e.g. `/personal/email`) to the value they must hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub equals: BTreeMap<String, Value>,
}

impl SearchFilter {
    pub fn by_id(id: RecordId) -> Self {
        Self {
            id: Some(id),
            equals: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, pointer: impl Into<String>, value: Value) -> Self {
        self.equals.insert(pointer.into(), value);
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        if let Some(id) = &self.id {
            if &record.id != id {
                return false;
            }
        }
        self.equals
            .iter()
            .all(|(pointer, expected)| record.data.pointer(pointer) == Some(expected))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub collection: String,
    #[serde(default)]
    pub filter: SearchFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub records: Vec<Record>,
}

/// Upsert body: `id == None` creates a record, otherwise the record with
/// that id is created or replaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertRequest {
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub data: Draft,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertResponse {
    pub record: Record,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadQuery {
    pub collection: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub path: String,
    pub size_bytes: u64,
}

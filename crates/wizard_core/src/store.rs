use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use shared::{
    domain::{Draft, Record, RecordId},
    protocol::SearchFilter,
};
use tokio::sync::Mutex;

use crate::error::StoreError;

/// Persistence seam of the wizard. `insert` is an upsert: `None` creates a
/// record with a fresh id, `Some(id)` creates or replaces that record.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn search(&self, filter: &SearchFilter) -> Result<Vec<Record>, StoreError>;
    async fn insert(&self, id: Option<&RecordId>, data: &Draft) -> Result<Record, StoreError>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn store(&self, upload: BlobUpload) -> Result<BlobRef, StoreError>;
}

#[derive(Debug, Clone)]
pub struct BlobUpload {
    pub filename: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Where an uploaded blob ended up. Only `path` is meaningful to the draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    pub path: String,
    pub size_bytes: u64,
}

pub struct MissingRecordStore;

#[async_trait]
impl RecordStore for MissingRecordStore {
    async fn search(&self, _filter: &SearchFilter) -> Result<Vec<Record>, StoreError> {
        Err(StoreError::Backend("record store not configured".to_string()))
    }

    async fn insert(&self, _id: Option<&RecordId>, _data: &Draft) -> Result<Record, StoreError> {
        Err(StoreError::Backend("record store not configured".to_string()))
    }
}

pub struct MissingBlobStore;

#[async_trait]
impl BlobStore for MissingBlobStore {
    async fn store(&self, upload: BlobUpload) -> Result<BlobRef, StoreError> {
        Err(StoreError::Backend(format!(
            "blob store not configured; cannot store '{}'",
            upload.filename
        )))
    }
}

#[derive(Default)]
struct MemoryContents {
    records: BTreeMap<RecordId, Record>,
    blobs: BTreeMap<String, Vec<u8>>,
}

/// Process-local store for dry runs and tests.
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    contents: Arc<Mutex<MemoryContents>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, record: Record) {
        self.contents
            .lock()
            .await
            .records
            .insert(record.id.clone(), record);
    }

    pub async fn records(&self) -> Vec<Record> {
        self.contents.lock().await.records.values().cloned().collect()
    }

    pub async fn blob(&self, path: &str) -> Option<Vec<u8>> {
        self.contents.lock().await.blobs.get(path).cloned()
    }

    pub async fn blob_count(&self) -> usize {
        self.contents.lock().await.blobs.len()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn search(&self, filter: &SearchFilter) -> Result<Vec<Record>, StoreError> {
        let contents = self.contents.lock().await;
        Ok(contents
            .records
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect())
    }

    async fn insert(&self, id: Option<&RecordId>, data: &Draft) -> Result<Record, StoreError> {
        let now = Utc::now();
        let id = id.cloned().unwrap_or_else(RecordId::generate);
        let mut contents = self.contents.lock().await;
        let created_at = contents
            .records
            .get(&id)
            .map(|existing| existing.created_at)
            .unwrap_or(now);
        let record = Record {
            id: id.clone(),
            data: data.clone(),
            created_at,
            updated_at: now,
        };
        contents.records.insert(id, record.clone());
        Ok(record)
    }
}

#[async_trait]
impl BlobStore for InMemoryRecordStore {
    async fn store(&self, upload: BlobUpload) -> Result<BlobRef, StoreError> {
        if upload.filename.trim().is_empty() {
            return Err(StoreError::Rejected {
                code: shared::error::ErrorCode::Validation,
                message: "filename must not be empty".to_string(),
            });
        }
        let path = format!("memory/{}-{}", RecordId::generate(), upload.filename);
        let size_bytes = upload.bytes.len() as u64;
        self.contents
            .lock()
            .await
            .blobs
            .insert(path.clone(), upload.bytes);
        Ok(BlobRef { path, size_bytes })
    }
}

/// Uploads `upload` and records the returned path at `group.field` of the
/// patch, so the step can report the attachment like any other field.
pub async fn attach_blob(
    store: &dyn BlobStore,
    patch: &mut Draft,
    group: &str,
    field: &str,
    upload: BlobUpload,
) -> Result<BlobRef, StoreError> {
    let filename = upload.filename.clone();
    let mime_type = upload.mime_type.clone();
    let stored = store.store(upload).await?;

    let mut fields = match patch.get(group) {
        Some(Value::Object(existing)) => existing.clone(),
        _ => Map::new(),
    };
    fields.insert(
        field.to_string(),
        json!({
            "path": stored.path,
            "filename": filename,
            "mime_type": mime_type,
            "size_bytes": stored.size_bytes,
        }),
    );
    patch.insert(group, Value::Object(fields));
    Ok(stored)
}

use async_trait::async_trait;
use shared::{
    domain::{Draft, Record, RecordId},
    protocol::SearchFilter,
};
use storage::Storage;
use tracing::info;

use crate::{
    error::StoreError,
    store::{BlobRef, BlobStore, BlobUpload, RecordStore},
};

/// Record store writing straight into a local SQLite database, for running a
/// wizard without a server.
#[derive(Clone)]
pub struct SqliteRecordStore {
    storage: Storage,
    collection: String,
}

impl SqliteRecordStore {
    pub fn new(storage: Storage, collection: impl Into<String>) -> Self {
        Self {
            storage,
            collection: collection.into(),
        }
    }

    pub async fn initialize(
        database_url: &str,
        collection: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let storage = Storage::new(database_url).await?;
        let store = Self::new(storage, collection);
        info!(%database_url, collection = %store.collection, "opened local record store");
        Ok(store)
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn search(&self, filter: &SearchFilter) -> Result<Vec<Record>, StoreError> {
        Ok(self
            .storage
            .search_records(&self.collection, filter)
            .await?)
    }

    async fn insert(&self, id: Option<&RecordId>, data: &Draft) -> Result<Record, StoreError> {
        Ok(self
            .storage
            .upsert_record(&self.collection, id, data)
            .await?)
    }
}

#[async_trait]
impl BlobStore for SqliteRecordStore {
    async fn store(&self, upload: BlobUpload) -> Result<BlobRef, StoreError> {
        let stored = self
            .storage
            .store_blob(
                &self.collection,
                &upload.filename,
                upload.mime_type.as_deref(),
                &upload.bytes,
            )
            .await?;
        Ok(BlobRef {
            path: stored.path,
            size_bytes: stored.size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use shared::domain::{Mode, StepId};

    use super::*;
    use crate::{controller::WizardController, steps::StepSequence, types::StepOutcome};

    fn patch(value: serde_json::Value) -> Draft {
        Draft::from_value(value).expect("object")
    }

    #[tokio::test]
    async fn create_session_persists_on_terminal_step_and_reopens_for_edit() {
        let temp_root = tempfile::tempdir().expect("tempdir");
        let db_path = temp_root.path().join("wizard.db");
        let database_url = format!("sqlite://{}", db_path.display());
        let store = Arc::new(
            SqliteRecordStore::initialize(&database_url, "contractor_employee")
                .await
                .expect("store"),
        );

        let steps = StepSequence::new(vec![
            shared::domain::Step::new("personal", "Personal"),
            shared::domain::Step::new("bank", "Bank"),
        ])
        .expect("steps");
        let controller = WizardController::new_with_store(steps.clone(), store.clone());
        controller
            .report_step_result(
                &StepId::from("personal"),
                patch(json!({ "personal": { "first_name": "Ann" } })),
                true,
            )
            .await
            .expect("personal");
        let outcome = controller
            .report_step_result(
                &StepId::from("bank"),
                patch(json!({ "bank": { "iban": "DE00" } })),
                true,
            )
            .await
            .expect("bank");
        let StepOutcome::Completed { record } = outcome else {
            panic!("expected completion, got {outcome:?}");
        };

        let listed = store
            .storage()
            .list_records("contractor_employee")
            .await
            .expect("list");
        assert_eq!(listed.len(), 1);

        let editor = WizardController::new_with_store(steps, store.clone());
        editor
            .initialize(Mode::Edit, Some(record.id.clone()))
            .await
            .expect("reopen");
        assert_eq!(editor.draft().pointer("/bank/iban"), Some(&json!("DE00")));
    }

    #[tokio::test]
    async fn blobs_are_stored_under_the_collection() {
        let store = SqliteRecordStore::initialize("sqlite::memory:", "contractor_employee")
            .await
            .expect("store");
        let stored = store
            .store(BlobUpload {
                filename: "cv.pdf".to_string(),
                mime_type: Some("application/pdf".to_string()),
                bytes: b"%PDF-1.7".to_vec(),
            })
            .await
            .expect("store blob");
        assert!(stored.path.starts_with("contractor_employee/"));
        assert!(stored.path.ends_with("-cv.pdf"));
        assert_eq!(stored.size_bytes, 8);
    }
}

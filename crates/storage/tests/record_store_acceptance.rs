use serde_json::json;
use shared::{
    domain::{Draft, RecordId},
    protocol::SearchFilter,
};
use storage::Storage;

#[tokio::test]
async fn records_survive_reopening_the_database_file() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("records.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let id = {
        let storage = Storage::new(&database_url).await.expect("open");
        let data = Draft::from_value(json!({
            "personal": { "first": "Ann", "last": "Lee" },
            "documents": { "passport": "contractor_employee/abc-passport.pdf" }
        }))
        .expect("object");
        let record = storage
            .upsert_record("contractor_employee", None, &data)
            .await
            .expect("insert");
        storage.pool().close().await;
        record.id
    };

    let reopened = Storage::new(&database_url).await.expect("reopen");
    let found = reopened
        .search_records("contractor_employee", &SearchFilter::by_id(id.clone()))
        .await
        .expect("search");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, id);
    assert_eq!(
        found[0].data.pointer("/personal/last"),
        Some(&json!("Lee"))
    );
    assert!(reopened
        .find_record("contractor_employee", &RecordId::from("other"))
        .await
        .expect("find")
        .is_none());
}

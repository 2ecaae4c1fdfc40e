use super::*;
use std::sync::Arc;

use serde_json::json;
use shared::domain::Mode;
use wizard_core::{InMemoryRecordStore, StepSequence};

fn fixtures() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

#[test]
fn parses_every_action_kind() {
    let actions = parse_script(
        r#"[
            { "action": "submit", "step": "bank", "patch": { "bank": {} } },
            { "action": "advance" },
            { "action": "retreat" },
            { "action": "jump", "step": "medical" },
            { "action": "reset" }
        ]"#,
    )
    .expect("parse");
    let names: Vec<&str> = actions.iter().map(ScriptAction::name).collect();
    assert_eq!(names, vec!["submit", "advance", "retreat", "jump", "reset"]);
    assert!(parse_script(r#"[{ "action": "teleport" }]"#).is_err());
}

#[tokio::test]
async fn fixture_session_completes_the_wizard() {
    let dir = fixtures();
    let steps = StepSequence::load(&dir.join("steps.toml")).expect("steps");
    let store = Arc::new(InMemoryRecordStore::new());
    let controller = WizardController::new_with_store(steps, store.clone());
    controller
        .initialize(Mode::Create, None)
        .await
        .expect("initialize");

    let actions = load_script(&dir.join("session.json")).expect("script");
    let reports = run_script(&controller, store.as_ref(), actions, &dir)
        .await
        .expect("run");

    assert_eq!(reports.len(), 7);
    assert!(reports.iter().all(|report| report.error.is_none()));
    assert_eq!(
        reports[0].result.as_ref().and_then(|r| r.pointer("/outcome/outcome")),
        Some(&json!("validation_failed"))
    );
    assert_eq!(
        reports[2].result.as_ref().and_then(|r| r.get("to")),
        Some(&json!("documents"))
    );
    assert_eq!(
        reports[6].result.as_ref().and_then(|r| r.pointer("/outcome/outcome")),
        Some(&json!("completed"))
    );

    let records = store.records().await;
    assert_eq!(records.len(), 1);
    let path = records[0]
        .data
        .pointer("/documents/passport_scan/path")
        .and_then(|value| value.as_str())
        .expect("attachment path");
    assert!(store.blob(path).await.is_some());
}

#[tokio::test]
async fn controller_errors_are_reported_without_stopping_the_run() {
    let controller = WizardController::new_with_store(
        StepSequence::contractor_employee(),
        Arc::new(InMemoryRecordStore::new()),
    );
    let blobs = InMemoryRecordStore::new();
    let actions = parse_script(
        r#"[
            { "action": "submit", "step": "bank", "patch": { "bank": { "iban": "DE00" } } },
            { "action": "jump", "step": "nowhere" },
            { "action": "advance" }
        ]"#,
    )
    .expect("parse");

    let reports = run_script(&controller, &blobs, actions, Path::new("."))
        .await
        .expect("run");
    assert!(reports[0]
        .error
        .as_deref()
        .is_some_and(|err| err.contains("locked")));
    assert!(reports[1].error.is_some());
    assert_eq!(
        reports[2].result.as_ref().and_then(|r| r.get("navigation")),
        Some(&json!("blocked"))
    );
}

#[tokio::test]
async fn refused_submissions_upload_nothing() {
    let dir = fixtures();
    let steps = StepSequence::load(&dir.join("steps.toml")).expect("steps");
    let store = Arc::new(InMemoryRecordStore::new());
    let controller = WizardController::new_with_store(steps, store.clone());
    let actions = parse_script(
        r#"[
            {
                "action": "submit",
                "step": "documents",
                "patch": { "documents": { "passport_no": "X1" } },
                "attachments": [
                    { "group": "documents", "field": "passport_scan", "file": "passport.txt" }
                ],
                "required": ["/documents/passport_scan/path"]
            },
            {
                "action": "submit",
                "step": "personal",
                "patch": { "personal": { "first_name": "Ann" } },
                "attachments": [
                    { "group": "personal", "field": "photo", "file": "passport.txt" }
                ],
                "required": ["/personal/last_name"]
            }
        ]"#,
    )
    .expect("parse");

    let reports = run_script(&controller, store.as_ref(), actions, &dir)
        .await
        .expect("run");

    // documents is locked until personal completes
    assert!(reports[0]
        .error
        .as_deref()
        .is_some_and(|err| err.contains("locked")));
    assert_eq!(
        reports[1].result.as_ref().and_then(|r| r.pointer("/outcome/outcome")),
        Some(&json!("validation_failed"))
    );
    assert_eq!(store.blob_count().await, 0);
    assert!(controller.draft().is_empty());
}

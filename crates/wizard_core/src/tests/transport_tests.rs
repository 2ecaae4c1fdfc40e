use super::*;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode as HttpStatus,
    routing::post,
    Json, Router,
};
use serde_json::json;
use server_api::ApiContext;
use shared::{
    domain::Mode,
    protocol::{SearchRequest, UploadQuery},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};

use crate::{controller::WizardController, steps::StepSequence, store::attach_blob};

type Rejection = (HttpStatus, Json<ApiError>);

fn reject(err: ApiError) -> Rejection {
    let status = match err.code {
        ErrorCode::NotFound => HttpStatus::NOT_FOUND,
        ErrorCode::Validation => HttpStatus::BAD_REQUEST,
        ErrorCode::PayloadTooLarge => HttpStatus::PAYLOAD_TOO_LARGE,
        ErrorCode::Internal => HttpStatus::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}

async fn handle_search(
    State(ctx): State<Arc<ApiContext>>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, Rejection> {
    server_api::search_records(&ctx, req)
        .await
        .map(Json)
        .map_err(reject)
}

async fn handle_insert(
    State(ctx): State<Arc<ApiContext>>,
    Json(req): Json<InsertRequest>,
) -> Result<Json<InsertResponse>, Rejection> {
    server_api::insert_record(&ctx, req)
        .await
        .map(Json)
        .map_err(reject)
}

async fn handle_upload(
    State(ctx): State<Arc<ApiContext>>,
    Query(q): Query<UploadQuery>,
    body: Bytes,
) -> Result<Json<UploadResponse>, Rejection> {
    server_api::store_upload(&ctx, q, &body)
        .await
        .map(Json)
        .map_err(reject)
}

async fn spawn_record_server() -> (String, storage::Storage) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let storage = storage::Storage::new("sqlite::memory:")
        .await
        .expect("storage");
    let ctx = Arc::new(ApiContext {
        storage: storage.clone(),
    });
    let app = Router::new()
        .route("/api/search", post(handle_search))
        .route("/api/insert", post(handle_insert))
        .route("/api/upload", post(handle_upload))
        .with_state(ctx);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), storage)
}

#[test]
fn base_url_gets_trailing_slash_and_rejects_other_schemes() {
    let url = normalize_base_url(" http://localhost:8080/app ").expect("url");
    assert_eq!(url.as_str(), "http://localhost:8080/app/");
    assert_eq!(
        url.join("api/search").expect("join").as_str(),
        "http://localhost:8080/app/api/search"
    );

    assert!(matches!(
        normalize_base_url("ftp://localhost"),
        Err(StoreError::InvalidEndpoint(_))
    ));
    assert!(matches!(
        normalize_base_url("not a url"),
        Err(StoreError::InvalidEndpoint(_))
    ));
}

#[tokio::test]
async fn insert_and_search_round_trip_through_the_server() {
    let (server_url, _storage) = spawn_record_server().await;
    let store = HttpRecordStore::new(&server_url, "contractor_employee").expect("store");

    let data = Draft::from_value(json!({ "personal": { "first_name": "Ann" } })).expect("object");
    let created = store.insert(None, &data).await.expect("create");
    assert_eq!(created.data, data);

    let found = store
        .search(&SearchFilter::by_id(created.id.clone()))
        .await
        .expect("search");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, created.id);

    let by_field = store
        .search(&SearchFilter::default().with_field("/personal/first_name", json!("Ann")))
        .await
        .expect("search by field");
    assert_eq!(by_field.len(), 1);

    let none = store
        .search(&SearchFilter::by_id(RecordId::from("missing")))
        .await
        .expect("search missing");
    assert!(none.is_empty());
}

#[tokio::test]
async fn server_validation_errors_surface_as_rejections() {
    let (server_url, _storage) = spawn_record_server().await;
    let store = HttpRecordStore::new(&server_url, "bad collection").expect("store");

    let err = store
        .search(&SearchFilter::default())
        .await
        .expect_err("invalid collection");
    assert!(matches!(
        err,
        StoreError::Rejected {
            code: ErrorCode::Validation,
            ..
        }
    ));
}

#[tokio::test]
async fn unknown_routes_map_to_not_found() {
    let (server_url, _storage) = spawn_record_server().await;
    let store =
        HttpRecordStore::new(&format!("{server_url}/nowhere"), "contractor_employee").expect("store");
    let err = store
        .insert(None, &Draft::new())
        .await
        .expect_err("missing route");
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let store = HttpRecordStore::with_timeout(
        &format!("http://{addr}"),
        "contractor_employee",
        Duration::from_secs(2),
    )
    .expect("store");
    let err = store
        .search(&SearchFilter::default())
        .await
        .expect_err("connection refused");
    assert!(matches!(err, StoreError::Transport(_)));
}

/// Answers one request with a 500 whose body is cut short.
async fn spawn_truncating_server() -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let Ok(read) = socket.read(&mut buf).await else {
                return;
            };
            if read == 0 {
                return;
            }
            request.extend_from_slice(&buf[..read]);
            let text = String::from_utf8_lossy(&request).to_ascii_lowercase();
            let Some(head_end) = text.find("\r\n\r\n") else {
                continue;
            };
            let body_len = text[..head_end]
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if request.len() >= head_end + 4 + body_len {
                break;
            }
        }
        let _ = socket
            .write_all(
                b"HTTP/1.1 500 Internal Server Error\r\n\
                  content-type: application/json\r\n\
                  content-length: 64\r\n\r\n{\"code\":",
            )
            .await;
        let _ = socket.shutdown().await;
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn truncated_error_body_is_a_transport_error() {
    let server_url = spawn_truncating_server().await;
    let store = HttpRecordStore::with_timeout(
        &server_url,
        "contractor_employee",
        Duration::from_secs(5),
    )
    .expect("store");

    let err = store
        .search(&SearchFilter::default())
        .await
        .expect_err("truncated body");
    match err {
        StoreError::Transport(message) => assert!(message.contains("response body"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn uploads_return_a_path_the_server_can_load() {
    let (server_url, storage) = spawn_record_server().await;
    let store = HttpRecordStore::new(&server_url, "contractor_employee").expect("store");

    let mut patch = Draft::new();
    let stored = attach_blob(
        &store,
        &mut patch,
        "documents",
        "id_card",
        BlobUpload {
            filename: "id card.png".to_string(),
            mime_type: Some("image/png".to_string()),
            bytes: vec![0x89, b'P', b'N', b'G'],
        },
    )
    .await
    .expect("upload");

    assert!(stored.path.starts_with("contractor_employee/"));
    assert_eq!(stored.size_bytes, 4);
    let loaded = storage
        .load_blob(&stored.path)
        .await
        .expect("load")
        .expect("blob exists");
    assert_eq!(loaded.blob.filename, "id card.png");
    assert_eq!(loaded.blob.mime_type.as_deref(), Some("image/png"));
    assert_eq!(
        patch.pointer("/documents/id_card/path"),
        Some(&json!(stored.path))
    );

    let err = store
        .store(BlobUpload {
            filename: "../escape.txt".to_string(),
            mime_type: None,
            bytes: b"x".to_vec(),
        })
        .await
        .expect_err("path separator");
    assert!(matches!(err, StoreError::Rejected { .. }));
}

#[tokio::test]
async fn edit_session_writes_through_the_http_store() {
    let (server_url, _storage) = spawn_record_server().await;
    let store = Arc::new(HttpRecordStore::new(&server_url, "contractor_employee").expect("store"));
    let seeded = store
        .insert(
            None,
            &Draft::from_value(json!({ "personal": { "first_name": "Ann" } })).expect("object"),
        )
        .await
        .expect("seed");

    let controller =
        WizardController::new_with_store(StepSequence::contractor_employee(), store.clone());
    controller
        .initialize(Mode::Edit, Some(seeded.id.clone()))
        .await
        .expect("initialize");
    controller
        .report_step_result(
            &shared::domain::StepId::from("bank"),
            Draft::from_value(json!({ "bank": { "iban": "DE00" } })).expect("object"),
            true,
        )
        .await
        .expect("save bank");

    let found = store
        .search(&SearchFilter::by_id(seeded.id))
        .await
        .expect("search");
    assert_eq!(found[0].data.pointer("/bank/iban"), Some(&json!("DE00")));
    assert_eq!(
        found[0].data.pointer("/personal/first_name"),
        Some(&json!("Ann"))
    );
}

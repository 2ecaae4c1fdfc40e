use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use server_api::{insert_record, load_upload, search_records, store_upload, ApiContext};
use shared::{
    error::{ApiError, ErrorCode},
    protocol::{
        InsertRequest, InsertResponse, SearchRequest, SearchResponse, UploadQuery, UploadResponse,
    },
};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, prepare_database_url};

/// Slack above the upload cap so JSON envelopes around large drafts still fit.
const BODY_LIMIT_BYTES: usize = server_api::MAX_UPLOAD_BYTES + 64 * 1024;

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = load_settings()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter)),
        )
        .init();

    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let state = AppState {
        api: ApiContext { storage },
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.bind_addr.parse()?;
    info!(%addr, "record server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for shutdown signal");
    }
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/search", post(http_search))
        .route("/api/insert", post(http_insert))
        .route("/api/upload", post(http_upload))
        .route("/api/uploads/*path", get(http_download))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT_BYTES))
        .with_state(state)
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = status_for(err.code);
    if status.is_server_error() {
        error!(message = %err.message, "request failed");
    }
    (status, Json(err))
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.api.storage.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(error) => {
            warn!(%error, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "storage unavailable")
        }
    }
}

async fn http_search(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchRequest>,
) -> ApiResult<Json<SearchResponse>> {
    search_records(&state.api, req).await.map(Json).map_err(reject)
}

async fn http_insert(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InsertRequest>,
) -> ApiResult<Json<InsertResponse>> {
    insert_record(&state.api, req).await.map(Json).map_err(reject)
}

async fn http_upload(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UploadQuery>,
    body: Bytes,
) -> ApiResult<Json<UploadResponse>> {
    store_upload(&state.api, q, &body).await.map(Json).map_err(reject)
}

async fn http_download(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let upload = load_upload(&state.api, &path).await.map_err(reject)?;

    let mut headers = HeaderMap::new();
    let content_type = upload
        .blob
        .mime_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if let Ok(value) =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", upload.blob.filename))
    {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok((StatusCode::OK, headers, upload.content))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;

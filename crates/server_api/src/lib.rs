use shared::{
    error::{ApiError, ErrorCode},
    protocol::{
        InsertRequest, InsertResponse, SearchRequest, SearchResponse, UploadQuery, UploadResponse,
    },
};
use storage::{BlobContent, Storage};
use tracing::info;

pub const MAX_UPLOAD_BYTES: usize = 8 * 1024 * 1024;
pub const MAX_FILENAME_BYTES: usize = 180;
const MAX_COLLECTION_BYTES: usize = 64;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

pub async fn search_records(
    ctx: &ApiContext,
    request: SearchRequest,
) -> Result<SearchResponse, ApiError> {
    validate_collection(&request.collection)?;
    let records = ctx
        .storage
        .search_records(&request.collection, &request.filter)
        .await
        .map_err(internal)?;
    Ok(SearchResponse { records })
}

pub async fn insert_record(
    ctx: &ApiContext,
    request: InsertRequest,
) -> Result<InsertResponse, ApiError> {
    validate_collection(&request.collection)?;
    if let Some(id) = &request.id {
        if id.as_str().trim().is_empty() {
            return Err(ApiError::validation("record id must not be blank"));
        }
    }
    let record = ctx
        .storage
        .upsert_record(&request.collection, request.id.as_ref(), &request.data)
        .await
        .map_err(internal)?;
    info!(
        collection = %request.collection,
        record_id = %record.id,
        created = request.id.is_none(),
        "record upserted"
    );
    Ok(InsertResponse { record })
}

pub async fn store_upload(
    ctx: &ApiContext,
    query: UploadQuery,
    body: &[u8],
) -> Result<UploadResponse, ApiError> {
    validate_collection(&query.collection)?;
    if body.is_empty() {
        return Err(ApiError::validation("upload body cannot be empty"));
    }
    if body.len() > MAX_UPLOAD_BYTES {
        return Err(ApiError::new(
            ErrorCode::PayloadTooLarge,
            format!("upload exceeds {MAX_UPLOAD_BYTES} bytes"),
        ));
    }

    let filename = query.filename.trim();
    if filename.is_empty() {
        return Err(ApiError::validation("filename is required"));
    }
    if filename.len() > MAX_FILENAME_BYTES {
        return Err(ApiError::validation("filename is too long"));
    }
    if filename.contains('/') || filename.contains('\\') {
        return Err(ApiError::validation(
            "filename must not contain path separators",
        ));
    }

    let mime_type = query
        .mime_type
        .as_deref()
        .map(str::trim)
        .filter(|mime| !mime.is_empty());
    let stored = ctx
        .storage
        .store_blob(&query.collection, filename, mime_type, body)
        .await
        .map_err(internal)?;
    info!(path = %stored.path, size_bytes = stored.size_bytes, "upload stored");
    Ok(UploadResponse {
        path: stored.path,
        size_bytes: stored.size_bytes,
    })
}

pub async fn load_upload(ctx: &ApiContext, path: &str) -> Result<BlobContent, ApiError> {
    ctx.storage
        .load_blob(path)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("upload not found"))
}

fn validate_collection(collection: &str) -> Result<(), ApiError> {
    let valid = !collection.is_empty()
        && collection.len() <= MAX_COLLECTION_BYTES
        && collection
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ApiError::validation(format!(
            "invalid collection name '{collection}'"
        )))
    }
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::internal(err.to_string())
}

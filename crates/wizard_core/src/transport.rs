use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{Draft, Record, RecordId},
    error::{ApiError, ErrorCode},
    protocol::{
        InsertRequest, InsertResponse, SearchFilter, SearchRequest, SearchResponse, UploadResponse,
    },
};
use tracing::debug;
use url::Url;

use crate::{
    error::StoreError,
    store::{BlobRef, BlobStore, BlobUpload, RecordStore},
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Record and blob store backed by the server's JSON endpoints.
#[derive(Clone)]
pub struct HttpRecordStore {
    http: Client,
    base_url: Url,
    collection: String,
}

impl HttpRecordStore {
    pub fn new(base_url: &str, collection: impl Into<String>) -> Result<Self, StoreError> {
        Self::with_timeout(base_url, collection, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        collection: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: normalize_base_url(base_url)?,
            collection: collection.into(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn endpoint(&self, path: &str) -> Result<Url, StoreError> {
        self.base_url
            .join(path)
            .map_err(|err| StoreError::InvalidEndpoint(format!("{path}: {err}")))
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, StoreError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        debug!(%url, "posting store request");
        let response = self.http.post(url).json(body).send().await?;
        Ok(check_status(response).await?.json().await?)
    }
}

/// Accepts `http`/`https` URLs and makes sure relative joins keep any path
/// prefix (`http://host/app` joins as `http://host/app/api/...`).
pub fn normalize_base_url(raw: &str) -> Result<Url, StoreError> {
    let trimmed = raw.trim();
    let mut url = Url::parse(trimmed)
        .map_err(|err| StoreError::InvalidEndpoint(format!("'{trimmed}': {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(StoreError::InvalidEndpoint(format!(
            "unsupported scheme '{}' in '{trimmed}'",
            url.scheme()
        )));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

async fn check_status(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.map_err(|err| {
        StoreError::Transport(format!("failed to read {status} response body: {err}"))
    })?;
    Err(match serde_json::from_str::<ApiError>(&body) {
        Ok(api) if api.code == ErrorCode::NotFound => StoreError::NotFound(api.message),
        Ok(api) => StoreError::Rejected {
            code: api.code,
            message: api.message,
        },
        Err(_) if status == StatusCode::NOT_FOUND => StoreError::NotFound(status.to_string()),
        Err(_) => StoreError::Transport(format!("unexpected status {status}")),
    })
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    async fn search(&self, filter: &SearchFilter) -> Result<Vec<Record>, StoreError> {
        let request = SearchRequest {
            collection: self.collection.clone(),
            filter: filter.clone(),
        };
        let response: SearchResponse = self.post_json("api/search", &request).await?;
        Ok(response.records)
    }

    async fn insert(&self, id: Option<&RecordId>, data: &Draft) -> Result<Record, StoreError> {
        let request = InsertRequest {
            collection: self.collection.clone(),
            id: id.cloned(),
            data: data.clone(),
        };
        let response: InsertResponse = self.post_json("api/insert", &request).await?;
        Ok(response.record)
    }
}

#[async_trait]
impl BlobStore for HttpRecordStore {
    async fn store(&self, upload: BlobUpload) -> Result<BlobRef, StoreError> {
        let mut url = self.endpoint("api/upload")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("collection", &self.collection)
                .append_pair("filename", &upload.filename);
            if let Some(mime_type) = &upload.mime_type {
                query.append_pair("mime_type", mime_type);
            }
        }
        let response = self.http.post(url).body(upload.bytes).send().await?;
        let stored: UploadResponse = check_status(response).await?.json().await?;
        Ok(BlobRef {
            path: stored.path,
            size_bytes: stored.size_bytes,
        })
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;

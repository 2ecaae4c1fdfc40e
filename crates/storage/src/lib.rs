use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::{
    domain::{Draft, Record, RecordId},
    protocol::SearchFilter,
};

/// SQLite-backed document store: JSON record bodies keyed by
/// `(collection, record_id)` plus uploaded blobs keyed by path.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub path: String,
    pub collection: String,
    pub filename: String,
    pub mime_type: Option<String>,
    pub size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct BlobContent {
    pub blob: StoredBlob,
    pub content: Vec<u8>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to an in-memory database sees its own empty schema.
        let max_connections = if is_in_memory(database_url) { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn find_record(&self, collection: &str, id: &RecordId) -> Result<Option<Record>> {
        let row = sqlx::query(
            "SELECT record_id, body, created_at, updated_at FROM records
             WHERE collection = ? AND record_id = ?",
        )
        .bind(collection)
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load record '{id}' from '{collection}'"))?;
        row.map(|row| record_from_row(&row)).transpose()
    }

    pub async fn list_records(&self, collection: &str) -> Result<Vec<Record>> {
        let rows = sqlx::query(
            "SELECT record_id, body, created_at, updated_at FROM records
             WHERE collection = ?
             ORDER BY created_at ASC, record_id ASC",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to list records in '{collection}'"))?;
        rows.iter().map(record_from_row).collect()
    }

    /// Id filters hit the primary key; pointer filters are evaluated on the
    /// decoded bodies.
    pub async fn search_records(
        &self,
        collection: &str,
        filter: &SearchFilter,
    ) -> Result<Vec<Record>> {
        let candidates = match &filter.id {
            Some(id) => self.find_record(collection, id).await?.into_iter().collect(),
            None => self.list_records(collection).await?,
        };
        Ok(candidates
            .into_iter()
            .filter(|record| filter.matches(record))
            .collect())
    }

    /// Creates a record when `id` is `None`, otherwise creates or replaces
    /// the record with that id. `created_at` survives replacement.
    pub async fn upsert_record(
        &self,
        collection: &str,
        id: Option<&RecordId>,
        data: &Draft,
    ) -> Result<Record> {
        let record_id = id.cloned().unwrap_or_else(RecordId::generate);
        let body = serde_json::to_string(data).context("failed to encode record body")?;
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO records (collection, record_id, body, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(collection, record_id) DO UPDATE SET
                body = excluded.body,
                updated_at = excluded.updated_at",
        )
        .bind(collection)
        .bind(record_id.as_str())
        .bind(body)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to upsert record '{record_id}' in '{collection}'"))?;

        self.find_record(collection, &record_id)
            .await?
            .ok_or_else(|| anyhow!("record '{record_id}' vanished after upsert"))
    }

    pub async fn delete_record(&self, collection: &str, id: &RecordId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM records WHERE collection = ? AND record_id = ?")
            .bind(collection)
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn store_blob(
        &self,
        collection: &str,
        filename: &str,
        mime_type: Option<&str>,
        content: &[u8],
    ) -> Result<StoredBlob> {
        let path = format!("{collection}/{}-{filename}", uuid::Uuid::new_v4().simple());
        let size_bytes = content.len() as u64;
        sqlx::query(
            "INSERT INTO blobs (path, collection, filename, mime_type, size_bytes, content, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&path)
        .bind(collection)
        .bind(filename)
        .bind(mime_type)
        .bind(size_bytes as i64)
        .bind(content)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to store blob '{filename}' in '{collection}'"))?;

        Ok(StoredBlob {
            path,
            collection: collection.to_string(),
            filename: filename.to_string(),
            mime_type: mime_type.map(str::to_string),
            size_bytes,
        })
    }

    pub async fn load_blob(&self, path: &str) -> Result<Option<BlobContent>> {
        let row = sqlx::query(
            "SELECT path, collection, filename, mime_type, size_bytes, content
             FROM blobs WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| BlobContent {
            blob: StoredBlob {
                path: r.get::<String, _>("path"),
                collection: r.get::<String, _>("collection"),
                filename: r.get::<String, _>("filename"),
                mime_type: r.get::<Option<String>, _>("mime_type"),
                size_bytes: r.get::<i64, _>("size_bytes") as u64,
            },
            content: r.get::<Vec<u8>, _>("content"),
        }))
    }
}

fn record_from_row(row: &SqliteRow) -> Result<Record> {
    let record_id: String = row.try_get("record_id")?;
    let body: String = row.try_get("body")?;
    let data: Draft = serde_json::from_str(&body)
        .with_context(|| format!("record '{record_id}' has a malformed body"))?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
    Ok(Record {
        id: RecordId(record_id),
        data,
        created_at,
        updated_at,
    })
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

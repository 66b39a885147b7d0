use std::path::Path;

use chrono::Utc;
use tokio::fs;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::config::Config;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{FileListResponse, FileRecord, FileResponse, Pagination};
use crate::storage::{generate_storage_key, BlobStream, ChunkedStore};

/// File service: upload, listing, retrieval and deletion pipelines
pub struct FileService;

impl FileService {
    /// Upload a spooled payload: validate, stream into the blob store, then
    /// commit the metadata record
    ///
    /// The record is written only after the store acknowledged the blob, so a
    /// failed blob write never leaves a record behind. The reverse window
    /// (blob committed, record insert fails) is not transactionally closable
    /// across two stores and surfaces later as an inconsistency.
    pub async fn upload_file(
        db: &Database,
        store: &ChunkedStore,
        config: &Config,
        owner_id: &str,
        original_name: String,
        content_type: Option<String>,
        payload: &Path,
    ) -> Result<FileResponse> {
        // Validate before touching either store
        if original_name.is_empty()
            || original_name.contains('/')
            || original_name.contains('\\')
        {
            return Err(AppError::Validation("Invalid file name".to_string()));
        }

        let content_type = content_type
            .filter(|ct| Self::is_allowed_type(config, ct))
            .ok_or_else(|| AppError::Validation("Only image files are allowed".to_string()))?;

        let metadata = fs::metadata(payload)
            .await
            .map_err(|e| AppError::Validation(format!("Failed to read upload: {}", e)))?;
        if metadata.len() > config.storage.max_upload_size {
            return Err(AppError::Validation(format!(
                "File exceeds maximum size of {} bytes",
                config.storage.max_upload_size
            )));
        }

        let storage_key = generate_storage_key(&original_name);

        let file = fs::File::open(payload).await?;
        let written = store
            .write_blob(&storage_key, &content_type, ReaderStream::new(file))
            .await?;

        let record = Self::create_record(
            db,
            owner_id,
            &storage_key,
            &original_name,
            &content_type,
            written as i64,
        )
        .await?;

        Ok(FileResponse::from(record))
    }

    fn is_allowed_type(config: &Config, content_type: &str) -> bool {
        config
            .storage
            .allowed_types
            .iter()
            .any(|prefix| content_type.starts_with(prefix.as_str()))
    }

    /// Persist a new file record
    async fn create_record(
        db: &Database,
        owner_id: &str,
        storage_key: &str,
        original_name: &str,
        content_type: &str,
        size: i64,
    ) -> Result<FileRecord> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO files (id, owner_id, storage_key, original_name, content_type, size, uploaded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(owner_id)
        .bind(storage_key)
        .bind(original_name)
        .bind(content_type)
        .bind(size)
        .bind(&now)
        .execute(db.pool())
        .await?;

        let record: FileRecord = sqlx::query_as("SELECT * FROM files WHERE id = ?")
            .bind(&id)
            .fetch_one(db.pool())
            .await?;

        Ok(record)
    }

    /// Look up a record scoped to its owner
    pub async fn get_record(db: &Database, owner_id: &str, file_id: &str) -> Result<FileRecord> {
        let record: FileRecord = sqlx::query_as("SELECT * FROM files WHERE id = ? AND owner_id = ?")
            .bind(file_id)
            .bind(owner_id)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

        Ok(record)
    }

    /// Paginated listing for an owner, newest first
    pub async fn list_files(
        db: &Database,
        owner_id: &str,
        page: i64,
        limit: i64,
    ) -> Result<FileListResponse> {
        let page = page.max(1);
        let limit = limit.max(1);

        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM files WHERE owner_id = ?")
            .bind(owner_id)
            .fetch_one(db.pool())
            .await?;

        let records: Vec<FileRecord> = sqlx::query_as(
            "SELECT * FROM files WHERE owner_id = ? ORDER BY uploaded_at DESC LIMIT ? OFFSET ?",
        )
        .bind(owner_id)
        .bind(limit)
        .bind((page - 1) * limit)
        .fetch_all(db.pool())
        .await?;

        Ok(FileListResponse {
            files: records.into_iter().map(FileResponse::from).collect(),
            pagination: Pagination {
                total_files: total,
                total_pages: (total + limit - 1) / limit,
                current_page: page,
                limit,
            },
        })
    }

    /// Resolve a record and open its blob for streaming
    ///
    /// A record whose blob has vanished is reported as an inconsistency, not
    /// an ordinary miss, so repository/store drift is visible to operators.
    pub async fn fetch_file(
        db: &Database,
        store: &ChunkedStore,
        owner_id: &str,
        file_id: &str,
    ) -> Result<(FileRecord, BlobStream)> {
        let record = Self::get_record(db, owner_id, file_id).await?;
        let blob = Self::open_blob(store, &record).await?;
        Ok((record, blob))
    }

    /// Fetch a file by id alone; only reachable when public viewing is
    /// enabled in config
    pub async fn fetch_public_file(
        db: &Database,
        store: &ChunkedStore,
        file_id: &str,
    ) -> Result<(FileRecord, BlobStream)> {
        let record: FileRecord = sqlx::query_as("SELECT * FROM files WHERE id = ?")
            .bind(file_id)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

        let blob = Self::open_blob(store, &record).await?;
        Ok((record, blob))
    }

    async fn open_blob(store: &ChunkedStore, record: &FileRecord) -> Result<BlobStream> {
        match store.read_blob(&record.storage_key).await {
            Ok(blob) => Ok(blob),
            Err(AppError::NotFound(_)) => Err(AppError::Inconsistency(format!(
                "Blob {} missing for file {}",
                record.storage_key, record.id
            ))),
            Err(e) => Err(e),
        }
    }

    /// Delete the blob, then the record
    ///
    /// A missing blob fails as an inconsistency instead of being skipped. If
    /// the record removal fails after the blob is gone, the stale record
    /// surfaces as an inconsistency on its next access.
    pub async fn delete_file(
        db: &Database,
        store: &ChunkedStore,
        owner_id: &str,
        file_id: &str,
    ) -> Result<()> {
        let record = Self::get_record(db, owner_id, file_id).await?;

        match store.delete_blob(&record.storage_key).await {
            Ok(()) => {}
            Err(AppError::NotFound(_)) => {
                return Err(AppError::Inconsistency(format!(
                    "Blob {} already missing for file {}",
                    record.storage_key, record.id
                )));
            }
            Err(e) => return Err(e),
        }

        Self::delete_record(db, owner_id, file_id).await
    }

    /// Remove a record scoped to its owner
    async fn delete_record(db: &Database, owner_id: &str, file_id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM files WHERE id = ? AND owner_id = ?")
            .bind(file_id)
            .bind(owner_id)
            .execute(db.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("File not found".to_string()));
        }

        Ok(())
    }
}

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// File metadata record
///
/// `storage_key` locates the blob in the chunked store and is generated
/// server-side; `original_name` is the untrusted client display name and is
/// never used for storage addressing.
#[derive(Debug, Clone, FromRow)]
pub struct FileRecord {
    pub id: String,
    pub owner_id: String,
    pub storage_key: String,
    pub original_name: String,
    pub content_type: String,
    pub size: i64,
    pub uploaded_at: String,
}

/// Public projection of a file record
#[derive(Debug, Clone, Serialize)]
pub struct FileResponse {
    pub id: String,
    /// Externally visible name of the stored blob (the storage key)
    pub filename: String,
    pub originalname: String,
    #[serde(rename = "contentType")]
    pub content_type: String,
    pub size: i64,
    #[serde(rename = "uploadDate")]
    pub upload_date: String,
}

impl From<FileRecord> for FileResponse {
    fn from(record: FileRecord) -> Self {
        Self {
            id: record.id,
            filename: record.storage_key,
            originalname: record.original_name,
            content_type: record.content_type,
            size: record.size,
            upload_date: record.uploaded_at,
        }
    }
}

/// Paginated file listing
#[derive(Debug, Serialize)]
pub struct FileListResponse {
    pub files: Vec<FileResponse>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    #[serde(rename = "totalFiles")]
    pub total_files: i64,
    #[serde(rename = "totalPages")]
    pub total_pages: i64,
    #[serde(rename = "currentPage")]
    pub current_page: i64,
    pub limit: i64,
}

/// Listing query parameters
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

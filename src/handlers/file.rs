use axum::{
    body::Body,
    extract::{multipart::Field, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{CurrentUser, FileListResponse, FileRecord, FileResponse, ListQuery};
use crate::services::FileService;
use crate::storage::BlobStream;
use crate::AppState;

/// Upload a file
/// POST /api/files/upload
pub async fn upload_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<FileResponse>)> {
    let mut spool_path: Option<PathBuf> = None;
    let mut file_name: Option<String> = None;
    let mut content_type: Option<String> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Failed to process multipart: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        file_name = field.file_name().map(|s| s.to_string());
        content_type = field.content_type().map(|s| s.to_string());

        let spool = std::env::temp_dir().join(format!("pixvault_upload_{}", Uuid::new_v4()));
        if let Err(e) = spool_field(&mut field, &spool, state.config.storage.max_upload_size).await
        {
            let _ = tokio::fs::remove_file(&spool).await;
            return Err(e);
        }
        spool_path = Some(spool);
    }

    let spool =
        spool_path.ok_or_else(|| AppError::Validation("Please upload a file".to_string()))?;
    let file_name = match file_name {
        Some(name) => name,
        None => {
            let _ = tokio::fs::remove_file(&spool).await;
            return Err(AppError::Validation("No file name provided".to_string()));
        }
    };

    let result = FileService::upload_file(
        &state.db,
        &state.store,
        &state.config,
        &current_user.id,
        file_name,
        content_type,
        &spool,
    )
    .await;

    // Cleanup spool file
    if let Err(e) = tokio::fs::remove_file(&spool).await {
        tracing::error!("Failed to remove spool file {:?}: {}", spool, e);
    }

    result.map(|file| (StatusCode::CREATED, Json(file)))
}

/// Stream a multipart field to disk, enforcing the upload cap
async fn spool_field(field: &mut Field<'_>, spool: &std::path::Path, max_size: u64) -> Result<()> {
    let mut file = tokio::fs::File::create(spool).await?;
    let mut written: u64 = 0;

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| AppError::Validation(format!("Failed to read upload: {}", e)))?
    {
        written += chunk.len() as u64;
        if written > max_size {
            return Err(AppError::Validation(format!(
                "File exceeds maximum size of {} bytes",
                max_size
            )));
        }
        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    Ok(())
}

/// List the caller's files, newest first
/// GET /api/files?page=1&limit=10
pub async fn list_files(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<FileListResponse>> {
    let listing = FileService::list_files(
        &state.db,
        &current_user.id,
        query.page.unwrap_or(1),
        query.limit.unwrap_or(10),
    )
    .await?;

    Ok(Json(listing))
}

/// Download a file
/// GET /api/files/:id
pub async fn download_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Response> {
    let (record, blob) =
        FileService::fetch_file(&state.db, &state.store, &current_user.id, &id).await?;
    stream_response(record, blob)
}

/// View a file without authentication; the route is only registered when
/// public viewing is enabled in config
/// GET /api/public/files/:id
pub async fn view_public_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response> {
    let (record, blob) = FileService::fetch_public_file(&state.db, &state.store, &id).await?;
    stream_response(record, blob)
}

fn stream_response(record: FileRecord, blob: BlobStream) -> Result<Response> {
    let fallback_name = record.original_name.replace(['"', '\\'], "_");
    let encoded_name = urlencoding::encode(&record.original_name);

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, record.content_type)
        .header(header::CONTENT_LENGTH, record.size)
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "inline; filename=\"{}\"; filename*=UTF-8''{}",
                fallback_name, encoded_name
            ),
        )
        .body(Body::from_stream(blob))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))?;

    Ok(response)
}

/// Delete a file
/// DELETE /api/files/:id
pub async fn delete_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    FileService::delete_file(&state.db, &state.store, &current_user.id, &id).await?;
    Ok(Json(
        serde_json::json!({ "message": "File deleted successfully" }),
    ))
}

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use medsync_common::checksum::StreamingChecksum;
use serde_json::json;

use super::commands::{SyncImportCommand, UploadImportCommand, UploadImportError};
use super::queries::{ImportHistoryQuery, ListSourcesQuery};
use super::ImportState;
use crate::api::response::ApiResponse;
use crate::error::AppError;

/// Media type of the progress stream
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Header naming who started a run; recorded in the import history
pub const TRIGGERED_BY_HEADER: &str = "x-triggered-by";

const DEFAULT_TRIGGERED_BY: &str = "api";

/// Multipart framing allowance on top of the file limit
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn imports_routes(max_upload_bytes: usize) -> Router<ImportState> {
    Router::new()
        .route("/sources", get(list_sources))
        .route("/history", get(import_history))
        .route(
            "/:source",
            post(upload_import)
                .layer(DefaultBodyLimit::max(max_upload_bytes + MULTIPART_OVERHEAD_BYTES)),
        )
        .route("/:source/sync", post(sync_import))
}

fn triggered_by(headers: &HeaderMap) -> String {
    headers
        .get(TRIGGERED_BY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_TRIGGERED_BY)
        .to_string()
}

// ============================================================================
// Command Handlers
// ============================================================================

/// Import an uploaded spreadsheet
///
/// # Endpoint
///
/// `POST /api/v1/imports/:source` with a multipart `file` field
///
/// # Response
///
/// - `200 OK` - `ImportResult`; row-level problems are in its counters and reports
/// - `400 Bad Request` - Source does not accept uploads, or unreadable body
/// - `404 Not Found` - Unknown source
/// - `409 Conflict` - Source disabled
/// - `422 Unprocessable Entity` - Empty file, unknown format, no matching table
#[tracing::instrument(skip(state, headers, multipart), fields(source = %source))]
async fn upload_import(
    State(state): State<ImportState>,
    Path(source): Path<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let max_bytes = state.max_upload_bytes;
    let mut upload = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| UploadImportError::Multipart(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or("upload").to_string();
        let mut checksum = StreamingChecksum::new();
        let mut content = BytesMut::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| UploadImportError::Multipart(e.to_string()))?
        {
            if content.len() + chunk.len() > max_bytes {
                return Err(UploadImportError::TooLarge(max_bytes).into());
            }
            checksum.update(&chunk);
            content.extend_from_slice(&chunk);
        }
        upload = Some((file_name, checksum.finish(), content.freeze()));
        break;
    }

    let (file_name, file_sha256, content) = upload.ok_or(UploadImportError::FileRequired)?;
    let command = UploadImportCommand {
        source,
        file_name,
        file_sha256,
        triggered_by: triggered_by(&headers),
        content,
    };

    let result = super::commands::upload::handle(&state, command).await?;

    tracing::info!(
        success = result.success,
        errors = result.errors,
        total = result.total_processed,
        "Upload imported via API"
    );

    Ok((StatusCode::OK, Json(ApiResponse::success(result))).into_response())
}

/// Pull a cloud source and stream progress
///
/// # Endpoint
///
/// `POST /api/v1/imports/:source/sync`
///
/// # Response
///
/// `200 OK` with `application/x-ndjson`: `{"status","pct"}` frames, then one
/// `{"result":{...}}` or `{"phase":"error","error":"..."}` frame. Errors
/// detected before the run starts are plain JSON error responses.
#[tracing::instrument(skip(state, headers), fields(source = %source))]
async fn sync_import(
    State(state): State<ImportState>,
    Path(source): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let command = SyncImportCommand {
        source,
        triggered_by: triggered_by(&headers),
    };
    let frames = super::commands::sync::handle(&state, command).await?;

    let lines = frames.map(|frame| frame.to_line().map(Bytes::from));
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, NDJSON_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(lines),
    )
        .into_response())
}

// ============================================================================
// Query Handlers
// ============================================================================

/// `GET /api/v1/imports/sources[?mode=file|cloud]`
#[tracing::instrument(skip(state))]
async fn list_sources(
    State(state): State<ImportState>,
    Query(query): Query<ListSourcesQuery>,
) -> Result<Response, AppError> {
    let items = super::queries::sources::handle(&state, query);
    Ok((StatusCode::OK, Json(ApiResponse::success(items))).into_response())
}

/// `GET /api/v1/imports/history?source=&limit=`, newest first
#[tracing::instrument(skip(state))]
async fn import_history(
    State(state): State<ImportState>,
    Query(query): Query<ImportHistoryQuery>,
) -> Result<Response, AppError> {
    let limit = query.limit();
    let records = super::queries::history::handle(&state, query).await?;
    let meta = json!({ "limit": limit, "count": records.len() });
    Ok((StatusCode::OK, Json(ApiResponse::success_with_meta(records, meta))).into_response())
}

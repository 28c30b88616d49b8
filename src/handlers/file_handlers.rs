//! HTTP handlers for uploading and downloading files.
//! Upload bodies are streamed through `UploadService`; downloads are streamed
//! from disk once `OwnershipRegistry` has authorized the caller.

use crate::{
    errors::AppError,
    models::file_record::FileRecord,
    services::signature::FileKind,
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State, multipart::MultipartRejection},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::Response,
};
use futures::StreamExt;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;
use std::io;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

/// Header carrying the caller's identity. Trusted as-is.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Multipart field that carries the upload.
const FILE_FIELD: &str = "file";

/// Bytes that must be escaped in an RFC 5987 `filename*` value
/// (everything outside `attr-char`).
const FILENAME_ATTR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub id: Uuid,
    pub size: u64,
}

/// `POST /upload` — multipart body with a `file` part.
pub async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    // Identity is checked before any of the body is read.
    let owner = caller_identity(&headers).ok_or_else(AppError::unauthenticated)?;
    let mut multipart = multipart.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("invalid multipart body: {}", err)))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field.file_name().map(str::to_string);
        let stream =
            field.map(|chunk| chunk.map_err(|err| io::Error::new(io::ErrorKind::Other, err)));

        let record = state
            .uploads
            .ingest(Some(owner), filename.as_deref(), stream)
            .await?;

        return Ok(Json(UploadResponse {
            id: record.id,
            size: record.size_bytes,
        }));
    }

    Err(AppError::bad_request("no file provided"))
}

/// `GET /files/{id}` — stream a stored file back to its owner.
pub async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let caller = caller_identity(&headers).ok_or_else(AppError::unauthenticated)?;
    // Anything that is not a UUID cannot name a stored file.
    let id = Uuid::parse_str(&id).map_err(|_| AppError::not_found("file not found"))?;

    let record = state.registry.authorize_and_fetch(id, caller).await?;
    let file = File::open(&record.storage_location).await.map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            AppError::not_found("file not found")
        } else {
            tracing::error!(file_id = %id, "failed to open stored file: {}", err);
            AppError::internal("failed to read file")
        }
    })?;

    let body = Body::from_stream(ReaderStream::new(file));
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_download_headers(response.headers_mut(), &record);

    Ok(response)
}

fn caller_identity(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn set_download_headers(headers: &mut HeaderMap, record: &FileRecord) {
    let content_type = FileKind::from_extension(&record.extension)
        .map(FileKind::content_type)
        .unwrap_or("application/octet-stream");
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&record.size_bytes.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );

    let disposition = content_disposition(&record.original_name);
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", record.checksum)) {
        headers.insert(header::ETAG, value);
    }

    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
}

/// `attachment` disposition carrying an ASCII fallback name plus the exact
/// original name as UTF-8 `filename*`.
fn content_disposition(original_name: &str) -> String {
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        header_safe_filename(original_name),
        utf8_percent_encode(original_name, FILENAME_ATTR)
    )
}

/// Make a client-supplied name safe inside a quoted header parameter.
fn header_safe_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c == ' ' || (c.is_ascii_graphic() && c != '"' && c != '\\') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

//! HTTP handlers implementing the wire protocol verbatim (spec §6), grounded
//! on the teacher's `server/src/handlers.rs` route shapes (`/files/*path`,
//! `/list/*path`, `/mkdir/*path`) but speaking through a `vfs_core`
//! provider instead of bare `std::fs` calls, so any provider — disk,
//! memory, or a future one — can sit behind this server.

use axum::body::Bytes as AxumBytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;

use vfs_core::error::FileSystemError;
use vfs_core::file_service::FileOperationKind;
use vfs_core::provider::{CreateOptions, DeleteOptions};
use vfs_core::wire::{
    CapabilitiesResponse, CloseRequest, CopyRequest, DeleteRequest, MkdirRequest, OpenRequest, OpenResponse, ReadDirEntryDto,
    ReadRequest, ReadResponse, RenameRequest, StatDto, StatRequest, WriteRequest, WriteResponse,
};

use crate::state::AppState;

fn map_error(err: FileSystemError) -> Response {
    let status = match &err {
        FileSystemError::NotFound { .. } => StatusCode::NOT_FOUND,
        FileSystemError::IsADirectory { .. } | FileSystemError::NotADirectory { .. } => StatusCode::BAD_REQUEST,
        FileSystemError::Exists { .. } | FileSystemError::MoveConflict { .. } => StatusCode::CONFLICT,
        FileSystemError::ModifiedSince { .. } => StatusCode::PRECONDITION_FAILED,
        FileSystemError::NotModifiedSince { .. } => StatusCode::NOT_MODIFIED,
        FileSystemError::PermissionDenied { .. } | FileSystemError::ReadOnly { .. } => StatusCode::FORBIDDEN,
        FileSystemError::InvalidPath { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string()).into_response()
}

fn path_param(raw: &str) -> String {
    format!("/{}", raw.trim_start_matches('/'))
}

pub async fn get_capabilities(State(state): State<AppState>) -> Json<CapabilitiesResponse> {
    Json(CapabilitiesResponse { bits: state.provider.capabilities().bits() })
}

pub async fn stat(State(state): State<AppState>, Json(body): Json<StatRequest>) -> Response {
    let uri = state.uri(&body.path);
    match state.provider.stat(&uri).await {
        Ok(stat) => Json(StatDto::from_stat(&stat)).into_response(),
        Err(e) => map_error(e),
    }
}

pub async fn readdir(State(state): State<AppState>, Path(path): Path<String>) -> Response {
    let uri = state.uri(&path_param(&path));
    match state.provider.readdir(&uri).await {
        Ok(entries) => {
            let dto: Vec<ReadDirEntryDto> = entries.into_iter().map(|(name, ty)| ReadDirEntryDto { name, file_type: ty.bits() }).collect();
            Json(dto).into_response()
        }
        Err(e) => map_error(e),
    }
}

pub async fn mkdir(State(state): State<AppState>, Json(body): Json<MkdirRequest>) -> Response {
    let uri = state.uri(&body.path);
    state.participants.run_before(FileOperationKind::Create, &uri, None).await;
    match state.provider.mkdir(&uri).await {
        Ok(()) => {
            state.participants.run_after(FileOperationKind::Create, &uri, None).await;
            StatusCode::OK.into_response()
        }
        Err(e) => {
            state.participants.run_on_error(FileOperationKind::Create, &uri, None, &e.to_string()).await;
            map_error(e)
        }
    }
}

pub async fn delete(State(state): State<AppState>, Json(body): Json<DeleteRequest>) -> Response {
    let uri = state.uri(&body.path);
    let options = DeleteOptions { recursive: body.recursive, use_trash: body.use_trash };
    state.participants.run_before(FileOperationKind::Delete, &uri, None).await;
    match state.provider.delete(&uri, options).await {
        Ok(()) => {
            state.participants.run_after(FileOperationKind::Delete, &uri, None).await;
            StatusCode::OK.into_response()
        }
        Err(e) => {
            state.participants.run_on_error(FileOperationKind::Delete, &uri, None, &e.to_string()).await;
            map_error(e)
        }
    }
}

pub async fn rename(State(state): State<AppState>, Json(body): Json<RenameRequest>) -> Response {
    let src = state.uri(&body.src);
    let dst = state.uri(&body.dst);
    state.participants.run_before(FileOperationKind::Move, &src, Some(&dst)).await;
    match state.provider.rename(&src, &dst, body.overwrite).await {
        Ok(()) => {
            state.participants.run_after(FileOperationKind::Move, &src, Some(&dst)).await;
            StatusCode::OK.into_response()
        }
        Err(e) => {
            state.participants.run_on_error(FileOperationKind::Move, &src, Some(&dst), &e.to_string()).await;
            map_error(e)
        }
    }
}

pub async fn copy(State(state): State<AppState>, Json(body): Json<CopyRequest>) -> Response {
    let src = state.uri(&body.src);
    let dst = state.uri(&body.dst);
    if !state.provider.capabilities().contains(vfs_core::Capabilities::FILE_FOLDER_COPY) {
        return StatusCode::NOT_IMPLEMENTED.into_response();
    }
    state.participants.run_before(FileOperationKind::Copy, &src, Some(&dst)).await;
    match state.provider.copy(&src, &dst, body.overwrite).await {
        Ok(()) => {
            state.participants.run_after(FileOperationKind::Copy, &src, Some(&dst)).await;
            StatusCode::OK.into_response()
        }
        Err(e) => {
            state.participants.run_on_error(FileOperationKind::Copy, &src, Some(&dst), &e.to_string()).await;
            map_error(e)
        }
    }
}

/// `GET /file/*path`: whole-file read, raw body — no base64 overhead for
/// the common case (spec §6).
pub async fn read_file(State(state): State<AppState>, Path(path): Path<String>) -> Response {
    let uri = state.uri(&path_param(&path));
    match state.provider.read_file(&uri).await {
        Ok(data) => (StatusCode::OK, data.to_vec()).into_response(),
        Err(e) => map_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct WriteFileQuery {
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub overwrite: bool,
}

/// `PUT /file/*path`: whole-file write, raw body.
pub async fn write_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<WriteFileQuery>,
    body: AxumBytes,
) -> Response {
    let uri = state.uri(&path_param(&path));
    let options = CreateOptions { create: query.create, overwrite: query.overwrite };
    state.participants.run_before(FileOperationKind::Write, &uri, None).await;
    match state.provider.write_file(&uri, bytes::Bytes::from(body.to_vec()), options).await {
        Ok(()) => {
            state.participants.run_after(FileOperationKind::Write, &uri, None).await;
            StatusCode::OK.into_response()
        }
        Err(e) => {
            state.participants.run_on_error(FileOperationKind::Write, &uri, None, &e.to_string()).await;
            map_error(e)
        }
    }
}

pub async fn open(State(state): State<AppState>, Json(body): Json<OpenRequest>) -> Response {
    let uri = state.uri(&body.path);
    let options = CreateOptions { create: body.create, overwrite: body.overwrite };
    match state.provider.open(&uri, options).await {
        Ok(fd) => Json(OpenResponse { fd }).into_response(),
        Err(e) => map_error(e),
    }
}

pub async fn close(State(state): State<AppState>, Json(body): Json<CloseRequest>) -> Response {
    match state.provider.close(body.fd).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => map_error(e),
    }
}

/// `read(fd, pos, length) → {bytes:binary, bytesRead}` (spec §6); `bytes`
/// is base64 because unlike `GET /file/*path` this reply is JSON-shaped.
pub async fn read(State(state): State<AppState>, Json(body): Json<ReadRequest>) -> Response {
    match state.provider.read(body.fd, body.pos, body.length).await {
        Ok(chunk) => Json(ReadResponse { bytes_read: chunk.len(), bytes: BASE64.encode(&chunk) }).into_response(),
        Err(e) => map_error(e),
    }
}

pub async fn write(State(state): State<AppState>, Json(body): Json<WriteRequest>) -> Response {
    let decoded = match BASE64.decode(&body.content) {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    let end = (body.offset + body.length).min(decoded.len());
    if body.offset > decoded.len() {
        return StatusCode::BAD_REQUEST.into_response();
    }
    match state.provider.write(body.fd, body.pos, &decoded[body.offset..end]).await {
        Ok(written) => Json(WriteResponse { written }).into_response(),
        Err(e) => map_error(e),
    }
}

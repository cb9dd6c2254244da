//! The remote provider wire protocol (spec §6 "Remote wire protocol"):
//! language-neutral JSON-RPC-shaped DTOs shared by `remote-server` and
//! `remote-client` so the two crates never drift on field names or the
//! change-type/capability bit encodings that spec §6 calls out as part of
//! the wire contract.
//!
//! URIs cross the wire as plain strings (spec §4.7: "URI-stringifying and
//! re-parsing arguments"); bytes cross as base64 inside JSON bodies for the
//! random-access `read`/`write` calls, and as raw request/response bodies
//! for the whole-file `readFile`/`writeFile` calls.

use serde::{Deserialize, Serialize};

use crate::provider::{ChangeEvent, ChangeType, FileChangesEvent};
use crate::stat::{FileStat, FileType};
use crate::uri::Uri;

/// `ADDED=1, UPDATED=2, DELETED=3` — values are part of the wire format
/// (spec §6 "Change-type enumeration").
impl ChangeType {
    pub fn wire_value(self) -> u8 {
        match self {
            ChangeType::Added => 1,
            ChangeType::Updated => 2,
            ChangeType::Deleted => 3,
        }
    }

    pub fn from_wire_value(v: u8) -> Option<Self> {
        match v {
            1 => Some(ChangeType::Added),
            2 => Some(ChangeType::Updated),
            3 => Some(ChangeType::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatDto {
    pub resource: String,
    pub name: String,
    pub file_type: u8,
    pub mtime: i64,
    pub ctime: i64,
    pub size: u64,
    pub etag: String,
}

impl StatDto {
    pub fn from_stat(stat: &FileStat) -> Self {
        Self {
            resource: stat.resource.to_string(),
            name: stat.name.clone(),
            file_type: stat.file_type.bits(),
            mtime: stat.mtime,
            ctime: stat.ctime,
            size: stat.size,
            etag: stat.etag.clone(),
        }
    }

    pub fn into_stat(self) -> Result<FileStat, crate::uri::UriError> {
        Ok(FileStat {
            resource: Uri::parse(&self.resource)?,
            name: self.name,
            file_type: FileType::from_bits_truncate(self.file_type),
            mtime: self.mtime,
            ctime: self.ctime,
            size: self.size,
            etag: self.etag,
            children: None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadDirEntryDto {
    pub name: String,
    pub file_type: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatRequest {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MkdirRequest {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRequest {
    pub path: String,
    pub create: bool,
    pub overwrite: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenResponse {
    pub fd: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseRequest {
    pub fd: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadRequest {
    pub fd: u64,
    pub pos: u64,
    pub length: usize,
}

/// `{bytes:binary, bytesRead}` per spec §6; `bytes` is base64-encoded since
/// it travels inside a JSON body rather than as a raw response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResponse {
    pub bytes: String,
    pub bytes_read: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRequest {
    pub fd: u64,
    pub pos: u64,
    pub content: String,
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResponse {
    pub written: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteFileRequest {
    pub create: bool,
    pub overwrite: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub path: String,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub use_trash: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameRequest {
    pub src: String,
    pub dst: String,
    pub overwrite: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyRequest {
    pub src: String,
    pub dst: String,
    pub overwrite: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesResponse {
    pub bits: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEventDto {
    pub resource: String,
    pub change_type: u8,
}

impl ChangeEventDto {
    pub fn from_event(event: &ChangeEvent) -> Self {
        Self { resource: event.resource.to_string(), change_type: event.change_type.wire_value() }
    }

    pub fn into_event(self) -> Option<ChangeEvent> {
        Some(ChangeEvent { resource: Uri::parse(&self.resource).ok()?, change_type: ChangeType::from_wire_value(self.change_type)? })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChangesDto {
    pub changes: Vec<ChangeEventDto>,
}

impl FileChangesDto {
    pub fn from_event(event: &FileChangesEvent) -> Self {
        Self { changes: event.changes.iter().map(ChangeEventDto::from_event).collect() }
    }

    pub fn into_event(self) -> FileChangesEvent {
        FileChangesEvent { changes: self.changes.into_iter().filter_map(ChangeEventDto::into_event).collect() }
    }
}

/// Client → server watch-session control, carried over the `GET /watch`
/// WebSocket upgrade (spec §4.7, §6: "server maintains its own
/// `requestId → disposable` map", keyed here by client-supplied
/// `watcher_id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientWatchMessage {
    Watch { watcher_id: u64, path: String, recursive: bool, excludes: Vec<String> },
    Unwatch { watcher_id: u64 },
}

/// Server → client notifications pushed over the same socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerPush {
    NotifyDidChangeFile { changes: FileChangesDto },
    NotifyDidChangeCapabilities { bits: u32 },
}

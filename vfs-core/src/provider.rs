//! The provider trait (spec §3 "Provider", §6 "Provider interface").

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::capabilities::Capabilities;
use crate::error::FileSystemError;
use crate::stat::FileStat;
use crate::stream::ByteStream;
use crate::uri::Uri;

/// An opaque handle returned by `open`, required by `read`/`write`/`close`.
pub type Handle = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Added,
    Updated,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub resource: Uri,
    pub change_type: ChangeType,
}

/// A batch of changes, delivered together (spec §3 "ChangeEvent").
#[derive(Debug, Clone, Default)]
pub struct FileChangesEvent {
    pub changes: Vec<ChangeEvent>,
}

impl FileChangesEvent {
    pub fn contains(&self, uri: &Uri, case_sensitive: bool) -> bool {
        self.changes.iter().any(|c| c.resource.path_eq(uri, case_sensitive))
    }
}

#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    pub recursive: bool,
    pub excludes: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub create: bool,
    pub overwrite: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    pub recursive: bool,
    pub use_trash: bool,
}

/// A disposable provider-level watch; dropping it does not stop the watch —
/// call [`ProviderWatch::dispose`] explicitly, mirroring spec §4.5's
/// synchronous-disposer / async-creation split, which `FileService` layers
/// ref-counting on top of.
#[async_trait]
pub trait ProviderWatch: Send + Sync {
    async fn dispose(self: Box<Self>);
}

/// A backend implementing the storage interface for one URI scheme.
///
/// Default method bodies for the I/O shapes panic: a consumer must only
/// call a method whose capability bit the provider actually advertises
/// (spec §3 "a consumer that calls a missing method indicates a
/// programming error").
#[async_trait]
pub trait FileSystemProvider: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    async fn subscribe_changes(&self) -> broadcast::Receiver<FileChangesEvent>;
    async fn subscribe_capability_changes(&self) -> broadcast::Receiver<Capabilities>;

    async fn stat(&self, uri: &Uri) -> Result<FileStat, FileSystemError>;
    async fn readdir(&self, uri: &Uri) -> Result<Vec<(String, crate::stat::FileType)>, FileSystemError>;
    async fn mkdir(&self, uri: &Uri) -> Result<(), FileSystemError>;
    async fn delete(&self, uri: &Uri, options: DeleteOptions) -> Result<(), FileSystemError>;
    async fn rename(&self, source: &Uri, target: &Uri, overwrite: bool) -> Result<(), FileSystemError>;

    async fn copy(&self, _source: &Uri, _target: &Uri, _overwrite: bool) -> Result<(), FileSystemError> {
        panic!("copy called on a provider without FILE_FOLDER_COPY");
    }

    async fn read_file(&self, _uri: &Uri) -> Result<bytes::Bytes, FileSystemError> {
        panic!("read_file called on a provider without FILE_READ_WRITE");
    }

    async fn write_file(&self, _uri: &Uri, _data: bytes::Bytes, _options: CreateOptions) -> Result<(), FileSystemError> {
        panic!("write_file called on a provider without FILE_READ_WRITE");
    }

    async fn open(&self, _uri: &Uri, _options: CreateOptions) -> Result<Handle, FileSystemError> {
        panic!("open called on a provider without FILE_OPEN_READ_WRITE_CLOSE");
    }

    async fn close(&self, _handle: Handle) -> Result<(), FileSystemError> {
        panic!("close called on a provider without FILE_OPEN_READ_WRITE_CLOSE");
    }

    async fn read(&self, _handle: Handle, _pos: u64, _len: usize) -> Result<bytes::Bytes, FileSystemError> {
        panic!("read called on a provider without FILE_OPEN_READ_WRITE_CLOSE");
    }

    async fn write(&self, _handle: Handle, _pos: u64, _data: &[u8]) -> Result<usize, FileSystemError> {
        panic!("write called on a provider without FILE_OPEN_READ_WRITE_CLOSE");
    }

    async fn watch(&self, uri: &Uri, options: WatchOptions) -> Result<Box<dyn ProviderWatch>, FileSystemError>;

    /// Used only for whole-file reads that want to stream rather than
    /// buffer; providers without `FILE_READ_STREAM` never receive this call.
    async fn read_file_stream(&self, _uri: &Uri) -> Result<ByteStream, FileSystemError> {
        panic!("read_file_stream called on a provider without FILE_READ_STREAM");
    }
}

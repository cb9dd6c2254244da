//! Resource façade (spec §4.8): the higher-level "open resource" view used
//! by editors, binding one URI to a content version and change
//! notification, layered on top of [`FileService`] rather than talking to
//! providers directly.

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::error::FileSystemError;
use crate::file_service::{FileOperationKind, FileService, ReadFileOptions, ResolveOptions, WriteFileOptions};
use crate::uri::Uri;

#[derive(Debug, Clone, PartialEq)]
pub struct ContentVersion {
    pub etag: String,
    pub mtime: i64,
    pub size: u64,
}

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("{0}: resource is a directory, not a file")]
    IsADirectory(Uri),
    #[error("{0}: not found")]
    NotFound(Uri),
    #[error("{0}: out of sync with the backing store")]
    OutOfSync(Uri),
    #[error(transparent)]
    FileSystem(#[from] FileSystemError),
}

/// Binds one URI to a long-lived view: `init`, `read_contents`,
/// `save_contents`, and a broadcast of external changes (spec §4.8).
///
/// Subscribes to both the service's file-change stream (matching via
/// `FileChangesEvent::contains`) and its operation stream (matching
/// `DELETE`/`MOVE` that equal-or-parent this URI), and fires
/// `on_did_change_contents` on either.
pub struct Resource {
    uri: Uri,
    service: std::sync::Arc<FileService>,
    version: tokio::sync::RwLock<Option<ContentVersion>>,
    changed: broadcast::Sender<()>,
}

impl Resource {
    pub fn new(uri: Uri, service: std::sync::Arc<FileService>) -> std::sync::Arc<Self> {
        let (changed, _) = broadcast::channel(16);
        let resource = std::sync::Arc::new(Self { uri, service, version: tokio::sync::RwLock::new(None), changed });
        spawn_watchers(resource.clone());
        resource
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn on_did_change_contents(&self) -> broadcast::Receiver<()> {
        self.changed.subscribe()
    }

    /// Validates the resource exists and is a file. Directories are an
    /// error: this façade is for editable file content, not listings.
    ///
    /// Deliberately leaves `version` unset: a version is only meaningful
    /// once content has actually been read, and seeding it from `stat`
    /// here would hand the very next `read_contents` an up-to-date etag
    /// precondition before any content was ever fetched, tripping
    /// `FILE_NOT_MODIFIED_SINCE` with no cached bytes to fall back on.
    pub async fn init(&self) -> Result<(), ResourceError> {
        let stat = self
            .service
            .resolve(&self.uri, ResolveOptions { resolve_metadata: true, ..Default::default() })
            .await
            .map_err(|e| match e {
                FileSystemError::NotFound { uri } => ResourceError::NotFound(uri),
                other => ResourceError::FileSystem(other),
            })?;
        if stat.is_directory() {
            return Err(ResourceError::IsADirectory(self.uri.clone()));
        }
        Ok(())
    }

    /// `FILE_NOT_MODIFIED_SINCE` returns the cached content; `FILE_NOT_FOUND`
    /// clears the cached version and surfaces as [`ResourceError::NotFound`]
    /// (spec §4.8).
    pub async fn read_contents(&self, cached: Option<Bytes>) -> Result<Bytes, ResourceError> {
        let current_etag = self.version.read().await.as_ref().map(|v| v.etag.clone());
        let options = ReadFileOptions { etag: current_etag, ..Default::default() };
        match self.service.read_file(&self.uri, options).await {
            Ok((data, stat)) => {
                *self.version.write().await = Some(ContentVersion { etag: stat.etag, mtime: stat.mtime, size: stat.size });
                Ok(data)
            }
            Err(FileSystemError::NotModifiedSince { .. }) => cached.ok_or_else(|| {
                // Unreachable in practice: `version` (and hence the etag
                // precondition above) is only ever set after a prior
                // successful `read_contents`, so a `NotModifiedSince` always
                // has a cached copy to fall back to.
                ResourceError::FileSystem(FileSystemError::NotModifiedSince { uri: self.uri.clone() })
            }),
            Err(FileSystemError::NotFound { uri }) => {
                *self.version.write().await = None;
                Err(ResourceError::NotFound(uri))
            }
            Err(e) => Err(ResourceError::FileSystem(e)),
        }
    }

    /// Writes with the cached version as the dirty-write precondition;
    /// `FILE_MODIFIED_SINCE` is translated to [`ResourceError::OutOfSync`].
    pub async fn save_contents(&self, content: Bytes) -> Result<(), ResourceError> {
        let precondition = self.version.read().await.clone();
        let options = WriteFileOptions {
            create: true,
            overwrite: true,
            etag: precondition.as_ref().map(|v| v.etag.clone()),
            mtime: precondition.as_ref().map(|v| v.mtime),
        };
        match self.service.write_file(&self.uri, content, options).await {
            Ok(stat) => {
                *self.version.write().await = Some(ContentVersion { etag: stat.etag, mtime: stat.mtime, size: stat.size });
                Ok(())
            }
            Err(FileSystemError::ModifiedSince { uri }) => Err(ResourceError::OutOfSync(uri)),
            Err(e) => Err(ResourceError::FileSystem(e)),
        }
    }
}

fn spawn_watchers(resource: std::sync::Arc<Resource>) {
    let file_changes_resource = resource.clone();
    let mut file_changes = resource.service.subscribe_file_changes();
    tokio::spawn(async move {
        while let Ok(event) = file_changes.recv().await {
            if event.contains(&file_changes_resource.uri, true) || event.contains(&file_changes_resource.uri, false) {
                let _ = file_changes_resource.changed.send(());
            }
        }
    });

    let operations_resource = resource.clone();
    let mut operations = resource.service.subscribe_operations();
    tokio::spawn(async move {
        while let Ok(event) = operations.recv().await {
            let matches = matches!(event.kind, FileOperationKind::Delete | FileOperationKind::Move)
                && event.resource.is_equal_or_parent(&operations_resource.uri, true);
            if matches {
                let _ = operations_resource.changed.send(());
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::memory::MemoryProvider;
    use crate::registry::ProviderRegistry;
    use std::sync::Arc;

    async fn service_with_mem() -> (Arc<FileService>, crate::registry::RegistrationHandle) {
        let registry = ProviderRegistry::new();
        let handle = registry.register("mem", Arc::new(MemoryProvider::full())).unwrap();
        let service = FileService::new(registry.clone());
        (service, handle)
    }

    #[tokio::test]
    async fn init_fails_on_missing_resource() {
        let (service, _handle) = service_with_mem().await;
        let resource = Resource::new(Uri::new("mem", "/missing"), service);
        let err = resource.init().await.unwrap_err();
        assert!(matches!(err, ResourceError::NotFound(_)));
    }

    #[tokio::test]
    async fn init_fails_on_directory() {
        let (service, _handle) = service_with_mem().await;
        service.mkdirp(&Uri::new("mem", "/dir")).await.unwrap();
        let resource = Resource::new(Uri::new("mem", "/dir"), service);
        let err = resource.init().await.unwrap_err();
        assert!(matches!(err, ResourceError::IsADirectory(_)));
    }

    #[tokio::test]
    async fn read_then_save_round_trips_and_bumps_version() {
        let (service, _handle) = service_with_mem().await;
        let uri = Uri::new("mem", "/a.txt");
        service
            .write_file(&uri, Bytes::from_static(b"hello"), WriteFileOptions { create: true, overwrite: true, ..Default::default() })
            .await
            .unwrap();

        let resource = Resource::new(uri, service);
        resource.init().await.unwrap();
        let content = resource.read_contents(None).await.unwrap();
        assert_eq!(&content[..], b"hello");

        resource.save_contents(Bytes::from_static(b"goodbye")).await.unwrap();
        let content = resource.read_contents(None).await.unwrap();
        assert_eq!(&content[..], b"goodbye");
    }

    #[tokio::test]
    async fn external_delete_fires_change_notification() {
        let (service, _handle) = service_with_mem().await;
        let uri = Uri::new("mem", "/a.txt");
        service
            .write_file(&uri, Bytes::from_static(b"hello"), WriteFileOptions { create: true, overwrite: true, ..Default::default() })
            .await
            .unwrap();

        let resource = Resource::new(uri.clone(), service.clone());
        resource.init().await.unwrap();
        let mut changes = resource.on_did_change_contents();

        service.del(&uri, crate::provider::DeleteOptions { recursive: false, use_trash: false }).await.unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), changes.recv()).await.unwrap().unwrap();
    }
}

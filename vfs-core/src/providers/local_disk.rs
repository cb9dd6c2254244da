//! A disk-backed provider. Random access goes through
//! `std::os::unix::fs::FileExt` under `spawn_blocking`; whole-file I/O and
//! directory operations likewise, since `std::fs` would otherwise block the
//! async runtime (the teacher's handlers call `std::fs` directly from an
//! async handler body - acceptable there because axum gives each request its
//! own task, but not safe to copy verbatim onto a shared worker pool here).
//!
//! Watching is backed by `notify`, a dependency the teacher's server
//! `Cargo.toml` already declared but never wired up.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};

use crate::capabilities::Capabilities;
use crate::error::FileSystemError;
use crate::provider::{
    ChangeEvent, ChangeType, CreateOptions, DeleteOptions, FileChangesEvent, FileSystemProvider, Handle, ProviderWatch,
    WatchOptions,
};
use crate::stat::{FileStat, FileType};
use crate::uri::Uri;

/// Maps `uri.path` onto a file under `root`, refusing to leave it.
pub struct LocalDiskProvider {
    root: PathBuf,
    capabilities: Capabilities,
    handles: Mutex<std::collections::BTreeMap<Handle, PathBuf>>,
    next_handle: AtomicU64,
    changes: broadcast::Sender<FileChangesEvent>,
    capability_changes: broadcast::Sender<Capabilities>,
}

impl LocalDiskProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let (changes, _) = broadcast::channel(256);
        let (capability_changes, _) = broadcast::channel(8);
        Self {
            root: root.into(),
            capabilities: Capabilities::FILE_READ_WRITE | Capabilities::FILE_OPEN_READ_WRITE_CLOSE | Capabilities::PATH_CASE_SENSITIVE,
            handles: Mutex::new(std::collections::BTreeMap::new()),
            next_handle: AtomicU64::new(1),
            changes,
            capability_changes,
        }
    }

    pub fn readonly(root: impl Into<PathBuf>) -> Self {
        let mut p = Self::new(root);
        p.capabilities |= Capabilities::READONLY;
        p
    }

    fn resolve(&self, uri: &Uri) -> PathBuf {
        let rel = uri.path.trim_start_matches('/');
        self.root.join(rel)
    }

    fn emit(&self, resource: Uri, change_type: ChangeType) {
        let _ = self.changes.send(FileChangesEvent { changes: vec![ChangeEvent { resource, change_type }] });
    }

    fn io_err(operation: &'static str, uri: &Uri, err: io::Error) -> FileSystemError {
        match err.kind() {
            io::ErrorKind::NotFound => FileSystemError::NotFound { uri: uri.clone() },
            io::ErrorKind::PermissionDenied => FileSystemError::PermissionDenied { uri: uri.clone() },
            io::ErrorKind::AlreadyExists => FileSystemError::Exists { uri: uri.clone() },
            _ => FileSystemError::wrap_provider(operation, uri.clone(), None, err.to_string()),
        }
    }
}

fn file_type_of(meta: &std::fs::Metadata) -> FileType {
    if meta.is_dir() {
        FileType::DIRECTORY
    } else if meta.file_type().is_symlink() {
        FileType::SYMBOLIC_LINK
    } else {
        FileType::FILE
    }
}

fn to_unix_ms(t: std::time::SystemTime) -> i64 {
    t.duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

struct DiskWatch {
    // Dropping the watcher stops it; held here so `dispose` controls the
    // lifetime explicitly rather than relying on scope exit.
    _watcher: RecommendedWatcher,
}

#[async_trait]
impl ProviderWatch for DiskWatch {
    async fn dispose(self: Box<Self>) {}
}

#[async_trait]
impl FileSystemProvider for LocalDiskProvider {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn subscribe_changes(&self) -> broadcast::Receiver<FileChangesEvent> {
        self.changes.subscribe()
    }

    async fn subscribe_capability_changes(&self) -> broadcast::Receiver<Capabilities> {
        self.capability_changes.subscribe()
    }

    async fn stat(&self, uri: &Uri) -> Result<FileStat, FileSystemError> {
        let path = self.resolve(uri);
        let uri = uri.clone();
        tokio::task::spawn_blocking(move || {
            let meta = std::fs::symlink_metadata(&path).map_err(|e| Self::io_err("stat", &uri, e))?;
            let mtime = meta.modified().map(to_unix_ms).unwrap_or(0);
            let ctime = meta.created().map(to_unix_ms).unwrap_or(mtime);
            Ok(FileStat::new(uri, file_type_of(&meta), mtime, ctime, meta.len()))
        })
        .await
        .unwrap()
    }

    async fn readdir(&self, uri: &Uri) -> Result<Vec<(String, FileType)>, FileSystemError> {
        let path = self.resolve(uri);
        let uri = uri.clone();
        tokio::task::spawn_blocking(move || {
            let entries = std::fs::read_dir(&path).map_err(|e| Self::io_err("readdir", &uri, e))?;
            let mut out = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|e| Self::io_err("readdir", &uri, e))?;
                let meta = entry.metadata().map_err(|e| Self::io_err("readdir", &uri, e))?;
                out.push((entry.file_name().to_string_lossy().to_string(), file_type_of(&meta)));
            }
            Ok(out)
        })
        .await
        .unwrap()
    }

    async fn mkdir(&self, uri: &Uri) -> Result<(), FileSystemError> {
        if self.capabilities.contains(Capabilities::READONLY) {
            return Err(FileSystemError::ReadOnly { uri: uri.clone() });
        }
        let path = self.resolve(uri);
        let uri_for_blocking = uri.clone();
        tokio::task::spawn_blocking(move || std::fs::create_dir_all(&path).map_err(|e| Self::io_err("mkdir", &uri_for_blocking, e)))
            .await
            .unwrap()?;
        self.emit(uri.clone(), ChangeType::Added);
        Ok(())
    }

    async fn delete(&self, uri: &Uri, options: DeleteOptions) -> Result<(), FileSystemError> {
        if self.capabilities.contains(Capabilities::READONLY) {
            return Err(FileSystemError::ReadOnly { uri: uri.clone() });
        }
        let path = self.resolve(uri);
        let uri_for_blocking = uri.clone();
        tokio::task::spawn_blocking(move || {
            let meta = std::fs::symlink_metadata(&path).map_err(|e| Self::io_err("delete", &uri_for_blocking, e))?;
            if meta.is_dir() {
                if options.recursive {
                    std::fs::remove_dir_all(&path).map_err(|e| Self::io_err("delete", &uri_for_blocking, e))
                } else {
                    std::fs::remove_dir(&path).map_err(|e| Self::io_err("delete", &uri_for_blocking, e))
                }
            } else {
                std::fs::remove_file(&path).map_err(|e| Self::io_err("delete", &uri_for_blocking, e))
            }
        })
        .await
        .unwrap()?;
        self.emit(uri.clone(), ChangeType::Deleted);
        Ok(())
    }

    async fn rename(&self, source: &Uri, target: &Uri, overwrite: bool) -> Result<(), FileSystemError> {
        if self.capabilities.contains(Capabilities::READONLY) {
            return Err(FileSystemError::ReadOnly { uri: target.clone() });
        }
        let src_path = self.resolve(source);
        let dst_path = self.resolve(target);
        let target_for_blocking = target.clone();
        tokio::task::spawn_blocking(move || {
            if !overwrite && dst_path.exists() {
                return Err(FileSystemError::MoveConflict { target: target_for_blocking });
            }
            std::fs::rename(&src_path, &dst_path).map_err(|e| Self::io_err("rename", &target_for_blocking, e))
        })
        .await
        .unwrap()?;
        self.emit(source.clone(), ChangeType::Deleted);
        self.emit(target.clone(), ChangeType::Added);
        Ok(())
    }

    async fn read_file(&self, uri: &Uri) -> Result<Bytes, FileSystemError> {
        let path = self.resolve(uri);
        let uri = uri.clone();
        tokio::task::spawn_blocking(move || {
            let meta = std::fs::symlink_metadata(&path).map_err(|e| Self::io_err("read_file", &uri, e))?;
            if meta.is_dir() {
                return Err(FileSystemError::IsADirectory { uri });
            }
            std::fs::read(&path).map(Bytes::from).map_err(|e| Self::io_err("read_file", &uri, e))
        })
        .await
        .unwrap()
    }

    async fn write_file(&self, uri: &Uri, data: Bytes, options: CreateOptions) -> Result<(), FileSystemError> {
        if self.capabilities.contains(Capabilities::READONLY) {
            return Err(FileSystemError::ReadOnly { uri: uri.clone() });
        }
        let path = self.resolve(uri);
        let uri_for_blocking = uri.clone();
        tokio::task::spawn_blocking(move || {
            if !options.overwrite && !options.create && path.exists() {
                return Err(FileSystemError::Exists { uri: uri_for_blocking });
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| Self::io_err("write_file", &uri_for_blocking, e))?;
            }
            std::fs::write(&path, &data).map_err(|e| Self::io_err("write_file", &uri_for_blocking, e))
        })
        .await
        .unwrap()?;
        self.emit(uri.clone(), ChangeType::Updated);
        Ok(())
    }

    async fn open(&self, uri: &Uri, options: CreateOptions) -> Result<Handle, FileSystemError> {
        let path = self.resolve(uri);
        let uri_for_blocking = uri.clone();
        let readonly = self.capabilities.contains(Capabilities::READONLY);
        tokio::task::spawn_blocking(move || {
            let mut open_options = OpenOptions::new();
            open_options.read(true);
            if !readonly {
                open_options.write(true).create(options.create);
            }
            // Validate the path is reachable up front; the handle map only
            // stores the path, each read/write reopens it to stay
            // `spawn_blocking`-friendly without juggling `File` across tasks.
            open_options.open(&path).map(|_| ()).map_err(|e| Self::io_err("open", &uri_for_blocking, e))
        })
        .await
        .unwrap()?;
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.handles.lock().unwrap().insert(handle, path);
        Ok(handle)
    }

    async fn close(&self, handle: Handle) -> Result<(), FileSystemError> {
        self.handles.lock().unwrap().remove(&handle);
        Ok(())
    }

    async fn read(&self, handle: Handle, pos: u64, len: usize) -> Result<Bytes, FileSystemError> {
        let path = {
            let handles = self.handles.lock().unwrap();
            handles.get(&handle).cloned()
        };
        let Some(path) = path else {
            return Err(FileSystemError::wrap_provider("read", Uri::new("file", "/"), None, "bad handle"));
        };
        tokio::task::spawn_blocking(move || {
            let file = std::fs::File::open(&path).map_err(|e| Self::io_err("read", &Uri::new("file", path.to_string_lossy()), e))?;
            let mut buf = vec![0u8; len];
            let n = file.read_at(&mut buf, pos).map_err(|e| Self::io_err("read", &Uri::new("file", path.to_string_lossy()), e))?;
            buf.truncate(n);
            Ok(Bytes::from(buf))
        })
        .await
        .unwrap()
    }

    async fn write(&self, handle: Handle, pos: u64, data: &[u8]) -> Result<usize, FileSystemError> {
        let path = {
            let handles = self.handles.lock().unwrap();
            handles.get(&handle).cloned()
        };
        let Some(path) = path else {
            return Err(FileSystemError::wrap_provider("write", Uri::new("file", "/"), None, "bad handle"));
        };
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || {
            let file = OpenOptions::new()
                .write(true)
                .open(&path)
                .map_err(|e| Self::io_err("write", &Uri::new("file", path.to_string_lossy()), e))?;
            file.write_at(&data, pos).map_err(|e| Self::io_err("write", &Uri::new("file", path.to_string_lossy()), e))
        })
        .await
        .unwrap()
    }

    async fn watch(&self, uri: &Uri, options: WatchOptions) -> Result<Box<dyn ProviderWatch>, FileSystemError> {
        let path = self.resolve(uri);
        let mode = if options.recursive { RecursiveMode::Recursive } else { RecursiveMode::NonRecursive };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = tx.send(res);
        })
        .map_err(|e| FileSystemError::wrap_provider("watch", uri.clone(), None, e.to_string()))?;
        watcher
            .watch(&path, mode)
            .map_err(|e| FileSystemError::wrap_provider("watch", uri.clone(), None, e.to_string()))?;

        let changes = self.changes.clone();
        let root = self.root.clone();
        let scheme = uri.scheme.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Ok(event) = event else { continue };
                let change_type = match event.kind {
                    notify::EventKind::Create(_) => ChangeType::Added,
                    notify::EventKind::Remove(_) => ChangeType::Deleted,
                    notify::EventKind::Modify(_) => ChangeType::Updated,
                    _ => continue,
                };
                let mut batch = Vec::new();
                for p in event.paths {
                    if let Ok(rel) = p.strip_prefix(&root) {
                        let resource = Uri::new(scheme.clone(), format!("/{}", rel.to_string_lossy()));
                        batch.push(ChangeEvent { resource, change_type });
                    }
                }
                if !batch.is_empty() {
                    let _ = changes.send(FileChangesEvent { changes: batch });
                }
            }
        });

        Ok(Box::new(DiskWatch { _watcher: watcher }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(path: &str) -> Uri {
        Uri::new("file", path)
    }

    #[tokio::test]
    async fn write_then_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalDiskProvider::new(dir.path());
        provider
            .write_file(&uri("/a.txt"), Bytes::from_static(b"hello"), CreateOptions { create: true, overwrite: true })
            .await
            .unwrap();
        let data = provider.read_file(&uri("/a.txt")).await.unwrap();
        assert_eq!(&data[..], b"hello");
    }

    #[tokio::test]
    async fn mkdir_then_readdir() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalDiskProvider::new(dir.path());
        provider.mkdir(&uri("/sub")).await.unwrap();
        provider
            .write_file(&uri("/sub/a.txt"), Bytes::from_static(b"x"), CreateOptions { create: true, overwrite: true })
            .await
            .unwrap();
        let entries = provider.readdir(&uri("/sub")).await.unwrap();
        assert_eq!(entries, vec![("a.txt".to_string(), FileType::FILE)]);
    }

    #[tokio::test]
    async fn readonly_provider_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalDiskProvider::readonly(dir.path());
        let err = provider
            .write_file(&uri("/a.txt"), Bytes::from_static(b"x"), CreateOptions { create: true, overwrite: true })
            .await
            .unwrap_err();
        assert!(matches!(err, FileSystemError::ReadOnly { .. }));
    }

    #[tokio::test]
    async fn random_access_read_write_through_handle() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalDiskProvider::new(dir.path());
        let handle = provider.open(&uri("/a.txt"), CreateOptions { create: true, overwrite: false }).await.unwrap();
        provider.write(handle, 0, b"hello world").await.unwrap();
        let chunk = provider.read(handle, 6, 5).await.unwrap();
        assert_eq!(&chunk[..], b"world");
        provider.close(handle).await.unwrap();
    }

    #[tokio::test]
    async fn read_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalDiskProvider::new(dir.path());
        let err = provider.read_file(&uri("/missing.txt")).await.unwrap_err();
        assert!(matches!(err, FileSystemError::NotFound { .. }));
    }
}

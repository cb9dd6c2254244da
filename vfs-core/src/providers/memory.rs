//! An in-memory reference provider, shaped after
//! `RMamonts-nfs-mamont`'s `InMemoryVfs` (`BTreeMap` + `RwLock<State>`).
//!
//! Exists so `FileService` can be exercised (spec §8 S1-S3, S5) without a
//! real disk, and so tests can construct providers with an arbitrary
//! capability subset to drive the copy/move dispatch matrix in spec §4.4.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, RwLock};

use crate::capabilities::Capabilities;
use crate::error::FileSystemError;
use crate::provider::{
    ChangeEvent, ChangeType, CreateOptions, DeleteOptions, FileChangesEvent, FileSystemProvider, Handle, ProviderWatch,
    WatchOptions,
};
use crate::stat::{FileStat, FileType};
use crate::stream::ByteStream;
use crate::uri::Uri;

#[derive(Clone)]
enum Node {
    File { data: Bytes, mtime: i64, ctime: i64 },
    Directory { mtime: i64, ctime: i64 },
}

struct State {
    /// Keyed by normalized path. The root `"/"` always exists.
    nodes: BTreeMap<String, Node>,
}

impl State {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Directory { mtime: now_ms(), ctime: now_ms() });
        Self { nodes }
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_millis() as i64
}

struct OpenHandle {
    path: String,
}

pub struct MemoryProvider {
    capabilities: Capabilities,
    state: RwLock<State>,
    handles: Mutex<BTreeMap<Handle, OpenHandle>>,
    next_handle: AtomicU64,
    changes: broadcast::Sender<FileChangesEvent>,
    capability_changes: broadcast::Sender<Capabilities>,
    watch_count: Arc<AtomicU64>,
}

impl MemoryProvider {
    pub fn new(capabilities: Capabilities) -> Self {
        let (changes, _) = broadcast::channel(64);
        let (capability_changes, _) = broadcast::channel(8);
        Self {
            capabilities,
            state: RwLock::new(State::new()),
            handles: Mutex::new(BTreeMap::new()),
            next_handle: AtomicU64::new(1),
            changes,
            capability_changes,
            watch_count: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn full() -> Self {
        Self::new(
            Capabilities::FILE_READ_WRITE
                | Capabilities::FILE_OPEN_READ_WRITE_CLOSE
                | Capabilities::FILE_FOLDER_COPY
                | Capabilities::PATH_CASE_SENSITIVE,
        )
    }

    pub fn random_access_only() -> Self {
        Self::new(Capabilities::FILE_OPEN_READ_WRITE_CLOSE | Capabilities::PATH_CASE_SENSITIVE)
    }

    pub fn whole_file_only() -> Self {
        Self::new(Capabilities::FILE_READ_WRITE | Capabilities::PATH_CASE_SENSITIVE)
    }

    /// Number of currently-open provider-level watches, for tests that
    /// assert the ref-counting invariant in spec §8 invariant 5.
    pub fn open_watch_count(&self) -> u64 {
        self.watch_count.load(Ordering::SeqCst)
    }

    fn watch_count_handle(&self) -> Arc<AtomicU64> {
        self.watch_count.clone()
    }

    fn emit(&self, resource: Uri, change_type: ChangeType) {
        let _ = self.changes.send(FileChangesEvent { changes: vec![ChangeEvent { resource, change_type }] });
    }

    fn key(uri: &Uri) -> String {
        uri.path.clone()
    }
}

struct MemoryWatch {
    provider_watch_count: std::sync::Arc<AtomicU64>,
}

#[async_trait]
impl ProviderWatch for MemoryWatch {
    async fn dispose(self: Box<Self>) {
        self.provider_watch_count.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl FileSystemProvider for MemoryProvider {
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
        let state = self.state.read().await;
        let node = state.nodes.get(&Self::key(uri)).ok_or_else(|| FileSystemError::NotFound { uri: uri.clone() })?;
        Ok(match node {
            Node::File { data, mtime, ctime } => FileStat::new(uri.clone(), FileType::FILE, *mtime, *ctime, data.len() as u64),
            Node::Directory { mtime, ctime } => FileStat::new(uri.clone(), FileType::DIRECTORY, *mtime, *ctime, 0),
        })
    }

    async fn readdir(&self, uri: &Uri) -> Result<Vec<(String, FileType)>, FileSystemError> {
        let state = self.state.read().await;
        let prefix = if uri.path == "/" { "/".to_string() } else { format!("{}/", uri.path) };
        if !state.nodes.contains_key(&Self::key(uri)) {
            return Err(FileSystemError::NotFound { uri: uri.clone() });
        }
        let mut out = Vec::new();
        for (path, node) in state.nodes.iter() {
            if path == &prefix.trim_end_matches('/').to_string() || path == uri.path.as_str() {
                continue;
            }
            if let Some(rest) = path.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    let ty = match node {
                        Node::File { .. } => FileType::FILE,
                        Node::Directory { .. } => FileType::DIRECTORY,
                    };
                    out.push((rest.to_string(), ty));
                }
            }
        }
        Ok(out)
    }

    async fn mkdir(&self, uri: &Uri) -> Result<(), FileSystemError> {
        let mut state = self.state.write().await;
        let key = Self::key(uri);
        if let Some(Node::File { .. }) = state.nodes.get(&key) {
            return Err(FileSystemError::NotADirectory { uri: uri.clone() });
        }
        let ts = now_ms();
        state.nodes.entry(key).or_insert(Node::Directory { mtime: ts, ctime: ts });
        drop(state);
        self.emit(uri.clone(), ChangeType::Added);
        Ok(())
    }

    async fn delete(&self, uri: &Uri, options: DeleteOptions) -> Result<(), FileSystemError> {
        let mut state = self.state.write().await;
        let key = Self::key(uri);
        match state.nodes.get(&key) {
            None => return Err(FileSystemError::NotFound { uri: uri.clone() }),
            Some(Node::Directory { .. }) => {
                let prefix = format!("{key}/");
                let has_children = state.nodes.keys().any(|p| p.starts_with(&prefix));
                if has_children && !options.recursive {
                    return Err(FileSystemError::Provider {
                        operation: "delete",
                        source: uri.clone(),
                        target: None,
                        message: "directory not empty".to_string(),
                    });
                }
                state.nodes.retain(|p, _| p != &key && !p.starts_with(&prefix));
            }
            Some(Node::File { .. }) => {
                state.nodes.remove(&key);
            }
        }
        drop(state);
        self.emit(uri.clone(), ChangeType::Deleted);
        Ok(())
    }

    async fn rename(&self, source: &Uri, target: &Uri, overwrite: bool) -> Result<(), FileSystemError> {
        let mut state = self.state.write().await;
        let src_key = Self::key(source);
        let dst_key = Self::key(target);
        if !overwrite && state.nodes.contains_key(&dst_key) {
            return Err(FileSystemError::MoveConflict { target: target.clone() });
        }
        let moved: Vec<(String, Node)> = state
            .nodes
            .iter()
            .filter(|(p, _)| *p == &src_key || p.starts_with(&format!("{src_key}/")))
            .map(|(p, n)| (p.clone(), n.clone()))
            .collect();
        if moved.is_empty() {
            return Err(FileSystemError::NotFound { uri: source.clone() });
        }
        for (p, n) in moved {
            let new_path = format!("{dst_key}{}", &p[src_key.len()..]);
            state.nodes.remove(&p);
            state.nodes.insert(new_path, n);
        }
        drop(state);
        self.emit(source.clone(), ChangeType::Deleted);
        self.emit(target.clone(), ChangeType::Added);
        Ok(())
    }

    async fn copy(&self, source: &Uri, target: &Uri, overwrite: bool) -> Result<(), FileSystemError> {
        let mut state = self.state.write().await;
        let src_key = Self::key(source);
        let dst_key = Self::key(target);
        if !overwrite && state.nodes.contains_key(&dst_key) {
            return Err(FileSystemError::MoveConflict { target: target.clone() });
        }
        let copied: Vec<(String, Node)> = state
            .nodes
            .iter()
            .filter(|(p, _)| *p == &src_key || p.starts_with(&format!("{src_key}/")))
            .map(|(p, n)| (p.clone(), n.clone()))
            .collect();
        if copied.is_empty() {
            return Err(FileSystemError::NotFound { uri: source.clone() });
        }
        for (p, n) in copied {
            let new_path = format!("{dst_key}{}", &p[src_key.len()..]);
            state.nodes.insert(new_path, n);
        }
        drop(state);
        self.emit(target.clone(), ChangeType::Added);
        Ok(())
    }

    async fn read_file(&self, uri: &Uri) -> Result<Bytes, FileSystemError> {
        let state = self.state.read().await;
        match state.nodes.get(&Self::key(uri)) {
            Some(Node::File { data, .. }) => Ok(data.clone()),
            Some(Node::Directory { .. }) => Err(FileSystemError::IsADirectory { uri: uri.clone() }),
            None => Err(FileSystemError::NotFound { uri: uri.clone() }),
        }
    }

    async fn write_file(&self, uri: &Uri, data: Bytes, options: CreateOptions) -> Result<(), FileSystemError> {
        let mut state = self.state.write().await;
        let key = Self::key(uri);
        if let Some(Node::Directory { .. }) = state.nodes.get(&key) {
            return Err(FileSystemError::IsADirectory { uri: uri.clone() });
        }
        if !options.overwrite && !options.create && state.nodes.contains_key(&key) {
            return Err(FileSystemError::Exists { uri: uri.clone() });
        }
        let ts = now_ms();
        let ctime = match state.nodes.get(&key) {
            Some(Node::File { ctime, .. }) => *ctime,
            _ => ts,
        };
        state.nodes.insert(key, Node::File { data, mtime: ts, ctime });
        drop(state);
        self.emit(uri.clone(), ChangeType::Updated);
        Ok(())
    }

    async fn open(&self, uri: &Uri, options: CreateOptions) -> Result<Handle, FileSystemError> {
        let mut state = self.state.write().await;
        let key = Self::key(uri);
        if !state.nodes.contains_key(&key) {
            if !options.create {
                return Err(FileSystemError::NotFound { uri: uri.clone() });
            }
            let ts = now_ms();
            state.nodes.insert(key.clone(), Node::File { data: Bytes::new(), mtime: ts, ctime: ts });
        }
        drop(state);
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.handles.lock().unwrap().insert(handle, OpenHandle { path: key });
        Ok(handle)
    }

    async fn close(&self, handle: Handle) -> Result<(), FileSystemError> {
        self.handles.lock().unwrap().remove(&handle);
        Ok(())
    }

    async fn read(&self, handle: Handle, pos: u64, len: usize) -> Result<Bytes, FileSystemError> {
        let path = {
            let handles = self.handles.lock().unwrap();
            handles.get(&handle).map(|h| h.path.clone())
        };
        let Some(path) = path else {
            return Err(FileSystemError::Provider {
                operation: "read",
                source: Uri::new("mem", "/"),
                target: None,
                message: "bad handle".to_string(),
            });
        };
        let state = self.state.read().await;
        match state.nodes.get(&path) {
            Some(Node::File { data, .. }) => {
                let start = (pos as usize).min(data.len());
                let end = (start + len).min(data.len());
                Ok(data.slice(start..end))
            }
            _ => Ok(Bytes::new()),
        }
    }

    async fn write(&self, handle: Handle, pos: u64, data: &[u8]) -> Result<usize, FileSystemError> {
        let path = {
            let handles = self.handles.lock().unwrap();
            handles.get(&handle).map(|h| h.path.clone())
        };
        let Some(path) = path else {
            return Err(FileSystemError::Provider {
                operation: "write",
                source: Uri::new("mem", "/"),
                target: None,
                message: "bad handle".to_string(),
            });
        };
        let mut state = self.state.write().await;
        let entry = state.nodes.entry(path.clone()).or_insert_with(|| Node::File { data: Bytes::new(), mtime: now_ms(), ctime: now_ms() });
        if let Node::File { data: existing, mtime, .. } = entry {
            let start = pos as usize;
            let end = start + data.len();
            let mut buf = existing.to_vec();
            if buf.len() < end {
                buf.resize(end, 0);
            }
            buf[start..end].copy_from_slice(data);
            *existing = Bytes::from(buf);
            *mtime = now_ms();
            Ok(data.len())
        } else {
            Err(FileSystemError::IsADirectory { uri: Uri::new("mem", path) })
        }
    }

    async fn watch(&self, _uri: &Uri, _options: WatchOptions) -> Result<Box<dyn ProviderWatch>, FileSystemError> {
        self.watch_count.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryWatch { provider_watch_count: self.watch_count_handle() }))
    }

    async fn read_file_stream(&self, uri: &Uri) -> Result<ByteStream, FileSystemError> {
        let data = self.read_file(uri).await?;
        let (tx, rx) = crate::stream::channel(4);
        tokio::spawn(async move {
            for chunk in data.chunks(64 * 1024) {
                if tx.send(Bytes::copy_from_slice(chunk)).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(path: &str) -> Uri {
        Uri::new("mem", path)
    }

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let provider = MemoryProvider::full();
        provider.write_file(&uri("/a.txt"), Bytes::from_static(b"hello"), CreateOptions { create: true, overwrite: true }).await.unwrap();
        let data = provider.read_file(&uri("/a.txt")).await.unwrap();
        assert_eq!(&data[..], b"hello");
    }

    #[tokio::test]
    async fn read_missing_file_is_not_found() {
        let provider = MemoryProvider::full();
        let err = provider.read_file(&uri("/missing.txt")).await.unwrap_err();
        assert!(matches!(err, FileSystemError::NotFound { .. }));
    }

    #[tokio::test]
    async fn mkdir_then_readdir_lists_children() {
        let provider = MemoryProvider::full();
        provider.mkdir(&uri("/dir")).await.unwrap();
        provider.write_file(&uri("/dir/a.txt"), Bytes::from_static(b"x"), CreateOptions { create: true, overwrite: true }).await.unwrap();
        let mut entries = provider.readdir(&uri("/dir")).await.unwrap();
        entries.sort();
        assert_eq!(entries, vec![("a.txt".to_string(), FileType::FILE)]);
    }

    #[tokio::test]
    async fn delete_non_empty_dir_requires_recursive() {
        let provider = MemoryProvider::full();
        provider.mkdir(&uri("/dir")).await.unwrap();
        provider.write_file(&uri("/dir/a.txt"), Bytes::from_static(b"x"), CreateOptions { create: true, overwrite: true }).await.unwrap();
        let err = provider.delete(&uri("/dir"), DeleteOptions { recursive: false, use_trash: false }).await.unwrap_err();
        assert!(matches!(err, FileSystemError::Provider { .. }));
        provider.delete(&uri("/dir"), DeleteOptions { recursive: true, use_trash: false }).await.unwrap();
        assert!(provider.stat(&uri("/dir")).await.is_err());
    }

    #[tokio::test]
    async fn rename_moves_subtree() {
        let provider = MemoryProvider::full();
        provider.mkdir(&uri("/dir")).await.unwrap();
        provider.write_file(&uri("/dir/a.txt"), Bytes::from_static(b"x"), CreateOptions { create: true, overwrite: true }).await.unwrap();
        provider.rename(&uri("/dir"), &uri("/dir2"), false).await.unwrap();
        assert!(provider.stat(&uri("/dir")).await.is_err());
        assert!(provider.stat(&uri("/dir2/a.txt")).await.is_ok());
    }

    #[tokio::test]
    async fn random_access_read_write_through_handle() {
        let provider = MemoryProvider::full();
        let handle = provider.open(&uri("/a.txt"), CreateOptions { create: true, overwrite: false }).await.unwrap();
        provider.write(handle, 0, b"hello world").await.unwrap();
        let chunk = provider.read(handle, 6, 5).await.unwrap();
        assert_eq!(&chunk[..], b"world");
        provider.close(handle).await.unwrap();
    }

    #[tokio::test]
    async fn watch_dispose_decrements_count() {
        let provider = MemoryProvider::full();
        let watch = provider.watch(&uri("/"), WatchOptions::default()).await.unwrap();
        assert_eq!(provider.open_watch_count(), 1);
        watch.dispose().await;
        assert_eq!(provider.open_watch_count(), 0);
    }

    #[tokio::test]
    async fn subscribers_see_change_events() {
        let provider = MemoryProvider::full();
        let mut rx = provider.subscribe_changes().await;
        provider.write_file(&uri("/a.txt"), Bytes::from_static(b"x"), CreateOptions { create: true, overwrite: true }).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert!(event.contains(&uri("/a.txt"), true));
    }
}

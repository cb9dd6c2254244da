//! The service core (spec §4.2-§4.6): resolve, read, write, move/copy,
//! mkdirp, delete, watch, and the change/operation event fan-out.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex as AsyncMutex};

use crate::capabilities::Capabilities;
use crate::error::FileSystemError;
use crate::provider::{CreateOptions, DeleteOptions, FileSystemProvider, Handle, ProviderWatch, WatchOptions};
use crate::queue::WriteQueue;
use crate::registry::{ActivationEvent, ProviderRegistry, RegistrationEvent};
use crate::stat::{compute_etag, FileStat, FileType, ETAG_DISABLED};
use crate::stream::{self, ByteStream};
use crate::uri::Uri;

const PIPE_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub resolve_metadata: bool,
    pub resolve_to: Vec<Uri>,
    pub resolve_single_child_descendants: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ReadFileOptions {
    pub etag: Option<String>,
    pub position: Option<u64>,
    pub length: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct WriteFileOptions {
    pub create: bool,
    pub overwrite: bool,
    pub etag: Option<String>,
    pub mtime: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperationKind {
    Create,
    Write,
    Move,
    Copy,
    Delete,
}

#[derive(Debug, Clone)]
pub struct OperationEvent {
    pub kind: FileOperationKind,
    pub resource: Uri,
    pub target: Option<Uri>,
    pub stat: Option<FileStat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpMode {
    Move,
    Copy,
}

enum WatchSlot {
    Pending,
    Ready(Box<dyn ProviderWatch>),
    Disposed,
}

struct WatchState {
    count: AtomicU64,
    slot: AsyncMutex<WatchSlot>,
}

impl WatchState {
    fn new() -> Self {
        Self { count: AtomicU64::new(0), slot: AsyncMutex::new(WatchSlot::Pending) }
    }
}

fn watch_key(uri: &Uri, options: &WatchOptions) -> String {
    let mut excludes = options.excludes.clone();
    excludes.sort();
    format!("{}::{}::{}", uri, options.recursive, excludes.join(","))
}

async fn release_watch(key: &str, watches: &Arc<DashMap<String, Arc<WatchState>>>) {
    let state = match watches.get(key) {
        Some(e) => e.clone(),
        None => return,
    };
    if state.count.fetch_sub(1, Ordering::SeqCst) == 1 {
        let mut slot = state.slot.lock().await;
        let previous = std::mem::replace(&mut *slot, WatchSlot::Disposed);
        drop(slot);
        if let WatchSlot::Ready(watch) = previous {
            watch.dispose().await;
        }
        watches.remove(key);
    }
}

/// Disposer for a [`FileService::watch`] subscription. Disposing the last of
/// `n` overlapping subscriptions for the same `(uri, options)` closes the
/// underlying provider watch (spec §4.5, §8 invariant 5).
pub struct WatchSubscription {
    key: String,
    watches: Arc<DashMap<String, Arc<WatchState>>>,
    disposed: bool,
}

impl WatchSubscription {
    pub async fn dispose(mut self) {
        self.disposed = true;
        release_watch(&self.key, &self.watches).await;
    }
}

impl Drop for WatchSubscription {
    fn drop(&mut self) {
        if !self.disposed {
            let key = self.key.clone();
            let watches = self.watches.clone();
            tokio::spawn(async move {
                release_watch(&key, &watches).await;
            });
        }
    }
}

pub struct FileService {
    registry: Arc<ProviderRegistry>,
    write_queue: WriteQueue,
    watches: Arc<DashMap<String, Arc<WatchState>>>,
    file_changes: broadcast::Sender<crate::provider::FileChangesEvent>,
    operations: broadcast::Sender<OperationEvent>,
    capability_changes: broadcast::Sender<(String, Capabilities)>,
}

impl FileService {
    pub fn new(registry: Arc<ProviderRegistry>) -> Arc<Self> {
        let (file_changes, _) = broadcast::channel(256);
        let (operations, _) = broadcast::channel(256);
        let (capability_changes, _) = broadcast::channel(32);
        let service = Arc::new(Self {
            registry: registry.clone(),
            write_queue: WriteQueue::new(),
            watches: Arc::new(DashMap::new()),
            file_changes,
            operations,
            capability_changes,
        });
        spawn_change_forwarder(registry, service.clone());
        service
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn subscribe_file_changes(&self) -> broadcast::Receiver<crate::provider::FileChangesEvent> {
        self.file_changes.subscribe()
    }

    pub fn subscribe_operations(&self) -> broadcast::Receiver<OperationEvent> {
        self.operations.subscribe()
    }

    pub fn subscribe_capability_changes(&self) -> broadcast::Receiver<(String, Capabilities)> {
        self.capability_changes.subscribe()
    }

    pub fn subscribe_registrations(&self) -> broadcast::Receiver<RegistrationEvent> {
        self.registry.subscribe_registrations()
    }

    pub fn subscribe_will_activate(&self) -> broadcast::Receiver<ActivationEvent> {
        self.registry.subscribe_will_activate()
    }

    pub async fn exists(&self, uri: &Uri) -> bool {
        match self.registry.with_provider(uri).await {
            Ok(provider) => provider.stat(uri).await.is_ok(),
            Err(_) => false,
        }
    }

    pub async fn resolve(&self, uri: &Uri, options: ResolveOptions) -> Result<FileStat, FileSystemError> {
        let provider = self.registry.with_provider(uri).await?;
        let mut stat = provider.stat(uri).await?;
        if stat.is_directory() {
            stat.children = Some(expand_directory(&provider, uri, &options).await);
        }
        Ok(stat)
    }

    pub async fn resolve_all(&self, uris: &[Uri], options: ResolveOptions) -> Vec<(Uri, Result<FileStat, FileSystemError>)> {
        let mut out = Vec::with_capacity(uris.len());
        for uri in uris {
            out.push((uri.clone(), self.resolve(uri, options.clone()).await));
        }
        out
    }

    pub async fn read_file(&self, uri: &Uri, options: ReadFileOptions) -> Result<(Bytes, FileStat), FileSystemError> {
        let stat = self.resolve(uri, ResolveOptions { resolve_metadata: true, ..Default::default() }).await?;
        if stat.is_directory() {
            return Err(FileSystemError::IsADirectory { uri: uri.clone() });
        }
        check_read_etag(uri, &options, &stat)?;

        let provider = self.registry.with_provider(uri).await?;
        let caps = provider.capabilities();
        let data = if caps.contains(Capabilities::FILE_OPEN_READ_WRITE_CLOSE) && !caps.contains(Capabilities::FILE_READ_WRITE) {
            read_all_via_random_access(&provider, uri).await?
        } else {
            provider.read_file(uri).await?
        };
        Ok((slice_with_position_length(data, options.position, options.length), stat))
    }

    pub async fn read_file_stream(&self, uri: &Uri, options: ReadFileOptions) -> Result<(ByteStream, FileStat), FileSystemError> {
        let stat = self.resolve(uri, ResolveOptions { resolve_metadata: true, ..Default::default() }).await?;
        if stat.is_directory() {
            return Err(FileSystemError::IsADirectory { uri: uri.clone() });
        }
        check_read_etag(uri, &options, &stat)?;

        let provider = self.registry.with_provider(uri).await?;
        let caps = provider.capabilities();
        if caps.contains(Capabilities::FILE_READ_STREAM) {
            return Ok((provider.read_file_stream(uri).await?, stat));
        }
        if caps.contains(Capabilities::FILE_OPEN_READ_WRITE_CLOSE) {
            let (tx, rx) = stream::channel(4);
            let provider = provider.clone();
            let uri = uri.clone();
            tokio::spawn(async move {
                let handle = match provider.open(&uri, CreateOptions::default()).await {
                    Ok(h) => h,
                    Err(e) => {
                        tx.error(io::Error::other(e.to_string())).await;
                        return;
                    }
                };
                let mut pos = 0u64;
                loop {
                    match provider.read(handle, pos, PIPE_BUFFER_SIZE).await {
                        Ok(chunk) if chunk.is_empty() => break,
                        Ok(chunk) => {
                            pos += chunk.len() as u64;
                            if tx.send(chunk).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tx.error(io::Error::other(e.to_string())).await;
                            break;
                        }
                    }
                }
                provider.close(handle).await.ok();
            });
            return Ok((rx, stat));
        }
        let data = provider.read_file(uri).await?;
        let (tx, rx) = stream::channel(4);
        tokio::spawn(async move {
            let _ = tx.send(data).await;
        });
        Ok((rx, stat))
    }

    pub async fn write_file(&self, uri: &Uri, data: Bytes, options: WriteFileOptions) -> Result<FileStat, FileSystemError> {
        let provider = self.registry.with_provider(uri).await?;
        self.validate_write_file(&provider, uri, &options).await?;

        let key = WriteQueue::queue_key(provider.capabilities(), uri);
        let create = options.create;
        let overwrite = options.overwrite;
        let provider_for_queue = provider.clone();
        let uri_owned = uri.clone();
        self.write_queue
            .run(key, move || async move {
                if provider_for_queue.capabilities().contains(Capabilities::FILE_READ_WRITE) {
                    provider_for_queue.write_file(&uri_owned, data, CreateOptions { create, overwrite }).await
                } else {
                    write_all_via_random_access(&provider_for_queue, &uri_owned, &data, create, overwrite).await
                }
            })
            .await?;

        let stat = self.resolve(uri, ResolveOptions { resolve_metadata: true, ..Default::default() }).await?;
        let _ = self.operations.send(OperationEvent { kind: FileOperationKind::Write, resource: uri.clone(), target: None, stat: Some(stat.clone()) });
        Ok(stat)
    }

    pub async fn write_file_stream(&self, uri: &Uri, mut input: ByteStream, options: WriteFileOptions) -> Result<FileStat, FileSystemError> {
        let provider = self.registry.with_provider(uri).await?;
        self.validate_write_file(&provider, uri, &options).await?;

        let key = WriteQueue::queue_key(provider.capabilities(), uri);
        let caps = provider.capabilities();
        let random_access_only = caps.contains(Capabilities::FILE_OPEN_READ_WRITE_CLOSE) && !caps.contains(Capabilities::FILE_READ_WRITE);
        let create = options.create;
        let overwrite = options.overwrite;
        let provider_for_queue = provider.clone();
        let uri_owned = uri.clone();
        self.write_queue
            .run(key, move || async move {
                if random_access_only {
                    stream_to_random_access(&provider_for_queue, &uri_owned, &mut input, create, overwrite).await
                } else {
                    let data = stream::consume_stream(input)
                        .await
                        .map_err(|e| FileSystemError::wrap_provider("write_file", uri_owned.clone(), None, e.to_string()))?;
                    provider_for_queue.write_file(&uri_owned, data, CreateOptions { create, overwrite }).await
                }
            })
            .await?;

        let stat = self.resolve(uri, ResolveOptions { resolve_metadata: true, ..Default::default() }).await?;
        let _ = self.operations.send(OperationEvent { kind: FileOperationKind::Write, resource: uri.clone(), target: None, stat: Some(stat.clone()) });
        Ok(stat)
    }

    /// Preflight per spec §4.3: read-only rejection, directory rejection,
    /// dirty-write precondition, and `mkdirp` of the parent when the file
    /// does not yet exist.
    async fn validate_write_file(&self, provider: &Arc<dyn FileSystemProvider>, uri: &Uri, options: &WriteFileOptions) -> Result<(), FileSystemError> {
        if provider.capabilities().contains(Capabilities::READONLY) {
            return Err(FileSystemError::ReadOnly { uri: uri.clone() });
        }
        match provider.stat(uri).await {
            Ok(stat) => {
                if stat.is_directory() {
                    return Err(FileSystemError::IsADirectory { uri: uri.clone() });
                }
                if let (Some(caller_mtime), Some(caller_etag)) = (options.mtime, &options.etag) {
                    if caller_etag != ETAG_DISABLED && stat.mtime > caller_mtime {
                        // Hashed against the *caller's* mtime, not the disk
                        // mtime (spec §4.3, preserved per the Open Question
                        // on dirty-write comparison).
                        let expected = compute_etag(caller_mtime, stat.size);
                        if &expected != caller_etag {
                            return Err(FileSystemError::ModifiedSince { uri: uri.clone() });
                        }
                    }
                }
                Ok(())
            }
            Err(FileSystemError::NotFound { .. }) => {
                if let Some(parent) = uri.parent() {
                    self.mkdirp(&parent).await?;
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn create_file(&self, uri: &Uri, data: Bytes, mut options: WriteFileOptions) -> Result<FileStat, FileSystemError> {
        if !options.overwrite && self.exists(uri).await {
            return Err(FileSystemError::ModifiedSince { uri: uri.clone() });
        }
        options.create = true;
        let stat = self.write_file(uri, data, options).await?;
        let _ = self.operations.send(OperationEvent { kind: FileOperationKind::Create, resource: uri.clone(), target: None, stat: Some(stat.clone()) });
        Ok(stat)
    }

    pub async fn mkdirp(&self, dir: &Uri) -> Result<(), FileSystemError> {
        let provider = self.registry.with_provider(dir).await?;
        let mut missing = Vec::new();
        let mut current = dir.clone();
        loop {
            match provider.stat(&current).await {
                Ok(stat) => {
                    if !stat.is_directory() {
                        return Err(FileSystemError::NotADirectory { uri: current });
                    }
                    break;
                }
                Err(FileSystemError::NotFound { .. }) => {
                    missing.push(current.clone());
                    match current.parent() {
                        Some(parent) => current = parent,
                        None => break,
                    }
                }
                Err(e) => return Err(e),
            }
        }
        for uri in missing.into_iter().rev() {
            match provider.mkdir(&uri).await {
                Ok(()) => {}
                Err(FileSystemError::Exists { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub async fn del(&self, uri: &Uri, options: DeleteOptions) -> Result<(), FileSystemError> {
        let provider = self.registry.with_provider(uri).await?;
        if options.use_trash && !provider.capabilities().contains(Capabilities::TRASH) {
            return Err(FileSystemError::Unsupported { uri: uri.clone() });
        }
        let stat = provider.stat(uri).await?;
        if stat.is_directory() && !options.recursive {
            let children = provider.readdir(uri).await?;
            if !children.is_empty() {
                return Err(FileSystemError::wrap_provider("delete", uri.clone(), None, "directory not empty"));
            }
        }
        provider.delete(uri, options).await?;
        let _ = self.operations.send(OperationEvent { kind: FileOperationKind::Delete, resource: uri.clone(), target: None, stat: None });
        Ok(())
    }

    pub async fn mv(&self, src: &Uri, dst: &Uri, overwrite: bool) -> Result<(), FileSystemError> {
        let mode = self.do_move_copy(src, dst, OpMode::Move, overwrite).await?;
        let kind = if mode == OpMode::Move { FileOperationKind::Move } else { FileOperationKind::Copy };
        let stat = self.resolve(dst, ResolveOptions { resolve_metadata: true, ..Default::default() }).await.ok();
        let _ = self.operations.send(OperationEvent { kind, resource: src.clone(), target: Some(dst.clone()), stat });
        Ok(())
    }

    pub async fn copy(&self, src: &Uri, dst: &Uri, overwrite: bool) -> Result<(), FileSystemError> {
        self.do_move_copy(src, dst, OpMode::Copy, overwrite).await?;
        let stat = self.resolve(dst, ResolveOptions { resolve_metadata: true, ..Default::default() }).await.ok();
        let _ = self.operations.send(OperationEvent { kind: FileOperationKind::Copy, resource: src.clone(), target: Some(dst.clone()), stat });
        Ok(())
    }

    fn do_move_copy<'a>(&'a self, src: &'a Uri, dst: &'a Uri, mode: OpMode, overwrite: bool) -> Pin<Box<dyn Future<Output = Result<OpMode, FileSystemError>> + Send + 'a>> {
        Box::pin(async move {
            if src.to_string() == dst.to_string() {
                return Ok(mode);
            }

            let src_provider = self.registry.with_provider(src).await?;
            let dst_provider = self.registry.with_provider(dst).await?;
            let src_case_sensitive = src_provider.capabilities().is_case_sensitive();
            let dst_case_sensitive = dst_provider.capabilities().is_case_sensitive();
            let same_provider = src.scheme == dst.scheme;

            let same_path_different_case =
                same_provider && !src_case_sensitive && src.path != dst.path && src.path.to_lowercase() == dst.path.to_lowercase();

            if same_path_different_case && mode == OpMode::Copy {
                return Err(FileSystemError::Unsupported { uri: dst.clone() });
            }

            if dst.is_equal_or_parent(src, dst_case_sensitive) {
                return Err(FileSystemError::MoveIntoSelf { source: src.clone(), target: dst.clone() });
            }

            let dst_exists = dst_provider.stat(dst).await.is_ok();
            if dst_exists && !same_path_different_case {
                if !overwrite {
                    return Err(FileSystemError::MoveConflict { target: dst.clone() });
                }
                if src.is_equal_or_parent(dst, src_case_sensitive) {
                    // Deleting dst first would delete src too.
                    return Err(FileSystemError::MoveConflict { target: dst.clone() });
                }
                self.del(dst, DeleteOptions { recursive: true, use_trash: false }).await?;
            }

            if let Some(parent) = dst.parent() {
                self.mkdirp(&parent).await?;
            }

            match mode {
                OpMode::Copy => {
                    if same_provider && src_provider.capabilities().contains(Capabilities::FILE_FOLDER_COPY) {
                        src_provider.copy(src, dst, overwrite).await?;
                    } else {
                        let stat = src_provider.stat(src).await?;
                        if stat.is_directory() {
                            do_copy_folder(&src_provider, &dst_provider, src, dst).await?;
                        } else {
                            do_copy_file(&src_provider, &dst_provider, src, dst, overwrite).await?;
                        }
                    }
                    Ok(OpMode::Copy)
                }
                OpMode::Move => {
                    if same_provider {
                        src_provider.rename(src, dst, overwrite).await?;
                        Ok(OpMode::Move)
                    } else {
                        self.do_move_copy(src, dst, OpMode::Copy, overwrite).await?;
                        self.del(src, DeleteOptions { recursive: true, use_trash: false }).await?;
                        Ok(OpMode::Copy)
                    }
                }
            }
        })
    }

    pub fn watch(self: &Arc<Self>, uri: Uri, options: WatchOptions) -> WatchSubscription {
        let key = watch_key(&uri, &options);
        let state = {
            let entry = self.watches.entry(key.clone()).or_insert_with(|| Arc::new(WatchState::new()));
            entry.clone()
        };
        let is_first = state.count.fetch_add(1, Ordering::SeqCst) == 0;
        if is_first {
            let service = self.clone();
            tokio::spawn(async move {
                let provider = match service.registry.with_provider(&uri).await {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::debug!(uri = %uri, error = %e, "watch: no provider");
                        return;
                    }
                };
                match provider.watch(&uri, options).await {
                    Ok(watch) => {
                        let mut slot = state.slot.lock().await;
                        if matches!(*slot, WatchSlot::Disposed) {
                            drop(slot);
                            watch.dispose().await;
                        } else {
                            *slot = WatchSlot::Ready(watch);
                        }
                    }
                    Err(e) => tracing::debug!(uri = %uri, error = %e, "watch: provider watch failed"),
                }
            });
        }
        WatchSubscription { key, watches: self.watches.clone(), disposed: false }
    }
}

fn spawn_change_forwarder(registry: Arc<ProviderRegistry>, service: Arc<FileService>) {
    tokio::spawn(async move {
        let mut registrations = registry.subscribe_registrations();
        while let Ok(event) = registrations.recv().await {
            if !event.added {
                continue;
            }
            let Some(provider) = registry.get(&event.scheme) else { continue };

            let changes_service = service.clone();
            let changes_provider = provider.clone();
            tokio::spawn(async move {
                let mut changes = changes_provider.subscribe_changes().await;
                while let Ok(batch) = changes.recv().await {
                    let _ = changes_service.file_changes.send(batch);
                }
            });

            let caps_service = service.clone();
            let caps_provider = provider.clone();
            let scheme = event.scheme.clone();
            tokio::spawn(async move {
                let mut caps_changes = caps_provider.subscribe_capability_changes().await;
                while let Ok(new_caps) = caps_changes.recv().await {
                    let _ = caps_service.capability_changes.send((scheme.clone(), new_caps));
                }
            });
        }
    });
}

fn check_read_etag(uri: &Uri, options: &ReadFileOptions, stat: &FileStat) -> Result<(), FileSystemError> {
    if let Some(etag) = &options.etag {
        if etag != ETAG_DISABLED && etag == &stat.etag {
            return Err(FileSystemError::NotModifiedSince { uri: uri.clone() });
        }
    }
    Ok(())
}

fn slice_with_position_length(data: Bytes, position: Option<u64>, length: Option<u64>) -> Bytes {
    let start = position.unwrap_or(0) as usize;
    if start >= data.len() {
        return Bytes::new();
    }
    let end = match length {
        Some(len) => (start + len as usize).min(data.len()),
        None => data.len(),
    };
    data.slice(start..end)
}

fn expand_directory<'a>(
    provider: &'a Arc<dyn FileSystemProvider>,
    dir_uri: &'a Uri,
    options: &'a ResolveOptions,
) -> Pin<Box<dyn Future<Output = Vec<FileStat>> + Send + 'a>> {
    Box::pin(async move {
        let entries = match provider.readdir(dir_uri).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(uri = %dir_uri, error = %e, "readdir failed during resolve");
                return Vec::new();
            }
        };
        let case_sensitive = provider.capabilities().is_case_sensitive();
        let single_child = entries.len() == 1;
        let mut children = Vec::with_capacity(entries.len());
        for (name, file_type) in entries {
            let child_uri = dir_uri.join(&name);
            let mut child_stat = if options.resolve_metadata {
                match provider.stat(&child_uri).await {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::debug!(uri = %child_uri, error = %e, "stat failed during resolve");
                        continue;
                    }
                }
            } else {
                FileStat {
                    resource: child_uri.clone(),
                    name: name.clone(),
                    file_type,
                    mtime: 0,
                    ctime: 0,
                    size: 0,
                    etag: ETAG_DISABLED.to_string(),
                    children: None,
                }
            };
            if child_stat.is_directory() {
                let under_resolve_to = options.resolve_to.iter().any(|target| child_uri.is_equal_or_parent(target, case_sensitive));
                let should_expand = under_resolve_to || (options.resolve_single_child_descendants && single_child);
                if should_expand {
                    child_stat.children = Some(expand_directory(provider, &child_uri, options).await);
                }
            }
            children.push(child_stat);
        }
        children
    })
}

async fn read_all_via_random_access(provider: &Arc<dyn FileSystemProvider>, uri: &Uri) -> Result<Bytes, FileSystemError> {
    let handle = provider.open(uri, CreateOptions::default()).await?;
    let result = read_all_inner(provider, handle).await;
    provider.close(handle).await.ok();
    result
}

async fn read_all_inner(provider: &Arc<dyn FileSystemProvider>, handle: Handle) -> Result<Bytes, FileSystemError> {
    let mut buf = Vec::new();
    let mut pos = 0u64;
    loop {
        let chunk = provider.read(handle, pos, PIPE_BUFFER_SIZE).await?;
        if chunk.is_empty() {
            break;
        }
        pos += chunk.len() as u64;
        buf.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buf))
}

async fn write_all_via_random_access(provider: &Arc<dyn FileSystemProvider>, uri: &Uri, data: &[u8], create: bool, overwrite: bool) -> Result<(), FileSystemError> {
    let handle = provider.open(uri, CreateOptions { create, overwrite }).await?;
    let result = write_all_inner(provider, handle, data).await;
    provider.close(handle).await.ok();
    result
}

async fn write_all_inner(provider: &Arc<dyn FileSystemProvider>, handle: Handle, data: &[u8]) -> Result<(), FileSystemError> {
    let mut pos = 0usize;
    while pos < data.len() {
        let n = provider.write(handle, pos as u64, &data[pos..]).await?;
        if n == 0 {
            break;
        }
        pos += n;
    }
    Ok(())
}

async fn stream_to_random_access(provider: &Arc<dyn FileSystemProvider>, uri: &Uri, input: &mut ByteStream, create: bool, overwrite: bool) -> Result<(), FileSystemError> {
    let handle = provider.open(uri, CreateOptions { create, overwrite }).await?;
    let result = pump_stream_to_handle(provider, handle, input).await;
    provider.close(handle).await.ok();
    result
}

async fn pump_stream_to_handle(provider: &Arc<dyn FileSystemProvider>, handle: Handle, stream: &mut ByteStream) -> Result<(), FileSystemError> {
    let mut pos = 0u64;
    loop {
        stream.pause();
        let chunk = match stream.next_chunk().await {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => return Err(FileSystemError::wrap_provider("write_file", Uri::new("stream", "/"), None, e.to_string())),
            None => break,
        };
        let mut written = 0usize;
        while written < chunk.len() {
            let n = provider.write(handle, pos + written as u64, &chunk[written..]).await?;
            if n == 0 {
                break;
            }
            written += n;
        }
        pos += chunk.len() as u64;
        stream.resume();
    }
    Ok(())
}

fn do_copy_folder<'a>(
    src_provider: &'a Arc<dyn FileSystemProvider>,
    dst_provider: &'a Arc<dyn FileSystemProvider>,
    src: &'a Uri,
    dst: &'a Uri,
) -> Pin<Box<dyn Future<Output = Result<(), FileSystemError>> + Send + 'a>> {
    Box::pin(async move {
        dst_provider.mkdir(dst).await?;
        let entries = src_provider.readdir(src).await?;
        let results = futures_util::future::join_all(entries.into_iter().map(|(name, file_type)| {
            let child_src = src.join(&name);
            let child_dst = dst.join(&name);
            async move {
                if file_type.contains(FileType::DIRECTORY) {
                    do_copy_folder(src_provider, dst_provider, &child_src, &child_dst).await
                } else {
                    do_copy_file(src_provider, dst_provider, &child_src, &child_dst, true).await
                }
            }
        }))
        .await;
        for result in results {
            result?;
        }
        Ok(())
    })
}

async fn do_copy_file(
    src_provider: &Arc<dyn FileSystemProvider>,
    dst_provider: &Arc<dyn FileSystemProvider>,
    src: &Uri,
    dst: &Uri,
    overwrite: bool,
) -> Result<(), FileSystemError> {
    let src_caps = src_provider.capabilities();
    let dst_caps = dst_provider.capabilities();
    let src_buffered = src_caps.contains(Capabilities::FILE_OPEN_READ_WRITE_CLOSE) && !src_caps.contains(Capabilities::FILE_READ_WRITE);
    let dst_buffered = dst_caps.contains(Capabilities::FILE_OPEN_READ_WRITE_CLOSE) && !dst_caps.contains(Capabilities::FILE_READ_WRITE);

    match (src_buffered, dst_buffered) {
        (true, true) => pipe_buffered_to_buffered(src_provider, dst_provider, src, dst).await,
        (true, false) => {
            let data = read_all_via_random_access(src_provider, src).await?;
            dst_provider.write_file(dst, data, CreateOptions { create: true, overwrite }).await
        }
        (false, true) => {
            let data = src_provider.read_file(src).await?;
            write_all_via_random_access(dst_provider, dst, &data, true, overwrite).await
        }
        (false, false) => {
            let data = src_provider.read_file(src).await?;
            dst_provider.write_file(dst, data, CreateOptions { create: true, overwrite }).await
        }
    }
}

async fn pipe_buffered_to_buffered(src_provider: &Arc<dyn FileSystemProvider>, dst_provider: &Arc<dyn FileSystemProvider>, src: &Uri, dst: &Uri) -> Result<(), FileSystemError> {
    let src_handle = src_provider.open(src, CreateOptions::default()).await?;
    let dst_handle = match dst_provider.open(dst, CreateOptions { create: true, overwrite: true }).await {
        Ok(h) => h,
        Err(e) => {
            src_provider.close(src_handle).await.ok();
            return Err(e);
        }
    };
    let result = pipe_loop(src_provider, dst_provider, src_handle, dst_handle).await;
    src_provider.close(src_handle).await.ok();
    dst_provider.close(dst_handle).await.ok();
    result
}

async fn pipe_loop(src_provider: &Arc<dyn FileSystemProvider>, dst_provider: &Arc<dyn FileSystemProvider>, src_handle: Handle, dst_handle: Handle) -> Result<(), FileSystemError> {
    let mut pos = 0u64;
    loop {
        let chunk = src_provider.read(src_handle, pos, PIPE_BUFFER_SIZE).await?;
        if chunk.is_empty() {
            return Ok(());
        }
        let mut written = 0usize;
        while written < chunk.len() {
            let n = dst_provider.write(dst_handle, pos + written as u64, &chunk[written..]).await?;
            if n == 0 {
                break;
            }
            written += n;
        }
        pos += chunk.len() as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::memory::MemoryProvider;

    fn uri(scheme: &str, path: &str) -> Uri {
        Uri::new(scheme, path)
    }

    async fn service_with_mem() -> (Arc<FileService>, crate::registry::RegistrationHandle) {
        let registry = ProviderRegistry::new();
        let handle = registry.register("mem", Arc::new(MemoryProvider::full())).unwrap();
        let service = FileService::new(registry.clone());
        (service, handle)
    }

    #[tokio::test]
    async fn s1_write_then_read_and_resolve() {
        let (service, _handle) = service_with_mem().await;
        let target = uri("mem", "/a");
        service.write_file(&target, Bytes::from_static(b"hello"), WriteFileOptions { create: true, overwrite: true, ..Default::default() }).await.unwrap();
        let (data, _) = service.read_file(&target, ReadFileOptions::default()).await.unwrap();
        assert_eq!(&data[..], b"hello");
        let stat = service.resolve(&target, ResolveOptions { resolve_metadata: true, ..Default::default() }).await.unwrap();
        assert_eq!(stat.size, 5);
    }

    #[tokio::test]
    async fn s2_concurrent_writes_serialize_to_last() {
        let (service, _handle) = service_with_mem().await;
        let target = uri("mem", "/a");
        let a = service.write_file(&target, Bytes::from_static(b"a"), WriteFileOptions { create: true, overwrite: true, ..Default::default() });
        let ab = service.write_file(&target, Bytes::from_static(b"ab"), WriteFileOptions { create: true, overwrite: true, ..Default::default() });
        let abc = service.write_file(&target, Bytes::from_static(b"abc"), WriteFileOptions { create: true, overwrite: true, ..Default::default() });
        let _ = tokio::join!(a, ab, abc);
        let (data, _) = service.read_file(&target, ReadFileOptions::default()).await.unwrap();
        assert_eq!(&data[..], b"abc");
    }

    #[tokio::test]
    async fn s3_write_creates_missing_ancestors() {
        let (service, _handle) = service_with_mem().await;
        let target = uri("mem", "/d/e/f");
        service.write_file(&target, Bytes::from_static(b"x"), WriteFileOptions { create: true, overwrite: true, ..Default::default() }).await.unwrap();
        assert!(service.resolve(&uri("mem", "/d"), ResolveOptions::default()).await.unwrap().is_directory());
        assert!(service.resolve(&uri("mem", "/d/e"), ResolveOptions::default()).await.unwrap().is_directory());
    }

    #[tokio::test]
    async fn s4_copy_across_random_access_and_whole_file_providers() {
        let registry = ProviderRegistry::new();
        let _a = registry.register("a", Arc::new(MemoryProvider::random_access_only())).unwrap();
        let _b = registry.register("b", Arc::new(MemoryProvider::whole_file_only())).unwrap();
        let service = FileService::new(registry.clone());

        let payload: Vec<u8> = (0..300 * 1024).map(|i| (i % 251) as u8).collect();
        let src = uri("a", "/x");
        let dst = uri("b", "/y");
        service.write_file(&src, Bytes::from(payload.clone()), WriteFileOptions { create: true, overwrite: true, ..Default::default() }).await.unwrap();
        service.copy(&src, &dst, true).await.unwrap();
        let (data, _) = service.read_file(&dst, ReadFileOptions::default()).await.unwrap();
        assert_eq!(&data[..], &payload[..]);
    }

    #[tokio::test]
    async fn s5_watch_refcounts_to_a_single_provider_watch() {
        let registry = ProviderRegistry::new();
        let provider = Arc::new(MemoryProvider::full());
        let _handle = registry.register("mem", provider.clone()).unwrap();
        let service = FileService::new(registry);

        let root = uri("mem", "/");
        let first = service.watch(root.clone(), WatchOptions { recursive: true, excludes: vec![] });
        let second = service.watch(root, WatchOptions { recursive: true, excludes: vec![] });
        // Give the spawned activation task a chance to run.
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert_eq!(provider.open_watch_count(), 1);

        first.dispose().await;
        assert_eq!(provider.open_watch_count(), 1);
        second.dispose().await;
        assert_eq!(provider.open_watch_count(), 0);
    }

    #[tokio::test]
    async fn etag_mismatch_on_write_fails_and_does_not_mutate() {
        let (service, _handle) = service_with_mem().await;
        let target = uri("mem", "/a");
        service.write_file(&target, Bytes::from_static(b"hello"), WriteFileOptions { create: true, overwrite: true, ..Default::default() }).await.unwrap();
        // A stale caller mtime (0) is necessarily less than the disk mtime
        // `MemoryProvider` just stamped, so `stat.mtime > caller_mtime` is
        // true and the bogus etag actually gets compared.
        let err = service
            .write_file(&target, Bytes::from_static(b"bye"), WriteFileOptions { mtime: Some(0), etag: Some("bogus".to_string()), ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, FileSystemError::ModifiedSince { .. }));
        let (data, _) = service.read_file(&target, ReadFileOptions::default()).await.unwrap();
        assert_eq!(&data[..], b"hello");
    }

    #[tokio::test]
    async fn etag_match_on_read_fails_without_transferring_bytes() {
        let (service, _handle) = service_with_mem().await;
        let target = uri("mem", "/a");
        let stat = service.write_file(&target, Bytes::from_static(b"hello"), WriteFileOptions { create: true, overwrite: true, ..Default::default() }).await.unwrap();
        let err = service.read_file(&target, ReadFileOptions { etag: Some(stat.etag), ..Default::default() }).await.unwrap_err();
        assert!(matches!(err, FileSystemError::NotModifiedSince { .. }));
    }

    #[tokio::test]
    async fn non_recursive_delete_on_non_empty_dir_fails() {
        let (service, _handle) = service_with_mem().await;
        service.mkdirp(&uri("mem", "/dir")).await.unwrap();
        service.write_file(&uri("mem", "/dir/a"), Bytes::from_static(b"x"), WriteFileOptions { create: true, overwrite: true, ..Default::default() }).await.unwrap();
        let err = service.del(&uri("mem", "/dir"), DeleteOptions { recursive: false, use_trash: false }).await.unwrap_err();
        assert!(matches!(err, FileSystemError::Provider { .. }));
        assert!(service.exists(&uri("mem", "/dir")).await);
    }

    #[tokio::test]
    async fn self_move_is_a_no_op() {
        let (service, _handle) = service_with_mem().await;
        let target = uri("mem", "/a");
        service.write_file(&target, Bytes::from_static(b"x"), WriteFileOptions { create: true, overwrite: true, ..Default::default() }).await.unwrap();
        service.mv(&target, &target, false).await.unwrap();
        assert!(service.exists(&target).await);
    }

    #[tokio::test]
    async fn move_then_move_back_restores_original() {
        let (service, _handle) = service_with_mem().await;
        let a = uri("mem", "/a");
        let b = uri("mem", "/b");
        service.write_file(&a, Bytes::from_static(b"content"), WriteFileOptions { create: true, overwrite: true, ..Default::default() }).await.unwrap();
        service.mv(&a, &b, false).await.unwrap();
        assert!(!service.exists(&a).await);
        service.mv(&b, &a, false).await.unwrap();
        assert!(!service.exists(&b).await);
        let (data, _) = service.read_file(&a, ReadFileOptions::default()).await.unwrap();
        assert_eq!(&data[..], b"content");
    }
}

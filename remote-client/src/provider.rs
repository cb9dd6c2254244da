//! `RemoteFileSystemProvider`: a `vfs_core::FileSystemProvider` that forwards
//! every call over the wire protocol in `vfs_core::wire` (spec §4.7, §6),
//! grounded on the teacher's `client/src/api_client.rs` — same `reqwest`
//! client and URL-building style, generalized from hand-rolled
//! `RemoteEntry`/`get_files_from_server` free functions into the shared
//! DTOs so one client speaks to any server built from `remote-server`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use vfs_core::capabilities::Capabilities;
use vfs_core::error::FileSystemError;
use vfs_core::provider::{CreateOptions, DeleteOptions, FileChangesEvent, FileSystemProvider, Handle, ProviderWatch, WatchOptions};
use vfs_core::stat::FileStat;
use vfs_core::uri::Uri;
use vfs_core::wire::{
    ClientWatchMessage, CloseRequest, CopyRequest, DeleteRequest, MkdirRequest, OpenRequest, OpenResponse, ReadRequest, ReadResponse,
    RenameRequest, ServerPush, StatDto, StatRequest, WriteRequest, WriteResponse,
};

/// Handle-scoped calls (`open`/`close`/`read`/`write`) don't carry a `Uri`
/// argument; this synthesizes one purely so transport errors can still be
/// reported with operation context.
fn handle_uri(handle: Handle) -> Uri {
    Uri::new("remote", format!("/handle/{handle}"))
}

/// Capabilities a freshly constructed client assumes before its first
/// `GET /capabilities` round trip resolves (spec §4.7 "conservative
/// default"): whole-file and random-access I/O plus folder copy, the same
/// shape the teacher's disk-backed server always actually provides.
fn bootstrap_capabilities() -> Capabilities {
    Capabilities::FILE_READ_WRITE | Capabilities::FILE_OPEN_READ_WRITE_CLOSE | Capabilities::FILE_FOLDER_COPY
}

struct RemoteWatch {
    watcher_id: u64,
    unwatch_tx: tokio::sync::mpsc::UnboundedSender<u64>,
}

#[async_trait]
impl ProviderWatch for RemoteWatch {
    async fn dispose(self: Box<Self>) {
        let _ = self.unwatch_tx.send(self.watcher_id);
    }
}

pub struct RemoteFileSystemProvider {
    base_url: String,
    client: reqwest::Client,
    capabilities: AtomicU32,
    changes_tx: broadcast::Sender<FileChangesEvent>,
    capability_tx: broadcast::Sender<Capabilities>,
    watch_control_tx: tokio::sync::mpsc::UnboundedSender<WatchControl>,
    next_watcher_id: std::sync::atomic::AtomicU64,
    active_watches: Arc<DashMap<u64, (Uri, WatchOptions)>>,
}

enum WatchControl {
    Watch { watcher_id: u64, uri: Uri, options: WatchOptions },
    Unwatch { watcher_id: u64 },
}

impl RemoteFileSystemProvider {
    pub fn new(base_url: impl Into<String>) -> Arc<Self> {
        let base_url = base_url.into();
        let (changes_tx, _) = broadcast::channel(256);
        let (capability_tx, _) = broadcast::channel(16);
        let (watch_control_tx, watch_control_rx) = tokio::sync::mpsc::unbounded_channel();

        let provider = Arc::new(Self {
            base_url,
            client: reqwest::Client::new(),
            capabilities: AtomicU32::new(bootstrap_capabilities().bits()),
            changes_tx,
            capability_tx,
            watch_control_tx,
            next_watcher_id: std::sync::atomic::AtomicU64::new(1),
            active_watches: Arc::new(DashMap::new()),
        });

        let background = provider.clone();
        tokio::spawn(async move { background.run_background(watch_control_rx).await });

        provider
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn refresh_capabilities(&self) {
        let url = self.url("/capabilities");
        match self.client.get(&url).send().await.and_then(|r| r.error_for_status()) {
            Ok(response) => match response.json::<vfs_core::wire::CapabilitiesResponse>().await {
                Ok(caps) => {
                    self.capabilities.store(caps.bits, Ordering::SeqCst);
                    if let Some(parsed) = Capabilities::from_bits(caps.bits) {
                        let _ = self.capability_tx.send(parsed);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "failed to parse capabilities response"),
            },
            Err(e) => tracing::warn!(error = %e, "failed to fetch capabilities"),
        }
    }

    /// Long-lived background task: fetch capabilities once, then hold a
    /// reconnecting WebSocket to `/watch`, re-issuing every active watch
    /// after each reconnect (spec §8 S6 "reconnect re-establishes watches").
    async fn run_background(self: Arc<Self>, mut control_rx: tokio::sync::mpsc::UnboundedReceiver<WatchControl>) {
        self.refresh_capabilities().await;

        let ws_url = self.base_url.replacen("http", "ws", 1) + "/watch";
        loop {
            match tokio_tungstenite::connect_async(&ws_url).await {
                Ok((stream, _)) => {
                    tracing::info!(url = %ws_url, "watch socket connected");
                    let (mut sink, mut read) = stream.split();

                    for entry in self.active_watches.iter() {
                        let (uri, options) = entry.value().clone();
                        let msg = ClientWatchMessage::Watch {
                            watcher_id: *entry.key(),
                            path: uri.path.clone(),
                            recursive: options.recursive,
                            excludes: options.excludes.clone(),
                        };
                        if let Ok(text) = serde_json::to_string(&msg) {
                            let _ = sink.send(WsMessage::Text(text)).await;
                        }
                    }

                    loop {
                        tokio::select! {
                            control = control_rx.recv() => {
                                match control {
                                    Some(WatchControl::Watch { watcher_id, uri, options }) => {
                                        let msg = ClientWatchMessage::Watch { watcher_id, path: uri.path.clone(), recursive: options.recursive, excludes: options.excludes.clone() };
                                        if let Ok(text) = serde_json::to_string(&msg) {
                                            if sink.send(WsMessage::Text(text)).await.is_err() { break; }
                                        }
                                    }
                                    Some(WatchControl::Unwatch { watcher_id }) => {
                                        let msg = ClientWatchMessage::Unwatch { watcher_id };
                                        if let Ok(text) = serde_json::to_string(&msg) {
                                            if sink.send(WsMessage::Text(text)).await.is_err() { break; }
                                        }
                                    }
                                    None => return,
                                }
                            }
                            incoming = read.next() => {
                                match incoming {
                                    Some(Ok(WsMessage::Text(text))) => {
                                        if let Ok(push) = serde_json::from_str::<ServerPush>(&text) {
                                            match push {
                                                ServerPush::NotifyDidChangeFile { changes } => {
                                                    let _ = self.changes_tx.send(changes.into_event());
                                                }
                                                ServerPush::NotifyDidChangeCapabilities { bits } => {
                                                    self.capabilities.store(bits, Ordering::SeqCst);
                                                    if let Some(parsed) = Capabilities::from_bits(bits) {
                                                        let _ = self.capability_tx.send(parsed);
                                                    }
                                                }
                                            }
                                        }
                                    }
                                    Some(Ok(WsMessage::Close(_))) | None => break,
                                    Some(Ok(_)) => {}
                                    Some(Err(e)) => {
                                        tracing::warn!(error = %e, "watch socket read error");
                                        break;
                                    }
                                }
                            }
                        }
                    }
                    tracing::warn!("watch socket disconnected, reconnecting");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to connect watch socket, retrying");
                }
            }
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        }
    }
}

fn wrap_transport_error(operation: &'static str, uri: &Uri, err: reqwest::Error) -> FileSystemError {
    FileSystemError::wrap_provider(operation, uri.clone(), None, err.to_string())
}

#[async_trait]
impl FileSystemProvider for RemoteFileSystemProvider {
    fn capabilities(&self) -> Capabilities {
        Capabilities::from_bits_truncate(self.capabilities.load(Ordering::SeqCst))
    }

    async fn subscribe_changes(&self) -> broadcast::Receiver<FileChangesEvent> {
        self.changes_tx.subscribe()
    }

    async fn subscribe_capability_changes(&self) -> broadcast::Receiver<Capabilities> {
        self.capability_tx.subscribe()
    }

    async fn stat(&self, uri: &Uri) -> Result<FileStat, FileSystemError> {
        let response = self
            .client
            .post(self.url("/stat"))
            .json(&StatRequest { path: uri.path.clone() })
            .send()
            .await
            .map_err(|e| wrap_transport_error("stat", uri, e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FileSystemError::NotFound { uri: uri.clone() });
        }
        let dto: StatDto = response
            .error_for_status()
            .map_err(|e| wrap_transport_error("stat", uri, e))?
            .json()
            .await
            .map_err(|e| wrap_transport_error("stat", uri, e))?;
        dto.into_stat().map_err(|e| FileSystemError::wrap_provider("stat", uri.clone(), None, e.to_string()))
    }

    async fn readdir(&self, uri: &Uri) -> Result<Vec<(String, vfs_core::stat::FileType)>, FileSystemError> {
        let response =
            self.client.get(self.url(&format!("/readdir{}", uri.path))).send().await.map_err(|e| wrap_transport_error("readdir", uri, e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FileSystemError::NotFound { uri: uri.clone() });
        }
        let entries: Vec<vfs_core::wire::ReadDirEntryDto> = response
            .error_for_status()
            .map_err(|e| wrap_transport_error("readdir", uri, e))?
            .json()
            .await
            .map_err(|e| wrap_transport_error("readdir", uri, e))?;
        Ok(entries.into_iter().map(|e| (e.name, vfs_core::stat::FileType::from_bits_truncate(e.file_type))).collect())
    }

    async fn mkdir(&self, uri: &Uri) -> Result<(), FileSystemError> {
        self.client
            .post(self.url("/mkdir"))
            .json(&MkdirRequest { path: uri.path.clone() })
            .send()
            .await
            .map_err(|e| wrap_transport_error("mkdir", uri, e))?
            .error_for_status()
            .map_err(|e| wrap_transport_error("mkdir", uri, e))?;
        Ok(())
    }

    async fn delete(&self, uri: &Uri, options: DeleteOptions) -> Result<(), FileSystemError> {
        self.client
            .post(self.url("/delete"))
            .json(&DeleteRequest { path: uri.path.clone(), recursive: options.recursive, use_trash: options.use_trash })
            .send()
            .await
            .map_err(|e| wrap_transport_error("delete", uri, e))?
            .error_for_status()
            .map_err(|e| wrap_transport_error("delete", uri, e))?;
        Ok(())
    }

    async fn rename(&self, source: &Uri, target: &Uri, overwrite: bool) -> Result<(), FileSystemError> {
        self.client
            .post(self.url("/rename"))
            .json(&RenameRequest { src: source.path.clone(), dst: target.path.clone(), overwrite })
            .send()
            .await
            .map_err(|e| wrap_transport_error("rename", source, e))?
            .error_for_status()
            .map_err(|e| wrap_transport_error("rename", source, e))?;
        Ok(())
    }

    async fn copy(&self, source: &Uri, target: &Uri, overwrite: bool) -> Result<(), FileSystemError> {
        self.client
            .post(self.url("/copy"))
            .json(&CopyRequest { src: source.path.clone(), dst: target.path.clone(), overwrite })
            .send()
            .await
            .map_err(|e| wrap_transport_error("copy", source, e))?
            .error_for_status()
            .map_err(|e| wrap_transport_error("copy", source, e))?;
        Ok(())
    }

    async fn read_file(&self, uri: &Uri) -> Result<Bytes, FileSystemError> {
        let response = self.client.get(self.url(&format!("/file{}", uri.path))).send().await.map_err(|e| wrap_transport_error("read_file", uri, e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FileSystemError::NotFound { uri: uri.clone() });
        }
        response
            .error_for_status()
            .map_err(|e| wrap_transport_error("read_file", uri, e))?
            .bytes()
            .await
            .map_err(|e| wrap_transport_error("read_file", uri, e))
    }

    async fn write_file(&self, uri: &Uri, data: Bytes, options: CreateOptions) -> Result<(), FileSystemError> {
        let url = format!("{}?create={}&overwrite={}", self.url(&format!("/file{}", uri.path)), options.create, options.overwrite);
        self.client
            .put(&url)
            .body(data)
            .send()
            .await
            .map_err(|e| wrap_transport_error("write_file", uri, e))?
            .error_for_status()
            .map_err(|e| wrap_transport_error("write_file", uri, e))?;
        Ok(())
    }

    async fn open(&self, uri: &Uri, options: CreateOptions) -> Result<Handle, FileSystemError> {
        let response = self
            .client
            .post(self.url("/open"))
            .json(&OpenRequest { path: uri.path.clone(), create: options.create, overwrite: options.overwrite })
            .send()
            .await
            .map_err(|e| wrap_transport_error("open", uri, e))?
            .error_for_status()
            .map_err(|e| wrap_transport_error("open", uri, e))?;
        let body: OpenResponse = response.json().await.map_err(|e| wrap_transport_error("open", uri, e))?;
        Ok(body.fd)
    }

    async fn close(&self, handle: Handle) -> Result<(), FileSystemError> {
        let uri = handle_uri(handle);
        self.client
            .post(self.url("/close"))
            .json(&CloseRequest { fd: handle })
            .send()
            .await
            .map_err(|e| wrap_transport_error("close", &uri, e))?
            .error_for_status()
            .map_err(|e| wrap_transport_error("close", &uri, e))?;
        Ok(())
    }

    async fn read(&self, handle: Handle, pos: u64, len: usize) -> Result<Bytes, FileSystemError> {
        let uri = handle_uri(handle);
        let response = self
            .client
            .post(self.url("/read"))
            .json(&ReadRequest { fd: handle, pos, length: len })
            .send()
            .await
            .map_err(|e| wrap_transport_error("read", &uri, e))?
            .error_for_status()
            .map_err(|e| wrap_transport_error("read", &uri, e))?;
        let body: ReadResponse = response.json().await.map_err(|e| wrap_transport_error("read", &uri, e))?;
        let decoded = BASE64.decode(&body.bytes).map_err(|e| FileSystemError::wrap_provider("read", uri.clone(), None, e.to_string()))?;
        Ok(Bytes::from(decoded))
    }

    async fn write(&self, handle: Handle, pos: u64, data: &[u8]) -> Result<usize, FileSystemError> {
        let uri = handle_uri(handle);
        let encoded = BASE64.encode(data);
        let response = self
            .client
            .post(self.url("/write"))
            .json(&WriteRequest { fd: handle, pos, content: encoded, offset: 0, length: data.len() })
            .send()
            .await
            .map_err(|e| wrap_transport_error("write", &uri, e))?
            .error_for_status()
            .map_err(|e| wrap_transport_error("write", &uri, e))?;
        let body: WriteResponse = response.json().await.map_err(|e| wrap_transport_error("write", &uri, e))?;
        Ok(body.written)
    }

    async fn watch(&self, uri: &Uri, options: WatchOptions) -> Result<Box<dyn ProviderWatch>, FileSystemError> {
        let watcher_id = self.next_watcher_id.fetch_add(1, Ordering::SeqCst);
        self.active_watches.insert(watcher_id, (uri.clone(), options.clone()));
        let _ = self.watch_control_tx.send(WatchControl::Watch { watcher_id, uri: uri.clone(), options });

        let active = self.active_watches.clone();
        let (unwatch_tx, mut unwatch_rx) = tokio::sync::mpsc::unbounded_channel();
        let control_tx = self.watch_control_tx.clone();
        tokio::spawn(async move {
            if let Some(id) = unwatch_rx.recv().await {
                active.remove(&id);
                let _ = control_tx.send(WatchControl::Unwatch { watcher_id: id });
            }
        });

        Ok(Box::new(RemoteWatch { watcher_id, unwatch_tx }))
    }
}

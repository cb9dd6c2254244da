//! `GET /watch` WebSocket upgrade (spec §4.7, §6): carries `watch`/`unwatch`
//! control messages from the client and pushes `notifyDidChangeFile` /
//! `notifyDidChangeCapabilities` frames back. One socket can multiplex many
//! watcher ids, mirroring `FileService::watch`'s ref-counting but scoped to
//! this single connection — the server keeps its own
//! `watcher_id → disposable` map per spec §4.7 "the server maintains its own
//! `requestId → disposable` map".

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};

use vfs_core::provider::{ProviderWatch, WatchOptions};
use vfs_core::wire::{ChangeEventDto, ClientWatchMessage, FileChangesDto, ServerPush};

use crate::state::AppState;

pub async fn watch(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let mut active: HashMap<u64, (vfs_core::Uri, bool, Box<dyn ProviderWatch>)> = HashMap::new();

    let mut changes_rx = state.provider.subscribe_changes().await;
    let mut capability_rx = state.provider.subscribe_capability_changes().await;

    loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(msg) = serde_json::from_str::<ClientWatchMessage>(&text) else {
                            tracing::warn!(%text, "unrecognized watch control message");
                            continue;
                        };
                        match msg {
                            ClientWatchMessage::Watch { watcher_id, path, recursive, excludes } => {
                                let uri = state.uri(&path);
                                let options = WatchOptions { recursive, excludes };
                                match state.provider.watch(&uri, options).await {
                                    Ok(disposable) => {
                                        active.insert(watcher_id, (uri, recursive, disposable));
                                    }
                                    Err(e) => tracing::warn!(error = %e, watcher_id, "watch request failed"),
                                }
                            }
                            ClientWatchMessage::Unwatch { watcher_id } => {
                                if let Some((_, _, disposable)) = active.remove(&watcher_id) {
                                    disposable.dispose().await;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "watch socket read error");
                        break;
                    }
                }
            }
            event = changes_rx.recv() => {
                let Ok(event) = event else { continue };
                let relevant: Vec<ChangeEventDto> = event
                    .changes
                    .iter()
                    .filter(|change| active.values().any(|(uri, recursive, _)| {
                        if *recursive { uri.is_equal_or_parent(&change.resource, true) } else { uri.path_eq(&change.resource, true) || uri.is_equal_or_parent(&change.resource, true) }
                    }))
                    .map(ChangeEventDto::from_event)
                    .collect();
                if relevant.is_empty() {
                    continue;
                }
                let push = ServerPush::NotifyDidChangeFile { changes: FileChangesDto { changes: relevant } };
                if send_push(&mut sink, &push).await.is_err() {
                    break;
                }
            }
            caps = capability_rx.recv() => {
                let Ok(caps) = caps else { continue };
                let push = ServerPush::NotifyDidChangeCapabilities { bits: caps.bits() };
                if send_push(&mut sink, &push).await.is_err() {
                    break;
                }
            }
        }
    }

    for (_, (_, _, disposable)) in active.into_iter() {
        disposable.dispose().await;
    }
}

async fn send_push(
    sink: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    push: &ServerPush,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(push).expect("ServerPush always serializes");
    sink.send(Message::Text(text)).await
}

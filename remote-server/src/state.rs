//! Shared state for the wire-protocol `axum::Router` (spec §4.7 "Server
//! side"): one wrapped provider, the scheme used to re-mint `Uri`s from the
//! wire's plain path strings, and the participant registry that instruments
//! create/write/move/copy/delete the way `vfs_core::FileService` does for
//! in-process consumers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use vfs_core::file_service::FileOperationKind;
use vfs_core::participants::{FileOperationParticipant, ParticipantRegistry};
use vfs_core::{FileSystemProvider, Uri};

/// Logs every file operation at `info` level; the default participant a
/// freshly started server carries so the `participant_timeout_ms` knob in
/// `ServerConfig` has an observable effect even before a real plugin
/// registers one (spec §7 "Participant").
pub struct TracingParticipant;

#[async_trait]
impl FileOperationParticipant for TracingParticipant {
    async fn before(&self, kind: FileOperationKind, source: &Uri, target: Option<&Uri>) {
        tracing::info!(?kind, %source, target = ?target.map(ToString::to_string), "operation starting");
    }

    async fn after(&self, kind: FileOperationKind, source: &Uri, target: Option<&Uri>) {
        tracing::info!(?kind, %source, target = ?target.map(ToString::to_string), "operation completed");
    }

    async fn on_error(&self, kind: FileOperationKind, source: &Uri, target: Option<&Uri>, error: &str) {
        tracing::warn!(?kind, %source, target = ?target.map(ToString::to_string), error, "operation failed");
    }
}

#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn FileSystemProvider>,
    pub scheme: String,
    pub participants: Arc<ParticipantRegistry>,
}

impl AppState {
    pub fn new(provider: Arc<dyn FileSystemProvider>, scheme: impl Into<String>, participant_timeout: Duration) -> Self {
        let participants = Arc::new(ParticipantRegistry::new(participant_timeout));
        Self { provider, scheme: scheme.into(), participants }
    }

    pub fn uri(&self, path: &str) -> Uri {
        Uri::new(self.scheme.clone(), path)
    }
}

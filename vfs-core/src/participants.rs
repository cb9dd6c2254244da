//! File-operation participants (spec §4.6, §7): before/after/error hook
//! points for move/copy/delete/create, each bounded by a timeout and unable
//! to veto the outer operation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::file_service::FileOperationKind;
use crate::uri::Uri;

/// Default timeout applied to every participant call unless the registry is
/// constructed with a different one.
pub const DEFAULT_PARTICIPANT_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait FileOperationParticipant: Send + Sync {
    async fn before(&self, _kind: FileOperationKind, _source: &Uri, _target: Option<&Uri>) {}
    async fn after(&self, _kind: FileOperationKind, _source: &Uri, _target: Option<&Uri>) {}
    async fn on_error(&self, _kind: FileOperationKind, _source: &Uri, _target: Option<&Uri>, _error: &str) {}
}

/// A participant that does nothing; the default entry so a freshly built
/// registry has somewhere to attach without every caller special-casing an
/// empty list.
pub struct NoopParticipant;

#[async_trait]
impl FileOperationParticipant for NoopParticipant {}

/// Drives every registered participant through `before`/`after` with a
/// bounded timeout. A participant that times out or errors is logged and
/// otherwise ignored — participants can observe an operation, never veto it
/// (spec §7: "Participants errors are logged and swallowed").
pub struct ParticipantRegistry {
    participants: RwLock<Vec<Arc<dyn FileOperationParticipant>>>,
    timeout: Duration,
}

impl Default for ParticipantRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_PARTICIPANT_TIMEOUT)
    }
}

impl ParticipantRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self { participants: RwLock::new(Vec::new()), timeout }
    }

    pub async fn register(&self, participant: Arc<dyn FileOperationParticipant>) {
        self.participants.write().await.push(participant);
    }

    pub async fn run_before(&self, kind: FileOperationKind, source: &Uri, target: Option<&Uri>) {
        for participant in self.participants.read().await.iter() {
            if tokio::time::timeout(self.timeout, participant.before(kind, source, target)).await.is_err() {
                tracing::warn!(?kind, %source, "participant before-hook timed out, proceeding");
            }
        }
    }

    pub async fn run_after(&self, kind: FileOperationKind, source: &Uri, target: Option<&Uri>) {
        for participant in self.participants.read().await.iter() {
            if tokio::time::timeout(self.timeout, participant.after(kind, source, target)).await.is_err() {
                tracing::warn!(?kind, %source, "participant after-hook timed out, proceeding");
            }
        }
    }

    pub async fn run_on_error(&self, kind: FileOperationKind, source: &Uri, target: Option<&Uri>, error: &str) {
        for participant in self.participants.read().await.iter() {
            if tokio::time::timeout(self.timeout, participant.on_error(kind, source, target, error)).await.is_err() {
                tracing::warn!(?kind, %source, "participant error-hook timed out, proceeding");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingParticipant {
        before_calls: AtomicUsize,
        after_calls: AtomicUsize,
    }

    #[async_trait]
    impl FileOperationParticipant for CountingParticipant {
        async fn before(&self, _kind: FileOperationKind, _source: &Uri, _target: Option<&Uri>) {
            self.before_calls.fetch_add(1, Ordering::SeqCst);
        }
        async fn after(&self, _kind: FileOperationKind, _source: &Uri, _target: Option<&Uri>) {
            self.after_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn runs_every_registered_participant() {
        let registry = ParticipantRegistry::default();
        let participant = Arc::new(CountingParticipant { before_calls: AtomicUsize::new(0), after_calls: AtomicUsize::new(0) });
        registry.register(participant.clone()).await;

        let uri = Uri::new("mem", "/a");
        registry.run_before(FileOperationKind::Write, &uri, None).await;
        registry.run_after(FileOperationKind::Write, &uri, None).await;

        assert_eq!(participant.before_calls.load(Ordering::SeqCst), 1);
        assert_eq!(participant.after_calls.load(Ordering::SeqCst), 1);
    }

    struct SlowParticipant;

    #[async_trait]
    impl FileOperationParticipant for SlowParticipant {
        async fn before(&self, _kind: FileOperationKind, _source: &Uri, _target: Option<&Uri>) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
    }

    #[tokio::test]
    async fn timed_out_participant_does_not_block_forever() {
        let registry = ParticipantRegistry::new(Duration::from_millis(10));
        registry.register(Arc::new(SlowParticipant)).await;
        let uri = Uri::new("mem", "/a");
        tokio::time::timeout(Duration::from_secs(1), registry.run_before(FileOperationKind::Delete, &uri, None))
            .await
            .expect("run_before must return promptly even when a participant hangs");
    }
}

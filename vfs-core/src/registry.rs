//! Scheme to provider registration (spec §4.1).

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::capabilities::Capabilities;
use crate::error::FileSystemError;
use crate::provider::FileSystemProvider;
use crate::uri::Uri;

#[derive(Debug, Clone)]
pub struct RegistrationEvent {
    pub scheme: String,
    pub added: bool,
}

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Handed to `on_will_activate` listeners; a lazy provider registers itself
/// and may optionally push a future for the registry to await before
/// `activate` returns (spec §4.1 "willActivate{scheme, join(future)}").
#[derive(Clone)]
pub struct ActivationEvent {
    pub scheme: String,
    joins: Arc<Mutex<Vec<BoxFuture>>>,
}

impl ActivationEvent {
    pub fn join(&self, fut: BoxFuture) {
        self.joins.lock().unwrap().push(fut);
    }
}

pub struct ProviderRegistry {
    providers: DashMap<String, Arc<dyn FileSystemProvider>>,
    registrations: broadcast::Sender<RegistrationEvent>,
    will_activate: broadcast::Sender<ActivationEvent>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        let (registrations, _) = broadcast::channel(64);
        let (will_activate, _) = broadcast::channel(64);
        Self { providers: DashMap::new(), registrations, will_activate }
    }
}

/// Returned by [`ProviderRegistry::register`]; disposing it unregisters the
/// provider (spec §4.1: "Disposing the returned handle emits
/// `{added:false,...}` ... and removes the entry").
pub struct RegistrationHandle {
    scheme: String,
    registry: Arc<ProviderRegistry>,
    disposed: bool,
}

impl RegistrationHandle {
    pub fn dispose(mut self) {
        self.registry.unregister(&self.scheme);
        self.disposed = true;
    }
}

impl Drop for RegistrationHandle {
    fn drop(&mut self) {
        if !self.disposed {
            self.registry.unregister(&self.scheme);
        }
    }
}

impl ProviderRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(
        self: &Arc<Self>,
        scheme: impl Into<String>,
        provider: Arc<dyn FileSystemProvider>,
    ) -> Result<RegistrationHandle, FileSystemError> {
        let scheme = scheme.into();
        if self.providers.contains_key(&scheme) {
            return Err(FileSystemError::AlreadyRegistered { scheme });
        }
        self.providers.insert(scheme.clone(), provider);
        let _ = self.registrations.send(RegistrationEvent { scheme: scheme.clone(), added: true });
        tracing::debug!(scheme = %scheme, "provider registered");
        Ok(RegistrationHandle { scheme, registry: self.clone(), disposed: false })
    }

    fn unregister(&self, scheme: &str) {
        if self.providers.remove(scheme).is_some() {
            let _ = self.registrations.send(RegistrationEvent { scheme: scheme.to_string(), added: false });
            tracing::debug!(scheme, "provider unregistered");
        }
    }

    pub fn subscribe_registrations(&self) -> broadcast::Receiver<RegistrationEvent> {
        self.registrations.subscribe()
    }

    pub fn subscribe_will_activate(&self) -> broadcast::Receiver<ActivationEvent> {
        self.will_activate.subscribe()
    }

    /// Emits `willActivate` and awaits every future joined by a listener,
    /// then returns regardless of whether the provider actually showed up
    /// (spec §4.1: "returns after all joined futures resolve or
    /// immediately if the provider is already present").
    pub async fn activate(&self, scheme: &str) {
        if self.providers.contains_key(scheme) {
            return;
        }
        let event = ActivationEvent { scheme: scheme.to_string(), joins: Arc::new(Mutex::new(Vec::new())) };
        let _ = self.will_activate.send(event.clone());
        // Give listeners a chance to register the provider directly or
        // push a join future before we drain the list; a single yield can
        // race a listener that itself awaits before registering.
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        let joins = std::mem::take(&mut *event.joins.lock().unwrap());
        for fut in joins {
            fut.await;
        }
    }

    /// `withProvider(uri)` (spec §4.1).
    pub async fn with_provider(&self, uri: &Uri) -> Result<Arc<dyn FileSystemProvider>, FileSystemError> {
        if !uri.is_absolute() {
            return Err(FileSystemError::InvalidPath { uri: uri.clone() });
        }
        self.activate(&uri.scheme).await;
        self.providers
            .get(&uri.scheme)
            .map(|p| p.clone())
            .ok_or_else(|| FileSystemError::NoProvider { scheme: uri.scheme.clone() })
    }

    pub fn get(&self, scheme: &str) -> Option<Arc<dyn FileSystemProvider>> {
        self.providers.get(scheme).map(|p| p.clone())
    }

    pub fn has_capability(&self, uri: &Uri, cap: Capabilities) -> bool {
        self.providers.get(&uri.scheme).map(|p| p.capabilities().contains(cap)).unwrap_or(false)
    }

    pub fn schemes(&self) -> Vec<String> {
        self.providers.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::memory::MemoryProvider;

    #[tokio::test]
    async fn register_then_resolve_then_unregister() {
        let registry = ProviderRegistry::new();
        let handle = registry.register("mem", Arc::new(MemoryProvider::new(Capabilities::empty()))).unwrap();
        let uri = Uri::new("mem", "/a");
        assert!(registry.with_provider(&uri).await.is_ok());

        handle.dispose();
        let err = registry.with_provider(&uri).await.unwrap_err();
        assert!(matches!(err, FileSystemError::NoProvider { .. }));
    }

    #[tokio::test]
    async fn duplicate_registration_fails() {
        let registry = ProviderRegistry::new();
        let _h = registry.register("mem", Arc::new(MemoryProvider::new(Capabilities::empty()))).unwrap();
        let err = registry.register("mem", Arc::new(MemoryProvider::new(Capabilities::empty()))).unwrap_err();
        assert!(matches!(err, FileSystemError::AlreadyRegistered { .. }));
    }

    #[tokio::test]
    async fn lazy_activation_via_will_activate() {
        let registry = ProviderRegistry::new();
        let mut rx = registry.subscribe_will_activate();
        let registry_for_task = registry.clone();
        tokio::spawn(async move {
            if let Ok(event) = rx.recv().await {
                if event.scheme == "lazy" {
                    let _ = registry_for_task.register("lazy", Arc::new(MemoryProvider::new(Capabilities::empty())));
                }
            }
        });
        let uri = Uri::new("lazy", "/a");
        assert!(registry.with_provider(&uri).await.is_ok());
    }
}

//! Scheme dispatch registry

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::{Backend, Reader, WatchCallback, WatcherFactory, Writer};
use crate::error::{OmnioError, OmnioResult};
use crate::ident::Identifier;
use crate::watcher::Watcher;

/// Maps schemes to backends and dispatches every top-level operation.
///
/// An explicit object rather than process-global state, so tests and
/// embedders construct isolated instances. Registrations are write-once-ish
/// (written at startup per scheme, read on every operation); the maps sit
/// behind read-mostly locks. The last registration for a scheme wins.
pub struct Registry {
    backends: RwLock<HashMap<String, Arc<dyn Backend>>>,
    watchers: RwLock<HashMap<String, Arc<dyn WatcherFactory>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            backends: RwLock::new(HashMap::new()),
            watchers: RwLock::new(HashMap::new()),
        }
    }

    /// Register `backend` for every identifier with the given scheme.
    pub fn register(&self, scheme: impl Into<String>, backend: Arc<dyn Backend>) {
        let scheme = scheme.into();
        tracing::debug!(scheme = %scheme, backend = backend.name(), "registering backend");
        self.backends.write().insert(scheme, backend);
    }

    /// Register a watcher-only handler, consulted when no full backend is
    /// registered for the scheme (or when the backend cannot watch).
    pub fn register_watcher(&self, scheme: impl Into<String>, factory: Arc<dyn WatcherFactory>) {
        let scheme = scheme.into();
        tracing::debug!(scheme = %scheme, "registering watcher-only handler");
        self.watchers.write().insert(scheme, factory);
    }

    fn backend(&self, id: &Identifier) -> OmnioResult<Arc<dyn Backend>> {
        self.backends
            .read()
            .get(id.scheme())
            .cloned()
            .ok_or_else(|| OmnioError::NoHandler(id.scheme().to_string()))
    }

    pub async fn open(&self, id: &Identifier) -> OmnioResult<Box<dyn Reader>> {
        self.backend(id)?.open(id).await
    }

    pub async fn open_for_write(&self, id: &Identifier) -> OmnioResult<Box<dyn Writer>> {
        self.backend(id)?.open_for_write(id).await
    }

    pub async fn open_for_append(&self, id: &Identifier) -> OmnioResult<Box<dyn Writer>> {
        self.backend(id)?.open_for_append(id).await
    }

    pub async fn list(&self, id: &Identifier) -> OmnioResult<Vec<String>> {
        self.backend(id)?.list(id).await
    }

    pub async fn remove(&self, id: &Identifier) -> OmnioResult<()> {
        self.backend(id)?.remove(id).await
    }

    /// Watch `id` for changes, preferring the full backend and falling back
    /// to the watcher-only table. With no entry in either table the call
    /// fails with `NoHandler`.
    pub async fn watch(&self, id: &Identifier, callback: WatchCallback) -> OmnioResult<Watcher> {
        let backend = self.backends.read().get(id.scheme()).cloned();
        if let Some(backend) = backend {
            match backend.watch(id, callback.clone()).await {
                Err(OmnioError::NotImplemented) => {}
                other => return other,
            }
        }

        let factory = self.watchers.read().get(id.scheme()).cloned();
        match factory {
            Some(factory) => factory.watch(id, callback).await,
            None => Err(OmnioError::NoHandler(id.scheme().to_string())),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

//! In-process stores
//!
//! A revisioned key tree and an object cluster held entirely in memory.
//! Useful for the `mem://` scheme, local development, and deterministic
//! tests of the kv and object-store semantics.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use omnio_core::{OmnioError, OmnioResult};

use crate::kv::{key_matches, KvEntry, KvEvent, KvEventKind, KvStore};
use crate::object::{ObjectCluster, ObjectPool};

#[derive(Default)]
struct MemInner {
    revision: u64,
    entries: HashMap<String, KvEntry>,
    // Full change history; lets a long-poll started at any past revision
    // replay without gaps. Unbounded, which is fine for an in-process
    // store.
    log: Vec<KvEvent>,
}

/// In-memory revisioned key tree.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<MemInner>,
    changed: Notify,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemStore {
    async fn get(&self, key: &str) -> OmnioResult<Option<KvEntry>> {
        Ok(self.inner.lock().entries.get(key).cloned())
    }

    async fn head_revision(&self) -> OmnioResult<u64> {
        Ok(self.inner.lock().revision)
    }

    async fn compare_and_put(&self, key: &str, expected: u64, value: Bytes) -> OmnioResult<u64> {
        let mut inner = self.inner.lock();
        let current = inner.entries.get(key).map(|e| e.revision).unwrap_or(0);
        if current != expected {
            return Err(OmnioError::CommitConflict {
                path: key.to_string(),
                expected,
            });
        }

        inner.revision += 1;
        let revision = inner.revision;
        inner.entries.insert(
            key.to_string(),
            KvEntry {
                value: value.clone(),
                revision,
            },
        );
        inner.log.push(KvEvent {
            key: key.to_string(),
            value,
            revision,
            kind: KvEventKind::Set,
        });
        drop(inner);

        self.changed.notify_waiters();
        Ok(revision)
    }

    async fn list_prefix(&self, prefix: &str) -> OmnioResult<Vec<String>> {
        let inner = self.inner.lock();
        let mut keys: Vec<String> = inner
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> OmnioResult<()> {
        let mut inner = self.inner.lock();
        if inner.entries.remove(key).is_none() {
            return Ok(());
        }
        inner.revision += 1;
        let revision = inner.revision;
        inner.log.push(KvEvent {
            key: key.to_string(),
            value: Bytes::new(),
            revision,
            kind: KvEventKind::Delete,
        });
        drop(inner);

        self.changed.notify_waiters();
        Ok(())
    }

    async fn next_change(&self, key: &str, after: u64) -> OmnioResult<KvEvent> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // Register before scanning so a change landing in between
            // still wakes us.
            notified.as_mut().enable();

            let pending = {
                let inner = self.inner.lock();
                inner
                    .log
                    .iter()
                    .find(|ev| ev.revision > after && key_matches(key, &ev.key))
                    .cloned()
            };
            if let Some(event) = pending {
                return Ok(event);
            }

            notified.await;
        }
    }
}

/// In-memory object pool: byte vectors addressed by object name.
#[derive(Default)]
pub struct MemPool {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl ObjectPool for MemPool {
    async fn size(&self, object: &str) -> OmnioResult<u64> {
        self.objects
            .read()
            .get(object)
            .map(|data| data.len() as u64)
            .ok_or_else(|| OmnioError::NotFound(object.to_string()))
    }

    async fn read_at(&self, object: &str, offset: u64, len: usize) -> OmnioResult<Bytes> {
        let objects = self.objects.read();
        let data = objects
            .get(object)
            .ok_or_else(|| OmnioError::NotFound(object.to_string()))?;

        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(len).min(data.len());
        Ok(Bytes::copy_from_slice(&data[start..end]))
    }

    async fn append(&self, object: &str, data: &[u8]) -> OmnioResult<()> {
        self.objects
            .write()
            .entry(object.to_string())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    async fn truncate(&self, object: &str, len: u64) -> OmnioResult<()> {
        self.objects
            .write()
            .entry(object.to_string())
            .or_default()
            .resize(len as usize, 0);
        Ok(())
    }

    async fn remove(&self, object: &str) -> OmnioResult<()> {
        self.objects
            .write()
            .remove(object)
            .map(|_| ())
            .ok_or_else(|| OmnioError::NotFound(object.to_string()))
    }
}

/// In-memory object cluster: pools share one process-wide namespace per
/// cluster instance, created on first use.
#[derive(Default)]
pub struct MemCluster {
    pools: Mutex<HashMap<String, Arc<MemPool>>>,
}

impl MemCluster {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectCluster for MemCluster {
    async fn pool(&self, name: &str) -> OmnioResult<Arc<dyn ObjectPool>> {
        let mut pools = self.pools.lock();
        let pool = pools
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemPool::default()))
            .clone();
        Ok(pool)
    }
}

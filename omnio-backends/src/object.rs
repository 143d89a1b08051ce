//! Replicated-object-store backend
//!
//! Positioned reads with bounded seeking, append-only writes committed on
//! every call, and a per-pool connection cache. Listing and watching are
//! not supported by this class of store.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use omnio_core::{Backend, Identifier, OmnioError, OmnioResult, Reader, Writer};

/// Default chunk size when the caller passes no read hint.
const DEFAULT_READ_HINT: usize = 64 * 1024;

/// One storage pool; object I/O happens against a pool handle.
#[async_trait]
pub trait ObjectPool: Send + Sync {
    async fn size(&self, object: &str) -> OmnioResult<u64>;
    async fn read_at(&self, object: &str, offset: u64, len: usize) -> OmnioResult<Bytes>;
    async fn append(&self, object: &str, data: &[u8]) -> OmnioResult<()>;
    async fn truncate(&self, object: &str, len: u64) -> OmnioResult<()>;
    async fn remove(&self, object: &str) -> OmnioResult<()>;
}

/// A cluster connection that can produce pool handles. Producing a handle
/// is expensive; the backend caches them.
#[async_trait]
pub trait ObjectCluster: Send + Sync + 'static {
    async fn pool(&self, name: &str) -> OmnioResult<Arc<dyn ObjectPool>>;
}

/// Backend over any [`ObjectCluster`]. The identifier's authority names
/// the pool, the path names the object.
pub struct ObjectBackend<C> {
    cluster: C,
    // Lookup-or-create under one lock; concurrent opens against the same
    // pool reuse a single handle.
    pools: tokio::sync::Mutex<HashMap<String, Arc<dyn ObjectPool>>>,
}

impl<C: ObjectCluster> ObjectBackend<C> {
    pub fn new(cluster: C) -> Self {
        Self {
            cluster,
            pools: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    async fn pool(&self, id: &Identifier) -> OmnioResult<Arc<dyn ObjectPool>> {
        if id.authority().is_empty() {
            return Err(OmnioError::InvalidIdentifier(format!(
                "{id} has no pool name"
            )));
        }

        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(id.authority()) {
            return Ok(pool.clone());
        }

        debug!(pool = id.authority(), "opening pool connection");
        let pool = self.cluster.pool(id.authority()).await?;
        pools.insert(id.authority().to_string(), pool.clone());
        Ok(pool)
    }
}

#[async_trait]
impl<C: ObjectCluster> Backend for ObjectBackend<C> {
    fn name(&self) -> &str {
        "object-store"
    }

    async fn open(&self, id: &Identifier) -> OmnioResult<Box<dyn Reader>> {
        let pool = self.pool(id).await?;
        // Existence check up front; later reads assume the object is there.
        pool.size(id.path()).await?;
        Ok(Box::new(ObjectReader {
            pool,
            object: id.path().to_string(),
            pos: tokio::sync::Mutex::new(0),
        }))
    }

    async fn open_for_write(&self, id: &Identifier) -> OmnioResult<Box<dyn Writer>> {
        let pool = self.pool(id).await?;
        // Writes always append; truncating here is what gives
        // open-for-write its overwrite semantics.
        pool.truncate(id.path(), 0).await?;
        Ok(Box::new(ObjectWriter {
            pool,
            object: id.path().to_string(),
        }))
    }

    async fn open_for_append(&self, id: &Identifier) -> OmnioResult<Box<dyn Writer>> {
        let pool = self.pool(id).await?;
        Ok(Box::new(ObjectWriter {
            pool,
            object: id.path().to_string(),
        }))
    }

    async fn remove(&self, id: &Identifier) -> OmnioResult<()> {
        let pool = self.pool(id).await?;
        pool.remove(id.path()).await
    }

    // list and watch fall through to the NotImplemented defaults: the
    // store has no directory notion and no notification primitive.
}

/// Positioned reader over one object.
struct ObjectReader {
    pool: Arc<dyn ObjectPool>,
    object: String,
    pos: tokio::sync::Mutex<u64>,
}

#[async_trait]
impl Reader for ObjectReader {
    async fn read(&self, size_hint: usize) -> OmnioResult<Bytes> {
        let len = if size_hint == 0 { DEFAULT_READ_HINT } else { size_hint };
        let mut pos = self.pos.lock().await;
        let data = self.pool.read_at(&self.object, *pos, len).await?;
        *pos += data.len() as u64;
        Ok(data)
    }

    async fn seek(&self, target: SeekFrom) -> OmnioResult<u64> {
        let size = self.pool.size(&self.object).await? as i64;
        let mut pos = self.pos.lock().await;

        let newpos = match target {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(offset) => *pos as i64 + offset,
            SeekFrom::End(offset) => size + offset,
        };
        if newpos < 0 || newpos > size {
            return Err(OmnioError::InvalidSeek(newpos));
        }

        *pos = newpos as u64;
        Ok(newpos as u64)
    }

    async fn close(&self) -> OmnioResult<()> {
        Ok(())
    }
}

/// Append-only writer; every `write` is committed immediately, so `close`
/// has nothing left to do.
struct ObjectWriter {
    pool: Arc<dyn ObjectPool>,
    object: String,
}

#[async_trait]
impl Writer for ObjectWriter {
    async fn write(&mut self, data: &[u8]) -> OmnioResult<usize> {
        self.pool.append(&self.object, data).await?;
        Ok(data.len())
    }

    async fn close(&mut self) -> OmnioResult<()> {
        Ok(())
    }
}

//! Revisioned key-tree backend
//!
//! Generic over a [`KvStore`] seam so the same read/commit/watch semantics
//! serve any replicated key tree: single-shot reads, fully-buffered writes
//! committed with a retry-free compare-and-set, prefix listing at the
//! current snapshot, and a long-poll watch loop.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use omnio_core::{
    Backend, BytesReader, Identifier, OmnioError, OmnioResult, Reader, WatchCallback, Watcher,
    Writer,
};

/// Cap on the bytes a buffering writer accepts per session (1 MiB).
pub const MAX_VALUE_LEN: usize = 1 << 20;

/// A committed value together with its modification revision.
#[derive(Debug, Clone)]
pub struct KvEntry {
    pub value: Bytes,
    pub revision: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvEventKind {
    Set,
    Delete,
}

/// One change reported by the store's wait primitive.
#[derive(Debug, Clone)]
pub struct KvEvent {
    pub key: String,
    pub value: Bytes,
    pub revision: u64,
    pub kind: KvEventKind,
}

/// Minimal surface a revisioned key-value store must expose.
///
/// Revisions are store-wide and monotonic; `0` always means "key does not
/// exist".
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> OmnioResult<Option<KvEntry>>;

    /// The store-wide revision of the latest committed change.
    async fn head_revision(&self) -> OmnioResult<u64>;

    /// Retry-free compare-and-set: succeeds only while the key's current
    /// modification revision equals `expected` (`0` = key must not exist)
    /// and returns the new revision, otherwise fails with `CommitConflict`.
    async fn compare_and_put(&self, key: &str, expected: u64, value: Bytes) -> OmnioResult<u64>;

    /// All keys under a prefix at the current snapshot revision.
    async fn list_prefix(&self, prefix: &str) -> OmnioResult<Vec<String>>;

    async fn delete(&self, key: &str) -> OmnioResult<()>;

    /// Block until a change with revision greater than `after` occurs at
    /// `key` or underneath it (see [`key_matches`]).
    async fn next_change(&self, key: &str, after: u64) -> OmnioResult<KvEvent>;
}

/// Whether a change to `candidate` is covered by a watch on `watched`:
/// the exact key, or any key in the subtree below it.
pub fn key_matches(watched: &str, candidate: &str) -> bool {
    match candidate.strip_prefix(watched) {
        Some("") => true,
        Some(rest) => rest.starts_with('/') || watched.ends_with('/'),
        None => false,
    }
}

/// Backend over any [`KvStore`].
pub struct KvBackend<S> {
    store: Arc<S>,
    name: String,
}

impl<S: KvStore> KvBackend<S> {
    pub fn new(store: S) -> Self {
        Self::named("kv", store)
    }

    pub fn named(name: impl Into<String>, store: S) -> Self {
        Self {
            store: Arc::new(store),
            name: name.into(),
        }
    }
}

#[async_trait]
impl<S: KvStore> Backend for KvBackend<S> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self, id: &Identifier) -> OmnioResult<Box<dyn Reader>> {
        Ok(Box::new(KvReader {
            store: self.store.clone(),
            key: id.path().to_string(),
            consumed: tokio::sync::Mutex::new(false),
        }))
    }

    async fn open_for_write(&self, id: &Identifier) -> OmnioResult<Box<dyn Writer>> {
        let key = id.path().to_string();
        // The optimistic token is fixed at open; anything committed between
        // open and close makes this session's commit fail with
        // `CommitConflict` instead of being absorbed.
        let expected = match self.store.get(&key).await? {
            Some(entry) => entry.revision,
            None => 0,
        };
        Ok(Box::new(KvWriter {
            store: self.store.clone(),
            key,
            buf: BytesMut::new(),
            expected,
            committed: false,
        }))
    }

    async fn open_for_append(&self, id: &Identifier) -> OmnioResult<Box<dyn Writer>> {
        let key = id.path().to_string();
        // Prime the buffer with the current value so the append commits
        // through the same compare-and-set path as an overwrite.
        let (buf, expected) = match self.store.get(&key).await? {
            Some(entry) => (BytesMut::from(&entry.value[..]), entry.revision),
            None => (BytesMut::new(), 0),
        };
        Ok(Box::new(KvWriter {
            store: self.store.clone(),
            key,
            buf,
            expected,
            committed: false,
        }))
    }

    async fn list(&self, id: &Identifier) -> OmnioResult<Vec<String>> {
        let mut prefix = id.path().to_string();
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        self.store.list_prefix(&prefix).await
    }

    async fn watch(&self, id: &Identifier, callback: WatchCallback) -> OmnioResult<Watcher> {
        let store = self.store.clone();
        let key = id.path().to_string();
        // Establish the cursor before the loop starts so a write racing
        // with the subscription is never lost.
        let head = store.head_revision().await?;

        Ok(Watcher::spawn(move |mut ctx| async move {
            let mut rev = head;
            debug!(key = %key, rev, "kv watch loop starting");

            loop {
                let next = tokio::select! {
                    biased;
                    _ = ctx.shutdown_requested() => break,
                    next = store.next_change(&key, rev) => next,
                };

                match next {
                    Ok(event) => {
                        rev = event.revision;
                        if event.kind != KvEventKind::Set {
                            continue;
                        }
                        if ctx.is_shutdown() {
                            break;
                        }
                        // Fire-and-forget per event; invocations for
                        // successive events may overlap.
                        let callback = callback.clone();
                        tokio::spawn(async move {
                            callback(event.key, Box::new(BytesReader::new(event.value)));
                        });
                    }
                    Err(err @ OmnioError::FatalSubscription(_)) => {
                        warn!(key = %key, error = %err, "kv watch subscription lost");
                        ctx.report(err);
                        break;
                    }
                    Err(err) => {
                        warn!(key = %key, error = %err, "kv watch wait failed, retrying");
                        ctx.report(err);
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                }
            }

            debug!(key = %key, rev, "kv watch loop terminated");
        }))
    }

    async fn remove(&self, id: &Identifier) -> OmnioResult<()> {
        self.store.delete(id.path()).await
    }
}

/// Single-shot reader: the first `read` fetches and returns the whole
/// value, every later one reports `EndOfStream`.
struct KvReader<S> {
    store: Arc<S>,
    key: String,
    consumed: tokio::sync::Mutex<bool>,
}

#[async_trait]
impl<S: KvStore> Reader for KvReader<S> {
    async fn read(&self, _size_hint: usize) -> OmnioResult<Bytes> {
        let mut consumed = self.consumed.lock().await;
        if *consumed {
            return Err(OmnioError::EndOfStream);
        }
        // The winner of a read race fetches; everyone else sees
        // end-of-stream, even if the fetch itself fails.
        *consumed = true;

        match self.store.get(&self.key).await? {
            Some(entry) => Ok(entry.value),
            None => Err(OmnioError::EndOfStream),
        }
    }

    async fn close(&self) -> OmnioResult<()> {
        *self.consumed.lock().await = true;
        Ok(())
    }
}

/// Buffering writer committed on close with a compare-and-set against the
/// revision observed at open (`0` for a key that did not exist yet). A
/// lost revision race surfaces as `CommitConflict`; retrying is the
/// caller's decision.
struct KvWriter<S> {
    store: Arc<S>,
    key: String,
    buf: BytesMut,
    expected: u64,
    committed: bool,
}

#[async_trait]
impl<S: KvStore> Writer for KvWriter<S> {
    async fn write(&mut self, data: &[u8]) -> OmnioResult<usize> {
        self.buf.extend_from_slice(data);
        if self.buf.len() > MAX_VALUE_LEN {
            return Err(OmnioError::OversizeWrite {
                attempted: self.buf.len(),
                cap: MAX_VALUE_LEN,
            });
        }
        Ok(data.len())
    }

    async fn close(&mut self) -> OmnioResult<()> {
        if self.committed {
            return Ok(());
        }

        debug!(key = %self.key, expected = self.expected, len = self.buf.len(), "committing kv write");
        self.store
            .compare_and_put(&self.key, self.expected, self.buf.clone().freeze())
            .await?;
        self.committed = true;
        Ok(())
    }

    fn buffered(&self) -> Option<Bytes> {
        Some(Bytes::copy_from_slice(&self.buf))
    }
}

//! Backend capability contract

use async_trait::async_trait;
use bytes::Bytes;
use std::io::SeekFrom;
use std::sync::Arc;

use crate::error::{OmnioError, OmnioResult};
use crate::ident::Identifier;
use crate::watcher::Watcher;

/// Callback invoked for every change event a watcher delivers.
///
/// Receives the path of the changed resource and a lazily-materializing
/// content handle: the handle performs no backend I/O until its first
/// `read`, so callers that only care about the notification may drop it.
pub type WatchCallback = Arc<dyn Fn(String, Box<dyn Reader>) + Send + Sync>;

/// A per-open read session.
///
/// Streamed readers return up to `size_hint` bytes per call and an empty
/// buffer once exhausted. Single-shot readers return the entire payload on
/// the first call and `EndOfStream` on every later one, including after
/// `close`. State is guarded internally, so a `Reader` may be shared and
/// read concurrently; on a single-shot reader exactly one racer fetches.
#[async_trait]
pub trait Reader: Send + Sync {
    /// Read the next chunk. `size_hint` is advisory; `0` means
    /// backend-default.
    async fn read(&self, size_hint: usize) -> OmnioResult<Bytes>;

    /// Reposition the read cursor. Only positioned backends support this.
    async fn seek(&self, _pos: SeekFrom) -> OmnioResult<u64> {
        Err(OmnioError::NotImplemented)
    }

    /// Idempotent. Marks single-shot readers exhausted even if never read.
    async fn close(&self) -> OmnioResult<()>;
}

/// A per-open write session.
#[async_trait]
pub trait Writer: Send + Sync {
    /// Append `data` to the session. Buffering writers report
    /// `OversizeWrite` on the call that pushes the running total past the
    /// cap; the buffer is retained so the caller can decide what to do.
    async fn write(&mut self, data: &[u8]) -> OmnioResult<usize>;

    /// Perform the backend-specific durability step, exactly once. For
    /// buffering backends this is where data becomes visible to readers;
    /// incremental backends already committed on each `write`.
    async fn close(&mut self) -> OmnioResult<()>;

    /// The retained buffer of a buffering writer, for diagnostics.
    fn buffered(&self) -> Option<Bytes> {
        None
    }
}

/// The six-operation filesystem capability contract for one scheme.
///
/// Every operation may independently be unsupported; the default bodies
/// report `NotImplemented`, which callers must treat as a distinct,
/// expected outcome rather than a fault.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Human-readable backend name, for diagnostics.
    fn name(&self) -> &str;

    async fn open(&self, _id: &Identifier) -> OmnioResult<Box<dyn Reader>> {
        Err(OmnioError::NotImplemented)
    }

    async fn open_for_write(&self, _id: &Identifier) -> OmnioResult<Box<dyn Writer>> {
        Err(OmnioError::NotImplemented)
    }

    async fn open_for_append(&self, _id: &Identifier) -> OmnioResult<Box<dyn Writer>> {
        Err(OmnioError::NotImplemented)
    }

    async fn list(&self, _id: &Identifier) -> OmnioResult<Vec<String>> {
        Err(OmnioError::NotImplemented)
    }

    async fn watch(&self, _id: &Identifier, _callback: WatchCallback) -> OmnioResult<Watcher> {
        Err(OmnioError::NotImplemented)
    }

    async fn remove(&self, _id: &Identifier) -> OmnioResult<()> {
        Err(OmnioError::NotImplemented)
    }
}

/// A lighter-weight watch-capable handler, for schemes that support
/// notification without the full backend contract.
#[async_trait]
pub trait WatcherFactory: Send + Sync {
    async fn watch(&self, id: &Identifier, callback: WatchCallback) -> OmnioResult<Watcher>;
}

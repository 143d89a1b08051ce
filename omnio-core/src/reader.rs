//! In-memory single-shot reader

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use crate::backend::Reader;
use crate::error::{OmnioError, OmnioResult};

/// Single-shot reader over an already-materialized payload.
///
/// Used for watch-event content handles whose value arrived with the event
/// itself: handing one to a callback costs nothing until it is read.
pub struct BytesReader {
    payload: Mutex<Option<Bytes>>,
}

impl BytesReader {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: Mutex::new(Some(payload.into())),
        }
    }
}

#[async_trait]
impl Reader for BytesReader {
    async fn read(&self, _size_hint: usize) -> OmnioResult<Bytes> {
        self.payload
            .lock()
            .await
            .take()
            .ok_or(OmnioError::EndOfStream)
    }

    async fn close(&self) -> OmnioResult<()> {
        self.payload.lock().await.take();
        Ok(())
    }
}

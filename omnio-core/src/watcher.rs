//! Watcher lifecycle machinery
//!
//! A watcher is a background task that owns its own lifecycle:
//! `Starting -> Running -> ShutdownRequested -> Terminated`. Shutdown is
//! cooperative: the request is observed at the next loop iteration, so it
//! takes effect once the in-flight wait returns. Errors encountered while
//! watching are pushed to an unbounded stream on the handle instead of
//! being raised at the call site.

use std::future::Future;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::OmnioError;

/// Handed to a backend watch loop: carries the shutdown signal and the
/// error sink.
pub struct WatchContext {
    shutdown: watch::Receiver<bool>,
    errors: mpsc::UnboundedSender<OmnioError>,
}

impl WatchContext {
    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Completes once shutdown is requested. Cancel-safe, so loops can race
    /// it against the backend's blocking wait. Dropping the `Watcher`
    /// handle counts as a shutdown request.
    pub async fn shutdown_requested(&mut self) {
        while !*self.shutdown.borrow() {
            if self.shutdown.changed().await.is_err() {
                break;
            }
        }
    }

    /// Push an error to the watcher's error stream.
    pub fn report(&self, err: OmnioError) {
        let _ = self.errors.send(err);
    }
}

/// Handle to a running watch task.
///
/// The error stream remains readable after termination until drained;
/// `next_error` returns `None` once the loop has exited and every pushed
/// error has been consumed.
pub struct Watcher {
    shutdown: watch::Sender<bool>,
    errors: Mutex<mpsc::UnboundedReceiver<OmnioError>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Watcher {
    /// Spawn a watch loop on its own task.
    ///
    /// The loop receives a [`WatchContext`] and must check it between
    /// waits; there is no forced cancellation.
    pub fn spawn<F, Fut>(body: F) -> Self
    where
        F: FnOnce(WatchContext) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let ctx = WatchContext {
            shutdown: shutdown_rx,
            errors: error_tx,
        };
        let task = tokio::spawn(body(ctx));
        Self {
            shutdown: shutdown_tx,
            errors: Mutex::new(error_rx),
            task: Mutex::new(Some(task)),
        }
    }

    /// Request shutdown. Takes effect once the in-flight wait returns; no
    /// further callbacks are delivered after that point.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Await the next error pushed by the watch loop.
    pub async fn next_error(&self) -> Option<OmnioError> {
        self.errors.lock().await.recv().await
    }

    /// Non-blocking variant of [`next_error`](Self::next_error).
    pub fn try_error(&self) -> Option<OmnioError> {
        self.errors.try_lock().ok()?.try_recv().ok()
    }

    /// Wait for the background task to terminate.
    pub async fn join(&self) {
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
    }
}

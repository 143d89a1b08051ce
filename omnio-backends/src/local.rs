//! Local filesystem backend
//!
//! Streamed, seekable reads and incrementally-committed writes over the
//! native filesystem, plus change watching through the OS notification
//! facility.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use notify::{EventKind, RecursiveMode, Watcher as _};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use omnio_core::{
    Backend, Identifier, OmnioError, OmnioResult, Reader, WatchCallback, Watcher, WatcherFactory,
    Writer,
};

const DEFAULT_READ_HINT: usize = 64 * 1024;

/// The `file://` backend.
#[derive(Default)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn open(&self, id: &Identifier) -> OmnioResult<Box<dyn Reader>> {
        let file = fs::File::open(id.path()).await?;
        Ok(Box::new(LocalReader::open(file)))
    }

    async fn open_for_write(&self, id: &Identifier) -> OmnioResult<Box<dyn Writer>> {
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(id.path())
            .await?;
        Ok(Box::new(LocalWriter { file }))
    }

    async fn open_for_append(&self, id: &Identifier) -> OmnioResult<Box<dyn Writer>> {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(id.path())
            .await?;
        Ok(Box::new(LocalWriter { file }))
    }

    async fn list(&self, id: &Identifier) -> OmnioResult<Vec<String>> {
        let mut dir = fs::read_dir(id.path()).await?;
        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    async fn watch(&self, id: &Identifier, callback: WatchCallback) -> OmnioResult<Watcher> {
        watch_path(id.path(), callback).await
    }

    async fn remove(&self, id: &Identifier) -> OmnioResult<()> {
        match fs::remove_file(id.path()).await {
            Ok(()) => Ok(()),
            // Like the OS remove call, also accept empty directories.
            Err(_) => Ok(fs::remove_dir(id.path()).await?),
        }
    }
}

/// Watcher-only handler for `file://` identifiers, for processes that want
/// notification without registering the full backend.
pub struct LocalWatcherFactory;

#[async_trait]
impl WatcherFactory for LocalWatcherFactory {
    async fn watch(&self, id: &Identifier, callback: WatchCallback) -> OmnioResult<Watcher> {
        watch_path(id.path(), callback).await
    }
}

enum FileState {
    Deferred(PathBuf),
    Open(fs::File),
    Closed,
}

/// Streamed, seekable reader over one file. The lazy form defers the
/// `open` syscall to the first read, as required for watch-event content
/// handles.
struct LocalReader {
    state: Mutex<FileState>,
}

impl LocalReader {
    fn open(file: fs::File) -> Self {
        Self {
            state: Mutex::new(FileState::Open(file)),
        }
    }

    fn lazy(path: PathBuf) -> Self {
        Self {
            state: Mutex::new(FileState::Deferred(path)),
        }
    }
}

#[async_trait]
impl Reader for LocalReader {
    async fn read(&self, size_hint: usize) -> OmnioResult<Bytes> {
        let len = if size_hint == 0 { DEFAULT_READ_HINT } else { size_hint };
        let mut state = self.state.lock().await;

        if let FileState::Deferred(path) = &*state {
            *state = FileState::Open(fs::File::open(path).await?);
        }
        match &mut *state {
            FileState::Open(file) => {
                let mut buf = vec![0u8; len];
                let n = file.read(&mut buf).await?;
                buf.truncate(n);
                Ok(Bytes::from(buf))
            }
            _ => Err(OmnioError::EndOfStream),
        }
    }

    async fn seek(&self, target: SeekFrom) -> OmnioResult<u64> {
        let mut state = self.state.lock().await;

        if let FileState::Deferred(path) = &*state {
            *state = FileState::Open(fs::File::open(path).await?);
        }
        match &mut *state {
            FileState::Open(file) => Ok(file.seek(target).await?),
            _ => Err(OmnioError::EndOfStream),
        }
    }

    async fn close(&self) -> OmnioResult<()> {
        *self.state.lock().await = FileState::Closed;
        Ok(())
    }
}

/// Incrementally-committed writer; every `write` goes straight to the
/// file, `close` only flushes.
struct LocalWriter {
    file: fs::File,
}

#[async_trait]
impl Writer for LocalWriter {
    async fn write(&mut self, data: &[u8]) -> OmnioResult<usize> {
        self.file.write_all(data).await?;
        Ok(data.len())
    }

    async fn close(&mut self) -> OmnioResult<()> {
        self.file.flush().await?;
        Ok(())
    }
}

fn dispatch(callback: &WatchCallback, path: PathBuf) {
    let callback = callback.clone();
    tokio::spawn(async move {
        let name = path.to_string_lossy().into_owned();
        callback(name, Box::new(LocalReader::lazy(path)));
    });
}

async fn watch_path(raw: &str, callback: WatchCallback) -> OmnioResult<Watcher> {
    // Resolve symlinks before subscribing; the OS facility tracks inodes,
    // not link names.
    let path = fs::canonicalize(Path::new(raw)).await?;

    // Collect the entries that already exist, to synthesize the initial
    // "current contents" notifications before entering the event loop.
    let mut initial = Vec::new();
    if fs::metadata(&path).await?.is_dir() {
        let mut dir = fs::read_dir(&path).await?;
        while let Some(entry) = dir.next_entry().await? {
            initial.push(entry.path());
        }
    } else {
        initial.push(path.clone());
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut subscription = notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
        let _ = tx.send(res);
    })
    .map_err(|err| OmnioError::FatalSubscription(err.to_string()))?;
    subscription
        .watch(&path, RecursiveMode::NonRecursive)
        .map_err(|err| OmnioError::FatalSubscription(err.to_string()))?;

    Ok(Watcher::spawn(move |mut ctx| async move {
        // The OS subscription lives exactly as long as this task; dropping
        // it on exit unsubscribes.
        let _subscription = subscription;
        debug!(path = %path.display(), "file watch loop starting");

        for existing in initial.drain(..) {
            dispatch(&callback, existing);
        }

        loop {
            let message = tokio::select! {
                biased;
                _ = ctx.shutdown_requested() => break,
                message = rx.recv() => message,
            };

            match message {
                None => {
                    ctx.report(OmnioError::FatalSubscription(
                        "OS event stream closed".into(),
                    ));
                    break;
                }
                Some(Err(err)) => ctx.report(OmnioError::Transient(err.to_string())),
                Some(Ok(event)) => {
                    let qualifies = matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    );
                    if !qualifies {
                        continue;
                    }
                    for changed in event.paths {
                        if ctx.is_shutdown() {
                            break;
                        }
                        dispatch(&callback, changed);
                    }
                }
            }
        }

        debug!(path = %path.display(), "file watch loop terminated");
    }))
}

//! Cross-process change detection for file-backed session storage.
//!
//! Another process logging in or out rewrites the shared storage file. This
//! watcher turns those rewrites into [`StorageEvent`]s for one key, using
//! `notify` wakeups with a polling fallback.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::store::{FileStorage, SessionStorage};

/// A persisted value changed outside this execution context.
///
/// `new_value == None` means the key was cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

impl StorageEvent {
    pub fn is_cleared(&self) -> bool {
        self.new_value.is_none()
    }
}

/// Spawn a task that reports changes to `key` in `storage`.
///
/// The task stops when the returned receiver is dropped.
pub fn watch_storage_key(
    storage: Arc<FileStorage>,
    key: &str,
    poll_interval: Duration,
) -> (JoinHandle<()>, mpsc::Receiver<StorageEvent>) {
    let (event_tx, event_rx) = mpsc::channel(16);
    let key = key.to_string();
    let handle = tokio::spawn(async move {
        let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
        let _watcher = setup_notify_watcher(storage.path(), wake_tx);
        let mut last = read_quietly(&storage, &key).flatten();
        let mut ticker = tokio::time::interval(poll_interval);

        loop {
            tokio::select! {
                _ = event_tx.closed() => break,
                _ = wake_rx.recv() => {}
                _ = ticker.tick() => {}
            }

            let Some(current) = read_quietly(&storage, &key) else {
                continue;
            };
            if current == last {
                continue;
            }
            debug!(key = %key, cleared = current.is_none(), "session storage changed externally");
            let event = StorageEvent {
                key: key.clone(),
                old_value: last.take(),
                new_value: current.clone(),
            };
            last = current;
            if event_tx.send(event).await.is_err() {
                break;
            }
        }
    });
    (handle, event_rx)
}

/// Current value of `key`, or `None` when the file cannot be read right now.
fn read_quietly(storage: &FileStorage, key: &str) -> Option<Option<String>> {
    match storage.read(key) {
        Ok(value) => Some(value),
        Err(err) => {
            // Not evidence of a logout; wait for the next wakeup.
            warn!(key, error = %err, "unreadable session storage while watching");
            None
        }
    }
}

/// Watch the storage file's parent directory so creation is seen too.
/// The returned handle must be kept alive.
fn setup_notify_watcher(path: &Path, wake_tx: mpsc::Sender<()>) -> Option<notify::RecommendedWatcher> {
    use notify::{RecursiveMode, Watcher};

    let mut watcher = notify::recommended_watcher(move |_: notify::Result<notify::Event>| {
        let _ = wake_tx.try_send(());
    })
    .ok()?;
    let watch_path = path.parent().unwrap_or(path);
    watcher.watch(watch_path, RecursiveMode::NonRecursive).ok()?;
    Some(watcher)
}

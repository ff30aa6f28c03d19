//! Directory change notifications behind a restartable stream abstraction.
//!
//! # Design
//! - A [`ChangeSource`] opens a [`ChangeSubscription`] per directory; dropping the subscription
//!   detaches the listener.
//! - A subscription that yields `None` has lost its listener and must be re-opened.
//! - Both implementations are non-recursive: only direct children of the directory are reported.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use notify::event::{EventKind, RemoveKind};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::{CoreError, CoreResult};

const CHANNEL_CAPACITY: usize = 256;

/// A change observed in a watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A file was created, renamed into place, or modified.
    Changed(PathBuf),
    /// A file disappeared.
    Removed(PathBuf),
    /// The listener reported an error; events may have been lost.
    Failed(String),
}

/// Factory for directory subscriptions.
pub trait ChangeSource: Send + Sync {
    /// Start listening for changes in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error when the listener cannot be attached.
    fn open(&self, dir: &Path) -> CoreResult<ChangeSubscription>;
}

enum ListenerGuard {
    Notify { _watcher: RecommendedWatcher },
    Task(JoinHandle<()>),
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Self::Task(handle) = self {
            handle.abort();
        }
    }
}

/// Live stream of change events for one directory.
pub struct ChangeSubscription {
    receiver: mpsc::Receiver<ChangeEvent>,
    _guard: ListenerGuard,
}

impl ChangeSubscription {
    /// Wait for the next change; `None` means the listener has stopped.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }
}

impl std::fmt::Debug for ChangeSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSubscription").finish_non_exhaustive()
    }
}

/// Platform notification backed change source.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyChangeSource;

impl ChangeSource for NotifyChangeSource {
    fn open(&self, dir: &Path) -> CoreResult<ChangeSubscription> {
        let (tx, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let watched = dir.to_path_buf();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    for change in classify(&event) {
                        if tx.blocking_send(change).is_err() {
                            return;
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, path = %watched.display(), "directory listener error");
                    let _ = tx.blocking_send(ChangeEvent::Failed(err.to_string()));
                }
            },
            NotifyConfig::default(),
        )
        .map_err(|source| CoreError::Watch {
            path: dir.to_path_buf(),
            source,
        })?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|source| CoreError::Watch {
                path: dir.to_path_buf(),
                source,
            })?;

        Ok(ChangeSubscription {
            receiver,
            _guard: ListenerGuard::Notify { _watcher: watcher },
        })
    }
}

fn classify(event: &Event) -> Vec<ChangeEvent> {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => event
            .paths
            .iter()
            .cloned()
            .map(ChangeEvent::Changed)
            .collect(),
        EventKind::Remove(RemoveKind::File | RemoveKind::Any) => event
            .paths
            .iter()
            .cloned()
            .map(ChangeEvent::Removed)
            .collect(),
        _ => Vec::new(),
    }
}

/// Change source that periodically diffs the directory listing.
///
/// Useful on network shares where platform notifications are unreliable.
#[derive(Debug, Clone, Copy)]
pub struct PollChangeSource {
    interval: Duration,
}

impl PollChangeSource {
    /// Poll every `interval`.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for PollChangeSource {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl ChangeSource for PollChangeSource {
    fn open(&self, dir: &Path) -> CoreResult<ChangeSubscription> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|source| {
            CoreError::Runtime {
                operation: "poll_change_source.open",
                source,
            }
        })?;
        // Fail fast when the directory is not readable at all.
        let mut previous =
            listing(dir).map_err(|err| CoreError::io("poll_change_source.open", dir, err))?;

        let (tx, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let dir = dir.to_path_buf();
        let interval = self.interval;
        let handle = runtime.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let scan_dir = dir.clone();
                let current = match tokio::task::spawn_blocking(move || listing(&scan_dir)).await {
                    Ok(Ok(current)) => current,
                    Ok(Err(err)) => {
                        let _ = tx.send(ChangeEvent::Failed(err.to_string())).await;
                        return;
                    }
                    Err(err) => {
                        let _ = tx.send(ChangeEvent::Failed(err.to_string())).await;
                        return;
                    }
                };

                for change in diff(&previous, &current) {
                    if tx.send(change).await.is_err() {
                        return;
                    }
                }
                previous = current;
            }
        });

        Ok(ChangeSubscription {
            receiver,
            _guard: ListenerGuard::Task(handle),
        })
    }
}

fn listing(dir: &Path) -> std::io::Result<HashMap<PathBuf, SystemTime>> {
    let mut entries = HashMap::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if metadata.is_file() {
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            entries.insert(entry.path(), modified);
        }
    }
    Ok(entries)
}

fn diff(
    previous: &HashMap<PathBuf, SystemTime>,
    current: &HashMap<PathBuf, SystemTime>,
) -> Vec<ChangeEvent> {
    let mut changes: Vec<ChangeEvent> = current
        .iter()
        .filter(|(path, modified)| previous.get(*path) != Some(*modified))
        .map(|(path, _)| ChangeEvent::Changed(path.clone()))
        .collect();
    changes.extend(
        previous
            .keys()
            .filter(|path| !current.contains_key(*path))
            .cloned()
            .map(ChangeEvent::Removed),
    );
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::time::timeout;

    type TestResult<T> = anyhow::Result<T>;

    #[tokio::test]
    async fn poll_source_reports_new_and_removed_files() -> TestResult<()> {
        let dir = TempDir::new()?;
        let source = PollChangeSource::new(Duration::from_millis(20));
        let mut subscription = source.open(dir.path())?;

        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"data")?;
        let event = timeout(Duration::from_secs(5), subscription.next()).await?;
        assert_eq!(event, Some(ChangeEvent::Changed(file.clone())));

        std::fs::remove_file(&file)?;
        timeout(Duration::from_secs(5), async {
            while let Some(event) = subscription.next().await {
                if event == ChangeEvent::Removed(file.clone()) {
                    return Ok(());
                }
            }
            anyhow::bail!("subscription closed before removal was observed")
        })
        .await??;
        Ok(())
    }

    #[tokio::test]
    async fn poll_source_fails_for_missing_directory() {
        let source = PollChangeSource::default();
        let result = source.open(Path::new("/definitely/not/here"));
        assert!(matches!(result, Err(CoreError::Io { .. })));
    }

    #[tokio::test]
    async fn poll_source_ends_stream_when_directory_vanishes() -> TestResult<()> {
        let root = TempDir::new()?;
        let dir = root.path().join("watched");
        std::fs::create_dir(&dir)?;
        let source = PollChangeSource::new(Duration::from_millis(20));
        let mut subscription = source.open(&dir)?;

        std::fs::remove_dir(&dir)?;
        let first = timeout(Duration::from_secs(5), subscription.next()).await?;
        assert!(matches!(first, Some(ChangeEvent::Failed(_))));
        let closed = timeout(Duration::from_secs(5), subscription.next()).await?;
        assert!(closed.is_none());
        Ok(())
    }

    #[test]
    fn poll_source_requires_runtime() -> TestResult<()> {
        let dir = TempDir::new()?;
        let result = PollChangeSource::default().open(dir.path());
        assert!(matches!(result, Err(CoreError::Runtime { .. })));
        Ok(())
    }
}

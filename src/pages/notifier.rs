//! Per-directory change notification.
//!
//! A [`FolderNotifier`] watches exactly one directory, non-recursively, and
//! invokes its callback whenever the directory's immediate contents or
//! attributes change. It only says *that* something changed; callers must
//! re-list the directory to learn what. Native watching is tried first and
//! falls back to polling for filesystems where it cannot be installed
//! (NFS, WSL, network drives).

use notify::event::{AccessKind, AccessMode, ModifyKind};
use notify::{
    Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while installing a notifier.
#[derive(Error, Debug)]
pub enum NotifierError {
    /// Neither the native nor the polling watcher could be created.
    #[error("Failed to create watcher: {0}")]
    WatcherCreation(#[from] notify::Error),

    /// The watcher exists but refused the path.
    #[error("Failed to watch path {path}: {source}")]
    WatchPath {
        /// Directory that could not be watched.
        path: PathBuf,
        /// Underlying error.
        source: notify::Error,
    },
}

/// Simplified event kinds, used for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileChangeKind {
    /// An entry appeared.
    Create,
    /// Contents changed.
    Modify,
    /// Permissions or timestamps changed.
    Attributes,
    /// An entry disappeared.
    Remove,
    /// An entry was renamed.
    Rename,
}

impl FileChangeKind {
    /// Map a raw event kind, or `None` for events that do not change the directory.
    pub fn from_event_kind(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(FileChangeKind::Create),
            EventKind::Modify(ModifyKind::Name(_)) => Some(FileChangeKind::Rename),
            EventKind::Modify(ModifyKind::Metadata(_)) => Some(FileChangeKind::Attributes),
            EventKind::Modify(_) => Some(FileChangeKind::Modify),
            EventKind::Remove(_) => Some(FileChangeKind::Remove),
            // inotify reports a finished write as a close-after-write access.
            EventKind::Access(AccessKind::Close(AccessMode::Write)) => {
                Some(FileChangeKind::Modify)
            }
            EventKind::Access(_) => None,
            EventKind::Any | EventKind::Other => Some(FileChangeKind::Modify),
        }
    }
}

enum Backend {
    Native(RecommendedWatcher),
    Poll(PollWatcher),
}

impl Backend {
    fn unwatch(&mut self, path: &Path) -> notify::Result<()> {
        match self {
            Backend::Native(watcher) => watcher.unwatch(path),
            Backend::Poll(watcher) => watcher.unwatch(path),
        }
    }
}

/// Watch handle for a single directory.
///
/// Call [`FolderNotifier::stop`] to release the OS watch. Dropping the
/// notifier releases it as well.
pub struct FolderNotifier {
    path: PathBuf,
    backend: Option<Backend>,
}

impl FolderNotifier {
    /// Start watching `path`, invoking `on_change` from the watcher thread on every change.
    ///
    /// `poll_interval` is only used if native watching cannot be installed.
    pub fn watch<F>(path: &Path, poll_interval: Duration, on_change: F) -> Result<Self, NotifierError>
    where
        F: Fn() + Clone + Send + 'static,
    {
        let native_config = Config::default().with_compare_contents(false);
        match RecommendedWatcher::new(event_handler(path, on_change.clone()), native_config)
            .and_then(|mut watcher| {
                watcher
                    .watch(path, RecursiveMode::NonRecursive)
                    .map(|()| watcher)
            }) {
            Ok(watcher) => {
                tracing::debug!("Using native watcher for {}", path.display());
                return Ok(Self {
                    path: path.to_path_buf(),
                    backend: Some(Backend::Native(watcher)),
                });
            }
            Err(e) => {
                tracing::warn!(
                    "Native watcher failed for {}: {}, falling back to polling",
                    path.display(),
                    e
                );
            }
        }

        let poll_config = Config::default()
            .with_poll_interval(poll_interval)
            .with_compare_contents(false);
        let mut watcher = PollWatcher::new(event_handler(path, on_change), poll_config)?;
        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| NotifierError::WatchPath {
                path: path.to_path_buf(),
                source: e,
            })?;

        tracing::debug!("Using poll watcher for {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            backend: Some(Backend::Poll(watcher)),
        })
    }

    /// Watched directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check whether this notifier fell back to polling.
    pub fn is_polling(&self) -> bool {
        matches!(self.backend, Some(Backend::Poll(_)))
    }

    /// Whether the watch is still installed.
    pub fn is_active(&self) -> bool {
        self.backend.is_some()
    }

    /// Stop watching and release the OS handle.
    pub fn stop(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            // The watch is already gone if the directory was deleted.
            if let Err(e) = backend.unwatch(&self.path) {
                tracing::debug!("Unwatch of {} reported: {}", self.path.display(), e);
            }
        }
    }
}

impl Drop for FolderNotifier {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for FolderNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FolderNotifier")
            .field("path", &self.path)
            .field("active", &self.is_active())
            .field("polling", &self.is_polling())
            .finish()
    }
}

fn event_handler<F>(path: &Path, on_change: F) -> impl FnMut(notify::Result<Event>) + Send + 'static
where
    F: Fn() + Send + 'static,
{
    let watched = path.to_path_buf();
    move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if let Some(kind) = FileChangeKind::from_event_kind(&event.kind) {
                tracing::trace!("{:?} in {}", kind, watched.display());
                on_change();
            }
        }
        Err(e) => {
            tracing::warn!("Watcher error for {}: {}", watched.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, MetadataKind, RemoveKind, RenameMode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;
    use tempfile::tempdir;

    #[test]
    fn test_directory_changing_kinds_are_reported() {
        let cases = [
            (EventKind::Create(CreateKind::File), FileChangeKind::Create),
            (EventKind::Remove(RemoveKind::Any), FileChangeKind::Remove),
            (
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                FileChangeKind::Rename,
            ),
            (
                EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
                FileChangeKind::Attributes,
            ),
            (
                EventKind::Access(AccessKind::Close(AccessMode::Write)),
                FileChangeKind::Modify,
            ),
        ];
        for (raw, expected) in cases {
            assert_eq!(FileChangeKind::from_event_kind(&raw), Some(expected));
        }
    }

    #[test]
    fn test_plain_reads_are_ignored() {
        assert_eq!(
            FileChangeKind::from_event_kind(&EventKind::Access(AccessKind::Open(AccessMode::Any))),
            None
        );
        assert_eq!(
            FileChangeKind::from_event_kind(&EventKind::Access(AccessKind::Close(AccessMode::Read))),
            None
        );
    }

    #[test]
    fn test_watch_missing_directory_fails() {
        let temp = tempdir().unwrap();
        let result = FolderNotifier::watch(
            &temp.path().join("missing"),
            Duration::from_millis(50),
            || {},
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_callback_fires_on_create_and_stops_after_release() {
        let temp = tempdir().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let notifier = FolderNotifier::watch(temp.path(), Duration::from_millis(50), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(notifier.is_active());

        std::fs::write(temp.path().join("new.txt"), "hi").unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while hits.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(hits.load(Ordering::SeqCst) > 0);

        notifier.stop();
        std::thread::sleep(Duration::from_millis(200));
        let settled = hits.load(Ordering::SeqCst);
        std::fs::write(temp.path().join("after.txt"), "bye").unwrap();
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(hits.load(Ordering::SeqCst), settled);
    }
}

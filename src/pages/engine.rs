//! The page engine: owner of loaded pages, notifiers and all mutations.
//!
//! `PageEngine` is the single writer of page state. Notifier callbacks do
//! not touch state; they send a [`ChangeSignal`] that the owner turns into
//! a [`PageEngine::reload`]. Item edits change the in-memory list and
//! persist it through the sidecar without a rebuild. Operations that change
//! directory shape (new page, deleted page, imported file) only touch the
//! disk and rely on the resulting change signal to refresh state.

use crate::config::EngineConfig;
use crate::pages::error::PageError;
use crate::pages::model::{ItemId, Page, PageNode, PageSnapshot, NEW_TEXT_BLOCK};
use crate::pages::naming::unique_destination;
use crate::pages::notifier::{FolderNotifier, NotifierError};
use crate::pages::sidecar::SidecarStore;
use crate::pages::tree::TreeBuilder;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};

/// "Something changed in this directory." Carries no detail on purpose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSignal {
    /// Directory whose contents changed.
    pub dir: PathBuf,
}

/// Receiving side of the notifier signals, consumed by the owner loop.
pub type ChangeReceiver = mpsc::UnboundedReceiver<ChangeSignal>;

/// Why a new snapshot was published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateReason {
    /// The whole root was rebuilt.
    Reloaded,
    /// One page's items were edited in place.
    Edited(PathBuf),
}

/// Notification sent to subscribers after every publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagesUpdate {
    /// Generation of the snapshot that was just published.
    pub generation: u64,
    /// What triggered the publish.
    pub reason: UpdateReason,
    /// Number of pages in that snapshot.
    pub page_count: usize,
}

/// Owner of the page hierarchy under one root.
pub struct PageEngine {
    config: EngineConfig,
    store: SidecarStore,
    builder: TreeBuilder,
    root: Option<PathBuf>,
    root_notifier: Option<FolderNotifier>,
    page_notifiers: HashMap<PathBuf, FolderNotifier>,
    snapshot: Arc<PageSnapshot>,
    published: watch::Sender<Arc<PageSnapshot>>,
    updates: broadcast::Sender<PagesUpdate>,
    changes: mpsc::UnboundedSender<ChangeSignal>,
}

impl PageEngine {
    /// Creates an engine with nothing loaded.
    ///
    /// # Returns
    /// A tuple of (engine, receiver) where receiver gets a signal every time a
    /// watched directory changes. Hand it to [`crate::pages::EngineService`]
    /// or drain it yourself and call [`PageEngine::reload`].
    pub fn new(config: EngineConfig) -> (Self, ChangeReceiver) {
        let store = SidecarStore::new(config.sidecar_name.clone());
        let snapshot = Arc::new(PageSnapshot::default());
        let (published, _) = watch::channel(Arc::clone(&snapshot));
        let (updates, _) = broadcast::channel(config.update_buffer.max(1));
        let (changes, change_rx) = mpsc::unbounded_channel();

        (
            Self {
                builder: TreeBuilder::new(store.clone()),
                store,
                config,
                root: None,
                root_notifier: None,
                page_notifiers: HashMap::new(),
                snapshot,
                published,
                updates,
                changes,
            },
            change_rx,
        )
    }

    /// Configuration the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Canonical root directory, once loaded.
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<PageSnapshot> {
        Arc::clone(&self.snapshot)
    }

    /// Every page under the root, depth-first.
    pub fn pages(&self) -> &[Page] {
        &self.snapshot.pages
    }

    /// Top-level nodes of the page tree.
    pub fn page_tree(&self) -> &[PageNode] {
        &self.snapshot.tree
    }

    /// Look up a page by its directory path.
    pub fn page(&self, path: &Path) -> Option<&Page> {
        self.snapshot.page(path)
    }

    /// Receiver that always holds the latest published snapshot.
    pub fn watch_snapshot(&self) -> watch::Receiver<Arc<PageSnapshot>> {
        self.published.subscribe()
    }

    /// Subscribe to publish notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<PagesUpdate> {
        self.updates.subscribe()
    }

    /// Directories that currently have an active notifier, root included.
    pub fn watched_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self
            .root_notifier
            .iter()
            .map(|n| n.path().to_path_buf())
            .chain(self.page_notifiers.keys().cloned())
            .collect();
        dirs.sort();
        dirs
    }

    /// Start managing `root`: watch it and perform the initial reload.
    ///
    /// Any previously loaded root is released first.
    pub fn load(&mut self, root: &Path) -> Result<(), PageError> {
        let root = fs::canonicalize(root).map_err(|e| PageError::io(root, e))?;
        let root_notifier = self.notifier_for(&root)?;

        self.release_notifiers();
        tracing::info!("Loading pages from {}", root.display());
        self.root_notifier = Some(root_notifier);
        self.root = Some(root);
        self.reload()
    }

    /// Rebuild everything under the root and publish it as one swap.
    ///
    /// Notifiers are installed for newly discovered pages and released for
    /// pages that disappeared. If the root itself cannot be listed the
    /// previous state stays published.
    pub fn reload(&mut self) -> Result<(), PageError> {
        let root = self.root.clone().ok_or(PageError::NotLoaded)?;

        let forest = match self.builder.build(&root) {
            Ok(forest) => forest,
            Err(e) => {
                tracing::error!("Failed to reload {}: {}", root.display(), e);
                return Err(e);
            }
        };

        let seen: HashSet<PathBuf> = forest.pages.iter().map(|p| p.path.clone()).collect();
        self.sync_notifiers(&seen);

        tracing::debug!(
            "Reloaded {} pages ({} top-level) from {}",
            forest.pages.len(),
            forest.tree.len(),
            root.display()
        );
        self.publish(
            PageSnapshot {
                root: Some(root),
                pages: forest.pages,
                tree: forest.tree,
                generation: 0,
            },
            UpdateReason::Reloaded,
        );
        Ok(())
    }

    fn sync_notifiers(&mut self, seen: &HashSet<PathBuf>) {
        let stale: Vec<PathBuf> = self
            .page_notifiers
            .keys()
            .filter(|path| !seen.contains(*path))
            .cloned()
            .collect();
        for path in stale {
            if let Some(notifier) = self.page_notifiers.remove(&path) {
                tracing::debug!("Releasing notifier for {}", path.display());
                notifier.stop();
            }
        }

        for path in seen {
            if self.page_notifiers.contains_key(path) {
                continue;
            }
            match self.notifier_for(path) {
                Ok(notifier) => {
                    self.page_notifiers.insert(path.clone(), notifier);
                }
                Err(e) => {
                    tracing::warn!("Page {} will not refresh on its own: {}", path.display(), e);
                }
            }
        }
    }

    fn notifier_for(&self, dir: &Path) -> Result<FolderNotifier, NotifierError> {
        let changes = self.changes.clone();
        let watched = dir.to_path_buf();
        FolderNotifier::watch(dir, self.config.poll_interval, move || {
            // The owner may already be gone during shutdown.
            let _ = changes.send(ChangeSignal {
                dir: watched.clone(),
            });
        })
    }

    fn release_notifiers(&mut self) {
        if let Some(notifier) = self.root_notifier.take() {
            notifier.stop();
        }
        for (_, notifier) in self.page_notifiers.drain() {
            notifier.stop();
        }
    }

    /// Stop every notifier. The published snapshot stays readable.
    pub fn shutdown(&mut self) {
        let count = self.page_notifiers.len() + usize::from(self.root_notifier.is_some());
        if count > 0 {
            tracing::info!("Releasing {} notifiers", count);
        }
        self.release_notifiers();
    }

    fn publish(&mut self, mut next: PageSnapshot, reason: UpdateReason) {
        next.generation = self.snapshot.generation + 1;
        let update = PagesUpdate {
            generation: next.generation,
            reason,
            page_count: next.pages.len(),
        };

        self.snapshot = Arc::new(next);
        self.published.send_replace(Arc::clone(&self.snapshot));
        // No subscribers is fine.
        let _ = self.updates.send(update);
    }

    /// Apply `edit` to a copy of `page`, persist it, then publish it.
    ///
    /// Nothing is published if the edit or the sidecar write fails.
    fn edit_page<T, F>(&mut self, page: &Path, edit: F) -> Result<T, PageError>
    where
        F: FnOnce(&mut Page) -> Result<T, PageError>,
    {
        let index = self
            .snapshot
            .pages
            .iter()
            .position(|p| p.path == page)
            .ok_or_else(|| PageError::PageNotFound(page.to_path_buf()))?;

        let mut edited = self.snapshot.pages[index].clone();
        let output = edit(&mut edited)?;
        self.store.write(&edited.path, &edited.content)?;

        let mut next = (*self.snapshot).clone();
        next.pages[index] = edited;
        self.publish(next, UpdateReason::Edited(page.to_path_buf()));
        Ok(output)
    }

    fn known_page(&self, page: &Path) -> Result<&Page, PageError> {
        self.snapshot
            .page(page)
            .ok_or_else(|| PageError::PageNotFound(page.to_path_buf()))
    }

    /// Replace the body of a text item.
    pub fn update_text(&mut self, page: &Path, item: ItemId, text: String) -> Result<(), PageError> {
        self.edit_page(page, |p| p.set_text(item, text))
    }

    /// Append a new text block to `page` and return its id.
    pub fn add_text_block(&mut self, page: &Path) -> Result<ItemId, PageError> {
        self.edit_page(page, |p| Ok(p.push_text(NEW_TEXT_BLOCK)))
    }

    /// Remove an item. For file items the backing entry is deleted from disk too.
    ///
    /// The sidecar is saved before anything on disk is removed. If removing the
    /// entry then fails, the error is returned and the next reload brings the
    /// entry back as a new item.
    pub fn delete_item(&mut self, page: &Path, item: ItemId) -> Result<(), PageError> {
        let removed = self.edit_page(page, |p| p.remove_item(item))?;

        if let Some(filename) = removed.filename() {
            remove_entry(&page.join(filename))?;
        }
        Ok(())
    }

    /// Move `from` immediately before `to`.
    pub fn move_item(&mut self, page: &Path, from: ItemId, to: ItemId) -> Result<(), PageError> {
        self.edit_page(page, |p| p.move_item(from, to))
    }

    /// Move `from` to the end of the page.
    pub fn move_item_to_end(&mut self, page: &Path, from: ItemId) -> Result<(), PageError> {
        self.edit_page(page, |p| p.move_item_to_end(from))
    }

    /// Copy `src` into `page` under a free name.
    ///
    /// Returns the destination, or `None` when `src` already lives in the page
    /// directory. The new item shows up with the reload that follows the copy.
    pub fn import_file(&self, src: &Path, page: &Path) -> Result<Option<PathBuf>, PageError> {
        let page_dir = self.known_page(page)?.path.clone();

        if let Some(parent) = src.parent() {
            if same_dir(parent, &page_dir) {
                tracing::debug!("{} is already in {}", src.display(), page_dir.display());
                return Ok(None);
            }
        }

        let name = src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                PageError::io(src, io::Error::new(io::ErrorKind::InvalidInput, "no file name"))
            })?;
        let dest = unique_destination(&page_dir, &name);
        fs::copy(src, &dest).map_err(|e| PageError::io(src, e))?;

        tracing::info!("Imported {} as {}", src.display(), dest.display());
        Ok(Some(dest))
    }

    /// Create a new page directory under `parent`, or under the root when `None`.
    pub fn add_page(&self, parent: Option<&Path>) -> Result<PathBuf, PageError> {
        let root = self.root.as_deref().ok_or(PageError::NotLoaded)?;
        let base = parent.unwrap_or(root);

        let name = format!("Page {}", Utc::now().timestamp());
        let dir = unique_destination(base, &name);
        fs::create_dir(&dir).map_err(|e| PageError::io(&dir, e))?;

        tracing::info!("Created page {}", dir.display());
        Ok(dir)
    }

    /// Remove a page directory and everything in it.
    pub fn delete_page(&self, page: &Path) -> Result<(), PageError> {
        let dir = self.known_page(page)?.path.clone();
        fs::remove_dir_all(&dir).map_err(|e| PageError::io(&dir, e))?;

        tracing::info!("Deleted page {}", dir.display());
        Ok(())
    }
}

impl Drop for PageEngine {
    fn drop(&mut self) {
        self.release_notifiers();
    }
}

/// Remove a page entry without following symlinks. Folders go with their contents.
fn remove_entry(path: &Path) -> Result<(), PageError> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!("{} was already gone", path.display());
            return Ok(());
        }
        Err(e) => return Err(PageError::io(path, e)),
    };

    let removed = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    removed.map_err(|e| PageError::io(path, e))?;
    tracing::debug!("Deleted {}", path.display());
    Ok(())
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Builder for PageEngine with sensible defaults.
pub struct PageEngineBuilder {
    config: EngineConfig,
}

impl PageEngineBuilder {
    /// Builder with default settings.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    /// Quiet period before a watch-triggered reload.
    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.config.debounce = Duration::from_millis(ms);
        self
    }

    /// Upper bound on how long a reload may be deferred.
    pub fn max_debounce_ms(mut self, ms: u64) -> Self {
        self.config.max_debounce = Duration::from_millis(ms);
        self
    }

    /// Poll interval used when native watching is unavailable.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval = Duration::from_millis(ms);
        self
    }

    /// Capacity of the update broadcast channel.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.update_buffer = size;
        self
    }

    /// Override the sidecar file name.
    pub fn sidecar_name(mut self, name: impl Into<String>) -> Self {
        self.config.sidecar_name = name.into();
        self
    }

    /// Current configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create the engine and its change receiver.
    pub fn build(self) -> (PageEngine, ChangeReceiver) {
        PageEngine::new(self.config)
    }
}

impl Default for PageEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

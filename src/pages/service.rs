//! Owner task for a [`PageEngine`].
//!
//! The engine is moved into a single tokio task. Callers talk to it through
//! a cloneable [`EngineHandle`]; each request is answered on a oneshot, so
//! mutations still complete before the caller continues. Change signals from
//! notifier threads are debounced on the same task, which guarantees that a
//! reload never overlaps another reload or an edit.
//!
//! ```text
//! FolderNotifier callback [WATCHER THREAD]
//!        ↓  ChangeSignal
//! owner loop ── ReloadDebouncer (quiet period, capped)
//!        ↓
//! PageEngine::reload() ── watch::send_replace(snapshot)
//!        ↓
//! EngineHandle::snapshot() / subscribe() [CALLERS]
//! ```

use crate::pages::engine::{ChangeReceiver, PageEngine, PagesUpdate};
use crate::pages::error::PageError;
use crate::pages::model::{ItemId, Page, PageSnapshot};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

const COMMAND_BUFFER: usize = 64;

type Reply<T> = oneshot::Sender<Result<T, PageError>>;

enum Command {
    Load { root: PathBuf, reply: Reply<()> },
    Reload { reply: Reply<()> },
    UpdateText { page: PathBuf, item: ItemId, text: String, reply: Reply<()> },
    AddTextBlock { page: PathBuf, reply: Reply<ItemId> },
    DeleteItem { page: PathBuf, item: ItemId, reply: Reply<()> },
    MoveItem { page: PathBuf, from: ItemId, to: ItemId, reply: Reply<()> },
    MoveItemToEnd { page: PathBuf, from: ItemId, reply: Reply<()> },
    ImportFile { src: PathBuf, page: PathBuf, reply: Reply<Option<PathBuf>> },
    AddPage { parent: Option<PathBuf>, reply: Reply<PathBuf> },
    DeletePage { page: PathBuf, reply: Reply<()> },
}

/// Coalesces bursts of change signals into one reload.
///
/// Each signal pushes the deadline out by `debounce`, but never past
/// `max_delay` after the first pending signal.
#[derive(Debug, Clone)]
pub struct ReloadDebouncer {
    debounce: Duration,
    max_delay: Duration,
    first: Option<Instant>,
    last: Option<Instant>,
    pending: usize,
}

impl ReloadDebouncer {
    /// Debouncer with the given quiet period and cap.
    pub fn new(debounce: Duration, max_delay: Duration) -> Self {
        Self {
            debounce,
            max_delay: max_delay.max(debounce),
            first: None,
            last: None,
            pending: 0,
        }
    }

    /// Note one change signal arriving at `now`.
    pub fn record(&mut self, now: Instant) {
        self.first.get_or_insert(now);
        self.last = Some(now);
        self.pending += 1;
    }

    /// When the pending reload should run, if any.
    pub fn deadline(&self) -> Option<Instant> {
        let (first, last) = (self.first?, self.last?);
        Some((last + self.debounce).min(first + self.max_delay))
    }

    /// Whether the pending reload is due at `now`.
    pub fn is_ready(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }

    /// Clear the pending window, returning how many signals it absorbed.
    pub fn take(&mut self) -> usize {
        self.first = None;
        self.last = None;
        std::mem::take(&mut self.pending)
    }
}

/// Spawns the owner task.
pub struct EngineService;

impl EngineService {
    /// Move `engine` into a background task and return a handle to it.
    ///
    /// The task ends, releasing every notifier, once all handles are dropped.
    /// Reloads and edits run on the blocking pool one at a time, so the task
    /// itself never stalls the runtime.
    pub fn spawn(engine: PageEngine, changes: ChangeReceiver) -> (EngineHandle, JoinHandle<()>) {
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = EngineHandle {
            commands,
            snapshot: engine.watch_snapshot(),
            updates: engine.subscribe(),
        };

        let task = tokio::spawn(async move {
            run_owner_loop(engine, changes, command_rx).await;
        });
        (handle, task)
    }
}

enum Wake {
    Command(Command),
    Changed,
    Reload,
    Closed,
}

async fn run_owner_loop(
    engine: PageEngine,
    mut changes: ChangeReceiver,
    mut commands: mpsc::Receiver<Command>,
) {
    let mut debouncer = ReloadDebouncer::new(
        engine.config().debounce,
        engine.config().max_debounce,
    );
    let mut engine = engine;

    loop {
        let deadline = debouncer.deadline().map(tokio::time::Instant::from_std);

        let wake = tokio::select! {
            command = commands.recv() => match command {
                Some(command) => Wake::Command(command),
                None => Wake::Closed,
            },
            Some(signal) = changes.recv() => {
                tracing::trace!("Change signal from {}", signal.dir.display());
                Wake::Changed
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now)),
                if deadline.is_some() => Wake::Reload,
        };

        engine = match wake {
            Wake::Command(command) => {
                match off_runtime(engine, move |engine| apply(engine, command)).await {
                    Some((engine, ())) => engine,
                    None => return,
                }
            }
            Wake::Changed => {
                debouncer.record(Instant::now());
                engine
            }
            Wake::Reload => {
                let absorbed = debouncer.take();
                tracing::debug!("Reloading after {} change signals", absorbed);
                match off_runtime(engine, PageEngine::reload).await {
                    Some((engine, result)) => {
                        if let Err(e) = result {
                            tracing::debug!("Watch-triggered reload abandoned: {}", e);
                        }
                        engine
                    }
                    None => return,
                }
            }
            Wake::Closed => break,
        };
    }

    tracing::info!("All engine handles dropped, shutting down");
    engine.shutdown();
}

/// Run blocking filesystem work against the engine on tokio's blocking pool.
///
/// Hands the engine back with the result. `None` means the runtime is
/// shutting down and the engine went with the cancelled task.
async fn off_runtime<T, F>(engine: PageEngine, work: F) -> Option<(PageEngine, T)>
where
    T: Send + 'static,
    F: FnOnce(&mut PageEngine) -> T + Send + 'static,
{
    let result = tokio::task::spawn_blocking(move || {
        let mut engine = engine;
        let output = work(&mut engine);
        (engine, output)
    })
    .await;

    match result {
        Ok(done) => Some(done),
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => {
            tracing::warn!("Engine work cancelled: {}", e);
            None
        }
    }
}

fn apply(engine: &mut PageEngine, command: Command) {
    // A dropped reply receiver means the caller stopped waiting; the work still stands.
    match command {
        Command::Load { root, reply } => {
            let _ = reply.send(engine.load(&root));
        }
        Command::Reload { reply } => {
            let _ = reply.send(engine.reload());
        }
        Command::UpdateText { page, item, text, reply } => {
            let _ = reply.send(engine.update_text(&page, item, text));
        }
        Command::AddTextBlock { page, reply } => {
            let _ = reply.send(engine.add_text_block(&page));
        }
        Command::DeleteItem { page, item, reply } => {
            let _ = reply.send(engine.delete_item(&page, item));
        }
        Command::MoveItem { page, from, to, reply } => {
            let _ = reply.send(engine.move_item(&page, from, to));
        }
        Command::MoveItemToEnd { page, from, reply } => {
            let _ = reply.send(engine.move_item_to_end(&page, from));
        }
        Command::ImportFile { src, page, reply } => {
            let _ = reply.send(engine.import_file(&src, &page));
        }
        Command::AddPage { parent, reply } => {
            let _ = reply.send(engine.add_page(parent.as_deref()));
        }
        Command::DeletePage { page, reply } => {
            let _ = reply.send(engine.delete_page(&page));
        }
    }
}

/// Cloneable access to an engine running under [`EngineService`].
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<Arc<PageSnapshot>>,
    // Kept only to resubscribe; holding a receiver lets the channel close with the engine.
    updates: broadcast::Receiver<PagesUpdate>,
}

impl Clone for EngineHandle {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            snapshot: self.snapshot.clone(),
            updates: self.updates.resubscribe(),
        }
    }
}

impl EngineHandle {
    /// The latest published snapshot.
    pub fn snapshot(&self) -> Arc<PageSnapshot> {
        Arc::clone(&self.snapshot.borrow())
    }

    /// Copy of one page from the latest snapshot.
    pub fn page(&self, path: &Path) -> Option<Page> {
        self.snapshot.borrow().page(path).cloned()
    }

    /// Receiver that always holds the latest snapshot.
    pub fn watch_snapshot(&self) -> watch::Receiver<Arc<PageSnapshot>> {
        self.snapshot.clone()
    }

    /// Receive a [`PagesUpdate`] for every publish from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PagesUpdate> {
        self.updates.resubscribe()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, PageError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| PageError::EngineClosed)?;
        response.await.map_err(|_| PageError::EngineClosed)?
    }

    /// Load a new root. See [`PageEngine::load`].
    pub async fn load(&self, root: impl Into<PathBuf>) -> Result<(), PageError> {
        let root = root.into();
        self.request(|reply| Command::Load { root, reply }).await
    }

    /// Rebuild everything now.
    pub async fn reload(&self) -> Result<(), PageError> {
        self.request(|reply| Command::Reload { reply }).await
    }

    /// Replace the body of a text item.
    pub async fn update_text(
        &self,
        page: &Path,
        item: ItemId,
        text: impl Into<String>,
    ) -> Result<(), PageError> {
        let (page, text) = (page.to_path_buf(), text.into());
        self.request(|reply| Command::UpdateText { page, item, text, reply })
            .await
    }

    /// Append a text block and return its id.
    pub async fn add_text_block(&self, page: &Path) -> Result<ItemId, PageError> {
        let page = page.to_path_buf();
        self.request(|reply| Command::AddTextBlock { page, reply }).await
    }

    /// Remove an item and, for file items, its entry on disk.
    pub async fn delete_item(&self, page: &Path, item: ItemId) -> Result<(), PageError> {
        let page = page.to_path_buf();
        self.request(|reply| Command::DeleteItem { page, item, reply })
            .await
    }

    /// Move `from` immediately before `to`.
    pub async fn move_item(&self, page: &Path, from: ItemId, to: ItemId) -> Result<(), PageError> {
        let page = page.to_path_buf();
        self.request(|reply| Command::MoveItem { page, from, to, reply })
            .await
    }

    /// Move `from` to the end of the page.
    pub async fn move_item_to_end(&self, page: &Path, from: ItemId) -> Result<(), PageError> {
        let page = page.to_path_buf();
        self.request(|reply| Command::MoveItemToEnd { page, from, reply })
            .await
    }

    /// Copy a file into a page. See [`PageEngine::import_file`].
    pub async fn import_file(&self, src: &Path, page: &Path) -> Result<Option<PathBuf>, PageError> {
        let (src, page) = (src.to_path_buf(), page.to_path_buf());
        self.request(|reply| Command::ImportFile { src, page, reply })
            .await
    }

    /// Create a page under `parent`, or under the root.
    pub async fn add_page(&self, parent: Option<&Path>) -> Result<PathBuf, PageError> {
        let parent = parent.map(Path::to_path_buf);
        self.request(|reply| Command::AddPage { parent, reply }).await
    }

    /// Remove a page directory and everything in it.
    pub async fn delete_page(&self, page: &Path) -> Result<(), PageError> {
        let page = page.to_path_buf();
        self.request(|reply| Command::DeletePage { page, reply }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pages::engine::{PageEngineBuilder, UpdateReason};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_debouncer_waits_for_quiet_period() {
        let start = Instant::now();
        let mut debouncer =
            ReloadDebouncer::new(Duration::from_millis(200), Duration::from_secs(2));
        assert_eq!(debouncer.deadline(), None);

        debouncer.record(start);
        debouncer.record(start + Duration::from_millis(150));

        assert_eq!(
            debouncer.deadline(),
            Some(start + Duration::from_millis(350))
        );
        assert!(!debouncer.is_ready(start + Duration::from_millis(300)));
        assert!(debouncer.is_ready(start + Duration::from_millis(350)));
        assert_eq!(debouncer.take(), 2);
        assert_eq!(debouncer.deadline(), None);
    }

    #[test]
    fn test_debouncer_caps_continuous_bursts() {
        let start = Instant::now();
        let mut debouncer =
            ReloadDebouncer::new(Duration::from_millis(200), Duration::from_millis(500));
        for step in 0..10 {
            debouncer.record(start + Duration::from_millis(step * 100));
        }
        assert_eq!(
            debouncer.deadline(),
            Some(start + Duration::from_millis(500))
        );
    }

    async fn wait_for<F>(handle: &EngineHandle, pred: F) -> Arc<PageSnapshot>
    where
        F: Fn(&PageSnapshot) -> bool,
    {
        let mut rx = handle.watch_snapshot();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let current = Arc::clone(&rx.borrow_and_update());
                if pred(&current) {
                    return current;
                }
                if rx.changed().await.is_err() {
                    panic!("engine task ended");
                }
            }
        })
        .await
        .expect("timed out waiting for snapshot")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_external_changes_reach_handles() {
        let temp = tempdir().unwrap();
        let root = temp.path().canonicalize().unwrap();
        let (engine, changes) = PageEngineBuilder::new().debounce_ms(50).build();
        let (handle, _task) = EngineService::spawn(engine, changes);

        handle.load(&root).await.unwrap();
        assert!(handle.snapshot().pages.is_empty());
        assert!(handle.snapshot().tree.is_empty());

        let page = root.join("Inbox");
        fs::create_dir(&page).unwrap();
        let snapshot = wait_for(&handle, |s| s.pages.len() == 1).await;
        assert!(snapshot.pages[0].content.is_empty());
        assert!(!snapshot.tree[0].has_children());

        let text = handle.add_text_block(&page).await.unwrap();
        fs::write(page.join("dropped.txt"), "hello").unwrap();
        let snapshot = wait_for(&handle, |s| {
            s.page(&page).is_some_and(|p| p.content.len() == 2)
        })
        .await;
        let content = &snapshot.page(&page).unwrap().content;
        assert_eq!(content[0].id(), text);
        assert_eq!(content[1].filename(), Some("dropped.txt"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_burst_of_writes_is_coalesced() {
        let temp = tempdir().unwrap();
        let root = temp.path().canonicalize().unwrap();
        let page = root.join("Burst");
        fs::create_dir(&page).unwrap();

        let (engine, changes) = PageEngineBuilder::new().debounce_ms(150).build();
        let (handle, _task) = EngineService::spawn(engine, changes);
        handle.load(&root).await.unwrap();
        let mut updates = handle.subscribe();

        for i in 0..20 {
            fs::write(page.join(format!("file-{:02}.txt", i)), "x").unwrap();
        }
        wait_for(&handle, |s| s.page(&page).is_some_and(|p| p.content.len() == 20)).await;
        tokio::time::sleep(Duration::from_millis(600)).await;

        let mut reloads = 0;
        while let Ok(update) = updates.try_recv() {
            if update.reason == UpdateReason::Reloaded {
                reloads += 1;
            }
        }
        assert!(reloads >= 1);
        assert!(reloads < 10, "expected coalesced reloads, got {}", reloads);
    }

    #[tokio::test]
    async fn test_edits_through_handle() {
        let temp = tempdir().unwrap();
        let root = temp.path().canonicalize().unwrap();
        let page = root.join("Notes");
        fs::create_dir(&page).unwrap();

        let (engine, changes) = PageEngineBuilder::new().build();
        let (handle, _task) = EngineService::spawn(engine, changes);
        handle.load(&root).await.unwrap();

        let a = handle.add_text_block(&page).await.unwrap();
        let b = handle.add_text_block(&page).await.unwrap();
        handle.update_text(&page, b, "second").await.unwrap();
        handle.move_item_to_end(&page, a).await.unwrap();

        let current = handle.page(&page).unwrap();
        assert_eq!(current.content.iter().map(|i| i.id()).collect::<Vec<_>>(), vec![b, a]);

        assert!(matches!(
            handle.move_item(&page, ItemId::mint(), a).await,
            Err(PageError::ItemNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_owner_work_runs_on_blocking_pool() {
        let temp = tempdir().unwrap();
        let root = temp.path().canonicalize().unwrap();
        let (engine, _changes) = PageEngineBuilder::new().build();

        let runtime_thread = std::thread::current().id();
        let (engine, (worker_thread, loaded)) = off_runtime(engine, move |engine| {
            (std::thread::current().id(), engine.load(&root))
        })
        .await
        .unwrap();

        assert!(loaded.is_ok());
        assert_ne!(worker_thread, runtime_thread);
        assert_eq!(engine.root(), Some(temp.path().canonicalize().unwrap().as_path()));
    }

    #[tokio::test]
    async fn test_requests_fail_after_owner_stops() {
        let (engine, changes) = PageEngineBuilder::new().build();
        let (handle, task) = EngineService::spawn(engine, changes);
        task.abort();
        let _ = task.await;

        assert!(matches!(handle.reload().await, Err(PageError::EngineClosed)));
    }
}

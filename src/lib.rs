//! Context Pages
//!
//! Organizes files and free-form text into a hierarchy of pages, where every
//! page is one directory on disk. A hidden sidecar file in each directory
//! keeps the user's ordering of the page's items; the directory itself stays
//! the authority on which files exist.
//!
//! ## How state stays live
//!
//! ```text
//! Filesystem Change (any process)
//!        ↓
//! FolderNotifier (one per directory, native or polling)
//!        ↓  ChangeSignal
//! EngineService owner task (debounced, never overlapping)
//!        ↓
//! TreeBuilder: list → SidecarStore::read → reconcile → persist if changed
//!        ↓
//! PageSnapshot swapped atomically, PagesUpdate broadcast
//! ```
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use context_pages::pages::{EngineService, PageEngineBuilder};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (engine, changes) = PageEngineBuilder::new().debounce_ms(200).build();
//!     let (handle, _task) = EngineService::spawn(engine, changes);
//!
//!     handle.load("/path/to/root").await?;
//!     let page = handle.add_page(None).await?;
//!
//!     let mut updates = handle.subscribe();
//!     updates.recv().await?;
//!     let id = handle.add_text_block(&page).await?;
//!     handle.update_text(&page, id, "hello").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Structure
//!
//! - [`pages`]: the reconciliation engine
//!   - [`pages::sidecar`]: sidecar persistence
//!   - [`pages::reconcile`]: directory/sidecar merge
//!   - [`pages::tree`]: hierarchy walk
//!   - [`pages::notifier`]: per-directory watches
//!   - [`pages::engine`] and [`pages::service`]: ownership and orchestration
//! - [`config`]: engine tunables

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

/// Engine tunables.
pub mod config;
/// Pages, sidecars and the reconciliation engine.
pub mod pages;

/// Re-exports for convenience.
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::pages::{
        EngineHandle, EngineService, Item, ItemId, Page, PageEngine, PageEngineBuilder,
        PageError, PageNode, PageSnapshot, PagesUpdate, UpdateReason,
    };
}

/// Log a one-line summary of every published update until the engine shuts down.
///
/// Takes receivers rather than a handle so it does not keep the engine alive.
/// A lagging logger skips ahead to the latest snapshot.
pub async fn run_update_logger(
    mut updates: tokio::sync::broadcast::Receiver<pages::PagesUpdate>,
    snapshots: tokio::sync::watch::Receiver<std::sync::Arc<pages::PageSnapshot>>,
) {
    loop {
        match updates.recv().await {
            Ok(update) => {
                let snapshot = std::sync::Arc::clone(&snapshots.borrow());
                let items: usize = snapshot.pages.iter().map(|p| p.content.len()).sum();
                tracing::info!(
                    "Update #{} ({:?}): {} pages, {} items",
                    update.generation,
                    update.reason,
                    update.page_count,
                    items
                );
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(count)) => {
                tracing::warn!("Update logger lagged behind by {} updates", count);
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                tracing::info!("Update channel closed, stopping logger");
                break;
            }
        }
    }
}

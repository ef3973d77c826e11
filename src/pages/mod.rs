//! Page management module.
//!
//! This module provides:
//! - `model`: pages, items and the page tree
//! - `sidecar`: hidden per-directory metadata file holding item order
//! - `reconcile`: merging sidecar items with the real directory listing
//! - `tree`: depth-first build of the page list and tree under a root
//! - `notifier`: one filesystem watch per directory
//! - `engine`: owner of state, notifiers and every mutation
//! - `service`: owner task with debounced reloads and a cloneable handle

/// Engine state and mutations.
pub mod engine;
/// Error types.
pub mod error;
/// Pages, items and the tree.
pub mod model;
/// Collision-free destination names.
pub mod naming;
/// Per-directory watches.
pub mod notifier;
/// Directory and sidecar merge.
pub mod reconcile;
/// Owner task and handle.
pub mod service;
/// Sidecar persistence.
pub mod sidecar;
/// Hierarchy walk.
pub mod tree;

pub use engine::{
    ChangeReceiver, ChangeSignal, PageEngine, PageEngineBuilder, PagesUpdate, UpdateReason,
};
pub use error::PageError;
pub use model::{FileMetadata, Item, ItemId, Page, PageNode, PageSnapshot};
pub use notifier::{FileChangeKind, FolderNotifier, NotifierError};
pub use service::{EngineHandle, EngineService, ReloadDebouncer};
pub use sidecar::{SidecarStore, DEFAULT_SIDECAR_NAME};
pub use tree::{PageForest, TreeBuilder};

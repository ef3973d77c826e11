//! Errors surfaced by the page engine.

use crate::pages::model::ItemId;
use crate::pages::notifier::NotifierError;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while loading or editing pages.
#[derive(Error, Debug)]
pub enum PageError {
    /// Filesystem operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path the operation was working on.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },

    /// Sidecar could not be serialized.
    #[error("Failed to encode sidecar: {0}")]
    Encode(#[from] serde_json::Error),

    /// A directory watch could not be installed.
    #[error(transparent)]
    Notifier(#[from] NotifierError),

    /// Operation needs a loaded root.
    #[error("No root directory has been loaded")]
    NotLoaded,

    /// No loaded page has this path.
    #[error("No page at {0}")]
    PageNotFound(PathBuf),

    /// The page has no item with this id.
    #[error("No item {0} in page")]
    ItemNotFound(ItemId),

    /// Text edit aimed at a file item.
    #[error("Item {0} is not a text block")]
    NotTextItem(ItemId),

    /// The owner task is gone.
    #[error("Engine service has shut down")]
    EngineClosed,
}

impl PageError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        PageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

//! Reconciliation of a sidecar item list against the real directory listing.
//!
//! The directory decides which files exist; the sidecar decides order and
//! text. Every visible entry, subfolders included, is a file item. Items
//! whose entry has vanished are dropped, text items are kept, and entries
//! that are not yet represented are appended at the end in listing order.

use crate::pages::error::PageError;
use crate::pages::model::Item;
use chrono::Utc;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Immediate entries of one page directory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DirListing {
    /// Names of every visible entry, sorted. Hidden entries and the sidecar are excluded.
    pub entries: Vec<String>,
    /// Visible subdirectories, which are also pages of their own.
    pub subdirs: Vec<PathBuf>,
}

pub(crate) fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// List `dir`, skipping hidden entries and the sidecar itself.
pub fn list_dir(dir: &Path, sidecar_name: &str) -> Result<DirListing, PageError> {
    let mut listing = DirListing::default();

    for entry in fs::read_dir(dir).map_err(|e| PageError::io(dir, e))? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };

        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                tracing::warn!(
                    "Skipping non UTF-8 entry {:?} in {}",
                    raw,
                    dir.display()
                );
                continue;
            }
        };
        if is_hidden(&name) || name == sidecar_name {
            continue;
        }

        // Symlinks are not followed: a linked folder is a plain entry, never a page.
        let is_dir = match entry.file_type() {
            Ok(file_type) => file_type.is_dir(),
            Err(e) => {
                tracing::warn!("Skipping {} in {}: {}", name, dir.display(), e);
                continue;
            }
        };
        if is_dir {
            listing.subdirs.push(entry.path());
        }
        listing.entries.push(name);
    }

    listing.entries.sort();
    Ok(listing)
}

/// Merge `items` against the entries currently in `listing`.
///
/// Idempotent: merging the output again with the same listing changes nothing.
pub fn merge_listing(listing: &DirListing, mut items: Vec<Item>) -> Vec<Item> {
    let on_disk: HashSet<&str> = listing.entries.iter().map(String::as_str).collect();

    // Drop vanished files, and any second item claiming a filename already claimed.
    let mut represented: HashSet<String> = HashSet::new();
    items.retain(|item| match item.filename() {
        Some(name) => on_disk.contains(name) && represented.insert(name.to_owned()),
        None => true,
    });

    let now = Utc::now();
    for name in &listing.entries {
        if !represented.contains(name) {
            tracing::debug!("Merged new file: {}", name);
            items.push(Item::file(name.clone(), now));
        }
    }

    items
}

/// List `dir` and merge `items` against it.
pub fn merge(dir: &Path, sidecar_name: &str, items: Vec<Item>) -> Result<Vec<Item>, PageError> {
    let listing = list_dir(dir, sidecar_name)?;
    Ok(merge_listing(&listing, items))
}

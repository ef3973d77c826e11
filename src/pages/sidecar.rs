//! Sidecar persistence for a page's ordered item list.
//!
//! Each page directory holds one hidden JSON file describing the order of
//! its items. Reads never fail: a missing or unparsable sidecar is treated
//! as "no metadata yet". Writes go through a temporary file in the same
//! directory and an atomic rename, so a failed write leaves the previous
//! sidecar intact.

use crate::pages::error::PageError;
use crate::pages::model::Item;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Default sidecar filename.
pub const DEFAULT_SIDECAR_NAME: &str = ".context_layout.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct SidecarRecord {
    items: Vec<Item>,
}

/// Reads and writes page sidecars.
#[derive(Debug, Clone)]
pub struct SidecarStore {
    file_name: String,
}

impl Default for SidecarStore {
    fn default() -> Self {
        Self::new(DEFAULT_SIDECAR_NAME)
    }
}

impl SidecarStore {
    /// Store using `file_name` as the sidecar name.
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }

    /// Name of the sidecar file inside each page directory.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Full sidecar path for `dir`.
    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(&self.file_name)
    }

    /// Load the item list for `dir`. Missing or corrupt sidecars yield an empty list.
    pub fn read(&self, dir: &Path) -> Vec<Item> {
        let path = self.path_in(dir);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!("Failed to read sidecar {}: {}", path.display(), e);
                return Vec::new();
            }
        };

        match serde_json::from_slice::<SidecarRecord>(&bytes) {
            Ok(record) => record.items,
            Err(e) => {
                tracing::warn!(
                    "Sidecar {} is corrupt, starting from an empty list: {}",
                    path.display(),
                    e
                );
                Vec::new()
            }
        }
    }

    /// Atomically replace the sidecar for `dir` with `items`.
    pub fn write(&self, dir: &Path, items: &[Item]) -> Result<(), PageError> {
        let record = SidecarRecord {
            items: items.to_vec(),
        };
        let mut encoded = serde_json::to_vec_pretty(&record)?;
        encoded.push(b'\n');

        // Temp file is created hidden in the same directory so the rename stays on one filesystem.
        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp-layout")
            .tempfile_in(dir)
            .map_err(|e| PageError::io(dir, e))?;
        write_all(&mut tmp, &encoded).map_err(|e| PageError::io(tmp.path(), e))?;

        let target = self.path_in(dir);
        tmp.persist(&target)
            .map_err(|e| PageError::io(&target, e.error))?;
        tracing::trace!("Wrote {} items to {}", items.len(), target.display());
        Ok(())
    }
}

fn write_all(tmp: &mut NamedTempFile, bytes: &[u8]) -> io::Result<()> {
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()
}

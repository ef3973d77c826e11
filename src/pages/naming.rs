//! Collision-free destination names for copies and new pages.

use std::path::{Path, PathBuf};

/// Pick a path in `dir` for `name` that does not exist yet.
///
/// On collision a counter is inserted before the extension:
/// `x.txt`, `x (1).txt`, `x (2).txt`, ...
pub fn unique_destination(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !exists(&candidate) {
        return candidate;
    }

    let as_path = Path::new(name);
    let stem = as_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_owned());
    let extension = as_path
        .extension()
        .map(|e| e.to_string_lossy().into_owned());

    let mut counter = 1u64;
    loop {
        let numbered = match &extension {
            Some(ext) => format!("{} ({}).{}", stem, counter, ext),
            None => format!("{} ({})", stem, counter),
        };
        let candidate = dir.join(numbered);
        if !exists(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

// Dangling symlinks still occupy the name.
fn exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

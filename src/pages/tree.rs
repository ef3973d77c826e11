//! Builds the page list and page tree for a root directory.
//!
//! The walk uses an explicit stack instead of recursion so deep hierarchies
//! cannot exhaust the call stack. Pages come out depth-first with siblings
//! ordered case-insensitively; the tree is assembled bottom-up afterwards.

use crate::pages::error::PageError;
use crate::pages::model::{compare_names, display_name, Page, PageNode};
use crate::pages::reconcile::{list_dir, merge_listing, DirListing};
use crate::pages::sidecar::SidecarStore;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

/// Result of walking one root.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PageForest {
    /// Pages in depth-first order.
    pub pages: Vec<Page>,
    /// Top-level tree nodes.
    pub tree: Vec<PageNode>,
}

struct Visit {
    path: PathBuf,
    children: Vec<usize>,
}

/// Walks a root, loading and reconciling every page directory below it.
#[derive(Debug, Clone, Default)]
pub struct TreeBuilder {
    store: SidecarStore,
}

impl TreeBuilder {
    /// Builder reading and writing sidecars through `store`.
    pub fn new(store: SidecarStore) -> Self {
        Self { store }
    }

    /// Build pages and tree under `root`.
    ///
    /// Fails only if `root` itself cannot be listed. Any other directory that
    /// cannot be listed is logged and left out together with its subtree.
    pub fn build(&self, root: &Path) -> Result<PageForest, PageError> {
        let root_listing = list_dir(root, self.store.file_name())?;

        let mut visits: Vec<Visit> = Vec::new();
        let mut pages: Vec<Page> = Vec::new();
        let mut top_level: Vec<usize> = Vec::new();

        let mut stack: Vec<(PathBuf, Option<usize>)> = sorted_subdirs(root_listing.subdirs)
            .into_iter()
            .rev()
            .map(|dir| (dir, None))
            .collect();

        while let Some((dir, parent)) = stack.pop() {
            let listing = match list_dir(&dir, self.store.file_name()) {
                Ok(listing) => listing,
                Err(e) => {
                    tracing::warn!("Skipping page {}: {}", dir.display(), e);
                    continue;
                }
            };

            let index = visits.len();
            match parent {
                Some(parent) => visits[parent].children.push(index),
                None => top_level.push(index),
            }

            pages.push(self.load_page(&dir, &listing));
            for child in sorted_subdirs(listing.subdirs).into_iter().rev() {
                stack.push((child, Some(index)));
            }
            visits.push(Visit {
                path: dir,
                children: Vec::new(),
            });
        }

        Ok(PageForest {
            pages,
            tree: assemble_tree(visits, top_level),
        })
    }

    /// Read the sidecar for `dir`, reconcile it and persist the result if it changed.
    pub fn load_page(&self, dir: &Path, listing: &DirListing) -> Page {
        let stored = self.store.read(dir);
        let merged = merge_listing(listing, stored.clone());

        if merged != stored {
            if let Err(e) = self.store.write(dir, &merged) {
                tracing::error!("Failed to save reconciled sidecar for {}: {}", dir.display(), e);
            }
        }

        Page {
            path: dir.to_path_buf(),
            content: merged,
            modified: modified_time(dir),
        }
    }
}

fn sorted_subdirs(mut dirs: Vec<PathBuf>) -> Vec<PathBuf> {
    dirs.sort_by(|a, b| compare_names(&display_name(a), &display_name(b)));
    dirs
}

fn modified_time(dir: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(dir)
        .and_then(|meta| meta.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Children are always visited after their parent, so walking the visits in
/// reverse sees every child finished before the parent needs it.
fn assemble_tree(visits: Vec<Visit>, top_level: Vec<usize>) -> Vec<PageNode> {
    let mut built: Vec<Option<PageNode>> = vec![None; visits.len()];

    for (index, visit) in visits.into_iter().enumerate().rev() {
        let mut children: Vec<PageNode> = visit
            .children
            .iter()
            .filter_map(|child| built[*child].take())
            .collect();
        children.sort_by(|a, b| compare_names(&a.name(), &b.name()));
        built[index] = Some(PageNode::with_children(visit.path, children));
    }

    let mut roots: Vec<PageNode> = top_level
        .into_iter()
        .filter_map(|index| built[index].take())
        .collect();
    roots.sort_by(|a, b| compare_names(&a.name(), &b.name()));
    roots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pages::model::Item;
    use tempfile::tempdir;

    fn names(nodes: &[PageNode]) -> Vec<String> {
        nodes.iter().map(PageNode::name).collect()
    }

    #[test]
    fn test_empty_root_builds_nothing() {
        let temp = tempdir().unwrap();
        let forest = TreeBuilder::default().build(temp.path()).unwrap();
        assert!(forest.pages.is_empty());
        assert!(forest.tree.is_empty());
    }

    #[test]
    fn test_missing_root_is_error() {
        let temp = tempdir().unwrap();
        assert!(TreeBuilder::default()
            .build(&temp.path().join("missing"))
            .is_err());
    }

    #[test]
    fn test_nested_tree_sorted_case_insensitively() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        for dir in ["beta", "Alpha", "Alpha/zeta", "Alpha/Eta", "Alpha/Eta/deep", "gamma"] {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
        fs::write(root.join("loose.txt"), "not a page").unwrap();

        let forest = TreeBuilder::default().build(root).unwrap();

        assert_eq!(names(&forest.tree), vec!["Alpha", "beta", "gamma"]);
        let alpha = &forest.tree[0];
        assert_eq!(names(alpha.children()), vec!["Eta", "zeta"]);
        assert_eq!(names(alpha.children()[0].children()), vec!["deep"]);
        assert!(!alpha.children()[1].has_children());
        assert!(!forest.tree[1].has_children());

        let page_names: Vec<_> = forest.pages.iter().map(Page::name).collect();
        assert_eq!(page_names, vec!["Alpha", "Eta", "deep", "zeta", "beta", "gamma"]);
    }

    #[test]
    fn test_pages_are_reconciled_and_persisted() {
        let temp = tempdir().unwrap();
        let page_dir = temp.path().join("Notes");
        fs::create_dir(&page_dir).unwrap();
        fs::write(page_dir.join("todo.md"), "- [ ] ship").unwrap();

        let store = SidecarStore::default();
        let forest = TreeBuilder::new(store.clone()).build(temp.path()).unwrap();

        assert_eq!(forest.pages.len(), 1);
        assert_eq!(forest.pages[0].content[0].filename(), Some("todo.md"));
        assert_eq!(store.read(&page_dir), forest.pages[0].content);
    }

    #[test]
    fn test_unchanged_page_does_not_rewrite_sidecar() {
        let temp = tempdir().unwrap();
        let page_dir = temp.path().join("Notes");
        fs::create_dir(&page_dir).unwrap();
        let store = SidecarStore::default();
        store.write(&page_dir, &[Item::text("hello")]).unwrap();
        let before = fs::metadata(store.path_in(&page_dir)).unwrap().modified().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        TreeBuilder::new(store.clone()).build(temp.path()).unwrap();

        let after = fs::metadata(store.path_in(&page_dir)).unwrap().modified().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_deep_hierarchy_does_not_recurse() {
        let temp = tempdir().unwrap();
        let mut dir = temp.path().to_path_buf();
        for depth in 0..200 {
            dir = dir.join(format!("d{}", depth));
        }
        fs::create_dir_all(&dir).unwrap();

        let forest = TreeBuilder::default().build(temp.path()).unwrap();
        assert_eq!(forest.pages.len(), 200);
        assert_eq!(forest.tree.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_subtree_skipped_siblings_kept() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempdir().unwrap();
        let locked = temp.path().join("locked");
        fs::create_dir_all(locked.join("inner")).unwrap();
        fs::create_dir(temp.path().join("open")).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let readable = fs::read_dir(&locked).is_ok();
        let forest = TreeBuilder::default().build(temp.path()).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        if readable {
            // Running with privileges that bypass permission bits.
            return;
        }
        assert_eq!(names(&forest.tree), vec!["open"]);
        assert_eq!(forest.pages.len(), 1);
    }

    #[test]
    fn test_subfolder_is_item_and_page() {
        let temp = tempdir().unwrap();
        let parent = temp.path().join("p");
        fs::create_dir_all(parent.join("sub")).unwrap();

        let forest = TreeBuilder::default().build(temp.path()).unwrap();

        assert_eq!(forest.pages.len(), 2);
        assert_eq!(forest.pages[0].content.len(), 1);
        assert_eq!(forest.pages[0].content[0].filename(), Some("sub"));
        assert_eq!(names(forest.tree[0].children()), vec!["sub"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_loops_are_not_walked() {
        let temp = tempdir().unwrap();
        let page = temp.path().join("a");
        fs::create_dir(&page).unwrap();
        std::os::unix::fs::symlink(&page, page.join("l1")).unwrap();
        std::os::unix::fs::symlink(&page, page.join("l2")).unwrap();

        let forest = TreeBuilder::default().build(temp.path()).unwrap();

        assert_eq!(forest.pages.len(), 1);
        assert!(!forest.tree[0].has_children());
        let items: Vec<_> = forest.pages[0].content.iter().filter_map(Item::filename).collect();
        assert_eq!(items, vec!["l1", "l2"]);
    }
}

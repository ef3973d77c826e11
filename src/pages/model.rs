//! Data model for pages, their ordered items and the directory tree.
//!
//! A [`Page`] is one directory on disk. Its `content` is the user-ordered
//! list of [`Item`]s persisted in the sidecar; [`PageNode`] is the tree
//! projection of the same directories used for hierarchy display.

use crate::pages::error::PageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Body given to text blocks created through [`Page::push_text`].
pub const NEW_TEXT_BLOCK: &str = "New Text Block";

/// Stable identity of an item. Minted once and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    /// Mint a fresh, globally unique id.
    pub fn mint() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Per-file metadata kept in the sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// When the file was first merged into the page.
    pub created_at: DateTime<Utc>,
}

/// One element of a page's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Item {
    /// Free-form text that lives only in the sidecar.
    Text {
        /// Stable identity.
        id: ItemId,
        /// Text content.
        body: String,
    },
    /// Reference to a sibling entry inside the page directory.
    File {
        /// Stable identity.
        id: ItemId,
        /// Entry name relative to the page directory.
        filename: String,
        /// Bookkeeping kept alongside the reference.
        metadata: FileMetadata,
    },
}

impl Item {
    /// New text item with a fresh id.
    pub fn text(body: impl Into<String>) -> Self {
        Item::Text {
            id: ItemId::mint(),
            body: body.into(),
        }
    }

    /// New file item with a fresh id.
    pub fn file(filename: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Item::File {
            id: ItemId::mint(),
            filename: filename.into(),
            metadata: FileMetadata { created_at },
        }
    }

    /// Stable identity of this item.
    pub fn id(&self) -> ItemId {
        match self {
            Item::Text { id, .. } | Item::File { id, .. } => *id,
        }
    }

    /// The referenced filename, for file items.
    pub fn filename(&self) -> Option<&str> {
        match self {
            Item::File { filename, .. } => Some(filename.as_str()),
            Item::Text { .. } => None,
        }
    }

    /// Whether this is a text block.
    pub fn is_text(&self) -> bool {
        matches!(self, Item::Text { .. })
    }
}

/// One directory and its ordered content.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Absolute directory path. Pages are keyed by path.
    pub path: PathBuf,
    /// Items in user order.
    pub content: Vec<Item>,
    /// Directory modification time captured when the page was loaded.
    pub modified: Option<DateTime<Utc>>,
}

impl Page {
    /// Page with no recorded modification time.
    pub fn new(path: PathBuf, content: Vec<Item>) -> Self {
        Self {
            path,
            content,
            modified: None,
        }
    }

    /// Last path component, used as the display name.
    pub fn name(&self) -> String {
        display_name(&self.path)
    }

    /// Location of this page relative to `root`, e.g. `Root > Projects > Notes`.
    pub fn breadcrumb(&self, root: &Path) -> String {
        let root_name = display_name(root);
        match self.path.strip_prefix(root) {
            Ok(relative) => std::iter::once(root_name)
                .chain(
                    relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned()),
                )
                .collect::<Vec<_>>()
                .join(" > "),
            Err(_) => self.name(),
        }
    }

    /// Find an item by id.
    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.content.iter().find(|item| item.id() == id)
    }

    fn position(&self, id: ItemId) -> Result<usize, PageError> {
        self.content
            .iter()
            .position(|item| item.id() == id)
            .ok_or(PageError::ItemNotFound(id))
    }

    /// Replace the body of a text item.
    pub fn set_text(&mut self, id: ItemId, text: impl Into<String>) -> Result<(), PageError> {
        let index = self.position(id)?;
        match &mut self.content[index] {
            Item::Text { body, .. } => {
                *body = text.into();
                Ok(())
            }
            Item::File { .. } => Err(PageError::NotTextItem(id)),
        }
    }

    /// Append a new text block and return its id.
    pub fn push_text(&mut self, body: impl Into<String>) -> ItemId {
        let item = Item::text(body);
        let id = item.id();
        self.content.push(item);
        id
    }

    /// Remove an item and return it.
    pub fn remove_item(&mut self, id: ItemId) -> Result<Item, PageError> {
        let index = self.position(id)?;
        Ok(self.content.remove(index))
    }

    /// Move `from` so it sits immediately before `to`'s current position.
    pub fn move_item(&mut self, from: ItemId, to: ItemId) -> Result<(), PageError> {
        let from_index = self.position(from)?;
        let to_index = self.position(to)?;
        if from_index == to_index {
            return Ok(());
        }

        let moved = self.content.remove(from_index);
        // Removal shifts everything after `from_index` down by one.
        let target = if from_index < to_index {
            to_index - 1
        } else {
            to_index
        };
        self.content.insert(target, moved);
        Ok(())
    }

    /// Move `from` to the end of the list.
    pub fn move_item_to_end(&mut self, from: ItemId) -> Result<(), PageError> {
        let index = self.position(from)?;
        let moved = self.content.remove(index);
        self.content.push(moved);
        Ok(())
    }
}

/// Tree projection of a page directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageNode {
    /// Absolute directory path.
    pub path: PathBuf,
    /// `None` for leaves; never `Some` of an empty list.
    pub children: Option<Vec<PageNode>>,
}

impl PageNode {
    /// Node without children.
    pub fn leaf(path: PathBuf) -> Self {
        Self {
            path,
            children: None,
        }
    }

    /// Node with `children`; an empty list makes a leaf.
    pub fn with_children(path: PathBuf, children: Vec<PageNode>) -> Self {
        Self {
            path,
            children: if children.is_empty() {
                None
            } else {
                Some(children)
            },
        }
    }

    /// Last path component.
    pub fn name(&self) -> String {
        display_name(&self.path)
    }

    /// Whether the node has any children.
    pub fn has_children(&self) -> bool {
        self.children.is_some()
    }

    /// Children, empty for leaves.
    pub fn children(&self) -> &[PageNode] {
        self.children.as_deref().unwrap_or(&[])
    }
}

/// The published, read-only view of everything loaded under a root.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageSnapshot {
    /// Root the pages were loaded from.
    pub root: Option<PathBuf>,
    /// Depth-first preorder, siblings ordered case-insensitively.
    pub pages: Vec<Page>,
    /// Top-level tree nodes.
    pub tree: Vec<PageNode>,
    /// Incremented on every publish.
    pub generation: u64,
}

impl PageSnapshot {
    /// Look up a page by directory path.
    pub fn page(&self, path: &Path) -> Option<&Page> {
        self.pages.iter().find(|page| page.path == path)
    }

    /// Find the tree node for `path` at any depth.
    pub fn find_node(&self, path: &Path) -> Option<&PageNode> {
        let mut stack: Vec<&PageNode> = self.tree.iter().collect();
        while let Some(node) = stack.pop() {
            if node.path == path {
                return Some(node);
            }
            stack.extend(node.children());
        }
        None
    }
}

/// Case-insensitive name ordering with a byte-wise tie break so the order is total.
pub(crate) fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_with(labels: &[&str]) -> (Page, Vec<ItemId>) {
        let mut page = Page::new(PathBuf::from("/root/page"), Vec::new());
        let ids = labels.iter().map(|label| page.push_text(*label)).collect();
        (page, ids)
    }

    fn bodies(page: &Page) -> Vec<String> {
        page.content
            .iter()
            .map(|item| match item {
                Item::Text { body, .. } => body.clone(),
                Item::File { filename, .. } => filename.clone(),
            })
            .collect()
    }

    #[test]
    fn test_move_forward_lands_before_destination() {
        let (mut page, ids) = page_with(&["A", "B", "C", "D"]);
        page.move_item(ids[0], ids[2]).unwrap();
        assert_eq!(bodies(&page), vec!["B", "A", "C", "D"]);
    }

    #[test]
    fn test_move_backward_lands_before_destination() {
        let (mut page, ids) = page_with(&["A", "B", "C", "D"]);
        page.move_item(ids[3], ids[0]).unwrap();
        assert_eq!(bodies(&page), vec!["D", "A", "B", "C"]);
    }

    #[test]
    fn test_move_onto_itself_is_noop() {
        let (mut page, ids) = page_with(&["A", "B"]);
        page.move_item(ids[1], ids[1]).unwrap();
        assert_eq!(bodies(&page), vec!["A", "B"]);
    }

    #[test]
    fn test_move_to_end() {
        let (mut page, ids) = page_with(&["A", "B", "C"]);
        page.move_item_to_end(ids[1]).unwrap();
        assert_eq!(bodies(&page), vec!["A", "C", "B"]);
    }

    #[test]
    fn test_move_unknown_item_leaves_list_alone() {
        let (mut page, ids) = page_with(&["A", "B"]);
        let err = page.move_item(ItemId::mint(), ids[0]).unwrap_err();
        assert!(matches!(err, PageError::ItemNotFound(_)));
        assert_eq!(bodies(&page), vec!["A", "B"]);
    }

    #[test]
    fn test_set_text_rejects_file_items() {
        let mut page = Page::new(PathBuf::from("/root/page"), vec![Item::file("a.png", Utc::now())]);
        let id = page.content[0].id();
        assert!(matches!(
            page.set_text(id, "nope"),
            Err(PageError::NotTextItem(_))
        ));
    }

    #[test]
    fn test_set_text_updates_body() {
        let (mut page, ids) = page_with(&["A"]);
        page.set_text(ids[0], "edited").unwrap();
        assert_eq!(bodies(&page), vec!["edited"]);
        assert_eq!(page.content[0].id(), ids[0]);
    }

    #[test]
    fn test_breadcrumb() {
        let page = Page::new(PathBuf::from("/data/Root/Projects/Notes"), Vec::new());
        assert_eq!(
            page.breadcrumb(Path::new("/data/Root")),
            "Root > Projects > Notes"
        );
        assert_eq!(page.breadcrumb(Path::new("/elsewhere")), "Notes");
    }

    #[test]
    fn test_node_without_children_is_leaf() {
        let node = PageNode::with_children(PathBuf::from("/r/a"), Vec::new());
        assert!(!node.has_children());
        assert!(node.children().is_empty());
    }

    #[test]
    fn test_find_node_searches_nested_levels() {
        let deep = PageNode::leaf(PathBuf::from("/r/a/b"));
        let snapshot = PageSnapshot {
            tree: vec![PageNode::with_children(PathBuf::from("/r/a"), vec![deep.clone()])],
            ..Default::default()
        };
        assert_eq!(snapshot.find_node(Path::new("/r/a/b")), Some(&deep));
        assert!(snapshot.find_node(Path::new("/r/c")).is_none());
    }

    #[test]
    fn test_compare_names_ignores_case() {
        let mut names = vec!["beta", "Alpha", "alpha", "Gamma"];
        names.sort_by(|a, b| compare_names(a, b));
        assert_eq!(names, vec!["Alpha", "alpha", "beta", "Gamma"]);
    }
}

//! In-memory mirror of a directory subtree.
//!
//! Directories are materialized lazily: a collapsed directory carries a
//! single placeholder child until it is expanded, at which point it is
//! listed once and armed for watching through a [`Registrar`].
//!
//! Nodes own their children exclusively and never point back at their
//! parent. Parent association is always a lookup by path from the root.

mod listing;

pub use listing::{ListedEntry, list_dir, sort_entries};

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{ListingError, WatchArmError};

/// Label shown for the synthetic child of a collapsed directory.
pub const PLACEHOLDER_LABEL: &str = "...";

/// Expansion state of a directory node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpansionState {
    /// Not listed. Holds exactly one placeholder child.
    Collapsed,
    /// Listing in progress. Still holds only the placeholder.
    Placeholder,
    /// Listed. Children mirror the directory as of the last sync.
    Expanded,
}

/// Payload of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory {
        state: ExpansionState,
        children: Vec<TreeNode>,
    },
    /// Stand-in child of a directory that has not been listed.
    Placeholder,
}

/// One filesystem entry in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    label: String,
    path: PathBuf,
    kind: NodeKind,
}

impl TreeNode {
    /// A terminal file node.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            label: label_for(&path),
            path,
            kind: NodeKind::File,
        }
    }

    /// A collapsed directory node holding its placeholder.
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            label: label_for(&path),
            kind: NodeKind::Directory {
                state: ExpansionState::Collapsed,
                children: vec![Self::placeholder(&path)],
            },
            path,
        }
    }

    fn placeholder(parent: &Path) -> Self {
        Self {
            label: PLACEHOLDER_LABEL.to_string(),
            path: parent.to_path_buf(),
            kind: NodeKind::Placeholder,
        }
    }

    fn from_entry(entry: ListedEntry) -> Self {
        let mut node = if entry.is_dir {
            Self::directory(entry.path)
        } else {
            Self::file(entry.path)
        };
        node.label = entry.name;
        node
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub const fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    pub const fn is_placeholder(&self) -> bool {
        matches!(self.kind, NodeKind::Placeholder)
    }

    /// Expansion state, or `None` for files and placeholders.
    pub const fn expansion_state(&self) -> Option<ExpansionState> {
        match &self.kind {
            NodeKind::Directory { state, .. } => Some(*state),
            _ => None,
        }
    }

    /// Children in tree order. Empty for files and placeholders.
    pub fn children(&self) -> &[TreeNode] {
        match &self.kind {
            NodeKind::Directory { children, .. } => children,
            _ => &[],
        }
    }

    /// Non-placeholder child with the given path.
    pub fn child(&self, path: &Path) -> Option<&TreeNode> {
        self.children()
            .iter()
            .find(|c| !c.is_placeholder() && c.path == path)
    }

    fn children_mut(&mut self) -> Option<&mut Vec<TreeNode>> {
        match &mut self.kind {
            NodeKind::Directory { children, .. } => Some(children),
            _ => None,
        }
    }

    fn set_state(&mut self, new_state: ExpansionState) {
        if let NodeKind::Directory { state, .. } = &mut self.kind {
            *state = new_state;
        }
    }

    fn reset_to_collapsed(&mut self) {
        let placeholder = Self::placeholder(&self.path);
        if let NodeKind::Directory { state, children } = &mut self.kind {
            *state = ExpansionState::Collapsed;
            children.clear();
            children.push(placeholder);
        }
    }

    /// Paths of this node and every descendant that is currently expanded,
    /// i.e. every directory that holds a watch registration.
    fn expanded_paths(&self, out: &mut Vec<PathBuf>) {
        if self.expansion_state() == Some(ExpansionState::Expanded) {
            out.push(self.path.clone());
            for child in self.children() {
                child.expanded_paths(out);
            }
        }
    }

    /// A detached, serialisable copy of this subtree.
    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            label: self.label.clone(),
            path: self.path.clone(),
            kind: match self.kind {
                NodeKind::File => "file",
                NodeKind::Directory { .. } => "directory",
                NodeKind::Placeholder => "placeholder",
            },
            state: self.expansion_state(),
            children: self.children().iter().map(Self::snapshot).collect(),
        }
    }
}

fn label_for(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |name| name.to_string_lossy().to_string(),
    )
}

/// Serialisable view of a node, used for JSON output and comparisons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSnapshot {
    pub label: String,
    pub path: PathBuf,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ExpansionState>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeSnapshot>,
}

impl NodeSnapshot {
    /// Recursively sort children by path so snapshots taken from listings in
    /// different orders compare equal.
    pub fn normalized(mut self) -> Self {
        self.children = self
            .children
            .into_iter()
            .map(Self::normalized)
            .collect();
        self.children.sort_by(|a, b| a.path.cmp(&b.path));
        self
    }

    /// Indented text rendering, one node per line.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        self.write_text(0, &mut out);
        out
    }

    fn write_text(&self, depth: usize, out: &mut String) {
        out.push_str(&"  ".repeat(depth));
        out.push_str(&self.label);
        if self.kind == "directory" {
            out.push('/');
        }
        out.push('\n');
        for child in &self.children {
            child.write_text(depth + 1, out);
        }
    }
}

/// Arms and cancels directory watches on behalf of the tree.
pub trait Registrar {
    /// Start watching `path` for entry creation and deletion.
    ///
    /// # Errors
    ///
    /// Returns [`WatchArmError`] if the OS refuses the watch.
    fn register(&mut self, path: &Path) -> Result<(), WatchArmError>;

    /// Stop watching `path`. Unknown paths are ignored.
    fn deregister(&mut self, path: &Path);
}

/// Result of a successful [`ProjectTree::expand`].
#[derive(Debug, Default)]
pub struct Expansion {
    /// Number of children now present.
    pub entries: usize,
    /// The directory was already expanded; nothing changed.
    pub already_expanded: bool,
    /// The listing succeeded but live updates are unavailable for it.
    pub watch_error: Option<WatchArmError>,
}

/// The directory mirror rooted at one project directory.
#[derive(Debug, Clone)]
pub struct ProjectTree {
    root: TreeNode,
    sort: bool,
}

impl ProjectTree {
    /// Create a tree whose root is a collapsed node for `root`.
    ///
    /// The root path is canonicalized so it matches the absolute paths
    /// reported by the OS watch service.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        Self {
            root: TreeNode::directory(root),
            sort: false,
        }
    }

    /// Sort listed children (directories first, then by name).
    #[must_use]
    pub const fn with_sorting(mut self, sort: bool) -> Self {
        self.sort = sort;
        self
    }

    pub const fn root(&self) -> &TreeNode {
        &self.root
    }

    pub fn root_path(&self) -> &Path {
        &self.root.path
    }

    /// Look up a node by absolute path.
    pub fn find(&self, path: &Path) -> Option<&TreeNode> {
        let relative = path.strip_prefix(&self.root.path).ok()?;
        let mut node = &self.root;
        let mut current = self.root.path.clone();
        for component in relative.components() {
            current.push(component);
            node = node.child(&current)?;
        }
        Some(node)
    }

    fn find_mut(&mut self, path: &Path) -> Option<&mut TreeNode> {
        let relative = path.strip_prefix(&self.root.path).ok()?.to_path_buf();
        let mut current = self.root.path.clone();
        let mut node = &mut self.root;
        for component in relative.components() {
            current.push(component);
            node = node
                .children_mut()?
                .iter_mut()
                .find(|c| !c.is_placeholder() && c.path == current)?;
        }
        Some(node)
    }

    /// Materialize the children of the directory at `path`.
    ///
    /// The watch is armed before listing, so an entry created while the
    /// listing runs is reported at least once; [`Self::insert_child`]
    /// deduplicates it. Expanding an already expanded directory is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ListingError`] if the path is not a directory node or the
    /// listing fails. On listing failure the node is left collapsed with its
    /// placeholder and its watch is cancelled.
    pub fn expand(
        &mut self,
        path: &Path,
        registrar: &mut impl Registrar,
    ) -> Result<Expansion, ListingError> {
        let sort = self.sort;
        let node = self
            .find_mut(path)
            .ok_or_else(|| ListingError::UnknownPath {
                path: path.to_path_buf(),
            })?;
        match node.expansion_state() {
            None => {
                return Err(ListingError::NotADirectory {
                    path: path.to_path_buf(),
                });
            }
            Some(ExpansionState::Expanded) => {
                return Ok(Expansion {
                    entries: node.children().len(),
                    already_expanded: true,
                    watch_error: None,
                });
            }
            Some(_) => {}
        }

        node.set_state(ExpansionState::Placeholder);
        let watch_error = registrar.register(&node.path).err();

        let entries = match list_dir(&node.path, sort) {
            Ok(entries) => entries,
            Err(err) => {
                if watch_error.is_none() {
                    registrar.deregister(&node.path);
                }
                node.reset_to_collapsed();
                return Err(err);
            }
        };

        let count = entries.len();
        if let Some(children) = node.children_mut() {
            children.clear();
            children.extend(entries.into_iter().map(TreeNode::from_entry));
        }
        node.set_state(ExpansionState::Expanded);
        debug!(path = %node.path.display(), entries = count, "expanded");

        Ok(Expansion {
            entries: count,
            already_expanded: false,
            watch_error,
        })
    }

    /// Drop the children of the directory at `path` and restore its
    /// placeholder. Watches on it and on every expanded descendant are
    /// cancelled. Returns whether anything changed.
    pub fn collapse(&mut self, path: &Path, registrar: &mut impl Registrar) -> bool {
        let Some(node) = self.find_mut(path) else {
            return false;
        };
        if node.expansion_state() != Some(ExpansionState::Expanded) {
            return false;
        }
        let mut watched = Vec::new();
        node.expanded_paths(&mut watched);
        for dir in &watched {
            registrar.deregister(dir);
        }
        node.reset_to_collapsed();
        debug!(path = %path.display(), released = watched.len(), "collapsed");
        true
    }

    /// Append a node for `path` to the expanded directory `parent`.
    ///
    /// Returns `false` without changing anything if the parent is not an
    /// expanded directory in the tree or already has a child at `path`.
    pub fn insert_child(&mut self, parent: &Path, path: &Path, is_dir: bool) -> bool {
        let Some(node) = self.find_mut(parent) else {
            return false;
        };
        if node.expansion_state() != Some(ExpansionState::Expanded) || node.child(path).is_some() {
            return false;
        }
        let child = if is_dir {
            TreeNode::directory(path)
        } else {
            TreeNode::file(path)
        };
        if let Some(children) = node.children_mut() {
            children.push(child);
        }
        info!(path = %path.display(), "entry created");
        true
    }

    /// Remove the child at `path` from the expanded directory `parent`,
    /// cancelling any watches held by the removed subtree.
    ///
    /// Returns `false` if there was no such child.
    pub fn remove_child(
        &mut self,
        parent: &Path,
        path: &Path,
        registrar: &mut impl Registrar,
    ) -> bool {
        let Some(node) = self.find_mut(parent) else {
            return false;
        };
        if node.expansion_state() != Some(ExpansionState::Expanded) {
            return false;
        }
        let Some(children) = node.children_mut() else {
            return false;
        };
        let Some(index) = children
            .iter()
            .position(|c| !c.is_placeholder() && c.path == path)
        else {
            return false;
        };
        let removed = children.remove(index);
        let mut watched = Vec::new();
        removed.expanded_paths(&mut watched);
        for dir in &watched {
            registrar.deregister(dir);
        }
        info!(path = %path.display(), released = watched.len(), "entry removed");
        true
    }
}

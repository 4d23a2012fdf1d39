//! Browser session: the project tree plus the machinery keeping it live.
//!
//! All tree mutation happens on the thread that owns the session. The
//! watch loop only produces [`TreeUpdate`]s; [`ProjectBrowser::sync`]
//! drains and applies them, so no reader ever sees a half-built child
//! list.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{ListingError, WatchArmError, WatchLoopFatal};
use crate::tree::{Expansion, ProjectTree, Registrar, TreeNode};
use crate::watcher::{TreeUpdate, WatchBackend, WatchLoop, WatchPolicy, WatchRegistry};

/// How a browser session watches its tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrowserOptions {
    pub backend: WatchBackend,
    pub policy: WatchPolicy,
    pub sort_entries: bool,
}

/// One tree change applied by [`ProjectBrowser::sync`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppliedChange {
    Added { path: PathBuf, is_dir: bool },
    Removed { path: PathBuf },
    /// A new directory was added but could not be watched; its subtree will
    /// not update live.
    NotWatched { path: PathBuf, reason: String },
    /// Live synchronization ended; the tree is a stale snapshot from now on.
    WentStale { reason: String },
}

/// Live-sync state of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Live,
    Stale(WatchLoopFatal),
}

/// Registrar used once live synchronization is gone: expansion still lists
/// directories but arms nothing.
struct Unwatched;

impl Registrar for Unwatched {
    fn register(&mut self, _path: &Path) -> Result<(), WatchArmError> {
        Ok(())
    }

    fn deregister(&mut self, _path: &Path) {}
}

struct LiveWatch {
    registry: WatchRegistry,
    worker: WatchLoop,
}

/// A project tree kept in step with the filesystem.
pub struct ProjectBrowser {
    // Dropped before the registry, so the worker finds nobody listening.
    updates: Receiver<TreeUpdate>,
    tree: ProjectTree,
    live: Option<LiveWatch>,
    state: SyncState,
    policy: WatchPolicy,
}

impl std::fmt::Debug for ProjectBrowser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectBrowser")
            .field("root", &self.tree.root_path())
            .field("state", &self.state)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ProjectBrowser {
    /// Open a session on `root`. The root starts collapsed.
    ///
    /// Failure to start the watch service is not an error: the session
    /// starts stale and behaves as a plain directory browser.
    pub fn open(root: impl AsRef<Path>, options: BrowserOptions) -> Self {
        let tree = ProjectTree::new(root).with_sorting(options.sort_entries);
        let (tx, updates) = mpsc::channel();

        let (live, state) = match WatchRegistry::new(options.backend) {
            Ok((registry, events)) => match WatchLoop::spawn(events, registry.index(), tx) {
                Ok(worker) => (Some(LiveWatch { registry, worker }), SyncState::Live),
                Err(err) => Self::stale_from_start(err.to_string()),
            },
            Err(err) => Self::stale_from_start(err.to_string()),
        };

        info!(root = %tree.root_path().display(), live = live.is_some(), "browser opened");
        Self {
            updates,
            tree,
            live,
            state,
            policy: options.policy,
        }
    }

    fn stale_from_start(reason: String) -> (Option<LiveWatch>, SyncState) {
        warn!(%reason, "watch service unavailable; tree will not update live");
        (None, SyncState::Stale(WatchLoopFatal { reason }))
    }

    pub const fn tree(&self) -> &ProjectTree {
        &self.tree
    }

    pub fn root(&self) -> &TreeNode {
        self.tree.root()
    }

    pub fn root_path(&self) -> &Path {
        self.tree.root_path()
    }

    pub const fn state(&self) -> &SyncState {
        &self.state
    }

    pub const fn is_live(&self) -> bool {
        matches!(self.state, SyncState::Live)
    }

    /// Whether a watch is currently armed on `path`.
    pub fn is_watched(&self, path: &Path) -> bool {
        self.live
            .as_ref()
            .is_some_and(|live| live.registry.is_registered(path))
    }

    /// Watched directories, sorted.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.live
            .as_ref()
            .map(|live| live.registry.index().paths())
            .unwrap_or_default()
    }

    /// Expand the directory at `path`, arming a watch on it while live.
    ///
    /// # Errors
    ///
    /// Returns [`ListingError`] if the directory cannot be listed; the node
    /// stays collapsed.
    pub fn expand(&mut self, path: &Path) -> Result<Expansion, ListingError> {
        let result = match self.live.as_mut() {
            Some(live) => self.tree.expand(path, &mut live.registry),
            None => self.tree.expand(path, &mut Unwatched),
        };
        match &result {
            Ok(Expansion {
                watch_error: Some(err),
                ..
            }) => warn!(%err, "expanded without live updates"),
            Err(err) => warn!(%err, "expansion failed"),
            Ok(_) => {}
        }
        result
    }

    pub fn expand_root(&mut self) -> Result<Expansion, ListingError> {
        let root = self.tree.root_path().to_path_buf();
        self.expand(&root)
    }

    /// Collapse the directory at `path` and release its watches.
    pub fn collapse(&mut self, path: &Path) -> bool {
        match self.live.as_mut() {
            Some(live) => self.tree.collapse(path, &mut live.registry),
            None => self.tree.collapse(path, &mut Unwatched),
        }
    }

    /// Apply every update the watch loop has produced so far.
    pub fn sync(&mut self) -> Vec<AppliedChange> {
        let mut applied = Vec::new();
        while let Ok(update) = self.updates.try_recv() {
            self.apply(update, &mut applied);
        }
        applied
    }

    /// Block up to `timeout` for the first update, then apply everything
    /// queued.
    pub fn wait_for_changes(&mut self, timeout: Duration) -> Vec<AppliedChange> {
        let mut applied = Vec::new();
        if let Ok(update) = self.updates.recv_timeout(timeout) {
            self.apply(update, &mut applied);
            applied.extend(self.sync());
        }
        applied
    }

    fn apply(&mut self, update: TreeUpdate, applied: &mut Vec<AppliedChange>) {
        match update {
            TreeUpdate::Created {
                parent,
                path,
                is_dir,
            } => {
                if !self.tree.insert_child(&parent, &path, is_dir) {
                    debug!(path = %path.display(), "create ignored");
                    return;
                }
                applied.push(AppliedChange::Added {
                    path: path.clone(),
                    is_dir,
                });
                if is_dir && self.policy == WatchPolicy::Eager {
                    let reason = match self.expand(&path) {
                        Ok(Expansion {
                            watch_error: Some(err),
                            ..
                        }) => Some(err.to_string()),
                        Ok(_) => None,
                        Err(err) => Some(err.to_string()),
                    };
                    if let Some(reason) = reason {
                        applied.push(AppliedChange::NotWatched { path, reason });
                    }
                }
            }
            TreeUpdate::Removed { parent, path } => {
                let removed = match self.live.as_mut() {
                    Some(live) => self.tree.remove_child(&parent, &path, &mut live.registry),
                    None => self.tree.remove_child(&parent, &path, &mut Unwatched),
                };
                if removed {
                    applied.push(AppliedChange::Removed { path });
                } else {
                    debug!(path = %path.display(), "delete ignored");
                }
            }
            TreeUpdate::WatchLost(fatal) => {
                if self.is_live() {
                    applied.push(AppliedChange::WentStale {
                        reason: fatal.reason.clone(),
                    });
                    self.go_stale(fatal);
                }
            }
        }
    }

    fn go_stale(&mut self, fatal: WatchLoopFatal) {
        if let Some(mut live) = self.live.take() {
            live.registry.clear();
            if !live.worker.is_finished() {
                debug!("watch loop still draining; detaching");
            }
        }
        self.state = SyncState::Stale(fatal);
    }
}

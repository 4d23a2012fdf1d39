//! Directory watching for live tree synchronization.
//!
//! Uses the notify crate for cross-platform file system events. A single
//! OS watch handle is owned by the [`WatchRegistry`]; every expanded
//! directory is armed on it non-recursively. Raw events flow through a
//! channel to the [`WatchLoop`] worker, which translates them into
//! [`TreeUpdate`]s for the presentation side.

mod event_loop;

pub use event_loop::{TreeUpdate, WatchLoop, translate};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use notify::{Config, Event, PollWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{WatchArmError, WatchSetupError};
use crate::tree::Registrar;

/// Which notify backend arms the watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatchBackend {
    /// The platform's native mechanism (inotify, FSEvents, ...).
    #[default]
    Native,
    /// Periodic rescans, for filesystems without native events.
    Poll(Duration),
}

/// Whether directories reported as created are watched right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatchPolicy {
    /// New directories are watched only once the user expands them.
    #[default]
    Lazy,
    /// New directories are expanded, and therefore watched, on creation.
    Eager,
}

/// Binding between a watched directory and the tree node mirroring it.
///
/// The node itself is resolved by path through the tree, so the
/// registration holds no reference into the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRegistration {
    pub path: PathBuf,
    pub armed_at: Instant,
}

/// Read-only view of the registrations, shared with the watch loop.
#[derive(Debug, Clone, Default)]
pub struct RegistrationIndex {
    inner: Arc<RwLock<HashMap<PathBuf, WatchRegistration>>>,
}

impl RegistrationIndex {
    pub fn contains(&self, path: &Path) -> bool {
        self.inner.read().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub(crate) fn insert(&self, path: &Path) {
        self.inner.write().insert(
            path.to_path_buf(),
            WatchRegistration {
                path: path.to_path_buf(),
                armed_at: Instant::now(),
            },
        );
    }

    pub(crate) fn remove(&self, path: &Path) -> Option<WatchRegistration> {
        self.inner.write().remove(path)
    }

    /// Registered paths, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.inner.read().keys().cloned().collect();
        paths.sort();
        paths
    }
}

/// Owns the OS watch handle and the path → registration map.
///
/// At most one registration exists per path. Only the presentation side
/// mutates the registry; the watch loop reads it through a
/// [`RegistrationIndex`].
pub struct WatchRegistry {
    watcher: Box<dyn Watcher + Send>,
    index: RegistrationIndex,
}

impl std::fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("registrations", &self.index.len())
            .finish_non_exhaustive()
    }
}

impl WatchRegistry {
    /// Create the watch handle and the channel its raw events arrive on.
    ///
    /// # Errors
    ///
    /// Returns [`WatchSetupError`] if the backend cannot be initialised.
    pub fn new(
        backend: WatchBackend,
    ) -> Result<(Self, Receiver<notify::Result<Event>>), WatchSetupError> {
        let (tx, rx) = mpsc::channel();
        let handler = move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        };
        let watcher: Box<dyn Watcher + Send> = match backend {
            WatchBackend::Native => Box::new(notify::recommended_watcher(handler)?),
            WatchBackend::Poll(interval) => Box::new(PollWatcher::new(
                handler,
                Config::default().with_poll_interval(interval),
            )?),
        };
        debug!(?backend, "watch service started");
        Ok((
            Self {
                watcher,
                index: RegistrationIndex::default(),
            },
            rx,
        ))
    }

    /// A shareable read-only view of the registrations.
    pub fn index(&self) -> RegistrationIndex {
        self.index.clone()
    }

    pub fn is_registered(&self, path: &Path) -> bool {
        self.index.contains(path)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Arm a non-recursive watch on `path`. Registering a path twice keeps
    /// the original registration.
    ///
    /// # Errors
    ///
    /// Returns [`WatchArmError`] if the OS refuses the watch; no
    /// registration is recorded in that case.
    pub fn register(&mut self, path: &Path) -> Result<(), WatchArmError> {
        if self.index.contains(path) {
            return Ok(());
        }
        self.watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|source| WatchArmError {
                path: path.to_path_buf(),
                source,
            })?;
        self.index.insert(path);
        info!(path = %path.display(), "registered");
        Ok(())
    }

    /// Cancel the watch on `path` and drop its registration. A path with no
    /// live watch is ignored.
    pub fn deregister(&mut self, path: &Path) {
        let Some(registration) = self.index.remove(path) else {
            return;
        };
        // The backend drops its own watch when the directory disappears, so
        // a failed unwatch after a deletion is expected.
        if let Err(err) = self.watcher.unwatch(path) {
            debug!(path = %path.display(), %err, "unwatch after backend release");
        }
        info!(
            path = %path.display(),
            watched_ms = registration.armed_at.elapsed().as_millis(),
            "deregistered"
        );
    }

    /// Cancel every watch in the subtree rooted at `path`.
    pub fn deregister_subtree(&mut self, path: &Path) {
        let doomed: Vec<_> = self
            .index
            .paths()
            .into_iter()
            .filter(|p| p.starts_with(path))
            .collect();
        for dir in doomed {
            self.deregister(&dir);
        }
    }

    /// Cancel every watch.
    pub fn clear(&mut self) {
        let all = self.index.paths();
        if !all.is_empty() {
            warn!(count = all.len(), "dropping all watch registrations");
        }
        for dir in all {
            self.deregister(&dir);
        }
    }
}

impl Registrar for WatchRegistry {
    fn register(&mut self, path: &Path) -> Result<(), WatchArmError> {
        Self::register(self, path)
    }

    fn deregister(&mut self, path: &Path) {
        Self::deregister(self, path);
    }
}

//! Background worker turning raw watch events into tree updates.
//!
//! The worker never touches the tree. It resolves each event's parent
//! directory against the registration index and hands the result to the
//! presentation side over a channel; all tree mutation happens there.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender};
use std::thread::{self, JoinHandle};

use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind};
use tracing::{debug, error, trace, warn};

use super::RegistrationIndex;
use crate::error::WatchLoopFatal;

/// A tree mutation observed by the watch loop, to be applied by the
/// presentation side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeUpdate {
    /// `path` appeared in the watched directory `parent`.
    Created {
        parent: PathBuf,
        path: PathBuf,
        is_dir: bool,
    },
    /// `path` disappeared from the watched directory `parent`.
    Removed { parent: PathBuf, path: PathBuf },
    /// The watch service failed; no further updates will arrive.
    WatchLost(WatchLoopFatal),
}

/// Translate one raw event into zero or more tree updates.
///
/// Only entries whose parent directory is registered are reported. Only
/// creation and deletion are of interest; a rename is split into the
/// deletion of its source and the creation of its target.
pub fn translate(event: &Event, index: &RegistrationIndex) -> Vec<TreeUpdate> {
    let mut updates = Vec::new();
    match event.kind {
        EventKind::Create(kind) => {
            for path in &event.paths {
                updates.extend(created(path, Some(kind), index));
            }
        }
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            for path in &event.paths {
                updates.extend(removed(path, index));
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            for path in &event.paths {
                updates.extend(created(path, None, index));
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if let [from, to] = event.paths.as_slice() {
                updates.extend(removed(from, index));
                updates.extend(created(to, None, index));
            }
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            // Backends that cannot tell the two sides apart: decide by
            // whether the path still exists.
            for path in &event.paths {
                if fs::symlink_metadata(path).is_ok() {
                    updates.extend(created(path, None, index));
                } else {
                    updates.extend(removed(path, index));
                }
            }
        }
        _ => {}
    }
    updates
}

fn watched_parent(path: &Path, index: &RegistrationIndex) -> Option<PathBuf> {
    let parent = path.parent()?;
    index.contains(parent).then(|| parent.to_path_buf())
}

fn created(path: &Path, kind: Option<CreateKind>, index: &RegistrationIndex) -> Option<TreeUpdate> {
    let parent = watched_parent(path, index)?;
    let is_dir = match kind {
        Some(CreateKind::Folder) => true,
        Some(CreateKind::File) => false,
        _ => fs::metadata(path).is_ok_and(|m| m.is_dir()),
    };
    Some(TreeUpdate::Created {
        parent,
        path: path.to_path_buf(),
        is_dir,
    })
}

fn removed(path: &Path, index: &RegistrationIndex) -> Option<TreeUpdate> {
    let parent = watched_parent(path, index)?;
    Some(TreeUpdate::Removed {
        parent,
        path: path.to_path_buf(),
    })
}

/// Errors that name specific paths concern those paths only (a file that
/// vanished mid-scan, a permission problem). Anything else means the
/// service itself is gone.
fn is_fatal(err: &notify::Error) -> bool {
    use notify::ErrorKind;
    match err.kind {
        ErrorKind::Io(_) | ErrorKind::Generic(_) => err.paths.is_empty(),
        ErrorKind::MaxFilesWatch => true,
        _ => false,
    }
}

/// Handle to the single background worker.
#[derive(Debug)]
pub struct WatchLoop {
    handle: Option<JoinHandle<()>>,
}

impl WatchLoop {
    /// Start the worker. It runs until the raw event channel closes, a
    /// fatal watch error arrives, or nobody listens for updates anymore.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn(
        events: Receiver<notify::Result<Event>>,
        index: RegistrationIndex,
        updates: Sender<TreeUpdate>,
    ) -> std::io::Result<Self> {
        let handle = thread::Builder::new()
            .name("quillpad-watch".to_string())
            .spawn(move || run(&events, &index, &updates))?;
        Ok(Self {
            handle: Some(handle),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the worker to exit.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("watch loop panicked");
        }
    }
}

fn run(
    events: &Receiver<notify::Result<Event>>,
    index: &RegistrationIndex,
    updates: &Sender<TreeUpdate>,
) {
    let fatal = loop {
        match events.recv() {
            Ok(Ok(event)) => {
                if event.need_rescan() {
                    warn!("watch backend dropped events; tree may be stale until re-expanded");
                }
                let translated = translate(&event, index);
                trace!(kind = ?event.kind, paths = ?event.paths, updates = translated.len(), "event");
                for update in translated {
                    if updates.send(update).is_err() {
                        debug!("update receiver gone, watch loop exiting");
                        return;
                    }
                }
            }
            Ok(Err(err)) if !is_fatal(&err) => {
                warn!(%err, paths = ?err.paths, "watch error");
            }
            Ok(Err(err)) => {
                break WatchLoopFatal {
                    reason: err.to_string(),
                };
            }
            Err(_) => {
                break WatchLoopFatal {
                    reason: "watch handle closed".to_string(),
                };
            }
        }
    };

    let reason = fatal.reason.clone();
    if updates.send(TreeUpdate::WatchLost(fatal)).is_ok() {
        error!(%reason, "live synchronization stopped");
    } else {
        debug!(%reason, "watch loop exiting after shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{EventAttributes, RemoveKind};
    use std::sync::mpsc;
    use std::time::Duration;

    fn event(kind: EventKind, paths: Vec<PathBuf>) -> Event {
        Event {
            kind,
            paths,
            attrs: EventAttributes::new(),
        }
    }

    fn index_with(paths: &[&Path]) -> RegistrationIndex {
        let index = RegistrationIndex::default();
        for path in paths {
            index.insert(path);
        }
        index
    }

    #[test]
    fn test_create_under_registered_parent_is_reported() {
        let parent = Path::new("/proj/assets");
        let index = index_with(&[parent]);
        let ev = event(
            EventKind::Create(CreateKind::File),
            vec![parent.join("img.png")],
        );
        assert_eq!(
            translate(&ev, &index),
            vec![TreeUpdate::Created {
                parent: parent.to_path_buf(),
                path: parent.join("img.png"),
                is_dir: false,
            }]
        );
    }

    #[test]
    fn test_create_folder_kind_marks_directory() {
        let parent = Path::new("/proj");
        let index = index_with(&[parent]);
        let ev = event(
            EventKind::Create(CreateKind::Folder),
            vec![parent.join("drafts")],
        );
        assert!(matches!(
            translate(&ev, &index).as_slice(),
            [TreeUpdate::Created { is_dir: true, .. }]
        ));
    }

    #[test]
    fn test_events_outside_registered_dirs_are_dropped() {
        let index = index_with(&[Path::new("/proj")]);
        let ev = event(
            EventKind::Create(CreateKind::File),
            vec![PathBuf::from("/proj/deep/nested.md")],
        );
        assert!(translate(&ev, &index).is_empty());
    }

    #[test]
    fn test_remove_is_reported() {
        let parent = Path::new("/proj");
        let index = index_with(&[parent]);
        let ev = event(
            EventKind::Remove(RemoveKind::File),
            vec![parent.join("notes.md")],
        );
        assert_eq!(
            translate(&ev, &index),
            vec![TreeUpdate::Removed {
                parent: parent.to_path_buf(),
                path: parent.join("notes.md"),
            }]
        );
    }

    #[test]
    fn test_rename_both_splits_into_remove_and_create() {
        let parent = Path::new("/proj");
        let index = index_with(&[parent]);
        let ev = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            vec![parent.join("old.md"), parent.join("new.md")],
        );
        let updates = translate(&ev, &index);
        assert_eq!(updates.len(), 2);
        assert!(matches!(&updates[0], TreeUpdate::Removed { path, .. } if path == &parent.join("old.md")));
        assert!(matches!(&updates[1], TreeUpdate::Created { path, .. } if path == &parent.join("new.md")));
    }

    #[test]
    fn test_rename_into_unwatched_dir_is_only_a_removal() {
        let parent = Path::new("/proj");
        let index = index_with(&[parent]);
        let ev = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            vec![parent.join("old.md"), PathBuf::from("/elsewhere/new.md")],
        );
        assert!(matches!(
            translate(&ev, &index).as_slice(),
            [TreeUpdate::Removed { .. }]
        ));
    }

    #[test]
    fn test_content_modification_is_ignored() {
        let parent = Path::new("/proj");
        let index = index_with(&[parent]);
        let ev = event(
            EventKind::Modify(ModifyKind::Data(notify::event::DataChange::Content)),
            vec![parent.join("notes.md")],
        );
        assert!(translate(&ev, &index).is_empty());
        let ev = event(EventKind::Any, vec![parent.join("notes.md")]);
        assert!(translate(&ev, &index).is_empty());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(is_fatal(&notify::Error::generic("inotify closed")));
        assert!(is_fatal(&notify::Error::io(std::io::Error::other("boom"))));
        assert!(!is_fatal(
            &notify::Error::io(std::io::Error::other("gone")).add_path(PathBuf::from("/proj/x"))
        ));
        assert!(!is_fatal(&notify::Error::path_not_found()));
    }

    #[test]
    fn test_loop_forwards_updates_and_reports_closed_handle_once() {
        let parent = PathBuf::from("/proj");
        let index = index_with(&[&parent]);
        let (raw_tx, raw_rx) = mpsc::channel();
        let (tx, rx) = mpsc::channel();
        let watch_loop = WatchLoop::spawn(raw_rx, index, tx).unwrap();

        raw_tx
            .send(Ok(event(
                EventKind::Create(CreateKind::File),
                vec![parent.join("a.md")],
            )))
            .unwrap();
        let update = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(update, TreeUpdate::Created { .. }));

        drop(raw_tx);
        let update = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(update, TreeUpdate::WatchLost(_)));
        watch_loop.join();
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_loop_stops_on_service_error() {
        let (raw_tx, raw_rx) = mpsc::channel();
        let (tx, rx) = mpsc::channel();
        let watch_loop = WatchLoop::spawn(raw_rx, RegistrationIndex::default(), tx).unwrap();

        raw_tx
            .send(Err(notify::Error::io(std::io::Error::other("path-level")).add_path(PathBuf::from("/x"))))
            .unwrap();
        raw_tx.send(Err(notify::Error::generic("service down"))).unwrap();

        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            TreeUpdate::WatchLost(fatal) => assert!(fatal.reason.contains("service down")),
            other => panic!("unexpected update {other:?}"),
        }
        watch_loop.join();
        drop(raw_tx);
    }
}

//! Error taxonomy for the tree synchronizer and the document pipeline.
//!
//! Every error here is recoverable at the component boundary: callers get a
//! value back and the session keeps running.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A directory could not be enumerated. The node stays collapsed.
#[derive(Debug, Error)]
pub enum ListingError {
    #[error("cannot list {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} is not a directory in the tree", path.display())]
    NotADirectory { path: PathBuf },

    #[error("{} is not part of the tree", path.display())]
    UnknownPath { path: PathBuf },
}

impl ListingError {
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::Io { path, .. } | Self::NotADirectory { path } | Self::UnknownPath { path } => {
                path
            }
        }
    }
}

/// A directory could not be armed for watching. The subtree stays usable
/// without live updates.
#[derive(Debug, Error)]
#[error("cannot watch {}: {source}", path.display())]
pub struct WatchArmError {
    pub path: PathBuf,
    #[source]
    pub source: notify::Error,
}

/// The OS watch handle could not be created at all.
#[derive(Debug, Error)]
#[error("watch service unavailable: {0}")]
pub struct WatchSetupError(#[from] pub notify::Error);

/// The watch service failed while running. Live synchronization is over for
/// the rest of the session and the tree becomes a stale snapshot.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("live synchronization stopped: {reason}")]
pub struct WatchLoopFatal {
    pub reason: String,
}

/// A document could not be read on selection.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} is not a regular file", path.display())]
    NotAFile { path: PathBuf },
}

/// A document could not be written on an auto-save tick.
#[derive(Debug, Error)]
#[error("cannot write {}: {source}", path.display())]
pub struct WriteError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// An operation that needs an open document was issued while idle.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("no document is selected")]
pub struct NoActiveDocument;

/// A template id that cannot name a file inside the templates directory.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid template id {0:?}")]
pub struct InvalidTemplateId(pub String);

//! Document persistence.

use std::fs;
use std::path::Path;

use crate::error::{ReadError, WriteError};

/// Reads and writes document bytes.
pub trait DocumentStore {
    /// Read the whole document at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError`] if the path is not a readable regular file.
    fn read(&self, path: &Path) -> Result<String, ReadError>;

    /// Replace the document at `path` with `text`.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError`] if the bytes cannot be written.
    fn write(&self, path: &Path, text: &str) -> Result<(), WriteError>;

    /// Whether `path` currently names a regular file.
    fn is_regular_file(&self, path: &Path) -> bool;
}

/// The real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStore;

impl DocumentStore for FsStore {
    fn read(&self, path: &Path) -> Result<String, ReadError> {
        if path.is_dir() {
            return Err(ReadError::NotAFile {
                path: path.to_path_buf(),
            });
        }
        let bytes = fs::read(path).map_err(|source| ReadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn write(&self, path: &Path, text: &str) -> Result<(), WriteError> {
        fs::write(path, text).map_err(|source| WriteError {
            path: path.to_path_buf(),
            source,
        })
    }

    fn is_regular_file(&self, path: &Path) -> bool {
        path.is_file()
    }
}

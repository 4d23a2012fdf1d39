//! Single-pass directory listing used by expansion.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ListingError;

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedEntry {
    /// File name as displayed.
    pub name: String,
    /// Absolute path of the entry.
    pub path: PathBuf,
    /// Whether the entry is (or links to) a directory.
    pub is_dir: bool,
}

/// List `dir` with one `read_dir` pass.
///
/// Entries are returned in filesystem order unless `sort` is set, in which
/// case directories come first and names compare case-insensitively.
/// Entries whose type cannot be determined (vanished mid-listing, broken
/// permissions) are skipped rather than failing the whole listing.
///
/// # Errors
///
/// Returns [`ListingError::Io`] if the directory itself cannot be opened.
pub fn list_dir(dir: &Path, sort: bool) -> Result<Vec<ListedEntry>, ListingError> {
    let read_dir = fs::read_dir(dir).map_err(|source| ListingError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut entries = Vec::new();
    let mut skipped = 0usize;
    for entry in read_dir {
        let Ok(entry) = entry else {
            skipped += 1;
            continue;
        };
        let path = entry.path();
        let is_dir = match entry.file_type() {
            Ok(ft) if ft.is_symlink() => fs::metadata(&path).is_ok_and(|m| m.is_dir()),
            Ok(ft) => ft.is_dir(),
            Err(_) => {
                skipped += 1;
                continue;
            }
        };
        entries.push(ListedEntry {
            name: entry.file_name().to_string_lossy().to_string(),
            path,
            is_dir,
        });
    }

    if skipped > 0 {
        debug!(dir = %dir.display(), skipped, "listing skipped unreadable entries");
    }
    if sort {
        sort_entries(&mut entries);
    }
    Ok(entries)
}

/// Directories first, then case-insensitive name.
pub fn sort_entries(entries: &mut [ListedEntry]) {
    entries.sort_by(|a, b| {
        b.is_dir
            .cmp(&a.is_dir)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
}

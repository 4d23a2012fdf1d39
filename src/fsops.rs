//! File operations offered by the browser.
//!
//! These touch only the filesystem. The tree picks the results up through
//! its watches like any other change.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::info;

const NEW_FILE_STEM: &str = "New File";
const NEW_FILE_EXT: &str = "md";
const MAX_NEW_FILE_SUFFIX: u32 = 999;

/// Create an empty `New File.md` in `dir`, or `New File N.md` with the
/// lowest free `N` when that name is taken.
pub fn create_new_file(dir: &Path) -> Result<PathBuf> {
    for n in 1..=MAX_NEW_FILE_SUFFIX {
        let name = if n == 1 {
            format!("{NEW_FILE_STEM}.{NEW_FILE_EXT}")
        } else {
            format!("{NEW_FILE_STEM} {n}.{NEW_FILE_EXT}")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => {
                info!(path = %path.display(), "file created");
                return Ok(path);
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
            Err(err) => {
                return Err(err).with_context(|| format!("Unable to create {}", path.display()));
            }
        }
    }
    bail!("No free new-file name left in {}", dir.display())
}

/// Delete a file, or a directory with everything in it. Returns `false`
/// if nothing existed at `path`.
pub fn delete_path(path: &Path) -> Result<bool> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err).with_context(|| format!("Unable to delete {}", path.display())),
    };
    let removed = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    removed.with_context(|| format!("Unable to delete {}", path.display()))?;
    info!(path = %path.display(), "deleted");
    Ok(true)
}

/// Rename `path` to `new_name` within the same directory, replacing any
/// existing file of that name. Returns the new path.
pub fn rename_path(path: &Path, new_name: &str) -> Result<PathBuf> {
    let new_name = new_name.trim();
    if new_name.is_empty()
        || new_name == "."
        || new_name == ".."
        || new_name.contains(['/', '\\'])
    {
        bail!("Invalid file name {new_name:?}");
    }
    let parent = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    let target = parent.join(new_name);
    if target == path {
        return Ok(target);
    }
    fs::rename(path, &target).with_context(|| {
        format!("Could not move {} to {}", path.display(), target.display())
    })?;
    info!(from = %path.display(), to = %target.display(), "renamed");
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_new_file_picks_free_names() {
        let dir = tempdir().unwrap();
        let first = create_new_file(dir.path()).unwrap();
        let second = create_new_file(dir.path()).unwrap();
        assert_eq!(first.file_name().unwrap(), "New File.md");
        assert_eq!(second.file_name().unwrap(), "New File 2.md");
        assert_eq!(fs::read_to_string(first).unwrap(), "");
    }

    #[test]
    fn test_create_new_file_in_missing_dir_fails() {
        let dir = tempdir().unwrap();
        assert!(create_new_file(&dir.path().join("gone")).is_err());
    }

    #[test]
    fn test_delete_file_and_directory() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.md");
        fs::write(&file, "x").unwrap();
        fs::create_dir_all(dir.path().join("d/e")).unwrap();

        assert!(delete_path(&file).unwrap());
        assert!(!file.exists());
        assert!(delete_path(&dir.path().join("d")).unwrap());
        assert!(!dir.path().join("d").exists());
        assert!(!delete_path(&file).unwrap());
    }

    #[test]
    fn test_rename_within_parent_replaces() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("draft.md");
        let existing = dir.path().join("post.md");
        fs::write(&from, "new").unwrap();
        fs::write(&existing, "old").unwrap();

        let to = rename_path(&from, "post.md").unwrap();
        assert_eq!(to, existing);
        assert!(!from.exists());
        assert_eq!(fs::read_to_string(&to).unwrap(), "new");
    }

    #[test]
    fn test_rename_rejects_paths() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("draft.md");
        fs::write(&from, "x").unwrap();
        assert!(rename_path(&from, "../escape.md").is_err());
        assert!(rename_path(&from, "").is_err());
        assert!(from.exists());
    }
}

use std::path::{Path, PathBuf};

use super::render::TemplateId;

/// The document currently open in an editor view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSession {
    path: PathBuf,
    text: String,
    template: TemplateId,
    /// Bumped on every edit. Zero means "as read from disk".
    revision: u64,
    /// Highest revision known to be on disk.
    saved_revision: u64,
}

impl DocumentSession {
    pub(crate) fn new(path: PathBuf, text: String, template: TemplateId) -> Self {
        Self {
            path,
            text,
            template,
            revision: 0,
            saved_revision: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub const fn template(&self) -> &TemplateId {
        &self.template
    }

    pub const fn revision(&self) -> u64 {
        self.revision
    }

    pub const fn saved_revision(&self) -> u64 {
        self.saved_revision
    }

    /// Whether the in-memory text differs from the last write.
    pub const fn has_unsaved_edits(&self) -> bool {
        self.revision > self.saved_revision
    }

    pub(crate) fn set_text(&mut self, text: String) {
        self.text = text;
        self.revision += 1;
    }

    pub(crate) fn set_template(&mut self, template: TemplateId) {
        self.template = template;
    }

    pub(crate) fn set_path(&mut self, path: PathBuf) {
        self.path = path;
    }

    pub(crate) fn mark_saved(&mut self, revision: u64) {
        self.saved_revision = self.saved_revision.max(revision);
    }
}

//! The document pipeline as an explicit state machine.
//!
//! Driven by four events: [`DocumentPipeline::select`],
//! [`DocumentPipeline::edit`], [`DocumentPipeline::set_template`] and
//! [`DocumentPipeline::tick`]. Every event that changes what the preview
//! shows runs the render chain synchronously and notifies subscribers.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::front_matter::{self, Variables};
use super::render::{
    ComrakCompiler, MarkdownCompiler, TemplateId, TemplateRenderer, TemplateSet, decorate_preview,
};
use super::session::DocumentSession;
use super::store::{DocumentStore, FsStore};
use crate::error::{NoActiveDocument, ReadError, WriteError};

/// Where the pipeline is in the load / edit / save cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    /// No document selected.
    Idle,
    /// In-memory text matches the last read or write.
    Loaded,
    /// Edited since the last write.
    Dirty,
    /// A write is in flight.
    Saving,
}

/// Output of the render chain for one revision of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub path: PathBuf,
    pub revision: u64,
    pub template: TemplateId,
    /// Compiled markdown.
    pub markup: String,
    /// Markup wrapped in the template.
    pub page: String,
    /// Page as shown in the preview pane.
    pub display: String,
}

/// Result of [`DocumentPipeline::select`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelectOutcome {
    /// The previous document had edits that never reached disk.
    pub abandoned_edits: bool,
}

/// Result of one auto-save tick.
#[derive(Debug)]
pub enum TickOutcome {
    /// Nothing selected.
    Idle,
    /// Nothing to write.
    Clean,
    /// The previous write has not finished.
    InFlight,
    /// The document no longer names a regular file.
    Skipped,
    Saved { revision: u64 },
    /// The write failed; the next tick retries.
    Failed(WriteError),
}

/// A write handed out by [`DocumentPipeline::begin_save`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveJob {
    pub path: PathBuf,
    pub text: String,
    pub revision: u64,
}

#[derive(Debug, Clone)]
struct Compiled {
    variables: Variables,
    markup: String,
}

type Listener = Box<dyn FnMut(&Preview) + Send>;

/// Selected-document state plus its render chain and auto-save.
pub struct DocumentPipeline<S = FsStore, C = ComrakCompiler, R = TemplateSet> {
    store: S,
    compiler: C,
    renderer: R,
    state: PipelineState,
    session: Option<DocumentSession>,
    template: TemplateId,
    compiled: Option<Compiled>,
    preview: Option<Preview>,
    listeners: Vec<Listener>,
    failed_writes: u32,
}

impl<S, C, R> std::fmt::Debug for DocumentPipeline<S, C, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentPipeline")
            .field("state", &self.state)
            .field("session", &self.session)
            .field("template", &self.template)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl DocumentPipeline {
    /// Pipeline on the real filesystem with comrak and the templates in
    /// `templates_dir`.
    pub fn on_disk(templates_dir: impl Into<PathBuf>) -> Self {
        Self::new(FsStore, ComrakCompiler, TemplateSet::new(templates_dir))
    }
}

impl<S, C, R> DocumentPipeline<S, C, R>
where
    S: DocumentStore,
    C: MarkdownCompiler,
    R: TemplateRenderer,
{
    pub fn new(store: S, compiler: C, renderer: R) -> Self {
        Self {
            store,
            compiler,
            renderer,
            state: PipelineState::Idle,
            session: None,
            template: TemplateId::default(),
            compiled: None,
            preview: None,
            listeners: Vec::new(),
            failed_writes: 0,
        }
    }

    /// Template used for documents selected from now on.
    #[must_use]
    pub fn with_template(mut self, template: TemplateId) -> Self {
        self.template = template;
        self
    }

    pub const fn state(&self) -> PipelineState {
        self.state
    }

    pub const fn session(&self) -> Option<&DocumentSession> {
        self.session.as_ref()
    }

    pub const fn template(&self) -> &TemplateId {
        &self.template
    }

    pub const fn preview(&self) -> Option<&Preview> {
        self.preview.as_ref()
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    pub const fn compiler(&self) -> &C {
        &self.compiler
    }

    /// Call `listener` with every new preview.
    pub fn subscribe(&mut self, listener: impl FnMut(&Preview) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Open the document at `path`.
    ///
    /// Unsaved edits to the previously selected document are dropped; the
    /// outcome reports when that happened.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError`] if the file cannot be read. The pipeline is
    /// then idle.
    pub fn select(&mut self, path: &Path) -> Result<SelectOutcome, ReadError> {
        let abandoned_edits = self
            .session
            .as_ref()
            .is_some_and(DocumentSession::has_unsaved_edits);
        if let Some(previous) = self.session.as_ref().filter(|_| abandoned_edits) {
            warn!(
                path = %previous.path().display(),
                revision = previous.revision(),
                "unsaved edits abandoned on selection change"
            );
        }

        let text = match self.store.read(path) {
            Ok(text) => text,
            Err(err) => {
                warn!(%err, "selection failed");
                self.reset();
                return Err(err);
            }
        };

        self.session = Some(DocumentSession::new(
            path.to_path_buf(),
            text,
            self.template.clone(),
        ));
        self.state = PipelineState::Loaded;
        self.failed_writes = 0;
        debug!(path = %path.display(), "selected");
        self.renderer.invalidate();
        self.compile_and_publish();
        Ok(SelectOutcome { abandoned_edits })
    }

    /// Drop the selection. Returns whether unsaved edits were abandoned.
    pub fn close(&mut self) -> bool {
        let abandoned = self
            .session
            .as_ref()
            .is_some_and(DocumentSession::has_unsaved_edits);
        self.reset();
        abandoned
    }

    fn reset(&mut self) {
        self.session = None;
        self.compiled = None;
        self.preview = None;
        self.state = PipelineState::Idle;
        self.failed_writes = 0;
    }

    /// Replace the in-memory text of the selected document.
    ///
    /// # Errors
    ///
    /// Returns [`NoActiveDocument`] when nothing is selected.
    pub fn edit(&mut self, text: impl Into<String>) -> Result<(), NoActiveDocument> {
        let session = self.session.as_mut().ok_or(NoActiveDocument)?;
        session.set_text(text.into());
        if self.state != PipelineState::Saving {
            self.state = PipelineState::Dirty;
        }
        self.compile_and_publish();
        Ok(())
    }

    /// Switch templates, re-rendering the cached markup without compiling
    /// again. While idle this only sets the template for the next selection.
    /// Template files are read again on the next render, even when `template`
    /// is already in effect.
    pub fn set_template(&mut self, template: TemplateId) {
        self.renderer.invalidate();
        if template == self.template {
            return;
        }
        debug!(%template, "template selected");
        self.template = template.clone();
        if let Some(session) = self.session.as_mut() {
            session.set_template(template);
            self.render_and_publish();
        }
    }

    /// Follow the selected document to a new path after a rename.
    ///
    /// # Errors
    ///
    /// Returns [`NoActiveDocument`] when nothing is selected.
    pub fn relocate(&mut self, new_path: impl Into<PathBuf>) -> Result<(), NoActiveDocument> {
        let session = self.session.as_mut().ok_or(NoActiveDocument)?;
        let new_path = new_path.into();
        info!(from = %session.path().display(), to = %new_path.display(), "document moved");
        session.set_path(new_path);
        // A write in flight targets the old path; the next tick rewrites the
        // text at the new one.
        if self.state == PipelineState::Saving {
            self.state = PipelineState::Dirty;
        }
        self.render_and_publish();
        Ok(())
    }

    /// One auto-save period elapsed: write the text if it changed.
    pub fn tick(&mut self) -> TickOutcome {
        match self.state {
            PipelineState::Idle => TickOutcome::Idle,
            PipelineState::Loaded => TickOutcome::Clean,
            PipelineState::Saving => TickOutcome::InFlight,
            PipelineState::Dirty => match self.begin_save() {
                Some(job) => {
                    let result = self.store.write(&job.path, &job.text);
                    self.finish_save(&job, result)
                }
                None => TickOutcome::Skipped,
            },
        }
    }

    /// Start a write of the current text, moving to `Saving`.
    ///
    /// Returns `None` unless the pipeline is dirty and the document still
    /// names a regular file.
    pub fn begin_save(&mut self) -> Option<SaveJob> {
        if self.state != PipelineState::Dirty {
            return None;
        }
        let session = self.session.as_ref()?;
        if !self.store.is_regular_file(session.path()) {
            debug!(path = %session.path().display(), "not a regular file, save skipped");
            return None;
        }
        self.state = PipelineState::Saving;
        Some(SaveJob {
            path: session.path().to_path_buf(),
            text: session.text().to_string(),
            revision: session.revision(),
        })
    }

    /// Record the result of a write started by [`Self::begin_save`].
    ///
    /// Edits made while the write was in flight leave the pipeline dirty so
    /// the next tick writes them.
    pub fn finish_save(&mut self, job: &SaveJob, result: Result<(), WriteError>) -> TickOutcome {
        let saving = self.state == PipelineState::Saving;
        let Some(session) = self
            .session
            .as_mut()
            .filter(|s| saving && s.path() == job.path)
        else {
            debug!(path = %job.path.display(), "save finished for a document no longer selected");
            return match result {
                Ok(()) => TickOutcome::Saved {
                    revision: job.revision,
                },
                Err(err) => TickOutcome::Failed(err),
            };
        };

        match result {
            Ok(()) => {
                session.mark_saved(job.revision);
                self.state = if session.has_unsaved_edits() {
                    PipelineState::Dirty
                } else {
                    PipelineState::Loaded
                };
                if self.failed_writes > 0 {
                    info!(path = %job.path.display(), failures = self.failed_writes, "save recovered");
                }
                self.failed_writes = 0;
                debug!(path = %job.path.display(), revision = job.revision, "saved");
                TickOutcome::Saved {
                    revision: job.revision,
                }
            }
            Err(err) => {
                self.state = PipelineState::Dirty;
                self.failed_writes += 1;
                if self.failed_writes == 1 {
                    warn!(%err, "save failed, retrying on next tick");
                } else {
                    debug!(%err, failures = self.failed_writes, "save still failing");
                }
                TickOutcome::Failed(err)
            }
        }
    }

    fn compile_and_publish(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let (variables, body) = front_matter::split(session.text());
        let markup = self.compiler.compile(body);
        self.compiled = Some(Compiled { variables, markup });
        self.render_and_publish();
    }

    fn render_and_publish(&mut self) {
        let (Some(session), Some(compiled)) = (self.session.as_ref(), self.compiled.as_ref()) else {
            return;
        };
        let mut variables = compiled.variables.clone();
        if let Some(stem) = session.path().file_stem() {
            variables
                .entry("title".to_string())
                .or_insert_with(|| stem.to_string_lossy().to_string());
        }
        let page = self
            .renderer
            .render(session.template(), &compiled.markup, &variables);
        let base_dir = session.path().parent().unwrap_or_else(|| Path::new("/"));
        let display = decorate_preview(&page, base_dir);

        let preview = &*self.preview.insert(Preview {
            path: session.path().to_path_buf(),
            revision: session.revision(),
            template: session.template().clone(),
            markup: compiled.markup.clone(),
            page,
            display,
        });
        for listener in &mut self.listeners {
            listener(preview);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::render::BuiltinTemplate;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// In-memory store counting writes.
    #[derive(Default)]
    struct MemoryStore {
        files: Mutex<HashMap<PathBuf, String>>,
        writes: AtomicUsize,
        fail_writes: AtomicBool,
    }

    impl MemoryStore {
        fn with_file(path: &str, text: &str) -> Self {
            let store = Self::default();
            store.files.lock().insert(PathBuf::from(path), text.to_string());
            store
        }

        fn contents(&self, path: &str) -> Option<String> {
            self.files.lock().get(Path::new(path)).cloned()
        }
    }

    impl DocumentStore for MemoryStore {
        fn read(&self, path: &Path) -> Result<String, ReadError> {
            self.files
                .lock()
                .get(path)
                .cloned()
                .ok_or_else(|| ReadError::NotAFile {
                    path: path.to_path_buf(),
                })
        }

        fn write(&self, path: &Path, text: &str) -> Result<(), WriteError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(WriteError {
                    path: path.to_path_buf(),
                    source: std::io::Error::other("disk full"),
                });
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.files.lock().insert(path.to_path_buf(), text.to_string());
            Ok(())
        }

        fn is_regular_file(&self, path: &Path) -> bool {
            self.files.lock().contains_key(path)
        }
    }

    #[derive(Default)]
    struct CountingCompiler {
        calls: AtomicUsize,
    }

    impl MarkdownCompiler for CountingCompiler {
        fn compile(&self, source: &str) -> String {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ComrakCompiler.compile(source)
        }
    }

    fn pipeline(store: MemoryStore) -> DocumentPipeline<MemoryStore, CountingCompiler, BuiltinTemplate> {
        DocumentPipeline::new(store, CountingCompiler::default(), BuiltinTemplate)
    }

    #[test]
    fn test_starts_idle() {
        let mut p = pipeline(MemoryStore::default());
        assert_eq!(p.state(), PipelineState::Idle);
        assert!(matches!(p.tick(), TickOutcome::Idle));
        assert_eq!(p.edit("x"), Err(NoActiveDocument));
        assert_eq!(p.relocate("/x.md"), Err(NoActiveDocument));
    }

    #[test]
    fn test_select_loads_and_renders() {
        let mut p = pipeline(MemoryStore::with_file("/p/notes.md", "# Hi"));
        let outcome = p.select(Path::new("/p/notes.md")).unwrap();
        assert!(!outcome.abandoned_edits);
        assert_eq!(p.state(), PipelineState::Loaded);

        let preview = p.preview().unwrap();
        assert!(preview.markup.contains("<h1>Hi</h1>"));
        assert!(preview.page.contains("<title>notes</title>"));
        assert!(preview.display.contains("<base href=\"file:///p/\">"));
        assert!(matches!(p.tick(), TickOutcome::Clean));
        assert_eq!(p.store().writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_select_failure_leaves_idle() {
        let mut p = pipeline(MemoryStore::with_file("/p/notes.md", "# Hi"));
        p.select(Path::new("/p/notes.md")).unwrap();
        assert!(p.select(Path::new("/p/missing.md")).is_err());
        assert_eq!(p.state(), PipelineState::Idle);
        assert!(p.session().is_none());
        assert!(p.preview().is_none());
    }

    #[test]
    fn test_front_matter_feeds_template_variables() {
        let mut p = pipeline(MemoryStore::with_file(
            "/p/post.md",
            "---\ntitle: Launch\n---\n# Body\n",
        ));
        p.select(Path::new("/p/post.md")).unwrap();
        let preview = p.preview().unwrap();
        assert!(preview.page.contains("<title>Launch</title>"));
        assert!(!preview.markup.contains("title:"));
    }

    #[test]
    fn test_edits_debounce_into_one_write() {
        let mut p = pipeline(MemoryStore::with_file("/p/notes.md", "# Hi"));
        p.select(Path::new("/p/notes.md")).unwrap();
        for i in 0..5 {
            p.edit(format!("# Draft {i}")).unwrap();
        }
        assert_eq!(p.state(), PipelineState::Dirty);
        assert!(matches!(p.tick(), TickOutcome::Saved { revision: 5 }));
        assert!(matches!(p.tick(), TickOutcome::Clean));
        assert_eq!(p.store().writes.load(Ordering::SeqCst), 1);
        assert_eq!(p.store().contents("/p/notes.md").unwrap(), "# Draft 4");
        assert_eq!(p.state(), PipelineState::Loaded);
    }

    #[test]
    fn test_edit_during_save_requeues() {
        let mut p = pipeline(MemoryStore::with_file("/p/notes.md", "a"));
        p.select(Path::new("/p/notes.md")).unwrap();
        p.edit("b").unwrap();

        let job = p.begin_save().unwrap();
        assert_eq!(p.state(), PipelineState::Saving);
        assert!(matches!(p.tick(), TickOutcome::InFlight));
        p.edit("c").unwrap();
        assert_eq!(p.state(), PipelineState::Saving);

        let result = p.store().write(&job.path, &job.text);
        assert!(matches!(p.finish_save(&job, result), TickOutcome::Saved { revision: 1 }));
        assert_eq!(p.state(), PipelineState::Dirty);

        assert!(matches!(p.tick(), TickOutcome::Saved { revision: 2 }));
        assert_eq!(p.store().contents("/p/notes.md").unwrap(), "c");
    }

    #[test]
    fn test_failed_write_is_retried_next_tick() {
        let mut p = pipeline(MemoryStore::with_file("/p/notes.md", "a"));
        p.select(Path::new("/p/notes.md")).unwrap();
        p.edit("b").unwrap();

        p.store().fail_writes.store(true, Ordering::SeqCst);
        assert!(matches!(p.tick(), TickOutcome::Failed(_)));
        assert!(matches!(p.tick(), TickOutcome::Failed(_)));
        assert_eq!(p.state(), PipelineState::Dirty);

        p.store().fail_writes.store(false, Ordering::SeqCst);
        assert!(matches!(p.tick(), TickOutcome::Saved { .. }));
        assert_eq!(p.store().contents("/p/notes.md").unwrap(), "b");
    }

    #[test]
    fn test_tick_skips_vanished_file() {
        let mut p = pipeline(MemoryStore::with_file("/p/notes.md", "a"));
        p.select(Path::new("/p/notes.md")).unwrap();
        p.edit("b").unwrap();
        p.store().files.lock().clear();
        assert!(matches!(p.tick(), TickOutcome::Skipped));
        assert_eq!(p.state(), PipelineState::Dirty);
        assert_eq!(p.store().writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reselect_reports_abandoned_edits() {
        let store = MemoryStore::with_file("/p/a.md", "a");
        store.files.lock().insert(PathBuf::from("/p/b.md"), "b".into());
        let mut p = pipeline(store);
        p.select(Path::new("/p/a.md")).unwrap();
        p.edit("a2").unwrap();

        let outcome = p.select(Path::new("/p/b.md")).unwrap();
        assert!(outcome.abandoned_edits);
        assert_eq!(p.store().contents("/p/a.md").unwrap(), "a");

        p.edit("b2").unwrap();
        p.tick();
        assert!(!p.select(Path::new("/p/a.md")).unwrap().abandoned_edits);
    }

    #[test]
    fn test_template_switch_does_not_recompile() {
        let mut p = pipeline(MemoryStore::with_file("/p/notes.md", "# Hi"));
        p.select(Path::new("/p/notes.md")).unwrap();
        p.edit("# Bye").unwrap();
        assert_eq!(p.compiler().calls.load(Ordering::SeqCst), 2);

        p.set_template(TemplateId::new("Blog").unwrap());
        p.set_template(TemplateId::new("Plain").unwrap());
        assert_eq!(p.compiler().calls.load(Ordering::SeqCst), 2);
        assert_eq!(p.preview().unwrap().template.as_str(), "Plain");
        assert_eq!(p.session().unwrap().template().as_str(), "Plain");
    }

    #[test]
    fn test_template_set_while_idle_applies_to_next_selection() {
        let mut p = pipeline(MemoryStore::with_file("/p/notes.md", "# Hi"));
        p.set_template(TemplateId::new("Blog").unwrap());
        assert!(p.preview().is_none());
        p.select(Path::new("/p/notes.md")).unwrap();
        assert_eq!(p.session().unwrap().template().as_str(), "Blog");
    }

    #[test]
    fn test_relocate_during_save_rewrites_at_new_path() {
        let mut p = pipeline(MemoryStore::with_file("/p/notes.md", "# Hi"));
        p.select(Path::new("/p/notes.md")).unwrap();
        p.edit("# A").unwrap();
        let job = p.begin_save().unwrap();

        let text = p.store().files.lock().remove(Path::new("/p/notes.md")).unwrap();
        p.store().files.lock().insert(PathBuf::from("/p/moved.md"), text);
        p.relocate("/p/moved.md").unwrap();
        assert_eq!(p.state(), PipelineState::Dirty);
        p.edit("# B").unwrap();

        let result = p.store().write(&job.path, &job.text);
        assert!(matches!(p.finish_save(&job, result), TickOutcome::Saved { revision: 1 }));
        assert_eq!(p.state(), PipelineState::Dirty);

        assert!(matches!(p.tick(), TickOutcome::Saved { revision: 2 }));
        assert_eq!(p.state(), PipelineState::Loaded);
        assert_eq!(p.store().contents("/p/moved.md").unwrap(), "# B");
    }

    #[test]
    fn test_relocate_keeps_edits_and_moves_base() {
        let mut p = pipeline(MemoryStore::with_file("/p/notes.md", "# Hi"));
        p.select(Path::new("/p/notes.md")).unwrap();
        p.edit("# Moved").unwrap();
        p.store().files.lock().clear();
        p.store().files.lock().insert(PathBuf::from("/q/renamed.md"), "# Hi".into());

        p.relocate("/q/renamed.md").unwrap();
        assert!(p.preview().unwrap().display.contains("file:///q/"));
        assert!(matches!(p.tick(), TickOutcome::Saved { .. }));
        assert_eq!(p.store().contents("/q/renamed.md").unwrap(), "# Moved");
    }

    #[test]
    fn test_listeners_see_every_preview() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut p = pipeline(MemoryStore::with_file("/p/notes.md", "# Hi"));
        let sink = Arc::clone(&seen);
        p.subscribe(move |preview| sink.lock().push(preview.revision));

        p.select(Path::new("/p/notes.md")).unwrap();
        p.edit("# One").unwrap();
        p.set_template(TemplateId::new("Other").unwrap());
        p.edit("# Two").unwrap();
        assert_eq!(*seen.lock(), vec![0, 1, 1, 2]);
    }

    #[test]
    fn test_close_reports_unsaved_edits() {
        let mut p = pipeline(MemoryStore::with_file("/p/notes.md", "# Hi"));
        p.select(Path::new("/p/notes.md")).unwrap();
        assert!(!p.close());
        p.select(Path::new("/p/notes.md")).unwrap();
        p.edit("x").unwrap();
        assert!(p.close());
        assert_eq!(p.state(), PipelineState::Idle);
    }
}

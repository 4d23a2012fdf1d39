//! The selected document and its render chain.
//!
//! This module handles:
//! - The document session (path, live text, template in effect)
//! - The select / edit / tick / template state machine
//! - Render collaborators: comrak compilation, templates, preview decoration
//! - Persistence behind a narrow store trait

mod front_matter;
mod pipeline;
mod render;
mod session;
mod store;

pub use front_matter::{Variables, split as split_front_matter};
pub use pipeline::{DocumentPipeline, PipelineState, Preview, SaveJob, SelectOutcome, TickOutcome};
pub use render::{
    BUILTIN_TEMPLATE, BuiltinTemplate, ComrakCompiler, MarkdownCompiler, TemplateId,
    TemplateRenderer, TemplateSet, decorate_preview, expand_placeholders,
};
pub use session::DocumentSession;
pub use store::{DocumentStore, FsStore};

/// Whether `path` names a markdown document.
pub fn is_markdown(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| matches!(ext.to_ascii_lowercase().as_str(), "md" | "markdown"))
}

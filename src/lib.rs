// Only allow lints that are either transitive-dependency noise or
// genuinely opinionated style choices that don't indicate real issues.
#![allow(
    // Transitive dependency version mismatches we can't control
    clippy::multiple_crate_versions,
    // module_name_repetitions is pure style preference (e.g. tree::TreeNode)
    clippy::module_name_repetitions
)]

//! # Quillpad
//!
//! The core of a desktop markdown editor with live HTML preview.
//!
//! Quillpad keeps two things current:
//! - A lazily expanded mirror of a project directory, kept in step with the
//!   filesystem through OS watch events
//! - The selected document's render chain, from raw text to compiled
//!   markup, templated page and displayed preview, with debounced auto-save
//!
//! ## Architecture
//!
//! Two execution contexts share no mutable state:
//! - **Presentation side**: owns the tree, the watch registry and the
//!   document pipeline; every mutation happens here
//! - **Watch loop**: one background worker blocking on raw watch events and
//!   handing [`watcher::TreeUpdate`]s over a channel
//!
//! ## Modules
//!
//! - [`tree`]: Directory node store and lazy expansion
//! - [`watcher`]: Watch registry and the background event loop
//! - [`browser`]: Browser session tying tree, registry and loop together
//! - [`document`]: Document session, pipeline state machine, render collaborators
//! - [`autosave`]: Periodic auto-save trigger
//! - [`export`]: Static site export
//! - [`fsops`]: Create, delete and rename helpers
//! - [`config`]: Flag-file configuration
//! - [`error`]: Error types

pub mod autosave;
pub mod browser;
pub mod config;
pub mod document;
pub mod error;
pub mod export;
pub mod fsops;
pub mod tree;
pub mod watcher;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::browser::{AppliedChange, BrowserOptions, ProjectBrowser};
    pub use crate::document::{DocumentPipeline, PipelineState, Preview, TemplateId, TickOutcome};
    pub use crate::tree::{ExpansionState, ProjectTree, TreeNode};
    pub use crate::watcher::{WatchBackend, WatchPolicy};
}

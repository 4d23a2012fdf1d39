//! Render collaborators: markdown compilation, template expansion and the
//! preview decoration applied to the final page.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use comrak::{Options, markdown_to_html};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::{Captures, Regex};
use tracing::{debug, warn};

use super::front_matter::Variables;
use crate::error::InvalidTemplateId;

/// Turns markdown source into HTML markup.
///
/// Callers pass the document body only; front matter is split off first by
/// [`super::split_front_matter`].
pub trait MarkdownCompiler {
    fn compile(&self, source: &str) -> String;
}

/// Wraps compiled markup into a full page.
pub trait TemplateRenderer {
    /// Expand `template` with `markup` as its main content. `variables` are
    /// extra placeholder values, usually from front matter.
    fn render(&self, template: &TemplateId, markup: &str, variables: &Variables) -> String;

    /// Forget cached template sources so the next render reads them again.
    fn invalidate(&self) {}
}

/// `CommonMark` plus the GFM extensions, via comrak.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComrakCompiler;

impl MarkdownCompiler for ComrakCompiler {
    fn compile(&self, source: &str) -> String {
        let mut options = Options::default();
        options.extension.strikethrough = true;
        options.extension.table = true;
        options.extension.autolink = true;
        options.extension.tasklist = true;
        options.extension.footnotes = true;
        markdown_to_html(source, &options)
    }
}

/// Name of a template under `<root>/templates`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateId(String);

impl TemplateId {
    pub const DEFAULT: &'static str = "Default";

    /// # Errors
    ///
    /// Returns [`InvalidTemplateId`] for empty ids and ids that could leave
    /// the templates directory.
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidTemplateId> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty()
            || trimmed.contains(['/', '\\'])
            || trimmed == "."
            || trimmed == ".."
        {
            return Err(InvalidTemplateId(id));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TemplateId {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for TemplateId {
    type Err = InvalidTemplateId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Page used when a template file is missing.
pub const BUILTIN_TEMPLATE: &str = "<!DOCTYPE html>
<html>
<head>
<meta charset=\"utf-8\">
<title>{{ title }}</title>
</head>
<body>
{{ main }}
</body>
</html>
";

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.-]+)\s*\}\}").expect("valid placeholder regex")
});

/// Expand `{{ name }}` placeholders. Unknown names expand to nothing.
pub fn expand_placeholders(template: &str, markup: &str, variables: &Variables) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            let name = &caps[1];
            if name == "main" {
                return markup.to_string();
            }
            variables.get(name).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// HTML templates stored as `<dir>/<id>.html`.
///
/// Each template is read once and then served from memory until
/// [`TemplateRenderer::invalidate`].
#[derive(Debug)]
pub struct TemplateSet {
    dir: PathBuf,
    cache: Mutex<HashMap<TemplateId, Arc<str>>>,
}

impl TemplateSet {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &TemplateId) -> PathBuf {
        self.dir.join(format!("{}.html", id.as_str()))
    }

    /// Template source for `id`, falling back to [`BUILTIN_TEMPLATE`].
    pub fn source(&self, id: &TemplateId) -> Arc<str> {
        if let Some(text) = self.cache.lock().get(id) {
            return Arc::clone(text);
        }
        let text = self.load(id);
        self.cache.lock().insert(id.clone(), Arc::clone(&text));
        text
    }

    fn load(&self, id: &TemplateId) -> Arc<str> {
        let path = self.path_for(id);
        match fs::read_to_string(&path) {
            Ok(text) => {
                debug!(template = %id, "template loaded");
                Arc::from(text)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(template = %id, "no template file, using built-in");
                Arc::from(BUILTIN_TEMPLATE)
            }
            Err(err) => {
                warn!(template = %id, path = %path.display(), %err, "template unreadable, using built-in");
                Arc::from(BUILTIN_TEMPLATE)
            }
        }
    }

    /// Ids of the template files present, sorted.
    pub fn available(&self) -> Vec<TemplateId> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut ids: Vec<_> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "html"))
            .filter_map(|p| {
                p.file_stem()
                    .and_then(|s| TemplateId::new(s.to_string_lossy()).ok())
            })
            .collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }
}

impl TemplateRenderer for TemplateSet {
    fn render(&self, template: &TemplateId, markup: &str, variables: &Variables) -> String {
        expand_placeholders(&self.source(template), markup, variables)
    }

    fn invalidate(&self) {
        self.cache.lock().clear();
    }
}

/// The built-in page only, ignoring the template id.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinTemplate;

impl TemplateRenderer for BuiltinTemplate {
    fn render(&self, _template: &TemplateId, markup: &str, variables: &Variables) -> String {
        expand_placeholders(BUILTIN_TEMPLATE, markup, variables)
    }
}

/// Make relative links in `page` resolve against `base_dir` by injecting a
/// `<base>` element as the first child of `<head>`. A page without a head
/// gets one.
pub fn decorate_preview(page: &str, base_dir: &Path) -> String {
    let base = format!("<base href=\"{}\">", file_url(base_dir));
    if let Some(at) = find_tag_open(page, "<head").and_then(|i| tag_end(page, i)) {
        return format!("{}{base}{}", &page[..at], &page[at..]);
    }
    if let Some(at) = find_tag_open(page, "<html").and_then(|i| tag_end(page, i)) {
        return format!("{}<head>{base}</head>{}", &page[..at], &page[at..]);
    }
    format!("<head>{base}</head>{page}")
}

fn tag_end(page: &str, start: usize) -> Option<usize> {
    page[start..].find('>').map(|close| start + close + 1)
}

/// Position of `tag` (e.g. `<head`) followed by `>` or whitespace, ignoring
/// ASCII case.
fn find_tag_open(page: &str, tag: &str) -> Option<usize> {
    let lower = page.to_ascii_lowercase();
    let mut from = 0;
    while let Some(found) = lower[from..].find(tag) {
        let at = from + found;
        let next = lower.as_bytes().get(at + tag.len()).copied();
        if matches!(next, Some(b'>' | b' ' | b'\t' | b'\n' | b'\r')) {
            return Some(at);
        }
        from = at + tag.len();
    }
    None
}

fn file_url(dir: &Path) -> String {
    let mut path = dir.to_string_lossy().replace('\\', "/");
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    if !path.ends_with('/') {
        path.push('/');
    }
    format!("file://{}", path.replace(' ', "%20").replace('"', "%22"))
}

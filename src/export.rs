//! Static site export.
//!
//! Mirrors the project into `<root>/target`: markdown documents become
//! templated HTML pages, every other file is copied as is.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::document::{
    MarkdownCompiler, TemplateId, TemplateRenderer, is_markdown, split_front_matter,
};

/// Output directory, relative to the project root.
pub const TARGET_DIR: &str = "target";
/// Template directory, relative to the project root.
pub const TEMPLATES_DIR: &str = "templates";

/// Whether bulk traversals skip a directory with this name.
pub fn is_reserved_dir(name: &str) -> bool {
    name == TARGET_DIR || name == TEMPLATES_DIR
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportFailure {
    pub path: PathBuf,
    pub error: String,
}

/// What an export produced, with paths relative to the project root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    pub target: PathBuf,
    pub pages: Vec<PathBuf>,
    pub copied: Vec<PathBuf>,
    pub failures: Vec<ExportFailure>,
}

impl ExportReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Export the project at `root`.
///
/// A document picks its template from a `template` front matter entry,
/// falling back to `template`. Failures on single files are recorded in the
/// report and do not stop the walk.
///
/// # Errors
///
/// Fails if `root` is not a directory or the target directory cannot be
/// created.
pub fn export_site(
    root: &Path,
    compiler: &impl MarkdownCompiler,
    renderer: &impl TemplateRenderer,
    template: &TemplateId,
) -> Result<ExportReport> {
    if !root.is_dir() {
        bail!("Project root {} is not a directory", root.display());
    }
    let target = root.join(TARGET_DIR);
    fs::create_dir_all(&target)
        .with_context(|| format!("Failed to create {}", target.display()))?;

    let mut report = ExportReport {
        target: target.clone(),
        ..ExportReport::default()
    };

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !(e.file_type().is_dir() && is_reserved_dir(&e.file_name().to_string_lossy()))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                warn!(path = %path.display(), %err, "export walk error");
                report.failures.push(ExportFailure {
                    path,
                    error: err.to_string(),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let source = entry.path();
        let Ok(relative) = source.strip_prefix(root) else {
            continue;
        };

        let outcome = if is_markdown(source) {
            let page_rel = relative.with_extension("html");
            export_page(source, &target.join(&page_rel), compiler, renderer, template)
                .map(|()| report.pages.push(page_rel))
        } else {
            copy_file(source, &target.join(relative)).map(|()| report.copied.push(relative.to_path_buf()))
        };
        if let Err(err) = outcome {
            warn!(path = %source.display(), error = %format!("{err:#}"), "export failed");
            report.failures.push(ExportFailure {
                path: relative.to_path_buf(),
                error: format!("{err:#}"),
            });
        }
    }

    info!(
        root = %root.display(),
        pages = report.pages.len(),
        copied = report.copied.len(),
        failures = report.failures.len(),
        "site exported"
    );
    Ok(report)
}

fn export_page(
    source: &Path,
    dest: &Path,
    compiler: &impl MarkdownCompiler,
    renderer: &impl TemplateRenderer,
    fallback: &TemplateId,
) -> Result<()> {
    let bytes = fs::read(source).with_context(|| format!("Failed to read {}", source.display()))?;
    let text = String::from_utf8_lossy(&bytes);
    let (mut variables, body) = split_front_matter(&text);
    let markup = compiler.compile(body);

    let template = variables
        .get("template")
        .and_then(|id| TemplateId::new(id.as_str()).ok())
        .unwrap_or_else(|| fallback.clone());
    if let Some(stem) = source.file_stem() {
        variables
            .entry("title".to_string())
            .or_insert_with(|| stem.to_string_lossy().to_string());
    }
    let page = renderer.render(&template, &markup, &variables);

    ensure_parent(dest)?;
    fs::write(dest, page).with_context(|| format!("Failed to write {}", dest.display()))?;
    debug!(source = %source.display(), %template, "page rendered");
    Ok(())
}

fn copy_file(source: &Path, dest: &Path) -> Result<()> {
    ensure_parent(dest)?;
    fs::copy(source, dest).with_context(|| {
        format!("Failed to copy {} to {}", source.display(), dest.display())
    })?;
    Ok(())
}

fn ensure_parent(dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ComrakCompiler, TemplateSet};
    use tempfile::tempdir;

    fn project() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("index.md"), "# Home").unwrap();
        fs::create_dir_all(root.join("posts/assets")).unwrap();
        fs::write(
            root.join("posts/first.md"),
            "---\ntitle: First\ntemplate: Post\n---\nHello",
        )
        .unwrap();
        fs::write(root.join("posts/assets/logo.png"), [1u8, 2, 3]).unwrap();
        fs::create_dir_all(root.join("templates")).unwrap();
        fs::write(
            root.join("templates/Post.html"),
            "<article><h1>{{ title }}</h1>{{ main }}</article>",
        )
        .unwrap();
        dir
    }

    fn export(root: &Path) -> ExportReport {
        export_site(
            root,
            &ComrakCompiler,
            &TemplateSet::new(root.join(TEMPLATES_DIR)),
            &TemplateId::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_export_renders_pages_and_copies_assets() {
        let dir = project();
        let root = dir.path();
        let report = export(root);

        assert!(report.is_clean(), "{:?}", report.failures);
        assert_eq!(
            report.pages,
            vec![PathBuf::from("index.html"), PathBuf::from("posts/first.html")]
        );
        assert_eq!(report.copied, vec![PathBuf::from("posts/assets/logo.png")]);

        let index = fs::read_to_string(root.join("target/index.html")).unwrap();
        assert!(index.contains("<h1>Home</h1>"));
        assert!(index.contains("<title>index</title>"));

        let post = fs::read_to_string(root.join("target/posts/first.html")).unwrap();
        assert_eq!(post, "<article><h1>First</h1><p>Hello</p>\n</article>");

        assert_eq!(
            fs::read(root.join("target/posts/assets/logo.png")).unwrap(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_export_skips_reserved_dirs_at_any_depth() {
        let dir = project();
        let root = dir.path();
        fs::create_dir_all(root.join("posts/templates")).unwrap();
        fs::write(root.join("posts/templates/skip.md"), "# no").unwrap();
        export(root);
        let again = export(root);

        assert!(!root.join("target/templates").exists());
        assert!(!root.join("target/posts/templates").exists());
        assert!(!root.join("target/target").exists());
        assert_eq!(again.pages.len(), 2);
    }

    #[test]
    fn test_export_missing_root_fails() {
        let dir = tempdir().unwrap();
        let result = export_site(
            &dir.path().join("gone"),
            &ComrakCompiler,
            &TemplateSet::new(dir.path()),
            &TemplateId::default(),
        );
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_is_reported_not_fatal() {
        use std::os::unix::fs::PermissionsExt;

        let dir = project();
        let root = dir.path();
        let locked = root.join("locked.md");
        fs::write(&locked, "# secret").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read(&locked).is_ok() {
            // Running as root; permissions are not enforced.
            return;
        }

        let report = export(root);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, PathBuf::from("locked.md"));
        assert_eq!(report.pages.len(), 2);
    }

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved_dir("target"));
        assert!(is_reserved_dir("templates"));
        assert!(!is_reserved_dir("posts"));
    }
}

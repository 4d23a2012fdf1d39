use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::browser::BrowserOptions;
use crate::document::TemplateId;
use crate::watcher::{WatchBackend, WatchPolicy};

/// Auto-save period when none is configured.
pub const DEFAULT_AUTOSAVE_MS: u64 = 2500;
/// Rescan interval of the polling watch backend when none is configured.
pub const DEFAULT_POLL_MS: u64 = 1000;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigFlags {
    pub root: Option<PathBuf>,
    pub template: Option<String>,
    pub autosave_ms: Option<u64>,
    pub eager_watch: bool,
    pub poll_watch: bool,
    pub poll_ms: Option<u64>,
    pub sort: bool,
    pub debug_log: Option<PathBuf>,
}

impl ConfigFlags {
    /// `other` wins for valued options; switches are on if either sets them.
    pub fn union(&self, other: &Self) -> Self {
        Self {
            root: other.root.clone().or_else(|| self.root.clone()),
            template: other.template.clone().or_else(|| self.template.clone()),
            autosave_ms: other.autosave_ms.or(self.autosave_ms),
            eager_watch: self.eager_watch || other.eager_watch,
            poll_watch: self.poll_watch || other.poll_watch,
            poll_ms: other.poll_ms.or(self.poll_ms),
            sort: self.sort || other.sort,
            debug_log: other.debug_log.clone().or_else(|| self.debug_log.clone()),
        }
    }
}

pub fn global_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("quillpad").join("config");
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("quillpad")
                .join("config");
        }
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join("quillpad").join("config");
        }
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home)
                .join(".config")
                .join("quillpad")
                .join("config");
        }
    }

    PathBuf::from(".quillpadrc")
}

pub fn local_override_path() -> PathBuf {
    PathBuf::from(".quillpadrc")
}

/// Project root used when none is configured: `~/.quillpad`.
pub fn default_root() -> PathBuf {
    let home = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE"));
    home.map_or_else(|| PathBuf::from(".quillpad"), |h| PathBuf::from(h).join(".quillpad"))
}

pub fn load_config_flags(path: &Path) -> Result<ConfigFlags> {
    if !path.exists() {
        return Ok(ConfigFlags::default());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let tokens = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .flat_map(|line| line.split_whitespace().map(ToOwned::to_owned))
        .collect::<Vec<_>>();
    Ok(parse_flag_tokens(&tokens))
}

pub fn save_config_flags(path: &Path, flags: &ConfigFlags) -> Result<()> {
    let mut lines = vec!["# quillpad defaults (saved with --save)".to_string()];
    if let Some(root) = &flags.root {
        lines.push(format!("--root {}", root.display()));
    }
    if let Some(template) = &flags.template {
        lines.push(format!("--template {template}"));
    }
    if let Some(ms) = flags.autosave_ms {
        lines.push(format!("--autosave-ms {ms}"));
    }
    if flags.eager_watch {
        lines.push("--eager-watch".to_string());
    }
    if flags.poll_watch {
        lines.push("--poll-watch".to_string());
    }
    if let Some(ms) = flags.poll_ms {
        lines.push(format!("--poll-ms {ms}"));
    }
    if flags.sort {
        lines.push("--sort".to_string());
    }
    if let Some(path) = &flags.debug_log {
        lines.push(format!("--debug-log {}", path.display()));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config dir {}", parent.display()))?;
    }
    fs::write(path, format!("{}\n", lines.join("\n")))
        .with_context(|| format!("Failed to write config {}", path.display()))
}

pub fn clear_config_flags(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    Ok(())
}

/// Pick the known flags out of an argument list. Unknown tokens and
/// unparsable numbers are ignored.
pub fn parse_flag_tokens(tokens: &[String]) -> ConfigFlags {
    let mut flags = ConfigFlags::default();
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i].as_str();
        let (name, inline) = match token.split_once('=') {
            Some((name, value)) if name.starts_with("--") => (name, Some(value)),
            _ => (token, None),
        };
        let mut value = || {
            inline.map(ToOwned::to_owned).or_else(|| {
                let next = tokens.get(i + 1).cloned();
                if next.is_some() {
                    i += 1;
                }
                next
            })
        };
        match name {
            "--eager-watch" => flags.eager_watch = true,
            "--poll-watch" => flags.poll_watch = true,
            "--sort" => flags.sort = true,
            "--root" => flags.root = value().map(PathBuf::from),
            "--template" => flags.template = value(),
            "--autosave-ms" => flags.autosave_ms = value().and_then(|v| v.parse().ok()),
            "--poll-ms" => flags.poll_ms = value().and_then(|v| v.parse().ok()),
            "--debug-log" => flags.debug_log = value().map(PathBuf::from),
            _ => {}
        }
        i += 1;
    }
    flags
}

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub root: PathBuf,
    pub template: TemplateId,
    pub autosave_period: Duration,
    pub watch_policy: WatchPolicy,
    pub watch_backend: WatchBackend,
    pub sort_entries: bool,
    pub debug_log: Option<PathBuf>,
}

impl Settings {
    /// Apply defaults to `flags`.
    ///
    /// # Errors
    ///
    /// Fails on an invalid template id or a zero period.
    pub fn resolve(flags: &ConfigFlags) -> Result<Self> {
        let template = match &flags.template {
            Some(id) => TemplateId::new(id.as_str()).context("Invalid --template")?,
            None => TemplateId::default(),
        };
        let autosave_ms = flags.autosave_ms.unwrap_or(DEFAULT_AUTOSAVE_MS);
        if autosave_ms == 0 {
            bail!("--autosave-ms must be greater than zero");
        }
        let watch_backend = if flags.poll_watch {
            let poll_ms = flags.poll_ms.unwrap_or(DEFAULT_POLL_MS);
            if poll_ms == 0 {
                bail!("--poll-ms must be greater than zero");
            }
            WatchBackend::Poll(Duration::from_millis(poll_ms))
        } else {
            WatchBackend::Native
        };
        Ok(Self {
            root: flags.root.clone().unwrap_or_else(default_root),
            template,
            autosave_period: Duration::from_millis(autosave_ms),
            watch_policy: if flags.eager_watch {
                WatchPolicy::Eager
            } else {
                WatchPolicy::Lazy
            },
            watch_backend,
            sort_entries: flags.sort,
            debug_log: flags.debug_log.clone(),
        })
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.root.join("templates")
    }

    pub const fn browser_options(&self) -> BrowserOptions {
        BrowserOptions {
            backend: self.watch_backend,
            policy: self.watch_policy,
            sort_entries: self.sort_entries,
        }
    }

    /// Create the root and its templates directory if missing. Returns
    /// whether the root had to be created.
    pub fn ensure_root(&self) -> Result<bool> {
        let created = !self.root.exists();
        fs::create_dir_all(self.templates_dir())
            .with_context(|| format!("Failed to create project root {}", self.root.display()))?;
        if !self.root.is_dir() {
            bail!("Project root {} is not a directory", self.root.display());
        }
        if created {
            tracing::info!(root = %self.root.display(), "created project root");
        }
        Ok(created)
    }
}

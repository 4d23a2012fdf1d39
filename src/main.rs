//! Quillpad - live project tree and markdown preview pipeline.
//!
//! # Usage
//!
//! ```bash
//! quillpad ~/site
//! quillpad ~/site --open notes.md --template Blog
//! quillpad ~/site --follow
//! quillpad --export --json
//! ```

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, warn};

use quillpad::autosave::Ticker;
use quillpad::browser::{AppliedChange, ProjectBrowser};
use quillpad::config::{
    ConfigFlags, Settings, clear_config_flags, global_config_path, load_config_flags,
    local_override_path, parse_flag_tokens, save_config_flags,
};
use quillpad::document::{ComrakCompiler, DocumentPipeline, TemplateSet, TickOutcome};
use quillpad::export::export_site;

/// Live project tree and markdown preview pipeline
#[derive(Parser, Debug)]
#[command(name = "quillpad", version, about, long_about = None)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Project root (overrides --root and saved defaults)
    #[arg(value_name = "ROOT")]
    root: Option<PathBuf>,

    /// Select a document and print its preview
    #[arg(long, value_name = "FILE")]
    open: Option<PathBuf>,

    /// Keep running: apply tree changes and auto-save the open document
    #[arg(long)]
    follow: bool,

    /// Print the tree (or export report) as JSON
    #[arg(long)]
    json: bool,

    /// Export the project to <root>/target and exit
    #[arg(long)]
    export: bool,

    /// Default project root
    #[arg(long = "root", value_name = "PATH")]
    root_flag: Option<PathBuf>,

    /// Template id used for previews
    #[arg(long, value_name = "ID")]
    template: Option<String>,

    /// Auto-save period in milliseconds
    #[arg(long, value_name = "MS")]
    autosave_ms: Option<u64>,

    /// Watch new directories as soon as they appear
    #[arg(long)]
    eager_watch: bool,

    /// Use the polling watch backend
    #[arg(long)]
    poll_watch: bool,

    /// Polling interval in milliseconds
    #[arg(long, value_name = "MS")]
    poll_ms: Option<u64>,

    /// List directories first, then by name
    #[arg(long)]
    sort: bool,

    /// Write debug-level logs to a file
    #[arg(long, value_name = "PATH")]
    debug_log: Option<PathBuf>,

    /// Save current command-line flags as defaults
    #[arg(long)]
    save: bool,

    /// Clear saved defaults
    #[arg(long)]
    clear: bool,
}

fn init_logging(debug_log: Option<&Path>) -> Result<()> {
    if let Some(path) = debug_log {
        let file = File::create(path)
            .with_context(|| format!("Failed to open debug log {}", path.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive(tracing::Level::DEBUG.into()),
            )
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive(tracing::Level::WARN.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

fn resolve_document(root: &Path, file: &Path) -> PathBuf {
    if file.is_relative() && !file.exists() {
        root.join(file)
    } else {
        file.to_path_buf()
    }
}

fn print_change(change: &AppliedChange) {
    match change {
        AppliedChange::Added { path, is_dir: true } => println!("+ {}/", path.display()),
        AppliedChange::Added { path, .. } => println!("+ {}", path.display()),
        AppliedChange::Removed { path } => println!("- {}", path.display()),
        AppliedChange::NotWatched { path, reason } => {
            println!("? {}/ not watched ({reason})", path.display());
        }
        AppliedChange::WentStale { reason } => {
            println!("! live sync stopped ({reason}); tree is now a snapshot");
        }
    }
}

fn main() -> Result<()> {
    let raw_args = std::env::args().collect::<Vec<_>>();
    let cli = Cli::parse();
    let global_path = global_config_path();
    let local_path = local_override_path();
    let cli_flags = parse_flag_tokens(&raw_args);

    if cli.clear {
        clear_config_flags(&global_path)?;
    }
    if cli.save {
        save_config_flags(&global_path, &cli_flags)?;
    }

    let file_flags = if cli.clear {
        ConfigFlags::default()
    } else {
        let global_flags = load_config_flags(&global_path)?;
        let local_flags = load_config_flags(&local_path)?;
        global_flags.union(&local_flags)
    };
    let mut effective = file_flags.union(&cli_flags);
    if let Some(root) = cli.root.clone() {
        effective.root = Some(root);
    }

    init_logging(effective.debug_log.as_deref())?;
    let settings = Settings::resolve(&effective)?;
    settings.ensure_root()?;
    debug!(?settings, "settings resolved");

    if cli.export {
        let report = export_site(
            &settings.root,
            &ComrakCompiler,
            &TemplateSet::new(settings.templates_dir()),
            &settings.template,
        )?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!(
                "exported {} pages, copied {} files to {}",
                report.pages.len(),
                report.copied.len(),
                report.target.display()
            );
            for failure in &report.failures {
                println!("failed {}: {}", failure.path.display(), failure.error);
            }
        }
        return Ok(());
    }

    let mut browser = ProjectBrowser::open(&settings.root, settings.browser_options());
    browser
        .expand_root()
        .with_context(|| format!("Failed to list {}", settings.root.display()))?;
    let snapshot = browser.root().snapshot();
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print!("{}", snapshot.to_text());
    }

    let mut pipeline =
        DocumentPipeline::on_disk(settings.templates_dir()).with_template(settings.template.clone());
    if let Some(file) = &cli.open {
        let path = resolve_document(&settings.root, file);
        pipeline
            .select(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        if let Some(preview) = pipeline.preview() {
            println!("{}", preview.display);
        }
    }

    if !cli.follow {
        return Ok(());
    }

    let (_ticker, ticks) =
        Ticker::spawn(settings.autosave_period).context("Failed to start auto-save timer")?;
    loop {
        for change in browser.wait_for_changes(Duration::from_millis(200)) {
            print_change(&change);
        }
        while ticks.try_recv().is_ok() {
            match pipeline.tick() {
                TickOutcome::Saved { revision } => debug!(revision, "auto-saved"),
                TickOutcome::Failed(err) => debug!(%err, "auto-save failed"),
                TickOutcome::Skipped => warn!("open document is gone; not saving"),
                TickOutcome::Idle | TickOutcome::Clean | TickOutcome::InFlight => {}
            }
        }
    }
}

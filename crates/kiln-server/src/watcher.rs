//! notify-backed watchers.
//!
//! [`ProjectWatcher`] feeds source edits to the change orchestrator.
//! [`ConfigWatcher`] signals the supervisor when the config file or one of
//! the env files is touched. Both stop when dropped.

use crate::error::ServerError;
use kiln_core::config::CONFIG_FILE;
use notify::{
    event::ModifyKind,
    Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Extensions whose edits reach the orchestrator.
const WATCHED_EXTENSIONS: &[&str] = &[
    "ts", "tsx", "js", "jsx", "mjs", "cjs", "mts", "cts", "vue", "svelte", "astro", "css",
    "scss", "sass", "less", "styl", "stylus", "json", "html",
];

/// Directory names whose contents never reach the orchestrator.
const IGNORED_DIRS: &[&str] = &["node_modules", "target", "dist", "build"];

/// Check if a path under `root` should be ignored by the project watcher.
///
/// Only the part below `root` is inspected, so a project living inside a
/// directory called `build` is still watched. Hidden files and anything in
/// a hidden directory are ignored.
pub fn should_ignore(root: &Path, path: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components().any(|component| match component {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            name.starts_with('.') || IGNORED_DIRS.contains(&name.as_ref())
        }
        _ => false,
    })
}

/// Sources handed to the orchestrator. The config file is left to the
/// config watcher.
fn is_watched_source(root: &Path, path: &Path) -> bool {
    !should_ignore(root, path)
        && path.file_name().is_some_and(|name| name != CONFIG_FILE)
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| WATCHED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Content and name changes. Access and metadata-only events are skipped.
fn should_process_event(event: &Event) -> bool {
    match &event.kind {
        EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any | ModifyKind::Name(_)) => true,
        _ => false,
    }
}

/// Recursive watcher over the project root.
pub struct ProjectWatcher {
    _watcher: RecommendedWatcher,
}

impl ProjectWatcher {
    /// Send every changed source path under `root` to `tx`. Paths repeated
    /// within one notify event are sent once.
    pub fn start(root: &Path, tx: mpsc::Sender<PathBuf>) -> Result<Self, ServerError> {
        let project = root.to_path_buf();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if !should_process_event(&event) {
                        return;
                    }
                    let mut seen = HashSet::new();
                    for path in event.paths {
                        if is_watched_source(&project, &path) && seen.insert(path.clone()) {
                            debug!(path = %path.display(), "source changed");
                            if tx.blocking_send(path).is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(e) => error!(error = %e, "watch error"),
            },
            Config::default(),
        )
        .map_err(|source| ServerError::Watch {
            path: root.to_path_buf(),
            source,
        })?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|source| ServerError::Watch {
                path: root.to_path_buf(),
                source,
            })?;
        info!(root = %root.display(), "watching project");
        Ok(Self { _watcher: watcher })
    }
}

/// Non-recursive watcher over the directories holding the config files.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Signal `tx` whenever a file named like one of `files` changes in one
    /// of their directories. Bursts collapse into one pending signal.
    pub fn start(files: &[PathBuf], tx: mpsc::Sender<()>) -> Result<Self, ServerError> {
        let names: HashSet<OsString> = files
            .iter()
            .filter_map(|f| f.file_name().map(ToOwned::to_owned))
            .collect();
        let mut dirs: Vec<PathBuf> = files
            .iter()
            .filter_map(|f| f.parent().map(Path::to_path_buf))
            .collect();
        dirs.sort();
        dirs.dedup();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    let relevant = should_process_event(&event)
                        && event
                            .paths
                            .iter()
                            .any(|p| p.file_name().is_some_and(|n| names.contains(n)));
                    if relevant {
                        debug!(paths = ?event.paths, "config input changed");
                        let _ = tx.try_send(());
                    }
                }
                Err(e) => error!(error = %e, "config watch error"),
            },
            Config::default(),
        )
        .map_err(|source| ServerError::Watch {
            path: dirs.first().cloned().unwrap_or_default(),
            source,
        })?;

        for dir in &dirs {
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .map_err(|source| ServerError::Watch {
                    path: dir.clone(),
                    source,
                })?;
        }
        debug!(dirs = dirs.len(), files = files.len(), "watching config inputs");
        Ok(Self { _watcher: watcher })
    }
}

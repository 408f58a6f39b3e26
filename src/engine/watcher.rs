//! Filesystem observation: raw notify events in, project-relative
//! `FileChange`s out.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::event::{EventKind, ModifyKind, RemoveKind};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::engine::parser::MAX_FILE_SIZE;
use crate::error::ContextError;
use crate::models::change::{ChangeKind, FileChange};

/// Include/exclude globs evaluated against project-relative paths.
#[derive(Debug, Clone)]
pub struct PathFilter {
    watch: GlobSet,
    ignored: GlobSet,
}

fn build_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            ContextError::invalid_config(format!("Invalid glob {pattern:?}: {e}"))
        })?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

impl PathFilter {
    pub fn new(watch: &[String], ignored: &[String]) -> Result<Self> {
        Ok(Self {
            watch: build_set(watch)?,
            ignored: build_set(ignored)?,
        })
    }

    pub fn matches(&self, rel: &str) -> bool {
        self.watch.is_match(rel) && !self.ignored.is_match(rel)
    }
}

/// Project-relative, `/`-separated form of `path`, if it lies under `root`.
pub fn relative_to(root: &Utf8Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root.as_std_path()).ok()?;
    let rel = Utf8Path::from_path(rel)?;
    let joined = rel
        .components()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join("/");
    if joined.is_empty() { None } else { Some(joined) }
}

/// Map one notify event to zero or more changes under `root`.
fn changes_from_event(root: &Utf8Path, filter: &PathFilter, event: &Event) -> Vec<FileChange> {
    let mut out = Vec::new();
    for path in &event.paths {
        let kind = match event.kind {
            EventKind::Create(_) => ChangeKind::Added,
            // rename halves arrive as Name events; where the path ended up decides
            EventKind::Modify(ModifyKind::Name(_)) => {
                if path.exists() {
                    ChangeKind::Added
                } else {
                    ChangeKind::Deleted
                }
            }
            EventKind::Modify(ModifyKind::Metadata(_)) => continue,
            EventKind::Modify(_) => ChangeKind::Modified,
            EventKind::Remove(RemoveKind::Folder) => continue,
            EventKind::Remove(_) => ChangeKind::Deleted,
            _ => continue,
        };

        if kind != ChangeKind::Deleted && path.is_dir() {
            continue;
        }
        let Some(rel) = relative_to(root, path) else {
            continue;
        };
        if !filter.matches(&rel) {
            continue;
        }

        let change = FileChange::new(kind, rel);
        let change = match kind {
            ChangeKind::Deleted => change,
            _ => match std::fs::metadata(path) {
                Ok(meta) if meta.len() <= MAX_FILE_SIZE => match std::fs::read(path) {
                    Ok(bytes) => change.with_content(&bytes),
                    // gone again before we could read it; the analyzer decides
                    Err(_) => change,
                },
                _ => change,
            },
        };
        out.push(change);
    }
    out
}

/// Live recursive watch over a project root. Dropping it stops observation.
pub struct ChangeWatcher {
    _watcher: RecommendedWatcher,
    root: Utf8PathBuf,
}

impl ChangeWatcher {
    /// Begin observing `root` (already canonical). Matching changes go to
    /// `events`; watch primitive errors go to `on_error` and watching continues.
    pub fn watch(
        root: &Utf8Path,
        filter: PathFilter,
        events: UnboundedSender<FileChange>,
        on_error: impl Fn(String) + Send + 'static,
    ) -> Result<Self> {
        let event_root = root.to_path_buf();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for change in changes_from_event(&event_root, &filter, &event) {
                    debug!(path = %change.path, kind = ?change.kind, "fs change");
                    if events.send(change).is_err() {
                        // receiver gone: the orchestrator is stopping
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "watch error");
                on_error(e.to_string());
            }
        })
        .map_err(|e| ContextError::new(crate::error::ErrorCode::WatchError, e.to_string()))?;

        watcher
            .watch(root.as_std_path(), RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {root}"))?;

        Ok(Self {
            _watcher: watcher,
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }
}

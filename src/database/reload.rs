//! Re-import sequencing records when the runs tree changes on disk.

use super::{import, ReloadSummary, RunDatabase};
use notify::event::{CreateKind, EventKind, ModifyKind, RemoveKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What kind of entry an event path refers to, as far as the event tells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    File,
    Folder,
    Unknown,
}

/// Watches `<output>/runs` and swaps the database's sequencing entries for a
/// fresh import whenever a run or its directories appear or disappear.
pub struct RunsDirWatcher {
    root: PathBuf,
    database: Arc<RunDatabase>,
    refresh: Arc<AtomicBool>,
    rewrite: bool,
}

impl RunsDirWatcher {
    pub fn new(
        root: impl Into<PathBuf>,
        database: Arc<RunDatabase>,
        refresh: Arc<AtomicBool>,
        rewrite: bool,
    ) -> Self {
        Self {
            root: root.into(),
            database,
            refresh,
            rewrite,
        }
    }

    /// Number of path components below the root, `None` outside it.
    fn depth(&self, path: &Path) -> Option<usize> {
        let rel = path.strip_prefix(&self.root).ok()?;
        Some(rel.components().count())
    }

    fn is_relevant(&self, path: &Path, kind: Kind) -> bool {
        let Some(depth) = self.depth(path) else {
            return false;
        };
        let json = path.extension().is_some_and(|e| e == "json");
        match kind {
            Kind::Folder => (1..=2).contains(&depth),
            Kind::File => depth == import::RECORD_DEPTH && json,
            Kind::Unknown => {
                ((1..=2).contains(&depth) && !json) || (depth == import::RECORD_DEPTH && json)
            }
        }
    }

    /// Whether `event` changes which records exist.
    pub fn triggers_reload(&self, event: &notify::Event) -> bool {
        let any = |kind: Kind| event.paths.iter().any(|p| self.is_relevant(p, kind));
        match &event.kind {
            EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => {
                any(Kind::Folder)
            }
            EventKind::Create(CreateKind::File) | EventKind::Remove(RemoveKind::File) => {
                any(Kind::File)
            }
            EventKind::Create(_) => event.paths.iter().any(|p| {
                let kind = if p.is_dir() { Kind::Folder } else { Kind::File };
                self.is_relevant(p, kind)
            }),
            EventKind::Remove(_) => any(Kind::Unknown),
            EventKind::Modify(ModifyKind::Name(mode)) => self.rename_triggers(*mode, &event.paths),
            _ => false,
        }
    }

    fn rename_triggers(&self, mode: RenameMode, paths: &[PathBuf]) -> bool {
        let kind_of = |p: &Path| {
            if p.is_dir() {
                Kind::Folder
            } else if p.exists() {
                Kind::File
            } else {
                Kind::Unknown
            }
        };
        match (mode, paths) {
            (RenameMode::Both, [from, to, ..]) => {
                let kind = kind_of(to);
                let same_depth = self.depth(to).is_some() && self.depth(to) == self.depth(from);
                if same_depth {
                    self.is_relevant(from, kind) || self.is_relevant(to, kind)
                } else {
                    // Moved out of the tree or to another level: a removal
                    self.is_relevant(from, Kind::Unknown) || self.is_relevant(to, kind)
                }
            }
            (_, paths) => paths.iter().any(|p| self.is_relevant(p, kind_of(p))),
        }
    }

    /// Drop all sequencing entries and import them again from disk.
    pub fn reload(&self) -> ReloadSummary {
        let entries = import::read_runs_dir(&self.root, self.rewrite);
        let summary = self.database.replace_sequencing(entries);
        self.refresh.store(true, Ordering::Relaxed);
        tracing::info!(
            dropped = summary.dropped,
            inserted = summary.inserted,
            conflicts = summary.conflicts,
            "Reloaded run records"
        );
        summary
    }

    pub fn handle_event(&self, event: &notify::Event) {
        if self.triggers_reload(event) {
            tracing::debug!(kind = ?event.kind, paths = ?event.paths, "Runs tree changed");
            self.reload();
        }
    }

    /// Start watching the runs root recursively.
    pub fn watch(self) -> notify::Result<RecommendedWatcher> {
        let root = self.root.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => self.handle_event(&event),
                Err(e) => tracing::warn!(error = %e, "Runs directory watch error"),
            }
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;
        tracing::info!(dir = %root.display(), "Watching runs directory");
        Ok(watcher)
    }
}

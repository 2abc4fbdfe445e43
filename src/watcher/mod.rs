//! Filesystem watching
//!
//! `SourceWatcher` turns notify events into reindexing. Modified files are handed to the service,
//! which reindexes every source depending on them. Removed files invalidate tasks still running
//! for them.

use crossbeam::channel::{self, Receiver, Sender};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::ignore::{IgnoreFilter, is_header_file, is_source_file};
use crate::service::RefactoringService;
use crate::ui::ProgressMessage;
use crate::Result;

/// Files touched by a batch of events.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub modified: BTreeSet<PathBuf>,
    pub removed: BTreeSet<PathBuf>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.removed.is_empty()
    }
}

pub struct SourceWatcher {
    root: PathBuf,
    service: Arc<RefactoringService>,
    filter: IgnoreFilter,
    debounce: Duration,
    messages: Option<Sender<ProgressMessage>>,
}

impl SourceWatcher {
    pub fn new(root: PathBuf, service: Arc<RefactoringService>, excludes: &[String]) -> Self {
        let filter = IgnoreFilter::new(&root, excludes);
        Self {
            root,
            service,
            filter,
            debounce: Duration::from_millis(200),
            messages: None,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Report every handled file to a progress display.
    pub fn with_messages(mut self, messages: Sender<ProgressMessage>) -> Self {
        self.messages = Some(messages);
        self
    }

    /// Watch until `stop` receives a message or is dropped.
    pub fn run(&self, stop: Receiver<()>) -> Result<()> {
        let (tx, rx) = channel::unbounded();
        let mut watcher = RecommendedWatcher::new(
            move |event: notify::Result<Event>| {
                let _ = tx.send(event);
            },
            Config::default(),
        )?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;
        info!("Watching {}", self.root.display());

        let mut pending = ChangeSet::default();
        loop {
            crossbeam::select! {
                recv(stop) -> _ => break,
                recv(rx) -> event => match event {
                    Ok(Ok(event)) => self.collect(event, &mut pending),
                    Ok(Err(e)) => warn!("Watch error: {}", e),
                    Err(_) => break,
                },
                default(self.debounce) => {
                    if !pending.is_empty() {
                        self.apply_logged(std::mem::take(&mut pending));
                    }
                }
            }
        }
        if !pending.is_empty() {
            self.apply_logged(pending);
        }
        Ok(())
    }

    fn apply_logged(&self, changes: ChangeSet) {
        if let Err(e) = self.apply(changes) {
            warn!("Failed to reindex changed files: {}", e);
            self.report(ProgressMessage::Error(e.to_string()));
        }
    }

    /// Fold one event into `pending`. A later event for the same path wins.
    pub fn collect(&self, event: Event, pending: &mut ChangeSet) {
        let removed = match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) => false,
            EventKind::Remove(_) => true,
            _ => return,
        };
        for path in event.paths {
            if !self.is_relevant(&path) {
                continue;
            }
            if removed || !path.exists() {
                pending.modified.remove(&path);
                pending.removed.insert(path);
            } else {
                pending.removed.remove(&path);
                pending.modified.insert(path);
            }
        }
    }

    fn is_relevant(&self, path: &Path) -> bool {
        (is_source_file(path) || is_header_file(path))
            && path.starts_with(&self.root)
            && !self.filter.is_ignored(path, false)
    }

    /// Hand a batch of changes to the service. Returns the number of reindexed sources.
    pub fn apply(&self, changes: ChangeSet) -> Result<usize> {
        if !changes.removed.is_empty() {
            let removed: Vec<PathBuf> = changes.removed.into_iter().collect();
            for path in &removed {
                self.report(ProgressMessage::FileDeleted(self.display(path)));
            }
            self.service.paths_removed(&removed)?;
        }

        if changes.modified.is_empty() {
            return Ok(0);
        }
        let modified: Vec<PathBuf> = changes.modified.into_iter().collect();
        for path in &modified {
            self.report(ProgressMessage::FileModified(self.display(path)));
        }
        let reindexed = self.service.paths_changed(&modified)?;
        debug!("{} changed files, {} sources reindexed", modified.len(), reindexed);
        Ok(reindexed)
    }

    fn report(&self, message: ProgressMessage) {
        if let Some(messages) = &self.messages {
            let _ = messages.send(message);
        }
    }

    fn display(&self, path: &Path) -> String {
        path.strip_prefix(&self.root).unwrap_or(path).display().to_string()
    }
}

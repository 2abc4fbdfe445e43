//! Coordinates project part updates: resolve dependencies, queue parse tasks for stale
//! sources and persist what the tasks collect.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use super::state::IndexerState;
use crate::dependencies::BuildDependenciesProvider;
use crate::freshness::{FileSystem, ModifiedTimeChecker};
use crate::frontend::SymbolsCollector;
use crate::project::{ProjectPartContainer, ProjectPartId};
use crate::scheduler::{QueuedTask, TaskQueue};
use crate::source::FilePathId;
use crate::storage::{
    BuildDependenciesStorage, Database, FilePathCache, PrecompiledHeaderStorage, ProjectPartsStorage,
    SymbolStorage,
};
use crate::{Error, Result};

type TaskKey = (FilePathId, ProjectPartId);

/// Generation per queued (source, project part). A task only persists its result while its
/// generation is still the current one; removing a source or project part invalidates it.
#[derive(Default)]
pub struct TaskGenerations {
    counter: AtomicU64,
    current: Mutex<HashMap<TaskKey, u64>>,
}

impl TaskGenerations {
    /// A generation never handed out before, now current for `key`.
    pub fn next(&self, key: TaskKey) -> Result<u64> {
        let generation = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.current
            .lock()
            .map_err(Error::poisoned("task generations"))?
            .insert(key, generation);
        Ok(generation)
    }

    pub fn is_current(&self, key: TaskKey, generation: u64) -> bool {
        self.current
            .lock()
            .map(|current| current.get(&key) == Some(&generation))
            .unwrap_or(false)
    }

    pub fn invalidate_project_parts(&self, parts: &[ProjectPartId]) {
        if let Ok(mut current) = self.current.lock() {
            current.retain(|(_, part), _| !parts.contains(part));
        }
    }

    pub fn invalidate_sources(&self, sources: &[FilePathId]) {
        if let Ok(mut current) = self.current.lock() {
            current.retain(|(source, _), _| !sources.contains(source));
        }
    }
}

/// The storage facets the coordinator writes through.
#[derive(Clone)]
pub struct IndexerStorages {
    pub build_dependencies: Arc<dyn BuildDependenciesStorage>,
    pub symbols: Arc<dyn SymbolStorage>,
    pub project_parts: Arc<dyn ProjectPartsStorage>,
    pub precompiled_headers: Arc<dyn PrecompiledHeaderStorage>,
}

pub struct SymbolIndexer {
    database: Arc<Database>,
    file_paths: Arc<FilePathCache>,
    storages: IndexerStorages,
    provider: BuildDependenciesProvider,
    checker: ModifiedTimeChecker<Arc<dyn FileSystem>>,
    queue: Arc<TaskQueue<SymbolsCollector>>,
    generations: Arc<TaskGenerations>,
    parts: Mutex<HashMap<ProjectPartId, ProjectPartContainer>>,
    state: Arc<Mutex<IndexerState>>,
}

impl SymbolIndexer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        database: Arc<Database>,
        file_paths: Arc<FilePathCache>,
        storages: IndexerStorages,
        provider: BuildDependenciesProvider,
        file_system: Arc<dyn FileSystem>,
        queue: Arc<TaskQueue<SymbolsCollector>>,
        state: Arc<Mutex<IndexerState>>,
    ) -> Self {
        Self {
            database,
            file_paths,
            storages,
            provider,
            checker: ModifiedTimeChecker::new(file_system),
            queue,
            generations: Arc::new(TaskGenerations::default()),
            parts: Mutex::new(HashMap::new()),
            state,
        }
    }

    pub fn state(&self) -> IndexerState {
        self.state.lock().map(|s| *s).unwrap_or(IndexerState::Aborted)
    }

    fn transition(&self, change: impl FnOnce(IndexerState) -> IndexerState) {
        if let Ok(mut state) = self.state.lock() {
            let next = change(*state);
            if next != *state {
                info!("Indexer state: {} -> {}", *state, next);
                *state = next;
            }
        }
    }

    /// After `abort` updates queue nothing and leave the indexer `Aborted`.
    fn refuse_if_aborted(&self) -> bool {
        if !self.queue.scheduler().is_disabled() {
            return false;
        }
        self.transition(|state| state.on_update().on_abort());
        debug!("Indexing was aborted, ignoring update");
        true
    }

    /// Bring the index of `parts` up to date. Returns the number of queued parse tasks.
    pub fn update_project_parts(&self, parts: Vec<ProjectPartContainer>) -> Result<usize> {
        if self.refuse_if_aborted() {
            return Ok(0);
        }
        self.file_paths.populate_if_empty()?;

        let mut queued = 0;
        for part in parts {
            queued += self.update_project_part(part)?;
        }

        if queued > 0 {
            self.queue.process_entries()?;
        } else if self.queue.pending_count() == 0 && self.queue.scheduler().in_flight() == 0 {
            self.transition(|state| state.on_update().on_finished());
        }
        Ok(queued)
    }

    fn update_project_part(&self, part: ProjectPartContainer) -> Result<usize> {
        let project_part_id = part.project_part_id;
        let changed = self.database.write(|conn| {
            let changed = self.storages.project_parts.update_project_part(conn, &part)?;
            self.storages.project_parts.update_project_part_sources(conn, &part)?;
            Ok(changed)
        })?;
        if changed {
            info!("Project part {} changed, reindexing all of its sources", project_part_id);
        }

        self.provider.create(&part)?;

        let stale = if changed {
            part.source_path_ids.clone()
        } else {
            self.stale_sources(&part)?
        };
        debug!(
            "Project part {}: {} of {} sources are stale",
            project_part_id,
            stale.len(),
            part.source_path_ids.len()
        );

        let tasks = stale
            .iter()
            .map(|source_id| self.create_task(*source_id, &part))
            .collect::<Result<Vec<_>>>()?;
        let count = tasks.len();
        if count > 0 {
            self.queue
                .add_or_update_tasks_with(tasks, || self.transition(IndexerState::on_update))?;
        }

        self.parts
            .lock()
            .map_err(Error::poisoned("project parts"))?
            .insert(project_part_id, part);
        Ok(count)
    }

    /// Sources whose recorded dependencies changed on disk, or that were indexed before the
    /// part's precompiled header was last built.
    fn stale_sources(&self, part: &ProjectPartContainer) -> Result<Vec<FilePathId>> {
        let project_part_id = part.project_part_id;
        let (depend_sources, pch_build_time) = self.database.read(|conn| {
            let mut depend_sources = Vec::with_capacity(part.source_path_ids.len());
            for source_id in &part.source_path_ids {
                let entries = self
                    .storages
                    .build_dependencies
                    .fetch_depend_sources(conn, *source_id, project_part_id)?;
                depend_sources.push((*source_id, entries));
            }
            let pch = self
                .storages
                .precompiled_headers
                .fetch_precompiled_header(conn, project_part_id)?;
            Ok((depend_sources, pch.and_then(|info| info.latest_build_time())))
        })?;

        Ok(depend_sources
            .into_iter()
            .filter(|(_, entries)| {
                let pch_is_newer = pch_build_time
                    .is_some_and(|built| entries.iter().any(|entry| entry.last_modified < built));
                pch_is_newer || !self.checker.is_up_to_date(entries)
            })
            .map(|(source_id, _)| source_id)
            .collect())
    }

    fn create_task(
        &self,
        source_id: FilePathId,
        part: &ProjectPartContainer,
    ) -> Result<QueuedTask<SymbolsCollector>> {
        let key = (source_id, part.project_part_id);
        let generation = self.generations.next(key)?;
        let arguments = part.command_line_arguments();
        let generations = Arc::clone(&self.generations);
        let database = Arc::clone(&self.database);
        let storages = self.storages.clone();

        Ok(QueuedTask::new(source_id, part.project_part_id, move |collector: &mut SymbolsCollector| {
            collector.set_file(source_id, arguments);
            if let Err(e) = collector.collect_symbols() {
                warn!("Failed to index source {}: {}", source_id, e);
                return;
            }
            if !generations.is_current(key, generation) {
                debug!("Discarding outdated result for source {}", source_id);
                return;
            }
            let stored = database.write(|conn| {
                storages.symbols.add_symbols_and_source_locations(
                    conn,
                    collector.symbols(),
                    collector.source_locations(),
                )?;
                storages
                    .build_dependencies
                    .insert_or_update_source_dependencies(conn, collector.source_dependencies())?;
                storages
                    .build_dependencies
                    .insert_or_update_used_macros(conn, collector.used_macros())?;
                storages
                    .build_dependencies
                    .insert_or_update_indexing_time_stamps(conn, collector.file_statuses())
            });
            match stored {
                Ok(()) => debug!("Indexed source {}", source_id),
                Err(e) => warn!("Failed to store symbols of source {}: {}", source_id, e),
            }
        }))
    }

    /// Reindex every source that includes one of the changed files, in every project part
    /// compiling it.
    pub fn paths_changed(&self, changed: &[FilePathId]) -> Result<usize> {
        if changed.is_empty() || self.refuse_if_aborted() {
            return Ok(0);
        }
        let targets: BTreeSet<(FilePathId, ProjectPartId)> = self.database.read(|conn| {
            let dependents = self
                .storages
                .build_dependencies
                .fetch_dependent_source_ids(conn, changed)?;
            let mut targets = BTreeSet::new();
            for source_id in dependents {
                for part in self
                    .storages
                    .build_dependencies
                    .fetch_project_part_ids_for_source(conn, source_id)?
                {
                    targets.insert((source_id, part));
                }
            }
            Ok(targets)
        })?;

        let tasks = {
            let parts = self.parts.lock().map_err(Error::poisoned("project parts"))?;
            targets
                .into_iter()
                .filter_map(|(source_id, part_id)| parts.get(&part_id).map(|part| (source_id, part)))
                .map(|(source_id, part)| self.create_task(source_id, part))
                .collect::<Result<Vec<_>>>()?
        };
        let count = tasks.len();
        if count > 0 {
            info!("{} sources depend on changed files", count);
            self.queue
                .add_or_update_tasks_with(tasks, || self.transition(IndexerState::on_update))?;
            self.queue.process_entries()?;
        }
        Ok(count)
    }

    /// Results of in-flight tasks for removed sources are discarded.
    pub fn sources_removed(&self, removed: &[FilePathId]) {
        if !removed.is_empty() {
            debug!("Invalidating tasks of {} removed sources", removed.len());
            self.generations.invalidate_sources(removed);
        }
    }

    /// Stop indexing the given parts. Stored data is kept.
    pub fn remove_project_parts(&self, ids: &[ProjectPartId]) -> Result<()> {
        let removed = self.queue.remove_tasks(ids)?;
        self.generations.invalidate_project_parts(ids);
        let mut parts = self.parts.lock().map_err(Error::poisoned("project parts"))?;
        for id in ids {
            parts.remove(id);
        }
        warn!(
            "Removed {} project parts ({} pending tasks dropped); their stored symbols are kept",
            ids.len(),
            removed
        );
        Ok(())
    }

    pub fn project_part(&self, id: ProjectPartId) -> Option<ProjectPartContainer> {
        self.parts.lock().ok().and_then(|parts| parts.get(&id).cloned())
    }

    pub fn queue(&self) -> &Arc<TaskQueue<SymbolsCollector>> {
        &self.queue
    }

    pub(crate) fn abort(&self) {
        self.transition(IndexerState::on_abort);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generations_supersede_and_invalidate() {
        let generations = TaskGenerations::default();
        let key = (FilePathId(1), ProjectPartId(1));
        let first = generations.next(key).unwrap();
        let second = generations.next(key).unwrap();

        assert!(!generations.is_current(key, first));
        assert!(generations.is_current(key, second));

        generations.invalidate_sources(&[FilePathId(1)]);
        assert!(!generations.is_current(key, second));
        // a task queued after the removal never revives an older one
        let revived = generations.next(key).unwrap();
        assert!(!generations.is_current(key, first));
        assert!(generations.is_current(key, revived));

        let third = generations.next((FilePathId(2), ProjectPartId(3))).unwrap();
        generations.invalidate_project_parts(&[ProjectPartId(3)]);
        assert!(!generations.is_current((FilePathId(2), ProjectPartId(3)), third));
    }
}

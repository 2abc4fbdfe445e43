//! Symbol indexing
//!
//! `SymbolIndexing` owns the pieces an indexing session needs: the worker pool running
//! `SymbolsCollector` processors, the task queue, the dependency provider and the coordinator
//! (`SymbolIndexer`) that ties them to the store.

pub mod state;
pub mod symbol_indexer;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::Result;
use crate::dependencies::{AliveSignal, BuildDependenciesProvider, BuildDependencyCollector};
use crate::freshness::{FileSystem, RealFileSystem};
use crate::frontend::SymbolsCollector;
use crate::generated_files::GeneratedFiles;
use crate::scheduler::{ProcessorManager, ProgressCounter, TaskQueue, TaskScheduler, default_worker_count};
use crate::storage::{
    Database, FilePathCache, SqliteBuildDependenciesStorage, SqlitePrecompiledHeaderStorage,
    SqliteProjectPartsStorage, SqliteSymbolStorage,
};

pub use state::IndexerState;
pub use symbol_indexer::{IndexerStorages, SymbolIndexer, TaskGenerations};

/// Knobs of an indexing session.
#[derive(Debug, Clone, Copy)]
pub struct IndexingOptions {
    pub worker_count: usize,
    pub alive_interval: Duration,
}

impl Default for IndexingOptions {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            alive_interval: Duration::from_millis(1000),
        }
    }
}

pub struct SymbolIndexing {
    indexer: SymbolIndexer,
    scheduler: Arc<TaskScheduler<SymbolsCollector>>,
}

impl SymbolIndexing {
    /// Wire an indexing session on top of `database`. `progress` receives
    /// `(completed, total)` parse task counts, `alive` is signalled during long dependency scans.
    pub fn new(
        database: Arc<Database>,
        file_paths: Arc<FilePathCache>,
        generated_files: Arc<GeneratedFiles>,
        options: IndexingOptions,
        progress: impl Fn(usize, usize) + Send + Sync + 'static,
        alive: impl Fn() + Send + Sync + 'static,
    ) -> Result<Self> {
        let collector_paths = Arc::clone(&file_paths);
        let manager = Arc::new(ProcessorManager::new(
            move || SymbolsCollector::new(Arc::clone(&collector_paths)),
            Arc::clone(&generated_files),
        ));
        let scheduler = Arc::new(TaskScheduler::new(manager, options.worker_count));

        let state = Arc::new(Mutex::new(IndexerState::default()));
        let progress_state = Arc::clone(&state);
        let counter = Arc::new(ProgressCounter::new(move |completed, total| {
            progress(completed, total);
            if completed == total {
                if let Ok(mut state) = progress_state.lock() {
                    let next = state.on_finished();
                    if next != *state {
                        debug!("Indexer state: {} -> {}", *state, next);
                        *state = next;
                    }
                }
            }
        }));
        let queue = TaskQueue::new(Arc::clone(&scheduler), counter)?;

        let storages = IndexerStorages {
            build_dependencies: Arc::new(SqliteBuildDependenciesStorage),
            symbols: Arc::new(SqliteSymbolStorage),
            project_parts: Arc::new(SqliteProjectPartsStorage),
            precompiled_headers: Arc::new(SqlitePrecompiledHeaderStorage),
        };
        let file_system: Arc<dyn FileSystem> = Arc::new(RealFileSystem::new(Arc::clone(&file_paths)));
        let provider = BuildDependenciesProvider::new(
            Arc::clone(&database),
            Arc::clone(&storages.build_dependencies),
            Arc::new(BuildDependencyCollector::new(Arc::clone(&file_paths), generated_files)),
            Arc::clone(&file_system),
            Arc::new(AliveSignal::new(options.alive_interval, alive)),
        );

        let indexer = SymbolIndexer::new(
            database,
            file_paths,
            storages,
            provider,
            file_system,
            queue,
            state,
        );
        Ok(Self { indexer, scheduler })
    }

    pub fn indexer(&self) -> &SymbolIndexer {
        &self.indexer
    }

    pub fn state(&self) -> IndexerState {
        self.indexer.state()
    }

    /// Block until every queued parse task has run.
    pub fn sync_tasks(&self) -> Result<()> {
        self.indexer.queue().sync_tasks()
    }

    /// Stop picking up parse tasks. Running tasks finish, pending ones are dropped and leave the
    /// progress total.
    pub fn abort(&self) -> Result<()> {
        self.scheduler.disable();
        self.indexer.abort();
        self.indexer.queue().sync_tasks()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{ProjectPartContainer, ProjectPartId};
    use crate::scheduler::QueuedTask;
    use crate::source::FilePathId;
    use crate::storage::{ProjectPartsStorage, SqliteProjectPartsStorage};
    use crate::symbol::SourceLocationKind;
    use crate::query::SymbolQuery;
    use std::fs::File;
    use std::time::SystemTime;

    struct Fixture {
        dir: tempfile::TempDir,
        database: Arc<Database>,
        file_paths: Arc<FilePathCache>,
        indexing: SymbolIndexing,
        reports: Arc<Mutex<Vec<(usize, usize)>>>,
    }

    fn fixture(files: &[(&str, &str)]) -> Fixture {
        fixture_with_workers(files, 2)
    }

    fn fixture_with_workers(files: &[(&str, &str)], worker_count: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        let database = Arc::new(Database::open(&dir.path().join("index.db")).unwrap());
        let file_paths = Arc::new(FilePathCache::new(Arc::clone(&database)));
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let indexing = SymbolIndexing::new(
            Arc::clone(&database),
            Arc::clone(&file_paths),
            Arc::new(GeneratedFiles::new()),
            IndexingOptions {
                worker_count,
                alive_interval: Duration::from_secs(1),
            },
            move |completed, total| sink.lock().unwrap().push((completed, total)),
            || {},
        )
        .unwrap();
        Fixture {
            dir,
            database,
            file_paths,
            indexing,
            reports,
        }
    }

    fn part(fixture: &Fixture, sources: &[&str]) -> ProjectPartContainer {
        named_part(fixture, "app", sources)
    }

    fn named_part(fixture: &Fixture, name: &str, sources: &[&str]) -> ProjectPartContainer {
        let id = fixture
            .database
            .write(|conn| SqliteProjectPartsStorage.fetch_project_part_id(conn, name))
            .unwrap();
        let ids = sources
            .iter()
            .map(|name| fixture.file_paths.file_path_id(&fixture.dir.path().join(name)).unwrap())
            .collect();
        ProjectPartContainer::new(id).with_sources(ids)
    }

    /// Occupy one worker until the returned sender is dropped.
    fn block_worker(fixture: &Fixture) -> crossbeam::channel::Sender<()> {
        let (release, blocked) = crossbeam::channel::bounded::<()>(0);
        let queue = fixture.indexing.indexer().queue();
        let blocker = QueuedTask::new(
            FilePathId(i64::MAX),
            ProjectPartId(i64::MAX),
            move |_: &mut SymbolsCollector| {
                let _ = blocked.recv();
            },
        );
        queue.add_or_update_tasks(vec![blocker]).unwrap();
        queue.process_entries().unwrap();
        assert_eq!(queue.scheduler().slot_usage().free, 0);
        release
    }

    fn touch(path: &std::path::Path, content: &str) {
        std::fs::write(path, content).unwrap();
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(10)).unwrap();
    }

    #[test]
    fn test_index_then_nothing_is_stale() {
        let fixture = fixture(&[
            ("main.cpp", "#include \"util.h\"\nint main() { return helper(); }\n"),
            ("util.h", "int helper();\n"),
        ]);
        let part = part(&fixture, &["main.cpp"]);

        assert_eq!(fixture.indexing.indexer().update_project_parts(vec![part.clone()]).unwrap(), 1);
        fixture.indexing.sync_tasks().unwrap();
        assert_eq!(fixture.indexing.state(), IndexerState::Initialized);
        assert_eq!(fixture.reports.lock().unwrap().last(), Some(&(1, 1)));

        let main = fixture.file_paths.file_path_id(&fixture.dir.path().join("main.cpp")).unwrap();
        let query = SymbolQuery::new(Arc::clone(&fixture.database));
        let declarations = query.locations_at(main, 2, 21).unwrap();
        assert_eq!(declarations.len(), 2);
        assert!(declarations.iter().any(|l| l.kind == SourceLocationKind::Declaration));

        assert_eq!(fixture.indexing.indexer().update_project_parts(vec![part]).unwrap(), 0);
        assert_eq!(fixture.indexing.state(), IndexerState::Initialized);
    }

    #[test]
    fn test_changed_header_reindexes_its_includers() {
        let fixture = fixture(&[
            ("main.cpp", "#include \"util.h\"\nint main() { return 0; }\n"),
            ("other.cpp", "int other() { return 1; }\n"),
            ("util.h", "int helper();\n"),
        ]);
        let part = part(&fixture, &["main.cpp", "other.cpp"]);
        assert_eq!(fixture.indexing.indexer().update_project_parts(vec![part.clone()]).unwrap(), 2);
        fixture.indexing.sync_tasks().unwrap();

        touch(&fixture.dir.path().join("util.h"), "int helper(int);\n");
        assert_eq!(fixture.indexing.indexer().update_project_parts(vec![part.clone()]).unwrap(), 1);
        fixture.indexing.sync_tasks().unwrap();

        let header = fixture.file_paths.file_path_id(&fixture.dir.path().join("util.h")).unwrap();
        assert_eq!(fixture.indexing.indexer().paths_changed(&[header]).unwrap(), 1);
        fixture.indexing.sync_tasks().unwrap();
        assert_eq!(fixture.indexing.indexer().update_project_parts(vec![part]).unwrap(), 0);
    }

    #[test]
    fn test_removed_project_part_keeps_its_data() {
        let fixture = fixture(&[("main.cpp", "int value;\n")]);
        let part = part(&fixture, &["main.cpp"]);
        fixture.indexing.indexer().update_project_parts(vec![part.clone()]).unwrap();
        fixture.indexing.sync_tasks().unwrap();

        fixture
            .indexing
            .indexer()
            .remove_project_parts(&[part.project_part_id])
            .unwrap();
        assert!(fixture.indexing.indexer().project_part(part.project_part_id).is_none());
        assert_eq!(fixture.database.stats().unwrap().symbols, 1);
    }

    #[test]
    fn test_abort_stops_waiting() {
        let fixture = fixture(&[("main.cpp", "int value;\n")]);
        let part = part(&fixture, &["main.cpp"]);
        fixture.indexing.abort().unwrap();
        assert_eq!(fixture.indexing.indexer().update_project_parts(vec![part]).unwrap(), 0);
        fixture.indexing.sync_tasks().unwrap();

        assert_eq!(fixture.indexing.state(), IndexerState::Aborted);
        assert!(!fixture.reports.lock().unwrap().contains(&(1, 1)));
        assert_eq!(fixture.database.stats().unwrap().symbols, 0);

        let main = fixture.file_paths.file_path_id(&fixture.dir.path().join("main.cpp")).unwrap();
        assert_eq!(fixture.indexing.indexer().paths_changed(&[main]).unwrap(), 0);
        assert_eq!(fixture.indexing.state(), IndexerState::Aborted);
    }

    #[test]
    fn test_abort_discards_pending_tasks() {
        let fixture = fixture_with_workers(&[("a.cpp", "int a;\n"), ("b.cpp", "int b;\n")], 1);
        let part = part(&fixture, &["a.cpp", "b.cpp"]);
        let release = block_worker(&fixture);
        assert_eq!(fixture.indexing.indexer().update_project_parts(vec![part]).unwrap(), 2);
        assert_eq!(fixture.indexing.state(), IndexerState::WaitingForParseJob);

        fixture.indexing.scheduler.disable();
        fixture.indexing.indexer().abort();
        drop(release);
        fixture.indexing.sync_tasks().unwrap();

        assert_eq!(fixture.indexing.state(), IndexerState::Aborted);
        assert_eq!(fixture.indexing.indexer().queue().progress().counts(), (0, 0));
        assert_eq!(fixture.database.stats().unwrap().symbols, 0);
    }

    #[test]
    fn test_removed_source_in_queue_stores_nothing() {
        let fixture = fixture_with_workers(&[("main.cpp", "int value;\nint other;\n")], 1);
        let part = part(&fixture, &["main.cpp"]);
        let release = block_worker(&fixture);
        assert_eq!(fixture.indexing.indexer().update_project_parts(vec![part]).unwrap(), 1);

        let main = fixture.file_paths.file_path_id(&fixture.dir.path().join("main.cpp")).unwrap();
        fixture.indexing.indexer().sources_removed(&[main]);
        drop(release);
        fixture.indexing.sync_tasks().unwrap();

        assert_eq!(fixture.database.stats().unwrap().symbols, 0);
        assert_eq!(fixture.indexing.state(), IndexerState::Initialized);
        assert_eq!(fixture.reports.lock().unwrap().last(), Some(&(2, 2)));
    }

    #[test]
    fn test_update_while_a_round_is_running_ends_initialized() {
        let fixture = fixture_with_workers(
            &[
                ("main.cpp", "#include \"util.h\"\nint main() { return 0; }\n"),
                ("other.cpp", "int other() { return 1; }\n"),
                ("util.h", "int helper();\n"),
            ],
            1,
        );
        let app = part(&fixture, &["main.cpp"]);
        fixture.indexing.indexer().update_project_parts(vec![app]).unwrap();
        fixture.indexing.sync_tasks().unwrap();
        assert_eq!(fixture.indexing.state(), IndexerState::Initialized);

        let release = block_worker(&fixture);
        let header = fixture.file_paths.file_path_id(&fixture.dir.path().join("util.h")).unwrap();
        assert_eq!(fixture.indexing.indexer().paths_changed(&[header]).unwrap(), 1);
        assert_eq!(fixture.indexing.state(), IndexerState::WaitingForReparseJob);
        let lib = named_part(&fixture, "lib", &["other.cpp"]);
        assert_eq!(fixture.indexing.indexer().update_project_parts(vec![lib]).unwrap(), 1);

        drop(release);
        fixture.indexing.sync_tasks().unwrap();
        assert_eq!(fixture.indexing.state(), IndexerState::Initialized);
        assert_eq!(fixture.reports.lock().unwrap().last(), Some(&(3, 3)));
        assert_eq!(fixture.indexing.indexer().queue().progress().counts(), (0, 0));
    }
}

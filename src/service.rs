//! Refactoring service
//!
//! `RefactoringService` is the one entry point a host talks to. It owns the indexing session,
//! the query worker pool and the streaming query in progress, and reports back through a
//! `RefactoringClient`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::gatherer::QueryGatherer;
use crate::generated_files::GeneratedFiles;
use crate::indexer::{IndexerState, IndexingOptions, SymbolIndexing};
use crate::matcher::{QueryProcessor, SourceRangesAndDiagnostics};
use crate::project::{ProjectPartContainer, ProjectPartId};
use crate::scheduler::{ProcessorManager, TaskScheduler, default_worker_count};
use crate::source::{FileContainer, FilePathId};
use crate::storage::{Database, FilePathCache, ProjectPartsStorage, SqliteProjectPartsStorage};
use crate::{Error, Result};

/// Receives everything the service reports. Called from worker and pump threads.
pub trait RefactoringClient: Send + Sync {
    /// Answer to a single-source query.
    fn source_ranges_and_diagnostics_for_query(&self, message: SourceRangesAndDiagnostics);

    /// One source of a streaming query finished.
    fn source_ranges_for_query(&self, message: SourceRangesAndDiagnostics);

    /// Parse tasks completed out of the tasks known so far.
    fn progress(&self, completed: usize, total: usize);

    /// The service is busy with a long foreground call but still alive.
    fn alive(&self) {}
}

#[derive(Debug, Clone, Copy)]
pub struct ServiceOptions {
    pub indexing: IndexingOptions,
    pub query_slot_count: usize,
    pub poll_interval: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            indexing: IndexingOptions::default(),
            query_slot_count: default_worker_count(),
            poll_interval: Duration::from_millis(100),
        }
    }
}

struct Pump {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

pub struct RefactoringService {
    client: Arc<dyn RefactoringClient>,
    database: Arc<Database>,
    file_paths: Arc<FilePathCache>,
    generated_files: Arc<GeneratedFiles>,
    indexing: SymbolIndexing,
    query_processors: Arc<ProcessorManager<QueryProcessor>>,
    query_scheduler: Arc<TaskScheduler<QueryProcessor>>,
    gatherer: Mutex<Option<Arc<QueryGatherer>>>,
    gatherer_slot_count: Mutex<usize>,
    pump: Mutex<Option<Pump>>,
    pump_active: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl RefactoringService {
    pub fn new(
        database: Arc<Database>,
        client: Arc<dyn RefactoringClient>,
        options: ServiceOptions,
    ) -> Result<Self> {
        let file_paths = Arc::new(FilePathCache::new(Arc::clone(&database)));
        let generated_files = Arc::new(GeneratedFiles::new());

        let progress_client = Arc::clone(&client);
        let alive_client = Arc::clone(&client);
        let indexing = SymbolIndexing::new(
            Arc::clone(&database),
            Arc::clone(&file_paths),
            Arc::clone(&generated_files),
            options.indexing,
            move |completed, total| progress_client.progress(completed, total),
            move || {
                trace!("Alive");
                alive_client.alive();
            },
        )?;

        let processor_paths = Arc::clone(&file_paths);
        let query_processors = Arc::new(ProcessorManager::new(
            move || QueryProcessor::new(Arc::clone(&processor_paths)),
            Arc::clone(&generated_files),
        ));
        let query_scheduler = Arc::new(TaskScheduler::new(
            Arc::clone(&query_processors),
            options.query_slot_count,
        ));

        Ok(Self {
            client,
            database,
            file_paths,
            generated_files,
            indexing,
            query_processors,
            gatherer_slot_count: Mutex::new(query_scheduler.slot_count()),
            query_scheduler,
            gatherer: Mutex::new(None),
            pump: Mutex::new(None),
            pump_active: Arc::new(AtomicBool::new(false)),
            poll_interval: options.poll_interval,
        })
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    pub fn file_paths(&self) -> &Arc<FilePathCache> {
        &self.file_paths
    }

    pub fn generated_files(&self) -> &Arc<GeneratedFiles> {
        &self.generated_files
    }

    pub fn indexing(&self) -> &SymbolIndexing {
        &self.indexing
    }

    pub fn indexer_state(&self) -> IndexerState {
        self.indexing.state()
    }

    /// Id of the project part called `name`, registered on first use.
    pub fn project_part_id(&self, name: &str) -> Result<ProjectPartId> {
        self.database
            .write(|conn| SqliteProjectPartsStorage.fetch_project_part_id(conn, name))
    }

    /// Match `query` against one source and answer through
    /// `source_ranges_and_diagnostics_for_query`.
    pub fn request_source_ranges_and_diagnostics_for_query(
        &self,
        query: &str,
        source: FileContainer,
    ) -> Result<()> {
        let message = self
            .query_processors
            .with_processor(|processor| processor.find_locations(query, &source, &[]))?;
        self.client.source_ranges_and_diagnostics_for_query(message);
        Ok(())
    }

    /// Match `query` against every source in the background. Each finished source is reported
    /// through `source_ranges_for_query` as soon as it is done. A query still running is
    /// canceled first.
    pub fn request_source_ranges_for_query(
        &self,
        query: &str,
        sources: Vec<FileContainer>,
        unsaved: Vec<FileContainer>,
    ) -> Result<()> {
        self.cancel()?;

        let gatherer = Arc::new(QueryGatherer::new(
            Arc::clone(&self.query_scheduler),
            query,
            sources,
            unsaved,
        ));
        gatherer.set_processing_slot_count(
            *self
                .gatherer_slot_count
                .lock()
                .map_err(Error::poisoned("gatherer slot count"))?,
        )?;
        *self.gatherer.lock().map_err(Error::poisoned("gatherer"))? = Some(Arc::clone(&gatherer));
        self.start_pump(gatherer)
    }

    fn start_pump(&self, gatherer: Arc<QueryGatherer>) -> Result<()> {
        let stop = Arc::new(AtomicBool::new(false));
        let client = Arc::clone(&self.client);
        let active = Arc::clone(&self.pump_active);
        let poll_interval = self.poll_interval;
        let pump_stop = Arc::clone(&stop);

        active.store(true, Ordering::SeqCst);
        let handle = thread::Builder::new()
            .name("symref-query-pump".to_string())
            .spawn(move || {
                pump_loop(&gatherer, client.as_ref(), &pump_stop, poll_interval);
                active.store(false, Ordering::SeqCst);
            });
        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                self.pump_active.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        *self.pump.lock().map_err(Error::poisoned("query pump"))? = Some(Pump { handle, stop });
        Ok(())
    }

    /// Whether a streaming query is still being pumped.
    pub fn poll_timer_is_active(&self) -> bool {
        self.pump_active.load(Ordering::SeqCst)
    }

    /// Block until the streaming query in progress delivered all its results.
    pub fn wait_until_finished(&self) -> Result<()> {
        let pump = self.pump.lock().map_err(Error::poisoned("query pump"))?.take();
        if let Some(pump) = pump {
            if pump.handle.join().is_err() {
                warn!("Query pump panicked");
                self.pump_active.store(false, Ordering::SeqCst);
            }
        }
        if let Some(gatherer) = self.current_gatherer()? {
            gatherer.wait_for_finished()?;
            for message in gatherer.finished_messages() {
                self.client.source_ranges_for_query(message);
            }
        }
        Ok(())
    }

    /// Drop the sources of the streaming query not started yet and wait for the running ones.
    /// Their results are still delivered.
    pub fn cancel(&self) -> Result<()> {
        let pump = self.pump.lock().map_err(Error::poisoned("query pump"))?.take();
        if let Some(pump) = pump {
            pump.stop.store(true, Ordering::SeqCst);
            if pump.handle.join().is_err() {
                warn!("Query pump panicked");
            }
            self.pump_active.store(false, Ordering::SeqCst);
        }
        if let Some(gatherer) = self.current_gatherer()? {
            let dropped = gatherer.cancel()?;
            for message in gatherer.finished_messages() {
                self.client.source_ranges_for_query(message);
            }
            if dropped > 0 {
                info!("Canceled query, {} sources dropped", dropped);
            }
        }
        Ok(())
    }

    /// Whether the streaming query has wound down: nothing pending, nothing running and every
    /// result delivered.
    pub fn is_canceling_jobs(&self) -> bool {
        self.current_gatherer()
            .ok()
            .flatten()
            .is_none_or(|gatherer| gatherer.is_finished())
    }

    fn current_gatherer(&self) -> Result<Option<Arc<QueryGatherer>>> {
        Ok(self.gatherer.lock().map_err(Error::poisoned("gatherer"))?.clone())
    }

    /// Concurrency of streaming queries, applied to the running one too.
    pub fn set_gatherer_processing_slot_count(&self, count: usize) -> Result<()> {
        let count = count.max(1);
        *self
            .gatherer_slot_count
            .lock()
            .map_err(Error::poisoned("gatherer slot count"))? = count;
        if let Some(gatherer) = self.current_gatherer()? {
            gatherer.set_processing_slot_count(count)?;
        }
        Ok(())
    }

    pub fn update_project_parts(&self, parts: Vec<ProjectPartContainer>) -> Result<usize> {
        self.file_paths.populate_if_empty()?;
        self.indexing.indexer().update_project_parts(parts)
    }

    /// Stop indexing the given parts. Their stored data is kept.
    pub fn remove_project_parts(&self, ids: &[ProjectPartId]) -> Result<()> {
        self.indexing.indexer().remove_project_parts(ids)
    }

    pub fn update_generated_files(&self, files: Vec<FileContainer>) -> Result<()> {
        debug!("Updating {} generated files", files.len());
        self.generated_files.update(files)
    }

    pub fn remove_generated_files(&self, paths: &[PathBuf]) -> Result<()> {
        self.generated_files.remove(paths)
    }

    /// Reindex the sources depending on changed files. Unknown paths are ignored.
    pub fn paths_changed(&self, paths: &[PathBuf]) -> Result<usize> {
        let ids = self.known_ids(paths)?;
        self.indexing.indexer().paths_changed(&ids)
    }

    /// Discard results of running tasks for removed files.
    pub fn paths_removed(&self, paths: &[PathBuf]) -> Result<()> {
        let ids = self.known_ids(paths)?;
        self.indexing.indexer().sources_removed(&ids);
        Ok(())
    }

    fn known_ids(&self, paths: &[PathBuf]) -> Result<Vec<FilePathId>> {
        let mut ids = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(id) = self.file_paths.existing_file_path_id(path)? {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    pub fn set_progress(&self, completed: usize, total: usize) {
        self.client.progress(completed, total);
    }

    /// Block until every queued parse task has run.
    pub fn sync_indexing(&self) -> Result<()> {
        self.indexing.sync_tasks()
    }

    /// Cancel queries and stop indexing.
    pub fn shutdown(&self) -> Result<()> {
        self.cancel()?;
        self.indexing.abort()
    }
}

impl Drop for RefactoringService {
    fn drop(&mut self) {
        if let Err(e) = self.cancel() {
            warn!("Failed to cancel queries on shutdown: {}", e);
        }
    }
}

fn pump_loop(
    gatherer: &QueryGatherer,
    client: &dyn RefactoringClient,
    stop: &AtomicBool,
    poll_interval: Duration,
) {
    loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = gatherer.start_create_next_source_ranges_messages() {
            warn!("Failed to start query tasks: {}", e);
            return;
        }
        if let Some(message) = gatherer.next_message(poll_interval) {
            client.source_ranges_for_query(message);
            for message in gatherer.finished_messages() {
                client.source_ranges_for_query(message);
            }
        }
        if gatherer.is_finished() {
            debug!("Query finished");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingClient {
        single: Mutex<Vec<SourceRangesAndDiagnostics>>,
        streamed: Mutex<Vec<SourceRangesAndDiagnostics>>,
        progress: Mutex<Vec<(usize, usize)>>,
    }

    impl RefactoringClient for RecordingClient {
        fn source_ranges_and_diagnostics_for_query(&self, message: SourceRangesAndDiagnostics) {
            self.single.lock().unwrap().push(message);
        }

        fn source_ranges_for_query(&self, message: SourceRangesAndDiagnostics) {
            self.streamed.lock().unwrap().push(message);
        }

        fn progress(&self, completed: usize, total: usize) {
            self.progress.lock().unwrap().push((completed, total));
        }
    }

    fn service() -> (tempfile::TempDir, Arc<RecordingClient>, RefactoringService) {
        let dir = tempfile::tempdir().unwrap();
        let database = Arc::new(Database::open(&dir.path().join("index.db")).unwrap());
        let client = Arc::new(RecordingClient::default());
        let service = RefactoringService::new(
            database,
            Arc::clone(&client) as Arc<dyn RefactoringClient>,
            ServiceOptions {
                indexing: IndexingOptions {
                    worker_count: 2,
                    alive_interval: Duration::from_secs(1),
                },
                query_slot_count: 2,
                poll_interval: Duration::from_millis(100),
            },
        )
        .unwrap();
        (dir, client, service)
    }

    fn source(dir: &tempfile::TempDir, name: &str) -> FileContainer {
        FileContainer::new(dir.path().join(name), "void f()\n {}")
    }

    #[test]
    fn test_single_source_query() {
        let (dir, client, service) = service();
        let source = FileContainer::new(dir.path().join("query.cpp"), "void f() {}");
        service
            .request_source_ranges_and_diagnostics_for_query("functionDecl()", source.clone())
            .unwrap();
        service.request_source_ranges_and_diagnostics_for_query("func()", source).unwrap();

        let single = client.single.lock().unwrap();
        let range = &single[0].source_ranges.source_ranges[0];
        assert_eq!(
            (range.start_line, range.start_column, range.end_line, range.end_column),
            (1, 1, 1, 12)
        );
        assert!(single[0].diagnostics.is_empty());
        assert!(single[1].source_ranges.is_empty());
        assert!(!single[1].diagnostics.is_empty());
    }

    #[test]
    fn test_streaming_query_delivers_every_source() {
        let (dir, client, service) = service();
        let sources = (0..5).map(|i| source(&dir, &format!("s{}.cpp", i))).collect();
        service.request_source_ranges_for_query("functionDecl()", sources, vec![]).unwrap();
        service.wait_until_finished().unwrap();

        assert!(!service.poll_timer_is_active());
        assert!(service.is_canceling_jobs());
        let streamed = client.streamed.lock().unwrap();
        assert_eq!(streamed.len(), 5);
        assert!(streamed.iter().all(|m| m.source_ranges.source_ranges.len() == 1));
    }

    #[test]
    fn test_streaming_query_with_unsaved_header() {
        let (dir, client, service) = service();
        let main = FileContainer::new(
            dir.path().join("query_simplefunction.cpp"),
            "#include \"query_simplefunction.h\"",
        );
        let header = FileContainer::new(dir.path().join("query_simplefunction.h"), "void f();");
        service
            .request_source_ranges_for_query("functionDecl()", vec![main], vec![header])
            .unwrap();
        service.wait_until_finished().unwrap();

        let streamed = client.streamed.lock().unwrap();
        let range = &streamed[0].source_ranges.source_ranges[0];
        assert_eq!(
            (range.start_line, range.start_column, range.end_line, range.end_column, range.text.as_str()),
            (1, 1, 1, 9, "void f();")
        );
    }

    #[test]
    fn test_cancel_stops_the_pump() {
        let (dir, client, service) = service();
        service.set_gatherer_processing_slot_count(1).unwrap();
        let sources = (0..20).map(|i| source(&dir, &format!("s{}.cpp", i))).collect();
        service.request_source_ranges_for_query("functionDecl()", sources, vec![]).unwrap();

        service.cancel().unwrap();
        assert!(!service.poll_timer_is_active());
        assert!(service.is_canceling_jobs());
        assert!(client.streamed.lock().unwrap().len() <= 20);
    }

    #[test]
    fn test_generated_files_are_shared() {
        let (dir, _client, service) = service();
        let header = dir.path().join("generated.h");
        service
            .update_generated_files(vec![FileContainer::new(&header, "void f();")])
            .unwrap();
        assert_eq!(service.generated_files().file_containers().unwrap().len(), 1);

        service.remove_generated_files(&[header]).unwrap();
        assert!(service.generated_files().file_containers().unwrap().is_empty());
    }

    #[test]
    fn test_update_project_parts_reports_progress() {
        let (dir, client, service) = service();
        let main = dir.path().join("main.cpp");
        std::fs::write(&main, "int main() { return 0; }\n").unwrap();
        let id = service.project_part_id("app").unwrap();
        let part = ProjectPartContainer::new(id)
            .with_sources(vec![service.file_paths().file_path_id(&main).unwrap()]);

        assert_eq!(service.update_project_parts(vec![part]).unwrap(), 1);
        service.sync_indexing().unwrap();
        assert_eq!(service.indexer_state(), IndexerState::Initialized);
        assert_eq!(client.progress.lock().unwrap().last(), Some(&(1, 1)));

        service.set_progress(20, 30);
        assert_eq!(client.progress.lock().unwrap().last(), Some(&(20, 30)));
    }
}

//! Streaming structural queries over many sources
//!
//! `QueryGatherer` feeds sources to the worker pool no faster than its slot count allows and
//! hands back one `SourceRangesAndDiagnostics` per source as soon as that source is done.
//! Results arrive in completion order.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info};

use crate::matcher::{
    DiagnosticMessage, DynamicMatcherDiagnostic, ErrorType, Matcher, QueryProcessor, QueryRange,
    SourceRangesAndDiagnostics, parse_matcher,
};
use crate::scheduler::{Task, TaskScheduler};
use crate::source::FileContainer;
use crate::{Error, Result};

#[derive(Default)]
struct Progress {
    in_flight: usize,
}

struct Shared {
    progress: Mutex<Progress>,
    idle: Condvar,
}

impl Shared {
    fn finish_one(&self) {
        if let Ok(mut progress) = self.progress.lock() {
            progress.in_flight = progress.in_flight.saturating_sub(1);
            if progress.in_flight == 0 {
                self.idle.notify_all();
            }
        }
    }

    fn in_flight(&self) -> usize {
        self.progress.lock().map(|p| p.in_flight).unwrap_or_default()
    }
}

/// One submitted source. Dropping it releases the source's slot; a source that never got to
/// send its result (dropped by a disabled scheduler, or panicked) sends an empty one carrying a
/// diagnostic first, so every started source yields exactly one message.
struct InFlight {
    shared: Arc<Shared>,
    sender: Sender<SourceRangesAndDiagnostics>,
    file_path: PathBuf,
    sent: bool,
}

impl InFlight {
    fn complete(mut self, result: SourceRangesAndDiagnostics) {
        let _ = self.sender.send(result);
        self.sent = true;
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.sent {
            debug!("Source {} was not matched", self.file_path.display());
            let _ = self.sender.send(not_matched(&self.file_path));
        }
        self.shared.finish_one();
    }
}

fn not_matched(file_path: &Path) -> SourceRangesAndDiagnostics {
    SourceRangesAndDiagnostics {
        diagnostics: vec![DynamicMatcherDiagnostic::new(
            DiagnosticMessage {
                range: QueryRange::default(),
                error_type: ErrorType::SourceUnavailable,
                arguments: vec![
                    file_path.display().to_string(),
                    "matching stopped before the source was processed".to_string(),
                ],
            },
            Vec::new(),
        )],
        ..Default::default()
    }
}

pub struct QueryGatherer {
    scheduler: Arc<TaskScheduler<QueryProcessor>>,
    matcher: Arc<std::result::Result<Matcher, DynamicMatcherDiagnostic>>,
    unsaved: Arc<Vec<FileContainer>>,
    sources: Mutex<VecDeque<FileContainer>>,
    slot_count: Mutex<usize>,
    shared: Arc<Shared>,
    sender: Sender<SourceRangesAndDiagnostics>,
    receiver: Receiver<SourceRangesAndDiagnostics>,
}

impl QueryGatherer {
    pub fn new(
        scheduler: Arc<TaskScheduler<QueryProcessor>>,
        query: &str,
        sources: Vec<FileContainer>,
        unsaved: Vec<FileContainer>,
    ) -> Self {
        let slot_count = scheduler.slot_count();
        let (sender, receiver) = channel::unbounded();
        debug!("Gathering {:?} over {} sources", query, sources.len());
        Self {
            scheduler,
            matcher: Arc::new(parse_matcher(query)),
            unsaved: Arc::new(unsaved),
            sources: Mutex::new(sources.into()),
            slot_count: Mutex::new(slot_count),
            shared: Arc::new(Shared {
                progress: Mutex::new(Progress::default()),
                idle: Condvar::new(),
            }),
            sender,
            receiver,
        }
    }

    /// Limit how many sources are matched concurrently.
    pub fn set_processing_slot_count(&self, count: usize) -> Result<()> {
        *self.slot_count.lock().map_err(Error::poisoned("gatherer slots"))? = count.max(1);
        Ok(())
    }

    pub fn processing_slot_count(&self) -> usize {
        self.slot_count.lock().map(|count| *count).unwrap_or(1)
    }

    /// Start matching as many remaining sources as there are free slots. Returns how many
    /// were started.
    pub fn start_create_next_source_ranges_messages(&self) -> Result<usize> {
        let batch: Vec<FileContainer> = {
            let slot_count = self.processing_slot_count();
            let mut progress = self
                .shared
                .progress
                .lock()
                .map_err(Error::poisoned("gatherer progress"))?;
            let free = slot_count.saturating_sub(progress.in_flight);
            let mut sources = self.sources.lock().map_err(Error::poisoned("gatherer sources"))?;
            let count = free.min(sources.len());
            progress.in_flight += count;
            sources.drain(..count).collect()
        };
        if batch.is_empty() {
            return Ok(0);
        }

        let started = batch.len();
        let tasks: Vec<Task<QueryProcessor>> = batch
            .into_iter()
            .map(|source| self.create_task(source))
            .collect();
        self.scheduler.add_tasks(tasks)?;
        debug!("Started matching {} sources", started);
        Ok(started)
    }

    fn create_task(&self, source: FileContainer) -> Task<QueryProcessor> {
        let matcher = Arc::clone(&self.matcher);
        let unsaved = Arc::clone(&self.unsaved);
        let guard = InFlight {
            shared: Arc::clone(&self.shared),
            sender: self.sender.clone(),
            file_path: source.file_path.clone(),
            sent: false,
        };
        Box::new(move |processor: &mut QueryProcessor| {
            let result = match matcher.as_ref() {
                Ok(matcher) => processor.run(matcher, &source, &unsaved),
                Err(diagnostic) => SourceRangesAndDiagnostics {
                    diagnostics: vec![diagnostic.clone()],
                    ..Default::default()
                },
            };
            // the result is sent before the slot is released
            guard.complete(result);
        })
    }

    /// Results that completed since the last call, in completion order.
    pub fn finished_messages(&self) -> Vec<SourceRangesAndDiagnostics> {
        self.receiver.try_iter().collect()
    }

    /// Wait up to `timeout` for the next result.
    pub fn next_message(&self, timeout: Duration) -> Option<SourceRangesAndDiagnostics> {
        match self.receiver.recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Block until no source is being matched.
    pub fn wait_for_finished(&self) -> Result<()> {
        let progress = self
            .shared
            .progress
            .lock()
            .map_err(Error::poisoned("gatherer progress"))?;
        let _progress = self
            .shared
            .idle
            .wait_while(progress, |progress| progress.in_flight > 0)
            .map_err(Error::poisoned("gatherer progress"))?;
        Ok(())
    }

    /// Nothing left to start, nothing running and every result collected.
    pub fn is_finished(&self) -> bool {
        self.remaining() == 0 && self.shared.in_flight() == 0 && self.receiver.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.sources.lock().map(|sources| sources.len()).unwrap_or_default()
    }

    pub fn in_flight(&self) -> usize {
        self.shared.in_flight()
    }

    /// Drop the sources not started yet and wait for the running ones. Their results stay
    /// collectable. Returns the number of dropped sources.
    pub fn cancel(&self) -> Result<usize> {
        let dropped = {
            let mut sources = self.sources.lock().map_err(Error::poisoned("gatherer sources"))?;
            let dropped = sources.len();
            sources.clear();
            dropped
        };
        self.wait_for_finished()?;
        info!("Query canceled, {} sources not matched", dropped);
        Ok(dropped)
    }
}

//! Pending parse tasks feeding the scheduler's free slots

use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};

use super::processor::Processor;
use super::progress_counter::ProgressCounter;
use super::task_scheduler::{Task, TaskScheduler};
use crate::project::ProjectPartId;
use crate::source::FilePathId;
use crate::{Error, Result};

/// A parse task for one source of one project part.
pub struct QueuedTask<P> {
    pub source_id: FilePathId,
    pub project_part_id: ProjectPartId,
    pub run: Task<P>,
}

impl<P> QueuedTask<P> {
    pub fn new(
        source_id: FilePathId,
        project_part_id: ProjectPartId,
        run: impl FnOnce(&mut P) + Send + 'static,
    ) -> Self {
        Self {
            source_id,
            project_part_id,
            run: Box::new(run),
        }
    }

    fn key(&self) -> (FilePathId, ProjectPartId) {
        (self.source_id, self.project_part_id)
    }
}

/// Settles one queued task when dropped. A task that started counts as completed, even if it
/// panicked. A task discarded unrun leaves the total.
struct Completion {
    progress: Arc<ProgressCounter>,
    started: bool,
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.started {
            self.progress.add_progress(1);
        } else {
            self.progress.remove_total(1);
        }
    }
}

pub struct TaskQueue<P: Processor> {
    pending: Mutex<Vec<QueuedTask<P>>>,
    scheduler: Arc<TaskScheduler<P>>,
    progress: Arc<ProgressCounter>,
}

impl<P: Processor> TaskQueue<P> {
    /// Create the queue and hook it to the scheduler so every finished task refills free slots.
    pub fn new(scheduler: Arc<TaskScheduler<P>>, progress: Arc<ProgressCounter>) -> Result<Arc<Self>> {
        let queue = Arc::new(Self {
            pending: Mutex::new(Vec::new()),
            scheduler: Arc::clone(&scheduler),
            progress,
        });

        let weak: Weak<Self> = Arc::downgrade(&queue);
        scheduler.set_finished_hook(move || {
            if let Some(queue) = weak.upgrade() {
                if let Err(e) = queue.process_entries() {
                    warn!("Failed to refill worker slots: {}", e);
                }
            }
        })?;
        Ok(queue)
    }

    /// Queue tasks. A pending task for the same source and project part is replaced.
    pub fn add_or_update_tasks(&self, tasks: Vec<QueuedTask<P>>) -> Result<()> {
        self.add_or_update_tasks_with(tasks, || {})
    }

    /// `add_or_update_tasks` that runs `queued` before any of the new tasks can complete.
    pub fn add_or_update_tasks_with(&self, tasks: Vec<QueuedTask<P>>, queued: impl FnOnce()) -> Result<()> {
        let mut pending = self.pending.lock().map_err(Error::poisoned("task queue"))?;
        let mut added = 0;
        for task in tasks {
            match pending.iter_mut().find(|existing| existing.key() == task.key()) {
                Some(existing) => *existing = task,
                None => {
                    pending.push(task);
                    added += 1;
                }
            }
        }
        // counted while still holding `pending`, so no worker can finish them first
        self.progress.add_total_with(added, queued);
        Ok(())
    }

    /// Drop pending tasks of the given project parts.
    pub fn remove_tasks(&self, project_part_ids: &[ProjectPartId]) -> Result<usize> {
        let removed = {
            let mut pending = self.pending.lock().map_err(Error::poisoned("task queue"))?;
            let before = pending.len();
            pending.retain(|task| !project_part_ids.contains(&task.project_part_id));
            before - pending.len()
        };
        if removed > 0 {
            debug!("Removed {} pending tasks", removed);
            self.progress.remove_total(removed);
        }
        Ok(removed)
    }

    /// Hand as many pending tasks to the scheduler as it has free slots. A disabled scheduler
    /// takes all of them and discards them.
    pub fn process_entries(&self) -> Result<()> {
        let batch: Vec<Task<P>> = {
            let mut pending = self.pending.lock().map_err(Error::poisoned("task queue"))?;
            let count = if self.scheduler.is_disabled() {
                pending.len()
            } else {
                self.scheduler.slot_usage().free.min(pending.len())
            };
            pending
                .drain(..count)
                .map(|task| {
                    let completion = Completion {
                        progress: Arc::clone(&self.progress),
                        started: false,
                    };
                    let run = task.run;
                    Box::new(move |processor: &mut P| {
                        let mut completion = completion;
                        completion.started = true;
                        run(processor);
                    }) as Task<P>
                })
                .collect()
        };
        self.scheduler.add_tasks(batch)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or_default()
    }

    pub fn progress(&self) -> &Arc<ProgressCounter> {
        &self.progress
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler<P>> {
        &self.scheduler
    }

    /// Block until nothing is pending and nothing is running.
    pub fn sync_tasks(&self) -> Result<()> {
        loop {
            self.process_entries()?;
            self.scheduler.sync_tasks()?;
            if self.pending_count() == 0 || self.scheduler.is_disabled() {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generated_files::GeneratedFiles;
    use crate::scheduler::ProcessorManager;
    use crate::source::FileContainer;

    #[derive(Default)]
    struct NullProcessor;

    impl Processor for NullProcessor {
        fn set_unsaved_files(&mut self, _files: &[FileContainer]) {}
        fn clear(&mut self) {}
    }

    fn queue(slots: usize) -> (Arc<TaskQueue<NullProcessor>>, Arc<Mutex<Vec<(usize, usize)>>>) {
        let manager = Arc::new(ProcessorManager::new(
            || -> Result<NullProcessor> { Ok(NullProcessor) },
            Arc::new(GeneratedFiles::new()),
        ));
        let scheduler = Arc::new(TaskScheduler::new(manager, slots));
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let progress = Arc::new(ProgressCounter::new(move |p, t| sink.lock().unwrap().push((p, t))));
        (TaskQueue::new(scheduler, progress).unwrap(), reports)
    }

    fn recording_task(
        source: i64,
        part: i64,
        log: &Arc<Mutex<Vec<(i64, i64)>>>,
    ) -> QueuedTask<NullProcessor> {
        let log = Arc::clone(log);
        QueuedTask::new(FilePathId(source), ProjectPartId(part), move |_| {
            log.lock().unwrap().push((source, part));
        })
    }

    #[test]
    fn test_more_tasks_than_slots_all_run_once() {
        let (queue, reports) = queue(2);
        let log = Arc::new(Mutex::new(Vec::new()));
        let tasks = (1..=7).map(|i| recording_task(i, 1, &log)).collect();

        queue.add_or_update_tasks(tasks).unwrap();
        queue.sync_tasks().unwrap();

        let mut ran = log.lock().unwrap().clone();
        ran.sort();
        assert_eq!(ran, (1..=7).map(|i| (i, 1)).collect::<Vec<_>>());
        assert_eq!(reports.lock().unwrap().last(), Some(&(7, 7)));
        assert_eq!(queue.progress().counts(), (0, 0));
    }

    #[test]
    fn test_discarded_tasks_leave_the_total() {
        let (queue, reports) = queue(1);
        let log = Arc::new(Mutex::new(Vec::new()));
        queue
            .add_or_update_tasks((1..=3).map(|i| recording_task(i, 1, &log)).collect())
            .unwrap();
        queue.scheduler().disable();
        queue.sync_tasks().unwrap();

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(queue.pending_count(), 0);
        assert_eq!(queue.progress().counts(), (0, 0));
        let reports = reports.lock().unwrap();
        assert!(reports.iter().all(|(completed, _)| *completed == 0));
        assert_eq!(reports.last(), Some(&(0, 0)));
    }

    #[test]
    fn test_duplicate_tasks_are_replaced() {
        let (queue, _) = queue(1);
        let log = Arc::new(Mutex::new(Vec::new()));
        queue
            .add_or_update_tasks(vec![recording_task(1, 1, &log), recording_task(2, 1, &log)])
            .unwrap();
        queue
            .add_or_update_tasks(vec![recording_task(1, 1, &log), recording_task(1, 2, &log)])
            .unwrap();

        assert_eq!(queue.pending_count(), 3);
        assert_eq!(queue.progress().counts(), (0, 3));
    }

    #[test]
    fn test_remove_tasks_of_project_parts() {
        let (queue, _) = queue(1);
        let log = Arc::new(Mutex::new(Vec::new()));
        queue
            .add_or_update_tasks(vec![
                recording_task(1, 1, &log),
                recording_task(2, 2, &log),
                recording_task(3, 2, &log),
            ])
            .unwrap();

        assert_eq!(queue.remove_tasks(&[ProjectPartId(2)]).unwrap(), 2);
        queue.sync_tasks().unwrap();
        assert_eq!(*log.lock().unwrap(), vec![(1, 1)]);
    }
}

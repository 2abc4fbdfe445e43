//! Bounded worker pool running tasks against pooled processors

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, error, trace};

use super::processor::{Processor, ProcessorManager};
use crate::{Error, Result};

/// A unit of work. It receives the processor checked out for it.
pub type Task<P> = Box<dyn FnOnce(&mut P) + Send + 'static>;

type FinishedHook = Arc<dyn Fn() + Send + Sync>;

/// How many of the worker slots are busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotUsage {
    pub free: usize,
    pub used: usize,
}

/// Number of worker slots to use when none is configured.
pub fn default_worker_count() -> usize {
    if cfg!(windows) {
        // parser contexts are not safe to run concurrently there
        1
    } else {
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

#[derive(Default)]
struct State {
    in_flight: usize,
    /// Tasks done but whose finished hook is still running.
    finishing: usize,
    disabled: bool,
}

impl State {
    fn is_idle(&self) -> bool {
        self.in_flight == 0 && self.finishing == 0
    }
}

struct Shared {
    state: Mutex<State>,
    all_done: Condvar,
    finished_hook: RwLock<Option<FinishedHook>>,
}

impl Shared {
    fn task_done(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.in_flight = state.in_flight.saturating_sub(1);
            state.finishing += 1;
        }
        let hook = self.finished_hook.read().ok().and_then(|hook| hook.clone());
        if let Some(hook) = hook {
            hook();
        }
        if let Ok(mut state) = self.state.lock() {
            state.finishing = state.finishing.saturating_sub(1);
            if state.is_idle() {
                self.all_done.notify_all();
            }
        }
    }

    fn is_disabled(&self) -> bool {
        self.state.lock().map(|state| state.disabled).unwrap_or(true)
    }
}

/// Runs tasks on a fixed number of worker threads. Each worker checks out one processor for the
/// duration of one task.
pub struct TaskScheduler<P: Processor> {
    sender: Option<Sender<Task<P>>>,
    workers: Vec<JoinHandle<()>>,
    shared: Arc<Shared>,
    slot_count: usize,
}

impl<P: Processor> TaskScheduler<P> {
    pub fn new(manager: Arc<ProcessorManager<P>>, slot_count: usize) -> Self {
        let slot_count = slot_count.max(1);
        let (sender, receiver) = channel::unbounded::<Task<P>>();
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            all_done: Condvar::new(),
            finished_hook: RwLock::new(None),
        });

        let workers = (0..slot_count)
            .map(|index| {
                let receiver = receiver.clone();
                let manager = Arc::clone(&manager);
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("symref-worker-{}", index))
                    .spawn(move || worker_loop(receiver, manager, shared))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    error!("Failed to spawn worker: {}", e);
                    None
                }
            })
            .collect();

        debug!("Task scheduler started with {} slots", slot_count);
        Self {
            sender: Some(sender),
            workers,
            shared,
            slot_count,
        }
    }

    /// Called on a worker thread after every finished or dropped task.
    pub fn set_finished_hook(&self, hook: impl Fn() + Send + Sync + 'static) -> Result<()> {
        let mut slot = self
            .shared
            .finished_hook
            .write()
            .map_err(Error::poisoned("finished hook"))?;
        *slot = Some(Arc::new(hook));
        Ok(())
    }

    pub fn add_tasks(&self, tasks: Vec<Task<P>>) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }
        let Some(sender) = &self.sender else {
            return Ok(());
        };
        {
            let mut state = self.shared.state.lock().map_err(Error::poisoned("scheduler state"))?;
            if state.disabled {
                debug!("Scheduler disabled, dropping {} tasks", tasks.len());
                return Ok(());
            }
            state.in_flight += tasks.len();
        }
        for task in tasks {
            if sender.send(task).is_err() {
                self.shared.task_done();
            }
        }
        Ok(())
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn slot_usage(&self) -> SlotUsage {
        let in_flight = self.shared.state.lock().map(|s| s.in_flight).unwrap_or(self.slot_count);
        let used = in_flight.min(self.slot_count);
        SlotUsage {
            free: self.slot_count - used,
            used,
        }
    }

    /// Submitted tasks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.shared.state.lock().map(|s| s.in_flight).unwrap_or_default()
    }

    /// Stop picking up new tasks. Queued tasks are dropped, running ones finish.
    pub fn disable(&self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.disabled = true;
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.shared.is_disabled()
    }

    /// Block until every submitted task has finished or been dropped.
    pub fn sync_tasks(&self) -> Result<()> {
        let state = self.shared.state.lock().map_err(Error::poisoned("scheduler state"))?;
        let _state = self
            .shared
            .all_done
            .wait_while(state, |state| !state.is_idle())
            .map_err(Error::poisoned("scheduler state"))?;
        Ok(())
    }
}

impl<P: Processor> Drop for TaskScheduler<P> {
    fn drop(&mut self) {
        self.disable();
        self.sender.take();
        if let Err(e) = self.sync_tasks() {
            error!("Failed to wait for tasks: {}", e);
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("Worker thread panicked");
            }
        }
    }
}

fn worker_loop<P: Processor>(
    receiver: Receiver<Task<P>>,
    manager: Arc<ProcessorManager<P>>,
    shared: Arc<Shared>,
) {
    for task in receiver.iter() {
        if shared.is_disabled() {
            trace!("Dropping task of a disabled scheduler");
            drop(task);
            shared.task_done();
            continue;
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| manager.with_processor(task)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Task could not get a processor: {}", e),
            Err(_) => error!("Task panicked"),
        }
        shared.task_done();
    }
}

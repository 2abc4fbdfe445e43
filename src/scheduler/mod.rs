//! Concurrent execution engine
//!
//! A fixed number of worker slots run boxed tasks. Every slot checks out one reusable
//! processor per task from a `ProcessorManager`, so an expensive parser context is never
//! shared between concurrently running tasks. `TaskQueue` keeps the pending tasks and feeds
//! them to free slots as earlier tasks finish, counting progress as it goes.

pub mod processor;
pub mod progress_counter;
pub mod task_queue;
pub mod task_scheduler;

pub use processor::{Processor, ProcessorFactory, ProcessorManager};
pub use progress_counter::{ProgressCallback, ProgressCounter};
pub use task_queue::{QueuedTask, TaskQueue};
pub use task_scheduler::{SlotUsage, Task, TaskScheduler, default_worker_count};

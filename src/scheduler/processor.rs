//! Reusable processors and their checkout pool

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::generated_files::GeneratedFiles;
use crate::source::FileContainer;
use crate::{Error, Result};

/// An expensive, reusable unit of parsing work. A processor is owned by exactly one running
/// task at a time and cleared before it is handed to the next one.
pub trait Processor: Send + 'static {
    fn set_unsaved_files(&mut self, files: &[FileContainer]);

    /// Forget everything about the previous task.
    fn clear(&mut self);
}

/// Builds processors on demand.
pub trait ProcessorFactory<P>: Send + Sync {
    fn create_processor(&self) -> Result<P>;
}

impl<P, F> ProcessorFactory<P> for F
where
    F: Fn() -> Result<P> + Send + Sync,
{
    fn create_processor(&self) -> Result<P> {
        self()
    }
}

/// Pool of idle processors. Processors are created lazily, so the pool never holds more
/// processors than there were concurrently running tasks.
pub struct ProcessorManager<P> {
    factory: Box<dyn ProcessorFactory<P>>,
    generated_files: Arc<GeneratedFiles>,
    idle: Mutex<Vec<P>>,
}

impl<P: Processor> ProcessorManager<P> {
    pub fn new(factory: impl ProcessorFactory<P> + 'static, generated_files: Arc<GeneratedFiles>) -> Self {
        Self {
            factory: Box::new(factory),
            generated_files,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Take an idle processor, or build one, primed with the current generated files.
    pub fn checkout(&self) -> Result<P> {
        let idle = self
            .idle
            .lock()
            .map_err(Error::poisoned("processor pool"))?
            .pop();
        let mut processor = match idle {
            Some(processor) => processor,
            None => {
                debug!("Creating a new processor");
                self.factory.create_processor()?
            }
        };
        processor.set_unsaved_files(&self.generated_files.file_containers()?);
        Ok(processor)
    }

    /// Clear a processor and make it available to the next checkout.
    pub fn give_back(&self, mut processor: P) {
        processor.clear();
        match self.idle.lock() {
            Ok(mut idle) => idle.push(processor),
            Err(_) => warn!("Processor pool poisoned, dropping processor"),
        }
    }

    /// Run `f` with a checked out processor and return it afterwards. A processor whose task
    /// panicked is dropped instead of returned.
    pub fn with_processor<R>(&self, f: impl FnOnce(&mut P) -> R) -> Result<R> {
        let mut processor = self.checkout()?;
        let result = f(&mut processor);
        self.give_back(processor);
        Ok(result)
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingProcessor {
        unsaved: usize,
        work: Vec<u32>,
    }

    impl Processor for CountingProcessor {
        fn set_unsaved_files(&mut self, files: &[FileContainer]) {
            self.unsaved = files.len();
        }

        fn clear(&mut self) {
            self.work.clear();
            self.unsaved = 0;
        }
    }

    #[test]
    fn test_processors_are_reused_and_cleared() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let generated = Arc::new(GeneratedFiles::new());
        generated
            .update(vec![FileContainer::new("/gen/a.h", "int a;")])
            .unwrap();

        let manager = ProcessorManager::new(
            move || -> Result<CountingProcessor> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(CountingProcessor::default())
            },
            generated,
        );

        manager
            .with_processor(|processor| {
                assert_eq!(processor.unsaved, 1);
                processor.work.push(7);
            })
            .unwrap();
        assert_eq!(manager.idle_count(), 1);

        let first = manager.checkout().unwrap();
        assert!(first.work.is_empty());
        assert_eq!(created.load(Ordering::SeqCst), 1);

        // a second concurrent checkout needs its own processor
        let second = manager.checkout().unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);
        manager.give_back(first);
        manager.give_back(second);
        assert_eq!(manager.idle_count(), 2);
    }

    #[test]
    fn test_panicking_task_drops_its_processor() {
        let manager = ProcessorManager::new(
            || -> Result<CountingProcessor> { Ok(CountingProcessor::default()) },
            Arc::new(GeneratedFiles::new()),
        );
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            manager
                .with_processor(|processor| {
                    processor.work.push(1);
                    if processor.work.len() == 1 {
                        panic!("task failed");
                    }
                })
                .ok();
        }));
        assert!(outcome.is_err());
        assert_eq!(manager.idle_count(), 0);
    }
}

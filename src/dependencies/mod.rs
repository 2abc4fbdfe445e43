//! Build dependency resolution
//!
//! `BuildDependenciesProvider` answers "what does this project part depend on" from the store
//! when the recorded snapshot is still fresh, and regenerates it through a
//! `BuildDependencyGenerator` otherwise.

pub mod collector;
pub mod provider;

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::Result;
use crate::project::ProjectPartContainer;
use crate::source::BuildDependency;

pub use collector::BuildDependencyCollector;
pub use provider::BuildDependenciesProvider;

/// Recomputes the dependencies of a project part from source.
pub trait BuildDependencyGenerator: Send + Sync {
    /// `alive` is called regularly while the scan runs.
    fn create(&self, part: &ProjectPartContainer, alive: &dyn Fn()) -> Result<BuildDependency>;
}

/// Rate limited liveness signal for a supervising host.
pub struct AliveSignal {
    interval: Duration,
    last: Mutex<Option<Instant>>,
    callback: Box<dyn Fn() + Send + Sync>,
}

impl AliveSignal {
    pub fn new(interval: Duration, callback: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
            callback: Box::new(callback),
        }
    }

    /// A signal nobody listens to.
    pub fn silent() -> Self {
        Self::new(Duration::MAX, || {})
    }

    /// Signal unless the previous signal is more recent than the interval.
    pub fn ping(&self) {
        let now = Instant::now();
        let due = match self.last.lock() {
            Ok(mut last) => {
                let due = last.is_none_or(|at| now.duration_since(at) >= self.interval);
                if due {
                    *last = Some(now);
                }
                due
            }
            Err(_) => true,
        };
        if due {
            (self.callback)();
        }
    }

    /// Signal regardless of the interval.
    pub fn force(&self) {
        if let Ok(mut last) = self.last.lock() {
            *last = Some(Instant::now());
        }
        (self.callback)();
    }
}

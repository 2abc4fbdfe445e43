use std::sync::Mutex;

/// Called with `(completed, total)` whenever either changes.
pub type ProgressCallback = Box<dyn Fn(usize, usize) + Send + Sync>;

/// Completed vs. known task counts. Once everything known has completed the counter
/// reports `(total, total)` and starts over at `(0, 0)`.
pub struct ProgressCounter {
    counts: Mutex<(usize, usize)>,
    callback: ProgressCallback,
}

impl ProgressCounter {
    pub fn new(callback: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        Self {
            counts: Mutex::new((0, 0)),
            callback: Box::new(callback),
        }
    }

    pub fn add_total(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.update(|progress, total| (progress, total + count));
    }

    /// `add_total` that runs `queued` under the counter's lock first. A completion report can
    /// not fall between the two.
    pub fn add_total_with(&self, count: usize, queued: impl FnOnce()) {
        if count == 0 {
            if let Ok(_counts) = self.counts.lock() {
                queued();
            }
            return;
        }
        self.update(|progress, total| {
            queued();
            (progress, total + count)
        });
    }

    pub fn remove_total(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.update(|progress, total| (progress, total.saturating_sub(count)));
    }

    pub fn add_progress(&self, count: usize) {
        self.update(|progress, total| (progress + count, total));
    }

    /// Current `(completed, total)`.
    pub fn counts(&self) -> (usize, usize) {
        self.counts.lock().map(|c| *c).unwrap_or_default()
    }

    /// The callback runs under the lock so reports arrive in order. It must not call back
    /// into the counter.
    fn update(&self, change: impl FnOnce(usize, usize) -> (usize, usize)) {
        let Ok(mut counts) = self.counts.lock() else {
            return;
        };
        let (progress, total) = change(counts.0, counts.1);
        let progress = progress.min(total);
        *counts = if progress >= total { (0, 0) } else { (progress, total) };
        (self.callback)(progress, total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recording() -> (ProgressCounter, Arc<Mutex<Vec<(usize, usize)>>>) {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let counter = ProgressCounter::new(move |progress, total| {
            sink.lock().unwrap().push((progress, total));
        });
        (counter, reports)
    }

    #[test]
    fn test_progress_reports_and_resets() {
        let (counter, reports) = recording();
        counter.add_total(3);
        counter.add_progress(1);
        counter.add_progress(2);
        counter.add_total(2);

        assert_eq!(
            *reports.lock().unwrap(),
            vec![(0, 3), (1, 3), (3, 3), (0, 2)]
        );
        assert_eq!(counter.counts(), (0, 2));
    }

    #[test]
    fn test_add_total_with_runs_before_the_report() {
        let (counter, reports) = recording();
        let seen = Arc::clone(&reports);
        counter.add_total_with(2, || assert!(seen.lock().unwrap().is_empty()));
        assert_eq!(*reports.lock().unwrap(), vec![(0, 2)]);
    }

    #[test]
    fn test_removing_total_can_complete() {
        let (counter, reports) = recording();
        counter.add_total(4);
        counter.add_progress(2);
        counter.remove_total(2);

        assert_eq!(reports.lock().unwrap().last(), Some(&(2, 2)));
        assert_eq!(counter.counts(), (0, 0));
    }
}

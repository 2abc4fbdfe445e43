use crate::storage::DbStats;
use crate::ui::progress_message::{ProgressMessage, ProgressPhase};
use crate::ui::{Role, theme};
use crate::ui::Icons;
use indicatif::{HumanDuration, MultiProgress, ProgressBar};
use std::thread;
use std::time::Duration;

pub struct ProgressManager {
    mp: MultiProgress,
    indexing: ProgressBar,
    querying: ProgressBar,
    sender: crossbeam::channel::Sender<ProgressMessage>,
    handle: Option<thread::JoinHandle<()>>,
}

fn bar(mp: &MultiProgress, bar: ProgressBar) -> ProgressBar {
    if console::Term::stdout().is_term() {
        mp.add(bar)
    } else {
        ProgressBar::hidden()
    }
}

fn phase_bar<'a>(phase: ProgressPhase, indexing: &'a ProgressBar, querying: &'a ProgressBar) -> &'a ProgressBar {
    match phase {
        ProgressPhase::Indexing => indexing,
        ProgressPhase::Querying => querying,
    }
}

impl ProgressManager {
    pub fn new() -> (Self, crossbeam::channel::Sender<ProgressMessage>) {
        let (tx, rx) = crossbeam::channel::unbounded::<ProgressMessage>();

        let mp = MultiProgress::new();
        let indexing = bar(&mp, ProgressBar::new(0).with_message("Indexing sources"));
        let querying = bar(&mp, ProgressBar::new_spinner().with_message("Matching sources"));

        let indexing_clone = indexing.clone();
        let querying_clone = querying.clone();
        let mp_clone = mp.clone();

        let handle = thread::spawn(move || {
            for msg in rx {
                let bar = |phase| phase_bar(phase, &indexing_clone, &querying_clone);
                match msg {
                    ProgressMessage::Started { phase, total } => {
                        let bar = bar(phase);
                        bar.set_length(total as u64);
                        bar.enable_steady_tick(Duration::from_millis(100));
                    }
                    ProgressMessage::Progress { phase, current, total } => {
                        let bar = bar(phase);
                        bar.set_length(total as u64);
                        bar.set_position(current as u64);
                    }
                    ProgressMessage::Finished { phase } => {
                        bar(phase).finish_with_message("Done");
                    }
                    ProgressMessage::FileModified(path) => {
                        mp_clone
                            .println(format!("{} {}", theme().paint(Role::Warn, Icons::MOD), path))
                            .ok();
                    }
                    ProgressMessage::FileDeleted(path) => {
                        mp_clone
                            .println(format!("{} {}", theme().paint(Role::Error, Icons::DEL), path))
                            .ok();
                    }
                    ProgressMessage::Error(message) => {
                        mp_clone
                            .println(format!("{} {}", Icons::CROSS, theme().paint(Role::Error, message)))
                            .ok();
                    }
                    ProgressMessage::Exit => break,
                }
            }
        });

        (
            Self {
                mp,
                indexing,
                querying,
                sender: tx.clone(),
                handle: Some(handle),
            },
            tx,
        )
    }

    pub fn sender(&self) -> crossbeam::channel::Sender<ProgressMessage> {
        self.sender.clone()
    }

    pub fn clear(&self) {
        self.mp.clear().ok();
    }

    /// Stop the display thread once it drained the messages sent so far.
    pub fn shutdown(&mut self) {
        let _ = self.sender.send(ProgressMessage::Exit);
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
        self.indexing.finish_and_clear();
        self.querying.finish_and_clear();
    }

    pub fn finish_with_summary(&mut self, duration: Duration, stats: &DbStats) {
        self.shutdown();
        self.clear();
        println!();
        println!(
            "{} {}",
            theme().paint(Role::Success, Icons::CHECK),
            theme().paint(Role::Success, format!("Complete in {}", HumanDuration(duration)))
        );
        println!(
            "  {} {}  {} {}  {} {}",
            theme().paint(Role::Info, Icons::FILE),
            stats.sources,
            theme().paint(Role::Info, Icons::PACKAGE),
            stats.symbols,
            theme().paint(Role::Info, Icons::LINK),
            stats.locations
        );
    }
}

impl Drop for ProgressManager {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown();
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ProgressPhase {
    Indexing,
    Querying,
}

#[derive(Clone, Debug)]
pub enum ProgressMessage {
    Started {
        phase: ProgressPhase,
        total: usize,
    },
    /// `current` out of `total`; the total grows while tasks are added.
    Progress {
        phase: ProgressPhase,
        current: usize,
        total: usize,
    },
    Finished {
        phase: ProgressPhase,
    },
    FileModified(String),
    FileDeleted(String),
    Error(String),
    Exit,
}

use serde::Serialize;

/// Lifecycle of the indexing coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum IndexerState {
    #[default]
    NotInitialized,
    /// The first round of parse tasks is running.
    WaitingForParseJob,
    /// A later round is running on top of an initialized index.
    WaitingForReparseJob,
    Initialized,
    Aborted,
}

impl IndexerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexerState::NotInitialized => "not initialized",
            IndexerState::WaitingForParseJob => "waiting for parse job",
            IndexerState::WaitingForReparseJob => "waiting for reparse job",
            IndexerState::Initialized => "initialized",
            IndexerState::Aborted => "aborted",
        }
    }

    pub fn is_waiting(self) -> bool {
        matches!(
            self,
            IndexerState::WaitingForParseJob | IndexerState::WaitingForReparseJob
        )
    }

    /// Tasks were queued.
    pub fn on_update(self) -> Self {
        match self {
            IndexerState::NotInitialized => IndexerState::WaitingForParseJob,
            IndexerState::Initialized => IndexerState::WaitingForReparseJob,
            other => other,
        }
    }

    /// Every queued task finished.
    pub fn on_finished(self) -> Self {
        match self {
            IndexerState::WaitingForParseJob | IndexerState::WaitingForReparseJob => {
                IndexerState::Initialized
            }
            other => other,
        }
    }

    pub fn on_abort(self) -> Self {
        if self.is_waiting() {
            IndexerState::Aborted
        } else {
            self
        }
    }
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_then_reparse() {
        let state = IndexerState::default().on_update();
        assert_eq!(state, IndexerState::WaitingForParseJob);
        let state = state.on_finished();
        assert_eq!(state, IndexerState::Initialized);
        assert_eq!(state.on_update(), IndexerState::WaitingForReparseJob);
    }

    #[test]
    fn test_abort_only_from_waiting_states() {
        assert_eq!(IndexerState::WaitingForParseJob.on_abort(), IndexerState::Aborted);
        assert_eq!(IndexerState::WaitingForReparseJob.on_abort(), IndexerState::Aborted);
        assert_eq!(IndexerState::Initialized.on_abort(), IndexerState::Initialized);
        assert_eq!(IndexerState::Aborted.on_update(), IndexerState::Aborted);
        assert_eq!(IndexerState::Aborted.on_finished(), IndexerState::Aborted);
    }
}

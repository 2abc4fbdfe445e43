//! # symref - incremental C/C++ symbol indexing and structural queries
//!
//! symref keeps a durable SQLite snapshot of the symbols, locations, macros, file statuses and
//! include edges of a set of project parts, and reindexes only what went stale.
//!
//! symref provides:
//! - A persistent symbol store with a one-time initialized schema
//! - Freshness tracking against filesystem metadata
//! - Build dependency resolution, cached or regenerated through a tree-sitter C/C++ front-end
//! - A bounded worker pool with reusable parser processors
//! - Streaming, cancellable structural queries (`functionDecl(hasName("f"))`)
//! - Symbol location and usage lookups

pub mod config;
pub mod source;
pub mod symbol;
pub mod project;
pub mod storage;
pub mod freshness;
pub mod generated_files;
pub mod frontend;
pub mod dependencies;
pub mod scheduler;
pub mod indexer;
pub mod matcher;
pub mod gatherer;
pub mod query;
pub mod service;
pub mod watcher;
pub mod ignore;
pub mod ui;

// Re-exports for convenient access
pub use source::{FilePathId, SourceEntry, SourceType, FileStatus, UsedMacro, SourceDependency, BuildDependency, FileContainer};
pub use symbol::{SymbolId, SymbolKind, SourceLocationKind};
pub use project::{ProjectPartId, ProjectPartContainer};
pub use storage::{Database, FilePathCache};
pub use service::{RefactoringService, RefactoringClient};

/// Result type alias for symref operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for symref operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("File path id not found: {0}")]
    FilePathNotFound(i64),

    #[error("Path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(std::path::PathBuf),

    #[error("Project part not found: {0}")]
    ProjectPartNotFound(String),

    #[error("Dependency generation failed: {0}")]
    Generator(String),

    #[error("Watcher error: {0}")]
    Watcher(#[from] notify::Error),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl Error {
    /// Map a poisoned mutex/rwlock guard into a crate error naming the lock.
    pub(crate) fn poisoned<T>(lock: &'static str) -> impl FnOnce(std::sync::PoisonError<T>) -> Error {
        move |_| Error::LockPoisoned(lock)
    }
}

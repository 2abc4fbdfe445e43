//! Freshness of recorded sources against the filesystem

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, trace};

use crate::source::{FilePathId, FileStatus, SourceEntry};
use crate::storage::FilePathCache;

/// Filesystem metadata by source id.
pub trait FileSystem: Send + Sync {
    /// Current size and modification time, `None` if the file cannot be stat'ed.
    fn file_status(&self, id: FilePathId) -> Option<FileStatus>;

    fn last_modified(&self, id: FilePathId) -> Option<i64> {
        self.file_status(id).map(|status| status.last_modified)
    }
}

/// Stats the real files behind the ids known to a [`FilePathCache`].
pub struct RealFileSystem {
    file_paths: Arc<FilePathCache>,
}

impl RealFileSystem {
    pub fn new(file_paths: Arc<FilePathCache>) -> Self {
        Self { file_paths }
    }
}

impl FileSystem for RealFileSystem {
    fn file_status(&self, id: FilePathId) -> Option<FileStatus> {
        let path = match self.file_paths.file_path(id) {
            Ok(path) => path,
            Err(e) => {
                debug!("No path for source {}: {}", id, e);
                return None;
            }
        };
        stat(&path, id)
    }
}

/// Size and modification time of `path`.
pub fn stat(path: &Path, id: FilePathId) -> Option<FileStatus> {
    let metadata = std::fs::metadata(path).ok()?;
    let modified = metadata.modified().ok()?;
    Some(FileStatus::new(
        id,
        metadata.len() as i64,
        system_time_to_nanos(modified),
    ))
}

/// Nanoseconds since the Unix epoch; times before the epoch map to zero.
pub fn system_time_to_nanos(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Decides whether a recorded dependency snapshot can still be trusted.
pub struct ModifiedTimeChecker<F> {
    file_system: F,
}

impl<F: FileSystem> ModifiedTimeChecker<F> {
    pub fn new(file_system: F) -> Self {
        Self { file_system }
    }

    pub fn file_system(&self) -> &F {
        &self.file_system
    }

    /// True only if every entry is known, has no missing includes, can be stat'ed and was not
    /// modified after it was last indexed. An empty list is never up to date.
    pub fn is_up_to_date(&self, entries: &[SourceEntry]) -> bool {
        if entries.is_empty() {
            return false;
        }

        entries.iter().all(|entry| {
            if entry.has_missing_includes {
                trace!("Source {} has missing includes", entry.source_id);
                return false;
            }
            match self.file_system.last_modified(entry.source_id) {
                Some(current) if current <= entry.last_modified => true,
                Some(current) => {
                    trace!(
                        "Source {} modified at {} after indexing at {}",
                        entry.source_id, current, entry.last_modified
                    );
                    false
                }
                None => {
                    debug!("Cannot stat source {}, treating it as stale", entry.source_id);
                    false
                }
            }
        })
    }
}

impl<F: FileSystem + ?Sized> FileSystem for Arc<F> {
    fn file_status(&self, id: FilePathId) -> Option<FileStatus> {
        (**self).file_status(id)
    }
}

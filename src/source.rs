//! Source file types shared by the store, the resolver and the front-end.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Persisted id of a source file (row id of `sources`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FilePathId(pub i64);

impl FilePathId {
    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for FilePathId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a source takes part in a project part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// A translation unit listed by the project part
    Source,
    /// A header listed by the project part
    ProjectInclude,
    /// A header found through the including directory or a user include path
    UserInclude,
    /// A header found through a system or built-in include path
    SystemInclude,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Source => "source",
            SourceType::ProjectInclude => "project_include",
            SourceType::UserInclude => "user_include",
            SourceType::SystemInclude => "system_include",
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            SourceType::Source => 0,
            SourceType::ProjectInclude => 1,
            SourceType::UserInclude => 2,
            SourceType::SystemInclude => 3,
        }
    }

    pub fn from_i64(value: i64) -> Result<Self> {
        match value {
            0 => Ok(SourceType::Source),
            1 => Ok(SourceType::ProjectInclude),
            2 => Ok(SourceType::UserInclude),
            3 => Ok(SourceType::SystemInclude),
            _ => Err(Error::Parse(format!("Unknown source type: {}", value))),
        }
    }
}

impl FromStr for SourceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "source" => Ok(SourceType::Source),
            "project_include" => Ok(SourceType::ProjectInclude),
            "user_include" => Ok(SourceType::UserInclude),
            "system_include" => Ok(SourceType::SystemInclude),
            _ => Err(Error::Parse(format!("Unknown source type: {}", s))),
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A source known to a project part together with the timestamp of its last indexing.
///
/// `last_modified` is the modification time (nanoseconds since the epoch) the source had
/// when it was last indexed, zero if it never was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceEntry {
    pub source_id: FilePathId,
    pub source_type: SourceType,
    pub last_modified: i64,
    pub has_missing_includes: bool,
}

impl SourceEntry {
    pub fn new(source_id: FilePathId, source_type: SourceType, last_modified: i64) -> Self {
        Self {
            source_id,
            source_type,
            last_modified,
            has_missing_includes: false,
        }
    }

    pub fn with_missing_includes(mut self, missing: bool) -> Self {
        self.has_missing_includes = missing;
        self
    }
}

/// Size and modification time of a file as seen on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileStatus {
    pub source_id: FilePathId,
    pub size: i64,
    pub last_modified: i64,
}

impl FileStatus {
    pub fn new(source_id: FilePathId, size: i64, last_modified: i64) -> Self {
        Self {
            source_id,
            size,
            last_modified,
        }
    }
}

/// A macro referenced while compiling a source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UsedMacro {
    pub source_id: FilePathId,
    pub macro_name: String,
}

impl UsedMacro {
    pub fn new(macro_name: impl Into<String>, source_id: FilePathId) -> Self {
        Self {
            source_id,
            macro_name: macro_name.into(),
        }
    }
}

/// Directed include edge: `source_id` includes `dependency_source_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceDependency {
    pub source_id: FilePathId,
    pub dependency_source_id: FilePathId,
}

impl SourceDependency {
    pub fn new(source_id: FilePathId, dependency_source_id: FilePathId) -> Self {
        Self {
            source_id,
            dependency_source_id,
        }
    }
}

/// Everything indexing a project part depended on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildDependency {
    pub sources: Vec<SourceEntry>,
    pub used_macros: Vec<UsedMacro>,
    pub source_files: Vec<FilePathId>,
    pub source_dependencies: Vec<SourceDependency>,
    pub file_statuses: Vec<FileStatus>,
}

impl BuildDependency {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
            && self.used_macros.is_empty()
            && self.source_files.is_empty()
            && self.source_dependencies.is_empty()
            && self.file_statuses.is_empty()
    }

    /// Sort every facet and drop duplicates. Sources are keyed by id.
    pub fn normalize(&mut self) {
        self.sources.sort_by_key(|entry| entry.source_id);
        self.sources.dedup_by_key(|entry| entry.source_id);
        self.used_macros.sort();
        self.used_macros.dedup();
        self.source_files.sort();
        self.source_files.dedup();
        self.source_dependencies.sort();
        self.source_dependencies.dedup();
        self.file_statuses.sort_by_key(|status| status.source_id);
        self.file_statuses.dedup_by_key(|status| status.source_id);
    }
}

/// An unsaved or generated file overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContainer {
    pub file_path: PathBuf,
    pub content: String,
    #[serde(default)]
    pub command_line_arguments: Vec<String>,
}

impl FileContainer {
    pub fn new(file_path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            content: content.into(),
            command_line_arguments: Vec::new(),
        }
    }

    pub fn with_arguments(mut self, arguments: Vec<String>) -> Self {
        self.command_line_arguments = arguments;
        self
    }
}

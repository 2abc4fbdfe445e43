//! Storage Layer - SQLite-backed persistence
//!
//! The system of record is one SQLite file with tables:
//! - symbols(usr, name, kind, signature), locations(symbol, source, line, column, kind)
//! - directories(path), sources(directory, name)
//! - project_parts(name, configuration), project_parts_files(part, source, type)
//! - used_macros(source, name), file_statuses(source, size, mtime, indexing stamp)
//! - source_dependencies(source, dependency), precompiled_headers(part, paths, times)
//!
//! Facets are traits over a borrowed `rusqlite::Connection`; callers own the transaction.

pub mod schema;
pub mod sqlite;
pub mod file_paths;
pub mod build_dependencies;
pub mod symbols;
pub mod project_parts;
pub mod precompiled_headers;

pub use sqlite::{Database, DbStats};
pub use file_paths::FilePathCache;
pub use build_dependencies::{BuildDependenciesStorage, SqliteBuildDependenciesStorage};
pub use symbols::{SqliteSymbolStorage, SymbolStorage};
pub use project_parts::{ProjectPartsStorage, SqliteProjectPartsStorage};
pub use precompiled_headers::{PrecompiledHeaderInfo, PrecompiledHeaderStorage, SqlitePrecompiledHeaderStorage};

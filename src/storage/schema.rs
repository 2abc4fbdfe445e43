//! Database schema definitions
//!
//! The schema is created once, inside a single exclusive transaction, and then marked as
//! initialized in the `meta` table. Opening an initialized database never touches the DDL again.

use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

use crate::Result;

pub const SCHEMA_VERSION: i64 = 1;

pub const CREATE_META_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    val TEXT NOT NULL
)
"#;

pub const CREATE_SYMBOLS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS symbols (
    symbol_id INTEGER PRIMARY KEY,
    usr TEXT NOT NULL,
    symbol_name TEXT NOT NULL,
    symbol_kind INTEGER NOT NULL,
    signature TEXT
)
"#;

pub const CREATE_LOCATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS locations (
    symbol_id INTEGER NOT NULL,
    line INTEGER NOT NULL,
    column INTEGER NOT NULL,
    source_id INTEGER NOT NULL,
    location_kind INTEGER NOT NULL
)
"#;

pub const CREATE_SOURCES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS sources (
    source_id INTEGER PRIMARY KEY,
    directory_id INTEGER NOT NULL,
    source_name TEXT NOT NULL
)
"#;

pub const CREATE_DIRECTORIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS directories (
    directory_id INTEGER PRIMARY KEY,
    directory_path TEXT NOT NULL
)
"#;

pub const CREATE_PROJECT_PARTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS project_parts (
    project_part_id INTEGER PRIMARY KEY,
    project_part_name TEXT NOT NULL,
    tool_chain_arguments TEXT,
    compiler_macros TEXT,
    system_include_search_paths TEXT,
    project_include_search_paths TEXT,
    language INTEGER,
    language_version INTEGER,
    language_extension INTEGER
)
"#;

pub const CREATE_PROJECT_PARTS_FILES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS project_parts_files (
    project_part_id INTEGER NOT NULL,
    source_id INTEGER NOT NULL,
    source_type INTEGER NOT NULL,
    pch_creation_time_stamp INTEGER,
    has_missing_includes INTEGER NOT NULL DEFAULT 0
)
"#;

pub const CREATE_USED_MACROS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS used_macros (
    used_macro_id INTEGER PRIMARY KEY,
    source_id INTEGER NOT NULL,
    macro_name TEXT NOT NULL
)
"#;

pub const CREATE_FILE_STATUSES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS file_statuses (
    source_id INTEGER PRIMARY KEY,
    size INTEGER,
    last_modified INTEGER,
    indexing_time_stamp INTEGER
)
"#;

pub const CREATE_SOURCE_DEPENDENCIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS source_dependencies (
    source_id INTEGER NOT NULL,
    dependency_source_id INTEGER NOT NULL
)
"#;

pub const CREATE_PRECOMPILED_HEADERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS precompiled_headers (
    project_part_id INTEGER PRIMARY KEY,
    project_pch_path TEXT,
    project_pch_build_time INTEGER,
    system_pch_path TEXT,
    system_pch_build_time INTEGER
)
"#;

pub const CREATE_PROJECT_PARTS_HEADERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS project_parts_headers (
    project_part_id INTEGER NOT NULL,
    source_id INTEGER NOT NULL
)
"#;

pub const CREATE_PROJECT_PARTS_SOURCES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS project_parts_sources (
    project_part_id INTEGER NOT NULL,
    source_id INTEGER NOT NULL
)
"#;

pub const CREATE_INDEXES: &[&str] = &[
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_symbols_usr ON symbols(usr)",
    "CREATE INDEX IF NOT EXISTS idx_symbols_kind_name ON symbols(symbol_kind, symbol_name)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_locations_source_line_column ON locations(source_id, line, column)",
    "CREATE INDEX IF NOT EXISTS idx_locations_source_kind ON locations(source_id, location_kind)",
    "CREATE INDEX IF NOT EXISTS idx_locations_symbol ON locations(symbol_id)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_sources_directory_name ON sources(directory_id, source_name)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_directories_path ON directories(directory_path)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_project_parts_name ON project_parts(project_part_name)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_project_parts_files_source_part ON project_parts_files(source_id, project_part_id)",
    "CREATE INDEX IF NOT EXISTS idx_project_parts_files_part_type ON project_parts_files(project_part_id, source_type)",
    "CREATE INDEX IF NOT EXISTS idx_used_macros_source_name ON used_macros(source_id, macro_name)",
    "CREATE INDEX IF NOT EXISTS idx_used_macros_name ON used_macros(macro_name)",
    "CREATE INDEX IF NOT EXISTS idx_source_dependencies_source ON source_dependencies(source_id, dependency_source_id)",
    "CREATE INDEX IF NOT EXISTS idx_source_dependencies_dependency ON source_dependencies(dependency_source_id, source_id)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_project_parts_headers ON project_parts_headers(project_part_id, source_id)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_project_parts_sources ON project_parts_sources(project_part_id, source_id)",
];

/// All schema creation statements
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut stmts = vec![
        CREATE_META_TABLE,
        CREATE_SYMBOLS_TABLE,
        CREATE_LOCATIONS_TABLE,
        CREATE_SOURCES_TABLE,
        CREATE_DIRECTORIES_TABLE,
        CREATE_PROJECT_PARTS_TABLE,
        CREATE_PROJECT_PARTS_FILES_TABLE,
        CREATE_USED_MACROS_TABLE,
        CREATE_FILE_STATUSES_TABLE,
        CREATE_SOURCE_DEPENDENCIES_TABLE,
        CREATE_PRECOMPILED_HEADERS_TABLE,
        CREATE_PROJECT_PARTS_HEADERS_TABLE,
        CREATE_PROJECT_PARTS_SOURCES_TABLE,
    ];
    stmts.extend(CREATE_INDEXES.iter().copied());
    stmts
}

/// Schema version recorded in `meta`, zero when the database was never initialized.
pub fn schema_version(conn: &Connection) -> Result<i64> {
    let has_meta: bool = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'meta'",
        [],
        |row| row.get::<_, i64>(0).map(|count| count > 0),
    )?;
    if !has_meta {
        return Ok(0);
    }

    let version: Option<String> = conn
        .query_row("SELECT val FROM meta WHERE key = 'schema_version'", [], |row| {
            row.get(0)
        })
        .optional()?;

    Ok(version.and_then(|v| v.parse().ok()).unwrap_or(0))
}

/// Create every table and index unless the initialized marker is already present.
///
/// Must run inside an exclusive transaction so that two processes opening the same fresh file
/// cannot both create the schema.
pub fn initialize(conn: &Connection) -> Result<bool> {
    if schema_version(conn)? >= SCHEMA_VERSION {
        return Ok(false);
    }

    info!("Creating symbol database schema");
    for stmt in all_schema_statements() {
        conn.execute(stmt, [])?;
    }
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, val) VALUES ('schema_version', ?1)",
        params![SCHEMA_VERSION.to_string()],
    )?;
    Ok(true)
}

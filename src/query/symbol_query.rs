//! Read-only symbol lookups
//!
//! Provides the lookups behind "find references", "rename preview", "go to declaration" and
//! locator-style symbol search:
//! - Locations and usages of the symbol at a position
//! - Declaration and definition of the symbol at a position
//! - Symbols of some kinds whose name starts with a prefix

use std::path::PathBuf;
use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::source::FilePathId;
use crate::storage::Database;
use crate::symbol::{SourceLocationKind, Symbol, SymbolId, SymbolKind};

/// A stored location of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub source_id: FilePathId,
    pub line: u32,
    pub column: u32,
    pub kind: SourceLocationKind,
}

/// A location resolved to its file path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceUsage {
    pub path: PathBuf,
    pub line: u32,
    pub column: u32,
}

impl std::fmt::Display for SourceUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.path.display(), self.line, self.column)
    }
}

const SYMBOL_AT: &str =
    "(SELECT symbol_id FROM locations WHERE source_id = ?1 AND line = ?2 AND column = ?3)";

pub struct SymbolQuery {
    database: Arc<Database>,
}

impl SymbolQuery {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    /// Every location of the symbol found at `source:line:column`, ordered by source and position.
    pub fn locations_at(&self, source: FilePathId, line: u32, column: u32) -> Result<Vec<SourceLocation>> {
        let sql = format!(
            "SELECT source_id, line, column, location_kind FROM locations WHERE symbol_id = {} \
             ORDER BY source_id, line, column",
            SYMBOL_AT
        );
        self.database.read(|conn| {
            let mut stmt = conn.prepare_cached(&sql)?;
            let locations = stmt
                .query_map(params![source.0, line, column], location_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            collect_locations(locations)
        })
    }

    /// Locations of the symbol at `source:line:column` with their paths resolved.
    pub fn source_usages_at(&self, source: FilePathId, line: u32, column: u32) -> Result<Vec<SourceUsage>> {
        let sql = format!("{} ORDER BY l.source_id, l.line, l.column", usages_sql(""));
        self.database
            .read(|conn| query_usages(conn, &sql, params![source.0, line, column]))
    }

    /// Like `source_usages_at`, restricted to one location kind.
    pub fn source_usages_at_by_kind(
        &self,
        source: FilePathId,
        line: u32,
        column: u32,
        kind: SourceLocationKind,
    ) -> Result<Vec<SourceUsage>> {
        let sql = format!(
            "{} ORDER BY l.source_id, l.line, l.column",
            usages_sql("AND l.location_kind = ?4")
        );
        self.database.read(|conn| {
            query_usages(conn, &sql, params![source.0, line, column, kind.as_i64()])
        })
    }

    /// The first two usages ordered by kind: the declaration, then the definition when both exist.
    pub fn declarations_at(&self, source: FilePathId, line: u32, column: u32) -> Result<Vec<SourceUsage>> {
        let sql = format!(
            "{} ORDER BY l.location_kind, l.source_id, l.line, l.column LIMIT 2",
            usages_sql("")
        );
        self.database
            .read(|conn| query_usages(conn, &sql, params![source.0, line, column]))
    }

    /// Symbols of one of `kinds` whose name starts with `prefix`, ordered by name.
    pub fn symbols_with_kind_and_starts_with(&self, kinds: &[SymbolKind], prefix: &str) -> Result<Vec<Symbol>> {
        if kinds.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (0..kinds.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT symbol_id, usr, symbol_name, symbol_kind, signature FROM symbols \
             WHERE symbol_name LIKE ?1 ESCAPE '\\' AND symbol_kind IN ({}) \
             ORDER BY symbol_name, symbol_id",
            placeholders
        );

        let mut values: Vec<rusqlite::types::Value> = Vec::with_capacity(kinds.len() + 1);
        values.push(format!("{}%", escape_like(prefix)).into());
        values.extend(kinds.iter().map(|kind| rusqlite::types::Value::from(kind.as_i64())));

        self.database.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(id, usr, name, kind, signature)| {
                    Ok(Symbol {
                        id: SymbolId(id),
                        usr,
                        name,
                        kind: SymbolKind::from_i64(kind)?,
                        signature,
                    })
                })
                .collect()
        })
    }

    /// The first location of `symbol` with the given kind.
    pub fn location_for_symbol_id(
        &self,
        symbol: SymbolId,
        kind: SourceLocationKind,
    ) -> Result<Option<SourceLocation>> {
        self.database.read(|conn| {
            let location = conn
                .query_row(
                    "SELECT source_id, line, column, location_kind FROM locations \
                     WHERE symbol_id = ?1 AND location_kind = ?2 ORDER BY source_id, line, column LIMIT 1",
                    params![symbol.0, kind.as_i64()],
                    location_from_row,
                )
                .optional()?;
            location.map(|raw| raw.into_location()).transpose()
        })
    }

    pub fn locations_for_symbol_id(&self, symbol: SymbolId) -> Result<Vec<SourceLocation>> {
        self.database.read(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT source_id, line, column, location_kind FROM locations \
                 WHERE symbol_id = ?1 ORDER BY source_id, line, column",
            )?;
            let locations = stmt
                .query_map(params![symbol.0], location_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            collect_locations(locations)
        })
    }
}

struct RawLocation {
    source_id: i64,
    line: u32,
    column: u32,
    kind: i64,
}

impl RawLocation {
    fn into_location(self) -> Result<SourceLocation> {
        Ok(SourceLocation {
            source_id: FilePathId(self.source_id),
            line: self.line,
            column: self.column,
            kind: SourceLocationKind::from_i64(self.kind)?,
        })
    }
}

fn location_from_row(row: &Row) -> rusqlite::Result<RawLocation> {
    Ok(RawLocation {
        source_id: row.get(0)?,
        line: row.get(1)?,
        column: row.get(2)?,
        kind: row.get(3)?,
    })
}

fn collect_locations(raw: Vec<RawLocation>) -> Result<Vec<SourceLocation>> {
    raw.into_iter().map(RawLocation::into_location).collect()
}

fn usages_sql(extra_condition: &str) -> String {
    format!(
        "SELECT d.directory_path || '/' || s.source_name, l.line, l.column \
         FROM locations AS l \
         JOIN sources AS s ON s.source_id = l.source_id \
         JOIN directories AS d ON d.directory_id = s.directory_id \
         WHERE l.symbol_id = {} {}",
        SYMBOL_AT, extra_condition
    )
}

fn query_usages(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<SourceUsage>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let usages = stmt
        .query_map(params, |row| {
            Ok(SourceUsage {
                path: PathBuf::from(row.get::<_, String>(0)?),
                line: row.get(1)?,
                column: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(usages)
}

fn escape_like(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> SymbolQuery {
        let database = Arc::new(Database::open_in_memory().unwrap());
        database
            .write(|conn| {
                conn.execute_batch(
                    r#"
                    INSERT INTO directories VALUES (1, '/path/to');
                    INSERT INTO sources VALUES (1, 1, 'filename.h');
                    INSERT INTO sources VALUES (2, 1, 'filename.cpp');
                    INSERT INTO symbols VALUES (1, 'functionusr', 'function', 0, 'void function()');
                    INSERT INTO symbols VALUES (2, 'c:@F@functional#', 'functional', 0, NULL);
                    INSERT INTO symbols VALUES (3, 'c:@S@function_t', 'function_t', 3, NULL);
                    INSERT INTO symbols VALUES (4, 'c:@V@fun', 'fun', 1, NULL);
                    INSERT INTO locations VALUES (1, 2, 3, 1, 0);
                    INSERT INTO locations VALUES (1, 4, 6, 2, 2);
                    INSERT INTO locations VALUES (1, 9, 6, 2, 1);
                    "#,
                )?;
                Ok(())
            })
            .unwrap();
        SymbolQuery::new(database)
    }

    #[test]
    fn test_locations_at() {
        let query = fixture();
        let locations = query.locations_at(FilePathId(2), 4, 6).unwrap();
        assert_eq!(
            locations
                .iter()
                .map(|l| (l.source_id, l.line, l.column))
                .collect::<Vec<_>>(),
            vec![(FilePathId(1), 2, 3), (FilePathId(2), 4, 6), (FilePathId(2), 9, 6)]
        );
        assert!(query.locations_at(FilePathId(1), 4, 6).unwrap().is_empty());
    }

    #[test]
    fn test_source_usages_at() {
        let query = fixture();
        let usages: Vec<String> = query
            .source_usages_at(FilePathId(2), 4, 6)
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            usages,
            vec![
                "/path/to/filename.h:2:3".to_string(),
                "/path/to/filename.cpp:4:6".to_string(),
                "/path/to/filename.cpp:9:6".to_string(),
            ]
        );
    }

    #[test]
    fn test_usages_by_kind_and_declarations() {
        let query = fixture();
        let references = query
            .source_usages_at_by_kind(FilePathId(1), 2, 3, SourceLocationKind::DeclarationReference)
            .unwrap();
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].line, 4);

        let declarations = query.declarations_at(FilePathId(2), 4, 6).unwrap();
        assert_eq!(
            declarations.iter().map(|u| (u.line, u.column)).collect::<Vec<_>>(),
            vec![(2, 3), (9, 6)]
        );
    }

    #[test]
    fn test_symbols_with_kind_and_starts_with() {
        let query = fixture();
        let names = |symbols: Vec<Symbol>| symbols.into_iter().map(|s| s.name).collect::<Vec<_>>();

        assert_eq!(
            names(query.symbols_with_kind_and_starts_with(&[SymbolKind::Function], "func").unwrap()),
            vec!["function", "functional"]
        );
        assert_eq!(
            names(
                query
                    .symbols_with_kind_and_starts_with(&[SymbolKind::Function, SymbolKind::Record], "function_")
                    .unwrap()
            ),
            vec!["function_t"]
        );
        assert!(query.symbols_with_kind_and_starts_with(&[], "f").unwrap().is_empty());
    }

    #[test]
    fn test_locations_for_symbol_id() {
        let query = fixture();
        let definition = query
            .location_for_symbol_id(SymbolId(1), SourceLocationKind::Definition)
            .unwrap()
            .unwrap();
        assert_eq!((definition.source_id, definition.line, definition.column), (FilePathId(2), 9, 6));
        assert!(query
            .location_for_symbol_id(SymbolId(4), SourceLocationKind::Definition)
            .unwrap()
            .is_none());
        assert_eq!(query.locations_for_symbol_id(SymbolId(1)).unwrap().len(), 3);
    }
}

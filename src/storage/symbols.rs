//! Symbols and their locations

use std::collections::{BTreeSet, HashMap};

use rusqlite::{Connection, params};
use tracing::debug;

use crate::Result;
use crate::source::FilePathId;
use crate::symbol::{SourceLocationEntry, SymbolEntries, SymbolId, SymbolIndex};

pub trait SymbolStorage: Send + Sync {
    /// Upsert `symbols` by USR and replace the locations of every source that occurs in
    /// `locations`. Runs on the caller's transaction.
    fn add_symbols_and_source_locations(
        &self,
        conn: &Connection,
        symbols: &SymbolEntries,
        locations: &[SourceLocationEntry],
    ) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteSymbolStorage;

impl SqliteSymbolStorage {
    fn upsert_symbols(
        &self,
        conn: &Connection,
        symbols: &SymbolEntries,
    ) -> Result<HashMap<SymbolIndex, SymbolId>> {
        let mut upsert = conn.prepare_cached(
            r#"
            INSERT INTO symbols (usr, symbol_name, symbol_kind, signature)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (usr) DO UPDATE SET
                symbol_name = excluded.symbol_name,
                symbol_kind = excluded.symbol_kind,
                signature = excluded.signature
            "#,
        )?;
        let mut select = conn.prepare_cached("SELECT symbol_id FROM symbols WHERE usr = ?1")?;

        let mut ids = HashMap::with_capacity(symbols.len());
        for (index, entry) in symbols {
            upsert.execute(params![entry.usr, entry.name, entry.kind.as_i64(), entry.signature])?;
            let id: i64 = select.query_row(params![entry.usr], |row| row.get(0))?;
            ids.insert(*index, SymbolId(id));
        }
        Ok(ids)
    }
}

impl SymbolStorage for SqliteSymbolStorage {
    fn add_symbols_and_source_locations(
        &self,
        conn: &Connection,
        symbols: &SymbolEntries,
        locations: &[SourceLocationEntry],
    ) -> Result<()> {
        let ids = self.upsert_symbols(conn, symbols)?;

        let sources: BTreeSet<FilePathId> = locations.iter().map(|l| l.source_id).collect();
        let mut delete = conn.prepare_cached("DELETE FROM locations WHERE source_id = ?1")?;
        for source in &sources {
            delete.execute(params![source.0])?;
        }

        let mut insert = conn.prepare_cached(
            r#"
            INSERT OR REPLACE INTO locations (symbol_id, line, column, source_id, location_kind)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )?;
        let mut skipped = 0usize;
        for location in locations {
            let Some(symbol_id) = ids.get(&location.symbol) else {
                skipped += 1;
                continue;
            };
            insert.execute(params![
                symbol_id.0,
                location.line,
                location.column,
                location.source_id.0,
                location.kind.as_i64(),
            ])?;
        }

        if skipped > 0 {
            debug!("Skipped {} locations without a collected symbol", skipped);
        }
        debug!(
            "Stored {} symbols and {} locations for {} sources",
            symbols.len(),
            locations.len() - skipped,
            sources.len()
        );
        Ok(())
    }
}

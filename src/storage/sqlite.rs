//! SQLite database handle shared by every storage facet

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{Connection, TransactionBehavior};
use tracing::debug;

use super::schema;
use crate::{Error, Result};

/// The one connection to the symbol database.
///
/// All access goes through closure-scoped transactions. The closure receives the
/// connection of the open transaction; returning `Err` rolls everything back, so a failed
/// multi-table update is never observable. Write transactions are serialized by the
/// connection lock and by SQLite itself.
///
/// Storage facets never open transactions on their own. Do not call back into the
/// `Database` from inside a transaction closure: the lock is not reentrant.
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

/// Row counts for the `stats` command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbStats {
    pub symbols: usize,
    pub locations: usize,
    pub sources: usize,
    pub directories: usize,
    pub project_parts: usize,
    pub used_macros: usize,
    pub source_dependencies: usize,
}

impl Database {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let db = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        db.initialize_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        db.initialize_schema()?;
        Ok(db)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn initialize_schema(&self) -> Result<()> {
        let created = self.exclusive(schema::initialize)?;
        if !created {
            debug!("Symbol database already initialized");
        }
        Ok(())
    }

    /// Whether the persisted initialized marker is present.
    pub fn is_initialized(&self) -> Result<bool> {
        self.read(|conn| Ok(schema::schema_version(conn)? >= schema::SCHEMA_VERSION))
    }

    /// Run `f` in a deferred transaction. Meant for reads.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        self.transaction(TransactionBehavior::Deferred, f)
    }

    /// Run `f` in an immediate transaction. Meant for writes.
    pub fn write<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        self.transaction(TransactionBehavior::Immediate, f)
    }

    /// Run `f` in an exclusive transaction.
    pub fn exclusive<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        self.transaction(TransactionBehavior::Exclusive, f)
    }

    fn transaction<T>(
        &self,
        behavior: TransactionBehavior,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(Error::poisoned("database connection"))?;
        let tx = conn.transaction_with_behavior(behavior)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Row counts of the main tables
    pub fn stats(&self) -> Result<DbStats> {
        self.read(|conn| {
            let count = |table: &str| -> Result<usize> {
                let n: i64 =
                    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                        row.get(0)
                    })?;
                Ok(n as usize)
            };

            Ok(DbStats {
                symbols: count("symbols")?,
                locations: count("locations")?,
                sources: count("sources")?,
                directories: count("directories")?,
                project_parts: count("project_parts")?,
                used_macros: count("used_macros")?,
                source_dependencies: count("source_dependencies")?,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    fn schema_objects(db: &Database) -> Vec<(String, String)> {
        db.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT type, name FROM sqlite_master WHERE name NOT LIKE 'sqlite_%' ORDER BY type, name",
            )?;
            let objects = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(objects)
        })
        .unwrap()
    }

    #[test]
    fn test_open_in_memory_initializes_schema() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.is_initialized().unwrap());

        let names: Vec<String> = schema_objects(&db).into_iter().map(|(_, n)| n).collect();
        for table in [
            "symbols",
            "locations",
            "sources",
            "directories",
            "project_parts",
            "project_parts_files",
            "used_macros",
            "file_statuses",
            "source_dependencies",
            "precompiled_headers",
        ] {
            assert!(names.contains(&table.to_string()), "missing table {}", table);
        }
    }

    #[test]
    fn test_initializing_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("symbols.db");

        let first = {
            let db = Database::open(&path).unwrap();
            db.write(|conn| {
                conn.execute(
                    "INSERT INTO directories (directory_path) VALUES (?1)",
                    params!["/path/to"],
                )?;
                Ok(())
            })
            .unwrap();
            schema_objects(&db)
        };

        let db = Database::open(&path).unwrap();
        assert!(db.is_initialized().unwrap());
        assert_eq!(schema_objects(&db), first);
        assert_eq!(db.stats().unwrap().directories, 1);
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let db = Database::open_in_memory().unwrap();

        let result: Result<()> = db.write(|conn| {
            conn.execute(
                "INSERT INTO directories (directory_path) VALUES (?1)",
                params!["/tmp"],
            )?;
            Err(Error::Query("abort".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(db.stats().unwrap().directories, 0);
    }

    #[test]
    fn test_unique_usr_is_enforced() {
        let db = Database::open_in_memory().unwrap();
        let result = db.write(|conn| {
            for _ in 0..2 {
                conn.execute(
                    "INSERT INTO symbols (usr, symbol_name, symbol_kind) VALUES ('c:@F@f#', 'f', 0)",
                    [],
                )?;
            }
            Ok(())
        });
        assert!(matches!(result, Err(Error::Storage(_))));
        assert_eq!(db.stats().unwrap().symbols, 0);
    }
}

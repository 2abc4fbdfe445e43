//! File path <-> source id mapping
//!
//! Paths are stored split into `directories(directory_path)` and `sources(directory_id, source_name)`.
//! Ids are the persisted row ids, so they stay stable across runs.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::Database;
use crate::source::FilePathId;
use crate::{Error, Result};

#[derive(Default)]
struct PathIndex {
    by_path: HashMap<PathBuf, FilePathId>,
    by_id: HashMap<FilePathId, PathBuf>,
}

impl PathIndex {
    fn insert(&mut self, path: PathBuf, id: FilePathId) {
        self.by_id.insert(id, path.clone());
        self.by_path.insert(path, id);
    }
}

/// Thread safe, lazily filled cache in front of the `directories`/`sources` tables.
pub struct FilePathCache {
    database: Arc<Database>,
    index: RwLock<PathIndex>,
}

impl FilePathCache {
    pub fn new(database: Arc<Database>) -> Self {
        Self {
            database,
            index: RwLock::new(PathIndex::default()),
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    /// Load every known path into memory, unless something was cached already.
    pub fn populate_if_empty(&self) -> Result<()> {
        {
            let index = self.index.read().map_err(Error::poisoned("file path cache"))?;
            if !index.by_id.is_empty() {
                return Ok(());
            }
        }

        let rows = self.database.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT source_id, directory_path, source_name FROM sources NATURAL JOIN directories",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        FilePathId(row.get(0)?),
                        join_path(&row.get::<_, String>(1)?, &row.get::<_, String>(2)?),
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        debug!("Populated file path cache with {} entries", rows.len());
        let mut index = self.index.write().map_err(Error::poisoned("file path cache"))?;
        for (id, path) in rows {
            index.insert(path, id);
        }
        Ok(())
    }

    /// Id of `path`, creating directory and source rows on first use.
    pub fn file_path_id(&self, path: &Path) -> Result<FilePathId> {
        let path = normalize_path(path)?;
        {
            let index = self.index.read().map_err(Error::poisoned("file path cache"))?;
            if let Some(id) = index.by_path.get(&path) {
                return Ok(*id);
            }
        }

        let id = self.database.write(|conn| insert_file_path(conn, &path))?;
        let mut index = self.index.write().map_err(Error::poisoned("file path cache"))?;
        index.insert(path, id);
        Ok(id)
    }

    pub fn file_path_ids<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Vec<FilePathId>> {
        paths.iter().map(|p| self.file_path_id(p.as_ref())).collect()
    }

    /// Id of `path` if it is already known; never writes.
    pub fn existing_file_path_id(&self, path: &Path) -> Result<Option<FilePathId>> {
        let path = normalize_path(path)?;
        {
            let index = self.index.read().map_err(Error::poisoned("file path cache"))?;
            if let Some(id) = index.by_path.get(&path) {
                return Ok(Some(*id));
            }
        }

        let found = self.database.read(|conn| lookup_file_path(conn, &path))?;
        if let Some(id) = found {
            let mut index = self.index.write().map_err(Error::poisoned("file path cache"))?;
            index.insert(path, id);
        }
        Ok(found)
    }

    pub fn file_path(&self, id: FilePathId) -> Result<PathBuf> {
        {
            let index = self.index.read().map_err(Error::poisoned("file path cache"))?;
            if let Some(path) = index.by_id.get(&id) {
                return Ok(path.clone());
            }
        }

        let path = self
            .database
            .read(|conn| {
                conn.query_row(
                    "SELECT directory_path, source_name FROM sources NATURAL JOIN directories WHERE source_id = ?1",
                    params![id.0],
                    |row| Ok(join_path(&row.get::<_, String>(0)?, &row.get::<_, String>(1)?)),
                )
                .optional()
                .map_err(Into::into)
            })?
            .ok_or(Error::FilePathNotFound(id.0))?;

        let mut index = self.index.write().map_err(Error::poisoned("file path cache"))?;
        index.insert(path.clone(), id);
        Ok(path)
    }
}

fn lookup_file_path(conn: &Connection, path: &Path) -> Result<Option<FilePathId>> {
    // such a path can never have been stored
    let Ok((directory, name)) = split_path(path) else {
        return Ok(None);
    };
    conn.query_row(
        "SELECT source_id FROM sources NATURAL JOIN directories WHERE directory_path = ?1 AND source_name = ?2",
        params![directory, name],
        |row| row.get(0).map(FilePathId),
    )
    .optional()
    .map_err(Into::into)
}

fn insert_file_path(conn: &Connection, path: &Path) -> Result<FilePathId> {
    let (directory, name) = split_path(path)?;
    conn.execute(
        "INSERT INTO directories (directory_path) VALUES (?1) ON CONFLICT (directory_path) DO NOTHING",
        params![directory],
    )?;
    let directory_id: i64 = conn.query_row(
        "SELECT directory_id FROM directories WHERE directory_path = ?1",
        params![directory],
        |row| row.get(0),
    )?;
    conn.execute(
        "INSERT INTO sources (directory_id, source_name) VALUES (?1, ?2) ON CONFLICT (directory_id, source_name) DO NOTHING",
        params![directory_id, name],
    )?;
    let source_id: i64 = conn.query_row(
        "SELECT source_id FROM sources WHERE directory_id = ?1 AND source_name = ?2",
        params![directory_id, name],
        |row| row.get(0),
    )?;
    Ok(FilePathId(source_id))
}

/// Directory part without trailing separator (empty for the root) and file name. Paths that
/// are not UTF-8 are rejected.
fn split_path(path: &Path) -> Result<(&str, &str)> {
    let directory = match path.parent() {
        Some(parent) => utf8(parent.as_os_str(), path)?.trim_end_matches('/'),
        None => "",
    };
    let name = match path.file_name() {
        Some(name) => utf8(name, path)?,
        None => "",
    };
    Ok((directory, name))
}

fn utf8<'a>(part: &'a OsStr, path: &Path) -> Result<&'a str> {
    part.to_str().ok_or_else(|| Error::NonUtf8Path(path.to_path_buf()))
}

fn join_path(directory: &str, name: &str) -> PathBuf {
    PathBuf::from(format!("{}/{}", directory, name))
}

/// Absolute, lexically normalized path. Symlinks are not resolved and the file does not
/// have to exist, overlays may name files that only live in memory.
pub fn normalize_path(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

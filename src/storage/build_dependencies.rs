//! Build dependency facets: project part sources, file statuses, include edges and used macros.
//!
//! Every method runs on the connection of a transaction opened by the caller. A resolver that
//! writes all four facets does so inside one immediate transaction.

use std::collections::BTreeSet;

use rusqlite::{Connection, OptionalExtension, params};

use crate::Result;
use crate::project::ProjectPartId;
use crate::source::{FilePathId, FileStatus, SourceDependency, SourceEntry, SourceType, UsedMacro};

pub trait BuildDependenciesStorage: Send + Sync {
    /// The source itself and everything it transitively includes, restricted to sources
    /// registered for `project_part_id`, ordered by id. Include cycles are fine.
    fn fetch_depend_sources(
        &self,
        conn: &Connection,
        source_id: FilePathId,
        project_part_id: ProjectPartId,
    ) -> Result<Vec<SourceEntry>>;

    fn fetch_used_macros(&self, conn: &Connection, source_id: FilePathId) -> Result<Vec<UsedMacro>>;

    fn insert_or_update_sources(
        &self,
        conn: &Connection,
        sources: &[SourceEntry],
        project_part_id: ProjectPartId,
    ) -> Result<()>;

    fn insert_or_update_file_statuses(&self, conn: &Connection, statuses: &[FileStatus]) -> Result<()>;

    fn insert_or_update_source_dependencies(
        &self,
        conn: &Connection,
        dependencies: &[SourceDependency],
    ) -> Result<()>;

    fn insert_or_update_used_macros(&self, conn: &Connection, macros: &[UsedMacro]) -> Result<()>;

    /// Record the modification times seen at indexing. The stored timestamp never decreases.
    fn insert_or_update_indexing_time_stamps(
        &self,
        conn: &Connection,
        statuses: &[FileStatus],
    ) -> Result<()>;

    /// The given sources plus every source that transitively includes one of them.
    fn fetch_dependent_source_ids(
        &self,
        conn: &Connection,
        source_ids: &[FilePathId],
    ) -> Result<Vec<FilePathId>>;

    /// Project parts that compile `source_id` as a translation unit.
    fn fetch_project_part_ids_for_source(
        &self,
        conn: &Connection,
        source_id: FilePathId,
    ) -> Result<Vec<ProjectPartId>>;

    fn fetch_indexing_time_stamp(&self, conn: &Connection, source_id: FilePathId) -> Result<Option<i64>>;
}

/// The SQLite implementation of [`BuildDependenciesStorage`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteBuildDependenciesStorage;

impl BuildDependenciesStorage for SqliteBuildDependenciesStorage {
    fn fetch_depend_sources(
        &self,
        conn: &Connection,
        source_id: FilePathId,
        project_part_id: ProjectPartId,
    ) -> Result<Vec<SourceEntry>> {
        let mut stmt = conn.prepare_cached(
            r#"
            WITH RECURSIVE collected_dependencies(source_id) AS (
                VALUES(?1)
                UNION
                SELECT dependency_source_id FROM source_dependencies, collected_dependencies
                WHERE source_dependencies.source_id = collected_dependencies.source_id
            )
            SELECT source_id, source_type, has_missing_includes, COALESCE(indexing_time_stamp, 0)
            FROM collected_dependencies
            NATURAL JOIN project_parts_files
            LEFT JOIN file_statuses USING (source_id)
            WHERE project_part_id = ?2
            ORDER BY source_id
            "#,
        )?;

        let rows = stmt
            .query_map(params![source_id.0, project_part_id.0], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, source_type, missing, time_stamp)| {
                Ok(SourceEntry::new(FilePathId(id), SourceType::from_i64(source_type)?, time_stamp)
                    .with_missing_includes(missing))
            })
            .collect()
    }

    fn fetch_used_macros(&self, conn: &Connection, source_id: FilePathId) -> Result<Vec<UsedMacro>> {
        let mut stmt = conn.prepare_cached(
            "SELECT macro_name, source_id FROM used_macros WHERE source_id = ?1 ORDER BY macro_name",
        )?;
        let macros = stmt
            .query_map(params![source_id.0], |row| {
                Ok(UsedMacro::new(row.get::<_, String>(0)?, FilePathId(row.get(1)?)))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(macros)
    }

    fn insert_or_update_sources(
        &self,
        conn: &Connection,
        sources: &[SourceEntry],
        project_part_id: ProjectPartId,
    ) -> Result<()> {
        let mut stmt = conn.prepare_cached(
            r#"
            INSERT INTO project_parts_files (project_part_id, source_id, source_type, has_missing_includes)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (source_id, project_part_id) DO UPDATE SET
                source_type = excluded.source_type,
                has_missing_includes = excluded.has_missing_includes
            "#,
        )?;
        for source in sources {
            stmt.execute(params![
                project_part_id.0,
                source.source_id.0,
                source.source_type.as_i64(),
                source.has_missing_includes,
            ])?;
        }
        Ok(())
    }

    fn insert_or_update_file_statuses(&self, conn: &Connection, statuses: &[FileStatus]) -> Result<()> {
        let mut stmt = conn.prepare_cached(
            r#"
            INSERT INTO file_statuses (source_id, size, last_modified)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (source_id) DO UPDATE SET
                size = excluded.size,
                last_modified = excluded.last_modified
            "#,
        )?;
        for status in statuses {
            stmt.execute(params![status.source_id.0, status.size, status.last_modified])?;
        }
        Ok(())
    }

    fn insert_or_update_source_dependencies(
        &self,
        conn: &Connection,
        dependencies: &[SourceDependency],
    ) -> Result<()> {
        let includers: BTreeSet<FilePathId> = dependencies.iter().map(|d| d.source_id).collect();
        let edges: BTreeSet<SourceDependency> = dependencies.iter().copied().collect();

        let mut delete =
            conn.prepare_cached("DELETE FROM source_dependencies WHERE source_id = ?1")?;
        for includer in includers {
            delete.execute(params![includer.0])?;
        }

        let mut insert = conn.prepare_cached(
            "INSERT INTO source_dependencies (source_id, dependency_source_id) VALUES (?1, ?2)",
        )?;
        for edge in edges {
            insert.execute(params![edge.source_id.0, edge.dependency_source_id.0])?;
        }
        Ok(())
    }

    fn insert_or_update_used_macros(&self, conn: &Connection, macros: &[UsedMacro]) -> Result<()> {
        let sources: BTreeSet<FilePathId> = macros.iter().map(|m| m.source_id).collect();
        let unique: BTreeSet<&UsedMacro> = macros.iter().collect();

        let mut delete = conn.prepare_cached("DELETE FROM used_macros WHERE source_id = ?1")?;
        for source in sources {
            delete.execute(params![source.0])?;
        }

        let mut insert =
            conn.prepare_cached("INSERT INTO used_macros (source_id, macro_name) VALUES (?1, ?2)")?;
        for used_macro in unique {
            insert.execute(params![used_macro.source_id.0, used_macro.macro_name])?;
        }
        Ok(())
    }

    fn insert_or_update_indexing_time_stamps(
        &self,
        conn: &Connection,
        statuses: &[FileStatus],
    ) -> Result<()> {
        let mut stmt = conn.prepare_cached(
            r#"
            INSERT INTO file_statuses (source_id, size, last_modified, indexing_time_stamp)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT (source_id) DO UPDATE SET
                size = excluded.size,
                last_modified = excluded.last_modified,
                indexing_time_stamp = MAX(COALESCE(indexing_time_stamp, 0), excluded.indexing_time_stamp)
            "#,
        )?;
        for status in statuses {
            stmt.execute(params![status.source_id.0, status.size, status.last_modified])?;
        }
        Ok(())
    }

    fn fetch_dependent_source_ids(
        &self,
        conn: &Connection,
        source_ids: &[FilePathId],
    ) -> Result<Vec<FilePathId>> {
        let mut stmt = conn.prepare_cached(
            r#"
            WITH RECURSIVE collected_dependents(source_id) AS (
                VALUES(?1)
                UNION
                SELECT source_dependencies.source_id FROM source_dependencies, collected_dependents
                WHERE source_dependencies.dependency_source_id = collected_dependents.source_id
            )
            SELECT source_id FROM collected_dependents
            "#,
        )?;

        let mut dependents = BTreeSet::new();
        for source_id in source_ids {
            let ids = stmt
                .query_map(params![source_id.0], |row| row.get::<_, i64>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            dependents.extend(ids.into_iter().map(FilePathId));
        }
        Ok(dependents.into_iter().collect())
    }

    fn fetch_project_part_ids_for_source(
        &self,
        conn: &Connection,
        source_id: FilePathId,
    ) -> Result<Vec<ProjectPartId>> {
        let mut stmt = conn.prepare_cached(
            "SELECT project_part_id FROM project_parts_files WHERE source_id = ?1 AND source_type = ?2 ORDER BY project_part_id",
        )?;
        let ids = stmt
            .query_map(params![source_id.0, SourceType::Source.as_i64()], |row| {
                row.get::<_, i64>(0).map(ProjectPartId)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn fetch_indexing_time_stamp(&self, conn: &Connection, source_id: FilePathId) -> Result<Option<i64>> {
        let time_stamp: Option<Option<i64>> = conn
            .query_row(
                "SELECT indexing_time_stamp FROM file_statuses WHERE source_id = ?1",
                params![source_id.0],
                |row| row.get(0),
            )
            .optional()?;
        Ok(time_stamp.flatten())
    }
}

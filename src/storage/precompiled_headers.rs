//! Precompiled header bookkeeping per project part.

use rusqlite::{Connection, OptionalExtension, params};

use crate::Result;
use crate::project::ProjectPartId;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PrecompiledHeaderInfo {
    pub project_part_id: Option<ProjectPartId>,
    pub project_pch_path: Option<String>,
    pub project_pch_build_time: Option<i64>,
    pub system_pch_path: Option<String>,
    pub system_pch_build_time: Option<i64>,
}

impl PrecompiledHeaderInfo {
    /// The newest build time of either header.
    pub fn latest_build_time(&self) -> Option<i64> {
        self.project_pch_build_time.max(self.system_pch_build_time)
    }
}

pub trait PrecompiledHeaderStorage: Send + Sync {
    fn insert_project_precompiled_header(
        &self,
        conn: &Connection,
        id: ProjectPartId,
        path: &str,
        build_time: i64,
    ) -> Result<()>;

    fn insert_system_precompiled_header(
        &self,
        conn: &Connection,
        id: ProjectPartId,
        path: &str,
        build_time: i64,
    ) -> Result<()>;

    fn delete_precompiled_header(&self, conn: &Connection, id: ProjectPartId) -> Result<()>;

    fn fetch_precompiled_header(
        &self,
        conn: &Connection,
        id: ProjectPartId,
    ) -> Result<Option<PrecompiledHeaderInfo>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqlitePrecompiledHeaderStorage;

impl PrecompiledHeaderStorage for SqlitePrecompiledHeaderStorage {
    fn insert_project_precompiled_header(
        &self,
        conn: &Connection,
        id: ProjectPartId,
        path: &str,
        build_time: i64,
    ) -> Result<()> {
        conn.execute(
            r#"
            INSERT INTO precompiled_headers (project_part_id, project_pch_path, project_pch_build_time)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (project_part_id) DO UPDATE SET
                project_pch_path = excluded.project_pch_path,
                project_pch_build_time = excluded.project_pch_build_time
            "#,
            params![id.0, path, build_time],
        )?;
        Ok(())
    }

    fn insert_system_precompiled_header(
        &self,
        conn: &Connection,
        id: ProjectPartId,
        path: &str,
        build_time: i64,
    ) -> Result<()> {
        conn.execute(
            r#"
            INSERT INTO precompiled_headers (project_part_id, system_pch_path, system_pch_build_time)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (project_part_id) DO UPDATE SET
                system_pch_path = excluded.system_pch_path,
                system_pch_build_time = excluded.system_pch_build_time
            "#,
            params![id.0, path, build_time],
        )?;
        Ok(())
    }

    fn delete_precompiled_header(&self, conn: &Connection, id: ProjectPartId) -> Result<()> {
        conn.execute(
            "DELETE FROM precompiled_headers WHERE project_part_id = ?1",
            params![id.0],
        )?;
        Ok(())
    }

    fn fetch_precompiled_header(
        &self,
        conn: &Connection,
        id: ProjectPartId,
    ) -> Result<Option<PrecompiledHeaderInfo>> {
        conn.query_row(
            r#"
            SELECT project_pch_path, project_pch_build_time, system_pch_path, system_pch_build_time
            FROM precompiled_headers WHERE project_part_id = ?1
            "#,
            params![id.0],
            |row| {
                Ok(PrecompiledHeaderInfo {
                    project_part_id: Some(id),
                    project_pch_path: row.get(0)?,
                    project_pch_build_time: row.get(1)?,
                    system_pch_path: row.get(2)?,
                    system_pch_build_time: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }
}

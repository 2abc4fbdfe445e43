//! Project part rows: names, serialized compiler configuration and file membership.

use rusqlite::{Connection, OptionalExtension, params};

use crate::Result;
use crate::project::{
    Language, LanguageExtension, LanguageVersion, ProjectPartArtefact, ProjectPartContainer,
    ProjectPartId,
};
use crate::source::FilePathId;

pub trait ProjectPartsStorage: Send + Sync {
    /// Id for `name`, inserting the row on first use.
    fn fetch_project_part_id(&self, conn: &Connection, name: &str) -> Result<ProjectPartId>;

    fn fetch_project_part_name(&self, conn: &Connection, id: ProjectPartId) -> Result<Option<String>>;

    fn fetch_project_part(&self, conn: &Connection, id: ProjectPartId) -> Result<Option<ProjectPartArtefact>>;

    /// Store the configuration of `part`. Returns `true` when it differs from what was stored
    /// before (or nothing was), which means every source has to be reindexed.
    fn update_project_part(&self, conn: &Connection, part: &ProjectPartContainer) -> Result<bool>;

    /// Replace the header and source membership of `part`.
    fn update_project_part_sources(&self, conn: &Connection, part: &ProjectPartContainer) -> Result<()>;

    fn fetch_project_part_sources(&self, conn: &Connection, id: ProjectPartId) -> Result<Vec<FilePathId>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteProjectPartsStorage;

impl ProjectPartsStorage for SqliteProjectPartsStorage {
    fn fetch_project_part_id(&self, conn: &Connection, name: &str) -> Result<ProjectPartId> {
        conn.execute(
            "INSERT INTO project_parts (project_part_name) VALUES (?1) ON CONFLICT (project_part_name) DO NOTHING",
            params![name],
        )?;
        let id: i64 = conn.query_row(
            "SELECT project_part_id FROM project_parts WHERE project_part_name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(ProjectPartId(id))
    }

    fn fetch_project_part_name(&self, conn: &Connection, id: ProjectPartId) -> Result<Option<String>> {
        conn.query_row(
            "SELECT project_part_name FROM project_parts WHERE project_part_id = ?1",
            params![id.0],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    fn fetch_project_part(&self, conn: &Connection, id: ProjectPartId) -> Result<Option<ProjectPartArtefact>> {
        let row = conn
            .query_row(
                r#"
                SELECT tool_chain_arguments, compiler_macros, system_include_search_paths,
                       project_include_search_paths, language, language_version, language_extension
                FROM project_parts WHERE project_part_id = ?1 AND tool_chain_arguments IS NOT NULL
                "#,
                params![id.0],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((arguments, macros, system_paths, project_paths, language, version, extension)) = row
        else {
            return Ok(None);
        };

        Ok(Some(ProjectPartArtefact {
            project_part_id: id,
            tool_chain_arguments: serde_json::from_str(&arguments)?,
            compiler_macros: serde_json::from_str(&macros)?,
            system_include_search_paths: serde_json::from_str(&system_paths)?,
            project_include_search_paths: serde_json::from_str(&project_paths)?,
            language: Language::from_i64(language)?,
            language_version: LanguageVersion::from_i64(version)?,
            language_extension: LanguageExtension(extension as u32),
        }))
    }

    fn update_project_part(&self, conn: &Connection, part: &ProjectPartContainer) -> Result<bool> {
        let changed = match self.fetch_project_part(conn, part.project_part_id)? {
            Some(artefact) => !artefact.matches(part),
            None => true,
        };
        if !changed {
            return Ok(false);
        }

        let updated = conn.execute(
            r#"
            UPDATE project_parts SET
                tool_chain_arguments = ?2,
                compiler_macros = ?3,
                system_include_search_paths = ?4,
                project_include_search_paths = ?5,
                language = ?6,
                language_version = ?7,
                language_extension = ?8
            WHERE project_part_id = ?1
            "#,
            params![
                part.project_part_id.0,
                serde_json::to_string(&part.tool_chain_arguments)?,
                serde_json::to_string(&part.compiler_macros)?,
                serde_json::to_string(&part.system_include_search_paths)?,
                serde_json::to_string(&part.project_include_search_paths)?,
                part.language.as_i64(),
                part.language_version.as_i64(),
                part.language_extension.0 as i64,
            ],
        )?;
        if updated == 0 {
            return Err(crate::Error::ProjectPartNotFound(part.project_part_id.to_string()));
        }
        Ok(true)
    }

    fn update_project_part_sources(&self, conn: &Connection, part: &ProjectPartContainer) -> Result<()> {
        let id = part.project_part_id.0;
        conn.execute("DELETE FROM project_parts_headers WHERE project_part_id = ?1", params![id])?;
        conn.execute("DELETE FROM project_parts_sources WHERE project_part_id = ?1", params![id])?;

        let mut headers = conn.prepare_cached(
            "INSERT OR IGNORE INTO project_parts_headers (project_part_id, source_id) VALUES (?1, ?2)",
        )?;
        for header in &part.header_path_ids {
            headers.execute(params![id, header.0])?;
        }

        let mut sources = conn.prepare_cached(
            "INSERT OR IGNORE INTO project_parts_sources (project_part_id, source_id) VALUES (?1, ?2)",
        )?;
        for source in &part.source_path_ids {
            sources.execute(params![id, source.0])?;
        }
        Ok(())
    }

    fn fetch_project_part_sources(&self, conn: &Connection, id: ProjectPartId) -> Result<Vec<FilePathId>> {
        let mut stmt = conn.prepare_cached(
            "SELECT source_id FROM project_parts_sources WHERE project_part_id = ?1 ORDER BY source_id",
        )?;
        let ids = stmt
            .query_map(params![id.0], |row| row.get::<_, i64>(0).map(FilePathId))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{CompilerMacro, IncludeSearchPath, IncludeSearchPathKind};
    use crate::storage::Database;

    fn part(id: ProjectPartId) -> ProjectPartContainer {
        let mut part = ProjectPartContainer::new(id)
            .with_sources(vec![FilePathId(2), FilePathId(1)])
            .with_headers(vec![FilePathId(3)]);
        part.tool_chain_arguments = vec!["-Wall".to_string()];
        part.compiler_macros = vec![CompilerMacro::new("DEFINE", "1", 1)];
        part.project_include_search_paths =
            vec![IncludeSearchPath::new("/project/include", 1, IncludeSearchPathKind::User)];
        part
    }

    #[test]
    fn test_fetch_project_part_id_is_stable_per_name() {
        let db = Database::open_in_memory().unwrap();
        let storage = SqliteProjectPartsStorage;

        let (first, again, other) = db
            .write(|conn| {
                Ok((
                    storage.fetch_project_part_id(conn, "project.pro")?,
                    storage.fetch_project_part_id(conn, "project.pro")?,
                    storage.fetch_project_part_id(conn, "other.pro")?,
                ))
            })
            .unwrap();

        assert_eq!(first, again);
        assert_ne!(first, other);
        let name = db.read(|conn| storage.fetch_project_part_name(conn, other)).unwrap();
        assert_eq!(name.as_deref(), Some("other.pro"));
    }

    #[test]
    fn test_update_project_part_reports_changes() {
        let db = Database::open_in_memory().unwrap();
        let storage = SqliteProjectPartsStorage;

        let (first, unchanged, changed, artefact) = db
            .write(|conn| {
                let id = storage.fetch_project_part_id(conn, "project.pro")?;
                let mut container = part(id);
                let first = storage.update_project_part(conn, &container)?;
                let unchanged = storage.update_project_part(conn, &container)?;
                container.tool_chain_arguments.push("-O2".to_string());
                let changed = storage.update_project_part(conn, &container)?;
                Ok((first, unchanged, changed, storage.fetch_project_part(conn, id)?))
            })
            .unwrap();

        assert!(first);
        assert!(!unchanged);
        assert!(changed);
        let artefact = artefact.unwrap();
        assert_eq!(artefact.tool_chain_arguments, vec!["-Wall", "-O2"]);
        assert_eq!(artefact.compiler_macros, vec![CompilerMacro::new("DEFINE", "1", 1)]);
    }

    #[test]
    fn test_update_unknown_project_part_fails() {
        let db = Database::open_in_memory().unwrap();
        let storage = SqliteProjectPartsStorage;
        let result = db.write(|conn| storage.update_project_part(conn, &part(ProjectPartId(42))));
        assert!(matches!(result, Err(crate::Error::ProjectPartNotFound(_))));
    }

    #[test]
    fn test_project_part_sources() {
        let db = Database::open_in_memory().unwrap();
        let storage = SqliteProjectPartsStorage;

        let sources = db
            .write(|conn| {
                let id = storage.fetch_project_part_id(conn, "project.pro")?;
                storage.update_project_part_sources(conn, &part(id))?;
                storage.fetch_project_part_sources(conn, id)
            })
            .unwrap();
        assert_eq!(sources, vec![FilePathId(1), FilePathId(2)]);
    }
}

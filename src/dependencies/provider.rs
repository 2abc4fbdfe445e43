//! Cached or regenerated build dependencies per project part

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use super::{AliveSignal, BuildDependencyGenerator};
use crate::Result;
use crate::freshness::{FileSystem, ModifiedTimeChecker};
use crate::project::{ProjectPartContainer, ProjectPartId};
use crate::source::{BuildDependency, SourceEntry, UsedMacro};
use crate::storage::{BuildDependenciesStorage, Database};

pub struct BuildDependenciesProvider {
    database: Arc<Database>,
    storage: Arc<dyn BuildDependenciesStorage>,
    generator: Arc<dyn BuildDependencyGenerator>,
    checker: ModifiedTimeChecker<Arc<dyn FileSystem>>,
    alive: Arc<AliveSignal>,
}

impl BuildDependenciesProvider {
    pub fn new(
        database: Arc<Database>,
        storage: Arc<dyn BuildDependenciesStorage>,
        generator: Arc<dyn BuildDependencyGenerator>,
        file_system: Arc<dyn FileSystem>,
        alive: Arc<AliveSignal>,
    ) -> Self {
        Self {
            database,
            storage,
            generator,
            checker: ModifiedTimeChecker::new(file_system),
            alive,
        }
    }

    /// Dependencies of `part`, from the store when every recorded source is still fresh.
    pub fn create(&self, part: &ProjectPartContainer) -> Result<BuildDependency> {
        if part.source_path_ids.is_empty() {
            return Ok(BuildDependency::default());
        }
        let known = self.create_source_entries_from_storage(part)?;
        self.create_with_sources(part, known)
    }

    /// Like [`create`](Self::create) but trusts `provided` as the known sources instead of
    /// reading them from the store.
    pub fn create_with_sources(
        &self,
        part: &ProjectPartContainer,
        provided: Vec<SourceEntry>,
    ) -> Result<BuildDependency> {
        if part.source_path_ids.is_empty() {
            return Ok(BuildDependency::default());
        }

        let dependency = if self.checker.is_up_to_date(&provided) {
            debug!("Dependencies of project part {} are up to date", part.project_part_id);
            BuildDependency {
                used_macros: self.create_used_macros_from_storage(&provided)?,
                source_files: provided.iter().map(|entry| entry.source_id).collect(),
                sources: provided,
                ..BuildDependency::default()
            }
        } else {
            self.regenerate(part, provided)?
        };

        self.alive.force();
        Ok(dependency)
    }

    /// The union of the recorded dependency sources of every source of `part`, by id.
    pub fn create_source_entries_from_storage(
        &self,
        part: &ProjectPartContainer,
    ) -> Result<Vec<SourceEntry>> {
        let project_part_id = part.project_part_id;
        let mut entries = self.database.read(|conn| {
            let mut entries = Vec::new();
            for source_id in &part.source_path_ids {
                entries.extend(self.storage.fetch_depend_sources(conn, *source_id, project_part_id)?);
            }
            Ok(entries)
        })?;
        entries.sort_by_key(|entry| entry.source_id);
        entries.dedup_by_key(|entry| entry.source_id);
        Ok(entries)
    }

    fn create_used_macros_from_storage(&self, sources: &[SourceEntry]) -> Result<Vec<UsedMacro>> {
        let mut macros = self.database.read(|conn| {
            let mut macros = Vec::new();
            for entry in sources {
                macros.extend(self.storage.fetch_used_macros(conn, entry.source_id)?);
            }
            Ok(macros)
        })?;
        macros.sort();
        macros.dedup();
        Ok(macros)
    }

    fn regenerate(&self, part: &ProjectPartContainer, known: Vec<SourceEntry>) -> Result<BuildDependency> {
        info!("Regenerating build dependencies of project part {}", part.project_part_id);
        let alive = Arc::clone(&self.alive);
        let mut dependency = self.generator.create(part, &move || alive.ping())?;

        dependency.sources = merge_sources(known, std::mem::take(&mut dependency.sources));
        dependency.normalize();
        self.store(part.project_part_id, &dependency)?;
        Ok(dependency)
    }

    fn store(&self, project_part_id: ProjectPartId, dependency: &BuildDependency) -> Result<()> {
        self.database.write(|conn| {
            self.storage
                .insert_or_update_sources(conn, &dependency.sources, project_part_id)?;
            self.storage
                .insert_or_update_file_statuses(conn, &dependency.file_statuses)?;
            self.storage
                .insert_or_update_source_dependencies(conn, &dependency.source_dependencies)?;
            self.storage
                .insert_or_update_used_macros(conn, &dependency.used_macros)?;
            Ok(())
        })
    }
}

/// Generated entries win, but keep the indexing timestamp the store knew about.
fn merge_sources(known: Vec<SourceEntry>, generated: Vec<SourceEntry>) -> Vec<SourceEntry> {
    let mut merged: BTreeMap<_, SourceEntry> =
        known.into_iter().map(|entry| (entry.source_id, entry)).collect();
    for entry in generated {
        let last_modified = merged
            .get(&entry.source_id)
            .map(|known| known.last_modified)
            .unwrap_or(entry.last_modified);
        merged.insert(
            entry.source_id,
            SourceEntry {
                last_modified,
                ..entry
            },
        );
    }
    merged.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{FilePathId, FileStatus, SourceDependency, SourceType};
    use crate::storage::SqliteBuildDependenciesStorage;
    use crate::Error;
    use rusqlite::Connection;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedFileSystem(i64);

    impl FileSystem for FixedFileSystem {
        fn file_status(&self, id: FilePathId) -> Option<FileStatus> {
            Some(FileStatus::new(id, 0, self.0))
        }
    }

    struct FixedGenerator {
        dependency: BuildDependency,
        calls: AtomicUsize,
    }

    impl FixedGenerator {
        fn new(dependency: BuildDependency) -> Self {
            Self {
                dependency,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl BuildDependencyGenerator for FixedGenerator {
        fn create(&self, _part: &ProjectPartContainer, alive: &dyn Fn()) -> Result<BuildDependency> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            alive();
            Ok(self.dependency.clone())
        }
    }

    /// Real storage that fails when used macros are written.
    struct FailingMacroStorage(SqliteBuildDependenciesStorage);

    impl BuildDependenciesStorage for FailingMacroStorage {
        fn fetch_depend_sources(
            &self,
            conn: &Connection,
            source_id: FilePathId,
            project_part_id: ProjectPartId,
        ) -> Result<Vec<SourceEntry>> {
            self.0.fetch_depend_sources(conn, source_id, project_part_id)
        }

        fn fetch_used_macros(&self, conn: &Connection, source_id: FilePathId) -> Result<Vec<UsedMacro>> {
            self.0.fetch_used_macros(conn, source_id)
        }

        fn insert_or_update_sources(
            &self,
            conn: &Connection,
            sources: &[SourceEntry],
            project_part_id: ProjectPartId,
        ) -> Result<()> {
            self.0.insert_or_update_sources(conn, sources, project_part_id)
        }

        fn insert_or_update_file_statuses(&self, conn: &Connection, statuses: &[FileStatus]) -> Result<()> {
            self.0.insert_or_update_file_statuses(conn, statuses)
        }

        fn insert_or_update_source_dependencies(
            &self,
            conn: &Connection,
            dependencies: &[SourceDependency],
        ) -> Result<()> {
            self.0.insert_or_update_source_dependencies(conn, dependencies)
        }

        fn insert_or_update_used_macros(&self, _conn: &Connection, _macros: &[UsedMacro]) -> Result<()> {
            Err(Error::Query("disk full".to_string()))
        }

        fn insert_or_update_indexing_time_stamps(
            &self,
            conn: &Connection,
            statuses: &[FileStatus],
        ) -> Result<()> {
            self.0.insert_or_update_indexing_time_stamps(conn, statuses)
        }

        fn fetch_dependent_source_ids(
            &self,
            conn: &Connection,
            source_ids: &[FilePathId],
        ) -> Result<Vec<FilePathId>> {
            self.0.fetch_dependent_source_ids(conn, source_ids)
        }

        fn fetch_project_part_ids_for_source(
            &self,
            conn: &Connection,
            source_id: FilePathId,
        ) -> Result<Vec<ProjectPartId>> {
            self.0.fetch_project_part_ids_for_source(conn, source_id)
        }

        fn fetch_indexing_time_stamp(&self, conn: &Connection, source_id: FilePathId) -> Result<Option<i64>> {
            self.0.fetch_indexing_time_stamp(conn, source_id)
        }
    }

    /// Depend sources from a fixed table, recording which sources were asked for.
    struct TableStorage {
        depend_sources: HashMap<i64, Vec<i64>>,
        requested: Mutex<Vec<i64>>,
    }

    impl BuildDependenciesStorage for TableStorage {
        fn fetch_depend_sources(
            &self,
            _conn: &Connection,
            source_id: FilePathId,
            _project_part_id: ProjectPartId,
        ) -> Result<Vec<SourceEntry>> {
            self.requested.lock().unwrap().push(source_id.0);
            Ok(self
                .depend_sources
                .get(&source_id.0)
                .into_iter()
                .flatten()
                .map(|id| SourceEntry::new(FilePathId(*id), SourceType::UserInclude, 100))
                .collect())
        }

        fn fetch_used_macros(&self, _conn: &Connection, source_id: FilePathId) -> Result<Vec<UsedMacro>> {
            let names: &[&str] = match source_id.0 {
                1 => &["YI"],
                2 => &["LIANG", "ER"],
                10 => &["SAN"],
                _ => &[],
            };
            Ok(names.iter().map(|name| UsedMacro::new(*name, source_id)).collect())
        }

        fn insert_or_update_sources(&self, _: &Connection, _: &[SourceEntry], _: ProjectPartId) -> Result<()> {
            Ok(())
        }

        fn insert_or_update_file_statuses(&self, _: &Connection, _: &[FileStatus]) -> Result<()> {
            Ok(())
        }

        fn insert_or_update_source_dependencies(&self, _: &Connection, _: &[SourceDependency]) -> Result<()> {
            Ok(())
        }

        fn insert_or_update_used_macros(&self, _: &Connection, _: &[UsedMacro]) -> Result<()> {
            Ok(())
        }

        fn insert_or_update_indexing_time_stamps(&self, _: &Connection, _: &[FileStatus]) -> Result<()> {
            Ok(())
        }

        fn fetch_dependent_source_ids(&self, _: &Connection, ids: &[FilePathId]) -> Result<Vec<FilePathId>> {
            Ok(ids.to_vec())
        }

        fn fetch_project_part_ids_for_source(&self, _: &Connection, _: FilePathId) -> Result<Vec<ProjectPartId>> {
            Ok(Vec::new())
        }

        fn fetch_indexing_time_stamp(&self, _: &Connection, _: FilePathId) -> Result<Option<i64>> {
            Ok(None)
        }
    }

    fn ids(values: &[i64]) -> Vec<FilePathId> {
        values.iter().copied().map(FilePathId).collect()
    }

    fn table_storage() -> Arc<TableStorage> {
        Arc::new(TableStorage {
            depend_sources: HashMap::from([
                (1, vec![1, 2]),
                (2, vec![2, 10]),
                (10, vec![10, 1]),
                (3, vec![3, 1]),
                (4, vec![4]),
                (8, vec![8, 4]),
            ]),
            requested: Mutex::new(Vec::new()),
        })
    }

    fn provider(
        storage: Arc<dyn BuildDependenciesStorage>,
        generator: Arc<dyn BuildDependencyGenerator>,
        modified: i64,
    ) -> BuildDependenciesProvider {
        BuildDependenciesProvider::new(
            Arc::new(Database::open_in_memory().unwrap()),
            storage,
            generator,
            Arc::new(FixedFileSystem(modified)),
            Arc::new(AliveSignal::silent()),
        )
    }

    #[test]
    fn test_shared_sources_appear_once_per_result() {
        let provider = provider(
            table_storage(),
            Arc::new(FixedGenerator::new(BuildDependency::default())),
            50,
        );
        let part_a = ProjectPartContainer::new(ProjectPartId(1)).with_sources(ids(&[1, 2, 10]));
        let part_b = ProjectPartContainer::new(ProjectPartId(2)).with_sources(ids(&[1, 3, 4, 8]));

        let a = provider.create(&part_a).unwrap();
        let b = provider.create(&part_b).unwrap();

        let source_ids = |d: &BuildDependency| d.sources.iter().map(|s| s.source_id).collect::<Vec<_>>();
        assert_eq!(source_ids(&a), ids(&[1, 2, 10]));
        assert_eq!(source_ids(&b), ids(&[1, 2, 3, 4, 8]));
    }

    #[test]
    fn test_fresh_sources_come_with_stored_macros() {
        let generator = Arc::new(FixedGenerator::new(BuildDependency::default()));
        let provider = provider(table_storage(), generator.clone(), 50);
        let part = ProjectPartContainer::new(ProjectPartId(1)).with_sources(ids(&[1, 2, 10]));

        let dependency = provider.create(&part).unwrap();

        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            dependency.used_macros,
            vec![
                UsedMacro::new("YI", FilePathId(1)),
                UsedMacro::new("ER", FilePathId(2)),
                UsedMacro::new("LIANG", FilePathId(2)),
                UsedMacro::new("SAN", FilePathId(10)),
            ]
        );
    }

    #[test]
    fn test_stale_sources_are_regenerated_and_merged() {
        let generated = BuildDependency {
            sources: vec![
                SourceEntry::new(FilePathId(1), SourceType::Source, 0),
                SourceEntry::new(FilePathId(5), SourceType::SystemInclude, 0),
            ],
            ..BuildDependency::default()
        };
        let generator = Arc::new(FixedGenerator::new(generated));
        // modified after the recorded stamp of 100
        let provider = provider(table_storage(), generator.clone(), 200);
        let part = ProjectPartContainer::new(ProjectPartId(1)).with_sources(ids(&[1]));

        let dependency = provider.create(&part).unwrap();

        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            dependency.sources,
            vec![
                SourceEntry::new(FilePathId(1), SourceType::Source, 100),
                SourceEntry::new(FilePathId(2), SourceType::UserInclude, 100),
                SourceEntry::new(FilePathId(5), SourceType::SystemInclude, 0),
            ]
        );
    }

    #[test]
    fn test_empty_project_part_does_not_touch_the_store() {
        let storage = table_storage();
        let generator = Arc::new(FixedGenerator::new(BuildDependency::default()));
        let provider = provider(storage.clone(), generator.clone(), 50);

        let dependency = provider.create(&ProjectPartContainer::new(ProjectPartId(1))).unwrap();

        assert!(dependency.is_empty());
        assert!(storage.requested.lock().unwrap().is_empty());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failed_write_leaves_no_facet_behind() {
        let generated = BuildDependency {
            sources: vec![SourceEntry::new(FilePathId(1), SourceType::Source, 0)],
            used_macros: vec![UsedMacro::new("YI", FilePathId(1))],
            source_files: ids(&[1, 2]),
            source_dependencies: vec![SourceDependency::new(FilePathId(1), FilePathId(2))],
            file_statuses: vec![FileStatus::new(FilePathId(1), 10, 20)],
        };
        let database = Arc::new(Database::open_in_memory().unwrap());
        let provider = BuildDependenciesProvider::new(
            Arc::clone(&database),
            Arc::new(FailingMacroStorage(SqliteBuildDependenciesStorage)),
            Arc::new(FixedGenerator::new(generated)),
            Arc::new(FixedFileSystem(50)),
            Arc::new(AliveSignal::silent()),
        );
        let part = ProjectPartContainer::new(ProjectPartId(1)).with_sources(ids(&[1]));

        assert!(provider.create(&part).is_err());

        let counts = database
            .read(|conn| {
                let count = |table: &str| -> Result<i64> {
                    Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?)
                };
                Ok((
                    count("project_parts_files")?,
                    count("file_statuses")?,
                    count("source_dependencies")?,
                    count("used_macros")?,
                ))
            })
            .unwrap();
        assert_eq!(counts, (0, 0, 0, 0));
    }

    #[test]
    fn test_liveness_is_signalled() {
        let pings = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pings);
        let provider = BuildDependenciesProvider::new(
            Arc::new(Database::open_in_memory().unwrap()),
            table_storage(),
            Arc::new(FixedGenerator::new(BuildDependency::default())),
            Arc::new(FixedFileSystem(50)),
            Arc::new(AliveSignal::new(std::time::Duration::ZERO, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );
        let part = ProjectPartContainer::new(ProjectPartId(1)).with_sources(ids(&[4]));
        provider.create(&part).unwrap();
        assert!(pings.load(Ordering::SeqCst) >= 1);
    }
}

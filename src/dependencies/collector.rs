//! Regenerates build dependencies by scanning includes with the front-end

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::BuildDependencyGenerator;
use crate::frontend::{CommandLine, CppParser, IncludeOrigin, SourceReader, TranslationUnit};
use crate::generated_files::GeneratedFiles;
use crate::project::ProjectPartContainer;
use crate::source::{BuildDependency, FilePathId, SourceEntry, SourceType};
use crate::storage::FilePathCache;
use crate::{Error, Result};

/// Parses every source of a project part, following includes, and reports what the part
/// depends on. Unreadable sources are skipped with a warning.
pub struct BuildDependencyCollector {
    file_paths: Arc<FilePathCache>,
    generated_files: Arc<GeneratedFiles>,
}

impl BuildDependencyCollector {
    pub fn new(file_paths: Arc<FilePathCache>, generated_files: Arc<GeneratedFiles>) -> Self {
        Self {
            file_paths,
            generated_files,
        }
    }
}

fn source_type(origin: IncludeOrigin, id: FilePathId, part: &ProjectPartContainer) -> SourceType {
    if origin == IncludeOrigin::Main {
        SourceType::Source
    } else if part.header_path_ids.binary_search(&id).is_ok() {
        SourceType::ProjectInclude
    } else {
        origin.source_type()
    }
}

impl BuildDependencyGenerator for BuildDependencyCollector {
    fn create(&self, part: &ProjectPartContainer, alive: &dyn Fn()) -> Result<BuildDependency> {
        let mut parser = CppParser::new().map_err(|e| Error::Generator(e.to_string()))?;
        let reader = SourceReader::new(&self.generated_files.file_containers()?);
        let command_line = CommandLine::parse(&part.command_line_arguments());

        let mut sources: BTreeMap<FilePathId, SourceEntry> = BTreeMap::new();
        let mut dependency = BuildDependency::default();

        for source_id in &part.source_path_ids {
            let path = self.file_paths.file_path(*source_id)?;
            let unit = match TranslationUnit::parse(
                &mut parser,
                &self.file_paths,
                &reader,
                &path,
                &command_line,
            ) {
                Ok(unit) => unit,
                Err(Error::Io(e)) => {
                    warn!("Skipping unreadable source {}: {}", path.display(), e);
                    alive();
                    continue;
                }
                Err(e) => return Err(Error::Generator(format!("{}: {}", path.display(), e))),
            };

            for file in &unit.files {
                let entry = SourceEntry::new(file.id, source_type(file.origin, file.id, part), 0)
                    .with_missing_includes(unit.missing_includes.contains(&file.id));
                sources
                    .entry(file.id)
                    .and_modify(|known| {
                        if entry.source_type.as_i64() < known.source_type.as_i64() {
                            known.source_type = entry.source_type;
                        }
                        known.has_missing_includes |= entry.has_missing_includes;
                    })
                    .or_insert(entry);
            }
            dependency.source_files.extend(unit.file_ids());
            dependency.used_macros.extend(unit.used_macros(&command_line));
            dependency.file_statuses.extend(unit.file_statuses());
            dependency.source_dependencies.extend(unit.dependencies.iter().copied());
            alive();
        }

        dependency.sources = sources.into_values().collect();
        dependency.normalize();
        debug!(
            "Generated dependencies of project part {}: {} sources, {} edges",
            part.project_part_id,
            dependency.sources.len(),
            dependency.source_dependencies.len()
        );
        Ok(dependency)
    }
}

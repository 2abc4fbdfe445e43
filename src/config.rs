use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::FilePathCache;
use crate::ignore::discover_sources;
use crate::indexer::IndexingOptions;
use crate::project::{
    CompilerMacro, IncludeSearchPath, IncludeSearchPathKind, Language, LanguageExtension,
    LanguageVersion, ProjectPartContainer, ProjectPartId,
};
use crate::scheduler::default_worker_count;
use crate::service::ServiceOptions;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SymrefConfig {
    pub database: Option<String>,
    pub worker_count: Option<usize>,
    pub query_slot_count: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub alive_interval_ms: Option<u64>,
    pub log_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excludes: Vec<String>,
}

impl SymrefConfig {
    pub fn service_options(&self) -> ServiceOptions {
        let worker_count = self.worker_count.unwrap_or_else(default_worker_count).max(1);
        ServiceOptions {
            indexing: IndexingOptions {
                worker_count,
                alive_interval: Duration::from_millis(self.alive_interval_ms.unwrap_or(1000)),
            },
            query_slot_count: self.query_slot_count.unwrap_or(worker_count).max(1),
            poll_interval: Duration::from_millis(self.poll_interval_ms.unwrap_or(100)),
        }
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("symref.toml")
}

pub fn default_project_path() -> PathBuf {
    PathBuf::from("project.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".symref").join("symref.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<SymrefConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: SymrefConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &SymrefConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

pub fn ensure_gitignore(project_root: &Path) -> anyhow::Result<()> {
    let gitignore_path = project_root.join(".gitignore");
    let entry = ".symref/";

    let mut content = String::new();
    if gitignore_path.exists() {
        content = std::fs::read_to_string(&gitignore_path)?;
        if content.lines().any(|line| line.trim() == entry) {
            return Ok(());
        }
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
    }
    content.push_str(entry);
    content.push('\n');
    std::fs::write(&gitignore_path, content)?;
    Ok(())
}

/// The project parts the CLI indexes, read from `project.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProjectDescription {
    #[serde(default, rename = "part")]
    pub parts: Vec<PartDescription>,
}

/// One `[[part]]` table. Paths are relative to the file's directory; a directory in `sources`
/// stands for every C/C++ source below it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PartDescription {
    pub name: String,
    #[serde(default)]
    pub sources: Vec<PathBuf>,
    #[serde(default)]
    pub headers: Vec<PathBuf>,
    /// `NAME` or `NAME=VALUE`
    #[serde(default)]
    pub defines: Vec<String>,
    #[serde(default)]
    pub include_paths: Vec<PathBuf>,
    #[serde(default)]
    pub system_include_paths: Vec<PathBuf>,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub language_version: LanguageVersion,
    #[serde(default)]
    pub language_extension: LanguageExtension,
}

pub fn load_project(path: &Path) -> anyhow::Result<ProjectDescription> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
    Ok(toml::from_str(&contents)?)
}

impl PartDescription {
    /// Resolve the description against `base` and register every file with `file_paths`.
    pub fn to_container(
        &self,
        id: ProjectPartId,
        base: &Path,
        file_paths: &FilePathCache,
        excludes: &[String],
    ) -> crate::Result<ProjectPartContainer> {
        let mut sources = Vec::new();
        for path in &self.sources {
            let path = base.join(path);
            if path.is_dir() {
                sources.extend(discover_sources(&path, excludes));
            } else {
                sources.push(path);
            }
        }
        let headers: Vec<PathBuf> = self.headers.iter().map(|path| base.join(path)).collect();

        let mut part = ProjectPartContainer::new(id)
            .with_sources(file_paths.file_path_ids(&sources)?)
            .with_headers(file_paths.file_path_ids(&headers)?);
        part.compiler_macros = self
            .defines
            .iter()
            .enumerate()
            .map(|(index, define)| match define.split_once('=') {
                Some((key, value)) => CompilerMacro::new(key, value, index),
                None => CompilerMacro::new(define.as_str(), "", index),
            })
            .collect();
        part.project_include_search_paths = include_paths(base, &self.include_paths, IncludeSearchPathKind::User);
        part.system_include_search_paths =
            include_paths(base, &self.system_include_paths, IncludeSearchPathKind::System);
        part.tool_chain_arguments = self.arguments.clone();
        part.language = self.language;
        part.language_version = self.language_version;
        part.language_extension = self.language_extension;
        Ok(part)
    }
}

fn include_paths(base: &Path, paths: &[PathBuf], kind: IncludeSearchPathKind) -> Vec<IncludeSearchPath> {
    paths
        .iter()
        .enumerate()
        .map(|(index, path)| IncludeSearchPath::new(base.join(path).to_string_lossy(), index, kind))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use std::sync::Arc;

    #[test]
    fn test_config_defaults() {
        let config: SymrefConfig = toml::from_str("worker_count = 3\n").unwrap();
        let options = config.service_options();
        assert_eq!(options.indexing.worker_count, 3);
        assert_eq!(options.query_slot_count, 3);
        assert_eq!(options.poll_interval, Duration::from_millis(100));
        assert_eq!(options.indexing.alive_interval, Duration::from_millis(1000));
    }

    #[test]
    fn test_write_config_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("symref.toml");
        let config = SymrefConfig {
            database: Some("index.db".to_string()),
            ..Default::default()
        };
        write_config(&path, &config, false).unwrap();
        assert!(write_config(&path, &config, false).is_err());

        let loaded = load_config(Some(&path)).unwrap().unwrap();
        assert_eq!(loaded.database.as_deref(), Some("index.db"));
    }

    #[test]
    fn test_ensure_gitignore_adds_entry_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "target/").unwrap();
        ensure_gitignore(dir.path()).unwrap();
        ensure_gitignore(dir.path()).unwrap();
        let content = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(content, "target/\n.symref/\n");
    }

    #[test]
    fn test_part_description_to_container() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.cpp"), "").unwrap();
        std::fs::write(dir.path().join("src/b.cc"), "").unwrap();
        std::fs::write(dir.path().join("src/notes.txt"), "").unwrap();

        let project: ProjectDescription = toml::from_str(
            r#"
            [[part]]
            name = "app"
            sources = ["src"]
            headers = ["include/a.h"]
            defines = ["DEBUG", "LEVEL=2"]
            include_paths = ["include"]
            language_version = "cxx20"
            "#,
        )
        .unwrap();
        let file_paths = FilePathCache::new(Arc::new(Database::open_in_memory().unwrap()));
        let part = project.parts[0]
            .to_container(ProjectPartId(1), dir.path(), &file_paths, &[])
            .unwrap();

        assert_eq!(part.source_path_ids.len(), 2);
        assert_eq!(part.header_path_ids.len(), 1);
        assert_eq!(part.language_version, LanguageVersion::Cxx20);
        let arguments = part.command_line_arguments();
        assert_eq!(arguments[0], "-DDEBUG");
        assert_eq!(arguments[1], "-DLEVEL=2");
        assert!(arguments[2].starts_with("-I") && arguments[2].ends_with("include"));
    }
}

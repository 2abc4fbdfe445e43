//! Unsaved and generated file overlays.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::debug;

use crate::source::FileContainer;
use crate::storage::file_paths::normalize_path;
use crate::{Error, Result};

/// In-memory file contents that take precedence over the disk.
#[derive(Default)]
pub struct GeneratedFiles {
    files: RwLock<BTreeMap<PathBuf, FileContainer>>,
}

fn key(path: &Path) -> PathBuf {
    normalize_path(path).unwrap_or_else(|_| path.to_path_buf())
}

impl GeneratedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace overlays, keyed by path.
    pub fn update(&self, containers: Vec<FileContainer>) -> Result<()> {
        let mut files = self.files.write().map_err(Error::poisoned("generated files"))?;
        for mut container in containers {
            let path = key(&container.file_path);
            container.file_path = path.clone();
            debug!("Updating generated file {}", path.display());
            files.insert(path, container);
        }
        Ok(())
    }

    pub fn remove(&self, paths: &[PathBuf]) -> Result<()> {
        let mut files = self.files.write().map_err(Error::poisoned("generated files"))?;
        for path in paths {
            if files.remove(&key(path)).is_some() {
                debug!("Removed generated file {}", path.display());
            }
        }
        Ok(())
    }

    pub fn file_containers(&self) -> Result<Vec<FileContainer>> {
        let files = self.files.read().map_err(Error::poisoned("generated files"))?;
        Ok(files.values().cloned().collect())
    }

    pub fn content_for(&self, path: &Path) -> Result<Option<String>> {
        let files = self.files.read().map_err(Error::poisoned("generated files"))?;
        Ok(files.get(&key(path)).map(|c| c.content.clone()))
    }

    pub fn len(&self) -> usize {
        self.files.read().map(|f| f.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_replaces_by_path() {
        let files = GeneratedFiles::new();
        files
            .update(vec![
                FileContainer::new("/gen/ui_main.h", "int a;"),
                FileContainer::new("/gen/moc_main.cpp", "int b;"),
            ])
            .unwrap();
        files
            .update(vec![FileContainer::new("/gen/./ui_main.h", "int c;")])
            .unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(
            files.content_for(Path::new("/gen/ui_main.h")).unwrap().as_deref(),
            Some("int c;")
        );
    }

    #[test]
    fn test_remove() {
        let files = GeneratedFiles::new();
        files
            .update(vec![FileContainer::new("/gen/ui_main.h", "int a;")])
            .unwrap();
        files.remove(&[PathBuf::from("/gen/ui_main.h")]).unwrap();
        assert!(files.is_empty());
        assert_eq!(files.content_for(Path::new("/gen/ui_main.h")).unwrap(), None);
    }
}

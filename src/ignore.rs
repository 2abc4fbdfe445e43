use ignore::WalkBuilder;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::{Path, PathBuf};

/// Extensions treated as translation units when a directory is given as a source.
pub const SOURCE_EXTENSIONS: &[&str] = &["c", "cc", "cpp", "cxx", "c++", "m", "mm"];

/// Extensions the watcher and the project loader treat as headers.
pub const HEADER_EXTENSIONS: &[&str] = &["h", "hh", "hpp", "hxx", "h++", "inl", "tcc"];

pub struct IgnoreFilter {
    inner: Gitignore,
}

impl IgnoreFilter {
    pub fn new(root: &Path, extra_excludes: &[String]) -> Self {
        let mut builder = GitignoreBuilder::new(root);

        builder.add(root.join(".gitignore"));
        builder.add(root.join(".ignore"));

        let defaults = [
            // Build trees
            "build/", "out/", "cmake-build-*/", "CMakeFiles/", ".git/", ".symref/", ".vscode/", ".idea/",
            // Database files
            "*.db", "*.sqlite", "*.sqlite3", "*.wal", "*.shm",
            // Objects
            "*.o", "*.obj", "*.a", "*.lib", "*.so", "*.dylib", "*.dll", "*.exe", "*.pch", "*.gch",
        ];

        for pattern in defaults {
            builder.add_line(None, pattern).ok();
        }

        for pattern in extra_excludes {
            builder.add_line(None, pattern).ok();
        }

        Self {
            inner: builder.build().unwrap_or_else(|_| Gitignore::empty()),
        }
    }

    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        self.inner.matched_path_or_any_parents(path, is_dir).is_ignore()
    }
}

pub fn is_source_file(path: &Path) -> bool {
    has_extension(path, SOURCE_EXTENSIONS)
}

pub fn is_header_file(path: &Path) -> bool {
    has_extension(path, HEADER_EXTENSIONS)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

/// Every C/C++ source below `root` that is not ignored, sorted.
pub fn discover_sources(root: &Path, extra_excludes: &[String]) -> Vec<PathBuf> {
    let filter = IgnoreFilter::new(root, extra_excludes);
    let mut sources: Vec<PathBuf> = WalkBuilder::new(root)
        .hidden(false)
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .map(|entry| entry.into_path())
        .filter(|path| is_source_file(path) && !filter.is_ignored(path, false))
        .collect();
    sources.sort();
    sources
}

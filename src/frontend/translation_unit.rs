//! A main file plus everything it includes, parsed.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};
use tree_sitter::Tree;

use super::ast::{text, walk_preorder};
use super::{CommandLine, CppParser, SourceReader};
use crate::freshness;
use crate::source::{FilePathId, FileStatus, SourceDependency, SourceType, UsedMacro};
use crate::storage::FilePathCache;
use crate::storage::file_paths::normalize_path;
use crate::Result;

/// Guard against pathological include chains that the visited set does not catch.
const MAX_INCLUDE_DEPTH: usize = 200;

/// How a file entered the translation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IncludeOrigin {
    Main,
    /// Found next to the including file or through an absolute path
    Local,
    /// Found through a `-I` path
    User,
    /// Found through an `-isystem` path
    System,
}

impl IncludeOrigin {
    pub fn source_type(self) -> SourceType {
        match self {
            IncludeOrigin::Main => SourceType::Source,
            IncludeOrigin::Local | IncludeOrigin::User => SourceType::UserInclude,
            IncludeOrigin::System => SourceType::SystemInclude,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeDirective {
    pub name: String,
    pub angled: bool,
    pub line: u32,
}

pub struct ParsedFile {
    pub id: FilePathId,
    pub path: PathBuf,
    pub text: String,
    pub tree: Tree,
    pub origin: IncludeOrigin,
}

pub struct TranslationUnit {
    /// The main file first, then included files in the order they were reached.
    pub files: Vec<ParsedFile>,
    pub dependencies: Vec<SourceDependency>,
    /// Files with at least one include that could not be resolved.
    pub missing_includes: BTreeSet<FilePathId>,
}

struct Walk<'a> {
    parser: &'a mut CppParser,
    file_paths: &'a FilePathCache,
    reader: &'a SourceReader,
    command_line: &'a CommandLine,
    visited: HashSet<PathBuf>,
    unit: TranslationUnit,
}

impl TranslationUnit {
    /// Parse `main` and, transitively, every include that resolves. Failing to read `main`
    /// is an error; failing to read an include only marks the includer.
    pub fn parse(
        parser: &mut CppParser,
        file_paths: &FilePathCache,
        reader: &SourceReader,
        main: &Path,
        command_line: &CommandLine,
    ) -> Result<Self> {
        let main = normalize_path(main)?;
        let text = reader.read(&main)?;

        let mut walk = Walk {
            parser,
            file_paths,
            reader,
            command_line,
            visited: HashSet::new(),
            unit: TranslationUnit {
                files: Vec::new(),
                dependencies: Vec::new(),
                missing_includes: BTreeSet::new(),
            },
        };

        let main_id = walk.add_file(&main, text, IncludeOrigin::Main)?;
        for forced in &command_line.forced_includes {
            match resolve_forced_include(forced, command_line, reader) {
                Some((path, origin)) => {
                    if let Some(id) = walk.visit(&path, origin, 1)? {
                        walk.unit.dependencies.push(SourceDependency::new(main_id, id));
                    }
                }
                None => {
                    walk.unit.missing_includes.insert(main_id);
                }
            }
        }
        walk.follow_includes(0, 0)?;

        let mut unit = walk.unit;
        unit.dependencies.sort();
        unit.dependencies.dedup();
        debug!(
            "Parsed translation unit {} with {} files",
            main.display(),
            unit.files.len()
        );
        Ok(unit)
    }

    pub fn main_file(&self) -> Option<&ParsedFile> {
        self.files.first()
    }

    pub fn file_ids(&self) -> Vec<FilePathId> {
        let mut ids: Vec<FilePathId> = self.files.iter().map(|f| f.id).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Disk status of every file. Files that only exist as overlays have none.
    pub fn file_statuses(&self) -> Vec<FileStatus> {
        self.files
            .iter()
            .filter_map(|file| freshness::stat(&file.path, file.id))
            .collect()
    }

    /// Macros each file tests with `#ifdef`/`#ifndef`/`#if`/`defined` or expands.
    pub fn used_macros(&self, command_line: &CommandLine) -> Vec<UsedMacro> {
        let mut known: HashSet<String> = command_line.defined_macro_names().into_iter().collect();
        for file in &self.files {
            known.extend(defined_macros(&file.tree, &file.text));
        }

        let mut used = BTreeSet::new();
        for file in &self.files {
            for name in tested_macros(&file.tree, &file.text) {
                used.insert(UsedMacro::new(name, file.id));
            }
            for name in expanded_macros(&file.tree, &file.text, &known) {
                used.insert(UsedMacro::new(name, file.id));
            }
        }
        used.into_iter().collect()
    }
}

impl Walk<'_> {
    fn add_file(&mut self, path: &Path, text: String, origin: IncludeOrigin) -> Result<FilePathId> {
        let id = self.file_paths.file_path_id(path)?;
        let tree = self.parser.parse(&text)?;
        self.visited.insert(path.to_path_buf());
        self.unit.files.push(ParsedFile {
            id,
            path: path.to_path_buf(),
            text,
            tree,
            origin,
        });
        Ok(id)
    }

    /// Parse `path` unless seen before and follow its includes. Returns the file id, or `None`
    /// when the file cannot be read.
    fn visit(&mut self, path: &Path, origin: IncludeOrigin, depth: usize) -> Result<Option<FilePathId>> {
        if self.visited.contains(path) {
            return self.file_paths.file_path_id(path).map(Some);
        }
        let text = match self.reader.read(path) {
            Ok(text) => text,
            Err(e) => {
                debug!("Cannot read include {}: {}", path.display(), e);
                return Ok(None);
            }
        };
        let id = self.add_file(path, text, origin)?;
        let index = self.unit.files.len() - 1;
        self.follow_includes(index, depth)?;
        Ok(Some(id))
    }

    fn follow_includes(&mut self, index: usize, depth: usize) -> Result<()> {
        if depth >= MAX_INCLUDE_DEPTH {
            debug!("Include depth limit reached in {}", self.unit.files[index].path.display());
            return Ok(());
        }

        let (includer_id, includer_dir, directives) = {
            let file = &self.unit.files[index];
            (
                file.id,
                file.path.parent().map(Path::to_path_buf).unwrap_or_default(),
                include_directives(&file.tree, &file.text),
            )
        };

        for directive in directives {
            let resolved = resolve_include(&directive, &includer_dir, self.command_line, self.reader);
            let Some((path, origin)) = resolved else {
                trace!("Unresolved include {} in source {}", directive.name, includer_id);
                self.unit.missing_includes.insert(includer_id);
                continue;
            };
            match self.visit(&path, origin, depth + 1)? {
                Some(id) => self.unit.dependencies.push(SourceDependency::new(includer_id, id)),
                None => {
                    self.unit.missing_includes.insert(includer_id);
                }
            }
        }
        Ok(())
    }
}

/// Every `#include` in the file, including those in conditional blocks.
pub fn include_directives(tree: &Tree, source: &str) -> Vec<IncludeDirective> {
    let mut directives = Vec::new();
    walk_preorder(tree.root_node(), |node| {
        if node.kind() != "preproc_include" {
            return;
        }
        let Some(path) = node.child_by_field_name("path") else {
            return;
        };
        let raw = text(path, source).trim();
        let angled = match path.kind() {
            "system_lib_string" => true,
            "string_literal" => false,
            _ => return,
        };
        if raw.len() < 2 {
            return;
        }
        directives.push(IncludeDirective {
            name: raw[1..raw.len() - 1].to_string(),
            angled,
            line: node.start_position().row as u32 + 1,
        });
    });
    directives
}

/// Quoted includes look next to the includer first, then in user and system paths.
/// Angled includes only look in user and system paths.
pub fn resolve_include(
    directive: &IncludeDirective,
    includer_dir: &Path,
    command_line: &CommandLine,
    reader: &SourceReader,
) -> Option<(PathBuf, IncludeOrigin)> {
    let name = Path::new(&directive.name);
    let existing = |candidate: PathBuf| -> Option<PathBuf> {
        let candidate = normalize_path(&candidate).ok()?;
        reader.exists(&candidate).then_some(candidate)
    };

    if name.is_absolute() {
        return existing(name.to_path_buf()).map(|p| (p, IncludeOrigin::Local));
    }

    if !directive.angled {
        if let Some(path) = existing(includer_dir.join(name)) {
            return Some((path, IncludeOrigin::Local));
        }
    }
    for dir in &command_line.user_include_paths {
        if let Some(path) = existing(dir.join(name)) {
            return Some((path, IncludeOrigin::User));
        }
    }
    for dir in &command_line.system_include_paths {
        if let Some(path) = existing(dir.join(name)) {
            return Some((path, IncludeOrigin::System));
        }
    }
    None
}

fn resolve_forced_include(
    path: &Path,
    command_line: &CommandLine,
    reader: &SourceReader,
) -> Option<(PathBuf, IncludeOrigin)> {
    let directive = IncludeDirective {
        name: path.to_string_lossy().to_string(),
        angled: false,
        line: 0,
    };
    let cwd = std::env::current_dir().ok()?;
    resolve_include(&directive, &cwd, command_line, reader)
}

/// Names introduced by `#define`.
pub fn defined_macros(tree: &Tree, source: &str) -> Vec<String> {
    let mut names = Vec::new();
    walk_preorder(tree.root_node(), |node| {
        if matches!(node.kind(), "preproc_def" | "preproc_function_def") {
            if let Some(name) = node.child_by_field_name("name") {
                names.push(text(name, source).to_string());
            }
        }
    });
    names
}

/// Names tested by conditional directives.
pub fn tested_macros(tree: &Tree, source: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    walk_preorder(tree.root_node(), |node| match node.kind() {
        "preproc_ifdef" | "preproc_elifdef" => {
            if let Some(name) = node.child_by_field_name("name") {
                names.insert(text(name, source).to_string());
            }
        }
        "preproc_if" | "preproc_elif" => {
            if let Some(condition) = node.child_by_field_name("condition") {
                walk_preorder(condition, |inner| {
                    if inner.kind() == "identifier" {
                        names.insert(text(inner, source).to_string());
                    }
                });
            }
        }
        _ => {}
    });
    names.remove("defined");
    names
}

/// Identifiers outside of `#define` names that name a known macro.
pub fn expanded_macros(tree: &Tree, source: &str, known: &HashSet<String>) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    if known.is_empty() {
        return names;
    }
    walk_preorder(tree.root_node(), |node| {
        if node.kind() != "identifier" {
            return;
        }
        let is_definition_name = node.parent().is_some_and(|parent| {
            matches!(parent.kind(), "preproc_def" | "preproc_function_def")
                && parent.child_by_field_name("name") == Some(node)
        });
        if is_definition_name {
            return;
        }
        let name = text(node, source);
        if known.contains(name) {
            names.insert(name.to_string());
        }
    });
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FileContainer;
    use crate::storage::Database;
    use std::sync::Arc;

    fn cache() -> FilePathCache {
        FilePathCache::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[test]
    fn test_include_directives() {
        let source = "#include \"local.h\"\n#include <vector>\n#ifdef X\n#include \"cond.h\"\n#endif\n";
        let mut parser = CppParser::new().unwrap();
        let tree = parser.parse(source).unwrap();

        let directives = include_directives(&tree, source);
        assert_eq!(
            directives,
            vec![
                IncludeDirective { name: "local.h".to_string(), angled: false, line: 1 },
                IncludeDirective { name: "vector".to_string(), angled: true, line: 2 },
                IncludeDirective { name: "cond.h".to_string(), angled: false, line: 4 },
            ]
        );
    }

    #[test]
    fn test_translation_unit_follows_includes_and_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let include = dir.path().join("include");
        std::fs::create_dir(&include).unwrap();
        std::fs::write(dir.path().join("main.cpp"), "#include \"a.h\"\n#include <b.h>\n#include \"missing.h\"\n").unwrap();
        std::fs::write(dir.path().join("a.h"), "#include <b.h>\n").unwrap();
        std::fs::write(include.join("b.h"), "#include \"../a.h\"\nint b;\n").unwrap();

        let file_paths = cache();
        let mut parser = CppParser::new().unwrap();
        let command_line = CommandLine::parse(&[format!("-I{}", include.display())]);
        let unit = TranslationUnit::parse(
            &mut parser,
            &file_paths,
            &SourceReader::default(),
            &dir.path().join("main.cpp"),
            &command_line,
        )
        .unwrap();

        let main = file_paths.file_path_id(&dir.path().join("main.cpp")).unwrap();
        let a = file_paths.file_path_id(&dir.path().join("a.h")).unwrap();
        let b = file_paths.file_path_id(&include.join("b.h")).unwrap();

        assert_eq!(unit.files.len(), 3);
        assert_eq!(unit.files[0].origin, IncludeOrigin::Main);
        let mut expected = vec![
            SourceDependency::new(main, a),
            SourceDependency::new(main, b),
            SourceDependency::new(a, b),
            SourceDependency::new(b, a),
        ];
        expected.sort();
        assert_eq!(unit.dependencies, expected);
        assert_eq!(unit.missing_includes, BTreeSet::from([main]));
        assert_eq!(unit.file_statuses().len(), 3);
    }

    #[test]
    fn test_unsaved_header_is_followed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.cpp"), "#include \"generated.h\"\n").unwrap();
        let reader = SourceReader::new(&[FileContainer::new(dir.path().join("generated.h"), "void f();")]);

        let mut parser = CppParser::new().unwrap();
        let unit = TranslationUnit::parse(
            &mut parser,
            &cache(),
            &reader,
            &dir.path().join("main.cpp"),
            &CommandLine::default(),
        )
        .unwrap();

        assert_eq!(unit.files.len(), 2);
        assert!(unit.missing_includes.is_empty());
        assert_eq!(unit.files[1].text, "void f();");
        // overlays have no disk status
        assert_eq!(unit.file_statuses().len(), 1);
    }

    #[test]
    fn test_used_macros() {
        let source = "#ifdef YI\n#endif\n#if defined(ER) && VERSION > 2\n#endif\n#define LIANG 2\nint x = LIANG + SAN;\n";
        let mut parser = CppParser::new().unwrap();
        let tree = parser.parse(source).unwrap();

        let tested = tested_macros(&tree, source);
        assert_eq!(
            tested,
            BTreeSet::from(["ER".to_string(), "VERSION".to_string(), "YI".to_string()])
        );

        let known = HashSet::from(["LIANG".to_string(), "SAN".to_string()]);
        let expanded = expanded_macros(&tree, source, &known);
        assert_eq!(expanded, BTreeSet::from(["LIANG".to_string(), "SAN".to_string()]));
    }
}

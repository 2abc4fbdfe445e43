//! C/C++ front-end built on tree-sitter
//!
//! The engine never needs full semantic analysis: it needs a syntax tree per file, the
//! include graph of a translation unit and the macros it tests. This module provides:
//! - `CppParser`: a reusable tree-sitter parser for C and C++
//! - `CommandLine`: the subset of compiler arguments that matters (`-D`, `-U`, `-I`, `-isystem`, `-include`)
//! - `SourceReader`: file contents with unsaved overlays taking precedence
//! - `translation_unit`: include resolution and traversal
//! - `ast`: classification of tree-sitter nodes into the entity kinds we index and match
//! - `collector`: the symbols collector run by indexing workers

pub mod ast;
pub mod translation_unit;
pub mod collector;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tree_sitter::{Parser, Tree};

use crate::source::FileContainer;
use crate::storage::file_paths::normalize_path;
use crate::{Error, Result};

pub use collector::SymbolsCollector;
pub use translation_unit::{IncludeOrigin, ParsedFile, TranslationUnit};

/// tree-sitter parser configured for C++ (which also covers the C we care about).
pub struct CppParser {
    parser: Parser,
}

impl CppParser {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_cpp::LANGUAGE.into())
            .map_err(|e| Error::Parse(format!("Failed to load C++ grammar: {}", e)))?;
        Ok(Self { parser })
    }

    pub fn parse(&mut self, text: &str) -> Result<Tree> {
        self.parser
            .parse(text, None)
            .ok_or_else(|| Error::Parse("tree-sitter returned no tree".to_string()))
    }
}

/// Reads file contents, preferring unsaved overlays.
#[derive(Debug, Clone, Default)]
pub struct SourceReader {
    unsaved: HashMap<PathBuf, String>,
}

impl SourceReader {
    pub fn new(unsaved: &[FileContainer]) -> Self {
        let mut reader = Self::default();
        reader.set_unsaved_files(unsaved);
        reader
    }

    pub fn set_unsaved_files(&mut self, unsaved: &[FileContainer]) {
        self.unsaved = unsaved
            .iter()
            .map(|c| {
                let path = normalize_path(&c.file_path).unwrap_or_else(|_| c.file_path.clone());
                (path, c.content.clone())
            })
            .collect();
    }

    /// Add overlays on top of the current ones.
    pub fn add_unsaved_files(&mut self, unsaved: &[FileContainer]) {
        for container in unsaved {
            let path = normalize_path(&container.file_path)
                .unwrap_or_else(|_| container.file_path.clone());
            self.unsaved.insert(path, container.content.clone());
        }
    }

    pub fn is_unsaved(&self, path: &Path) -> bool {
        self.unsaved.contains_key(path)
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.unsaved.contains_key(path) || path.is_file()
    }

    pub fn read(&self, path: &Path) -> Result<String> {
        if let Some(content) = self.unsaved.get(path) {
            return Ok(content.clone());
        }
        Ok(std::fs::read_to_string(path)?)
    }

    pub fn clear(&mut self) {
        self.unsaved.clear();
    }
}

/// The compiler arguments the front-end understands. Everything else is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandLine {
    pub defines: Vec<(String, String)>,
    pub undefines: Vec<String>,
    pub user_include_paths: Vec<PathBuf>,
    pub system_include_paths: Vec<PathBuf>,
    pub forced_includes: Vec<PathBuf>,
}

impl CommandLine {
    pub fn parse(arguments: &[String]) -> Self {
        let mut command_line = Self::default();
        let mut args = arguments.iter();

        while let Some(arg) = args.next() {
            let mut value_of = |flag: &str| -> Option<String> {
                if arg == flag {
                    args.next().cloned()
                } else {
                    arg.strip_prefix(flag).map(str::to_string)
                }
            };

            if arg == "-include-pch" {
                let _pch = value_of("-include-pch");
            } else if arg.starts_with("-isystem") {
                if let Some(path) = value_of("-isystem") {
                    command_line.system_include_paths.push(PathBuf::from(path));
                }
            } else if arg.starts_with("-include") {
                if let Some(path) = value_of("-include") {
                    command_line.forced_includes.push(PathBuf::from(path));
                }
            } else if arg.starts_with("-I") {
                if let Some(path) = value_of("-I") {
                    command_line.user_include_paths.push(PathBuf::from(path));
                }
            } else if arg.starts_with("-D") {
                if let Some(define) = value_of("-D") {
                    let (key, value) = match define.split_once('=') {
                        Some((k, v)) => (k.to_string(), v.to_string()),
                        None => (define, String::new()),
                    };
                    command_line.defines.push((key, value));
                }
            } else if arg.starts_with("-U") {
                if let Some(name) = value_of("-U") {
                    command_line.undefines.push(name);
                }
            }
        }

        command_line
    }

    /// Names defined on the command line and not undefined afterwards.
    pub fn defined_macro_names(&self) -> Vec<String> {
        self.defines
            .iter()
            .map(|(k, _)| k.clone())
            .filter(|k| !self.undefines.contains(k))
            .collect()
    }
}

//! Project parts: one compilation configuration for a set of translation units.

use crate::source::FilePathId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProjectPartId(pub i64);

impl std::fmt::Display for ProjectPartId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompilerMacro {
    pub key: String,
    pub value: String,
    /// Position on the command line; later definitions win.
    pub index: usize,
}

impl CompilerMacro {
    pub fn new(key: impl Into<String>, value: impl Into<String>, index: usize) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncludeSearchPathKind {
    User,
    BuiltIn,
    System,
    Framework,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncludeSearchPath {
    pub path: String,
    pub index: usize,
    pub kind: IncludeSearchPathKind,
}

impl IncludeSearchPath {
    pub fn new(path: impl Into<String>, index: usize, kind: IncludeSearchPathKind) -> Self {
        Self {
            path: path.into(),
            index,
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    #[default]
    Cxx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageVersion {
    C89,
    C99,
    C11,
    C18,
    Cxx98,
    Cxx03,
    Cxx11,
    Cxx14,
    #[default]
    Cxx17,
    Cxx20,
}

impl Language {
    pub fn as_i64(self) -> i64 {
        match self {
            Language::C => 0,
            Language::Cxx => 1,
        }
    }

    pub fn from_i64(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Language::C),
            1 => Ok(Language::Cxx),
            _ => Err(Error::Parse(format!("Unknown language: {}", value))),
        }
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "c" => Ok(Language::C),
            "c++" | "cxx" | "cpp" => Ok(Language::Cxx),
            _ => Err(Error::Parse(format!("Unknown language: {}", s))),
        }
    }
}

impl LanguageVersion {
    const ALL: [LanguageVersion; 10] = [
        LanguageVersion::C89,
        LanguageVersion::C99,
        LanguageVersion::C11,
        LanguageVersion::C18,
        LanguageVersion::Cxx98,
        LanguageVersion::Cxx03,
        LanguageVersion::Cxx11,
        LanguageVersion::Cxx14,
        LanguageVersion::Cxx17,
        LanguageVersion::Cxx20,
    ];

    pub fn as_i64(self) -> i64 {
        Self::ALL.iter().position(|v| *v == self).unwrap_or_default() as i64
    }

    pub fn from_i64(value: i64) -> Result<Self> {
        usize::try_from(value)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
            .ok_or_else(|| Error::Parse(format!("Unknown language version: {}", value)))
    }
}

/// Bit set of language extensions enabled for a project part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LanguageExtension(pub u32);

impl LanguageExtension {
    pub const NONE: LanguageExtension = LanguageExtension(0);
    pub const GNU: LanguageExtension = LanguageExtension(1 << 0);
    pub const MICROSOFT: LanguageExtension = LanguageExtension(1 << 1);
    pub const BORLAND: LanguageExtension = LanguageExtension(1 << 2);
    pub const OPEN_MP: LanguageExtension = LanguageExtension(1 << 3);
    pub const OBJECTIVE_C: LanguageExtension = LanguageExtension(1 << 4);

    pub fn contains(self, other: LanguageExtension) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for LanguageExtension {
    type Output = LanguageExtension;

    fn bitor(self, rhs: LanguageExtension) -> LanguageExtension {
        LanguageExtension(self.0 | rhs.0)
    }
}

/// Project part as handed over by the project model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectPartContainer {
    pub project_part_id: ProjectPartId,
    pub tool_chain_arguments: Vec<String>,
    pub compiler_macros: Vec<CompilerMacro>,
    /// Built-in, system and framework paths, in search order.
    pub system_include_search_paths: Vec<IncludeSearchPath>,
    /// User (`-I`) paths, in search order.
    pub project_include_search_paths: Vec<IncludeSearchPath>,
    pub header_path_ids: Vec<FilePathId>,
    pub source_path_ids: Vec<FilePathId>,
    pub language: Language,
    pub language_version: LanguageVersion,
    pub language_extension: LanguageExtension,
}

impl ProjectPartContainer {
    pub fn new(project_part_id: ProjectPartId) -> Self {
        Self {
            project_part_id,
            tool_chain_arguments: Vec::new(),
            compiler_macros: Vec::new(),
            system_include_search_paths: Vec::new(),
            project_include_search_paths: Vec::new(),
            header_path_ids: Vec::new(),
            source_path_ids: Vec::new(),
            language: Language::default(),
            language_version: LanguageVersion::default(),
            language_extension: LanguageExtension::default(),
        }
    }

    pub fn with_sources(mut self, mut sources: Vec<FilePathId>) -> Self {
        sources.sort();
        sources.dedup();
        self.source_path_ids = sources;
        self
    }

    pub fn with_headers(mut self, mut headers: Vec<FilePathId>) -> Self {
        headers.sort();
        headers.dedup();
        self.header_path_ids = headers;
        self
    }

    /// The arguments handed to the front-end for a source of this part: defines, user and
    /// system include paths, then the raw tool chain arguments.
    pub fn command_line_arguments(&self) -> Vec<String> {
        let mut macros = self.compiler_macros.clone();
        macros.sort_by_key(|m| m.index);

        let mut user_paths = self.project_include_search_paths.clone();
        user_paths.sort_by_key(|p| p.index);

        let mut system_paths = self.system_include_search_paths.clone();
        system_paths.sort_by_key(|p| p.index);

        let mut arguments = Vec::new();
        for compiler_macro in macros {
            if compiler_macro.value.is_empty() {
                arguments.push(format!("-D{}", compiler_macro.key));
            } else {
                arguments.push(format!("-D{}={}", compiler_macro.key, compiler_macro.value));
            }
        }
        for path in user_paths {
            arguments.push(format!("-I{}", path.path));
        }
        for path in system_paths {
            arguments.push("-isystem".to_string());
            arguments.push(path.path);
        }
        arguments.extend(self.tool_chain_arguments.iter().cloned());
        arguments
    }
}

/// What the store remembers about a project part; compared against an incoming container to
/// decide whether every source must be reindexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPartArtefact {
    pub project_part_id: ProjectPartId,
    pub tool_chain_arguments: Vec<String>,
    pub compiler_macros: Vec<CompilerMacro>,
    pub system_include_search_paths: Vec<IncludeSearchPath>,
    pub project_include_search_paths: Vec<IncludeSearchPath>,
    pub language: Language,
    pub language_version: LanguageVersion,
    pub language_extension: LanguageExtension,
}

impl ProjectPartArtefact {
    pub fn matches(&self, part: &ProjectPartContainer) -> bool {
        self.tool_chain_arguments == part.tool_chain_arguments
            && self.compiler_macros == part.compiler_macros
            && self.system_include_search_paths == part.system_include_search_paths
            && self.project_include_search_paths == part.project_include_search_paths
            && self.language == part.language
            && self.language_version == part.language_version
            && self.language_extension == part.language_extension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_arguments_follow_search_order() {
        let mut part = ProjectPartContainer::new(ProjectPartId(1));
        part.compiler_macros = vec![
            CompilerMacro::new("NDEBUG", "", 2),
            CompilerMacro::new("VERSION", "3", 1),
        ];
        part.project_include_search_paths = vec![
            IncludeSearchPath::new("/project/b", 2, IncludeSearchPathKind::User),
            IncludeSearchPath::new("/project/a", 1, IncludeSearchPathKind::User),
        ];
        part.system_include_search_paths = vec![IncludeSearchPath::new(
            "/usr/include",
            1,
            IncludeSearchPathKind::System,
        )];
        part.tool_chain_arguments = vec!["-Wall".to_string()];

        assert_eq!(
            part.command_line_arguments(),
            vec![
                "-DVERSION=3",
                "-DNDEBUG",
                "-I/project/a",
                "-I/project/b",
                "-isystem",
                "/usr/include",
                "-Wall",
            ]
        );
    }

    #[test]
    fn test_language_extension_bits() {
        let extensions = LanguageExtension::GNU | LanguageExtension::OPEN_MP;
        assert!(extensions.contains(LanguageExtension::GNU));
        assert!(!extensions.contains(LanguageExtension::MICROSOFT));
    }

    #[test]
    fn test_language_version_storage_value() {
        assert_eq!(
            LanguageVersion::from_i64(LanguageVersion::Cxx14.as_i64()).unwrap(),
            LanguageVersion::Cxx14
        );
        assert!(LanguageVersion::from_i64(-1).is_err());
    }
}

//! Symbol types
//!
//! A symbol is a named C/C++ entity identified by its USR (universal symbol reference).
//! Every occurrence of a symbol in a source is a location with a kind:
//! - `Declaration` / `Definition`: where the entity is introduced
//! - `DeclarationReference`: any other mention
//! - `MacroDefinition` / `MacroUsage`: preprocessor macros

use crate::source::FilePathId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Persisted id of a symbol (row id of `symbols`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SymbolId(pub i64);

/// Collector-local symbol key. It only means something inside one collection batch and is
/// mapped to a [`SymbolId`] when the batch is stored.
pub type SymbolIndex = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Variable,
    Field,
    Record,
    Enumeration,
    Enumerator,
    Namespace,
    Typedef,
    Macro,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Variable => "variable",
            SymbolKind::Field => "field",
            SymbolKind::Record => "record",
            SymbolKind::Enumeration => "enumeration",
            SymbolKind::Enumerator => "enumerator",
            SymbolKind::Namespace => "namespace",
            SymbolKind::Typedef => "typedef",
            SymbolKind::Macro => "macro",
        }
    }

    pub fn all() -> &'static [SymbolKind] {
        &[
            SymbolKind::Function,
            SymbolKind::Variable,
            SymbolKind::Field,
            SymbolKind::Record,
            SymbolKind::Enumeration,
            SymbolKind::Enumerator,
            SymbolKind::Namespace,
            SymbolKind::Typedef,
            SymbolKind::Macro,
        ]
    }

    /// Integer stored in `symbols.symbol_kind`.
    pub fn as_i64(self) -> i64 {
        match self {
            SymbolKind::Function => 0,
            SymbolKind::Variable => 1,
            SymbolKind::Field => 2,
            SymbolKind::Record => 3,
            SymbolKind::Enumeration => 4,
            SymbolKind::Enumerator => 5,
            SymbolKind::Namespace => 6,
            SymbolKind::Typedef => 7,
            SymbolKind::Macro => 8,
        }
    }

    pub fn from_i64(value: i64) -> Result<Self> {
        SymbolKind::all()
            .iter()
            .copied()
            .find(|kind| kind.as_i64() == value)
            .ok_or_else(|| Error::Parse(format!("Unknown symbol kind: {}", value)))
    }
}

impl FromStr for SymbolKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "function" | "fn" | "method" => Ok(SymbolKind::Function),
            "variable" | "var" => Ok(SymbolKind::Variable),
            "field" | "member" => Ok(SymbolKind::Field),
            "record" | "class" | "struct" | "union" => Ok(SymbolKind::Record),
            "enumeration" | "enum" => Ok(SymbolKind::Enumeration),
            "enumerator" => Ok(SymbolKind::Enumerator),
            "namespace" | "ns" => Ok(SymbolKind::Namespace),
            "typedef" | "alias" => Ok(SymbolKind::Typedef),
            "macro" => Ok(SymbolKind::Macro),
            _ => Err(Error::Parse(format!("Unknown symbol kind: {}", s))),
        }
    }
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a location says about its symbol. The declaration sorts before the definition,
/// which lets "go to declaration" pick the first two usages ordered by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceLocationKind {
    Declaration,
    Definition,
    DeclarationReference,
    MacroDefinition,
    MacroUsage,
}

impl SourceLocationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceLocationKind::Declaration => "declaration",
            SourceLocationKind::Definition => "definition",
            SourceLocationKind::DeclarationReference => "reference",
            SourceLocationKind::MacroDefinition => "macro_definition",
            SourceLocationKind::MacroUsage => "macro_usage",
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            SourceLocationKind::Declaration => 0,
            SourceLocationKind::Definition => 1,
            SourceLocationKind::DeclarationReference => 2,
            SourceLocationKind::MacroDefinition => 3,
            SourceLocationKind::MacroUsage => 4,
        }
    }

    pub fn from_i64(value: i64) -> Result<Self> {
        match value {
            0 => Ok(SourceLocationKind::Declaration),
            1 => Ok(SourceLocationKind::Definition),
            2 => Ok(SourceLocationKind::DeclarationReference),
            3 => Ok(SourceLocationKind::MacroDefinition),
            4 => Ok(SourceLocationKind::MacroUsage),
            _ => Err(Error::Parse(format!("Unknown location kind: {}", value))),
        }
    }
}

impl FromStr for SourceLocationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "declaration" | "decl" => Ok(SourceLocationKind::Declaration),
            "definition" | "def" => Ok(SourceLocationKind::Definition),
            "reference" | "ref" => Ok(SourceLocationKind::DeclarationReference),
            "macro_definition" => Ok(SourceLocationKind::MacroDefinition),
            "macro_usage" => Ok(SourceLocationKind::MacroUsage),
            _ => Err(Error::Parse(format!("Unknown location kind: {}", s))),
        }
    }
}

impl std::fmt::Display for SourceLocationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A symbol as collected from one translation unit, before it has a persisted id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolEntry {
    pub usr: String,
    pub name: String,
    pub kind: SymbolKind,
    pub signature: Option<String>,
}

impl SymbolEntry {
    pub fn new(usr: impl Into<String>, name: impl Into<String>, kind: SymbolKind) -> Self {
        Self {
            usr: usr.into(),
            name: name.into(),
            kind,
            signature: None,
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }
}

pub type SymbolEntries = HashMap<SymbolIndex, SymbolEntry>;

/// One occurrence of a collected symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocationEntry {
    pub symbol: SymbolIndex,
    pub source_id: FilePathId,
    pub line: u32,
    pub column: u32,
    pub kind: SourceLocationKind,
}

impl SourceLocationEntry {
    pub fn new(
        symbol: SymbolIndex,
        source_id: FilePathId,
        line: u32,
        column: u32,
        kind: SourceLocationKind,
    ) -> Self {
        Self {
            symbol,
            source_id,
            line,
            column,
            kind,
        }
    }
}

/// A persisted symbol as returned by lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: SymbolId,
    pub usr: String,
    pub name: String,
    pub kind: SymbolKind,
    pub signature: Option<String>,
}

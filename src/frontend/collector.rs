//! Symbols collector: the processor indexing workers run per translation unit

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;

use tracing::debug;
use tree_sitter::Node;

use super::ast::{self, AstKind, text, walk_preorder};
use super::translation_unit::{ParsedFile, TranslationUnit};
use super::{CommandLine, CppParser, SourceReader};
use crate::scheduler::Processor;
use crate::source::{FileContainer, FilePathId, FileStatus, SourceDependency, UsedMacro};
use crate::storage::FilePathCache;
use crate::symbol::{
    SourceLocationEntry, SourceLocationKind, SymbolEntries, SymbolEntry, SymbolIndex, SymbolKind,
};
use crate::{Error, Result};

/// Collects symbols, locations, used macros, file statuses and include edges of one
/// translation unit at a time. Reused across tasks; `clear` resets it.
pub struct SymbolsCollector {
    parser: CppParser,
    file_paths: Arc<FilePathCache>,
    reader: SourceReader,
    file: Option<(FilePathId, Vec<String>)>,
    symbols: SymbolEntries,
    locations: Vec<SourceLocationEntry>,
    source_files: Vec<FilePathId>,
    used_macros: Vec<UsedMacro>,
    file_statuses: Vec<FileStatus>,
    source_dependencies: Vec<SourceDependency>,
}

impl SymbolsCollector {
    pub fn new(file_paths: Arc<FilePathCache>) -> Result<Self> {
        Ok(Self {
            parser: CppParser::new()?,
            file_paths,
            reader: SourceReader::default(),
            file: None,
            symbols: SymbolEntries::new(),
            locations: Vec::new(),
            source_files: Vec::new(),
            used_macros: Vec::new(),
            file_statuses: Vec::new(),
            source_dependencies: Vec::new(),
        })
    }

    /// Select the main file and its compiler arguments for the next collection.
    pub fn set_file(&mut self, source_id: FilePathId, arguments: Vec<String>) {
        self.file = Some((source_id, arguments));
    }

    pub fn collect_symbols(&mut self) -> Result<()> {
        let (source_id, arguments) = self
            .file
            .clone()
            .ok_or_else(|| Error::Parse("no file set for symbol collection".to_string()))?;
        let path = self.file_paths.file_path(source_id)?;
        let command_line = CommandLine::parse(&arguments);

        let unit = TranslationUnit::parse(
            &mut self.parser,
            &self.file_paths,
            &self.reader,
            &path,
            &command_line,
        )?;

        let mut collection = Collection::default();
        for file in &unit.files {
            collection.collect_declarations(file);
        }
        for file in &unit.files {
            collection.collect_references(file);
        }

        self.symbols = collection.symbols;
        self.locations = collection.locations.into_values().collect();
        self.source_files = unit.file_ids();
        self.used_macros = unit.used_macros(&command_line);
        self.file_statuses = unit.file_statuses();
        self.source_dependencies = unit.dependencies.clone();

        debug!(
            "Collected {} symbols and {} locations from {}",
            self.symbols.len(),
            self.locations.len(),
            path.display()
        );
        Ok(())
    }

    pub fn symbols(&self) -> &SymbolEntries {
        &self.symbols
    }

    pub fn source_locations(&self) -> &[SourceLocationEntry] {
        &self.locations
    }

    pub fn source_files(&self) -> &[FilePathId] {
        &self.source_files
    }

    pub fn used_macros(&self) -> &[UsedMacro] {
        &self.used_macros
    }

    pub fn file_statuses(&self) -> &[FileStatus] {
        &self.file_statuses
    }

    pub fn source_dependencies(&self) -> &[SourceDependency] {
        &self.source_dependencies
    }
}

impl Processor for SymbolsCollector {
    fn set_unsaved_files(&mut self, files: &[FileContainer]) {
        self.reader.set_unsaved_files(files);
    }

    fn clear(&mut self) {
        self.reader.clear();
        self.file = None;
        self.symbols.clear();
        self.locations.clear();
        self.source_files.clear();
        self.used_macros.clear();
        self.file_statuses.clear();
        self.source_dependencies.clear();
    }
}

struct GlobalSymbol {
    index: SymbolIndex,
    qualified_name: String,
    kind: SymbolKind,
}

/// A parameter or block scope variable, visible in `scope` after `declared_at`.
struct LocalSymbol {
    index: SymbolIndex,
    source_id: FilePathId,
    name: String,
    scope: Range<usize>,
    declared_at: usize,
}

#[derive(Default)]
struct Collection {
    symbols: SymbolEntries,
    indices: HashMap<String, SymbolIndex>,
    globals: HashMap<String, Vec<GlobalSymbol>>,
    locals: Vec<LocalSymbol>,
    macros: HashMap<String, SymbolIndex>,
    /// Name nodes of declarations, by (source, start byte), never resolved as references.
    declaration_names: HashSet<(FilePathId, usize)>,
    locations: BTreeMap<(FilePathId, u32, u32), SourceLocationEntry>,
}

impl Collection {
    fn symbol(&mut self, entry: SymbolEntry) -> SymbolIndex {
        if let Some(index) = self.indices.get(&entry.usr) {
            return *index;
        }
        let index = self.symbols.len() as SymbolIndex;
        self.indices.insert(entry.usr.clone(), index);
        self.symbols.insert(index, entry);
        index
    }

    fn locate(&mut self, symbol: SymbolIndex, source_id: FilePathId, node: Node, kind: SourceLocationKind) {
        let position = node.start_position();
        let line = position.row as u32 + 1;
        let column = position.column as u32 + 1;
        self.locations
            .entry((source_id, line, column))
            .or_insert_with(|| SourceLocationEntry::new(symbol, source_id, line, column, kind));
    }

    fn collect_declarations(&mut self, file: &ParsedFile) {
        let source = file.text.as_str();
        let mut declarations = Vec::new();
        walk_preorder(file.tree.root_node(), |node| {
            if matches!(node.kind(), "preproc_def" | "preproc_function_def") {
                declarations.push((node, None));
            } else if let Some(kind) = AstKind::classify(node).filter(|k| k.is_declaration()) {
                declarations.push((node, Some(kind)));
            }
        });

        for (node, kind) in declarations {
            match kind {
                None => self.declare_macro(file.id, node, source),
                Some(AstKind::ParmVarDecl) => self.declare_parameter(file.id, node, source),
                Some(AstKind::VarDecl) if block_scope(node).is_some() => {
                    self.declare_local(file.id, node, source)
                }
                Some(kind) => self.declare_global(file.id, node, kind, source),
            }
        }
    }

    fn declare_macro(&mut self, source_id: FilePathId, node: Node, source: &str) {
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let macro_name = text(name, source);
        let index = self.symbol(SymbolEntry::new(
            format!("c:@macro@{}", macro_name),
            macro_name,
            SymbolKind::Macro,
        ));
        self.macros.insert(macro_name.to_string(), index);
        self.declaration_names.insert((source_id, name.start_byte()));
        self.locate(index, source_id, name, SourceLocationKind::MacroDefinition);
    }

    fn declare_global(&mut self, source_id: FilePathId, node: Node, kind: AstKind, source: &str) {
        let Some(symbol_kind) = symbol_kind(kind) else {
            return;
        };
        let location_kind = if ast::is_definition(node, kind, source) {
            SourceLocationKind::Definition
        } else {
            SourceLocationKind::Declaration
        };

        for name in declared_names(node, kind) {
            let qualified_name = ast::qualified_name(node, name, source);
            let mut usr = format!("c:@{}@{}", usr_tag(symbol_kind), qualified_name);
            let mut entry_signature = None;
            if symbol_kind == SymbolKind::Function {
                let parameter_types: Vec<String> = ast::parameters(node, source)
                    .into_iter()
                    .map(|parameter| parameter_type(parameter, source))
                    .collect();
                usr.push('#');
                usr.push_str(&parameter_types.join("#"));
                entry_signature = Some(signature(node, name, source));
            }

            let mut entry = SymbolEntry::new(usr, text(name, source), symbol_kind);
            if let Some(signature) = entry_signature {
                entry = entry.with_signature(signature);
            }
            let index = self.symbol(entry);

            if !self.globals.get(text(name, source)).is_some_and(|g| g.iter().any(|s| s.index == index)) {
                self.globals
                    .entry(text(name, source).to_string())
                    .or_default()
                    .push(GlobalSymbol {
                        index,
                        qualified_name,
                        kind: symbol_kind,
                    });
            }
            self.declaration_names.insert((source_id, name.start_byte()));
            self.locate(index, source_id, name, location_kind);
        }
    }

    /// Parameters of definitions are locals of the body. Parameters of prototypes are not indexed.
    fn declare_parameter(&mut self, source_id: FilePathId, node: Node, source: &str) {
        let Some(name) = ast::name_node(node, AstKind::ParmVarDecl) else {
            return;
        };
        match parameter_scope(node) {
            Some(body) => self.add_local(source_id, name, body.byte_range(), source),
            None => {
                self.declaration_names.insert((source_id, name.start_byte()));
            }
        }
    }

    fn declare_local(&mut self, source_id: FilePathId, node: Node, source: &str) {
        let Some(scope) = block_scope(node) else {
            return;
        };
        for name in declared_names(node, AstKind::VarDecl) {
            self.add_local(source_id, name, scope.byte_range(), source);
        }
    }

    fn add_local(&mut self, source_id: FilePathId, name: Node, scope: Range<usize>, source: &str) {
        let local_name = text(name, source);
        let index = self.symbol(SymbolEntry::new(
            format!("c:{}@{}@{}", source_id, name.start_byte(), local_name),
            local_name,
            SymbolKind::Variable,
        ));
        self.locals.push(LocalSymbol {
            index,
            source_id,
            name: local_name.to_string(),
            scope,
            declared_at: name.start_byte(),
        });
        self.declaration_names.insert((source_id, name.start_byte()));
        self.locate(index, source_id, name, SourceLocationKind::Definition);
    }

    fn collect_references(&mut self, file: &ParsedFile) {
        let source = file.text.as_str();
        let mut references = Vec::new();
        walk_preorder(file.tree.root_node(), |node| {
            if matches!(
                node.kind(),
                "identifier" | "field_identifier" | "type_identifier" | "namespace_identifier"
            ) && !self.declaration_names.contains(&(file.id, node.start_byte()))
            {
                references.push(node);
            }
        });

        for node in references {
            let name = text(node, source);
            if let Some(index) = self.macros.get(name).copied() {
                self.locate(index, file.id, node, SourceLocationKind::MacroUsage);
            } else if let Some(index) = self.resolve(file.id, node, source) {
                self.locate(index, file.id, node, SourceLocationKind::DeclarationReference);
            }
        }
    }

    fn resolve(&self, source_id: FilePathId, node: Node, source: &str) -> Option<SymbolIndex> {
        let name = text(node, source);
        let position = node.start_byte();

        if node.kind() == "identifier" {
            let local = self
                .locals
                .iter()
                .filter(|local| {
                    local.source_id == source_id
                        && local.name == name
                        && local.scope.contains(&position)
                        && local.declared_at <= position
                })
                .min_by_key(|local| (local.scope.len(), usize::MAX - local.declared_at));
            if let Some(local) = local {
                return Some(local.index);
            }
        }

        let candidates: Vec<&GlobalSymbol> = self
            .globals
            .get(name)?
            .iter()
            .filter(|global| reference_accepts(node.kind(), global.kind))
            .collect();
        match candidates.as_slice() {
            [] => None,
            [only] => Some(only.index),
            _ => {
                let mut scopes = ast::enclosing_scopes(node, source);
                if let Some(qualifier) = qualifier(node, source) {
                    scopes.push(qualifier);
                }
                // innermost enclosing scope first, like unqualified lookup
                for depth in (0..=scopes.len()).rev() {
                    let mut parts = scopes[..depth].to_vec();
                    parts.push(name.to_string());
                    let wanted = parts.join("::");
                    if let Some(found) = candidates.iter().find(|g| g.qualified_name == wanted) {
                        return Some(found.index);
                    }
                }
                candidates.first().map(|g| g.index)
            }
        }
    }
}

fn symbol_kind(kind: AstKind) -> Option<SymbolKind> {
    let symbol_kind = match kind {
        AstKind::FunctionDecl => SymbolKind::Function,
        AstKind::VarDecl | AstKind::ParmVarDecl => SymbolKind::Variable,
        AstKind::FieldDecl => SymbolKind::Field,
        AstKind::RecordDecl => SymbolKind::Record,
        AstKind::EnumDecl => SymbolKind::Enumeration,
        AstKind::EnumConstantDecl => SymbolKind::Enumerator,
        AstKind::NamespaceDecl => SymbolKind::Namespace,
        AstKind::TypedefDecl => SymbolKind::Typedef,
        AstKind::CallExpr
        | AstKind::CompoundStmt
        | AstKind::ReturnStmt
        | AstKind::IfStmt
        | AstKind::ForStmt
        | AstKind::WhileStmt => return None,
    };
    Some(symbol_kind)
}

fn usr_tag(kind: SymbolKind) -> &'static str {
    match kind {
        SymbolKind::Function => "F",
        SymbolKind::Variable => "V",
        SymbolKind::Field => "FI",
        SymbolKind::Record => "S",
        SymbolKind::Enumeration => "E",
        SymbolKind::Enumerator => "EC",
        SymbolKind::Namespace => "N",
        SymbolKind::Typedef => "T",
        SymbolKind::Macro => "macro",
    }
}

/// Which symbol kinds an identifier node of the given tree-sitter kind may refer to.
fn reference_accepts(node_kind: &str, kind: SymbolKind) -> bool {
    match node_kind {
        // members are named by plain identifiers inside method bodies
        "identifier" => matches!(
            kind,
            SymbolKind::Function | SymbolKind::Variable | SymbolKind::Enumerator | SymbolKind::Field
        ),
        "field_identifier" => matches!(kind, SymbolKind::Field | SymbolKind::Function),
        "type_identifier" => matches!(
            kind,
            SymbolKind::Record | SymbolKind::Enumeration | SymbolKind::Typedef
        ),
        "namespace_identifier" => matches!(kind, SymbolKind::Namespace | SymbolKind::Record),
        _ => false,
    }
}

/// All names a declaration introduces; `int a, b;` introduces two.
fn declared_names(node: Node, kind: AstKind) -> Vec<Node> {
    match kind {
        AstKind::VarDecl | AstKind::FieldDecl => {
            if let Some(name) = ast::function_pointer_statement(node) {
                return vec![name];
            }
            let mut cursor = node.walk();
            let names: Vec<Node> = node
                .children_by_field_name("declarator", &mut cursor)
                .filter_map(ast::declarator_identifier)
                .collect();
            names
        }
        _ => ast::name_node(node, kind).into_iter().collect(),
    }
}

/// The block a variable declaration belongs to, `None` at namespace or record scope.
fn block_scope(node: Node) -> Option<Node> {
    let mut current = node.parent();
    while let Some(parent) = current {
        match parent.kind() {
            "compound_statement" | "for_statement" | "if_statement" | "while_statement"
            | "switch_statement" => return Some(parent),
            "translation_unit" | "namespace_definition" | "declaration_list"
            | "field_declaration_list" => return None,
            _ => current = parent.parent(),
        }
    }
    None
}

/// The body a parameter is visible in, if it belongs to a definition or lambda.
fn parameter_scope(node: Node) -> Option<Node> {
    let mut current = node.parent();
    while let Some(parent) = current {
        match parent.kind() {
            "function_definition" | "lambda_expression" => return parent.child_by_field_name("body"),
            "declaration" | "field_declaration" | "type_definition" | "parameter_declaration"
            | "optional_parameter_declaration" => return None,
            _ => current = parent.parent(),
        }
    }
    None
}

/// `ns` in `ns::name`.
fn qualifier(node: Node, source: &str) -> Option<String> {
    let parent = node.parent()?;
    if parent.kind() != "qualified_identifier" {
        return None;
    }
    parent
        .child_by_field_name("scope")
        .map(|scope| text(scope, source).to_string())
}

/// Parameter type as written, without the parameter name.
fn parameter_type(parameter: Node, source: &str) -> String {
    let full = text(parameter, source);
    let name = parameter
        .child_by_field_name("declarator")
        .and_then(ast::declarator_identifier);
    let Some(name) = name else {
        return ast::squeeze(full);
    };
    let offset = parameter.start_byte();
    let start = name.start_byte() - offset;
    let end = name.end_byte() - offset;
    let mut without_name = String::with_capacity(full.len());
    without_name.push_str(&full[..start]);
    without_name.push_str(&full[end..]);
    ast::squeeze(&without_name)
}

/// Declaration text up to the end of the function declarator.
fn signature(node: Node, name: Node, source: &str) -> String {
    let mut end = name.end_byte();
    let mut current = Some(name);
    while let Some(n) = current {
        if n.kind() == "function_declarator" {
            end = n.end_byte();
            break;
        }
        if n == node {
            break;
        }
        current = n.parent();
    }
    ast::squeeze(source.get(node.start_byte()..end).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    fn collect(files: &[(&str, &str)]) -> (tempfile::TempDir, Arc<FilePathCache>, SymbolsCollector) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        let cache = Arc::new(FilePathCache::new(Arc::new(Database::open_in_memory().unwrap())));
        let main = cache.file_path_id(&dir.path().join(files[0].0)).unwrap();

        let mut collector = SymbolsCollector::new(Arc::clone(&cache)).unwrap();
        collector.set_file(main, Vec::new());
        collector.collect_symbols().unwrap();
        (dir, cache, collector)
    }

    fn positions(collector: &SymbolsCollector, name: &str) -> Vec<(u32, u32, SourceLocationKind)> {
        let mut found: Vec<_> = collector
            .source_locations()
            .iter()
            .filter(|l| collector.symbols()[&l.symbol].name == name)
            .map(|l| (l.line, l.column, l.kind))
            .collect();
        found.sort();
        found
    }

    #[test]
    fn test_function_declaration_definition_and_call() {
        let (_dir, _, collector) = collect(&[(
            "main.cpp",
            "void function();\nvoid function() {}\nint main() { function(); }",
        )]);

        assert_eq!(
            positions(&collector, "function"),
            vec![
                (1, 6, SourceLocationKind::Declaration),
                (2, 6, SourceLocationKind::Definition),
                (3, 14, SourceLocationKind::DeclarationReference),
            ]
        );
        let function = collector
            .symbols()
            .values()
            .find(|s| s.name == "function")
            .unwrap();
        assert_eq!(function.usr, "c:@F@function#");
        assert_eq!(function.signature.as_deref(), Some("void function()"));
    }

    #[test]
    fn test_locals_shadow_globals() {
        let (_dir, _, collector) = collect(&[(
            "main.cpp",
            "int value;\nint get(int value) { return value; }\nint other() { return value; }",
        )]);

        let symbols = collector.symbols();
        let usage_of = |line: u32, column: u32| {
            let location = collector
                .source_locations()
                .iter()
                .find(|l| l.line == line && l.column == column)
                .unwrap();
            symbols[&location.symbol].usr.clone()
        };
        assert!(usage_of(2, 29).starts_with("c:"));
        assert_ne!(usage_of(2, 29), "c:@V@value");
        assert_eq!(usage_of(3, 22), "c:@V@value");
    }

    #[test]
    fn test_macros_and_headers() {
        let (dir, cache, collector) = collect(&[
            ("main.cpp", "#include \"config.h\"\nint size = BUFFER_SIZE;\n"),
            ("config.h", "#define BUFFER_SIZE 64\n#ifdef DEBUG\n#endif\n"),
        ]);
        let header = cache.file_path_id(&dir.path().join("config.h")).unwrap();
        let main = cache.file_path_id(&dir.path().join("main.cpp")).unwrap();

        assert_eq!(
            positions(&collector, "BUFFER_SIZE"),
            vec![
                (1, 9, SourceLocationKind::MacroDefinition),
                (2, 12, SourceLocationKind::MacroUsage),
            ]
        );
        assert_eq!(collector.source_files(), &[main.min(header), main.max(header)]);
        assert_eq!(collector.source_dependencies(), &[SourceDependency::new(main, header)]);
        assert!(collector.used_macros().contains(&UsedMacro::new("DEBUG", header)));
        assert!(collector.used_macros().contains(&UsedMacro::new("BUFFER_SIZE", main)));
        assert_eq!(collector.file_statuses().len(), 2);
    }

    #[test]
    fn test_qualified_members_and_types() {
        let (_dir, _, collector) = collect(&[(
            "main.cpp",
            "namespace ns { struct Record { int field; void method(); }; }\nvoid ns::Record::method() { field = 1; }\nns::Record instance;\n",
        )]);

        let usrs: HashSet<&str> = collector.symbols().values().map(|s| s.usr.as_str()).collect();
        assert!(usrs.contains("c:@N@ns"));
        assert!(usrs.contains("c:@S@ns::Record"));
        assert!(usrs.contains("c:@FI@ns::Record::field"));
        assert!(usrs.contains("c:@F@ns::Record::method#"));
        assert_eq!(
            positions(&collector, "method"),
            vec![
                (1, 48, SourceLocationKind::Declaration),
                (2, 18, SourceLocationKind::Definition),
            ]
        );
        assert!(positions(&collector, "Record").contains(&(3, 5, SourceLocationKind::DeclarationReference)));
    }

    #[test]
    fn test_clear_resets_the_processor() {
        let (_dir, _, mut collector) = collect(&[("main.cpp", "int x;")]);
        assert!(!collector.symbols().is_empty());
        collector.clear();
        assert!(collector.symbols().is_empty());
        assert!(collector.source_locations().is_empty());
        assert!(collector.collect_symbols().is_err());
    }
}

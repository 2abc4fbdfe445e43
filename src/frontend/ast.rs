//! Classification of tree-sitter C++ nodes
//!
//! tree-sitter hands out untyped nodes; everything downstream works on `AstKind`, a closed set of
//! entity kinds. A new kind is added here and every exhaustive match that needs it fails to
//! compile until it is handled.

use tree_sitter::{Node, Point};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AstKind {
    FunctionDecl,
    VarDecl,
    ParmVarDecl,
    FieldDecl,
    RecordDecl,
    EnumDecl,
    EnumConstantDecl,
    NamespaceDecl,
    TypedefDecl,
    CallExpr,
    CompoundStmt,
    ReturnStmt,
    IfStmt,
    ForStmt,
    WhileStmt,
}

impl AstKind {
    pub fn classify(node: Node) -> Option<AstKind> {
        let kind = match node.kind() {
            "function_definition" => AstKind::FunctionDecl,
            "declaration" | "field_declaration" => {
                let mut cursor = node.walk();
                let declarators: Vec<Node> = node
                    .children_by_field_name("declarator", &mut cursor)
                    .collect();
                if declarators.is_empty() {
                    return None;
                }
                if declarators.iter().any(|d| function_declarator(*d).is_some()) {
                    AstKind::FunctionDecl
                } else if node.kind() == "declaration" {
                    AstKind::VarDecl
                } else {
                    AstKind::FieldDecl
                }
            }
            "parameter_declaration" | "optional_parameter_declaration" => AstKind::ParmVarDecl,
            "class_specifier" | "struct_specifier" | "union_specifier" => {
                if node.child_by_field_name("body").is_some() || is_forward_declaration(node) {
                    AstKind::RecordDecl
                } else {
                    return None;
                }
            }
            "enum_specifier" => {
                if node.child_by_field_name("body").is_some() || is_forward_declaration(node) {
                    AstKind::EnumDecl
                } else {
                    return None;
                }
            }
            "enumerator" => AstKind::EnumConstantDecl,
            "namespace_definition" => AstKind::NamespaceDecl,
            "type_definition" | "alias_declaration" => AstKind::TypedefDecl,
            "expression_statement" => {
                function_pointer_statement(node)?;
                AstKind::VarDecl
            }
            "call_expression" => {
                if is_part_of_function_pointer_statement(node) {
                    return None;
                }
                AstKind::CallExpr
            }
            "compound_statement" => AstKind::CompoundStmt,
            "return_statement" => AstKind::ReturnStmt,
            "if_statement" => AstKind::IfStmt,
            "for_statement" | "for_range_loop" => AstKind::ForStmt,
            "while_statement" => AstKind::WhileStmt,
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_declaration(self) -> bool {
        match self {
            AstKind::FunctionDecl
            | AstKind::VarDecl
            | AstKind::ParmVarDecl
            | AstKind::FieldDecl
            | AstKind::RecordDecl
            | AstKind::EnumDecl
            | AstKind::EnumConstantDecl
            | AstKind::NamespaceDecl
            | AstKind::TypedefDecl => true,
            AstKind::CallExpr
            | AstKind::CompoundStmt
            | AstKind::ReturnStmt
            | AstKind::IfStmt
            | AstKind::ForStmt
            | AstKind::WhileStmt => false,
        }
    }
}

/// `struct S;` as opposed to the type use in `struct S s;`.
fn is_forward_declaration(specifier: Node) -> bool {
    specifier.parent().is_some_and(|parent| {
        matches!(parent.kind(), "declaration" | "field_declaration")
            && parent.child_by_field_name("declarator").is_none()
    })
}

/// The variable name of `int (*fp)();` when tree-sitter reads the statement as a call of a call:
/// `(expression_statement (call_expression function: (call_expression function: (primitive_type)
/// arguments: (argument_list (pointer_expression argument: (identifier))))))`.
pub fn function_pointer_statement(node: Node) -> Option<Node> {
    if node.kind() != "expression_statement" {
        return None;
    }
    let call = node.named_child(0)?;
    if call.kind() != "call_expression" {
        return None;
    }
    let callee = call.child_by_field_name("function")?;
    if callee.kind() != "call_expression" {
        return None;
    }
    let return_type = callee.child_by_field_name("function")?;
    if !matches!(return_type.kind(), "primitive_type" | "type_identifier" | "sized_type_specifier") {
        return None;
    }
    let arguments = callee.child_by_field_name("arguments")?;
    if arguments.named_child_count() != 1 {
        return None;
    }
    let pointer = arguments.named_child(0)?;
    if pointer.kind() != "pointer_expression" {
        return None;
    }
    let name = pointer.child_by_field_name("argument")?;
    (name.kind() == "identifier").then_some(name)
}

/// Either call node of a statement `function_pointer_statement` accepts.
fn is_part_of_function_pointer_statement(call: Node) -> bool {
    let outer = match call.parent() {
        Some(parent) if parent.kind() == "call_expression" => parent,
        _ => call,
    };
    outer.parent().and_then(function_pointer_statement).is_some()
}

/// The function declarator reached from a declarator, if the declarator declares a function.
/// Function pointers (`int (*fp)()`) are variables and yield `None`.
pub fn function_declarator(declarator: Node) -> Option<Node> {
    match declarator.kind() {
        "function_declarator" => {
            let inner = declarator.child_by_field_name("declarator")?;
            if inner.kind() == "parenthesized_declarator" {
                None
            } else {
                Some(declarator)
            }
        }
        "pointer_declarator" | "reference_declarator" | "attributed_declarator" => {
            inner_declarator(declarator).and_then(function_declarator)
        }
        _ => None,
    }
}

fn inner_declarator(node: Node) -> Option<Node> {
    if let Some(inner) = node.child_by_field_name("declarator") {
        return Some(inner);
    }
    let count = node.named_child_count();
    if count == 0 {
        return None;
    }
    node.named_child(count - 1)
}

/// The identifier a declarator introduces. Qualified names yield their last component.
pub fn declarator_identifier(node: Node) -> Option<Node> {
    match node.kind() {
        "identifier" | "field_identifier" | "type_identifier" | "namespace_identifier"
        | "destructor_name" | "operator_name" => Some(node),
        "qualified_identifier" | "template_function" | "template_type" => {
            node.child_by_field_name("name").and_then(declarator_identifier)
        }
        "function_declarator" | "pointer_declarator" | "init_declarator" | "array_declarator"
        | "reference_declarator" | "parenthesized_declarator" | "attributed_declarator" => {
            inner_declarator(node).and_then(declarator_identifier)
        }
        _ => None,
    }
}

/// The node naming the entity `node` declares or, for calls, the callee name.
pub fn name_node(node: Node, kind: AstKind) -> Option<Node> {
    match kind {
        AstKind::FunctionDecl => {
            if node.kind() == "function_definition" {
                return node.child_by_field_name("declarator").and_then(declarator_identifier);
            }
            let mut cursor = node.walk();
            let declarators: Vec<Node> = node.children_by_field_name("declarator", &mut cursor).collect();
            declarators
                .into_iter()
                .find_map(function_declarator)
                .and_then(declarator_identifier)
        }
        AstKind::VarDecl | AstKind::FieldDecl | AstKind::ParmVarDecl => node
            .child_by_field_name("declarator")
            .and_then(declarator_identifier)
            .or_else(|| function_pointer_statement(node)),
        AstKind::TypedefDecl => node
            .child_by_field_name("name")
            .or_else(|| node.child_by_field_name("declarator"))
            .and_then(declarator_identifier),
        AstKind::RecordDecl
        | AstKind::EnumDecl
        | AstKind::EnumConstantDecl
        | AstKind::NamespaceDecl => node.child_by_field_name("name").and_then(declarator_identifier),
        AstKind::CallExpr => {
            let function = node.child_by_field_name("function")?;
            match function.kind() {
                "field_expression" => function.child_by_field_name("field"),
                _ => declarator_identifier(function),
            }
        }
        AstKind::CompoundStmt
        | AstKind::ReturnStmt
        | AstKind::IfStmt
        | AstKind::ForStmt
        | AstKind::WhileStmt => None,
    }
}

/// Whether a declaration also defines its entity.
pub fn is_definition(node: Node, kind: AstKind, source: &str) -> bool {
    match kind {
        AstKind::FunctionDecl => node.kind() == "function_definition",
        AstKind::VarDecl => !has_storage_class(node, "extern", source),
        AstKind::RecordDecl | AstKind::EnumDecl => node.child_by_field_name("body").is_some(),
        AstKind::ParmVarDecl
        | AstKind::FieldDecl
        | AstKind::EnumConstantDecl
        | AstKind::NamespaceDecl
        | AstKind::TypedefDecl => true,
        AstKind::CallExpr
        | AstKind::CompoundStmt
        | AstKind::ReturnStmt
        | AstKind::IfStmt
        | AstKind::ForStmt
        | AstKind::WhileStmt => false,
    }
}

fn has_storage_class(node: Node, class: &str, source: &str) -> bool {
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .any(|child| child.kind() == "storage_class_specifier" && text(child, source) == class);
    found
}

/// Parameters of a function declaration or definition.
pub fn parameters<'t>(node: Node<'t>, source: &str) -> Vec<Node<'t>> {
    let declarator = if node.kind() == "function_definition" {
        node.child_by_field_name("declarator").and_then(|d| {
            if d.kind() == "function_declarator" {
                Some(d)
            } else {
                function_declarator(d)
            }
        })
    } else {
        let mut cursor = node.walk();
        let declarators: Vec<Node> = node.children_by_field_name("declarator", &mut cursor).collect();
        declarators.into_iter().find_map(function_declarator)
    };

    let Some(list) = declarator.and_then(|d| d.child_by_field_name("parameters")) else {
        return Vec::new();
    };
    let mut cursor = list.walk();
    let params = list
        .named_children(&mut cursor)
        .filter(|p| matches!(p.kind(), "parameter_declaration" | "optional_parameter_declaration"))
        .filter(|p| {
            // `void f(void)` has no parameters
            p.child_by_field_name("declarator").is_some()
                || !p.child_by_field_name("type").is_some_and(|t| text(t, source) == "void")
        })
        .collect();
    params
}

/// Start and end of the source range reported for a match. The end is exclusive and a trailing
/// `;` is not part of the range.
pub fn match_range(node: Node) -> (Point, Point) {
    let start = node.start_position();
    let count = node.child_count();
    if count > 1 {
        if let (Some(last), Some(previous)) = (node.child(count - 1), node.child(count - 2)) {
            if last.kind() == ";" {
                return (start, previous.end_position());
            }
        }
    }
    (start, node.end_position())
}

/// Names of the enclosing namespaces and records, outermost first.
pub fn enclosing_scopes(node: Node, source: &str) -> Vec<String> {
    let mut scopes = Vec::new();
    let mut current = node.parent();
    while let Some(parent) = current {
        if matches!(
            parent.kind(),
            "namespace_definition" | "class_specifier" | "struct_specifier" | "union_specifier"
        ) {
            if let Some(name) = parent.child_by_field_name("name") {
                scopes.push(text(name, source).to_string());
            }
        }
        current = parent.parent();
    }
    scopes.reverse();
    scopes
}

/// Fully qualified name (`ns::Record::name`) of a declared entity.
pub fn qualified_name(node: Node, name: Node, source: &str) -> String {
    let mut parts = enclosing_scopes(node, source);
    let mut qualifiers = Vec::new();
    let mut current = name.parent();
    while let Some(parent) = current {
        if parent.kind() == "qualified_identifier" {
            if let Some(scope) = parent.child_by_field_name("scope") {
                qualifiers.push(text(scope, source).to_string());
            }
        } else {
            break;
        }
        current = parent.parent();
    }
    qualifiers.reverse();
    parts.extend(qualifiers);
    parts.push(text(name, source).to_string());
    parts.join("::")
}

pub fn text<'a>(node: Node, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or_default()
}

/// Collapse whitespace runs into single spaces.
pub fn squeeze(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Visit `root` and all its descendants in document order without recursion.
pub fn walk_preorder<'t>(root: Node<'t>, mut visit: impl FnMut(Node<'t>)) {
    let mut cursor = root.walk();
    loop {
        visit(cursor.node());
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return;
            }
        }
    }
}

//! Matcher tree and its evaluation over classified syntax nodes

use regex::Regex;
use tree_sitter::Node;

use crate::frontend::ast::{self, AstKind};

/// Node matchers by their query name.
pub fn node_matcher_kind(name: &str) -> Option<AstKind> {
    let kind = match name {
        "functionDecl" => AstKind::FunctionDecl,
        "varDecl" => AstKind::VarDecl,
        "parmVarDecl" => AstKind::ParmVarDecl,
        "fieldDecl" => AstKind::FieldDecl,
        "recordDecl" | "cxxRecordDecl" => AstKind::RecordDecl,
        "enumDecl" => AstKind::EnumDecl,
        "enumConstantDecl" => AstKind::EnumConstantDecl,
        "namespaceDecl" => AstKind::NamespaceDecl,
        "typedefDecl" => AstKind::TypedefDecl,
        "callExpr" => AstKind::CallExpr,
        "compoundStmt" => AstKind::CompoundStmt,
        "returnStmt" => AstKind::ReturnStmt,
        "ifStmt" => AstKind::IfStmt,
        "forStmt" => AstKind::ForStmt,
        "whileStmt" => AstKind::WhileStmt,
        _ => return None,
    };
    Some(kind)
}

#[derive(Debug, Clone)]
pub enum Matcher {
    /// `functionDecl(inner...)`; the inner matchers must all hold.
    Node { kind: AstKind, inner: Vec<Matcher> },
    HasName(String),
    MatchesName(Regex),
    IsDefinition,
    ParameterCountIs(usize),
    Has(Box<Matcher>),
    HasDescendant(Box<Matcher>),
    HasAncestor(Box<Matcher>),
    AllOf(Vec<Matcher>),
    AnyOf(Vec<Matcher>),
    Unless(Box<Matcher>),
}

impl Matcher {
    /// Whether the matcher holds for `node`. Nodes outside the indexed kinds never match.
    pub fn matches(&self, node: Node, source: &str) -> bool {
        let Some(kind) = AstKind::classify(node) else {
            return false;
        };
        self.matches_classified(node, kind, source)
    }

    fn matches_classified(&self, node: Node, kind: AstKind, source: &str) -> bool {
        match self {
            Matcher::Node { kind: expected, inner } => {
                *expected == kind && inner.iter().all(|m| m.matches_classified(node, kind, source))
            }
            Matcher::HasName(name) => qualified_name_of(node, kind, source).is_some_and(|qualified| {
                let wanted = name.trim_start_matches("::");
                qualified == wanted || qualified.ends_with(&format!("::{}", wanted))
            }),
            Matcher::MatchesName(regex) => qualified_name_of(node, kind, source)
                .is_some_and(|qualified| regex.is_match(&format!("::{}", qualified))),
            Matcher::IsDefinition => kind.is_declaration() && ast::is_definition(node, kind, source),
            Matcher::ParameterCountIs(count) => {
                kind == AstKind::FunctionDecl && ast::parameters(node, source).len() == *count
            }
            Matcher::Has(inner) => {
                classified_children(node).into_iter().any(|child| inner.matches(child, source))
            }
            Matcher::HasDescendant(inner) => {
                let mut found = false;
                let mut cursor = node.walk();
                let children: Vec<Node> = node.children(&mut cursor).collect();
                for child in children {
                    ast::walk_preorder(child, |descendant| {
                        if !found && inner.matches(descendant, source) {
                            found = true;
                        }
                    });
                    if found {
                        break;
                    }
                }
                found
            }
            Matcher::HasAncestor(inner) => {
                let mut current = node.parent();
                while let Some(parent) = current {
                    if inner.matches(parent, source) {
                        return true;
                    }
                    current = parent.parent();
                }
                false
            }
            Matcher::AllOf(all) => all.iter().all(|m| m.matches_classified(node, kind, source)),
            Matcher::AnyOf(any) => any.iter().any(|m| m.matches_classified(node, kind, source)),
            Matcher::Unless(inner) => !inner.matches_classified(node, kind, source),
        }
    }
}

fn qualified_name_of(node: Node, kind: AstKind, source: &str) -> Option<String> {
    if !kind.is_declaration() {
        return None;
    }
    let name = ast::name_node(node, kind)?;
    Some(ast::qualified_name(node, name, source))
}

/// The nearest classified nodes below `node`: unclassified syntax in between is looked through.
fn classified_children(node: Node) -> Vec<Node> {
    let mut found = Vec::new();
    let mut pending = {
        let mut cursor = node.walk();
        node.children(&mut cursor).collect::<Vec<_>>()
    };
    pending.reverse();
    while let Some(candidate) = pending.pop() {
        if AstKind::classify(candidate).is_some() {
            found.push(candidate);
            continue;
        }
        let mut cursor = candidate.walk();
        let mut children: Vec<Node> = candidate.children(&mut cursor).collect();
        children.reverse();
        pending.extend(children);
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::CppParser;

    fn count_matches(matcher: &Matcher, source: &str) -> usize {
        let mut parser = CppParser::new().unwrap();
        let tree = parser.parse(source).unwrap();
        let mut count = 0;
        ast::walk_preorder(tree.root_node(), |node| {
            if matcher.matches(node, source) {
                count += 1;
            }
        });
        count
    }

    fn function_decl(inner: Vec<Matcher>) -> Matcher {
        Matcher::Node {
            kind: AstKind::FunctionDecl,
            inner,
        }
    }

    #[test]
    fn test_has_name_accepts_qualified_suffix() {
        let source = "namespace ns { void f(); }\nvoid g();";
        assert_eq!(count_matches(&function_decl(vec![Matcher::HasName("f".into())]), source), 1);
        assert_eq!(count_matches(&function_decl(vec![Matcher::HasName("ns::f".into())]), source), 1);
        assert_eq!(count_matches(&function_decl(vec![Matcher::HasName("::g".into())]), source), 1);
        assert_eq!(count_matches(&function_decl(vec![Matcher::HasName("s::f".into())]), source), 0);
    }

    #[test]
    fn test_definition_and_parameter_count() {
        let source = "void f(int a);\nvoid f(int a) {}\nvoid g() {}";
        let definitions = function_decl(vec![Matcher::IsDefinition]);
        assert_eq!(count_matches(&definitions, source), 2);
        let one_parameter = function_decl(vec![Matcher::ParameterCountIs(1)]);
        assert_eq!(count_matches(&one_parameter, source), 2);
        let prototypes = function_decl(vec![Matcher::Unless(Box::new(Matcher::IsDefinition))]);
        assert_eq!(count_matches(&prototypes, source), 1);
    }

    #[test]
    fn test_traversal_matchers() {
        let source = "int g();\nint f() { if (1) { return g(); } return 0; }";
        let calls = Matcher::Node {
            kind: AstKind::CallExpr,
            inner: vec![],
        };
        let with_call = function_decl(vec![Matcher::HasDescendant(Box::new(calls.clone()))]);
        assert_eq!(count_matches(&with_call, source), 1);

        // the body is the only direct child with a kind
        let direct_if = function_decl(vec![Matcher::Has(Box::new(Matcher::Node {
            kind: AstKind::IfStmt,
            inner: vec![],
        }))]);
        assert_eq!(count_matches(&direct_if, source), 0);

        let call_in_if = Matcher::Node {
            kind: AstKind::CallExpr,
            inner: vec![Matcher::HasAncestor(Box::new(Matcher::Node {
                kind: AstKind::IfStmt,
                inner: vec![],
            }))],
        };
        assert_eq!(count_matches(&call_in_if, source), 1);
    }

    #[test]
    fn test_matches_name_sees_leading_scope() {
        let source = "namespace ns { int value; }\nint other;";
        let matcher = Matcher::Node {
            kind: AstKind::VarDecl,
            inner: vec![Matcher::MatchesName(Regex::new("^::ns::").unwrap())],
        };
        assert_eq!(count_matches(&matcher, source), 1);
    }

    #[test]
    fn test_any_of_combines_kinds() {
        let source = "struct S { int x; };\nenum E { A };";
        let matcher = Matcher::AnyOf(vec![
            Matcher::Node {
                kind: AstKind::RecordDecl,
                inner: vec![],
            },
            Matcher::Node {
                kind: AstKind::EnumDecl,
                inner: vec![],
            },
        ]);
        assert_eq!(count_matches(&matcher, source), 2);
    }
}

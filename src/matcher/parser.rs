//! Parser for clang-query style matcher expressions
//!
//! ```text
//! expression := IDENT '(' [ argument { ',' argument } ] ')' [ '.bind(' STRING ')' ]
//! argument   := STRING | UNSIGNED | expression
//! ```

use regex::Regex;

use super::diagnostics::{
    ContextType, DiagnosticContext, DiagnosticMessage, DynamicMatcherDiagnostic, ErrorType,
    QueryPosition, QueryRange,
};
use super::matchers::{Matcher, node_matcher_kind};

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Ident(String),
    Str(String),
    Unsigned(String),
    OpenParen,
    CloseParen,
    Comma,
    Period,
    Eof,
    /// Unterminated string literal.
    BadString(String),
    Invalid(String),
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    text: String,
    range: QueryRange,
}

struct Lexer<'q> {
    chars: std::iter::Peekable<std::str::Chars<'q>>,
    line: u32,
    column: u32,
}

impl<'q> Lexer<'q> {
    fn new(query: &'q str) -> Self {
        Self {
            chars: query.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn position(&self) -> QueryPosition {
        QueryPosition::new(self.line, self.column)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn take_while(&mut self, first: char, keep: impl Fn(char) -> bool) -> String {
        let mut text = String::from(first);
        while let Some(&c) = self.chars.peek() {
            if !keep(c) {
                break;
            }
            text.push(c);
            self.bump();
        }
        text
    }

    fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
                self.bump();
            }
            let start = self.position();
            let Some(c) = self.bump() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    text: String::new(),
                    range: QueryRange::new(start, start),
                });
                return tokens;
            };
            let kind = match c {
                '(' => TokenKind::OpenParen,
                ')' => TokenKind::CloseParen,
                ',' => TokenKind::Comma,
                '.' => TokenKind::Period,
                '"' | '\'' => self.string(c),
                c if c.is_ascii_digit() => {
                    TokenKind::Unsigned(self.take_while(c, |c| c.is_ascii_alphanumeric()))
                }
                c if c.is_alphabetic() || c == '_' => {
                    TokenKind::Ident(self.take_while(c, |c| c.is_alphanumeric() || c == '_'))
                }
                other => TokenKind::Invalid(other.to_string()),
            };
            let text = match &kind {
                TokenKind::Ident(t) | TokenKind::Unsigned(t) | TokenKind::Invalid(t) => t.clone(),
                TokenKind::Str(t) => format!("\"{}\"", t),
                TokenKind::BadString(t) => t.clone(),
                TokenKind::OpenParen => "(".to_string(),
                TokenKind::CloseParen => ")".to_string(),
                TokenKind::Comma => ",".to_string(),
                TokenKind::Period => ".".to_string(),
                TokenKind::Eof => String::new(),
            };
            tokens.push(Token {
                kind,
                text,
                range: QueryRange::new(start, self.position()),
            });
        }
    }

    fn string(&mut self, quote: char) -> TokenKind {
        let mut value = String::new();
        let mut raw = String::from(quote);
        while let Some(c) = self.bump() {
            raw.push(c);
            match c {
                '\\' => {
                    if let Some(escaped) = self.bump() {
                        raw.push(escaped);
                        value.push(escaped);
                    }
                }
                c if c == quote => return TokenKind::Str(value),
                c => value.push(c),
            }
        }
        TokenKind::BadString(raw)
    }
}

/// Argument value before it is checked against the matcher's signature.
enum Value {
    Str(String, QueryRange),
    Unsigned(usize, QueryRange),
    Matcher(Matcher, QueryRange),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Str(..) => "String",
            Value::Unsigned(..) => "unsigned",
            Value::Matcher(..) => "Matcher",
        }
    }

    fn range(&self) -> QueryRange {
        match self {
            Value::Str(_, range) | Value::Unsigned(_, range) | Value::Matcher(_, range) => *range,
        }
    }
}

enum Signature {
    /// Any number of matcher arguments.
    Variadic,
    /// Exactly one argument of the given type.
    Single(&'static str),
    Nullary,
}

fn signature(name: &str) -> Option<Signature> {
    if node_matcher_kind(name).is_some() {
        return Some(Signature::Variadic);
    }
    let signature = match name {
        "allOf" | "anyOf" => Signature::Variadic,
        "hasName" | "matchesName" => Signature::Single("String"),
        "parameterCountIs" => Signature::Single("unsigned"),
        "has" | "hasDescendant" | "hasAncestor" | "unless" => Signature::Single("Matcher"),
        "isDefinition" => Signature::Nullary,
        _ => return None,
    };
    Some(signature)
}

type ParseResult<T> = std::result::Result<T, DynamicMatcherDiagnostic>;

struct Parser {
    tokens: Vec<Token>,
    position: usize,
    contexts: Vec<DiagnosticContext>,
}

/// Parse a whole query. Errors carry the range in the query text and the chain of matchers
/// being built.
pub fn parse_matcher(query: &str) -> ParseResult<Matcher> {
    let mut parser = Parser {
        tokens: Lexer::new(query).tokenize(),
        position: 0,
        contexts: Vec::new(),
    };
    if parser.peek().kind == TokenKind::Eof {
        let token = parser.peek().clone();
        return Err(parser.error(&token, ErrorType::ParserNoCode, vec![]));
    }
    let value = parser.value()?;
    let trailing = parser.peek().clone();
    if trailing.kind != TokenKind::Eof {
        return Err(parser.error(&trailing, ErrorType::ParserTrailingCode, vec![]));
    }
    match value {
        Value::Matcher(matcher, _) => Ok(matcher),
        other => {
            let range = other.range();
            Err(DynamicMatcherDiagnostic::new(
                DiagnosticMessage {
                    range,
                    error_type: ErrorType::RegistryWrongArgType,
                    arguments: vec!["1".to_string(), "Matcher".to_string(), other.type_name().to_string()],
                },
                Vec::new(),
            ))
        }
    }
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.position.min(self.tokens.len() - 1)]
    }

    fn next(&mut self) -> Token {
        let token = self.peek().clone();
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
        token
    }

    fn error(&self, token: &Token, error_type: ErrorType, arguments: Vec<String>) -> DynamicMatcherDiagnostic {
        DynamicMatcherDiagnostic::new(
            DiagnosticMessage {
                range: token.range,
                error_type,
                arguments,
            },
            self.contexts.clone(),
        )
    }

    fn value(&mut self) -> ParseResult<Value> {
        let token = self.next();
        match &token.kind {
            TokenKind::Str(value) => Ok(Value::Str(value.clone(), token.range)),
            TokenKind::Unsigned(digits) => digits
                .parse::<usize>()
                .map(|n| Value::Unsigned(n, token.range))
                .map_err(|_| self.error(&token, ErrorType::ParserUnsignedError, vec![digits.clone()])),
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.matcher_expression(name, token)
            }
            TokenKind::BadString(raw) => {
                Err(self.error(&token, ErrorType::ParserStringError, vec![raw.clone()]))
            }
            TokenKind::Eof => Err(self.error(&token, ErrorType::ParserNoCode, vec![])),
            TokenKind::OpenParen
            | TokenKind::CloseParen
            | TokenKind::Comma
            | TokenKind::Period
            | TokenKind::Invalid(_) => {
                Err(self.error(&token, ErrorType::ParserInvalidToken, vec![token.text.clone()]))
            }
        }
    }

    fn matcher_expression(&mut self, name: String, name_token: Token) -> ParseResult<Value> {
        let open = self.next();
        if open.kind != TokenKind::OpenParen {
            return Err(self.error(&open, ErrorType::ParserNoOpenParen, vec![open.text.clone()]));
        }
        let Some(signature) = signature(&name) else {
            return Err(self.error(&name_token, ErrorType::RegistryMatcherNotFound, vec![name]));
        };

        self.contexts.push(DiagnosticContext {
            range: name_token.range,
            context_type: ContextType::MatcherConstruct,
            arguments: vec![name.clone()],
        });
        let (arguments, close) = self.arguments(&name)?;
        self.contexts.pop();

        let end = close.range.end;
        self.bind_suffix()?;

        let matcher = self.build(&name, &name_token, signature, arguments)?;
        Ok(Value::Matcher(matcher, QueryRange::new(name_token.range.start, end)))
    }

    /// Arguments up to and including the closing parenthesis, which is returned too.
    fn arguments(&mut self, name: &str) -> ParseResult<(Vec<Value>, Token)> {
        let mut arguments = Vec::new();
        if self.peek().kind == TokenKind::CloseParen {
            return Ok((arguments, self.next()));
        }
        loop {
            self.contexts.push(DiagnosticContext {
                range: self.peek().range,
                context_type: ContextType::MatcherArg,
                arguments: vec![(arguments.len() + 1).to_string(), name.to_string()],
            });
            let value = self.value()?;
            self.contexts.pop();
            arguments.push(value);

            let separator = self.next();
            match separator.kind {
                TokenKind::Comma => {}
                TokenKind::CloseParen => return Ok((arguments, separator)),
                TokenKind::Eof => {
                    return Err(self.error(&separator, ErrorType::ParserNoCloseParen, vec![]));
                }
                _ => {
                    return Err(self.error(
                        &separator,
                        ErrorType::ParserNoComma,
                        vec![separator.text.clone()],
                    ));
                }
            }
        }
    }

    fn bind_suffix(&mut self) -> ParseResult<()> {
        if self.peek().kind != TokenKind::Period {
            return Ok(());
        }
        let period = self.next();
        let bind = self.next();
        let open = self.next();
        let id = self.next();
        let close = self.next();
        let well_formed = matches!(&bind.kind, TokenKind::Ident(name) if name == "bind")
            && open.kind == TokenKind::OpenParen
            && matches!(id.kind, TokenKind::Str(_))
            && close.kind == TokenKind::CloseParen;
        if well_formed {
            Ok(())
        } else {
            Err(self.error(&period, ErrorType::ParserMalformedBindExpr, vec![]))
        }
    }

    fn build(
        &self,
        name: &str,
        name_token: &Token,
        signature: Signature,
        arguments: Vec<Value>,
    ) -> ParseResult<Matcher> {
        let construct = DiagnosticContext {
            range: name_token.range,
            context_type: ContextType::MatcherConstruct,
            arguments: vec![name.to_string()],
        };
        let fail = |range: QueryRange, error_type: ErrorType, arguments: Vec<String>| {
            let mut contexts = self.contexts.clone();
            contexts.push(construct.clone());
            DynamicMatcherDiagnostic::new(
                DiagnosticMessage {
                    range,
                    error_type,
                    arguments,
                },
                contexts,
            )
        };

        let expected_count = match signature {
            Signature::Variadic => None,
            Signature::Single(_) => Some(1),
            Signature::Nullary => Some(0),
        };
        if let Some(expected) = expected_count {
            if arguments.len() != expected {
                return Err(fail(
                    name_token.range,
                    ErrorType::RegistryWrongArgCount,
                    vec![expected.to_string(), arguments.len().to_string()],
                ));
            }
        }
        let wrong_type = |index: usize, expected: &str, value: &Value| {
            fail(
                value.range(),
                ErrorType::RegistryWrongArgType,
                vec![(index + 1).to_string(), expected.to_string(), value.type_name().to_string()],
            )
        };

        match signature {
            Signature::Variadic => {
                let mut matchers = Vec::with_capacity(arguments.len());
                for (index, value) in arguments.into_iter().enumerate() {
                    match value {
                        Value::Matcher(matcher, _) => matchers.push(matcher),
                        other => return Err(wrong_type(index, "Matcher", &other)),
                    }
                }
                if let Some(kind) = node_matcher_kind(name) {
                    return Ok(Matcher::Node { kind, inner: matchers });
                }
                if name == "anyOf" {
                    Ok(Matcher::AnyOf(matchers))
                } else {
                    Ok(Matcher::AllOf(matchers))
                }
            }
            Signature::Nullary => Ok(Matcher::IsDefinition),
            Signature::Single(expected) => {
                let Some(value) = arguments.into_iter().next() else {
                    return Err(fail(
                        name_token.range,
                        ErrorType::RegistryWrongArgCount,
                        vec!["1".to_string(), "0".to_string()],
                    ));
                };
                match (name, value) {
                    ("hasName", Value::Str(value, _)) => Ok(Matcher::HasName(value)),
                    ("matchesName", Value::Str(pattern, range)) => Regex::new(&pattern)
                        .map(Matcher::MatchesName)
                        .map_err(|e| fail(range, ErrorType::RegistryInvalidRegex, vec![pattern, e.to_string()])),
                    ("parameterCountIs", Value::Unsigned(count, _)) => Ok(Matcher::ParameterCountIs(count)),
                    ("has", Value::Matcher(inner, _)) => Ok(Matcher::Has(Box::new(inner))),
                    ("hasDescendant", Value::Matcher(inner, _)) => Ok(Matcher::HasDescendant(Box::new(inner))),
                    ("hasAncestor", Value::Matcher(inner, _)) => Ok(Matcher::HasAncestor(Box::new(inner))),
                    ("unless", Value::Matcher(inner, _)) => Ok(Matcher::Unless(Box::new(inner))),
                    (_, other) => Err(wrong_type(0, expected, &other)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::AstKind;

    fn error_of(query: &str) -> DynamicMatcherDiagnostic {
        match parse_matcher(query) {
            Ok(matcher) => panic!("{} parsed as {:?}", query, matcher),
            Err(diagnostic) => diagnostic,
        }
    }

    #[test]
    fn test_parse_nested_matchers() {
        let matcher =
            parse_matcher(r#"functionDecl(hasName("f"), unless(isDefinition()), parameterCountIs(2))"#)
                .unwrap();
        match matcher {
            Matcher::Node { kind, inner } => {
                assert_eq!(kind, AstKind::FunctionDecl);
                assert_eq!(inner.len(), 3);
                assert!(matches!(&inner[0], Matcher::HasName(name) if name == "f"));
                assert!(matches!(&inner[2], Matcher::ParameterCountIs(2)));
            }
            other => panic!("unexpected matcher {:?}", other),
        }
    }

    #[test]
    fn test_bind_is_accepted() {
        assert!(parse_matcher(r#"recordDecl(hasName("S")).bind("record")"#).is_ok());
        let diagnostic = error_of("recordDecl().bind(1)");
        assert_eq!(diagnostic.messages[0].error_type, ErrorType::ParserMalformedBindExpr);
    }

    #[test]
    fn test_unknown_matcher_is_reported_with_its_range() {
        let diagnostic = error_of("func()");
        let message = &diagnostic.messages[0];
        assert_eq!(message.error_type, ErrorType::RegistryMatcherNotFound);
        assert_eq!(message.arguments, vec!["func".to_string()]);
        assert_eq!(message.range.start, QueryPosition::new(1, 1));
        assert_eq!(message.range.end, QueryPosition::new(1, 5));
        assert!(diagnostic.contexts.is_empty());
    }

    #[test]
    fn test_nested_failure_carries_context_chain() {
        let diagnostic = error_of("functionDecl(\n  has(foo()))");
        assert_eq!(diagnostic.messages[0].error_type, ErrorType::RegistryMatcherNotFound);
        assert_eq!(diagnostic.messages[0].range.start, QueryPosition::new(2, 7));
        let kinds: Vec<(ContextType, Vec<String>)> = diagnostic
            .contexts
            .iter()
            .map(|c| (c.context_type, c.arguments.clone()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (ContextType::MatcherConstruct, vec!["functionDecl".to_string()]),
                (ContextType::MatcherArg, vec!["1".to_string(), "functionDecl".to_string()]),
                (ContextType::MatcherConstruct, vec!["has".to_string()]),
                (ContextType::MatcherArg, vec!["1".to_string(), "has".to_string()]),
            ]
        );
    }

    #[test]
    fn test_argument_errors() {
        assert_eq!(
            error_of("hasName(1)").messages[0].error_type,
            ErrorType::RegistryWrongArgType
        );
        assert_eq!(
            error_of("isDefinition(varDecl())").messages[0].arguments,
            vec!["0".to_string(), "1".to_string()]
        );
        assert_eq!(
            error_of(r#"matchesName("(")"#).messages[0].error_type,
            ErrorType::RegistryInvalidRegex
        );
        assert_eq!(error_of("varDecl(").messages[0].error_type, ErrorType::ParserNoCode);
        assert_eq!(
            error_of("varDecl(callExpr() callExpr())").messages[0].error_type,
            ErrorType::ParserNoComma
        );
        assert_eq!(error_of("varDecl() x").messages[0].error_type, ErrorType::ParserTrailingCode);
        assert_eq!(error_of(r#"hasName("f)"#).messages[0].error_type, ErrorType::ParserStringError);
        assert_eq!(error_of("").messages[0].error_type, ErrorType::ParserNoCode);
        assert_eq!(error_of("varDecl").messages[0].error_type, ErrorType::ParserNoOpenParen);
    }
}

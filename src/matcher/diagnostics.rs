//! Diagnostics for matcher expressions that fail to parse or build

use serde::Serialize;

/// Position in the query text, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
pub struct QueryPosition {
    pub line: u32,
    pub column: u32,
}

impl QueryPosition {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct QueryRange {
    pub start: QueryPosition,
    pub end: QueryPosition,
}

impl QueryRange {
    pub fn new(start: QueryPosition, end: QueryPosition) -> Self {
        Self { start, end }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorType {
    RegistryMatcherNotFound,
    RegistryWrongArgCount,
    RegistryWrongArgType,
    RegistryInvalidRegex,
    ParserStringError,
    ParserNoOpenParen,
    ParserNoCloseParen,
    ParserNoComma,
    ParserNoCode,
    ParserInvalidToken,
    ParserMalformedBindExpr,
    ParserTrailingCode,
    ParserUnsignedError,
    SourceUnavailable,
}

impl ErrorType {
    /// Message template; `$N` is replaced by the N-th argument.
    pub fn template(&self) -> &'static str {
        match self {
            ErrorType::RegistryMatcherNotFound => "Matcher not found: $0",
            ErrorType::RegistryWrongArgCount => {
                "Incorrect argument count. (Expected = $0) != (Actual = $1)"
            }
            ErrorType::RegistryWrongArgType => {
                "Incorrect type for arg $0. (Expected = $1) != (Actual = $2)"
            }
            ErrorType::RegistryInvalidRegex => "Invalid regular expression <$0>: $1",
            ErrorType::ParserStringError => "Error parsing string token: <$0>",
            ErrorType::ParserNoOpenParen => {
                "Error parsing matcher. Found token <$0> while looking for '('."
            }
            ErrorType::ParserNoCloseParen => {
                "Error parsing matcher. Found end-of-code while looking for ')'."
            }
            ErrorType::ParserNoComma => {
                "Error parsing matcher. Found token <$0> while looking for ','."
            }
            ErrorType::ParserNoCode => "End of code found while looking for token.",
            ErrorType::ParserInvalidToken => "Invalid token <$0> found when looking for a value.",
            ErrorType::ParserMalformedBindExpr => "Malformed bind() expression.",
            ErrorType::ParserTrailingCode => "Expected end of code.",
            ErrorType::ParserUnsignedError => "Error parsing unsigned token: <$0>",
            ErrorType::SourceUnavailable => "Cannot process source $0: $1",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContextType {
    MatcherConstruct,
    MatcherArg,
}

impl ContextType {
    pub fn template(&self) -> &'static str {
        match self {
            ContextType::MatcherConstruct => "Error building matcher $0.",
            ContextType::MatcherArg => "Error parsing argument $0 for matcher $1.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticMessage {
    pub range: QueryRange,
    pub error_type: ErrorType,
    pub arguments: Vec<String>,
}

impl DiagnosticMessage {
    pub fn text(&self) -> String {
        fill(self.error_type.template(), &self.arguments)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticContext {
    pub range: QueryRange,
    pub context_type: ContextType,
    pub arguments: Vec<String>,
}

impl DiagnosticContext {
    pub fn text(&self) -> String {
        fill(self.context_type.template(), &self.arguments)
    }
}

/// One failure with the chain of matchers being built when it happened, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DynamicMatcherDiagnostic {
    pub messages: Vec<DiagnosticMessage>,
    pub contexts: Vec<DiagnosticContext>,
}

impl DynamicMatcherDiagnostic {
    pub fn new(message: DiagnosticMessage, contexts: Vec<DiagnosticContext>) -> Self {
        Self {
            messages: vec![message],
            contexts,
        }
    }
}

impl std::fmt::Display for DynamicMatcherDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut lines = Vec::with_capacity(self.contexts.len() + self.messages.len());
        for context in &self.contexts {
            lines.push(format!(
                "{}:{}: {}",
                context.range.start.line,
                context.range.start.column,
                context.text()
            ));
        }
        for message in &self.messages {
            lines.push(format!(
                "{}:{}: {}",
                message.range.start.line,
                message.range.start.column,
                message.text()
            ));
        }
        write!(f, "{}", lines.join("\n"))
    }
}

fn fill(template: &str, arguments: &[String]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' {
            if let Some(index) = chars.peek().and_then(|d| d.to_digit(10)) {
                chars.next();
                out.push_str(arguments.get(index as usize).map(String::as_str).unwrap_or(""));
                continue;
            }
        }
        out.push(c);
    }
    out
}

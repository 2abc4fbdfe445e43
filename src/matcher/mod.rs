//! Structural matching
//!
//! Queries are written in the clang-query style, `functionDecl(hasName("f"), isDefinition())`,
//! parsed into a `Matcher` tree and evaluated over the classified nodes of every non-system file
//! of a translation unit. Parse failures are returned as `DynamicMatcherDiagnostic`s that carry
//! the offending range of the query text and the chain of matchers being built.

pub mod diagnostics;
pub mod matchers;
pub mod parser;
pub mod processor;

pub use diagnostics::{
    ContextType, DiagnosticContext, DiagnosticMessage, DynamicMatcherDiagnostic, ErrorType,
    QueryPosition, QueryRange,
};
pub use matchers::Matcher;
pub use parser::parse_matcher;
pub use processor::{QueryProcessor, SourceRangeWithText, SourceRangesAndDiagnostics, SourceRangesContainer};

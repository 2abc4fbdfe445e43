pub mod symbol_query;

pub use symbol_query::{SourceLocation, SourceUsage, SymbolQuery};

//! Runs a matcher over one translation unit

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::diagnostics::{DiagnosticMessage, DynamicMatcherDiagnostic, ErrorType, QueryRange};
use super::parser::parse_matcher;
use super::Matcher;
use crate::Result;
use crate::frontend::ast::{match_range, walk_preorder};
use crate::frontend::{CommandLine, CppParser, IncludeOrigin, ParsedFile, SourceReader, TranslationUnit};
use crate::scheduler::Processor;
use crate::source::{FileContainer, FilePathId};
use crate::storage::FilePathCache;
use crate::storage::file_paths::normalize_path;

/// A matched range. Lines and columns are 1-based, the end column is one past the last
/// character and offsets are byte offsets. `text` holds the full lines the range spans.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SourceRangeWithText {
    pub file_path_id: FilePathId,
    pub start_line: u32,
    pub start_column: u32,
    pub start_offset: u32,
    pub end_line: u32,
    pub end_column: u32,
    pub end_offset: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SourceRangesContainer {
    pub file_paths: BTreeMap<FilePathId, PathBuf>,
    pub source_ranges: Vec<SourceRangeWithText>,
}

impl SourceRangesContainer {
    pub fn is_empty(&self) -> bool {
        self.source_ranges.is_empty()
    }
}

/// What a query yields for one source.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SourceRangesAndDiagnostics {
    pub source_ranges: SourceRangesContainer,
    pub diagnostics: Vec<DynamicMatcherDiagnostic>,
}

/// Reusable query worker: a parser plus the generated file overlays it was primed with.
pub struct QueryProcessor {
    parser: CppParser,
    file_paths: Arc<FilePathCache>,
    reader: SourceReader,
}

impl QueryProcessor {
    pub fn new(file_paths: Arc<FilePathCache>) -> Result<Self> {
        Ok(Self {
            parser: CppParser::new()?,
            file_paths,
            reader: SourceReader::default(),
        })
    }

    /// Match `query` against `source` and everything it includes outside system paths.
    /// `source.content` overrides the file on disk unless it is empty. `unsaved` overrides other
    /// files. Failures become diagnostics, never errors.
    pub fn find_locations(
        &mut self,
        query: &str,
        source: &FileContainer,
        unsaved: &[FileContainer],
    ) -> SourceRangesAndDiagnostics {
        let matcher = match parse_matcher(query) {
            Ok(matcher) => matcher,
            Err(diagnostic) => {
                debug!("Query {:?} does not parse: {}", query, diagnostic);
                return SourceRangesAndDiagnostics {
                    source_ranges: SourceRangesContainer::default(),
                    diagnostics: vec![diagnostic],
                };
            }
        };
        self.run(&matcher, source, unsaved)
    }

    /// Match an already parsed matcher.
    pub fn run(
        &mut self,
        matcher: &Matcher,
        source: &FileContainer,
        unsaved: &[FileContainer],
    ) -> SourceRangesAndDiagnostics {
        match self.collect_ranges(matcher, source, unsaved) {
            Ok(source_ranges) => SourceRangesAndDiagnostics {
                source_ranges,
                diagnostics: Vec::new(),
            },
            Err(e) => {
                debug!("Query over {} failed: {}", source.file_path.display(), e);
                SourceRangesAndDiagnostics {
                    source_ranges: SourceRangesContainer::default(),
                    diagnostics: vec![DynamicMatcherDiagnostic::new(
                        DiagnosticMessage {
                            range: QueryRange::default(),
                            error_type: ErrorType::SourceUnavailable,
                            arguments: vec![source.file_path.display().to_string(), e.to_string()],
                        },
                        Vec::new(),
                    )],
                }
            }
        }
    }

    fn collect_ranges(
        &mut self,
        matcher: &Matcher,
        source: &FileContainer,
        unsaved: &[FileContainer],
    ) -> Result<SourceRangesContainer> {
        let main = normalize_path(&source.file_path)?;
        let mut reader = self.reader.clone();
        reader.add_unsaved_files(unsaved);
        if !source.content.is_empty() {
            reader.add_unsaved_files(&[FileContainer::new(&main, source.content.clone())]);
        }
        let command_line = CommandLine::parse(&source.command_line_arguments);
        let unit = TranslationUnit::parse(&mut self.parser, &self.file_paths, &reader, &main, &command_line)?;

        let mut container = SourceRangesContainer::default();
        for file in unit.files.iter().filter(|f| f.origin != IncludeOrigin::System) {
            let before = container.source_ranges.len();
            collect_file(matcher, file, &mut container.source_ranges);
            if container.source_ranges.len() > before {
                container.file_paths.insert(file.id, file.path.clone());
            }
        }
        Ok(container)
    }
}

fn collect_file(matcher: &Matcher, file: &ParsedFile, ranges: &mut Vec<SourceRangeWithText>) {
    walk_preorder(file.tree.root_node(), |node| {
        if !matcher.matches(node, &file.text) {
            return;
        }
        let (start, end) = match_range(node);
        let start_offset = node.start_byte();
        let end_offset = end_offset_of(&file.text, end.row, end.column).unwrap_or(node.end_byte());
        ranges.push(SourceRangeWithText {
            file_path_id: file.id,
            start_line: start.row as u32 + 1,
            start_column: start.column as u32 + 1,
            start_offset: start_offset as u32,
            end_line: end.row as u32 + 1,
            end_column: end.column as u32 + 1,
            end_offset: end_offset as u32,
            text: spanned_lines(&file.text, start_offset, end_offset).to_string(),
        });
    });
}

fn end_offset_of(text: &str, row: usize, column: usize) -> Option<usize> {
    let line_start = if row == 0 {
        0
    } else {
        text.match_indices('\n').nth(row - 1).map(|(i, _)| i + 1)?
    };
    Some(line_start + column)
}

/// The full lines containing `start..end`.
fn spanned_lines(text: &str, start: usize, end: usize) -> &str {
    let start = start.min(text.len());
    let end = end.clamp(start, text.len());
    let first = text[..start].rfind('\n').map_or(0, |i| i + 1);
    let last = text[end..].find('\n').map_or(text.len(), |i| end + i);
    &text[first..last]
}

impl Processor for QueryProcessor {
    fn set_unsaved_files(&mut self, files: &[FileContainer]) {
        self.reader.set_unsaved_files(files);
    }

    fn clear(&mut self) {
        self.reader.clear();
    }
}

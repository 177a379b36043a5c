//! Text documents and position conversion.
//!
//! Provides efficient byte offset <-> LSP position conversion with proper UTF-16 handling.

use tower_lsp::lsp_types::{Position, Range, Url};

use super::Span;

/// Pre-computed line index for efficient position lookups.
///
/// LSP positions use line/column where column is in UTF-16 code units.
/// This struct pre-computes line start offsets for O(log n) lookup.
#[derive(Debug, Clone)]
pub struct LineIndex {
    /// Byte offset where each line starts.
    line_starts: Vec<usize>,
    /// Source text (needed for UTF-16 column calculation).
    source: String,
}

impl LineIndex {
    /// Build a line index from source text.
    pub fn new(source: String) -> Self {
        let mut line_starts = vec![0];

        for (i, c) in source.char_indices() {
            if c == '\n' {
                line_starts.push(i + 1);
            }
        }

        Self {
            line_starts,
            source,
        }
    }

    /// Get the source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Length of the source text in bytes.
    pub fn len(&self) -> usize {
        self.source.len()
    }

    /// Whether the source text is empty.
    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    /// Number of lines, counting a trailing empty line after a final newline.
    pub fn line_count(&self) -> u32 {
        self.line_starts.len() as u32
    }

    /// Convert a byte offset to an LSP position.
    ///
    /// Offsets past the end of the text are clamped to the end.
    pub fn offset_to_position(&self, offset: usize) -> Position {
        let offset = offset.min(self.source.len());
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(line) => line.saturating_sub(1),
        };

        let line_start = self.line_starts[line];
        let line_end = self
            .line_starts
            .get(line + 1)
            .copied()
            .unwrap_or(self.source.len());

        let mut col = 0u32;
        let line_slice = &self.source[line_start..line_end];

        for (i, c) in line_slice.char_indices() {
            if line_start + i >= offset {
                break;
            }
            col += c.len_utf16() as u32;
        }

        Position::new(line as u32, col)
    }

    /// Convert an LSP position to a byte offset.
    ///
    /// Returns None if the line is out of bounds; columns past the end of a
    /// line clamp to the line end.
    pub fn position_to_offset(&self, position: Position) -> Option<usize> {
        let line = position.line as usize;

        if line >= self.line_starts.len() {
            return None;
        }

        let line_start = self.line_starts[line];
        let line_end = self
            .line_starts
            .get(line + 1)
            .map(|&end| end.saturating_sub(1))
            .unwrap_or(self.source.len());

        let line_slice = &self.source[line_start..line_end];

        let mut utf16_col = 0u32;
        for (i, c) in line_slice.char_indices() {
            if utf16_col >= position.character {
                return Some(line_start + i);
            }
            utf16_col += c.len_utf16() as u32;
        }

        Some(line_end.min(self.source.len()))
    }

    /// Convert a byte span to an LSP range.
    pub fn span_to_range(&self, span: &Span) -> Range {
        let start = self.offset_to_position(span.start);
        let end = self.offset_to_position(span.end);
        Range::new(start, end)
    }

    /// Convert an LSP range to a byte span.
    ///
    /// Returns None if either end is out of bounds or the range is inverted.
    pub fn range_to_span(&self, range: Range) -> Option<Span> {
        let start = self.position_to_offset(range.start)?;
        let end = self.position_to_offset(range.end)?;
        (start <= end).then_some(start..end)
    }

    /// The range covering the whole text.
    pub fn full_range(&self) -> Range {
        self.span_to_range(&(0..self.source.len()))
    }
}

/// One version of a document's text, host or embedded.
///
/// Immutable: a content change produces a new `TextDocument`.
#[derive(Debug, Clone)]
pub struct TextDocument {
    uri: Url,
    language_id: String,
    version: i32,
    line_index: LineIndex,
}

impl TextDocument {
    pub fn new(
        uri: Url,
        language_id: impl Into<String>,
        version: i32,
        text: impl Into<String>,
    ) -> Self {
        Self {
            uri,
            language_id: language_id.into(),
            version,
            line_index: LineIndex::new(text.into()),
        }
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn text(&self) -> &str {
        self.line_index.source()
    }

    pub fn line_index(&self) -> &LineIndex {
        &self.line_index
    }

    /// Convert a byte offset to a position in this document.
    pub fn position_at(&self, offset: usize) -> Position {
        self.line_index.offset_to_position(offset)
    }

    /// Convert a position in this document to a byte offset.
    pub fn offset_at(&self, position: Position) -> Option<usize> {
        self.line_index.position_to_offset(position)
    }
}

//! Core data models for the ingestion side of the pipeline.
//!
//! A [`TextChunk`] is the unit the extraction prompt is assembled from.
//! Its [`LineSpan`] is what evidence citations point back to, so the
//! span arithmetic here has to stay exact.

use serde::{Deserialize, Serialize};

/// An inclusive, 1-indexed range of input lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSpan {
    pub start_line: usize,
    pub end_line: usize,
}

impl LineSpan {
    pub fn new(start_line: usize, end_line: usize) -> Self {
        Self {
            start_line,
            end_line,
        }
    }

    /// Render the canonical evidence citation, e.g. `chapter1.txt:L71-L100`.
    pub fn reference(&self, filename: &str) -> String {
        format!("{}:L{}-L{}", filename, self.start_line, self.end_line)
    }

    /// Number of lines covered by this span.
    pub fn line_count(&self) -> usize {
        (self.end_line + 1).saturating_sub(self.start_line)
    }
}

/// A line-addressed slice of the input text.
///
/// `text` is the exact concatenation of the covered lines, terminators
/// included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Sequential label, `chunk_001`, `chunk_002`, ...
    pub id: String,
    pub span: LineSpan,
    pub text: String,
}

//! Overlapping line-window chunker.
//!
//! Splits input lines into [`TextChunk`]s of at most `max_lines` lines,
//! with consecutive windows sharing `overlap` lines. Line numbers are
//! preserved exactly so that evidence citations produced by the model
//! (`file:Lx-Ly`) resolve back to the source text.
//!
//! # Algorithm
//!
//! 1. `step = max(1, max_lines - min(overlap, max_lines))`.
//! 2. Emit a window `[start, min(n, start + max_lines))` and advance
//!    `start` by `step` until `start >= n`.
//! 3. The final window always ends at line `n`; empty input yields no chunks.
//!
//! # Example
//!
//! ```rust
//! use canon_harness::chunk::chunk_lines;
//!
//! let lines: Vec<String> = (1..=100).map(|i| format!("line {}\n", i)).collect();
//! let chunks = chunk_lines(&lines, 80, 10).unwrap();
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[1].span.start_line, 71);
//! assert_eq!(chunks[1].span.end_line, 100);
//! ```

use anyhow::Result;

use crate::error::IngestError;
use crate::models::{LineSpan, TextChunk};

/// Window advance for the given parameters. Always at least 1.
pub fn step_for(max_lines: usize, overlap: usize) -> usize {
    max_lines.saturating_sub(overlap.min(max_lines)).max(1)
}

/// Split lines (terminators included) into overlapping, line-numbered chunks.
///
/// # Errors
///
/// Returns [`IngestError::InvalidArgument`] when `max_lines == 0`.
pub fn chunk_lines<S: AsRef<str>>(
    lines: &[S],
    max_lines: usize,
    overlap: usize,
) -> Result<Vec<TextChunk>> {
    if max_lines == 0 {
        return Err(IngestError::InvalidArgument("max_lines must be > 0".to_string()).into());
    }

    let n = lines.len();
    let step = step_for(max_lines, overlap);
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < n {
        let end = n.min(start + max_lines);
        let text: String = lines[start..end].iter().map(|l| l.as_ref()).collect();
        chunks.push(TextChunk {
            id: format!("chunk_{:03}", chunks.len() + 1),
            span: LineSpan::new(start + 1, end),
            text,
        });
        start += step;
    }

    Ok(chunks)
}

/// Split raw text into lines, keeping each line's terminator.
///
/// `\r\n`, `\n`, and a lone `\r` each end a line, so old-Mac input is
/// numbered the same way as Unix or Windows input.
pub fn split_lines_keep_ends(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let end = match bytes[i] {
            b'\n' => i + 1,
            b'\r' if bytes.get(i + 1) == Some(&b'\n') => i + 2,
            b'\r' => i + 1,
            _ => {
                i += 1;
                continue;
            }
        };
        lines.push(&text[start..end]);
        start = end;
        i = end;
    }
    if start < text.len() {
        lines.push(&text[start..]);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("line {}\n", i)).collect()
    }

    #[test]
    fn test_empty_input_no_chunks() {
        let lines: Vec<String> = Vec::new();
        let chunks = chunk_lines(&lines, 80, 10).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_hundred_lines_two_chunks() {
        let chunks = chunk_lines(&numbered(100), 80, 10).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].span, LineSpan::new(1, 80));
        assert_eq!(chunks[1].span, LineSpan::new(71, 100));
        assert_eq!(chunks[0].id, "chunk_001");
        assert_eq!(chunks[1].id, "chunk_002");
    }

    #[test]
    fn test_text_is_exact_slice() {
        let lines = numbered(5);
        let chunks = chunk_lines(&lines, 2, 0).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "line 1\nline 2\n");
        assert_eq!(chunks[2].text, "line 5\n");
        assert_eq!(chunks[2].span, LineSpan::new(5, 5));
    }

    #[test]
    fn test_coverage_contiguous_and_total() {
        for n in 1..60 {
            for m in 1..12 {
                for o in 0..m {
                    let chunks = chunk_lines(&numbered(n), m, o).unwrap();
                    let step = m - o;
                    assert_eq!(chunks.len(), n.div_ceil(step), "n={} m={} o={}", n, m, o);
                    assert_eq!(chunks[0].span.start_line, 1);
                    assert_eq!(chunks.last().unwrap().span.end_line, n);
                    for c in &chunks {
                        assert!(c.span.line_count() <= m);
                        assert_eq!(split_lines_keep_ends(&c.text).len(), c.span.line_count());
                    }
                    for pair in chunks.windows(2) {
                        assert_eq!(pair[1].span.start_line, pair[0].span.start_line + step);
                        // no gap between consecutive windows
                        assert!(pair[1].span.start_line <= pair[0].span.end_line + 1);
                    }
                }
            }
        }
    }

    #[test]
    fn test_overlap_not_less_than_max_still_progresses() {
        let chunks = chunk_lines(&numbered(4), 2, 5).unwrap();
        assert_eq!(step_for(2, 5), 1);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[3].span, LineSpan::new(4, 4));
    }

    #[test]
    fn test_zero_max_lines_rejected() {
        let err = chunk_lines(&numbered(3), 0, 0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_deterministic() {
        let lines = numbered(37);
        let c1 = chunk_lines(&lines, 9, 3).unwrap();
        let c2 = chunk_lines(&lines, 9, 3).unwrap();
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_split_lines_keep_ends() {
        let lines = split_lines_keep_ends("a\nb\r\nc");
        assert_eq!(lines, vec!["a\n", "b\r\n", "c"]);
        assert!(split_lines_keep_ends("").is_empty());
    }

    #[test]
    fn test_split_lines_lone_carriage_return() {
        let lines = split_lines_keep_ends("one\rtwo\r\rthree\r\nfour\r");
        assert_eq!(lines, vec!["one\r", "two\r", "\r", "three\r\n", "four\r"]);

        let chunks = chunk_lines(&lines, 2, 0).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].span, LineSpan::new(5, 5));
        assert_eq!(chunks[2].span.reference("old.txt"), "old.txt:L5-L5");
    }
}

#![forbid(unsafe_code)]

use crate::Span;

/// Byte-offset to 1-based line/column lookup table.
///
/// Columns count characters, reset to 1 after every line feed.
#[derive(Clone, Debug)]
pub struct LineMap {
    line_starts: Vec<usize>,
    len: usize,
}

impl LineMap {
    pub fn new(src: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in src.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self {
            line_starts,
            len: src.len(),
        }
    }

    /// 1-based `(line, column)` for a byte offset. Offsets past the end clamp
    /// to the final position.
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.len);
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        (line_idx + 1, offset - self.line_starts[line_idx] + 1)
    }

    pub fn line_col_of(&self, span: Span) -> (usize, usize) {
        self.line_col(span.offset())
    }

    pub fn source_len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_reset_after_line_feed() {
        let map = LineMap::new("ab\ncd\n\nx");
        assert_eq!(map.line_col(0), (1, 1));
        assert_eq!(map.line_col(1), (1, 2));
        assert_eq!(map.line_col(3), (2, 1));
        assert_eq!(map.line_col(6), (3, 1));
        assert_eq!(map.line_col(7), (4, 1));
    }

    #[test]
    fn offsets_clamp_to_source_end() {
        let map = LineMap::new("ab");
        assert_eq!(map.line_col(99), (1, 3));
    }
}

use serde::{Deserialize, Serialize};

/// A 1-based line/column position in olive source text.
///
/// The front end attaches one of these to every AST node. The compiler never
/// sees byte offsets; when diagnostics are rendered against source text, the
/// position is mapped back to an offset with [`LineIndex`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
}

impl Pos {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl std::fmt::Display for Pos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Pre-computed index of line start positions.
///
/// Constructed once per source file, then used to convert between byte
/// offsets and (line, column) pairs via binary search.
#[derive(Debug)]
pub struct LineIndex {
    /// Byte offset of the start of each line. The first entry is always 0.
    line_starts: Vec<u32>,
    len: u32,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0u32];
        for (i, byte) in source.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push((i + 1) as u32);
            }
        }
        Self {
            line_starts,
            len: source.len() as u32,
        }
    }

    /// Convert a byte offset to a position.
    pub fn pos(&self, offset: u32) -> Pos {
        // partition_point returns the first line starting after the offset,
        // so the containing line is the one before it.
        let line_idx = self
            .line_starts
            .partition_point(|&start| start <= offset)
            .saturating_sub(1);
        Pos {
            line: line_idx as u32 + 1,
            column: offset - self.line_starts[line_idx] + 1,
        }
    }

    /// Convert a position back to a byte offset, clamped to the source.
    pub fn offset(&self, pos: Pos) -> u32 {
        let line_idx = (pos.line.max(1) - 1) as usize;
        match self.line_starts.get(line_idx) {
            Some(start) => (start + pos.column.max(1) - 1).min(self.len),
            None => self.len,
        }
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }
}

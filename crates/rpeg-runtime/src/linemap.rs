/// Index of a code point in a parser buffer.
pub type Offset = u32;

/// Use this for human output text spans.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct CodePointPos {
    /// zero-based line index
    pub line: u32,
    /// zero-based column offset relative to the start of the line, in unicode code points
    pub character: u32,
}

impl std::fmt::Display for CodePointPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line + 1, self.character + 1)
    }
}

/// Start offsets of every line in a code point buffer.
pub struct LineMap {
    lines: Vec<Offset>,
}

impl LineMap {
    pub fn new(buffer: &[u32]) -> LineMap {
        assert!(buffer.len() <= Offset::MAX as usize);
        let mut lines = vec![0];

        let mut chars = buffer.iter().copied().enumerate().peekable();
        // we recognize \r\n  \n  \r as newlines
        while let Some((mut i, c)) = chars.next() {
            if c == '\r' as u32 {
                if let Some(&(next, c)) = chars.peek() {
                    if c == '\n' as u32 {
                        chars.next();
                        i = next;
                    }
                }
            } else if c != '\n' as u32 {
                continue;
            }
            lines.push(i as Offset + 1);
        }

        LineMap { lines }
    }
    pub fn from_text(src: &str) -> LineMap {
        let buffer = src.chars().map(u32::from).collect::<Vec<_>>();
        Self::new(&buffer)
    }
    pub fn line_count(&self) -> u32 {
        self.lines.len() as u32
    }
    /// Returns the zero-based line and column of `offset`.
    pub fn position(&self, offset: Offset) -> CodePointPos {
        let index = self.lines.binary_search(&offset);
        let line = match index {
            Ok(a) => a,
            Err(a) => a - 1,
        };
        let line_start = self.lines[line];
        debug_assert!(line_start <= offset);

        CodePointPos {
            line: line as u32,
            character: offset - line_start,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions() {
        let map = LineMap::from_text("ab\ncd\r\nef\rg");
        assert_eq!(map.line_count(), 4);
        assert_eq!(map.position(0), CodePointPos { line: 0, character: 0 });
        assert_eq!(map.position(2), CodePointPos { line: 0, character: 2 });
        assert_eq!(map.position(3), CodePointPos { line: 1, character: 0 });
        assert_eq!(map.position(7), CodePointPos { line: 2, character: 0 });
        assert_eq!(map.position(10), CodePointPos { line: 3, character: 0 });
    }

    #[test]
    fn test_unicode_columns() {
        let map = LineMap::from_text("žluť\nkůň");
        assert_eq!(map.position(3), CodePointPos { line: 0, character: 3 });
        assert_eq!(map.position(7).to_string(), "2:3");
    }
}

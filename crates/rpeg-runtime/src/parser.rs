use std::collections::HashMap;

use crate::{
    linemap::{CodePointPos, LineMap},
    tokens::{build_tree, write_tree, Token, Tokens, TreeNode},
    END_SYMBOL,
};

/// Everything a failed attempt has to roll back.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Checkpoint {
    position: u32,
    token_index: u32,
    depth: u32,
}

impl Checkpoint {
    pub fn position(self) -> u32 {
        self.position
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ParserOptions {
    /// Cache rule outcomes by `(rule, position)`.
    pub memoize: bool,
    /// Initial token capacity, grows on demand.
    pub capacity: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            memoize: false,
            capacity: 1024,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error(
    "parse error near {} (line {} symbol {} - line {} symbol {}): {:?}",
    .rule.as_deref().unwrap_or("<start>"),
    .begin.line + 1,
    .begin.character + 1,
    .end.line + 1,
    .end.character + 1,
    .text
)]
pub struct ParseError {
    /// The failed rule that read furthest into the input.
    pub rule: Option<String>,
    pub begin: CodePointPos,
    pub end: CodePointPos,
    pub text: String,
}

#[derive(Clone, Copy)]
struct Failure {
    rule: u32,
    begin: u32,
    end: u32,
}

struct MemoEntry {
    matched: bool,
    end: u32,
    /// depths are relative to the memoized rule
    tokens: Vec<Token>,
}

/// Signature of a generated rule matcher over user state `S`.
pub type Matcher<S> = fn(&mut Parser, &mut S) -> bool;

pub struct Parser {
    buffer: Vec<u32>,
    position: u32,
    depth: u32,

    tokens: Tokens,
    token_index: u32,

    furthest: u32,
    failure: Option<Failure>,

    memoize: bool,
    memo: HashMap<(u32, u32), MemoEntry>,

    /// Text of the last capture.
    pub text: String,
}

impl Parser {
    pub fn new(input: &str, options: ParserOptions) -> Parser {
        let buffer = input
            .chars()
            .map(u32::from)
            .chain(std::iter::once(END_SYMBOL))
            .collect::<Vec<_>>();
        assert!(buffer.len() < u32::MAX as usize, "Input is too large");

        Parser {
            buffer,
            position: 0,
            depth: 0,
            tokens: Tokens::with_capacity(options.capacity),
            token_index: 0,
            furthest: 0,
            failure: None,
            memoize: options.memoize,
            memo: HashMap::new(),
            text: String::new(),
        }
    }

    pub fn reset(&mut self) {
        self.position = 0;
        self.depth = 0;
        self.token_index = 0;
        self.furthest = 0;
        self.failure = None;
        self.memo.clear();
        self.text.clear();
    }

    /// The input without the end symbol.
    pub fn buffer(&self) -> &[u32] {
        &self.buffer[..self.buffer.len() - 1]
    }
    pub fn position(&self) -> u32 {
        self.position
    }
    pub fn is_eof(&self) -> bool {
        self.position as usize + 1 >= self.buffer.len()
    }

    #[inline]
    pub fn peek(&mut self) -> u32 {
        self.furthest = self.furthest.max(self.position);
        self.buffer
            .get(self.position as usize)
            .copied()
            .unwrap_or(END_SYMBOL)
    }
    #[inline]
    pub fn advance(&mut self) {
        debug_assert!(!self.is_eof(), "Advanced past the end symbol");
        self.position += 1;
    }
    pub fn match_char(&mut self, c: u32) -> bool {
        if self.peek() == c {
            self.advance();
            return true;
        }
        false
    }
    pub fn match_range(&mut self, lower: u32, upper: u32) -> bool {
        let c = self.peek();
        if lower <= c && c <= upper && c != END_SYMBOL {
            self.advance();
            return true;
        }
        false
    }
    pub fn match_dot(&mut self) -> bool {
        if self.peek() != END_SYMBOL {
            self.advance();
            return true;
        }
        false
    }
    pub fn match_str(&mut self, s: &str) -> bool {
        let start = self.position;
        for c in s.chars() {
            if !self.match_char(c.into()) {
                self.position = start;
                return false;
            }
        }
        true
    }

    pub fn save(&self) -> Checkpoint {
        Checkpoint {
            position: self.position,
            token_index: self.token_index,
            depth: self.depth,
        }
    }
    pub fn restore(&mut self, checkpoint: Checkpoint) {
        debug_assert!(checkpoint.token_index <= self.token_index);

        self.position = checkpoint.position;
        self.token_index = checkpoint.token_index;
        self.depth = checkpoint.depth;
    }

    /// Starts a match that will be recorded as a token.
    pub fn open(&mut self) -> Checkpoint {
        let checkpoint = self.save();
        self.depth += 1;
        checkpoint
    }
    /// Records the token started by `open`.
    pub fn close(&mut self, rule: u32, begin: Checkpoint) {
        self.depth = begin.depth;
        let token = Token {
            rule,
            begin: begin.position,
            end: self.position,
            depth: begin.depth,
        };
        self.tokens.set(self.token_index, token);
        self.token_index += 1;
    }
    /// Stores the text matched since `begin` into `text`.
    pub fn capture(&mut self, begin: Checkpoint) {
        self.text = self.slice(begin.position, self.position);
    }

    pub fn tokens(&self) -> &[Token] {
        self.tokens.get(self.token_index)
    }
    pub fn token_text(&self, token: Token) -> String {
        self.slice(token.begin, token.end)
    }
    pub fn tree(&self) -> Vec<TreeNode> {
        build_tree(self.tokens())
    }
    pub fn print_tree(&self, names: &[&str]) -> String {
        let mut out = String::new();
        write_tree(&mut out, &self.tree(), names, self.buffer(), 0);
        out
    }

    fn slice(&self, begin: u32, end: u32) -> String {
        self.buffer[begin as usize..end as usize]
            .iter()
            .filter_map(|&c| char::from_u32(c))
            .collect()
    }

    /// Replays the outcome of an earlier attempt of `rule` at the current position.
    pub fn memoized(&mut self, rule: u32) -> Option<bool> {
        if !self.memoize {
            return None;
        }

        let entry = self.memo.get(&(rule, self.position))?;
        if entry.matched {
            for token in &entry.tokens {
                let token = Token {
                    depth: token.depth + self.depth,
                    ..*token
                };
                self.tokens.set(self.token_index, token);
                self.token_index += 1;
            }
            self.position = entry.end;
        }

        Some(entry.matched)
    }
    pub fn memoize(&mut self, rule: u32, begin: Checkpoint, matched: bool) {
        if !self.memoize {
            return;
        }

        let tokens = match matched {
            true => self.tokens.get(self.token_index)[begin.token_index as usize..]
                .iter()
                .map(|token| Token {
                    depth: token.depth - begin.depth,
                    ..*token
                })
                .collect(),
            false => Vec::new(),
        };
        let entry = MemoEntry {
            matched,
            end: self.position,
            tokens,
        };
        self.memo.insert((rule, begin.position), entry);
    }

    /// Notes a failed rule, keeping the innermost one that read furthest.
    pub fn fail(&mut self, rule: u32, begin: Checkpoint) {
        let end = self.furthest;
        if let Some(failure) = self.failure {
            if failure.end >= end {
                return;
            }
        }
        self.failure = Some(Failure {
            rule,
            begin: begin.position,
            end,
        });
    }
    pub fn error(&self, names: &[&str]) -> ParseError {
        let (rule, begin, end) = match self.failure {
            Some(Failure { rule, begin, end }) => {
                (names.get(rule as usize).map(|name| name.to_string()), begin, end)
            }
            None => (None, 0, self.furthest),
        };
        let end = end.min(self.buffer().len() as u32);
        let begin = begin.min(end);

        let map = LineMap::new(self.buffer());
        ParseError {
            rule,
            begin: map.position(begin),
            end: map.position(end),
            text: self.slice(begin, end),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backtracking_discards_tokens() {
        let mut p = Parser::new("ab", ParserOptions::default());

        let outer = p.open();
        let inner = p.open();
        assert!(p.match_char('a' as u32));
        p.close(1, inner);

        let attempt = p.save();
        let doomed = p.open();
        assert!(!p.match_char('x' as u32));
        let _ = doomed;
        p.restore(attempt);

        assert!(p.match_range('a' as u32, 'z' as u32));
        p.close(0, outer);

        assert!(p.is_eof());
        assert_eq!(p.tokens().len(), 2);
        assert_eq!(p.print_tree(&["Outer", "Inner"]), "Outer \"ab\"\n  Inner \"a\"\n");
    }

    #[test]
    fn test_end_symbol_never_matches() {
        let mut p = Parser::new("", ParserOptions::default());
        assert!(!p.match_dot());
        assert!(!p.match_range(0, END_SYMBOL));
        assert_eq!(p.peek(), END_SYMBOL);
        assert!(!p.match_str("a"));
        assert!(p.match_str(""));
    }

    #[test]
    fn test_match_str_restores() {
        let mut p = Parser::new("abd", ParserOptions::default());
        assert!(!p.match_str("abc"));
        assert_eq!(p.position(), 0);
        assert!(p.match_str("ab"));
        assert_eq!(p.position(), 2);
    }

    #[test]
    fn test_memoized_replay() {
        let options = ParserOptions {
            memoize: true,
            capacity: 1,
        };
        let mut p = Parser::new("aa", options);

        let begin = p.save();
        let token = p.open();
        assert!(p.match_char('a' as u32));
        p.close(7, token);
        p.memoize(7, begin, true);

        p.restore(begin);
        let outer = p.open();
        assert_eq!(p.memoized(7), Some(true));
        assert_eq!(p.position(), 1);
        p.close(3, outer);

        assert_eq!(
            p.tokens(),
            &[
                Token {
                    rule: 7,
                    begin: 0,
                    end: 1,
                    depth: 1
                },
                Token {
                    rule: 3,
                    begin: 0,
                    end: 1,
                    depth: 0
                }
            ]
        );
        assert_eq!(p.memoized(3), None);
    }

    #[test]
    fn test_error_reports_furthest_failure() {
        let mut p = Parser::new("ab\nxy", ParserOptions::default());
        let names = ["Line", "Word"];

        let line = p.save();
        let word = p.save();
        p.match_str("ab\nx");
        assert!(!p.match_char('z' as u32));
        p.fail(1, word);
        p.restore(line);
        p.fail(0, line);

        let error = p.error(&names);
        assert_eq!(error.rule.as_deref(), Some("Word"));
        assert_eq!(error.end, CodePointPos { line: 1, character: 1 });
        assert_eq!(
            error.to_string(),
            "parse error near Word (line 1 symbol 1 - line 2 symbol 2): \"ab\\nx\""
        );
    }
}

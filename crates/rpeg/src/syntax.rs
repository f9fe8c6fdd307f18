//! Reads grammar text into a [`Tree`] through its builder operations.

use std::borrow::Cow;

use crate::{error::SyntaxError, ir::Tree};

type Result<T> = std::result::Result<T, SyntaxError>;

pub fn parse_grammar(src: &str) -> Result<Tree> {
    let mut reader = Reader {
        chars: src.chars().collect(),
        pos: 0,
        recorded: 0,
        tree: Tree::new(),
    };
    reader.grammar()?;
    Ok(reader.tree)
}

struct Reader {
    chars: Vec<char>,
    pos: usize,
    /// Spacing before this position was already turned into items.
    recorded: usize,
    tree: Tree,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}
fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

impl Reader {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }
    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }
    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }
    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }
    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            return true;
        }
        false
    }
    fn eat_str(&mut self, s: &str) -> bool {
        let len = s.chars().count();
        let matches = self
            .chars
            .get(self.pos..self.pos + len)
            .is_some_and(|slice| slice.iter().copied().eq(s.chars()));
        if matches {
            self.pos += len;
        }
        matches
    }
    /// Eats a punctuation token and the spacing after it.
    fn token(&mut self, c: char) -> bool {
        if self.eat(c) {
            self.spacing();
            return true;
        }
        false
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        self.error_at(self.pos, message)
    }
    fn error_at(&self, pos: usize, message: impl Into<String>) -> SyntaxError {
        let before = &self.chars[..pos.min(self.chars.len())];
        let line = before.iter().filter(|&&c| c == '\n').count() + 1;
        let column = before.iter().rev().take_while(|&&c| c != '\n').count() + 1;
        SyntaxError {
            line: line as u32,
            column: column as u32,
            message: Cow::Owned(message.into()),
        }
    }
    fn unexpected(&self, expected: &str) -> SyntaxError {
        match self.peek() {
            Some(c) => self.error(format!("expected {expected}, found {c:?}")),
            None => self.error(format!("expected {expected}, found end of input")),
        }
    }

    /// Whitespace and comments. Comments and blank lines become top-level items.
    fn spacing(&mut self) {
        let mut blank = false;
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' => self.pos += 1,
                '\r' | '\n' => {
                    let fresh = self.pos >= self.recorded;
                    self.end_of_line();
                    if blank && fresh {
                        self.tree.add_space("\n");
                    }
                    blank = true;
                }
                '#' => {
                    let fresh = self.pos >= self.recorded;
                    self.pos += 1;
                    let start = self.pos;
                    while !matches!(self.peek(), None | Some('\r' | '\n')) {
                        self.pos += 1;
                    }
                    if fresh {
                        let text = self.chars[start..self.pos].iter().collect::<String>();
                        self.tree.add_comment(&text);
                    }
                    blank = false;
                }
                _ => break,
            }
        }
        self.recorded = self.recorded.max(self.pos);
    }
    fn end_of_line(&mut self) {
        if !self.eat_str("\r\n") && !self.eat('\n') {
            self.eat('\r');
        }
    }

    fn word(&mut self) -> Option<String> {
        if !self.peek().is_some_and(is_ident_start) {
            return None;
        }
        let start = self.pos;
        while self.peek().is_some_and(is_ident_continue) {
            self.pos += 1;
        }
        Some(self.chars[start..self.pos].iter().collect())
    }
    fn identifier(&mut self) -> Option<String> {
        let ident = self.word()?;
        self.spacing();
        Some(ident)
    }
    fn expect_identifier(&mut self) -> Result<String> {
        self.identifier()
            .ok_or_else(|| self.unexpected("an identifier"))
    }
    fn arrow(&mut self) -> bool {
        if self.eat_str("<-") || self.eat('←') {
            self.spacing();
            return true;
        }
        false
    }
    /// A word followed by something other than an arrow, so that rules may
    /// still be named `package` or `type`.
    fn keyword(&mut self, word: &str) -> bool {
        let start = self.pos;
        match self.identifier() {
            Some(ident) if ident == word && !self.at_arrow() => true,
            _ => {
                self.pos = start;
                false
            }
        }
    }
    fn at_arrow(&self) -> bool {
        let rest = &self.chars[self.pos..];
        rest.starts_with(&['<', '-']) || rest.starts_with(&['←'])
    }

    /// Raw text between balanced braces, the braces excluded.
    fn braced(&mut self) -> Result<String> {
        let open = self.pos;
        if !self.eat('{') {
            return Err(self.unexpected("`{`"));
        }
        let start = self.pos;
        let mut depth = 0usize;
        loop {
            match self.bump() {
                Some('{') => depth += 1,
                Some('}') if depth == 0 => break,
                Some('}') => depth -= 1,
                Some(_) => {}
                None => return Err(self.error_at(open, "unclosed `{`")),
            }
        }
        Ok(self.chars[start..self.pos - 1].iter().collect())
    }
    fn quoted_path(&mut self) -> Result<String> {
        if !self.eat('"') {
            return Err(self.unexpected("a quoted import path"));
        }
        let start = self.pos;
        while !matches!(self.peek(), None | Some('"' | '\n')) {
            self.pos += 1;
        }
        if !self.eat('"') {
            return Err(self.error_at(start - 1, "unterminated import path"));
        }
        Ok(self.chars[start..self.pos - 1].iter().collect())
    }

    fn grammar(&mut self) -> Result<()> {
        self.spacing();

        if self.keyword("package") {
            let name = self.word().ok_or_else(|| self.unexpected("a package name"))?;
            self.tree.add_package(&name);
            self.spacing();
        }
        while self.keyword("import") {
            let grouped = self.token('(');
            loop {
                if grouped && self.token(')') {
                    break;
                }
                let path = self.quoted_path()?;
                self.tree.add_import(&path);
                self.spacing();
                if !grouped {
                    break;
                }
            }
        }
        if self.keyword("type") {
            let name = self.expect_identifier()?;
            if !self.keyword("Peg") {
                return Err(self.unexpected("`Peg`"));
            }
            self.tree.add_peg(&name);
            let state = match self.peek() {
                Some('{') => self.braced()?,
                _ => String::new(),
            };
            self.tree.add_state(&state);
            self.spacing();
        }

        while !self.at_end() {
            self.definition()?;
        }
        Ok(())
    }

    fn definition(&mut self) -> Result<()> {
        let name = self.expect_identifier()?;
        if !self.arrow() {
            return Err(self.unexpected("`<-`"));
        }
        self.tree.add_rule(&name);
        self.expression()?;
        self.tree.add_expression();

        // the expression has to run up to the next definition
        let next = self.pos;
        let complete = self.at_end() || (self.identifier().is_some() && self.at_arrow());
        self.pos = next;
        if !complete {
            let found = self
                .peek()
                .map_or_else(|| "end of input".to_owned(), |c| format!("{c:?}"));
            return Err(self.error(format!("unexpected {found} in rule `{name}`")));
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<()> {
        if !self.sequence()? {
            self.tree.add_nil();
            return Ok(());
        }
        while self.token('/') {
            if !self.sequence()? {
                self.tree.add_nil();
                self.tree.add_alternate();
                break;
            }
            self.tree.add_alternate();
        }
        Ok(())
    }

    fn sequence(&mut self) -> Result<bool> {
        if !self.prefix()? {
            return Ok(false);
        }
        while self.prefix()? {
            self.tree.add_sequence();
        }
        Ok(true)
    }

    fn prefix(&mut self) -> Result<bool> {
        let peek = match self.peek() {
            Some('&') => true,
            Some('!') => false,
            _ => return self.suffix(),
        };
        self.pos += 1;
        self.spacing();

        if self.peek() == Some('{') {
            let code = self.braced()?;
            self.spacing();
            match peek {
                true => self.tree.add_predicate(&code),
                false => self.tree.add_state_change(&code),
            }
            return Ok(true);
        }

        if !self.suffix()? {
            return Err(self.unexpected("an expression"));
        }
        match peek {
            true => self.tree.add_peek_for(),
            false => self.tree.add_peek_not(),
        }
        Ok(true)
    }

    fn suffix(&mut self) -> Result<bool> {
        if !self.primary()? {
            return Ok(false);
        }
        if self.token('?') {
            self.tree.add_query();
        } else if self.token('*') {
            self.tree.add_star();
        } else if self.token('+') {
            self.tree.add_plus();
        }
        Ok(true)
    }

    fn primary(&mut self) -> Result<bool> {
        let Some(c) = self.peek() else {
            return Ok(false);
        };
        match c {
            _ if is_ident_start(c) => {
                let start = self.pos;
                let ident = self.expect_identifier()?;
                if self.at_arrow() {
                    // the name of the next definition
                    self.pos = start;
                    return Ok(false);
                }
                match ident.as_str() {
                    "commit" => self.tree.add_commit(),
                    _ => self.tree.add_name(&ident),
                }
            }
            '(' => {
                self.token('(');
                self.expression()?;
                if !self.token(')') {
                    return Err(self.unexpected("`)`"));
                }
            }
            '\'' => self.literal()?,
            '"' => self.double_literal()?,
            '[' => self.class()?,
            '.' => {
                self.token('.');
                self.tree.add_dot();
            }
            '{' => {
                let code = self.braced()?;
                self.tree.add_action(&code);
                self.spacing();
            }
            '<' => {
                self.token('<');
                self.expression()?;
                if !self.token('>') {
                    return Err(self.unexpected("`>`"));
                }
                self.tree.add_push();
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn literal(&mut self) -> Result<()> {
        let open = self.pos;
        self.eat('\'');
        let mut text = String::new();
        loop {
            match self.peek() {
                Some('\'') => break,
                Some(_) => text.push(self.char()?),
                None => return Err(self.error_at(open, "unterminated literal")),
            }
        }
        self.token('\'');

        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => self.tree.add_character(c),
            _ => self.tree.add_string(&text),
        }
        Ok(())
    }

    /// `"..."` matches ASCII letters in either case.
    fn double_literal(&mut self) -> Result<()> {
        let open = self.pos;
        self.eat('"');
        let mut count = 0;
        loop {
            match self.peek() {
                Some('"') => break,
                Some(_) => self.double_char()?,
                None => return Err(self.error_at(open, "unterminated literal")),
            }
            count += 1;
            if count > 1 {
                self.tree.add_sequence();
            }
        }
        self.token('"');
        if count == 0 {
            self.tree.add_string("");
        }
        Ok(())
    }

    fn class(&mut self) -> Result<()> {
        let open = self.pos;
        let double = self.eat_str("[[");
        if !double {
            self.eat('[');
        }
        let negated = self.eat('^');
        let close = match double {
            true => "]]",
            false => "]",
        };

        let mut count = 0;
        loop {
            let rest = &self.chars[self.pos..];
            if rest.iter().copied().take(close.len()).eq(close.chars()) {
                break;
            }
            if self.at_end() {
                return Err(self.error_at(open, "unterminated character class"));
            }
            match double {
                true => self.double_range()?,
                false => self.range()?,
            }
            count += 1;
            if count > 1 {
                self.tree.add_alternate();
            }
        }
        if count == 0 {
            return Err(self.error_at(open, "empty character class"));
        }
        self.eat_str(close);
        self.spacing();

        if negated {
            self.tree.add_peek_not();
            self.tree.add_dot();
            self.tree.add_sequence();
        }
        Ok(())
    }

    fn range_dash(&self) -> bool {
        self.peek() == Some('-') && !matches!(self.peek_at(1), None | Some(']'))
    }
    fn range(&mut self) -> Result<()> {
        let lower = self.char()?;
        self.tree.add_character(lower);
        if self.range_dash() {
            self.pos += 1;
            let upper = self.char()?;
            self.tree.add_character(upper);
            self.tree.add_range();
        }
        Ok(())
    }
    fn double_range(&mut self) -> Result<()> {
        let start = self.pos;
        let lower = self.char()?;
        if self.range_dash() {
            self.pos += 1;
            let upper = self.char()?;
            self.tree.add_character(lower);
            self.tree.add_character(upper);
            self.tree.add_double_range();
            return Ok(());
        }
        self.pos = start;
        self.double_char()
    }
    fn double_char(&mut self) -> Result<()> {
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() => {
                self.pos += 1;
                self.tree.add_double_character(c);
            }
            _ => {
                let c = self.char()?;
                self.tree.add_character(c);
            }
        }
        Ok(())
    }

    /// One possibly escaped character.
    fn char(&mut self) -> Result<char> {
        let start = self.pos;
        match self.bump() {
            Some('\\') => {}
            Some(c) => return Ok(c),
            None => return Err(self.error("unexpected end of input")),
        }

        let Some(c) = self.bump() else {
            return Err(self.error_at(start, "unfinished escape"));
        };
        let c = match c {
            'a' | 'A' => '\x07',
            'b' | 'B' => '\x08',
            'e' | 'E' => '\x1b',
            'f' | 'F' => '\x0c',
            'n' | 'N' => '\n',
            'r' | 'R' => '\r',
            't' | 'T' => '\t',
            'v' | 'V' => '\x0b',
            '\'' | '"' | '[' | ']' | '-' | '\\' => c,
            '0' if self.peek() == Some('x') && self.peek_at(1).is_some_and(|c| c.is_ascii_hexdigit()) => {
                self.pos += 1;
                let value = self.digits(16, 6);
                return char::from_u32(value)
                    .ok_or_else(|| self.error_at(start, format!("invalid code point {value:#x}")));
            }
            '0'..='7' => {
                self.pos -= 1;
                let max = match c {
                    '0'..='3' => 3,
                    _ => 2,
                };
                let value = self.digits(8, max);
                // at most 0o377
                return Ok(char::from(value as u8));
            }
            _ => return Err(self.error_at(start, format!("unknown escape `\\{c}`"))),
        };
        Ok(c)
    }
    fn digits(&mut self, radix: u32, max: usize) -> u32 {
        let mut value = 0;
        for _ in 0..max {
            match self.peek().and_then(|c| c.to_digit(radix)) {
                Some(digit) => {
                    value = value * radix + digit;
                    self.pos += 1;
                }
                None => break,
            }
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::NodeKind;
    use pretty_assertions::assert_eq;

    fn rules(src: &str) -> Vec<String> {
        let tree = parse_grammar(src).unwrap();
        tree.items()
            .iter()
            .filter(|&&item| tree.kind(item) == NodeKind::Rule)
            .map(|&item| tree.display(item).to_string())
            .collect()
    }

    #[test]
    fn test_definitions() {
        assert_eq!(
            rules("A <- B 'x' / C\nB ← 'b'\n\nC <- ('c' / 'd')+"),
            ["A <- ((B 'x') / C)", "B <- 'b'", "C <- ('c' / 'd')+"]
        );
    }

    #[test]
    fn test_literals() {
        assert_eq!(rules("A <- 'a' 'bc' ''"), ["A <- ('a' 'bc' '')"]);
        assert_eq!(
            rules("A <- \"ab1\""),
            ["A <- (('a' / 'A') ('b' / 'B') '1')"]
        );
    }

    #[test]
    fn test_classes() {
        assert_eq!(
            rules("A <- [a-c_] [^x] [[q]] [a-]"),
            ["A <- (([a-c] / '_') (!'x' .) ('q' / 'Q') ('a' / '-'))"]
        );
        assert_eq!(
            rules("A <- [[a-b]]"),
            ["A <- ([a-b] / [A-B])"]
        );
    }

    #[test]
    fn test_prefix_and_suffix() {
        assert_eq!(
            rules("A <- &'a' !'b' 'c'? 'd'* 'e'+ &{ ok } !{ s.x = 1 } { act } <'f'> commit"),
            ["A <- (&'a' !'b' 'c'? 'd'* 'e'+ &{ ok } !{ s.x = 1 } { act } <'f'> commit)"]
        );
    }

    #[test]
    fn test_escapes() {
        let tree = parse_grammar("A <- '\\n\\101\\0x41\\\\' '\\7'").unwrap();
        let rule = tree.items()[0];
        let sequence = tree.children(rule)[0];
        let children = tree.children(sequence);
        assert_eq!(tree.get(children[0]).text, "\nAA\\");
        assert_eq!(tree.get(children[1]).text, "\x07");
    }

    #[test]
    fn test_trailing_slash_adds_nil() {
        let tree = parse_grammar("A <- 'a' /\nB <- 'b'").unwrap();
        let a = tree.items()[0];
        let alternate = tree.children(a)[0];
        assert_eq!(tree.kind(alternate), NodeKind::Alternate);
        assert_eq!(tree.kind(tree.children(alternate)[1]), NodeKind::Nil);
    }

    #[test]
    fn test_header_items() {
        let src = "# calculator\npackage calc\n\nimport (\"std::fmt\" \"std::cell\")\nimport \"std::rc\"\ntype Calc Peg { depth: { u32 } }\n\nA <- 'a'\n";
        let tree = parse_grammar(src).unwrap();
        let items = tree
            .items()
            .iter()
            .map(|&item| (tree.kind(item), tree.get(item).text.clone()))
            .collect::<Vec<_>>();
        assert_eq!(
            items,
            [
                (NodeKind::Comment, " calculator".to_owned()),
                (NodeKind::Package, "calc".to_owned()),
                (NodeKind::Space, "\n".to_owned()),
                (NodeKind::Import, "std::fmt".to_owned()),
                (NodeKind::Import, "std::cell".to_owned()),
                (NodeKind::Import, "std::rc".to_owned()),
                (NodeKind::Peg, "Calc".to_owned()),
                (NodeKind::Space, "\n".to_owned()),
                (NodeKind::Rule, "A".to_owned()),
            ]
        );
        let peg = tree.items()[6];
        let state = tree.children(peg)[0];
        assert_eq!(tree.get(state).text, " depth: { u32 } ");
    }

    #[test]
    fn test_keywords_as_rule_names() {
        assert_eq!(
            rules("package <- type\ntype <- 'x'"),
            ["package <- type", "type <- 'x'"]
        );
    }

    #[test]
    fn test_errors() {
        let error = parse_grammar("A 'a'").unwrap_err();
        assert_eq!((error.line, error.column), (1, 3));

        let error = parse_grammar("A <- 'a\n").unwrap_err();
        assert_eq!(error.message, "unterminated literal");
        assert_eq!((error.line, error.column), (1, 6));

        let error = parse_grammar("A <- 'a'\nB <- ( 'b'").unwrap_err();
        assert_eq!(error.line, 2);

        let error = parse_grammar("A <- 'a' )").unwrap_err();
        assert_eq!(error.to_string(), "1:10: unexpected ')' in rule `A`");

        assert!(parse_grammar("A <- []").is_err());
        assert!(parse_grammar("A <- '\\q'").is_err());
        assert!(parse_grammar("A <- { x").is_err());
    }

    #[test]
    fn test_empty_grammar() {
        let tree = parse_grammar("# nothing\n").unwrap();
        assert_eq!(tree.items().len(), 1);
    }
}

use std::fmt::Write;

/// A matched rule, recorded when its match completes.
///
/// `depth` is the number of enclosing rule matches that were still open
/// when this one started, it is all that is needed to rebuild the tree.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug, Hash)]
pub struct Token {
    pub rule: u32,
    pub begin: u32,
    pub end: u32,
    pub depth: u32,
}

impl Token {
    pub fn len(&self) -> u32 {
        self.end - self.begin
    }
    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }
}

/// Preallocated token storage, slots past the current token index are garbage
/// left over from abandoned alternatives.
pub struct Tokens {
    tokens: Vec<Token>,
}

impl Tokens {
    pub fn with_capacity(capacity: usize) -> Tokens {
        Tokens {
            tokens: vec![Token::default(); capacity.max(1)],
        }
    }
    pub fn capacity(&self) -> usize {
        self.tokens.len()
    }
    /// Doubles the capacity.
    pub fn expand(&mut self) {
        let len = self.tokens.len();
        self.tokens.resize(len * 2, Token::default());
    }
    pub fn set(&mut self, index: u32, token: Token) {
        let index = index as usize;
        while index >= self.tokens.len() {
            self.expand();
        }
        self.tokens[index] = token;
    }
    pub fn get(&self, len: u32) -> &[Token] {
        &self.tokens[..len as usize]
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TreeNode {
    pub token: Token,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn new(token: Token) -> TreeNode {
        TreeNode {
            token,
            children: Vec::new(),
        }
    }
}

/// Rebuilds the syntax tree from tokens recorded in completion order.
///
/// A parent starts at or before its children and is strictly shallower, so
/// after a stable sort on `(begin, depth)` every node directly follows its
/// parent or an earlier sibling subtree.
pub fn build_tree(tokens: &[Token]) -> Vec<TreeNode> {
    let mut sorted = tokens.to_vec();
    sorted.sort_by_key(|token| (token.begin, token.depth));

    let mut roots = Vec::new();
    let mut stack: Vec<TreeNode> = Vec::new();

    fn pop(stack: &mut Vec<TreeNode>, roots: &mut Vec<TreeNode>) {
        if let Some(node) = stack.pop() {
            match stack.last_mut() {
                Some(parent) => parent.children.push(node),
                None => roots.push(node),
            }
        }
    }

    for token in sorted {
        while stack
            .last()
            .is_some_and(|top| top.token.depth >= token.depth)
        {
            pop(&mut stack, &mut roots);
        }
        stack.push(TreeNode::new(token));
    }

    while !stack.is_empty() {
        pop(&mut stack, &mut roots);
    }

    roots
}

/// Prints the tree one node per line, indented by depth.
#[allow(unused_must_use)]
pub fn write_tree(
    out: &mut dyn Write,
    nodes: &[TreeNode],
    names: &[&str],
    buffer: &[u32],
    indent: usize,
) {
    for node in nodes {
        let Token {
            rule, begin, end, ..
        } = node.token;
        let name = names.get(rule as usize).copied().unwrap_or("?");
        let text = buffer[begin as usize..end as usize]
            .iter()
            .filter_map(|&c| char::from_u32(c))
            .collect::<String>();

        writeln!(out, "{:indent$}{name} {text:?}", "");
        write_tree(out, &node.children, names, buffer, indent + 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn token(rule: u32, begin: u32, end: u32, depth: u32) -> Token {
        Token {
            rule,
            begin,
            end,
            depth,
        }
    }

    #[test]
    fn test_expand() {
        let mut tokens = Tokens::with_capacity(2);
        for i in 0..5 {
            tokens.set(i, token(i, i, i + 1, 0));
        }
        assert_eq!(tokens.capacity(), 8);
        assert_eq!(tokens.get(5)[4], token(4, 4, 5, 0));
    }

    #[test]
    fn test_postorder_to_tree() {
        // Sum <- Num '+' Num, with a zero-width action after the second number
        let recorded = [
            token(1, 0, 1, 1),
            token(1, 2, 3, 1),
            token(2, 3, 3, 1),
            token(0, 0, 3, 0),
        ];
        let tree = build_tree(&recorded);

        let mut expected = TreeNode::new(token(0, 0, 3, 0));
        expected.children = vec![
            TreeNode::new(token(1, 0, 1, 1)),
            TreeNode::new(token(1, 2, 3, 1)),
            TreeNode::new(token(2, 3, 3, 1)),
        ];
        assert_eq!(tree, vec![expected]);
    }

    #[test]
    fn test_nested_same_begin() {
        let recorded = [
            token(2, 0, 1, 2),
            token(1, 0, 2, 1),
            token(0, 0, 2, 0),
            token(3, 2, 4, 0),
        ];
        let tree = build_tree(&recorded);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].children[0].children[0].token.rule, 2);
        assert_eq!(tree[1].token.rule, 3);

        let buffer = "abcd".chars().map(u32::from).collect::<Vec<_>>();
        let mut out = String::new();
        write_tree(&mut out, &tree, &["A", "B", "C", "D"], &buffer, 0);
        assert_eq!(out, "A \"ab\"\n  B \"ab\"\n    C \"a\"\nD \"cd\"\n");
    }
}

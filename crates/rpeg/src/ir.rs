//! Grammar intermediate representation.
//!
//! Nodes live in an arena and own their children through ids. Rules never own
//! each other, a `Name` node refers to its rule through the rule table of
//! [`Grammar`](crate::grammar::Grammar).

use std::fmt::{Display, Write};

use cranelift_entity::{entity_impl, PrimaryMap, SecondaryMap};

use crate::set::{DisplayPoint, IntervalSet};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

entity_impl!(NodeId, "node");

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum NodeKind {
    Rule,
    Name,
    Dot,
    Character,
    Range,
    StringLiteral,
    Predicate,
    StateChange,
    Commit,
    Action,
    Alternate,
    UnorderedAlternate,
    Sequence,
    PeekFor,
    PeekNot,
    Query,
    Star,
    Plus,
    Push,
    ImplicitPush,
    Nil,
    Package,
    Import,
    Peg,
    State,
    Space,
    Comment,
}

impl NodeKind {
    pub fn name(self) -> &'static str {
        match self {
            NodeKind::Rule => "Rule",
            NodeKind::Name => "Name",
            NodeKind::Dot => "Dot",
            NodeKind::Character => "Character",
            NodeKind::Range => "Range",
            NodeKind::StringLiteral => "String",
            NodeKind::Predicate => "Predicate",
            NodeKind::StateChange => "StateChange",
            NodeKind::Commit => "Commit",
            NodeKind::Action => "Action",
            NodeKind::Alternate => "Alternate",
            NodeKind::UnorderedAlternate => "UnorderedAlternate",
            NodeKind::Sequence => "Sequence",
            NodeKind::PeekFor => "PeekFor",
            NodeKind::PeekNot => "PeekNot",
            NodeKind::Query => "Query",
            NodeKind::Star => "Star",
            NodeKind::Plus => "Plus",
            NodeKind::Push => "Push",
            NodeKind::ImplicitPush => "ImplicitPush",
            NodeKind::Nil => "Nil",
            NodeKind::Package => "Package",
            NodeKind::Import => "Import",
            NodeKind::Peg => "Peg",
            NodeKind::State => "State",
            NodeKind::Space => "Space",
            NodeKind::Comment => "Comment",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    /// Rule name, character, literal or host code depending on `kind`.
    pub text: String,
    /// Rule id for `Rule` nodes, action number for `Action` nodes.
    pub id: u32,
    pub children: Vec<NodeId>,
}

impl Node {
    pub fn new(kind: NodeKind, text: impl Into<String>) -> Node {
        Node {
            kind,
            text: text.into(),
            id: 0,
            children: Vec::new(),
        }
    }
    pub fn with_children(kind: NodeKind, children: Vec<NodeId>) -> Node {
        Node {
            kind,
            text: String::new(),
            id: 0,
            children,
        }
    }
    /// The code point of a `Character` node.
    pub fn char(&self) -> u32 {
        self.text.chars().next().map_or(0, u32::from)
    }
}

/// Node arena plus the stack machine the front-end drives to build it.
///
/// Builder operations push onto or pop from the stack, completed top-level
/// items (rules, package, imports, comments) move to `items`.
#[derive(Default, Debug)]
pub struct Tree {
    nodes: PrimaryMap<NodeId, Node>,
    /// Sets of the switch classes, which may include `END_SYMBOL`.
    classes: SecondaryMap<NodeId, IntervalSet>,
    stack: Vec<NodeId>,
    items: Vec<NodeId>,
    rules_count: u32,
}

impl Tree {
    pub fn new() -> Tree {
        Self::default()
    }

    pub fn add(&mut self, node: Node) -> NodeId {
        self.nodes.push(node)
    }
    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }
    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }
    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.nodes[id].kind
    }
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }
    pub fn front(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].children.first().copied()
    }
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
    /// Top-level items in source order.
    pub fn items(&self) -> &[NodeId] {
        &self.items
    }
    pub fn push_item(&mut self, id: NodeId) {
        self.items.push(id);
    }

    /// Copies the subtree rooted at `id`.
    pub fn deep_copy(&mut self, id: NodeId) -> NodeId {
        let mut node = self.nodes[id].clone();
        node.children = node
            .children
            .iter()
            .map(|&child| self.deep_copy(child))
            .collect();
        let copy = self.add(node);
        if let Some(set) = self.classes.get(id).filter(|set| !set.is_empty()) {
            self.classes[copy] = set.clone();
        }
        copy
    }

    /// Builds the character class of a switch case, a childless
    /// `UnorderedAlternate` whose code points are kept aside as they are.
    pub fn add_class(&mut self, set: &IntervalSet) -> NodeId {
        let class = self.add(Node::new(NodeKind::UnorderedAlternate, ""));
        self.classes[class] = set.clone();
        class
    }
    /// The set a class was built from, empty for any other node.
    pub fn class_set(&self, class: NodeId) -> &IntervalSet {
        &self.classes[class]
    }
    pub fn range_bounds(&self, range: NodeId) -> (u32, u32) {
        let children = self.children(range);
        let bound = |i: usize| children.get(i).map_or(0, |&c| self.get(c).char());
        (bound(0), bound(1))
    }

    fn push(&mut self, node: Node) {
        let id = self.add(node);
        self.stack.push(id);
    }
    #[track_caller]
    fn pop(&mut self) -> NodeId {
        self.stack.pop().expect("Grammar builder stack underflow")
    }
    fn add_list(&mut self, kind: NodeKind) {
        let a = self.pop();
        let b = self.pop();
        let list = match self.kind(b) == kind {
            true => b,
            false => self.add(Node::with_children(kind, vec![b])),
        };
        self.nodes[list].children.push(a);
        self.stack.push(list);
    }
    fn add_fix(&mut self, kind: NodeKind) {
        let child = self.pop();
        self.push(Node::with_children(kind, vec![child]));
    }

    pub fn add_rule(&mut self, name: &str) {
        let mut rule = Node::new(NodeKind::Rule, name);
        rule.id = self.rules_count;
        self.rules_count += 1;
        self.push(rule);
    }
    pub fn add_expression(&mut self) {
        let expression = self.pop();
        let rule = self.pop();
        self.nodes[rule].children.push(expression);
        self.items.push(rule);
    }
    pub fn add_name(&mut self, text: &str) {
        self.push(Node::new(NodeKind::Name, text));
    }
    pub fn add_dot(&mut self) {
        self.push(Node::new(NodeKind::Dot, "."));
    }
    pub fn add_character(&mut self, c: char) {
        self.push(Node::new(NodeKind::Character, c));
    }
    pub fn add_string(&mut self, text: &str) {
        self.push(Node::new(NodeKind::StringLiteral, text));
    }
    /// Case-insensitive character, an alternate of both cases.
    pub fn add_double_character(&mut self, c: char) {
        self.add_character(lower(c));
        self.add_character(upper(c));
        self.add_alternate();
    }
    pub fn add_predicate(&mut self, text: &str) {
        self.push(Node::new(NodeKind::Predicate, text));
    }
    pub fn add_state_change(&mut self, text: &str) {
        self.push(Node::new(NodeKind::StateChange, text));
    }
    pub fn add_commit(&mut self) {
        self.push(Node::new(NodeKind::Commit, "commit"));
    }
    pub fn add_nil(&mut self) {
        self.push(Node::new(NodeKind::Nil, "<nil>"));
    }
    pub fn add_action(&mut self, text: &str) {
        self.push(Node::new(NodeKind::Action, text));
    }
    pub fn add_package(&mut self, text: &str) {
        let id = self.add(Node::new(NodeKind::Package, text));
        self.items.push(id);
    }
    pub fn add_import(&mut self, text: &str) {
        let id = self.add(Node::new(NodeKind::Import, text));
        self.items.push(id);
    }
    pub fn add_space(&mut self, text: &str) {
        let id = self.add(Node::new(NodeKind::Space, text));
        self.items.push(id);
    }
    pub fn add_comment(&mut self, text: &str) {
        let id = self.add(Node::new(NodeKind::Comment, text));
        self.items.push(id);
    }
    pub fn add_peg(&mut self, text: &str) {
        self.push(Node::new(NodeKind::Peg, text));
    }
    pub fn add_state(&mut self, text: &str) {
        let peg = self.pop();
        let state = self.add(Node::new(NodeKind::State, text));
        self.nodes[peg].children.push(state);
        self.items.push(peg);
    }
    pub fn add_alternate(&mut self) {
        self.add_list(NodeKind::Alternate);
    }
    pub fn add_sequence(&mut self) {
        self.add_list(NodeKind::Sequence);
    }
    pub fn add_range(&mut self) {
        self.add_list(NodeKind::Range);
    }
    /// Case-insensitive range from the two characters on the stack.
    pub fn add_double_range(&mut self) {
        let a = self.pop();
        let b = self.pop();
        let (a, b) = (self.get(a).char(), self.get(b).char());
        let (a, b) = (to_char(a), to_char(b));

        self.add_character(lower(b));
        self.add_character(lower(a));
        self.add_range();

        self.add_character(upper(b));
        self.add_character(upper(a));
        self.add_range();

        self.add_alternate();
    }
    pub fn add_peek_for(&mut self) {
        self.add_fix(NodeKind::PeekFor);
    }
    pub fn add_peek_not(&mut self) {
        self.add_fix(NodeKind::PeekNot);
    }
    pub fn add_query(&mut self) {
        self.add_fix(NodeKind::Query);
    }
    pub fn add_star(&mut self) {
        self.add_fix(NodeKind::Star);
    }
    pub fn add_plus(&mut self) {
        self.add_fix(NodeKind::Plus);
    }
    pub fn add_push(&mut self) {
        self.add_fix(NodeKind::Push);
    }

    /// Pretty prints an expression in grammar syntax.
    pub fn display(&self, id: NodeId) -> DisplayNode<'_> {
        DisplayNode { tree: self, id }
    }

    /// Indented dump of every top-level item.
    #[allow(unused_must_use)]
    pub fn dump(&self, out: &mut dyn Write) {
        fn node(tree: &Tree, out: &mut dyn Write, id: NodeId, depth: usize) {
            let n = tree.get(id);
            writeln!(out, "{:width$}{} {:?}", "", n.kind.name(), n.text, width = depth * 2);
            for &child in &n.children {
                node(tree, out, child, depth + 1);
            }
        }
        for &item in &self.items {
            node(self, out, item, 0);
        }
    }
}

fn to_char(c: u32) -> char {
    char::from_u32(c).unwrap_or(char::REPLACEMENT_CHARACTER)
}
fn lower(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}
fn upper(c: char) -> char {
    c.to_uppercase().next().unwrap_or(c)
}

pub struct DisplayNode<'a> {
    tree: &'a Tree,
    id: NodeId,
}

impl DisplayNode<'_> {
    fn child(&self, id: NodeId) -> DisplayNode<'_> {
        DisplayNode {
            tree: self.tree,
            id,
        }
    }
    fn list(&self, f: &mut std::fmt::Formatter<'_>, separator: &str) -> std::fmt::Result {
        f.write_char('(')?;
        for (i, &child) in self.tree.children(self.id).iter().enumerate() {
            if i > 0 {
                f.write_str(separator)?;
            }
            write!(f, "{}", self.child(child))?;
        }
        f.write_char(')')
    }
}

impl Display for DisplayNode<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let node = self.tree.get(self.id);
        let front = || self.child(node.children[0]);
        match node.kind {
            NodeKind::Rule => match node.children.first() {
                Some(_) => write!(f, "{} <- {}", node.text, front()),
                None => f.write_str(&node.text),
            },
            NodeKind::Dot => f.write_char('.'),
            NodeKind::Name => f.write_str(&node.text),
            NodeKind::Character => write!(f, "'{}'", DisplayPoint(node.char())),
            NodeKind::StringLiteral => {
                f.write_char('\'')?;
                for c in node.text.chars() {
                    write!(f, "{}", DisplayPoint(c.into()))?;
                }
                f.write_char('\'')
            }
            NodeKind::Range => {
                let (lower, upper) = self.tree.range_bounds(self.id);
                write!(f, "[{}-{}]", DisplayPoint(lower), DisplayPoint(upper))
            }
            NodeKind::Predicate => write!(f, "&{{{}}}", node.text),
            NodeKind::StateChange => write!(f, "!{{{}}}", node.text),
            NodeKind::Action => write!(f, "{{{}}}", node.text),
            NodeKind::Commit => f.write_str("commit"),
            NodeKind::Alternate => self.list(f, " / "),
            NodeKind::UnorderedAlternate if node.children.is_empty() => {
                write!(f, "{:?}", self.tree.class_set(self.id))
            }
            NodeKind::UnorderedAlternate => self.list(f, " | "),
            NodeKind::Sequence => self.list(f, " "),
            NodeKind::PeekFor => write!(f, "&{}", front()),
            NodeKind::PeekNot => write!(f, "!{}", front()),
            NodeKind::Query => write!(f, "{}?", front()),
            NodeKind::Star => write!(f, "{}*", front()),
            NodeKind::Plus => write!(f, "{}+", front()),
            NodeKind::Push | NodeKind::ImplicitPush => write!(f, "<{}>", front()),
            NodeKind::Nil
            | NodeKind::Comment
            | NodeKind::Space
            | NodeKind::Package
            | NodeKind::Import
            | NodeKind::Peg
            | NodeKind::State => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::END_SYMBOL;

    #[test]
    fn test_builder_lists() {
        let mut t = Tree::new();
        t.add_rule("A");
        t.add_character('a');
        t.add_character('b');
        t.add_sequence();
        t.add_character('c');
        t.add_sequence();
        t.add_name("B");
        t.add_star();
        t.add_alternate();
        t.add_expression();

        let rule = t.items()[0];
        assert_eq!(t.kind(rule), NodeKind::Rule);
        assert_eq!(t.display(rule).to_string(), "A <- (('a' 'b' 'c') / B*)");
    }

    #[test]
    fn test_double_range() {
        let mut t = Tree::new();
        t.add_rule("Hex");
        t.add_character('a');
        t.add_character('f');
        t.add_double_range();
        t.add_expression();

        let rule = t.items()[0];
        assert_eq!(t.display(rule).to_string(), "Hex <- ([a-f] / [A-F])");
    }

    #[test]
    fn test_class_round_trip() {
        let mut t = Tree::new();
        let mut set = IntervalSet::range('a' as u32, 'c' as u32);
        set.add('x' as u32);

        let class = t.add_class(&set);
        assert_eq!(t.class_set(class), &set);
        assert_eq!(t.display(class).to_string(), "[a-cx]");

        let empty = t.add_class(&IntervalSet::new());
        assert!(t.class_set(empty).is_empty());

        // anything that may match nothing also peeks the end of input
        let everything = IntervalSet::range(0, END_SYMBOL);
        let class = t.add_class(&everything);
        assert_eq!(t.class_set(class), &everything);
        let copy = t.deep_copy(class);
        assert_eq!(t.class_set(copy), &everything);
    }

    #[test]
    fn test_deep_copy_is_independent() {
        let mut t = Tree::new();
        t.add_character('a');
        t.add_query();
        let query = t.pop();

        let copy = t.deep_copy(query);
        let inner = t.children(copy)[0];
        t.get_mut(inner).text = "b".into();

        assert_eq!(t.display(query).to_string(), "'a'?");
        assert_eq!(t.display(copy).to_string(), "'b'?");
    }
}

use std::collections::{HashMap, VecDeque};

use cranelift_entity::{entity_impl, EntityRef, PrimaryMap};

use crate::{
    error::Diagnostics,
    ir::{Node, NodeId, NodeKind, Tree},
};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleId(u32);

entity_impl!(RuleId, "rule");

/// Name of the rule that tags text captured by `<...>`.
pub const CAPTURE_RULE: &str = "PegText";

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RuleKind {
    /// Written in the grammar.
    Declared,
    /// Extracted from an action, `ActionN <- <{ action }>`.
    Action,
    /// Referenced but never declared, matches nothing.
    Undefined,
    /// Tags captured text, never called.
    Capture,
}

#[derive(Clone, Debug)]
pub struct Rule {
    pub name: String,
    /// The `Rule` node, its single child is the expression.
    pub node: NodeId,
    pub kind: RuleKind,
}

/// The rule graph: every rule in id order plus the side tables of the grammar header.
pub struct Grammar {
    pub tree: Tree,
    pub rules: PrimaryMap<RuleId, Rule>,
    pub names: HashMap<String, RuleId>,

    pub package: Option<String>,
    pub imports: Vec<String>,
    pub struct_name: String,
    pub state: String,
    /// Comment and blank line nodes, rendered into the generated header.
    pub header: Vec<NodeId>,
    /// Action nodes by action number.
    pub actions: Vec<NodeId>,
}

impl Grammar {
    /// Classifies the top-level items of `tree` and links every rule.
    pub fn new(tree: Tree, err: &Diagnostics) -> Grammar {
        let mut this = Grammar {
            tree,
            rules: PrimaryMap::new(),
            names: HashMap::new(),
            package: None,
            imports: Vec::new(),
            struct_name: "Peg".to_owned(),
            state: String::new(),
            header: Vec::new(),
            actions: Vec::new(),
        };

        for item in this.tree.items().to_vec() {
            let node = this.tree.get(item);
            match node.kind {
                NodeKind::Package => this.package = Some(node.text.clone()),
                NodeKind::Import => this.imports.push(node.text.clone()),
                NodeKind::Peg => {
                    this.struct_name = node.text.clone();
                    if let Some(state) = this.tree.front(item) {
                        this.state = this.tree.get(state).text.clone();
                    }
                }
                NodeKind::Comment | NodeKind::Space => this.header.push(item),
                NodeKind::Rule => {
                    let name = node.text.clone();
                    if this.names.contains_key(&name) {
                        err.warning(format!("rule '{name}' redefined, keeping the first definition"));
                        continue;
                    }
                    this.declare(item, name);
                }
                _ => {}
            }
        }

        this.imports.sort();
        this.imports.dedup();

        this.link();
        this
    }

    /// Registers a rule node, wrapping its expression as `<expression>` tagged with the rule.
    fn declare(&mut self, node: NodeId, name: String) {
        let id = self.rules.next_key();
        self.tree.get_mut(node).id = id.index() as u32;

        let expression = match self.tree.front(node) {
            Some(expression) => expression,
            None => self.tree.add(Node::new(NodeKind::Nil, "<nil>")),
        };
        let push = self.implicit_push(expression, &name, id);
        self.tree.get_mut(node).children = vec![push];

        self.names.insert(name.clone(), id);
        self.rules.push(Rule {
            name,
            node,
            kind: RuleKind::Declared,
        });
    }

    fn implicit_push(&mut self, expression: NodeId, name: &str, id: RuleId) -> NodeId {
        let shell = self.rule_shell(name, id);
        self.tree.add(Node::with_children(
            NodeKind::ImplicitPush,
            vec![expression, shell],
        ))
    }

    /// A childless copy of a rule node, carries the rule a token is tagged with.
    fn rule_shell(&mut self, name: &str, id: RuleId) -> NodeId {
        let mut shell = Node::new(NodeKind::Rule, name);
        shell.id = id.index() as u32;
        self.tree.add(shell)
    }

    fn synthesize(&mut self, name: String, body: NodeId, kind: RuleKind) -> RuleId {
        let id = self.rules.next_key();
        let mut node = Node::with_children(NodeKind::Rule, vec![body]);
        node.text = name.clone();
        node.id = id.index() as u32;
        let node = self.tree.add(node);

        self.names.insert(name.clone(), id);
        self.rules.push(Rule { name, node, kind })
    }

    /// Extracts actions, resolves names and attaches capture rules, until no
    /// rule is left unvisited.
    fn link(&mut self) {
        let mut queue = self.rules.keys().collect::<VecDeque<_>>();
        while let Some(rule) = queue.pop_front() {
            let node = self.rules[rule].node;
            let mut stack = self.tree.children(node).to_vec();

            while let Some(id) = stack.pop() {
                match self.tree.kind(id) {
                    NodeKind::Action => {
                        let number = self.actions.len();
                        let name = format!("Action{number}");

                        let copy = self.tree.deep_copy(id);
                        self.tree.get_mut(copy).id = number as u32;
                        self.actions.push(copy);

                        let push = self.implicit_push(copy, &name, self.rules.next_key());
                        let new = self.synthesize(name.clone(), push, RuleKind::Action);
                        queue.push_back(new);

                        let node = self.tree.get_mut(id);
                        node.kind = NodeKind::Name;
                        node.text = name;
                        node.children.clear();
                    }
                    NodeKind::Name => {
                        let name = &self.tree.get(id).text;
                        if self.names.contains_key(name) {
                            continue;
                        }
                        let name = name.clone();
                        let nil = self.tree.add(Node::new(NodeKind::Nil, "<nil>"));
                        let push = self.implicit_push(nil, &name, self.rules.next_key());
                        let new = self.synthesize(name, push, RuleKind::Undefined);
                        queue.push_back(new);
                    }
                    NodeKind::Push => {
                        let expression = self.tree.children(id)[0];
                        let capture = match self.lookup(CAPTURE_RULE) {
                            Some(capture) => capture,
                            None => {
                                let nil = self.tree.add(Node::new(NodeKind::Nil, "<nil>"));
                                let capture = self.synthesize(
                                    CAPTURE_RULE.to_owned(),
                                    nil,
                                    RuleKind::Capture,
                                );
                                queue.push_back(capture);
                                capture
                            }
                        };
                        let shell = self.rule_shell(CAPTURE_RULE, capture);
                        self.tree.get_mut(id).children = vec![expression, shell];
                        stack.push(expression);
                    }
                    NodeKind::ImplicitPush => {
                        // an already extracted action
                        let front = self.tree.children(id)[0];
                        if self.tree.kind(front) != NodeKind::Action {
                            stack.push(front);
                        }
                    }
                    NodeKind::Rule
                    | NodeKind::Alternate
                    | NodeKind::UnorderedAlternate
                    | NodeKind::Sequence
                    | NodeKind::PeekFor
                    | NodeKind::PeekNot
                    | NodeKind::Query
                    | NodeKind::Star
                    | NodeKind::Plus => {
                        // reversed so that actions are numbered in source order
                        stack.extend(self.tree.children(id).iter().rev());
                    }
                    _ => {}
                }
            }
        }
    }

    /// The first declared rule.
    pub fn start(&self) -> Option<RuleId> {
        self.rules.keys().next()
    }
    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id]
    }
    pub fn lookup(&self, name: &str) -> Option<RuleId> {
        self.names.get(name).copied()
    }
    /// The expression of a rule, usually an `ImplicitPush`.
    pub fn body(&self, id: RuleId) -> NodeId {
        self.tree.children(self.rules[id].node)[0]
    }
    /// The rule a `Name` node refers to.
    pub fn resolve(&self, name: NodeId) -> Option<RuleId> {
        self.lookup(&self.tree.get(name).text)
    }
    pub fn len(&self) -> usize {
        self.rules.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::parse_grammar;

    fn grammar(src: &str) -> Grammar {
        let err = Diagnostics::new();
        let tree = parse_grammar(src).unwrap();
        Grammar::new(tree, &err)
    }

    #[test]
    fn test_rule_table() {
        let g = grammar("A <- B 'x' { one } B\nB <- { two } <C>");

        let names = g.rules.values().map(|r| r.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, ["A", "B", "Action0", "Action1", "PegText", "C"]);

        for (id, rule) in &g.rules {
            assert_eq!(g.tree.get(rule.node).id as usize, id.index());
            assert_eq!(g.lookup(&rule.name), Some(id));
        }

        assert_eq!(g.rule(RuleId::new(2)).kind, RuleKind::Action);
        assert_eq!(g.rule(RuleId::new(4)).kind, RuleKind::Capture);
        assert_eq!(g.rule(RuleId::new(5)).kind, RuleKind::Undefined);
        assert_eq!(g.tree.get(g.actions[1]).text.trim(), "two");
    }

    #[test]
    fn test_rules_are_wrapped() {
        let g = grammar("A <- 'a' { x }");
        let a = g.start().unwrap();
        let body = g.body(a);
        assert_eq!(g.tree.kind(body), NodeKind::ImplicitPush);

        let shell = g.tree.children(body)[1];
        assert_eq!(g.tree.get(shell).text, "A");
        assert!(g.tree.children(shell).is_empty());

        assert_eq!(
            g.tree.display(g.rule(a).node).to_string(),
            "A <- <('a' Action0)>"
        );
        let action = g.lookup("Action0").unwrap();
        assert_eq!(
            g.tree.display(g.rule(action).node).to_string(),
            "Action0 <- <{ x }>"
        );
    }

    #[test]
    fn test_push_shares_capture_rule() {
        let g = grammar("A <- <'a'> <'b'>");
        let capture = g.lookup(CAPTURE_RULE).unwrap();
        assert_eq!(g.len(), 2);

        let sequence = g.tree.children(g.body(g.start().unwrap()))[0];
        for &push in g.tree.children(sequence) {
            let shell = g.tree.children(push)[1];
            assert_eq!(g.tree.get(shell).id as usize, capture.index());
        }
    }

    #[test]
    fn test_header_tables() {
        let src = "package calc\nimport \"std::fmt\"\nimport \"std::cell\"\ntype Calc Peg { depth: u32 }\nA <- 'a'\n";
        let g = grammar(src);
        assert_eq!(g.package.as_deref(), Some("calc"));
        assert_eq!(g.imports, ["std::cell", "std::fmt"]);
        assert_eq!(g.struct_name, "Calc");
        assert_eq!(g.state.trim(), "depth: u32");
    }

    #[test]
    fn test_redefinition_warns() {
        let err = Diagnostics::new();
        let tree = parse_grammar("A <- 'a'\nA <- 'b'").unwrap();
        let g = Grammar::new(tree, &err);
        assert_eq!(g.len(), 1);
        assert_eq!(err.len(), 1);
    }
}

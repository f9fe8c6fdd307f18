//! Read-only passes over the linked rule graph.

use cranelift_entity::{EntitySet, SecondaryMap};

use crate::{
    error::Diagnostic,
    grammar::{Grammar, RuleId},
    ir::{NodeId, NodeKind},
};

/// How often every rule is entered from the start rule.
pub struct Usage {
    counts: SecondaryMap<RuleId, u32>,
}

impl Usage {
    pub fn count(&self, rule: RuleId) -> u32 {
        self.counts[rule]
    }
    pub fn is_reached(&self, rule: RuleId) -> bool {
        self.counts[rule] > 0
    }
    /// Referenced exactly once, so its body may replace the call.
    pub fn is_single_use(&self, rule: RuleId) -> bool {
        self.counts[rule] == 1
    }
}

pub fn count_usage(grammar: &Grammar) -> Usage {
    let mut usage = Usage {
        counts: SecondaryMap::with_capacity(grammar.len()),
    };
    let mut reached = EntitySet::with_capacity(grammar.len());

    if let Some(start) = grammar.start() {
        count_rule(grammar, start, &mut usage, &mut reached);
    }
    usage
}

fn count_rule(grammar: &Grammar, rule: RuleId, usage: &mut Usage, reached: &mut EntitySet<RuleId>) {
    usage.counts[rule] += 1;
    if reached.contains(rule) {
        return;
    }
    reached.insert(rule);
    count_node(grammar, grammar.body(rule), usage, reached);
}

fn count_node(grammar: &Grammar, node: NodeId, usage: &mut Usage, reached: &mut EntitySet<RuleId>) {
    match grammar.tree.kind(node) {
        NodeKind::Name => {
            if let Some(rule) = grammar.resolve(node) {
                count_rule(grammar, rule, usage, reached);
            }
        }
        NodeKind::ImplicitPush | NodeKind::Push => {
            count_node(grammar, grammar.tree.children(node)[0], usage, reached);
        }
        NodeKind::Alternate
        | NodeKind::UnorderedAlternate
        | NodeKind::Sequence
        | NodeKind::PeekFor
        | NodeKind::PeekNot
        | NodeKind::Query
        | NodeKind::Star
        | NodeKind::Plus => {
            for &child in grammar.tree.children(node) {
                count_node(grammar, child, usage, reached);
            }
        }
        _ => {}
    }
}

/// Rules that can reach themselves before consuming input, in discovery order.
pub fn find_left_recursion(grammar: &Grammar) -> Vec<RuleId> {
    let mut found = Vec::new();
    let mut on_stack = SecondaryMap::with_capacity(grammar.len());

    for rule in grammar.rules.keys() {
        consumes_rule(grammar, rule, &mut on_stack, &mut found);
    }
    found
}

fn consumes_rule(
    grammar: &Grammar,
    rule: RuleId,
    on_stack: &mut SecondaryMap<RuleId, bool>,
    found: &mut Vec<RuleId>,
) -> bool {
    if on_stack[rule] {
        if !found.contains(&rule) {
            found.push(rule);
        }
        return false;
    }

    on_stack[rule] = true;
    let consumes = consumes(grammar, grammar.body(rule), on_stack, found);
    on_stack[rule] = false;
    consumes
}

/// Whether matching `node` always advances the input, as far as a structural
/// look can tell.
fn consumes(
    grammar: &Grammar,
    node: NodeId,
    on_stack: &mut SecondaryMap<RuleId, bool>,
    found: &mut Vec<RuleId>,
) -> bool {
    let tree = &grammar.tree;
    match tree.kind(node) {
        NodeKind::Alternate => tree
            .children(node)
            .iter()
            .all(|&child| consumes(grammar, child, on_stack, found)),
        NodeKind::Sequence => tree
            .children(node)
            .iter()
            .any(|&child| consumes(grammar, child, on_stack, found)),
        NodeKind::Name => match grammar.resolve(node) {
            Some(rule) => consumes_rule(grammar, rule, on_stack, found),
            None => false,
        },
        NodeKind::Plus | NodeKind::Push | NodeKind::ImplicitPush => {
            consumes(grammar, tree.children(node)[0], on_stack, found)
        }
        NodeKind::Character | NodeKind::StringLiteral => !tree.get(node).text.is_empty(),
        NodeKind::Dot | NodeKind::Range => true,
        _ => false,
    }
}

pub struct Analysis {
    pub usage: Usage,
    pub left_recursive: Vec<RuleId>,
}

impl Analysis {
    pub fn diagnostics(&self, grammar: &Grammar) -> Vec<Diagnostic> {
        self.left_recursive
            .iter()
            .map(|&rule| Diagnostic {
                message: format!(
                    "possible infinite left recursion in rule '{}'",
                    grammar.rule(rule).name
                )
                .into(),
            })
            .collect()
    }
}

fn join<T>(handle: std::thread::ScopedJoinHandle<'_, T>) -> T {
    match handle.join() {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// Runs both analyses on their own threads and waits for them.
pub fn analyze(grammar: &Grammar) -> Analysis {
    std::thread::scope(|s| {
        let usage = s.spawn(|| count_usage(grammar));
        let left_recursive = s.spawn(|| find_left_recursion(grammar));

        Analysis {
            usage: join(usage),
            left_recursive: join(left_recursive),
        }
    })
}

//! First-set computation and the switch rewrite of ordered alternates.
//!
//! Mutually recursive rules only have complete first sets once every rule has
//! been visited, so the whole graph is measured once and then walked again,
//! this time rewriting alternates with the numbers of the first walk at hand.

use std::cmp::Reverse;

use cranelift_entity::SecondaryMap;
use log::trace;

use crate::{
    grammar::{Grammar, RuleId},
    ir::{Node, NodeId, NodeKind},
    set::IntervalSet,
    END_SYMBOL,
};

/// A rewrite needs at least this many pairwise disjoint branches.
pub const MIN_SWITCH_ARMS: usize = 3;

/// What can be said about the input a node matches without running it.
#[derive(Clone, Default, Debug)]
pub struct First {
    /// Matching always advances the cursor.
    pub consumes: bool,
    /// Code points a successful match may start with.
    pub set: IntervalSet,
}

impl First {
    fn empty() -> First {
        First::default()
    }
    fn consuming(set: IntervalSet) -> First {
        First {
            consumes: true,
            set,
        }
    }
    /// The set used to compare branches. A node that may succeed without
    /// consuming accepts any next code point, including the end of input.
    pub fn effective(&self) -> IntervalSet {
        match self.consumes {
            true => self.set.clone(),
            false => IntervalSet::range(0, END_SYMBOL),
        }
    }
}

#[derive(Clone, Default)]
struct RuleCache {
    reached: bool,
    first: First,
}

pub struct Optimizer<'a> {
    grammar: &'a mut Grammar,
    cache: SecondaryMap<RuleId, RuleCache>,
    rewrite: bool,
    rewritten: usize,
}

impl<'a> Optimizer<'a> {
    pub fn new(grammar: &'a mut Grammar) -> Optimizer<'a> {
        let cache = SecondaryMap::with_capacity(grammar.len());
        Optimizer {
            grammar,
            cache,
            rewrite: false,
            rewritten: 0,
        }
    }

    /// Measures every rule reachable from the start rule, then rewrites its
    /// alternates. Returns the number of rewritten alternates.
    pub fn run(mut self) -> usize {
        let Some(start) = self.grammar.start() else {
            return 0;
        };

        self.rule(start);

        // keep the measured sets, they stand in for rules still on the stack
        for cache in self.cache.values_mut() {
            cache.reached = false;
        }
        self.rewrite = true;
        self.rule(start);

        self.rewritten
    }

    /// The cached first set of `rule`, if it was measured.
    pub fn first(&self, rule: RuleId) -> &First {
        &self.cache[rule].first
    }

    fn rule(&mut self, rule: RuleId) -> First {
        let cache = &mut self.cache[rule];
        if cache.reached {
            return cache.first.clone();
        }
        cache.reached = true;

        let body = self.grammar.body(rule);
        let first = self.node(body);
        self.cache[rule].first = first.clone();
        first
    }

    fn node(&mut self, node: NodeId) -> First {
        let tree = &self.grammar.tree;
        match tree.kind(node) {
            NodeKind::Name => match self.grammar.resolve(node) {
                Some(rule) => self.rule(rule),
                None => First::empty(),
            },
            NodeKind::Dot => {
                let set = IntervalSet::point(END_SYMBOL).complement(END_SYMBOL - 1);
                First::consuming(set)
            }
            NodeKind::Character => First::consuming(IntervalSet::point(tree.get(node).char())),
            NodeKind::StringLiteral => match tree.get(node).text.chars().next() {
                Some(c) => First::consuming(IntervalSet::point(c.into())),
                None => First::empty(),
            },
            NodeKind::Range => {
                let (lower, upper) = tree.range_bounds(node);
                First::consuming(IntervalSet::range(lower, upper))
            }
            NodeKind::Alternate => {
                let children = tree.children(node).to_vec();
                let firsts = children
                    .iter()
                    .map(|&child| self.node(child))
                    .collect::<Vec<_>>();

                let union = union(&firsts);
                if self.rewrite {
                    self.rewrite_alternate(node, &children, &firsts);
                }
                union
            }
            NodeKind::UnorderedAlternate => {
                let children = tree.children(node).to_vec();
                let firsts = children
                    .iter()
                    .map(|&child| self.node(child))
                    .collect::<Vec<_>>();
                union(&firsts)
            }
            NodeKind::Sequence => {
                let mut first = First::empty();
                for child in tree.children(node).to_vec() {
                    let next = self.node(child);
                    if !first.consumes {
                        first.set = first.set.union(&next.set);
                        first.consumes = next.consumes;
                    }
                }
                first
            }
            NodeKind::PeekFor | NodeKind::PeekNot => {
                let child = tree.children(node)[0];
                self.node(child);
                First::empty()
            }
            NodeKind::Query | NodeKind::Star => {
                let child = tree.children(node)[0];
                let set = self.node(child).set;
                First {
                    consumes: false,
                    set,
                }
            }
            NodeKind::Plus | NodeKind::Push | NodeKind::ImplicitPush => {
                let child = tree.children(node)[0];
                self.node(child)
            }
            NodeKind::Rule
            | NodeKind::Predicate
            | NodeKind::StateChange
            | NodeKind::Commit
            | NodeKind::Action
            | NodeKind::Nil
            | NodeKind::Package
            | NodeKind::Import
            | NodeKind::Peg
            | NodeKind::State
            | NodeKind::Space
            | NodeKind::Comment => First::empty(),
        }
    }

    /// Moves the branches that do not share a first code point with any later
    /// branch into an `UnorderedAlternate`, every one of them guarded by a
    /// peek of its first set. The last guarded branch becomes the default arm.
    fn rewrite_alternate(&mut self, node: NodeId, children: &[NodeId], firsts: &[First]) {
        let sets = firsts.iter().map(First::effective).collect::<Vec<_>>();

        let mut ordered = Vec::new();
        let mut unordered = Vec::new();
        for (i, (&child, set)) in children.iter().zip(&sets).enumerate() {
            let intersects = sets[i + 1..].iter().any(|later| later.intersects(set));
            match intersects {
                true => ordered.push(child),
                false => unordered.push((set.clone(), child)),
            }
        }

        if unordered.len() < MIN_SWITCH_ARMS {
            return;
        }

        let default = unordered
            .iter()
            .position(|(set, _)| set.is_empty())
            .or_else(|| {
                unordered
                    .iter()
                    .enumerate()
                    .max_by_key(|(_, (set, _))| set.len())
                    .map(|(i, _)| i)
            })
            .unwrap_or(0);
        let default = unordered.remove(default);
        unordered.sort_by_key(|(set, _)| Reverse(set.len()));
        unordered.push(default);

        let tree = &mut self.grammar.tree;
        let arms = unordered
            .iter()
            .map(|(set, branch)| {
                let class = tree.add_class(set);
                let peek = tree.add(Node::with_children(NodeKind::PeekFor, vec![class]));
                tree.add(Node::with_children(NodeKind::Sequence, vec![peek, *branch]))
            })
            .collect::<Vec<_>>();

        trace!(
            "{node}: {} ordered, {} switched branches",
            ordered.len(),
            arms.len()
        );

        match ordered.is_empty() {
            true => {
                let node = tree.get_mut(node);
                node.kind = NodeKind::UnorderedAlternate;
                node.children = arms;
            }
            false => {
                let switch = tree.add(Node::with_children(NodeKind::UnorderedAlternate, arms));
                ordered.push(switch);
                tree.get_mut(node).children = ordered;
            }
        }
        self.rewritten += 1;
    }
}

/// An alternate consumes only if every branch does.
fn union(firsts: &[First]) -> First {
    let mut first = First::consuming(IntervalSet::new());
    for next in firsts {
        first.set = first.set.union(&next.set);
        first.consumes &= next.consumes;
    }
    if firsts.is_empty() {
        first.consumes = false;
    }
    first
}

pub fn optimize(grammar: &mut Grammar) -> usize {
    Optimizer::new(grammar).run()
}

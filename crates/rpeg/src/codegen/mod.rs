//! Lowers the rule graph into matcher routines.
//!
//! Lowering runs twice with the same label numbering. The dry run only learns
//! which labels are ever jumped to, the second run uses that to leave out
//! checkpoints and branches that cannot matter.

pub mod structure;

use cranelift_bitset::CompoundBitSet;
use cranelift_entity::{EntityRef, SecondaryMap};
use log::{debug, trace};

use crate::{
    analysis::Usage,
    grammar::{Grammar, RuleId, RuleKind},
    ir::{NodeId, NodeKind},
    set::IntervalSet,
    Options, END_SYMBOL,
};

use structure::{Flow, Label, Program, Routine, Stmt};

pub struct Compiler<'a> {
    grammar: &'a Grammar,
    usage: &'a Usage,
    options: &'a Options,

    next_label: u32,
    dry: bool,
    /// Labels jumped to, filled by the dry run.
    used: CompoundBitSet,
}

impl<'a> Compiler<'a> {
    pub fn new(grammar: &'a Grammar, usage: &'a Usage, options: &'a Options) -> Compiler<'a> {
        Compiler {
            grammar,
            usage,
            options,
            next_label: 0,
            dry: false,
            used: CompoundBitSet::new(),
        }
    }

    pub fn compile(mut self) -> Program {
        self.dry = true;
        self.next_label = 0;
        self.lower_all();
        debug!("dry run used {} labels", self.used.len());

        self.dry = false;
        self.next_label = 0;
        let program = self.lower_all();
        debug!(
            "lowered {} of {} rules",
            program.routines.len(),
            self.grammar.len()
        );
        program
    }

    /// Rules that get a matcher of their own.
    fn is_emitted(&self, rule: RuleId) -> bool {
        self.usage.is_reached(rule)
            && self.grammar.rule(rule).kind != RuleKind::Undefined
            && !self.is_inlined(rule)
    }

    fn is_inlined(&self, rule: RuleId) -> bool {
        self.options.inline
            && self.usage.is_single_use(rule)
            && Some(rule) != self.grammar.start()
    }

    fn lower_all(&mut self) -> Program {
        let mut routines = Vec::new();
        let mut entries = SecondaryMap::with_capacity(self.grammar.len());

        for rule in self.grammar.rules.keys() {
            if !self.is_emitted(rule) {
                continue;
            }
            entries[rule] = Some(routines.len());
            routines.push(self.routine(rule));
        }

        Program {
            routines,
            entries,
            start: self.grammar.start(),
            labels: self.next_label,
        }
    }

    fn routine(&mut self, rule: RuleId) -> Routine {
        let fail = self.label();
        let mut body = Vec::new();
        let expression = self.grammar.body(rule);
        self.node(expression, fail, None, &mut body);
        Routine {
            rule,
            fail,
            memo: self.options.ast,
            body,
        }
    }

    fn label(&mut self) -> Label {
        let label = Label::new(self.next_label as usize);
        self.next_label += 1;
        label
    }

    /// Whether anything jumps to `label`. Everything is during the dry run.
    fn is_used(&self, label: Label) -> bool {
        self.dry || self.used.contains(label.index())
    }

    fn jump_to(&mut self, label: Label) -> Label {
        if self.dry {
            self.used.insert(label.index());
        }
        label
    }

    /// Lowers `node` into `out`, jumping to `ko` when it does not match.
    ///
    /// `known` is a set the next code point is already known to belong to.
    fn node(&mut self, node: NodeId, ko: Label, known: Option<&IntervalSet>, out: &mut Vec<Stmt>) {
        let grammar = self.grammar;
        let tree = &grammar.tree;
        let children = tree.children(node);
        match tree.kind(node) {
            NodeKind::Character => {
                let c = tree.get(node).char();
                match known.is_some_and(|known| is_within(known, c, c)) {
                    true => out.push(Stmt::Advance),
                    false => out.push(Stmt::Char {
                        c,
                        fail: self.jump_to(ko),
                    }),
                }
            }
            NodeKind::Range => {
                let (lower, upper) = tree.range_bounds(node);
                match known.is_some_and(|known| is_within(known, lower, upper)) {
                    true => out.push(Stmt::Advance),
                    false => out.push(Stmt::Range {
                        lower,
                        upper,
                        fail: self.jump_to(ko),
                    }),
                }
            }
            NodeKind::Dot => {
                match known.is_some_and(|known| is_within(known, 0, END_SYMBOL - 1)) {
                    true => out.push(Stmt::Advance),
                    false => out.push(Stmt::Dot {
                        fail: self.jump_to(ko),
                    }),
                }
            }
            NodeKind::StringLiteral => {
                let text = &tree.get(node).text;
                let mut rest = text.chars();
                let elide = match rest.next() {
                    Some(c) => known.is_some_and(|known| is_within(known, c.into(), c.into())),
                    None => return,
                };
                let text = match elide {
                    true => {
                        out.push(Stmt::Advance);
                        rest.as_str().to_owned()
                    }
                    false => text.clone(),
                };
                if !text.is_empty() {
                    out.push(Stmt::Str {
                        text,
                        fail: self.jump_to(ko),
                    });
                }
            }
            NodeKind::Sequence => {
                for (i, &child) in children.iter().enumerate() {
                    let known = if i == 0 { known } else { None };
                    self.node(child, ko, known, out);
                }
            }
            NodeKind::Alternate => self.alternate(children, ko, known, out),
            NodeKind::UnorderedAlternate => self.switch(children, ko, out),
            NodeKind::PeekFor => {
                let checkpoint = self.label();
                out.push(Stmt::Save(checkpoint));
                self.node(children[0], ko, known, out);
                out.push(Stmt::Restore(checkpoint));
            }
            NodeKind::PeekNot => {
                let ok = self.label();
                let mut body = Vec::new();
                self.node(children[0], ok, known, &mut body);
                body.push(Stmt::Jump(Flow::Break(self.jump_to(ko))));

                out.push(Stmt::Save(ok));
                out.push(Stmt::Block { label: ok, body });
                out.push(Stmt::Restore(ok));
            }
            NodeKind::Query => {
                let ok = self.label();
                let ko = self.label();
                let mut attempt = Vec::new();
                self.node(children[0], ko, known, &mut attempt);

                if !self.is_used(ko) {
                    out.extend(attempt);
                    return;
                }
                attempt.push(Stmt::Jump(Flow::Break(self.jump_to(ok))));
                out.push(Stmt::Block {
                    label: ok,
                    body: vec![
                        Stmt::Save(ko),
                        Stmt::Block {
                            label: ko,
                            body: attempt,
                        },
                        Stmt::Restore(ko),
                    ],
                });
            }
            NodeKind::Star => self.star(children[0], out),
            NodeKind::Plus => {
                self.node(children[0], ko, known, out);
                self.star(children[0], out);
            }
            NodeKind::Push | NodeKind::ImplicitPush => {
                self.push(node, ko, known, out);
            }
            NodeKind::Name => {
                let Some(rule) = grammar.resolve(node) else {
                    out.push(Stmt::Jump(Flow::Break(self.jump_to(ko))));
                    return;
                };
                if grammar.rule(rule).kind == RuleKind::Undefined {
                    out.push(Stmt::Jump(Flow::Break(self.jump_to(ko))));
                } else if self.is_inlined(rule) {
                    trace!("inlining {}", grammar.rule(rule).name);
                    self.node(grammar.body(rule), ko, known, out);
                } else {
                    out.push(Stmt::Call {
                        rule,
                        fail: self.jump_to(ko),
                    });
                }
            }
            NodeKind::Predicate => out.push(Stmt::Predicate {
                code: tree.get(node).text.clone(),
                fail: self.jump_to(ko),
            }),
            NodeKind::StateChange | NodeKind::Action => {
                out.push(Stmt::Code(tree.get(node).text.clone()));
            }
            NodeKind::Commit
            | NodeKind::Nil
            | NodeKind::Rule
            | NodeKind::Package
            | NodeKind::Import
            | NodeKind::Peg
            | NodeKind::State
            | NodeKind::Space
            | NodeKind::Comment => {}
        }
    }

    /// ```text
    /// 'ok: {
    ///     let cN = p.save();
    ///     'lN: { branch; break 'ok; }
    ///     p.restore(cN);
    ///     ...
    ///     last branch
    /// }
    /// ```
    fn alternate(
        &mut self,
        children: &[NodeId],
        ko: Label,
        known: Option<&IntervalSet>,
        out: &mut Vec<Stmt>,
    ) {
        let ok = self.label();
        let mut body = Vec::new();
        // branches after one that cannot fail are still lowered, so that
        // labels are numbered the same in both runs, but then dropped
        let mut dead = Vec::new();

        let (last, init) = match children.split_last() {
            Some(split) => split,
            None => return,
        };
        for &child in init {
            let next = self.label();
            let mut branch = Vec::new();
            self.node(child, next, known, &mut branch);
            branch.push(Stmt::Jump(Flow::Break(self.jump_to(ok))));

            let sink = match dead.is_empty() && body.last() != Some(&Stmt::Jump(Flow::Break(ok)))
            {
                true => &mut body,
                false => &mut dead,
            };
            match self.is_used(next) {
                true => {
                    sink.push(Stmt::Save(next));
                    sink.push(Stmt::Block {
                        label: next,
                        body: branch,
                    });
                    sink.push(Stmt::Restore(next));
                }
                false => sink.extend(branch),
            }
        }

        let reachable = body.last() != Some(&Stmt::Jump(Flow::Break(ok)));
        match reachable {
            true => self.node(*last, ko, known, &mut body),
            false => self.node(*last, ko, known, &mut dead),
        }

        out.push(Stmt::Block { label: ok, body });
    }

    /// ```text
    /// 'again: loop {
    ///     let cN = p.save();
    ///     'lN: { child; continue 'again; }
    ///     p.restore(cN);
    ///     break 'again;
    /// }
    /// ```
    fn star(&mut self, child: NodeId, out: &mut Vec<Stmt>) {
        let again = self.label();
        let done = self.label();

        let mut attempt = Vec::new();
        self.node(child, done, None, &mut attempt);
        attempt.push(Stmt::Jump(Flow::Continue(self.jump_to(again))));

        out.push(Stmt::Loop {
            label: again,
            body: vec![
                Stmt::Save(done),
                Stmt::Block {
                    label: done,
                    body: attempt,
                },
                Stmt::Restore(done),
                Stmt::Jump(Flow::Break(self.jump_to(again))),
            ],
        });
    }

    /// Arms are `(&class branch)` sequences, the last one is the default.
    fn switch(&mut self, children: &[NodeId], ko: Label, out: &mut Vec<Stmt>) {
        let grammar = self.grammar;
        let tree = &grammar.tree;
        let Some((default, arms)) = children.split_last() else {
            return;
        };

        let mut lowered = Vec::new();
        for &arm in arms {
            let (class, branch) = guarded_branch(grammar, arm);
            let set = tree.class_set(class).clone();

            let mut body = Vec::new();
            self.node(branch, ko, Some(&set), &mut body);
            // an empty class can never be selected
            if !set.is_empty() {
                lowered.push((set, body));
            }
        }

        let (_, branch) = guarded_branch(grammar, *default);
        let mut default = Vec::new();
        self.node(branch, ko, None, &mut default);

        out.push(Stmt::Switch {
            arms: lowered,
            default,
        });
    }

    fn push(&mut self, node: NodeId, ko: Label, known: Option<&IntervalSet>, out: &mut Vec<Stmt>) {
        let grammar = self.grammar;
        let tree = &grammar.tree;
        let (expression, shell) = match tree.children(node) {
            [expression, shell, ..] => (*expression, *shell),
            [expression] => {
                self.node(*expression, ko, known, out);
                return;
            }
            [] => return,
        };
        let rule = RuleId::new(tree.get(shell).id as usize);
        let is_action = tree.kind(expression) == NodeKind::Action;

        match (self.options.ast, tree.kind(node)) {
            // actions run later, in token order
            (true, _) if is_action => {
                let label = self.label();
                out.push(Stmt::Open(label));
                out.push(Stmt::Close { rule, label });
            }
            (true, _) => {
                let label = self.label();
                out.push(Stmt::Open(label));
                self.node(expression, ko, known, out);
                out.push(Stmt::Close { rule, label });
            }
            (false, NodeKind::Push) => {
                let label = self.label();
                out.push(Stmt::Save(label));
                self.node(expression, ko, known, out);
                out.push(Stmt::Capture(label));
            }
            (false, _) => self.node(expression, ko, known, out),
        }
    }
}

/// Splits a switch arm into its class and the guarded branch.
fn guarded_branch(grammar: &Grammar, arm: NodeId) -> (NodeId, NodeId) {
    let tree = &grammar.tree;
    match (tree.kind(arm), tree.children(arm)) {
        (NodeKind::Sequence, &[peek, branch]) if tree.kind(peek) == NodeKind::PeekFor => {
            (tree.children(peek)[0], branch)
        }
        _ => panic!("Malformed switch arm {}", tree.display(arm)),
    }
}

/// Whether every code point of the non-empty `known` lies in `[lower, upper]`.
fn is_within(known: &IntervalSet, lower: u32, upper: u32) -> bool {
    !known.is_empty() && known.is_subset(&IntervalSet::range(lower, upper))
}

/// Runs both lowering passes.
pub fn compile(grammar: &Grammar, usage: &Usage, options: &Options) -> Program {
    Compiler::new(grammar, usage, options).compile()
}

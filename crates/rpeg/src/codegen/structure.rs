//! Target independent shape of the emitted matchers.
//!
//! Every failure edge is a labeled `break`, every retry a labeled `continue`,
//! so the same statements can be printed as Rust or run by the interpreter.

use std::fmt::Write;

use cranelift_entity::{entity_impl, EntitySet, SecondaryMap};

use crate::{grammar::RuleId, set::IntervalSet};

/// Names a block, a loop or the checkpoint saved right before it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(u32);

entity_impl!(Label, "l");

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Flow {
    Break(Label),
    Continue(Label),
}

impl Flow {
    pub fn label(self) -> Label {
        match self {
            Flow::Break(label) | Flow::Continue(label) => label,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Stmt {
    /// `let cN = p.save()`
    Save(Label),
    /// `p.restore(cN)`
    Restore(Label),
    /// `let cN = p.open()`
    Open(Label),
    /// `p.close(rule, cN)`
    Close { rule: RuleId, label: Label },
    /// `p.capture(cN)`
    Capture(Label),
    /// Skips a code point already known to match.
    Advance,
    Char { c: u32, fail: Label },
    Range { lower: u32, upper: u32, fail: Label },
    Dot { fail: Label },
    Str { text: String, fail: Label },
    Call { rule: RuleId, fail: Label },
    /// Host boolean expression, failing when false.
    Predicate { code: String, fail: Label },
    /// Host statements.
    Code(String),
    Jump(Flow),
    Block { label: Label, body: Vec<Stmt> },
    Loop { label: Label, body: Vec<Stmt> },
    /// Dispatch on the next code point, arms are pairwise disjoint.
    Switch {
        arms: Vec<(IntervalSet, Vec<Stmt>)>,
        default: Vec<Stmt>,
    },
}

impl Stmt {
    /// The label this statement may jump to.
    pub fn target(&self) -> Option<Label> {
        match *self {
            Stmt::Char { fail, .. }
            | Stmt::Range { fail, .. }
            | Stmt::Dot { fail }
            | Stmt::Str { fail, .. }
            | Stmt::Call { fail, .. }
            | Stmt::Predicate { fail, .. } => Some(fail),
            Stmt::Jump(flow) => Some(flow.label()),
            _ => None,
        }
    }
}

/// The matcher of one rule.
pub struct Routine {
    pub rule: RuleId,
    /// Breaking out of the body fails the rule.
    pub fail: Label,
    /// Consult and fill the memoization table.
    pub memo: bool,
    pub body: Vec<Stmt>,
}

impl Routine {
    /// Whether the failure tail can be reached at all.
    pub fn can_fail(&self, used: &EntitySet<Label>) -> bool {
        used.contains(self.fail)
    }
}

pub struct Program {
    /// Routines in rule id order.
    pub routines: Vec<Routine>,
    /// Index into `routines`, `None` for rules without a matcher.
    pub entries: SecondaryMap<RuleId, Option<usize>>,
    pub start: Option<RuleId>,
    pub labels: u32,
}

impl Program {
    pub fn routine(&self, rule: RuleId) -> Option<&Routine> {
        self.entries[rule].map(|index| &self.routines[index])
    }
    pub fn has_routine(&self, rule: RuleId) -> bool {
        self.entries[rule].is_some()
    }
}

/// Collects every label some statement jumps to.
pub fn mark_used_labels(statements: &[Stmt], used: &mut EntitySet<Label>) {
    for statement in statements {
        if let Some(label) = statement.target() {
            used.insert(label);
        }
        match statement {
            Stmt::Block { body, .. } | Stmt::Loop { body, .. } => mark_used_labels(body, used),
            Stmt::Switch { arms, default } => {
                for (_, body) in arms {
                    mark_used_labels(body, used);
                }
                mark_used_labels(default, used);
            }
            _ => {}
        }
    }
}

/// Debug listing, one statement per line.
#[allow(unused_must_use)]
pub fn display_statements(buf: &mut dyn Write, statements: &[Stmt], indent: usize) {
    for statement in statements {
        write!(buf, "{:width$}", "", width = indent * 4);
        match statement {
            Stmt::Save(l) => writeln!(buf, "save {l}"),
            Stmt::Restore(l) => writeln!(buf, "restore {l}"),
            Stmt::Open(l) => writeln!(buf, "open {l}"),
            Stmt::Close { rule, label } => writeln!(buf, "close {rule} {label}"),
            Stmt::Capture(l) => writeln!(buf, "capture {l}"),
            Stmt::Advance => writeln!(buf, "advance"),
            Stmt::Char { c, fail } => writeln!(buf, "char {c:#x} else {fail}"),
            Stmt::Range { lower, upper, fail } => {
                writeln!(buf, "range {lower:#x}..={upper:#x} else {fail}")
            }
            Stmt::Dot { fail } => writeln!(buf, "dot else {fail}"),
            Stmt::Str { text, fail } => writeln!(buf, "str {text:?} else {fail}"),
            Stmt::Call { rule, fail } => writeln!(buf, "call {rule} else {fail}"),
            Stmt::Predicate { code, fail } => writeln!(buf, "predicate {{{code}}} else {fail}"),
            Stmt::Code(code) => writeln!(buf, "code {{{code}}}"),
            Stmt::Jump(Flow::Break(l)) => writeln!(buf, "break {l}"),
            Stmt::Jump(Flow::Continue(l)) => writeln!(buf, "continue {l}"),
            Stmt::Block { label, body } => {
                writeln!(buf, "block {label}");
                display_statements(buf, body, indent + 1);
                Ok(())
            }
            Stmt::Loop { label, body } => {
                writeln!(buf, "loop {label}");
                display_statements(buf, body, indent + 1);
                Ok(())
            }
            Stmt::Switch { arms, default } => {
                writeln!(buf, "switch");
                for (set, body) in arms {
                    writeln!(buf, "{:width$}{set:?}", "", width = indent * 4 + 2);
                    display_statements(buf, body, indent + 1);
                }
                writeln!(buf, "{:width$}default", "", width = indent * 4 + 2);
                display_statements(buf, default, indent + 1);
                Ok(())
            }
        };
    }
}

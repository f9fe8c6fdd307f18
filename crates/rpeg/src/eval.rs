//! Runs lowered routines directly against a [`Parser`].
//!
//! Host code has no meaning here: predicates hold and actions are skipped.
//! Everything else behaves exactly like the rendered Rust, which makes the
//! interpreter the reference for checking grammars and rewrites.

use cranelift_entity::{EntityRef, SecondaryMap};
use rpeg_runtime::{Checkpoint, Parser};

use crate::{
    codegen::structure::{Flow, Label, Program, Stmt},
    grammar::RuleId,
};

/// How a statement left.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Signal {
    Next,
    Jump(Flow),
}

/// Checkpoints of one routine activation.
type Frame = SecondaryMap<Label, Option<Checkpoint>>;

pub struct Interpreter<'a> {
    program: &'a Program,
}

impl<'a> Interpreter<'a> {
    pub fn new(program: &'a Program) -> Interpreter<'a> {
        Interpreter { program }
    }

    /// Matches the start rule from the beginning of the input.
    pub fn parse(&self, p: &mut Parser) -> bool {
        p.reset();
        match self.program.start {
            Some(start) => self.call(p, start),
            None => false,
        }
    }

    /// Attempts `rule` at the current position, restoring it on failure.
    /// Rules without a routine never match.
    pub fn call(&self, p: &mut Parser, rule: RuleId) -> bool {
        let Some(routine) = self.program.routine(rule) else {
            return false;
        };
        let id = rule.index() as u32;

        if routine.memo {
            if let Some(matched) = p.memoized(id) {
                return matched;
            }
        }

        let begin = p.save();
        let mut frame = Frame::new();
        match self.block(p, &mut frame, &routine.body) {
            Signal::Next => {
                if routine.memo {
                    p.memoize(id, begin, true);
                }
                true
            }
            Signal::Jump(Flow::Break(label)) if label == routine.fail => {
                if routine.memo {
                    p.memoize(id, begin, false);
                }
                p.fail(id, begin);
                p.restore(begin);
                false
            }
            Signal::Jump(flow) => unreachable!("{flow:?} escaped the routine of {rule}"),
        }
    }

    fn block(&self, p: &mut Parser, frame: &mut Frame, statements: &[Stmt]) -> Signal {
        for statement in statements {
            let signal = self.statement(p, frame, statement);
            if signal != Signal::Next {
                return signal;
            }
        }
        Signal::Next
    }

    fn statement(&self, p: &mut Parser, frame: &mut Frame, statement: &Stmt) -> Signal {
        let check = |matched: bool, fail: Label| match matched {
            true => Signal::Next,
            false => Signal::Jump(Flow::Break(fail)),
        };
        let checkpoint = |frame: &Frame, label: Label| {
            frame[label].expect("Checkpoint is restored before it was saved")
        };

        match statement {
            Stmt::Save(label) => frame[*label] = Some(p.save()),
            Stmt::Restore(label) => p.restore(checkpoint(frame, *label)),
            Stmt::Open(label) => frame[*label] = Some(p.open()),
            Stmt::Close { rule, label } => {
                p.close(rule.index() as u32, checkpoint(frame, *label));
            }
            Stmt::Capture(label) => p.capture(checkpoint(frame, *label)),
            Stmt::Advance => p.advance(),
            Stmt::Char { c, fail } => return check(p.match_char(*c), *fail),
            Stmt::Range { lower, upper, fail } => {
                return check(p.match_range(*lower, *upper), *fail)
            }
            Stmt::Dot { fail } => return check(p.match_dot(), *fail),
            Stmt::Str { text, fail } => return check(p.match_str(text), *fail),
            Stmt::Call { rule, fail } => return check(self.call(p, *rule), *fail),
            Stmt::Predicate { .. } | Stmt::Code(_) => {}
            Stmt::Jump(flow) => return Signal::Jump(*flow),
            Stmt::Block { label, body } => {
                return match self.block(p, frame, body) {
                    Signal::Jump(Flow::Break(target)) if target == *label => Signal::Next,
                    signal => signal,
                };
            }
            Stmt::Loop { label, body } => loop {
                match self.block(p, frame, body) {
                    Signal::Next => {}
                    Signal::Jump(Flow::Continue(target)) if target == *label => {}
                    Signal::Jump(Flow::Break(target)) if target == *label => return Signal::Next,
                    signal => return signal,
                }
            },
            Stmt::Switch { arms, default } => {
                let c = p.peek();
                let body = arms
                    .iter()
                    .find(|(set, _)| set.has(c))
                    .map_or(default, |(_, body)| body);
                return self.block(p, frame, body);
            }
        }
        Signal::Next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{build, Options};
    use pretty_assertions::assert_eq;
    use rpeg_runtime::ParserOptions;

    fn accepts(src: &str, options: &Options, inputs: &[(&str, bool)]) {
        let compiled = build(src, options).unwrap();
        let interpreter = Interpreter::new(&compiled.program);
        for &(input, expected) in inputs {
            let mut p = Parser::new(input, ParserOptions::default());
            assert_eq!(interpreter.parse(&mut p), expected, "{src:?} on {input:?}");
        }
    }

    #[test]
    fn test_end_of_input() {
        let inputs = [("", true), ("a", false), (" ", false)];
        accepts("Grammar <- !.", &Options::default(), &inputs);
    }

    #[test]
    fn test_octal_escape() {
        let src = "Octal <- [0-3][0-7][0-7] !.";
        let inputs = [("177", true), ("000", true), ("800", false), ("17", false), ("1777", false)];
        accepts(src, &Options::default(), &inputs);
    }

    #[test]
    fn test_switched_alternate() {
        let src = "A <- ('ab' / 'b' / [c-e] / 'z'+)? !.";
        let inputs = [("ab", true), ("b", true), ("d", true), ("", true), ("zz", true), ("a", false), ("bz", false)];
        for switch in [false, true] {
            let options = Options {
                switch,
                ..Options::default()
            };
            accepts(src, &options, &inputs);
        }
    }

    #[test]
    fn test_switch_default_at_end_of_input() {
        // the arms that may match nothing must also be taken at the end
        let src = "A <- 'a' / 'b' / 'c'? / [z-a] / [y-b]";
        let inputs = [("", true), ("a", true), ("b", true), ("c", true), ("x", true)];
        for switch in [false, true] {
            let options = Options {
                switch,
                ..Options::default()
            };
            accepts(src, &options, &inputs);
        }
    }

    #[test]
    fn test_ordered_choice_commits() {
        // PEG choice is not backtracked once a branch succeeds
        let inputs = [("a", true), ("ab", false)];
        accepts("A <- ('a' / 'a' 'b') !.", &Options::default(), &inputs);
    }

    #[test]
    fn test_undefined_rule_never_matches() {
        let inputs = [("x", true), ("y", false)];
        accepts("A <- Missing / 'x'", &Options::default(), &inputs);
    }

    #[test]
    fn test_token_tree() {
        let compiled = build("List <- Item (',' Item)*\nItem <- <[a-z]+>", &Options::default()).unwrap();
        let interpreter = Interpreter::new(&compiled.program);

        let mut p = Parser::new("ab,c", ParserOptions::default());
        assert!(interpreter.parse(&mut p));

        let names = compiled.rule_names();
        assert_eq!(
            p.print_tree(&names),
            "List \"ab,c\"\n  Item \"ab\"\n    PegText \"ab\"\n  Item \"c\"\n    PegText \"c\"\n"
        );
    }

    #[test]
    fn test_memoized_backtracking() {
        let src = "A <- B 'x' / B 'y'\nB <- 'b'+";
        let compiled = build(src, &Options::default()).unwrap();
        let interpreter = Interpreter::new(&compiled.program);
        let names = compiled.rule_names();

        let mut trees = Vec::new();
        for memoize in [false, true] {
            let options = ParserOptions {
                memoize,
                ..ParserOptions::default()
            };
            let mut p = Parser::new("bby", options);
            assert!(interpreter.parse(&mut p));
            trees.push(p.print_tree(&names));
        }
        assert_eq!(trees[0], "A \"bby\"\n  B \"bb\"\n");
        assert_eq!(trees[0], trees[1]);
    }

    #[test]
    fn test_failure_is_reported() {
        let src = "Line <- Word (' ' Word)* !.\nWord <- [a-z]+";
        let compiled = build(src, &Options::default()).unwrap();
        let interpreter = Interpreter::new(&compiled.program);

        let mut p = Parser::new("ab cd9", ParserOptions::default());
        assert!(!interpreter.parse(&mut p));
        let error = p.error(&["Line", "Word"]);
        assert_eq!(error.rule.as_deref(), Some("Line"));
        assert_eq!(error.end.character, 5);
    }
}

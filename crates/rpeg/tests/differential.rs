//! Rewrites must not change what a grammar accepts. Random grammars are run
//! through the interpreter with every optimization toggled and compared
//! against the plain lowering. Rules call later rules freely and any rule,
//! themselves included, after consuming a character, so grammars recurse but
//! never without input.

use std::fmt::Write;

use proptest::prelude::*;
use rpeg::{build, eval::Interpreter, Options};
use rpeg_runtime::{Parser, ParserOptions, Token};

#[derive(Clone, Debug)]
enum Expr {
    Char(char),
    Str(String),
    Range(char, char),
    Dot,
    /// Offset to a later rule.
    Name(usize),
    /// A character, then any rule.
    Guarded(char, usize),
    Seq(Vec<Expr>),
    Alt(Vec<Expr>),
    Star(Box<Expr>),
    Plus(Box<Expr>),
    Query(Box<Expr>),
    And(Box<Expr>),
    Not(Box<Expr>),
    Push(Box<Expr>),
}

impl Expr {
    fn write(&self, out: &mut String, rule: usize, rules: usize) {
        let list = |out: &mut String, items: &[Expr], separator: &str| {
            out.push('(');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(separator);
                }
                item.write(out, rule, rules);
            }
            out.push(')');
        };
        let wrapped = |out: &mut String, prefix: &str, inner: &Expr, suffix: &str| {
            out.push_str(prefix);
            out.push('(');
            inner.write(out, rule, rules);
            out.push(')');
            out.push_str(suffix);
        };
        match self {
            Expr::Char(c) => _ = write!(out, "'{c}'"),
            Expr::Str(s) => _ = write!(out, "'{s}'"),
            Expr::Range(lower, upper) => _ = write!(out, "[{lower}-{upper}]"),
            Expr::Dot => out.push('.'),
            Expr::Name(offset) => match rule + 1 + offset {
                target if target < rules => _ = write!(out, "R{target}"),
                _ => out.push_str("'a'"),
            },
            Expr::Guarded(c, target) => _ = write!(out, "('{c}' R{})", target % rules),
            Expr::Seq(items) => list(out, items, " "),
            Expr::Alt(items) => list(out, items, " / "),
            Expr::Star(inner) => wrapped(out, "", inner, "*"),
            Expr::Plus(inner) => wrapped(out, "", inner, "+"),
            Expr::Query(inner) => wrapped(out, "", inner, "?"),
            Expr::And(inner) => wrapped(out, "&", inner, ""),
            Expr::Not(inner) => wrapped(out, "!", inner, ""),
            Expr::Push(inner) => wrapped(out, "<", inner, ">"),
        }
    }
}

fn grammar_text(rules: &[Expr]) -> String {
    let mut out = String::new();
    for (i, rule) in rules.iter().enumerate() {
        _ = write!(out, "R{i} <- ");
        rule.write(&mut out, i, rules.len());
        out.push('\n');
    }
    out
}

/// Expressions that always consume when they match, safe to repeat.
fn terminal() -> impl Strategy<Value = Expr> {
    prop_oneof![
        prop::sample::select(vec!['a', 'b', 'c', 'd']).prop_map(Expr::Char),
        "[abcd]{2,3}".prop_map(Expr::Str),
        (0..4u8, 0..4u8).prop_map(|(x, y)| {
            let lower = (b'a' + x.min(y)) as char;
            let upper = (b'a' + x.max(y)) as char;
            Expr::Range(lower, upper)
        }),
        Just(Expr::Dot),
    ]
}

fn expression() -> impl Strategy<Value = Expr> {
    let guarded = (prop::sample::select(vec!['a', 'b', 'c']), 0..4usize)
        .prop_map(|(c, target)| Expr::Guarded(c, target));
    let leaf = prop_oneof![
        4 => terminal(),
        1 => (0..3usize).prop_map(Expr::Name),
        1 => guarded,
    ];
    leaf.prop_recursive(3, 32, 5, |inner| {
        prop_oneof![
            1 => prop::collection::vec(inner.clone(), 2..4).prop_map(Expr::Seq),
            3 => prop::collection::vec(inner.clone(), 2..6).prop_map(Expr::Alt),
            1 => terminal().prop_map(|t| Expr::Star(Box::new(t))),
            1 => terminal().prop_map(|t| Expr::Plus(Box::new(t))),
            1 => inner.clone().prop_map(|e| Expr::Query(Box::new(e))),
            1 => inner.clone().prop_map(|e| Expr::And(Box::new(e))),
            1 => inner.clone().prop_map(|e| Expr::Not(Box::new(e))),
            1 => inner.prop_map(|e| Expr::Push(Box::new(e))),
        ]
    })
}

fn parser(input: &str, memoize: bool) -> Parser {
    let options = ParserOptions {
        memoize,
        ..ParserOptions::default()
    };
    Parser::new(input, options)
}

/// Whether each input matched, and how far.
fn outcomes(src: &str, options: &Options, inputs: &[String]) -> Vec<(bool, u32)> {
    let compiled = build(src, options).unwrap();
    let interpreter = Interpreter::new(&compiled.program);
    inputs
        .iter()
        .map(|input| {
            let mut p = parser(input, false);
            let matched = interpreter.parse(&mut p);
            (matched, p.position())
        })
        .collect()
}

/// The outcome and the recorded tokens of each input.
fn tokens(
    src: &str,
    options: &Options,
    memoize: bool,
    inputs: &[String],
) -> Vec<(bool, u32, Vec<Token>)> {
    let compiled = build(src, options).unwrap();
    let interpreter = Interpreter::new(&compiled.program);
    inputs
        .iter()
        .map(|input| {
            let mut p = parser(input, memoize);
            let matched = interpreter.parse(&mut p);
            (matched, p.position(), p.tokens().to_vec())
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn rewrites_preserve_language(
        rules in prop::collection::vec(expression(), 1..4),
        inputs in prop::collection::vec("[abcde]{0,6}", 12),
    ) {
        let src = grammar_text(&rules);
        let plain = Options { ast: false, ..Options::default() };
        let expected = outcomes(&src, &plain, &inputs);

        for (inline, switch) in [(true, false), (false, true), (true, true)] {
            let options = Options { inline, switch, ..plain.clone() };
            let actual = outcomes(&src, &options, &inputs);
            prop_assert_eq!(&actual, &expected, "inline {} switch {}\n{}", inline, switch, src);
        }
    }

    #[test]
    fn rewrites_and_memoization_preserve_tokens(
        rules in prop::collection::vec(expression(), 1..4),
        inputs in prop::collection::vec("[abcde]{0,6}", 8),
    ) {
        let src = grammar_text(&rules);
        let expected = tokens(&src, &Options::default(), false, &inputs);

        for (inline, switch, memoize) in [
            (false, false, true),
            (false, true, false),
            (false, true, true),
            (true, false, false),
            (true, true, true),
        ] {
            let options = Options { inline, switch, ..Options::default() };
            let actual = tokens(&src, &options, memoize, &inputs);
            prop_assert_eq!(
                &actual, &expected,
                "inline {} switch {} memoize {}\n{}", inline, switch, memoize, src
            );
        }
    }
}

#[test]
fn test_grammar_text() {
    let rules = [
        Expr::Seq(vec![Expr::Name(0), Expr::Star(Box::new(Expr::Range('a', 'c')))]),
        Expr::Alt(vec![
            Expr::Str("ab".to_owned()),
            Expr::Not(Box::new(Expr::Dot)),
            Expr::Name(0),
            Expr::Guarded('c', 5),
        ]),
    ];
    assert_eq!(
        grammar_text(&rules),
        "R0 <- (R1 ([a-c])*)\nR1 <- ('ab' / !(.) / 'a' / ('c' R1))\n"
    );
}

use pretty_assertions::assert_eq;
use rpeg::{build, eval::Interpreter, Options};
use rpeg_fixtures::{
    calculator_ast, calculator_noast, calculator_optimized, end_ast, end_noast, end_optimized,
};
use rpeg_runtime::{ParseError, Parser, ParserOptions};

const CALCULATOR: &str = include_str!("../grammars/calculator.peg");

type Calculated = Result<(Vec<i64>, u32), ParseError>;

fn with_ast(input: &str) -> Calculated {
    let mut p = calculator_ast::parser(input);
    let mut calculator = calculator_ast::Calculator::default();
    calculator.parse(&mut p)?;
    // nothing runs before the input is known to match
    assert!(calculator.stack.is_empty());
    calculator.execute(&mut p);
    Ok((calculator.stack, calculator.ops))
}

fn without_ast(input: &str) -> Calculated {
    let mut p = calculator_noast::parser(input);
    let mut calculator = calculator_noast::Calculator::default();
    calculator.parse(&mut p)?;
    Ok((calculator.stack, calculator.ops))
}

fn optimized(input: &str) -> Calculated {
    let mut p = calculator_optimized::parser(input);
    let mut calculator = calculator_optimized::Calculator::default();
    calculator.parse(&mut p)?;
    calculator.execute(&mut p);
    Ok((calculator.stack, calculator.ops))
}

#[test]
fn test_calculator() {
    let cases = [
        ("1 + 2*(3 - 4)", -1, 3),
        (" 42 ", 42, 0),
        ("8 / 2 / 2", 2, 2),
        ("2 * 3 + 4 * 5", 26, 3),
        ("((7))", 7, 0),
        ("10 - 2 - 3", 5, 2),
    ];
    for flavour in [with_ast, without_ast, optimized] {
        for (input, value, ops) in cases {
            assert_eq!(flavour(input), Ok((vec![value], ops)), "{input:?}");
        }
    }
}

#[test]
fn test_calculator_rejects() {
    for flavour in [with_ast, without_ast, optimized] {
        for input in ["(1", "1 +", "", "1 2", "+1"] {
            assert!(flavour(input).is_err(), "{input:?}");
        }
    }

    let error = with_ast("1 + x").unwrap_err();
    assert_eq!(error.begin.line, 0);
    assert!(error.to_string().starts_with("parse error near "), "{error}");
}

#[test]
fn test_end_of_input() {
    for (input, expected) in [("", true), ("x", false), ("\n", false)] {
        let mut p = end_ast::parser(input);
        assert_eq!(end_ast::Peg::default().parse(&mut p).is_ok(), expected);

        let mut p = end_noast::parser(input);
        assert_eq!(end_noast::Peg::default().parse(&mut p).is_ok(), expected);

        let mut p = end_optimized::parser(input);
        assert_eq!(end_optimized::Peg::default().parse(&mut p).is_ok(), expected);
    }
}

#[test]
fn test_rule_tables() {
    use calculator_ast::{Rule, RULES, RULE_NAMES};

    let names = Rule::ALL.iter().map(|rule| rule.name()).collect::<Vec<_>>();
    assert_eq!(names, RULE_NAMES);
    assert_eq!(Rule::Sum.name(), "Sum");
    assert_eq!(Rule::ALL[Rule::Value as usize], Rule::Value);
    assert!(RULES.iter().all(Option::is_some));

    // rules called once are inlined into their caller
    use calculator_optimized::{Rule as Optimized, RULES as OPTIMIZED};
    assert!(OPTIMIZED[Optimized::Expr as usize].is_some());
    assert!(OPTIMIZED[Optimized::Spacing as usize].is_some());
    assert!(OPTIMIZED.iter().any(Option::is_none));
}

/// Token tree of the interpreter on `input`, for comparison with the
/// generated parser built with the same options.
fn interpreted_tree(options: &Options, input: &str) -> String {
    let compiled = build(CALCULATOR, options).unwrap();
    let parser_options = ParserOptions {
        memoize: true,
        ..ParserOptions::default()
    };
    let mut p = Parser::new(input, parser_options);
    assert!(Interpreter::new(&compiled.program).parse(&mut p));
    p.print_tree(&compiled.rule_names())
}

#[test]
fn test_tokens_agree_with_interpreter() {
    let optimized_options = Options {
        inline: true,
        switch: true,
        ..Options::default()
    };

    for input in ["1 + 2*(3 - 4)", "7", " (1)/2 "] {
        let mut p = calculator_ast::parser(input);
        calculator_ast::Calculator::default().parse(&mut p).unwrap();
        assert_eq!(
            p.print_tree(&calculator_ast::RULE_NAMES),
            interpreted_tree(&Options::default(), input)
        );

        let mut p = calculator_optimized::parser(input);
        calculator_optimized::Calculator::default()
            .parse(&mut p)
            .unwrap();
        assert_eq!(
            p.print_tree(&calculator_optimized::RULE_NAMES),
            interpreted_tree(&optimized_options, input)
        );
    }
}

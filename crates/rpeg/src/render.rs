//! Prints a lowered [`Program`] as a Rust module.

use std::{borrow::Cow, collections::HashSet, fmt::Write};

use cranelift_entity::{EntityRef, EntitySet, SecondaryMap};
use log::debug;

use crate::{
    codegen::structure::{mark_used_labels, Flow, Label, Program, Routine, Stmt},
    error::CompileError,
    grammar::{Grammar, RuleId, RuleKind},
    ir::NodeKind,
    set::IntervalSet,
    Options,
};

/// Rust keywords, usable as identifiers only in their raw form.
const KEYWORDS: &[&str] = &[
    "abstract", "as", "async", "await", "become", "box", "break", "const", "continue", "do",
    "dyn", "else", "enum", "extern", "false", "final", "fn", "for", "gen", "if", "impl", "in",
    "let", "loop", "macro", "match", "mod", "move", "mut", "override", "priv", "pub", "ref",
    "return", "static", "struct", "trait", "true", "try", "type", "typeof", "unsafe", "unsized",
    "use", "virtual", "where", "while", "yield",
];

/// A rule name as a `Rule` variant.
fn variant_name(name: &str) -> Cow<'_, str> {
    match name {
        // `ALL` is taken by the associated constant
        "self" | "Self" | "super" | "crate" | "_" | "ALL" => format!("{name}_").into(),
        _ if KEYWORDS.contains(&name) => format!("r#{name}").into(),
        _ => name.into(),
    }
}

/// The `Rule` variant of every rule. Renamed rules get more underscores
/// until they clash with no other rule.
fn variant_names(grammar: &Grammar) -> SecondaryMap<RuleId, String> {
    let mut taken = grammar
        .rules
        .values()
        .map(|r| r.name.clone())
        .collect::<HashSet<_>>();

    let mut variants = SecondaryMap::new();
    for (rule, data) in &grammar.rules {
        variants[rule] = match variant_name(&data.name) {
            Cow::Borrowed(name) => name.to_owned(),
            Cow::Owned(mut name) => {
                while taken.contains(&name) {
                    name.push('_');
                }
                taken.insert(name.clone());
                name
            }
        };
    }
    variants
}

/// Host code as a statement.
fn code_block(code: &str) -> String {
    let code = code.trim().trim_end_matches(';').trim_end();
    match code.is_empty() {
        true => "{}".to_owned(),
        false => format!("{{ {code}; }}"),
    }
}

struct Checkpoint(Label);

impl std::fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "c{}", self.0.index())
    }
}

struct RustRenderer<'a> {
    grammar: &'a Grammar,
    program: &'a Program,
    options: &'a Options,
    used: EntitySet<Label>,
    variants: SecondaryMap<RuleId, String>,
    out: String,
}

impl RustRenderer<'_> {
    fn rule_function(&self, rule: RuleId) -> String {
        format!("rule_{}", self.grammar.rule(rule).name)
    }

    fn file(&mut self) -> std::fmt::Result {
        let grammar = self.grammar;
        let count = grammar.len();
        let state = &grammar.struct_name;

        writeln!(
            self.out,
            "use rpeg_runtime::{{Matcher, ParseError, Parser, ParserOptions}};"
        )?;
        for import in &grammar.imports {
            writeln!(self.out, "use {import};")?;
        }

        writeln!(self.out, "#[derive(Clone, Copy, PartialEq, Eq, Debug)]")?;
        writeln!(self.out, "#[allow(non_camel_case_types)]")?;
        writeln!(self.out, "#[repr(u32)]")?;
        writeln!(self.out, "pub enum Rule {{")?;
        for rule in grammar.rules.keys() {
            writeln!(self.out, "{},", self.variants[rule])?;
        }
        writeln!(self.out, "}}")?;

        writeln!(self.out, "impl Rule {{")?;
        write!(self.out, "pub const ALL: [Rule; {count}] = [")?;
        for rule in grammar.rules.keys() {
            write!(self.out, "Rule::{}, ", self.variants[rule])?;
        }
        writeln!(self.out, "];")?;
        writeln!(
            self.out,
            "pub fn name(self) -> &'static str {{ RULE_NAMES[self as usize] }}"
        )?;
        writeln!(self.out, "}}")?;

        write!(self.out, "pub const RULE_NAMES: [&str; {count}] = [")?;
        for rule in grammar.rules.values() {
            write!(self.out, "{:?}, ", rule.name)?;
        }
        writeln!(self.out, "];")?;

        writeln!(self.out, "#[derive(Default)]")?;
        writeln!(self.out, "pub struct {state} {{{}}}", grammar.state)?;

        writeln!(
            self.out,
            "pub fn parser(input: &str) -> Parser {{ Parser::new(input, ParserOptions {{ memoize: {}, ..ParserOptions::default() }}) }}",
            self.options.ast
        )?;

        self.methods()?;

        write!(self.out, "pub const RULES: [Option<Matcher<{state}>>; {count}] = [")?;
        for rule in grammar.rules.keys() {
            match self.program.has_routine(rule) {
                true => write!(
                    self.out,
                    "Some({} as Matcher<{state}>), ",
                    self.rule_function(rule)
                )?,
                false => write!(self.out, "None, ")?,
            }
        }
        writeln!(self.out, "];")?;

        for routine in &self.program.routines {
            self.routine(routine)?;
        }
        Ok(())
    }

    fn methods(&mut self) -> std::fmt::Result {
        let grammar = self.grammar;
        writeln!(self.out, "impl {} {{", grammar.struct_name)?;

        writeln!(
            self.out,
            "pub fn parse(&mut self, p: &mut Parser) -> Result<(), ParseError> {{"
        )?;
        writeln!(self.out, "p.reset();")?;
        if let Some(start) = self.program.start {
            writeln!(
                self.out,
                "if {}(p, self) {{ return Ok(()); }}",
                self.rule_function(start)
            )?;
        }
        writeln!(self.out, "Err(p.error(&RULE_NAMES))")?;
        writeln!(self.out, "}}")?;

        if self.options.ast {
            writeln!(self.out, "#[allow(unused_variables, unreachable_patterns)]")?;
            writeln!(self.out, "pub fn execute(&mut self, p: &mut Parser) {{")?;
            writeln!(self.out, "let s = self;")?;
            writeln!(self.out, "for token in p.tokens().to_vec() {{")?;
            writeln!(self.out, "match Rule::ALL[token.rule as usize] {{")?;
            for (rule, data) in grammar.rules.iter() {
                match data.kind {
                    RuleKind::Capture => writeln!(
                        self.out,
                        "Rule::{} => p.text = p.token_text(token),",
                        self.variants[rule]
                    )?,
                    RuleKind::Action => {
                        let body = grammar.tree.children(grammar.body(rule))[0];
                        if grammar.tree.kind(body) == NodeKind::Action {
                            writeln!(
                                self.out,
                                "Rule::{} => {}",
                                self.variants[rule],
                                code_block(&grammar.tree.get(body).text)
                            )?;
                        }
                    }
                    _ => {}
                }
            }
            writeln!(self.out, "_ => {{}}")?;
            writeln!(self.out, "}}\n}}\n}}")?;
        }

        writeln!(self.out, "}}")
    }

    fn routine(&mut self, routine: &Routine) -> std::fmt::Result {
        let grammar = self.grammar;
        let rule = routine.rule;
        let id = rule.index();
        let fail = routine.fail;
        let checkpoint = Checkpoint(fail);
        let can_fail = routine.can_fail(&self.used);

        let pretty = grammar
            .tree
            .display(grammar.rule(rule).node)
            .to_string()
            .replace(['\n', '\r'], " ");
        writeln!(self.out, "/// {id} {pretty}")?;
        writeln!(
            self.out,
            "#[allow(non_snake_case, unused_variables, unused_mut, unreachable_code, unused_labels)]"
        )?;
        writeln!(
            self.out,
            "fn {}(p: &mut Parser, s: &mut {}) -> bool {{",
            self.rule_function(rule),
            grammar.struct_name
        )?;

        if routine.memo {
            writeln!(
                self.out,
                "if let Some(matched) = p.memoized({id}) {{ return matched; }}"
            )?;
        }
        if routine.memo || can_fail {
            writeln!(self.out, "let {checkpoint} = p.save();")?;
        }

        if can_fail {
            writeln!(self.out, "'{fail}: {{")?;
        }
        self.statements(&routine.body)?;
        if routine.memo {
            writeln!(self.out, "p.memoize({id}, {checkpoint}, true);")?;
        }

        match can_fail {
            true => {
                writeln!(self.out, "return true;\n}}")?;
                if routine.memo {
                    writeln!(self.out, "p.memoize({id}, {checkpoint}, false);")?;
                }
                writeln!(self.out, "p.fail({id}, {checkpoint});")?;
                writeln!(self.out, "p.restore({checkpoint});")?;
                writeln!(self.out, "false")?;
            }
            false => writeln!(self.out, "true")?,
        }
        writeln!(self.out, "}}")
    }

    fn statements(&mut self, statements: &[Stmt]) -> std::fmt::Result {
        for statement in statements {
            self.statement(statement)?;
        }
        Ok(())
    }

    fn statement(&mut self, statement: &Stmt) -> std::fmt::Result {
        match statement {
            Stmt::Save(label) => writeln!(self.out, "let {} = p.save();", Checkpoint(*label)),
            Stmt::Restore(label) => writeln!(self.out, "p.restore({});", Checkpoint(*label)),
            Stmt::Open(label) => writeln!(self.out, "let {} = p.open();", Checkpoint(*label)),
            Stmt::Close { rule, label } => writeln!(
                self.out,
                "p.close(Rule::{} as u32, {});",
                self.variants[*rule],
                Checkpoint(*label)
            ),
            Stmt::Capture(label) => writeln!(self.out, "p.capture({});", Checkpoint(*label)),
            Stmt::Advance => writeln!(self.out, "p.advance();"),
            Stmt::Char { c, fail } => {
                writeln!(self.out, "if !p.match_char({c:#x}) {{ break '{fail}; }}")
            }
            Stmt::Range { lower, upper, fail } => writeln!(
                self.out,
                "if !p.match_range({lower:#x}, {upper:#x}) {{ break '{fail}; }}"
            ),
            Stmt::Dot { fail } => writeln!(self.out, "if !p.match_dot() {{ break '{fail}; }}"),
            Stmt::Str { text, fail } => {
                writeln!(self.out, "if !p.match_str({text:?}) {{ break '{fail}; }}")
            }
            Stmt::Call { rule, fail } => writeln!(
                self.out,
                "if !{}(p, s) {{ break '{fail}; }}",
                self.rule_function(*rule)
            ),
            Stmt::Predicate { code, fail } => {
                writeln!(self.out, "if !({}) {{ break '{fail}; }}", code.trim())
            }
            Stmt::Code(code) => writeln!(self.out, "{}", code_block(code)),
            Stmt::Jump(Flow::Break(label)) => writeln!(self.out, "break '{label};"),
            Stmt::Jump(Flow::Continue(label)) => writeln!(self.out, "continue '{label};"),
            Stmt::Block { label, body } => match self.used.contains(*label) {
                true => {
                    writeln!(self.out, "'{label}: {{")?;
                    self.statements(body)?;
                    writeln!(self.out, "}}")
                }
                // nothing leaves it early, splice it into the parent
                false => self.statements(body),
            },
            Stmt::Loop { label, body } => {
                writeln!(self.out, "'{label}: loop {{")?;
                self.statements(body)?;
                writeln!(self.out, "}}")
            }
            Stmt::Switch { arms, default } => {
                writeln!(self.out, "match p.peek() {{")?;
                for (set, body) in arms {
                    writeln!(self.out, "{} => {{", Pattern(set))?;
                    self.statements(body)?;
                    writeln!(self.out, "}}")?;
                }
                writeln!(self.out, "_ => {{")?;
                self.statements(default)?;
                writeln!(self.out, "}}\n}}")
            }
        }
    }
}

/// Match arm pattern covering an interval set.
struct Pattern<'a>(&'a IntervalSet);

impl std::fmt::Display for Pattern<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, range) in self.0.ranges().iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            match range.begin == range.end {
                true => write!(f, "{:#x}", range.begin)?,
                false => write!(f, "{:#x}..={:#x}", range.begin, range.end)?,
            }
        }
        Ok(())
    }
}

/// Comments above the formatted code, which would otherwise lose them.
fn header(grammar: &Grammar, options: &Options) -> Result<String, std::fmt::Error> {
    let mut out = String::new();
    let generator = options.generator.as_deref().unwrap_or("rpeg");
    writeln!(out, "//! Generated by `{generator}`, edit the grammar instead.")?;
    if let Some(package) = &grammar.package {
        writeln!(out, "//! Grammar package `{package}`.")?;
    }

    let mut blank = false;
    for &item in &grammar.header {
        let node = grammar.tree.get(item);
        match node.kind {
            NodeKind::Comment => {
                writeln!(out, "//{}", node.text.trim_end())?;
                blank = false;
            }
            _ if !blank => {
                writeln!(out)?;
                blank = true;
            }
            _ => {}
        }
    }
    if !blank {
        writeln!(out)?;
    }
    Ok(out)
}

/// Renders and formats the whole module.
pub fn render(grammar: &Grammar, program: &Program, options: &Options) -> Result<String, CompileError> {
    let mut used = EntitySet::new();
    for routine in &program.routines {
        mark_used_labels(&routine.body, &mut used);
    }

    let mut renderer = RustRenderer {
        grammar,
        program,
        options,
        used,
        variants: variant_names(grammar),
        out: String::new(),
    };
    renderer.file()?;
    let buffer = renderer.out;
    debug!("rendered {} bytes of unformatted code", buffer.len());

    let file = match syn::parse_file(&buffer) {
        Ok(file) => file,
        Err(error) => return Err(CompileError::MalformedSource { error, buffer }),
    };

    let mut source = header(grammar, options)?;
    source.push_str(&prettyplease::unparse(&file));
    Ok(source)
}

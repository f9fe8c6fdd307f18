pub mod analysis;
pub mod codegen;
pub mod error;
pub mod eval;
pub mod grammar;
pub mod ir;
pub mod optimize;
pub mod render;
pub mod set;
pub mod syntax;

use log::{debug, warn};

use analysis::analyze;
use codegen::structure::Program;
use error::{CompileError, Diagnostic, Diagnostics, Report};
use grammar::{Grammar, RuleKind};

pub use rpeg_runtime::END_SYMBOL;

#[derive(Clone, Debug)]
pub struct Options {
    /// Replace calls of rules referenced once with their body.
    pub inline: bool,
    /// Rewrite alternates with disjoint first sets into a `match`.
    pub switch: bool,
    /// Record a token per rule and defer actions to `execute`.
    pub ast: bool,
    /// Fail on any warning instead of printing it.
    pub strict: bool,
    /// Command line shown in the header of the emitted module.
    pub generator: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            inline: false,
            switch: false,
            ast: true,
            strict: false,
            generator: None,
        }
    }
}

/// A grammar lowered to matcher routines, before rendering.
pub struct Compiled {
    pub grammar: Grammar,
    pub program: Program,
    /// Warnings, empty in strict mode.
    pub diagnostics: Vec<Diagnostic>,
    /// Number of alternates rewritten into a switch.
    pub switched: usize,
}

impl Compiled {
    /// Rule names in id order, for printing token trees.
    pub fn rule_names(&self) -> Vec<&str> {
        self.grammar.rules.values().map(|r| r.name.as_str()).collect()
    }
}

#[derive(Debug)]
pub struct Output {
    pub source: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// Reads, checks and lowers a grammar.
pub fn build(src: &str, options: &Options) -> Result<Compiled, CompileError> {
    let tree = syntax::parse_grammar(src)?;

    let err = Diagnostics::new();
    let mut grammar = Grammar::new(tree, &err);
    if grammar.is_empty() {
        return Err(CompileError::NoRules);
    }
    debug!("linked {} rules", grammar.len());

    let analysis = analyze(&grammar);
    for (rule, data) in &grammar.rules {
        match data.kind {
            RuleKind::Undefined => {
                err.warning(format!("rule '{}' used but not defined", data.name));
            }
            RuleKind::Declared if !analysis.usage.is_reached(rule) => {
                err.warning(format!("rule '{}' defined but not used", data.name));
            }
            _ => {}
        }
    }
    err.extend(analysis.diagnostics(&grammar));

    let diagnostics = err.take();
    if options.strict && !diagnostics.is_empty() {
        return Err(CompileError::Strict(Report(diagnostics)));
    }
    for diagnostic in &diagnostics {
        warn!("{}", diagnostic.message);
    }

    let switched = match options.switch {
        true => optimize::optimize(&mut grammar),
        false => 0,
    };
    debug!("rewrote {switched} alternates");

    let program = codegen::compile(&grammar, &analysis.usage, options);
    Ok(Compiled {
        grammar,
        program,
        diagnostics,
        switched,
    })
}

/// Compiles grammar text into the source of a Rust module.
pub fn compile(src: &str, options: &Options) -> Result<Output, CompileError> {
    let compiled = build(src, options)?;
    let source = render::render(&compiled.grammar, &compiled.program, options)?;
    Ok(Output {
        source,
        diagnostics: compiled.diagnostics,
    })
}

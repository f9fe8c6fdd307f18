use std::{
    fmt::Display,
    io::{Read, Write},
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{bail, Context};
use clap::Parser as _;
use rpeg::{
    build, error::CompileError, eval::Interpreter, render::render, syntax::parse_grammar, Options,
};
use rpeg_runtime::{Parser, ParserOptions};

/// Compiles a parsing expression grammar into a Rust parser module.
#[derive(clap::Parser)]
#[command(name = "rpeg", version)]
struct Cli {
    /// Grammar file, `-` or nothing reads stdin
    file: Option<PathBuf>,
    /// Output file, defaults to FILE.rs, `-` writes stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Replace calls of rules used once with their body
    #[arg(long)]
    inline: bool,
    /// Dispatch alternates with disjoint first sets through a `match`
    #[arg(long)]
    switch: bool,
    /// Do not record a token tree, run actions while matching
    #[arg(long)]
    noast: bool,
    /// Treat warnings as errors
    #[arg(long)]
    strict: bool,
    /// Dump the grammar tree
    #[arg(long)]
    print: bool,
    /// Match INPUT against the grammar and print its token tree instead of
    /// writing the module
    #[arg(long, value_name = "INPUT")]
    check: Option<PathBuf>,
    /// Time every phase
    #[arg(long)]
    bench: bool,
    /// Repeat every phase this many times when timing
    #[arg(long, default_value_t = 1)]
    iters: u32,
    /// Log compiler progress
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

pub struct UnitPrinter {
    value: f64,
    suffixes: &'static [(&'static str, f64)],
}

#[allow(non_upper_case_globals)]
impl UnitPrinter {
    fn bytes(value: f64) -> Self {
        const KiB: f64 = 1.0 / 1024.0;
        Self {
            value,
            suffixes: &[("GiB", KiB * KiB * KiB), ("MiB", KiB * KiB), ("KiB", KiB), ("B", 1.0)],
        }
    }
    fn seconds(value: f64) -> Self {
        const ms: f64 = 1000.0;
        Self {
            value,
            suffixes: &[
                ("s", 1.0),
                ("ms", ms),
                ("µs", ms * ms),
                ("ns", ms * ms * ms),
            ],
        }
    }
}

impl Display for UnitPrinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut best: Option<(f64, &'static str)> = None;

        for &(name, factor) in self.suffixes {
            let value = self.value * factor;

            let new_best = match best {
                Some((best, _)) if best >= 1.0 => value < best && value >= 1.0,
                Some((best, _)) => value > best,
                None => true,
            };
            if new_best {
                best = Some((value, name));
            }
        }

        match best {
            Some((value, suffix)) => write!(f, "{value:.2} {suffix}"),
            None => write!(f, "{:.2}", self.value),
        }
    }
}

pub struct PhaseRunner {
    do_bench: bool,
    bytes: usize,
    iters: u32,
}

impl PhaseRunner {
    pub fn new(bytes: usize, do_bench: bool, iters: u32) -> PhaseRunner {
        PhaseRunner {
            do_bench,
            bytes,
            iters: iters.max(1),
        }
    }
    pub fn run<F: FnMut() -> T, T>(&self, name: &str, mut fun: F) -> T {
        let start = std::time::Instant::now();
        let mut output = fun();
        for _ in 1..self.iters {
            output = fun();
        }
        let elapsed = (start.elapsed() / self.iters).as_secs_f64();

        if self.do_bench {
            let throughput = UnitPrinter::bytes((self.bytes as f64) / elapsed);
            let time = UnitPrinter::seconds(elapsed);
            eprintln!("{name}\t {time}\t {throughput}/s");
        }
        output
    }
}

fn init_logger(verbose: bool) -> anyhow::Result<()> {
    let level = match verbose {
        true => log::LevelFilter::Debug,
        false => std::env::var("RUST_LOG")
            .ok()
            .and_then(|level| log::LevelFilter::from_str(&level).ok())
            .unwrap_or(log::LevelFilter::Warn),
    };

    simplelog::TermLogger::init(
        level,
        simplelog::ConfigBuilder::new()
            .set_time_format_custom(&[])
            .build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Never,
    )?;
    Ok(())
}

fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == "-"
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose)?;

    let file = cli.file.as_deref().filter(|path| !is_stdio(path));
    let src = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read `{}`", path.display()))?,
        None => {
            let mut src = String::new();
            std::io::stdin()
                .read_to_string(&mut src)
                .context("Failed to read stdin")?;
            src
        }
    };

    let command_line = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let options = Options {
        inline: cli.inline,
        switch: cli.switch,
        ast: !cli.noast,
        strict: cli.strict,
        generator: Some(format!("rpeg {command_line}").trim_end().to_owned()),
    };

    let runner = PhaseRunner::new(src.len(), cli.bench, cli.iters);

    if cli.print {
        let tree = runner.run("parse", || parse_grammar(&src))?;
        let mut out = String::new();
        tree.dump(&mut out);
        print!("{out}");
    }

    let compiled = runner.run("compile", || build(&src, &options))?;
    log::debug!(
        "{} routines, {} labels",
        compiled.program.routines.len(),
        compiled.program.labels
    );

    if let Some(input) = &cli.check {
        return check(&compiled, input, &options);
    }

    let source = match runner.run("render", || render(&compiled.grammar, &compiled.program, &options)) {
        Ok(source) => source,
        Err(CompileError::MalformedSource { error, buffer }) => {
            eprintln!("Formatting failed, printing unformatted:");
            eprintln!("{buffer}");
            bail!("generated source is malformed: {error}");
        }
        Err(e) => return Err(e.into()),
    };

    let output = match (&cli.output, file) {
        (Some(output), _) => Some(output.clone()),
        (None, Some(file)) => Some(PathBuf::from(format!("{}.rs", file.display()))),
        (None, None) => None,
    };
    match output.as_deref().filter(|path| !is_stdio(path)) {
        Some(path) => std::fs::write(path, &source)
            .with_context(|| format!("Failed to write `{}`", path.display()))?,
        None => std::io::stdout()
            .write_all(source.as_bytes())
            .context("Failed to write stdout")?,
    }
    Ok(())
}

/// Runs the grammar on a file through the interpreter.
fn check(compiled: &rpeg::Compiled, input: &Path, options: &Options) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read `{}`", input.display()))?;

    let parser_options = ParserOptions {
        memoize: options.ast,
        ..ParserOptions::default()
    };
    let mut p = Parser::new(&text, parser_options);
    let matched = Interpreter::new(&compiled.program).parse(&mut p);

    let names = compiled.rule_names();
    if !matched {
        let error = p.error(&names);
        bail!("{}: {error}", input.display());
    }

    print!("{}", p.print_tree(&names));
    if !p.is_eof() {
        log::warn!(
            "{}: matched {} of {} characters",
            input.display(),
            p.position(),
            p.buffer().len()
        );
    }
    Ok(())
}

use std::{fmt::Write, path::PathBuf};

use rpeg::{compile, Options};

const GRAMMARS: &[&str] = &["calculator", "end"];

/// Module suffix and options of every flavour a grammar is compiled in.
fn flavours() -> [(&'static str, Options); 3] {
    let ast = Options {
        strict: true,
        ..Options::default()
    };
    let noast = Options {
        ast: false,
        ..ast.clone()
    };
    let optimized = Options {
        inline: true,
        switch: true,
        ..ast.clone()
    };
    [("ast", ast), ("noast", noast), ("optimized", optimized)]
}

fn main() {
    let out_dir = PathBuf::from(std::env::var_os("OUT_DIR").expect("Cargo sets OUT_DIR"));

    let mut modules = String::new();
    for name in GRAMMARS {
        let path = format!("grammars/{name}.peg");
        println!("cargo:rerun-if-changed={path}");
        let src = std::fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("Failed to read `{path}`: {e}"));

        for (suffix, mut options) in flavours() {
            options.generator = Some(format!("rpeg {path}"));
            let output = compile(&src, &options).unwrap_or_else(|e| panic!("{path}: {e}"));
            writeln!(modules, "pub mod {name}_{suffix} {{\n{}\n}}", output.source).unwrap();
        }
    }

    std::fs::write(out_dir.join("grammars.rs"), modules).expect("Failed to write grammars.rs");
}

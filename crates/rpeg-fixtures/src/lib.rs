//! Parsers generated from `grammars/` by the build script. Every grammar is
//! compiled three times: `_ast` records tokens and runs actions in
//! `execute`, `_noast` runs actions while matching and `_optimized` inlines
//! rules and switches on the next code point.

include!(concat!(env!("OUT_DIR"), "/grammars.rs"));

macro_rules! calculator_state {
    ($($module:ident),*) => {$(
        impl $module::Calculator {
            /// Replaces the two topmost values with `op` of them.
            fn apply(&mut self, op: fn(i64, i64) -> i64) {
                let b = self.stack.pop().unwrap_or(0);
                let a = self.stack.pop().unwrap_or(0);
                self.stack.push(op(a, b));
                self.ops += 1;
            }
        }
    )*};
}

calculator_state!(calculator_ast, calculator_noast, calculator_optimized);

//! Support code for parsers generated by rpeg.
//!
//! The generated matchers only ever touch the input through [`Parser`], which
//! owns the code point buffer, the backtracking state, the recorded tokens and
//! the memoization table.

pub mod linemap;
pub mod parser;
pub mod tokens;

pub use linemap::{CodePointPos, LineMap};
pub use parser::{Checkpoint, Matcher, ParseError, Parser, ParserOptions};
pub use tokens::{build_tree, Token, Tokens, TreeNode};

/// Sentinel code point past the end of every buffer, one above the largest
/// valid `char`.
pub const END_SYMBOL: u32 = 0x110000;

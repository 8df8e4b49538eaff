//! PureMix Parser
//!
//! Parses template token streams (from `puremix-lexer`) into an AST, and
//! guest script source (code blocks, method calls) into a statement tree.
//!
//! - `parser` / `ast`: the template expression grammar (ternaries with HTML
//!   branches, logical and arithmetic operators, member/call chains,
//!   array-transform callbacks).
//! - `conditional`: the text-level `?`/`:` matcher shared with the
//!   template driver's ternary fast path.
//! - `semantic`: shape-preserving scope/type annotation.
//! - `script_lexer` / `script_parser` / `script_ast`: the JavaScript subset
//!   executed by the script evaluator.

pub mod ast;
pub mod conditional;
pub mod parser;
pub mod script_ast;
pub mod script_lexer;
pub mod script_parser;
pub mod semantic;

pub use ast::{Metadata, Node, NodeKind};
pub use conditional::{split_conditional, ConditionalParts};
pub use parser::Parser;
pub use script_parser::ScriptParser;
pub use semantic::analyze;

/// Parser error with position information.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Parse error at line {line}, column {column}: {message}")]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl From<puremix_lexer::LexError> for ParseError {
    fn from(e: puremix_lexer::LexError) -> Self {
        ParseError {
            message: e.message,
            line: e.line,
            column: e.column,
        }
    }
}

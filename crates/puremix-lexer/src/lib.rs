//! PureMix template lexer
//!
//! Tokenizes `{...}` template spans (and the markup around them) into a
//! stream of tokens. Handles HTML tags and their text content, string and
//! number literals, the expression operators the template grammar supports,
//! and the code-block vs. expression decision for every `{` it meets.
//!
//! # Example
//!
//! ```
//! use puremix_lexer::{Scanner, TokenKind};
//!
//! let tokens = Scanner::tokenize("{user.name}").unwrap();
//! assert_eq!(tokens[0].kind, TokenKind::LBrace);
//! assert_eq!(tokens.last().unwrap().kind, TokenKind::Eof);
//! ```

pub mod classify;
pub mod scanner;
pub mod token;

pub use classify::{classify, Signals, SpanKind};
pub use scanner::Scanner;
pub use token::{is_void_element, join_tokens, Position, Token, TokenKind};

/// Deepest nesting of `{...}` spans, parentheses or prefix operators the
/// lexer and parsers accept before giving up on a span.
pub const MAX_NESTING: usize = 64;

/// Lexer error with position information.
///
/// Only unterminated string literals and spans nested deeper than
/// [`MAX_NESTING`] are fatal; every other malformed input degrades to text
/// tokens.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Lexer error at line {line}, column {column}: {message}")]
pub struct LexError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

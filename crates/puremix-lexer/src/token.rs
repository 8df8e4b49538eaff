/// A position in template source, tracking line and column for error
/// reporting and the byte offset for re-assembling raw markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl Position {
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }
}

/// Token classification for template source.
///
/// Literal variants carry their decoded value; the raw lexeme is always
/// available as `Token::text`.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Markup
    HtmlTag {
        name: String,
        closing: bool,
        self_closing: bool,
    },
    Text,

    // Literals (carry data)
    String(String),
    TemplateLiteral(String),
    Number(f64),
    Boolean(bool),
    Null,
    Identifier(String),

    /// A `{...}` span classified as statements; carries the inner source.
    CodeBlock(String),

    // Expression braces
    LBrace,
    RBrace,

    // Operators
    Dot,
    Question,
    Colon,
    Arrow,
    StrictEq,
    StrictNotEq,
    And,
    Or,
    Not,
    Plus,
    Minus,
    Star,
    Slash,

    // Punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Semicolon,

    // End of input
    Eof,
}

/// A token produced by the template lexer. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub position: Position,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, position: Position) -> Self {
        Self {
            kind,
            text: text.into(),
            position,
        }
    }

    /// Byte offset just past the raw lexeme.
    pub fn end(&self) -> usize {
        self.position.offset + self.text.len()
    }

    pub fn is_html_tag(&self) -> bool {
        matches!(self.kind, TokenKind::HtmlTag { .. })
    }
}

/// Re-assemble source text from a run of tokens.
///
/// Adjacent tokens are glued as-is; a gap between two tokens (skipped
/// whitespace or comments) becomes a single space.
pub fn join_tokens(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut last_end: Option<usize> = None;

    for token in tokens {
        if matches!(token.kind, TokenKind::Eof) {
            break;
        }
        if let Some(end) = last_end {
            if token.position.offset > end {
                out.push(' ');
            }
        }
        out.push_str(&token.text);
        last_end = Some(token.end());
    }

    out
}

/// HTML5 void elements (self-closing, no children).
pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Check if a tag name is an HTML5 void element.
pub fn is_void_element(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag.to_ascii_lowercase().as_str())
}

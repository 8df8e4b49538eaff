//! Lexer for guest script source.
//!
//! Tokenizes the JavaScript subset run by the script evaluator: code-block
//! bodies and method-call expressions lifted out of templates. Template
//! literals are split here into literal text and `${...}` source chunks,
//! which the parser parses recursively.
//!
//! # Examples
//!
//! ```
//! use puremix_parser::script_lexer::{ScriptLexer, TokenKind};
//!
//! let tokens = ScriptLexer::tokenize("let total = price * 2;").unwrap();
//! assert_eq!(tokens[0].kind, TokenKind::Let);
//! assert_eq!(tokens[1].kind, TokenKind::Identifier);
//! assert_eq!(tokens[2].kind, TokenKind::Eq);
//! ```

use crate::script_ast::Span;
use puremix_lexer::{LexError, MAX_NESTING};

/// A token produced by the script lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub value: TokenValue,
    /// A line break separates this token from the previous one.
    pub newline_before: bool,
}

/// Token classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Literals
    Number,
    String,
    Template,
    Boolean,
    Null,
    Undefined,

    Identifier,

    // Keywords
    Let,
    Const,
    Var,
    Function,
    Return,
    If,
    Else,
    For,
    While,
    Do,
    Break,
    Continue,
    Switch,
    Case,
    Default,
    Throw,
    Try,
    Catch,
    Finally,
    Typeof,
    In,
    New,

    // Arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    Percent,

    // Comparison
    EqEq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    Gt,
    Lte,
    Gte,

    // Logical
    And,
    Or,
    Not,
    QuestionQuestion,

    // Assignment
    Eq,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,

    // Update
    PlusPlus,
    MinusMinus,

    // Delimiters
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,

    // Punctuation
    Dot,
    Ellipsis,
    Comma,
    Colon,
    Semicolon,
    Question,
    Arrow,
    OptionalChain,

    // End of input
    Eof,
}

/// The value carried by a token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue {
    None,
    Number(f64),
    String(String),
    Boolean(bool),
    Identifier(String),
    Template(Vec<TemplateChunk>),
}

/// A piece of a template literal, before the `${...}` parts are parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateChunk {
    Text(String),
    /// Source of an interpolation and its char offset in the script.
    Source(String, usize),
}

/// Guest script lexer.
pub struct ScriptLexer {
    chars: Vec<char>,
    pos: usize,
    newline_before: bool,
    /// Open template literals, counting those inside interpolations.
    templates: usize,
}

impl ScriptLexer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            newline_before: false,
            templates: 0,
        }
    }

    /// Tokenize the entire source into a vector of tokens.
    pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
        let mut lexer = ScriptLexer::new(source);
        let mut tokens = Vec::new();

        loop {
            let token = lexer.next_token()?;
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }

        Ok(tokens)
    }

    /// Read the next token from the source.
    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.newline_before = false;
        self.skip_trivia()?;

        let start = self.pos;
        if self.is_at_end() {
            return Ok(self.token(TokenKind::Eof, start, TokenValue::None));
        }

        let ch = self.current();

        match ch {
            '0'..='9' => self.read_number(start),
            '.' if self.peek().is_some_and(|c| c.is_ascii_digit()) => self.read_number(start),
            '\'' | '"' => self.read_string(start),
            '`' => self.read_template(start),
            c if c.is_alphabetic() || c == '_' || c == '$' => Ok(self.read_identifier(start)),
            _ => self.read_operator(start),
        }
    }

    fn read_operator(&mut self, start: usize) -> Result<Token, LexError> {
        use TokenKind::*;

        // Longest match first.
        const OPERATORS: &[(&str, TokenKind)] = &[
            ("===", StrictEq),
            ("!==", StrictNotEq),
            ("...", Ellipsis),
            ("==", EqEq),
            ("!=", NotEq),
            ("<=", Lte),
            (">=", Gte),
            ("&&", And),
            ("||", Or),
            ("??", QuestionQuestion),
            ("?.", OptionalChain),
            ("=>", Arrow),
            ("+=", PlusEq),
            ("-=", MinusEq),
            ("*=", StarEq),
            ("/=", SlashEq),
            ("%=", PercentEq),
            ("++", PlusPlus),
            ("--", MinusMinus),
            ("+", Plus),
            ("-", Minus),
            ("*", Star),
            ("/", Slash),
            ("%", Percent),
            ("<", Lt),
            (">", Gt),
            ("!", Not),
            ("=", Eq),
            ("(", LParen),
            (")", RParen),
            ("[", LBracket),
            ("]", RBracket),
            ("{", LBrace),
            ("}", RBrace),
            (".", Dot),
            (",", Comma),
            (":", Colon),
            (";", Semicolon),
            ("?", Question),
        ];

        for (text, kind) in OPERATORS {
            if self.starts_with(text) {
                // `a?.5:0` is a ternary, not optional chaining.
                if *kind == OptionalChain && self.peek_at(2).is_some_and(|c| c.is_ascii_digit()) {
                    continue;
                }
                self.pos += text.chars().count();
                return Ok(self.token(*kind, start, TokenValue::None));
            }
        }

        Err(self.error(format!("Unexpected character: '{}'", self.current()), start))
    }

    // --- Literals ---

    fn read_number(&mut self, start: usize) -> Result<Token, LexError> {
        while !self.is_at_end() && (self.current().is_ascii_digit() || self.current() == '.') {
            // `1..toString()` is not supported; a second dot ends the number.
            if self.current() == '.' && self.text(start, self.pos).contains('.') {
                break;
            }
            self.advance();
        }
        if !self.is_at_end() && matches!(self.current(), 'e' | 'E') {
            let sign = self.peek().is_some_and(|c| c == '+' || c == '-');
            let digit_at = if sign { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                self.pos += digit_at;
                while !self.is_at_end() && self.current().is_ascii_digit() {
                    self.advance();
                }
            }
        }

        let text = self.text(start, self.pos);
        let value: f64 = text
            .parse()
            .map_err(|_| self.error(format!("Invalid number: '{text}'"), start))?;

        Ok(self.token(TokenKind::Number, start, TokenValue::Number(value)))
    }

    fn read_string(&mut self, start: usize) -> Result<Token, LexError> {
        let quote = self.current();
        self.advance(); // skip opening quote

        let mut value = String::new();

        while !self.is_at_end() && self.current() != quote {
            if self.current() == '\\' {
                self.advance();
                if self.is_at_end() {
                    break;
                }
                self.push_escape(&mut value);
            } else if self.current() == '\n' {
                return Err(self.error("Unterminated string".into(), start));
            } else {
                value.push(self.current());
            }
            self.advance();
        }

        if self.is_at_end() {
            return Err(self.error("Unterminated string".into(), start));
        }

        self.advance(); // skip closing quote

        Ok(self.token(TokenKind::String, start, TokenValue::String(value)))
    }

    /// Backtick string: literal text interleaved with `${...}` sources.
    fn read_template(&mut self, start: usize) -> Result<Token, LexError> {
        if self.templates >= MAX_NESTING {
            return Err(self.error(
                format!("Template literals nested deeper than {MAX_NESTING} levels"),
                start,
            ));
        }
        self.templates += 1;
        let token = self.read_template_body(start);
        self.templates -= 1;
        token
    }

    fn read_template_body(&mut self, start: usize) -> Result<Token, LexError> {
        self.advance(); // skip opening backtick

        let mut chunks = Vec::new();
        let mut text = String::new();

        loop {
            if self.is_at_end() {
                return Err(self.error("Unterminated template literal".into(), start));
            }
            match self.current() {
                '`' => {
                    self.advance();
                    break;
                }
                '\\' => {
                    self.advance();
                    if !self.is_at_end() {
                        self.push_escape(&mut text);
                        self.advance();
                    }
                }
                '$' if self.peek() == Some('{') => {
                    if !text.is_empty() {
                        chunks.push(TemplateChunk::Text(std::mem::take(&mut text)));
                    }
                    self.pos += 2;
                    let inner_start = self.pos;
                    let inner_end = self.skip_interpolation(start)?;
                    chunks.push(TemplateChunk::Source(
                        self.text(inner_start, inner_end),
                        inner_start,
                    ));
                }
                c => {
                    text.push(c);
                    self.advance();
                }
            }
        }

        if !text.is_empty() {
            chunks.push(TemplateChunk::Text(text));
        }

        Ok(self.token(TokenKind::Template, start, TokenValue::Template(chunks)))
    }

    /// Move past the `}` closing an interpolation, honoring nested braces,
    /// strings and templates. Returns the offset of that `}`.
    fn skip_interpolation(&mut self, template_start: usize) -> Result<usize, LexError> {
        let mut depth = 0usize;
        while !self.is_at_end() {
            match self.current() {
                '{' => depth += 1,
                '}' if depth == 0 => {
                    let end = self.pos;
                    self.advance();
                    return Ok(end);
                }
                '}' => depth -= 1,
                '\'' | '"' => {
                    self.read_string(self.pos)?;
                    continue;
                }
                '`' => {
                    self.read_template(self.pos)?;
                    continue;
                }
                _ => {}
            }
            self.advance();
        }
        Err(self.error("Unterminated template literal".into(), template_start))
    }

    fn push_escape(&self, value: &mut String) {
        match self.current() {
            'n' => value.push('\n'),
            't' => value.push('\t'),
            'r' => value.push('\r'),
            '0' => value.push('\0'),
            '\\' => value.push('\\'),
            c => value.push(c),
        }
    }

    fn read_identifier(&mut self, start: usize) -> Token {
        while !self.is_at_end()
            && (self.current().is_alphanumeric() || self.current() == '_' || self.current() == '$')
        {
            self.advance();
        }

        let text = self.text(start, self.pos);

        let kind = match text.as_str() {
            "true" => return self.token(TokenKind::Boolean, start, TokenValue::Boolean(true)),
            "false" => return self.token(TokenKind::Boolean, start, TokenValue::Boolean(false)),
            "null" => TokenKind::Null,
            "undefined" => TokenKind::Undefined,
            "let" => TokenKind::Let,
            "const" => TokenKind::Const,
            "var" => TokenKind::Var,
            "function" => TokenKind::Function,
            "return" => TokenKind::Return,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "for" => TokenKind::For,
            "while" => TokenKind::While,
            "do" => TokenKind::Do,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "switch" => TokenKind::Switch,
            "case" => TokenKind::Case,
            "default" => TokenKind::Default,
            "throw" => TokenKind::Throw,
            "try" => TokenKind::Try,
            "catch" => TokenKind::Catch,
            "finally" => TokenKind::Finally,
            "typeof" => TokenKind::Typeof,
            "in" => TokenKind::In,
            "new" => TokenKind::New,
            _ => {
                return self.token(TokenKind::Identifier, start, TokenValue::Identifier(text));
            }
        };

        self.token(kind, start, TokenValue::Identifier(text))
    }

    // --- Private helpers ---

    fn skip_trivia(&mut self) -> Result<(), LexError> {
        while !self.is_at_end() {
            let c = self.current();
            if c == '\n' {
                self.newline_before = true;
                self.advance();
            } else if c.is_whitespace() {
                self.advance();
            } else if self.starts_with("//") {
                while !self.is_at_end() && self.current() != '\n' {
                    self.advance();
                }
            } else if self.starts_with("/*") {
                let start = self.pos;
                self.pos += 2;
                while !self.is_at_end() && !self.starts_with("*/") {
                    if self.current() == '\n' {
                        self.newline_before = true;
                    }
                    self.advance();
                }
                if self.is_at_end() {
                    return Err(self.error("Unterminated comment".into(), start));
                }
                self.pos += 2;
            } else {
                break;
            }
        }
        Ok(())
    }

    fn token(&self, kind: TokenKind, start: usize, value: TokenValue) -> Token {
        Token {
            kind,
            span: Span::new(start, self.pos),
            value,
            newline_before: self.newline_before,
        }
    }

    fn error(&self, message: String, at: usize) -> LexError {
        let (line, column) = line_column(&self.chars, at);
        LexError {
            message,
            line,
            column,
        }
    }

    fn text(&self, start: usize, end: usize) -> String {
        self.chars[start..end].iter().collect()
    }

    fn starts_with(&self, pattern: &str) -> bool {
        pattern
            .chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c))
    }

    fn current(&self) -> char {
        self.chars[self.pos]
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }
}

/// 1-based line and column of a char offset.
pub fn line_column(chars: &[char], offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut column = 1;
    for &c in chars.iter().take(offset) {
        if c == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line, column)
}

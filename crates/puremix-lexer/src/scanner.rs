use crate::classify::{classify, SpanKind};
use crate::token::{is_void_element, Position, Token, TokenKind};
use crate::{LexError, MAX_NESTING};

/// Elements whose content is raw text: no tags, no `{expr}` spans.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// Template source scanner.
///
/// Tokenizes template source into a stream of tokens.
/// Handles HTML tags and tag content, nested `{...}` spans (each one is
/// classified and either kept whole as a code block or sub-lexed as an
/// expression), string literals, and the expression operators.
///
/// - `Vec<char>` source for index-based navigation
/// - Stack of open elements: inside an element everything up to the next
///   tag or `{` is text
/// - Absolute position tracking on every token, including sub-lexed spans
pub struct Scanner<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
    byte: usize,
    base_offset: usize,
    line: usize,
    column: usize,
    tokens: Vec<Token>,
    open_tags: Vec<String>,
    depth: usize,
}

impl<'a> Scanner<'a> {
    /// Create a new scanner for the given source.
    pub fn new(source: &'a str) -> Self {
        Self::with_origin(source, Position::new(1, 1, 0))
    }

    /// Create a scanner whose positions start at `origin`. Used for the
    /// inside of `{...}` spans so nested tokens keep absolute positions.
    pub fn with_origin(source: &'a str, origin: Position) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
            byte: 0,
            base_offset: origin.offset,
            line: origin.line,
            column: origin.column,
            tokens: Vec::new(),
            open_tags: Vec::new(),
            depth: 0,
        }
    }

    /// Tokenize the entire source into a vector of tokens.
    pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
        let mut scanner = Scanner::new(source);
        scanner.scan_tokens()?;
        Ok(scanner.tokens)
    }

    /// Scan all tokens from the source.
    fn scan_tokens(&mut self) -> Result<(), LexError> {
        while !self.is_at_end() {
            self.scan_token()?;
        }

        let position = self.position();
        self.tokens.push(Token::new(TokenKind::Eof, "", position));
        Ok(())
    }

    /// Scan the next token.
    fn scan_token(&mut self) -> Result<(), LexError> {
        // Inside an element, everything but `{` is tag content.
        if !self.open_tags.is_empty() && self.peek() != '{' {
            self.scan_tag_content();
            return Ok(());
        }

        let ch = self.peek();

        match ch {
            // Whitespace
            ' ' | '\t' | '\r' | '\n' => {
                self.advance();
                Ok(())
            }

            // Comments
            '/' if self.peek_next() == '/' => {
                self.skip_line_comment();
                Ok(())
            }
            '/' if self.peek_next() == '*' => {
                self.skip_block_comment();
                Ok(())
            }
            '<' if self.starts_with("<!--") => {
                self.skip_html_comment();
                Ok(())
            }

            // Markup
            '<' if self.tag_starts_here() => {
                self.scan_tag();
                Ok(())
            }

            // Spans
            '{' => self.scan_brace(),

            // Strings
            '"' | '\'' | '`' => self.scan_string(),

            // Numbers
            '0'..='9' => {
                self.scan_number();
                Ok(())
            }

            // Multi-character operators
            '=' if self.starts_with("===") => self.emit_op(TokenKind::StrictEq, 3),
            '=' if self.peek_next() == '>' => self.emit_op(TokenKind::Arrow, 2),
            '!' if self.starts_with("!==") => self.emit_op(TokenKind::StrictNotEq, 3),
            '!' if self.peek_next() != '=' => self.emit_op(TokenKind::Not, 1),
            '&' if self.peek_next() == '&' => self.emit_op(TokenKind::And, 2),
            '|' if self.peek_next() == '|' => self.emit_op(TokenKind::Or, 2),

            // Single-character operators and punctuation
            '.' if !self.starts_with("...") => self.emit_op(TokenKind::Dot, 1),
            '?' => self.emit_op(TokenKind::Question, 1),
            ':' => self.emit_op(TokenKind::Colon, 1),
            '+' => self.emit_op(TokenKind::Plus, 1),
            '-' => self.emit_op(TokenKind::Minus, 1),
            '*' => self.emit_op(TokenKind::Star, 1),
            '/' => self.emit_op(TokenKind::Slash, 1),
            '(' => self.emit_op(TokenKind::LParen, 1),
            ')' => self.emit_op(TokenKind::RParen, 1),
            '[' => self.emit_op(TokenKind::LBracket, 1),
            ']' => self.emit_op(TokenKind::RBracket, 1),
            ',' => self.emit_op(TokenKind::Comma, 1),
            ';' => self.emit_op(TokenKind::Semicolon, 1),

            // Identifiers and keywords
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                self.scan_identifier();
                Ok(())
            }

            // Anything else degrades to free text
            _ => {
                self.scan_free_text();
                Ok(())
            }
        }
    }

    // --- Markup ---

    /// Scan a `<tag ...>`, `</tag>` or `<!DOCTYPE ...>` tag. A tag that never
    /// closes degrades to text.
    fn scan_tag(&mut self) {
        let position = self.position();
        let start = self.byte;
        self.advance(); // consume `<`

        let closing = self.peek() == '/';
        if closing {
            self.advance();
        }

        let mut name = String::new();
        while !self.is_at_end() && is_tag_name_char(self.peek()) {
            name.push(self.peek());
            self.advance();
        }

        let mut quote: Option<char> = None;
        let mut braces = 0usize;
        let mut terminated = false;
        while !self.is_at_end() {
            let c = self.peek();
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => {}
                None => match c {
                    '"' | '\'' => quote = Some(c),
                    '{' => braces += 1,
                    '}' => braces = braces.saturating_sub(1),
                    '>' if braces == 0 => {
                        self.advance();
                        terminated = true;
                        break;
                    }
                    _ => {}
                },
            }
            self.advance();
        }

        let text = &self.source[start..self.byte];
        if !terminated {
            self.tokens.push(Token::new(TokenKind::Text, text, position));
            return;
        }

        let self_closing = text.ends_with("/>");
        self.tokens.push(Token::new(
            TokenKind::HtmlTag {
                name: name.clone(),
                closing,
                self_closing,
            },
            text,
            position,
        ));

        if closing {
            if let Some(idx) = self.open_tags.iter().rposition(|t| t.eq_ignore_ascii_case(&name)) {
                self.open_tags.truncate(idx);
            }
        } else if !self_closing && !name.starts_with('!') && !is_void_element(&name) {
            let lowered = name.to_ascii_lowercase();
            self.open_tags.push(name);
            if RAW_TEXT_ELEMENTS.contains(&lowered.as_str()) {
                self.scan_raw_text(&lowered);
            }
        }
    }

    /// Scan text inside an open element up to the next tag or `{`.
    fn scan_tag_content(&mut self) {
        let position = self.position();
        let start = self.byte;

        while !self.is_at_end() {
            let c = self.peek();
            if c == '{' || (c == '<' && (self.tag_starts_here() || self.starts_with("<!--"))) {
                break;
            }
            self.advance();
        }

        if self.byte > start {
            let text = &self.source[start..self.byte];
            self.tokens.push(Token::new(TokenKind::Text, text, position));
        }

        if self.starts_with("<!--") {
            self.skip_html_comment();
        } else if self.peek() == '<' {
            self.scan_tag();
        }
    }

    /// Content of `<script>`/`<style>` is a single text token.
    fn scan_raw_text(&mut self, tag: &str) {
        let position = self.position();
        let start = self.byte;
        let closing = format!("</{tag}");

        while !self.is_at_end() && !self.starts_with_ignore_case(&closing) {
            self.advance();
        }

        if self.byte > start {
            let text = &self.source[start..self.byte];
            self.tokens.push(Token::new(TokenKind::Text, text, position));
        }
    }

    // --- Spans ---

    /// Scan a `{...}` span. Code blocks become a single token; expressions
    /// are sub-lexed between `LBrace`/`RBrace`. An unmatched `{` is text.
    fn scan_brace(&mut self) -> Result<(), LexError> {
        let position = self.position();
        let start = self.byte;

        let Some(close) = self.find_matching_brace() else {
            self.advance();
            self.tokens.push(Token::new(TokenKind::Text, "{", position));
            return Ok(());
        };

        let inner: String = self.chars[self.pos + 1..close].iter().collect();

        match classify(&inner) {
            SpanKind::CodeBlock => {
                while self.pos <= close {
                    self.advance();
                }
                let text = &self.source[start..self.byte];
                self.tokens
                    .push(Token::new(TokenKind::CodeBlock(inner), text, position));
            }
            SpanKind::Expression => {
                if self.depth >= MAX_NESTING {
                    return Err(LexError {
                        message: format!("Spans nested deeper than {MAX_NESTING} levels"),
                        line: position.line,
                        column: position.column,
                    });
                }
                self.advance(); // consume `{`
                self.tokens.push(Token::new(TokenKind::LBrace, "{", position));

                let mut nested = Scanner::with_origin(&inner, self.position());
                nested.depth = self.depth + 1;
                nested.scan_tokens()?;
                self.tokens.extend(
                    nested
                        .tokens
                        .into_iter()
                        .filter(|t| t.kind != TokenKind::Eof),
                );

                while self.pos < close {
                    self.advance();
                }
                let close_position = self.position();
                self.advance(); // consume `}`
                self.tokens
                    .push(Token::new(TokenKind::RBrace, "}", close_position));
            }
        }

        Ok(())
    }

    /// Index of the `}` closing the `{` at the cursor, by brace counting.
    fn find_matching_brace(&self) -> Option<usize> {
        let mut depth = 0usize;
        for (i, c) in self.chars.iter().enumerate().skip(self.pos) {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            }
        }
        None
    }

    // --- Literals ---

    /// Scan a quoted string. Backtick strings keep their raw content as a
    /// template literal for the script evaluator.
    fn scan_string(&mut self) -> Result<(), LexError> {
        let quote = self.peek();
        let position = self.position();
        let start = self.byte;
        self.advance(); // consume opening quote

        let mut value = String::new();

        while !self.is_at_end() && self.peek() != quote {
            if self.peek() == '\\' {
                self.advance(); // consume backslash
                if self.is_at_end() {
                    break;
                }
                if quote == '`' {
                    value.push('\\');
                    value.push(self.peek());
                } else {
                    match self.peek() {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        'r' => value.push('\r'),
                        '\\' => value.push('\\'),
                        c if c == quote => value.push(c),
                        c => {
                            value.push('\\');
                            value.push(c);
                        }
                    }
                }
                self.advance();
            } else {
                value.push(self.peek());
                self.advance();
            }
        }

        if self.is_at_end() {
            return Err(LexError {
                message: "Unterminated string".into(),
                line: position.line,
                column: position.column,
            });
        }

        self.advance(); // consume closing quote

        let text = &self.source[start..self.byte];
        let kind = if quote == '`' {
            TokenKind::TemplateLiteral(value)
        } else {
            TokenKind::String(value)
        };
        self.tokens.push(Token::new(kind, text, position));
        Ok(())
    }

    /// Scan a number literal (integer or decimal fraction).
    fn scan_number(&mut self) {
        let position = self.position();
        let start = self.byte;

        while !self.is_at_end() && self.peek().is_ascii_digit() {
            self.advance();
        }
        if self.peek() == '.' && self.peek_next().is_ascii_digit() {
            self.advance();
            while !self.is_at_end() && self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        let text = &self.source[start..self.byte];
        let value = text.parse::<f64>().unwrap_or(f64::NAN);
        self.tokens
            .push(Token::new(TokenKind::Number(value), text, position));
    }

    /// Scan an identifier or literal keyword.
    fn scan_identifier(&mut self) {
        let position = self.position();
        let start = self.byte;

        while !self.is_at_end()
            && (self.peek().is_alphanumeric() || self.peek() == '_' || self.peek() == '$')
        {
            self.advance();
        }

        let text = &self.source[start..self.byte];
        let kind = match text {
            "true" => TokenKind::Boolean(true),
            "false" => TokenKind::Boolean(false),
            "null" => TokenKind::Null,
            _ => TokenKind::Identifier(text.to_string()),
        };
        self.tokens.push(Token::new(kind, text, position));
    }

    /// Unrecognized characters become a text token instead of an error.
    fn scan_free_text(&mut self) {
        let position = self.position();
        let start = self.byte;
        self.advance();

        while !self.is_at_end() {
            let c = self.peek();
            if c.is_whitespace()
                || c.is_alphanumeric()
                || matches!(c, '"' | '\'' | '`' | '{' | '}' | '(' | ')' | '[' | ']' | '<')
            {
                break;
            }
            self.advance();
        }

        let text = &self.source[start..self.byte];
        self.tokens.push(Token::new(TokenKind::Text, text, position));
    }

    // --- Comments ---

    fn skip_line_comment(&mut self) {
        while !self.is_at_end() && self.peek() != '\n' {
            self.advance();
        }
    }

    fn skip_block_comment(&mut self) {
        self.advance();
        self.advance();
        while !self.is_at_end() && !self.starts_with("*/") {
            self.advance();
        }
        self.advance();
        self.advance();
    }

    fn skip_html_comment(&mut self) {
        while !self.is_at_end() && !self.starts_with("-->") {
            self.advance();
        }
        for _ in 0..3 {
            self.advance();
        }
    }

    // --- Helpers ---

    fn emit_op(&mut self, kind: TokenKind, len: usize) -> Result<(), LexError> {
        let position = self.position();
        let start = self.byte;
        for _ in 0..len {
            self.advance();
        }
        let text = &self.source[start..self.byte];
        self.tokens.push(Token::new(kind, text, position));
        Ok(())
    }

    fn tag_starts_here(&self) -> bool {
        if self.peek() != '<' {
            return false;
        }
        let next = self.peek_next();
        next.is_ascii_alphabetic()
            || next == '!'
            || (next == '/' && self.chars.get(self.pos + 2).is_some_and(|c| c.is_ascii_alphabetic()))
    }

    fn position(&self) -> Position {
        Position::new(self.line, self.column, self.base_offset + self.byte)
    }

    fn starts_with(&self, pattern: &str) -> bool {
        self.source[self.byte..].starts_with(pattern)
    }

    fn starts_with_ignore_case(&self, pattern: &str) -> bool {
        self.source
            .get(self.byte..self.byte + pattern.len())
            .is_some_and(|s| s.eq_ignore_ascii_case(pattern))
    }

    fn peek(&self) -> char {
        if self.is_at_end() {
            '\0'
        } else {
            self.chars[self.pos]
        }
    }

    fn peek_next(&self) -> char {
        if self.pos + 1 >= self.chars.len() {
            '\0'
        } else {
            self.chars[self.pos + 1]
        }
    }

    fn advance(&mut self) {
        if !self.is_at_end() {
            let c = self.chars[self.pos];
            self.pos += 1;
            self.byte += c.len_utf8();
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }
}

fn is_tag_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '!')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::join_tokens;
    use pretty_assertions::assert_eq;

    /// Helper: tokenize and return token kinds (ignoring text and positions).
    fn kinds(source: &str) -> Vec<TokenKind> {
        Scanner::tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    /// Helper: tokenize and panic on error.
    fn tokens(source: &str) -> Vec<Token> {
        Scanner::tokenize(source).unwrap()
    }

    fn ident(name: &str) -> TokenKind {
        TokenKind::Identifier(name.into())
    }

    fn tag(name: &str, closing: bool) -> TokenKind {
        TokenKind::HtmlTag {
            name: name.into(),
            closing,
            self_closing: false,
        }
    }

    // =========================================================================
    // Structure: empty, whitespace, EOF
    // =========================================================================

    #[test]
    fn test_empty_source() {
        let toks = tokens("");
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0].kind, TokenKind::Eof);
    }

    #[test]
    fn test_whitespace_only() {
        assert_eq!(kinds("  \n\t "), vec![TokenKind::Eof]);
    }

    // =========================================================================
    // Expression spans
    // =========================================================================

    #[test]
    fn test_property_path_span() {
        assert_eq!(
            kinds("{user.name}"),
            vec![
                TokenKind::LBrace,
                ident("user"),
                TokenKind::Dot,
                ident("name"),
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_ternary_span() {
        assert_eq!(
            kinds("{ok ? 'a' : 'b'}"),
            vec![
                TokenKind::LBrace,
                ident("ok"),
                TokenKind::Question,
                TokenKind::String("a".into()),
                TokenKind::Colon,
                TokenKind::String("b".into()),
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a === b !== c && !d || e + f - g * h / i"),
            vec![
                ident("a"),
                TokenKind::StrictEq,
                ident("b"),
                TokenKind::StrictNotEq,
                ident("c"),
                TokenKind::And,
                TokenKind::Not,
                ident("d"),
                TokenKind::Or,
                ident("e"),
                TokenKind::Plus,
                ident("f"),
                TokenKind::Minus,
                ident("g"),
                TokenKind::Star,
                ident("h"),
                TokenKind::Slash,
                ident("i"),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_punctuation() {
        assert_eq!(
            kinds("f(a[0], b);"),
            vec![
                ident("f"),
                TokenKind::LParen,
                ident("a"),
                TokenKind::LBracket,
                TokenKind::Number(0.0),
                TokenKind::RBracket,
                TokenKind::Comma,
                ident("b"),
                TokenKind::RParen,
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_arrow() {
        assert_eq!(
            kinds("i => i"),
            vec![ident("i"), TokenKind::Arrow, ident("i"), TokenKind::Eof]
        );
    }

    #[test]
    fn test_literals() {
        assert_eq!(
            kinds("true false null 42 2.5"),
            vec![
                TokenKind::Boolean(true),
                TokenKind::Boolean(false),
                TokenKind::Null,
                TokenKind::Number(42.0),
                TokenKind::Number(2.5),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_number_followed_by_member() {
        assert_eq!(
            kinds("1.x"),
            vec![
                TokenKind::Number(1.0),
                TokenKind::Dot,
                ident("x"),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_template_literal() {
        assert_eq!(
            kinds("`Hi ${name}`"),
            vec![
                TokenKind::TemplateLiteral("Hi ${name}".into()),
                TokenKind::Eof,
            ]
        );
    }

    // =========================================================================
    // Code blocks
    // =========================================================================

    #[test]
    fn test_code_block_span() {
        let toks = tokens("{ const total = 5; __export = {total}; }");
        assert_eq!(toks.len(), 2);
        assert_eq!(
            toks[0].kind,
            TokenKind::CodeBlock(" const total = 5; __export = {total}; ".into())
        );
        assert_eq!(toks[0].text, "{ const total = 5; __export = {total}; }");
    }

    #[test]
    fn test_unmatched_brace_is_text() {
        assert_eq!(
            kinds("{ a"),
            vec![TokenKind::Text, ident("a"), TokenKind::Eof]
        );
    }

    // =========================================================================
    // Markup
    // =========================================================================

    #[test]
    fn test_tag_with_text_content() {
        let toks = tokens("<span>Label: value</span>");
        assert_eq!(toks[0].kind, tag("span", false));
        assert_eq!(toks[1].kind, TokenKind::Text);
        assert_eq!(toks[1].text, "Label: value");
        assert_eq!(toks[2].kind, tag("span", true));
        assert_eq!(toks[3].kind, TokenKind::Eof);
    }

    #[test]
    fn test_expression_inside_tag_body() {
        assert_eq!(
            kinds("<li>{i.name}!</li>"),
            vec![
                tag("li", false),
                TokenKind::LBrace,
                ident("i"),
                TokenKind::Dot,
                ident("name"),
                TokenKind::RBrace,
                TokenKind::Text,
                tag("li", true),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_nested_tags() {
        assert_eq!(
            kinds("<p><b>x</b> y</p>"),
            vec![
                tag("p", false),
                tag("b", false),
                TokenKind::Text,
                tag("b", true),
                TokenKind::Text,
                tag("p", true),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_self_closing_and_void_tags() {
        let toks = tokens("<Card title=\"x\" /><br>a");
        assert_eq!(
            toks[0].kind,
            TokenKind::HtmlTag {
                name: "Card".into(),
                closing: false,
                self_closing: true,
            }
        );
        assert_eq!(toks[1].kind, tag("br", false));
        // `<br>` opens nothing, so `a` is an identifier again
        assert_eq!(toks[2].kind, ident("a"));
    }

    #[test]
    fn test_attribute_with_angle_in_quotes() {
        let toks = tokens("<a title=\"1 > 0\">x</a>");
        assert_eq!(toks[0].text, "<a title=\"1 > 0\">");
        assert_eq!(toks[1].text, "x");
    }

    #[test]
    fn test_attribute_with_expression() {
        let toks = tokens("<a href=\"/u/{u.id}\">x</a>");
        assert_eq!(toks[0].text, "<a href=\"/u/{u.id}\">");
    }

    #[test]
    fn test_script_content_is_raw_text() {
        let toks = tokens("<script>if (a) { b(); }</script>");
        assert_eq!(toks[1].kind, TokenKind::Text);
        assert_eq!(toks[1].text, "if (a) { b(); }");
        assert_eq!(toks[2].kind, tag("script", true));
    }

    #[test]
    fn test_unterminated_tag_is_text() {
        assert_eq!(kinds("<div class"), vec![TokenKind::Text, TokenKind::Eof]);
    }

    #[test]
    fn test_less_than_is_free_text() {
        assert_eq!(
            kinds("a < b"),
            vec![ident("a"), TokenKind::Text, ident("b"), TokenKind::Eof]
        );
    }

    // =========================================================================
    // Comments
    // =========================================================================

    #[test]
    fn test_comments_skipped() {
        assert_eq!(
            kinds("a // line\n/* block */ b <!-- html --> c"),
            vec![ident("a"), ident("b"), ident("c"), TokenKind::Eof]
        );
    }

    #[test]
    fn test_html_comment_inside_element() {
        assert_eq!(
            kinds("<p>a<!-- x -->b</p>"),
            vec![
                tag("p", false),
                TokenKind::Text,
                TokenKind::Text,
                tag("p", true),
                TokenKind::Eof,
            ]
        );
    }

    // =========================================================================
    // Strings and errors
    // =========================================================================

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#""say \"hi\"\n""#),
            vec![TokenKind::String("say \"hi\"\n".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let result = Scanner::tokenize("{name + 'oops}");
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.message.contains("Unterminated string"));
        assert_eq!(err.line, 1);
        assert_eq!(err.column, 9);
    }

    #[test]
    fn test_unexpected_characters_degrade_to_text() {
        let toks = tokens("a # b");
        assert_eq!(toks[1].kind, TokenKind::Text);
        assert_eq!(toks[1].text, "#");
    }

    #[test]
    fn test_span_nesting_limit() {
        let nested = |n: usize| format!("{}x{}", "{".repeat(n), "}".repeat(n));
        assert!(Scanner::tokenize(&nested(10)).is_ok());

        let err = Scanner::tokenize(&nested(1000)).unwrap_err();
        assert_eq!(err.message, "Spans nested deeper than 64 levels");
    }

    // =========================================================================
    // Positions and re-assembly
    // =========================================================================

    #[test]
    fn test_positions_inside_nested_span() {
        let toks = tokens("x\n  {a.b}");
        let b = toks
            .iter()
            .find(|t| t.kind == ident("b"))
            .unwrap();
        assert_eq!(b.position.line, 2);
        assert_eq!(b.position.column, 6);
        assert_eq!(b.position.offset, 7);
    }

    #[test]
    fn test_join_reassembles_html_body() {
        let source = "<li class=\"x\">{i.name} - {i.price}</li>";
        let toks = tokens(source);
        assert_eq!(join_tokens(&toks), source);
    }

    #[test]
    fn test_multibyte_text_offsets() {
        let source = "<p>héllo {n}</p>";
        let toks = tokens(source);
        assert_eq!(join_tokens(&toks), source);
    }
}

//! Code-block vs. expression classification for `{...}` spans.
//!
//! The same delimiter carries both `{user.name}` and
//! `{ const x = 1; __export = {x}; }`. The decision is structural: the span
//! is scanned once, counting signals outside string literals and outside
//! HTML markup/text, and any strong signal makes it a code block.

use crate::token::is_void_element;

/// What a `{...}` span holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Expression,
    CodeBlock,
}

const DECLARATION_KEYWORDS: &[&str] = &["const", "let", "var"];
const CONTROL_FLOW_KEYWORDS: &[&str] = &[
    "for", "while", "if", "else", "switch", "case", "break", "continue", "return",
];
const EXPORT_MARKER: &str = "__export";

/// Structural signals collected from one span.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signals {
    pub declarations: usize,
    pub functions: usize,
    pub control_flow: usize,
    pub export_marker: bool,
    pub separators: usize,
    /// Member accesses on a call or index result (`).x`, `].x`).
    pub member_chains: usize,
    pub assignments: usize,
}

impl Signals {
    /// Scan the inner source of a span (without its outer braces).
    pub fn collect(source: &str) -> Self {
        SignalScanner::new(source).run()
    }

    /// Strong signals decide alone; weak ones (one separator, one chained
    /// member access, an assignment) are weighed together.
    pub fn is_code_block(&self) -> bool {
        let strong = self.declarations > 0
            || self.functions > 0
            || self.control_flow > 0
            || self.export_marker
            || self.separators >= 2
            || self.member_chains >= 2;

        strong || self.weight() >= 2
    }

    fn weight(&self) -> usize {
        self.separators + self.member_chains + 2 * self.assignments
    }
}

/// Classify the inner source of a `{...}` span.
pub fn classify(source: &str) -> SpanKind {
    if Signals::collect(source).is_code_block() {
        SpanKind::CodeBlock
    } else {
        SpanKind::Expression
    }
}

struct SignalScanner {
    chars: Vec<char>,
    pos: usize,
    signals: Signals,
    element_depth: usize,
    in_html_text: bool,
    /// One entry per open `{`; `true` when it was opened from HTML text.
    braces: Vec<bool>,
}

impl SignalScanner {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            signals: Signals::default(),
            element_depth: 0,
            in_html_text: false,
            braces: Vec::new(),
        }
    }

    fn run(mut self) -> Signals {
        while self.pos < self.chars.len() {
            let c = self.chars[self.pos];

            if self.in_html_text {
                match c {
                    '<' if self.tag_starts_here() => {
                        self.in_html_text = false;
                        self.skip_tag();
                    }
                    '{' => {
                        self.in_html_text = false;
                        self.braces.push(true);
                        self.pos += 1;
                    }
                    _ => self.pos += 1,
                }
                continue;
            }

            match c {
                '"' | '\'' | '`' => self.skip_string(c),
                '/' if self.peek_at(1) == Some('/') => self.skip_line_comment(),
                '/' if self.peek_at(1) == Some('*') => self.skip_block_comment(),
                '<' if self.tag_starts_here() => self.skip_tag(),
                '{' => {
                    self.braces.push(false);
                    self.pos += 1;
                }
                '}' => {
                    if self.braces.pop() == Some(true) {
                        self.in_html_text = true;
                    }
                    self.pos += 1;
                }
                ';' => {
                    self.signals.separators += 1;
                    self.pos += 1;
                }
                '.' => {
                    if self.follows_call_or_index() && self.peek_at(1) != Some('.') {
                        self.signals.member_chains += 1;
                    }
                    self.pos += 1;
                }
                '=' => {
                    if self.is_assignment() {
                        self.signals.assignments += 1;
                    }
                    self.pos += 1;
                }
                c if is_word_start(c) => self.scan_word(),
                _ => self.pos += 1,
            }
        }

        self.signals
    }

    fn scan_word(&mut self) {
        let after_dot = self.previous_non_space() == Some('.');
        let start = self.pos;
        while self.pos < self.chars.len() && is_word_char(self.chars[self.pos]) {
            self.pos += 1;
        }
        if after_dot {
            return;
        }

        let word: String = self.chars[start..self.pos].iter().collect();
        if DECLARATION_KEYWORDS.contains(&word.as_str()) {
            self.signals.declarations += 1;
        } else if word == "function" {
            self.signals.functions += 1;
        } else if CONTROL_FLOW_KEYWORDS.contains(&word.as_str()) {
            self.signals.control_flow += 1;
        } else if word == EXPORT_MARKER {
            self.signals.export_marker = true;
        }
    }

    fn is_assignment(&self) -> bool {
        let prev = self.pos.checked_sub(1).map(|i| self.chars[i]);
        let next = self.peek_at(1);
        !matches!(prev, Some('=' | '!' | '<' | '>')) && !matches!(next, Some('=' | '>'))
    }

    fn follows_call_or_index(&self) -> bool {
        matches!(self.previous_non_space(), Some(')' | ']'))
    }

    fn previous_non_space(&self) -> Option<char> {
        self.chars[..self.pos]
            .iter()
            .rev()
            .find(|c| !c.is_whitespace())
            .copied()
    }

    fn tag_starts_here(&self) -> bool {
        match self.peek_at(1) {
            Some(c) if c.is_ascii_alphabetic() => true,
            Some('/') => self.peek_at(2).is_some_and(|c| c.is_ascii_alphabetic()),
            _ => false,
        }
    }

    /// Skip a whole `<...>` tag, tracking element depth for the text state.
    fn skip_tag(&mut self) {
        self.pos += 1; // consume `<`
        let closing = self.peek_at(0) == Some('/');
        if closing {
            self.pos += 1;
        }

        let name_start = self.pos;
        while self.pos < self.chars.len()
            && (self.chars[self.pos].is_ascii_alphanumeric() || self.chars[self.pos] == '-')
        {
            self.pos += 1;
        }
        let name: String = self.chars[name_start..self.pos].iter().collect();

        let mut quote: Option<char> = None;
        let mut self_closing = false;
        while self.pos < self.chars.len() {
            let c = self.chars[self.pos];
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => {}
                None => match c {
                    '"' | '\'' => quote = Some(c),
                    '>' => {
                        self_closing = self.pos > 0 && self.chars[self.pos - 1] == '/';
                        self.pos += 1;
                        break;
                    }
                    _ => {}
                },
            }
            self.pos += 1;
        }

        if closing {
            self.element_depth = self.element_depth.saturating_sub(1);
        } else if !self_closing && !is_void_element(&name) {
            self.element_depth += 1;
        }
        self.in_html_text = self.element_depth > 0;
    }

    fn skip_string(&mut self, quote: char) {
        self.pos += 1;
        while self.pos < self.chars.len() {
            match self.chars[self.pos] {
                '\\' => self.pos += 2,
                c if c == quote => {
                    self.pos += 1;
                    return;
                }
                _ => self.pos += 1,
            }
        }
    }

    fn skip_line_comment(&mut self) {
        while self.pos < self.chars.len() && self.chars[self.pos] != '\n' {
            self.pos += 1;
        }
    }

    fn skip_block_comment(&mut self) {
        self.pos += 2;
        while self.pos < self.chars.len() {
            if self.chars[self.pos] == '*' && self.peek_at(1) == Some('/') {
                self.pos += 2;
                return;
            }
            self.pos += 1;
        }
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }
}

fn is_word_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Expressions stay expressions
    // =========================================================================

    #[test]
    fn test_property_path_is_expression() {
        assert_eq!(classify("user.profile.name"), SpanKind::Expression);
    }

    #[test]
    fn test_ternary_is_expression() {
        assert_eq!(classify("active ? 'on' : 'off'"), SpanKind::Expression);
    }

    #[test]
    fn test_strict_equality_is_not_assignment() {
        assert_eq!(classify("a === b"), SpanKind::Expression);
        assert_eq!(classify("a !== b"), SpanKind::Expression);
    }

    #[test]
    fn test_arrow_is_not_assignment() {
        assert_eq!(
            classify("items.map(i => <li>{i.name}</li>)"),
            SpanKind::Expression
        );
    }

    #[test]
    fn test_single_chained_call_is_expression() {
        assert_eq!(classify("name.trim().length"), SpanKind::Expression);
    }

    #[test]
    fn test_keyword_in_html_text_ignored() {
        assert_eq!(
            classify("items.map(i => <li>if you return {i.name}</li>)"),
            SpanKind::Expression
        );
    }

    #[test]
    fn test_keyword_in_string_ignored() {
        assert_eq!(classify("flag ? 'const' : 'let'"), SpanKind::Expression);
    }

    #[test]
    fn test_keyword_as_property_ignored() {
        assert_eq!(classify("config.return"), SpanKind::Expression);
    }

    // =========================================================================
    // Strong signals
    // =========================================================================

    #[test]
    fn test_declaration_is_code_block() {
        assert_eq!(classify(" const x = 1 "), SpanKind::CodeBlock);
    }

    #[test]
    fn test_export_marker_is_code_block() {
        assert_eq!(classify("__export = {x}"), SpanKind::CodeBlock);
    }

    #[test]
    fn test_function_is_code_block() {
        assert_eq!(
            classify("function f(a) { return a * 2 }"),
            SpanKind::CodeBlock
        );
    }

    #[test]
    fn test_control_flow_is_code_block() {
        assert_eq!(classify("if (a) { b() }"), SpanKind::CodeBlock);
    }

    #[test]
    fn test_two_separators_is_code_block() {
        assert_eq!(classify("a(); b();"), SpanKind::CodeBlock);
    }

    #[test]
    fn test_two_chained_members_is_code_block() {
        assert_eq!(
            classify("items.filter(x => x.on).map(x => x.id).join(',')"),
            SpanKind::CodeBlock
        );
    }

    // =========================================================================
    // Weighted ties
    // =========================================================================

    #[test]
    fn test_chain_plus_separator_is_code_block() {
        let signals = Signals::collect("list.sort().length;");
        assert_eq!(signals.member_chains, 1);
        assert_eq!(signals.separators, 1);
        assert!(signals.is_code_block());
    }

    #[test]
    fn test_lone_separator_is_expression() {
        assert_eq!(classify("user.name;"), SpanKind::Expression);
    }

    #[test]
    fn test_assignment_is_code_block() {
        assert_eq!(classify("count = count + 1"), SpanKind::CodeBlock);
    }

    #[test]
    fn test_signal_counts() {
        let signals = Signals::collect("let a = 1; let b = 2; __export = {a, b};");
        assert_eq!(signals.declarations, 2);
        assert_eq!(signals.separators, 3);
        assert!(signals.export_marker);
        assert_eq!(signals.assignments, 3);
    }
}

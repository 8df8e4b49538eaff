//! Text-level ternary splitting.
//!
//! Finds the top-level `?` and its matching `:` in a span's inner source
//! without building an AST, so markup branches survive untouched. Used by
//! the template driver's ternary fast path.

use puremix_lexer::is_void_element;

/// The three trimmed parts of `condition ? consequent : alternate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionalParts<'a> {
    pub condition: &'a str,
    pub consequent: &'a str,
    pub alternate: &'a str,
}

/// Split a ternary at its top-level `?` and the `:` paired with it.
///
/// Characters are ignored inside brackets, string literals, HTML tags and
/// HTML text; nested ternaries in the consequent are skipped by pairing
/// each `:` with the nearest unmatched `?`. Returns `None` when the source
/// is not a ternary at top level.
pub fn split_conditional(source: &str) -> Option<ConditionalParts<'_>> {
    let mut splitter = Splitter::new(source);
    let question = splitter.find_question()?;
    let colon = splitter.find_colon()?;

    let condition = source[..question].trim();
    let consequent = source[question + 1..colon].trim();
    let alternate = source[colon + 1..].trim();

    if condition.is_empty() || consequent.is_empty() || alternate.is_empty() {
        return None;
    }

    Some(ConditionalParts {
        condition,
        consequent,
        alternate,
    })
}

struct Splitter {
    /// Byte offset and char pairs.
    chars: Vec<(usize, char)>,
    pos: usize,
    depth: usize,
    element_depth: usize,
}

impl Splitter {
    fn new(source: &str) -> Self {
        Self {
            chars: source.char_indices().collect(),
            pos: 0,
            depth: 0,
            element_depth: 0,
        }
    }

    fn find_question(&mut self) -> Option<usize> {
        while let Some((offset, c)) = self.next_significant() {
            if c == '?' && self.depth == 0 && self.is_ternary_question() {
                return Some(offset);
            }
        }
        None
    }

    fn find_colon(&mut self) -> Option<usize> {
        let mut pending = 0usize;
        while let Some((offset, c)) = self.next_significant() {
            if self.depth > 0 {
                continue;
            }
            match c {
                '?' if self.is_ternary_question() => pending += 1,
                ':' if pending == 0 => return Some(offset),
                ':' => pending -= 1,
                _ => {}
            }
        }
        None
    }

    /// Advance to the next character that sits in expression position,
    /// consuming strings, tags and HTML text along the way. Bracket depth
    /// is updated before the character is returned.
    fn next_significant(&mut self) -> Option<(usize, char)> {
        loop {
            let (offset, c) = *self.chars.get(self.pos)?;

            if self.element_depth > 0 {
                match c {
                    '<' if self.tag_starts_here() => self.skip_tag(),
                    '{' => {
                        self.skip_balanced_braces();
                    }
                    _ => self.pos += 1,
                }
                continue;
            }

            match c {
                '"' | '\'' | '`' => {
                    self.skip_string(c);
                    continue;
                }
                '<' if self.tag_starts_here() => {
                    self.skip_tag();
                    continue;
                }
                '(' | '[' | '{' => self.depth += 1,
                ')' | ']' | '}' => self.depth = self.depth.saturating_sub(1),
                _ => {}
            }

            self.pos += 1;
            return Some((offset, c));
        }
    }

    /// `?` that is not part of `?.` or `??`.
    fn is_ternary_question(&self) -> bool {
        let prev = self.pos.checked_sub(2).and_then(|i| self.chars.get(i)).map(|&(_, c)| c);
        let next = self.chars.get(self.pos).map(|&(_, c)| c);
        prev != Some('?') && !matches!(next, Some('.' | '?'))
    }

    fn tag_starts_here(&self) -> bool {
        let at = |i: usize| self.chars.get(self.pos + i).map(|&(_, c)| c);
        match at(1) {
            Some(c) if c.is_ascii_alphabetic() => true,
            Some('/') => at(2).is_some_and(|c| c.is_ascii_alphabetic()),
            _ => false,
        }
    }

    fn skip_tag(&mut self) {
        let start = self.pos;
        self.pos += 1;
        let closing = self.chars.get(self.pos).map(|&(_, c)| c) == Some('/');
        if closing {
            self.pos += 1;
        }

        let name_start = self.pos;
        while self
            .chars
            .get(self.pos)
            .is_some_and(|&(_, c)| c.is_ascii_alphanumeric() || c == '-')
        {
            self.pos += 1;
        }
        let name: String = self.chars[name_start..self.pos].iter().map(|&(_, c)| c).collect();

        let mut quote: Option<char> = None;
        let mut braces = 0usize;
        while let Some(&(_, c)) = self.chars.get(self.pos) {
            self.pos += 1;
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => {}
                None => match c {
                    '"' | '\'' => quote = Some(c),
                    '{' => braces += 1,
                    '}' => braces = braces.saturating_sub(1),
                    '>' if braces == 0 => break,
                    _ => {}
                },
            }
        }

        let self_closing = self.pos >= 2
            && self.pos - 2 > start
            && self.chars.get(self.pos - 2).map(|&(_, c)| c) == Some('/');

        if closing {
            self.element_depth = self.element_depth.saturating_sub(1);
        } else if !self_closing && !is_void_element(&name) {
            self.element_depth += 1;
        }
    }

    /// Skip a `{...}` span inside HTML text.
    fn skip_balanced_braces(&mut self) {
        let mut depth = 0usize;
        while let Some(&(_, c)) = self.chars.get(self.pos) {
            self.pos += 1;
            match c {
                '{' => depth += 1,
                '}' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return;
                    }
                }
                _ => {}
            }
        }
    }

    fn skip_string(&mut self, quote: char) {
        self.pos += 1;
        while let Some(&(_, c)) = self.chars.get(self.pos) {
            self.pos += 1;
            if c == '\\' {
                self.pos += 1;
            } else if c == quote {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parts(source: &str) -> (&str, &str, &str) {
        let p = split_conditional(source).unwrap();
        (p.condition, p.consequent, p.alternate)
    }

    #[test]
    fn test_simple_split() {
        assert_eq!(parts("ok ? 'yes' : 'no'"), ("ok", "'yes'", "'no'"));
    }

    #[test]
    fn test_not_a_ternary() {
        assert_eq!(split_conditional("user.name"), None);
        assert_eq!(split_conditional("a ?? b"), None);
        assert_eq!(split_conditional("a?.b"), None);
    }

    #[test]
    fn test_colon_inside_html_text_ignored() {
        assert_eq!(
            parts("show ? <p>Time: 10:30</p> : <p>none</p>"),
            ("show", "<p>Time: 10:30</p>", "<p>none</p>")
        );
    }

    #[test]
    fn test_question_inside_html_text_ignored() {
        assert_eq!(
            parts("a ? <p>Really? Yes</p> : ''"),
            ("a", "<p>Really? Yes</p>", "''")
        );
    }

    #[test]
    fn test_colon_inside_string_ignored() {
        assert_eq!(parts("a ? 'x:y' : 'z'"), ("a", "'x:y'", "'z'"));
    }

    #[test]
    fn test_apostrophe_in_html_text() {
        assert_eq!(
            parts("a ? <p>It's here</p> : <p>Don't</p>"),
            ("a", "<p>It's here</p>", "<p>Don't</p>")
        );
    }

    #[test]
    fn test_nested_consequent() {
        assert_eq!(
            parts("a ? b ? 'x' : 'y' : 'z'"),
            ("a", "b ? 'x' : 'y'", "'z'")
        );
    }

    #[test]
    fn test_nested_alternate_stays_whole() {
        assert_eq!(
            parts("a ? 'x' : b ? 'y' : 'z'"),
            ("a", "'x'", "b ? 'y' : 'z'")
        );
    }

    #[test]
    fn test_brackets_hide_inner_ternary() {
        assert_eq!(
            parts("f(a ? 1 : 2) ? 'x' : 'y'"),
            ("f(a ? 1 : 2)", "'x'", "'y'")
        );
    }

    #[test]
    fn test_nested_span_inside_html_branch() {
        assert_eq!(
            parts("a ? <b>{x ? 'p' : 'q'}</b> : <i>n</i>"),
            ("a", "<b>{x ? 'p' : 'q'}</b>", "<i>n</i>")
        );
    }

    #[test]
    fn test_attribute_with_colon() {
        assert_eq!(
            parts("a ? <a href=\"http://x\">x</a> : ''"),
            ("a", "<a href=\"http://x\">x</a>", "''")
        );
    }

    #[test]
    fn test_missing_colon() {
        assert_eq!(split_conditional("a ? 'x'"), None);
    }
}

//! Array-transform fast path: `<path>.map(<param> => <markup>)`.
//!
//! The shape is recognized by matching, not parsing: the markup runs from
//! the first `<` after `=>` to the `)` closing the call, which has to end the
//! span. It is rendered once per element by re-entering the template driver.

use puremix_lexer::is_void_element;

use crate::context::Context;
use crate::value::Value;
use crate::{driver, EvalError, InterpError, Interpreter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformMethod {
    /// `map` and `forEach`
    Map,
    Filter,
}

/// The pieces of a recognized array transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transform<'a> {
    pub path: Vec<&'a str>,
    pub method: TransformMethod,
    /// Element name, then an optional index name.
    pub params: Vec<&'a str>,
    pub template: &'a str,
}

/// Recognize `<path>.<map|filter|forEach>(<params> => <markup>)`.
pub fn match_transform(source: &str) -> Option<Transform<'_>> {
    let mut cursor = Cursor::new(source.trim());

    let mut path = vec![cursor.identifier()?];
    let method = loop {
        cursor.expect('.')?;
        let name = cursor.identifier()?;
        cursor.skip_whitespace();
        if cursor.peek() == Some('(') {
            break match name {
                "map" | "forEach" => TransformMethod::Map,
                "filter" => TransformMethod::Filter,
                _ => return None,
            };
        }
        path.push(name);
    };
    cursor.expect('(')?;

    cursor.skip_whitespace();
    let params = if cursor.peek() == Some('(') {
        cursor.expect('(')?;
        let mut params = vec![cursor.identifier()?];
        cursor.skip_whitespace();
        if cursor.peek() == Some(',') {
            cursor.expect(',')?;
            params.push(cursor.identifier()?);
        }
        cursor.expect(')')?;
        params
    } else {
        vec![cursor.identifier()?]
    };

    cursor.skip_whitespace();
    if !cursor.rest().starts_with("=>") {
        return None;
    }
    cursor.pos += 2;

    let rest = cursor.rest();
    let close = closing_paren(rest)?;
    if !rest[close + 1..].trim().is_empty() {
        return None;
    }
    let body = rest[..close].trim();
    if !body.starts_with('<') || !body.ends_with('>') {
        return None;
    }

    Some(Transform {
        path,
        method,
        params,
        template: body,
    })
}

/// Render a matched transform against `ctx`.
pub fn render_transform(
    interp: &Interpreter,
    transform: &Transform<'_>,
    ctx: &Context,
    depth: usize,
) -> Result<String, InterpError> {
    let items = match ctx.lookup_path(&transform.path) {
        Value::Array(items) => items.borrow().clone(),
        Value::Undefined | Value::Null => {
            log::debug!(
                "{} is nullish, transform renders nothing",
                transform.path.join(".")
            );
            return Ok(String::new());
        }
        other => {
            return Err(EvalError::new(format!(
                "{} is not an array, got {}",
                transform.path.join("."),
                other.type_of()
            ))
            .into())
        }
    };

    let mut out = String::new();
    for (index, item) in items.into_iter().enumerate() {
        let mut element_ctx = ctx.derive(transform.params[0], item);
        if let Some(index_name) = transform.params.get(1) {
            element_ctx.set(*index_name, Value::Number(index as f64));
        }
        let html = driver::render_nested(interp, transform.template, &element_ctx, depth)?;
        match transform.method {
            TransformMethod::Map => out.push_str(&html),
            TransformMethod::Filter if has_text_content(&html) => out.push_str(&html),
            TransformMethod::Filter => {}
        }
    }
    Ok(out)
}

/// Whether rendered markup shows any text once tags are removed. Filters
/// with a markup body keep exactly the elements for which this holds.
pub(crate) fn has_text_content(html: &str) -> bool {
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag && !c.is_whitespace() => return true,
            _ => {}
        }
    }
    false
}

/// Offset of the `)` closing a call whose `(` is already behind `source`.
///
/// `{...}` spans, string literals and tags are stepped over whole. Between
/// an opening tag and its closing tag everything is markup text, so quotes
/// and parentheses there are not counted.
fn closing_paren(source: &str) -> Option<usize> {
    let mut parens = 1usize;
    let mut open_elements = 0usize;
    let mut i = 0;
    while let Some(c) = source[i..].chars().next() {
        let rest = &source[i..];
        match c {
            '{' => {
                i += braced_len(rest)?;
                continue;
            }
            '<' if rest[1..].starts_with(|c: char| c.is_alphabetic() || matches!(c, '/' | '!')) => {
                let tag = &rest[..tag_len(rest)?];
                let opens_element = !tag.starts_with("<!")
                    && !tag.ends_with("/>")
                    && !is_void_element(tag_name(tag));
                if tag.starts_with("</") {
                    open_elements = open_elements.saturating_sub(1);
                } else if opens_element {
                    open_elements += 1;
                }
                i += tag.len();
                continue;
            }
            _ if open_elements > 0 => {}
            '\'' | '"' | '`' => {
                i += string_len(rest)?;
                continue;
            }
            '(' => parens += 1,
            ')' => {
                parens -= 1;
                if parens == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += c.len_utf8();
    }
    None
}

/// Length of the `{...}` span at the start of `source`.
fn braced_len(source: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = 0;
    while let Some(c) = source[i..].chars().next() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            '\'' | '"' | '`' => {
                i += string_len(&source[i..])?;
                continue;
            }
            _ => {}
        }
        i += c.len_utf8();
    }
    None
}

/// Length of the quoted string at the start of `source`, quotes included.
fn string_len(source: &str) -> Option<usize> {
    let quote = source.chars().next()?;
    let mut escaped = false;
    for (i, c) in source.char_indices().skip(1) {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            c if c == quote => return Some(i + c.len_utf8()),
            _ => {}
        }
    }
    None
}

/// Length of the tag at the start of `source`, up to its unquoted `>`.
fn tag_len(source: &str) -> Option<usize> {
    let mut quote = None;
    for (i, c) in source.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => return Some(i + 1),
            _ => {}
        }
    }
    None
}

fn tag_name(tag: &str) -> &str {
    tag.trim_start_matches('<')
        .split(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .next()
        .unwrap_or_default()
}

struct Cursor<'a> {
    source: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(source: &'a str) -> Self {
        Self { source, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.source[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn expect(&mut self, c: char) -> Option<()> {
        self.skip_whitespace();
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            Some(())
        } else {
            None
        }
    }

    fn identifier(&mut self) -> Option<&'a str> {
        self.skip_whitespace();
        let rest = self.rest();
        if !rest.starts_with(|c: char| c.is_alphabetic() || c == '_' || c == '$') {
            return None;
        }
        let len = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
            .unwrap_or(rest.len());
        self.pos += len;
        Some(&rest[..len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    // =========================================================================
    // Matching
    // =========================================================================

    #[test]
    fn test_match_map() {
        let transform = match_transform("items.map(item => <li>{item.name}</li>)").unwrap();
        assert_eq!(transform.path, vec!["items"]);
        assert_eq!(transform.method, TransformMethod::Map);
        assert_eq!(transform.params, vec!["item"]);
        assert_eq!(transform.template, "<li>{item.name}</li>");
    }

    #[test]
    fn test_match_nested_path_and_index() {
        let transform =
            match_transform(" data.user.posts.forEach((post, i) =>\n  <p>{i}</p>\n) ").unwrap();
        assert_eq!(transform.path, vec!["data", "user", "posts"]);
        assert_eq!(transform.method, TransformMethod::Map);
        assert_eq!(transform.params, vec!["post", "i"]);
        assert_eq!(transform.template, "<p>{i}</p>");
    }

    #[test]
    fn test_match_filter() {
        let transform = match_transform("items.filter(x => <b>{x}</b>)").unwrap();
        assert_eq!(transform.method, TransformMethod::Filter);
    }

    #[test]
    fn test_has_text_content() {
        assert!(has_text_content("<b> x </b>"));
        assert!(!has_text_content("<li>  </li>\n"));
        assert!(!has_text_content(""));
    }

    #[test]
    fn test_non_matching_shapes() {
        assert_eq!(match_transform("items.map(i => i.name)"), None);
        assert_eq!(match_transform("items.slice(1).map(i => <li>{i}</li>)"), None);
        assert_eq!(match_transform("items.reduce(i => <li>{i}</li>)"), None);
        assert_eq!(match_transform("items.map(format)"), None);
        assert_eq!(match_transform("user.name"), None);
    }

    #[test]
    fn test_body_ends_at_the_call_not_the_span() {
        let compound = "items.map(i => <li>{i.name}</li>) + items.map(j => <b>{j.name}</b>)";
        assert_eq!(match_transform(compound), None);
        assert_eq!(match_transform("items.map(i => <li>{i}</li>).join('')"), None);
    }

    #[test]
    fn test_body_skips_parens_in_spans_text_and_attributes() {
        let cases = [
            ("items.map(i => <li>{format(i, ')')}</li>)", "<li>{format(i, ')')}</li>"),
            ("items.map(i => <p>Don't (really)</p>)", "<p>Don't (really)</p>"),
            ("items.map(i => <a title=\"a)b\">x<br>y</a>)", "<a title=\"a)b\">x<br>y</a>"),
            ("items.map(i => <img src={i} />)", "<img src={i} />"),
        ];
        for (source, template) in cases {
            let transform = match_transform(source).unwrap();
            assert_eq!(transform.template, template, "{source}");
        }
    }

    // =========================================================================
    // Rendering
    // =========================================================================

    fn render(source: &str, data: serde_json::Value) -> Result<String, InterpError> {
        let ctx = Context::from_json(data).unwrap();
        let transform = match_transform(source).unwrap();
        render_transform(&Interpreter::default(), &transform, &ctx, 0)
    }

    #[test]
    fn test_render_map_in_order() {
        let html = render(
            "items.map(i => <li>{i.name}</li>)",
            json!({"items": [{"name": "A"}, {"name": "B"}]}),
        )
        .unwrap();
        assert_eq!(html, "<li>A</li><li>B</li>");
    }

    #[test]
    fn test_render_with_index() {
        let html = render(
            "items.map((x, n) => <i>{n}:{x}</i>)",
            json!({"items": ["a", "b"]}),
        )
        .unwrap();
        assert_eq!(html, "<i>0:a</i><i>1:b</i>");
    }

    #[test]
    fn test_render_filter_drops_elements_without_text() {
        let html = render(
            "items.filter(i => <span>{i.on ? i.name : ''}</span>)",
            json!({"items": [{"on": true, "name": "A"}, {"on": false, "name": "B"}]}),
        )
        .unwrap();
        assert_eq!(html, "<span>A</span>");
    }

    #[test]
    fn test_render_nullish_is_empty() {
        assert_eq!(render("missing.map(i => <li>{i}</li>)", json!({})).unwrap(), "");
    }

    #[test]
    fn test_render_non_array_fails() {
        let err = render("user.map(i => <li>{i}</li>)", json!({"user": {"a": 1}})).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Evaluation error: user is not an array, got object"
        );
    }
}

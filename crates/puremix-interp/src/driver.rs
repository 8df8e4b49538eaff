//! The template driver: finds every top-level `{...}` span in a template,
//! evaluates it, and splices the result in.
//!
//! Spans are evaluated left to right against one cumulative context, so a
//! code block's exports are visible to every later span. Inserted text is
//! never re-scanned. A span that fails is left in the output verbatim.

use puremix_lexer::{classify, SpanKind};
use puremix_parser::{analyze, split_conditional, ConditionalParts, Parser};

use crate::component::{find_component_tag, scan_open_tag, ComponentTag};
use crate::context::Context;
use crate::transform::{match_transform, render_transform};
use crate::value::Value;
use crate::{builtins, generate, script, InterpError, Interpreter, Options, RecursionLimitError};

/// Literal names that are never looked up as context paths.
const LITERAL_ROOTS: &[&str] = &["true", "false", "null", "undefined"];

/// Substrings that keep a ternary off the text-level fast path.
const COMPLEX_MARKERS: &[&str] = &["=>", ").", "function"];

/// Render a template at nesting level `depth`.
pub fn render(interp: &Interpreter, source: &str, ctx: &mut Context, depth: usize) -> String {
    let imports: Vec<String> = if ctx.renderer().is_some() {
        ctx.imports().map(String::from).collect()
    } else {
        Vec::new()
    };
    let is_component = |name: &str| imports.iter().any(|import| import == name);

    let mut out = String::with_capacity(source.len());
    for segment in Segments::new(source, interp.options(), is_component) {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Span(span) => match evaluate_span(interp, span.inner, ctx, depth) {
                Ok(text) => out.push_str(&text),
                Err(e) => {
                    log::warn!(
                        "leaving span unevaluated at byte {}: {}: {e}",
                        span.offset,
                        span.raw
                    );
                    out.push_str(span.raw);
                }
            },
            Segment::Component(tag) => out.push_str(&render_component(&tag, ctx)),
        }
    }
    out
}

/// Render markup found inside an expression (a ternary branch, a callback
/// body) one level deeper. Exports stay local to the nested render.
pub(crate) fn render_nested(
    interp: &Interpreter,
    markup: &str,
    ctx: &Context,
    depth: usize,
) -> Result<String, InterpError> {
    let next = depth + 1;
    let limit = interp.options().max_depth;
    if next > limit {
        return Err(RecursionLimitError {
            what: "template nesting",
            limit,
        }
        .into());
    }
    let mut scoped = ctx.clone();
    Ok(render(interp, markup, &mut scoped, next))
}

/// Evaluate the inner source of one span to its output text.
///
/// Code blocks run in the script interpreter and merge their exports into
/// `ctx`. Expressions try the fast paths in order (property path, ternary,
/// array transform) and fall back to the full pipeline.
pub fn evaluate_span(
    interp: &Interpreter,
    inner: &str,
    ctx: &mut Context,
    depth: usize,
) -> Result<String, InterpError> {
    let limit = interp.options().max_depth;
    if depth > limit {
        return Err(RecursionLimitError {
            what: "template nesting",
            limit,
        }
        .into());
    }

    let source = inner.trim();
    if source.is_empty() {
        return Ok(String::new());
    }

    if classify(inner) == SpanKind::CodeBlock {
        log::debug!("code block: {}", abbreviate(source));
        return Ok(generate::run_code_block(interp, inner, ctx).to_display());
    }

    if interp.options().fast_paths {
        if let Some(path) = property_path(source) {
            log::debug!("fast path (property): {source}");
            return Ok(lookup(ctx, &path).to_display());
        }
        if !is_complex(source) {
            if let Some(parts) = split_conditional(source) {
                log::debug!("fast path (ternary): {}", abbreviate(source));
                return evaluate_conditional(interp, parts, ctx, depth);
            }
        }
        if let Some(transform) = match_transform(source) {
            log::debug!("fast path (array transform): {}", abbreviate(source));
            return render_transform(interp, &transform, ctx, depth);
        }
    }

    log::debug!("pipeline: {}", abbreviate(source));
    match Parser::parse(&format!("{{{inner}}}")) {
        Ok(tree) => generate::generate(interp, &analyze(tree), ctx, depth),
        Err(e) if !contains_markup(source) => {
            script_fallback(interp, source, ctx, e.into()).map(|value| value.to_display())
        }
        Err(e) => Err(e.into()),
    }
}

/// Evaluate an expression to a value, with the same shortcuts and fallback
/// as a span.
fn evaluate_value(
    interp: &Interpreter,
    source: &str,
    ctx: &Context,
    depth: usize,
) -> Result<Value, InterpError> {
    if let Some(path) = property_path(source) {
        return Ok(lookup(ctx, &path));
    }
    match generate::evaluate_source(interp, source, ctx, depth) {
        Err(e @ (InterpError::Parse(_) | InterpError::Lex(_))) if !contains_markup(source) => {
            script_fallback(interp, source, ctx, e)
        }
        result => result,
    }
}

/// Expressions outside the template grammar (`<`, `>`, `%`, `??`, …) are
/// retried as script expressions. If that does not parse either, the
/// original error stands.
fn script_fallback(
    interp: &Interpreter,
    source: &str,
    ctx: &Context,
    original: InterpError,
) -> Result<Value, InterpError> {
    log::debug!("template grammar rejected span, retrying as script: {original}");
    match script::eval_expression_source(interp, source, ctx) {
        Ok(value) => Ok(value),
        Err(InterpError::Parse(_) | InterpError::Lex(_)) => Err(original),
        Err(e) => Err(e),
    }
}

fn evaluate_conditional(
    interp: &Interpreter,
    parts: ConditionalParts<'_>,
    ctx: &Context,
    depth: usize,
) -> Result<String, InterpError> {
    let branch = if evaluate_value(interp, parts.condition, ctx, depth)?.is_truthy() {
        parts.consequent
    } else {
        parts.alternate
    };

    if branch.starts_with('<') {
        render_nested(interp, branch, ctx, depth)
    } else {
        Ok(evaluate_value(interp, branch, ctx, depth)?.to_display())
    }
}

fn render_component(tag: &ComponentTag<'_>, ctx: &Context) -> String {
    let Some(renderer) = ctx.renderer() else {
        return tag.raw.to_string();
    };
    match renderer.render(tag.name, tag.raw, ctx) {
        Ok(html) => html,
        Err(e) => {
            log::warn!("component {} failed: {e}", tag.name);
            format!("<!-- Component {} failed: {} -->", tag.name, e.message)
        }
    }
}

fn lookup(ctx: &Context, path: &[&str]) -> Value {
    match path.split_first() {
        Some((root, rest)) if !ctx.contains(root) => builtins::global(root)
            .unwrap_or_default()
            .get_path(rest.iter().copied()),
        _ => ctx.lookup_path(path),
    }
}

/// `a.b.c` with identifier segments only, not rooted at a literal.
fn property_path(source: &str) -> Option<Vec<&str>> {
    let segments: Vec<&str> = source.split('.').collect();
    let is_identifier = |s: &str| {
        s.starts_with(|c: char| c.is_alphabetic() || c == '_' || c == '$')
            && s.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$')
    };
    if !segments.iter().all(|s| is_identifier(s)) || LITERAL_ROOTS.contains(&segments[0]) {
        return None;
    }
    Some(segments)
}

fn is_complex(source: &str) -> bool {
    COMPLEX_MARKERS.iter().any(|marker| source.contains(marker))
        || ["const ", "let ", "var "]
            .iter()
            .any(|keyword| source.starts_with(keyword))
}

/// Whether the source holds something shaped like a tag (`<x`, `</x`).
fn contains_markup(source: &str) -> bool {
    source
        .match_indices('<')
        .any(|(i, _)| source[i + 1..].starts_with(|c: char| c.is_alphabetic() || c == '/'))
}

fn abbreviate(source: &str) -> String {
    const MAX: usize = 60;
    match source.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}…", &source[..cut]),
        None => source.to_string(),
    }
}

// =============================================================================
// Segmentation
// =============================================================================

/// A `{...}` span located in template source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanRef<'a> {
    /// Including braces.
    pub raw: &'a str,
    pub inner: &'a str,
    /// Byte offset of the `{`.
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment<'a> {
    Text(&'a str),
    Span(SpanRef<'a>),
    Component(ComponentTag<'a>),
}

/// Every top-level span in `source`, skipping raw-text element content.
pub fn spans<'a>(source: &'a str, options: &'a Options) -> impl Iterator<Item = SpanRef<'a>> {
    Segments::new(source, options, |_: &str| false).filter_map(|segment| match segment {
        Segment::Span(span) => Some(span),
        _ => None,
    })
}

/// Splits a template into literal text, spans and component elements.
struct Segments<'a, F> {
    source: &'a str,
    options: &'a Options,
    is_component: F,
    pos: usize,
    /// Content range of the raw-text element whose opening tag is being
    /// scanned.
    raw: Option<(usize, usize)>,
}

impl<'a, F: Fn(&str) -> bool> Segments<'a, F> {
    fn new(source: &'a str, options: &'a Options, is_component: F) -> Self {
        Self {
            source,
            options,
            is_component,
            pos: 0,
            raw: None,
        }
    }

    /// Emit pending text before a special segment at `at`, or the special
    /// segment itself when nothing is pending.
    fn flush_or(&mut self, start: usize, at: usize, special: Segment<'a>, end: usize) -> Segment<'a> {
        if at > start {
            self.pos = at;
            Segment::Text(&self.source[start..at])
        } else {
            self.pos = end;
            special
        }
    }

    /// `<name ...>` of a raw-text element at `at`: the content range up to
    /// its closing tag.
    fn raw_text_element(&self, at: usize) -> Option<(usize, usize)> {
        let rest = &self.source[at + 1..];
        let name_len = rest
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(rest.len());
        let name = &rest[..name_len];
        if name.is_empty() || !self.options.is_raw_text_tag(name) {
            return None;
        }
        let (open_end, self_closing) = scan_open_tag(self.source, at + 1 + name_len)?;
        if self_closing {
            return None;
        }
        let close = format!("</{}", name.to_ascii_lowercase());
        let content_end = self.source[open_end..]
            .to_ascii_lowercase()
            .find(&close)
            .map_or(self.source.len(), |i| open_end + i);
        Some((open_end, content_end))
    }
}

impl<'a, F: Fn(&str) -> bool> Iterator for Segments<'a, F> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Segment<'a>> {
        let source = self.source;
        let bytes = source.as_bytes();
        if self.pos >= bytes.len() {
            return None;
        }

        let start = self.pos;
        let mut i = start;
        loop {
            if let Some((content_start, content_end)) = self.raw {
                if i >= content_start {
                    if i > start {
                        self.pos = i;
                        return Some(Segment::Text(&source[start..i]));
                    }
                    self.raw = None;
                    self.pos = content_end;
                    return Some(Segment::Text(&source[content_start..content_end]));
                }
            }
            if i >= bytes.len() {
                self.pos = bytes.len();
                return Some(Segment::Text(&source[start..]));
            }

            match bytes[i] {
                b'<' if source[i..].starts_with("<!--") => {
                    i = source[i..].find("-->").map_or(bytes.len(), |end| i + end + 3);
                }
                b'<' if self.raw.is_none() => {
                    if let Some(tag) = find_component_tag(source, i) {
                        if (self.is_component)(tag.name) {
                            return Some(self.flush_or(start, i, Segment::Component(tag), tag.end));
                        }
                    }
                    if let Some(range) = self.raw_text_element(i) {
                        self.raw = Some(range);
                    }
                    i += 1;
                }
                b'{' => match matching_brace(bytes, i) {
                    Some(end) if self.raw.map_or(true, |(content_start, _)| end < content_start) => {
                        let span = SpanRef {
                            raw: &source[i..=end],
                            inner: &source[i + 1..end],
                            offset: i,
                        };
                        return Some(self.flush_or(start, i, Segment::Span(span), end + 1));
                    }
                    _ => i += 1,
                },
                _ => i += 1,
            }
        }
    }
}

/// Index of the `}` closing the `{` at `open`, by plain brace counting.
fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'{' => depth += 1,
            b'}' => {
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

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ctx() -> Context {
        Context::from_json(json!({
            "user": {"name": "Ada", "admin": true},
            "count": 2,
            "items": [{"name": "A"}, {"name": "B"}]
        }))
        .unwrap()
    }

    fn render_with(interp: &Interpreter, source: &str) -> String {
        render(interp, source, &mut ctx(), 0)
    }

    fn render_default(source: &str) -> String {
        render_with(&Interpreter::default(), source)
    }

    // =========================================================================
    // Segmentation
    // =========================================================================

    #[test]
    fn test_spans_found_in_order() {
        let options = Options::default();
        let found: Vec<&str> = spans("<p>{a}</p>{ b.c }", &options).map(|s| s.inner).collect();
        assert_eq!(found, vec!["a", " b.c "]);
    }

    #[test]
    fn test_spans_skip_raw_text_content() {
        let options = Options::default();
        let source = r#"<script src="{cdn}">if (x) { y(); }</script>{after}"#;
        let found: Vec<&str> = spans(source, &options).map(|s| s.inner).collect();
        assert_eq!(found, vec!["cdn", "after"]);
    }

    #[test]
    fn test_nested_braces_match() {
        let options = Options::default();
        let found: Vec<&str> = spans("{ __export = { a: {} }; }", &options)
            .map(|s| s.raw)
            .collect();
        assert_eq!(found, vec!["{ __export = { a: {} }; }"]);
    }

    #[test]
    fn test_unmatched_brace_is_text() {
        assert_eq!(render_default("a { b"), "a { b");
        assert_eq!(render_default("{ {user.name}"), "{ Ada");
    }

    // =========================================================================
    // Evaluation paths
    // =========================================================================

    #[test]
    fn test_property_fast_path() {
        assert_eq!(render_default("<p>{user.name}</p>"), "<p>Ada</p>");
        assert_eq!(render_default("<p>{user.nope.deeper}</p>"), "<p></p>");
        assert_eq!(render_default("{environment}"), "development");
    }

    #[test]
    fn test_ternary_fast_path_with_html_colon() {
        assert_eq!(
            render_default("{user.admin ? <span>Label: {user.name}</span> : 'guest'}"),
            "<span>Label: Ada</span>"
        );
    }

    #[test]
    fn test_transform_fast_path() {
        assert_eq!(
            render_default("<ul>{items.map(i => <li>{i.name}</li>)}</ul>"),
            "<ul><li>A</li><li>B</li></ul>"
        );
    }

    #[test]
    fn test_paths_agree_without_fast_paths() {
        let slow = Interpreter::new(Options::default().fast_paths(false));
        for source in [
            "<p>{user.name}</p>",
            "{user.admin ? <span>Label: {user.name}</span> : 'guest'}",
            "<ul>{items.map(i => <li>{i.name}</li>)}</ul>",
            "{count === 2 ? 'two' : 'other'}",
            "{items.map(i => <li>{i.name}</li>) + items.map(j => <b>{j.name}</b>)}",
            "{items.map(i => <li>{i.name}</li>).length}",
        ] {
            assert_eq!(render_with(&slow, source), render_default(source), "{source}");
        }
    }

    #[test]
    fn test_concatenated_transforms_use_full_pipeline() {
        assert_eq!(
            render_default("{items.map(i => <li>{i.name}</li>) + items.map(j => <b>{j.name}</b>)}"),
            "<li>A</li>,<li>B</li><b>A</b>,<b>B</b>"
        );
        assert_eq!(render_default("{items.map(i => <li>{i.name}</li>).length}"), "2");
    }

    #[test]
    fn test_deeply_nested_expression_left_verbatim() {
        let parens = format!("{{{}x{}}}", "(".repeat(1000), ")".repeat(1000));
        assert_eq!(render_default(&parens), parens);
        let negations = format!("<p>{{{}x}}</p>", "!".repeat(1000));
        assert_eq!(render_default(&negations), negations);
    }

    #[test]
    fn test_script_fallback_for_relational_operators() {
        assert_eq!(render_default("{count > 1 ? 'many' : 'one'}"), "many");
        assert_eq!(render_default("{count % 2}"), "0");
    }

    // =========================================================================
    // Code blocks and error containment
    // =========================================================================

    #[test]
    fn test_exports_flow_forward() {
        assert_eq!(
            render_default("{total}|{ const total = 5; __export = { total }; }|{total}"),
            "||5"
        );
    }

    #[test]
    fn test_failing_span_kept_verbatim() {
        assert_eq!(
            render_default("<p>{missing(1)}</p><p>{user.name}</p>"),
            "<p>{missing(1)}</p><p>Ada</p>"
        );
    }

    #[test]
    fn test_failing_code_block_renders_nothing() {
        assert_eq!(render_default("a{ const x = ; __export = {x}; }b{x}"), "ab");
    }

    #[test]
    fn test_depth_limit() {
        let interp = Interpreter::new(Options::default().max_depth(0));
        assert_eq!(
            render_with(&interp, "{user.admin ? <b>{user.name}</b> : 'no'}"),
            "{user.admin ? <b>{user.name}</b> : 'no'}"
        );
        let err = evaluate_span(&interp, "user.name", &mut ctx(), 1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Recursion limit exceeded: template nesting deeper than 0"
        );
    }

    #[test]
    fn test_html_comment_passes_through() {
        assert_eq!(render_default("<!-- {user.name} -->{count}"), "<!-- {user.name} -->2");
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    #[test]
    fn test_property_path() {
        assert_eq!(property_path("a.b_c.$d"), Some(vec!["a", "b_c", "$d"]));
        assert_eq!(property_path("true"), None);
        assert_eq!(property_path("a..b"), None);
        assert_eq!(property_path("a.b()"), None);
        assert_eq!(property_path("1.5"), None);
    }

    #[test]
    fn test_contains_markup() {
        assert!(contains_markup("a ? <b>x</b> : ''"));
        assert!(!contains_markup("a < b"));
    }
}

//! The seam with the component subsystem.
//!
//! A capitalized tag whose name is one of the context's imports is cut out
//! of the template and handed, raw, to the caller's renderer.

use crate::context::Context;

/// Failure reported by a [`ComponentRenderer`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ComponentError {
    pub message: String,
}

impl ComponentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Renders an imported component tag to HTML.
///
/// Rendering is synchronous: the returned HTML is spliced in place of the
/// tag before the rest of the template is scanned. Callers with an async
/// component subsystem must resolve the component's output before
/// returning from `render`.
///
/// # Example
///
/// ```
/// use std::rc::Rc;
/// use puremix_interp::{interpret_template, ComponentError, ComponentRenderer, Context};
///
/// struct Cards;
///
/// impl ComponentRenderer for Cards {
///     fn render(&self, name: &str, _raw_tag: &str, _ctx: &Context) -> Result<String, ComponentError> {
///         Ok(format!("<section>{name}</section>"))
///     }
/// }
///
/// let mut ctx = Context::new().with_imports(["Card"]).with_renderer(Rc::new(Cards));
/// assert_eq!(interpret_template("<p><Card /></p>", &mut ctx), "<p><section>Card</section></p>");
/// ```
pub trait ComponentRenderer {
    /// `raw_tag` is the full element text, from `<Name` through the
    /// matching `</Name>` (or the self-closing `/>`).
    fn render(&self, name: &str, raw_tag: &str, ctx: &Context) -> Result<String, ComponentError>;
}

/// A component element found in template source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentTag<'a> {
    pub name: &'a str,
    pub raw: &'a str,
    /// Byte offset just past the element.
    pub end: usize,
}

/// Recognize a capitalized element starting at byte `start` (which must
/// hold `<`).
pub fn find_component_tag(source: &str, start: usize) -> Option<ComponentTag<'_>> {
    let rest = source.get(start + 1..)?;
    if !rest.starts_with(|c: char| c.is_ascii_uppercase()) {
        return None;
    }
    let name_len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'))
        .unwrap_or(rest.len());
    let name = &rest[..name_len];

    let (open_end, self_closing) = scan_open_tag(source, start + 1 + name_len)?;
    let end = if self_closing {
        open_end
    } else {
        find_closing(source, open_end, name).unwrap_or(open_end)
    };

    Some(ComponentTag {
        name,
        raw: &source[start..end],
        end,
    })
}

/// Find the `>` ending an opening tag, skipping quoted attribute values and
/// `{...}` attribute expressions. Returns the offset past `>` and whether
/// the tag was self-closing.
pub(crate) fn scan_open_tag(source: &str, from: usize) -> Option<(usize, bool)> {
    let bytes = source.as_bytes();
    let mut i = from;
    let mut quote: Option<u8> = None;
    let mut braces = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => match b {
                b'"' | b'\'' if braces == 0 => quote = Some(b),
                b'{' => braces += 1,
                b'}' => braces = braces.saturating_sub(1),
                b'>' if braces == 0 => {
                    let self_closing = i > from && bytes[i - 1] == b'/';
                    return Some((i + 1, self_closing));
                }
                _ => {}
            },
        }
        i += 1;
    }
    None
}

/// Offset past the `</name>` matching an element opened before `from`,
/// counting nested elements of the same name.
fn find_closing(source: &str, from: usize, name: &str) -> Option<usize> {
    let open = format!("<{name}");
    let close = format!("</{name}>");
    let mut depth = 1usize;
    let mut i = from;

    while i < source.len() {
        let rest = &source[i..];
        if rest.starts_with(&close) {
            depth -= 1;
            if depth == 0 {
                return Some(i + close.len());
            }
            i += close.len();
        } else if rest.starts_with(&open)
            && rest[open.len()..].starts_with(|c: char| c.is_whitespace() || c == '>' || c == '/')
        {
            match scan_open_tag(source, i + open.len()) {
                Some((end, false)) => {
                    depth += 1;
                    i = end;
                }
                Some((end, true)) => i = end,
                None => return None,
            }
        } else {
            i += rest.chars().next().map_or(1, char::len_utf8);
        }
    }
    None
}

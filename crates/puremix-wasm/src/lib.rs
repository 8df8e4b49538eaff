//! WASM bindings for the PureMix template interpreter.
//!
//! Exposes `render()` to JavaScript via wasm-bindgen. The context crosses
//! the boundary as a JSON string; span failures never throw, only a
//! malformed context or options object does.

use puremix_interp::{Context, Interpreter, Options};
use wasm_bindgen::prelude::*;

/// Render a template against a JSON context with default options.
#[wasm_bindgen]
pub fn render(source: &str, context_json: &str) -> Result<String, JsError> {
    render_native(source, context_json, None).map_err(|e| JsError::new(&e))
}

/// Render with an options object, e.g. `{"maxDepth": 8, "fastPaths": false}`.
#[wasm_bindgen(js_name = renderWithOptions)]
pub fn render_with_options(
    source: &str,
    context_json: &str,
    options_json: &str,
) -> Result<String, JsError> {
    render_native(source, context_json, Some(options_json)).map_err(|e| JsError::new(&e))
}

/// Run one code block and return `{ output, exports }`.
///
/// Throws if the block fails to parse or run.
#[wasm_bindgen(js_name = runCodeBlock)]
pub fn run_code_block(source: &str, context_json: &str) -> Result<JsValue, JsError> {
    let (output, exports) = run_native(source, context_json).map_err(|e| JsError::new(&e))?;

    let js_obj = js_sys::Object::new();
    let output = js_sys::JSON::parse(&output).map_err(|_| JsError::new("Failed to parse output"))?;
    let exports =
        js_sys::JSON::parse(&exports).map_err(|_| JsError::new("Failed to parse exports"))?;
    js_sys::Reflect::set(&js_obj, &"output".into(), &output)
        .map_err(|_| JsError::new("Failed to set output property"))?;
    js_sys::Reflect::set(&js_obj, &"exports".into(), &exports)
        .map_err(|_| JsError::new("Failed to set exports property"))?;

    Ok(js_obj.into())
}

/// Get the interpreter version.
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn parse_context(context_json: &str) -> Result<Context, String> {
    let json: serde_json::Value =
        serde_json::from_str(context_json).map_err(|e| format!("Invalid context JSON: {e}"))?;
    Context::from_json(json).map_err(|e| e.to_string())
}

fn render_native(
    source: &str,
    context_json: &str,
    options_json: Option<&str>,
) -> Result<String, String> {
    let options = match options_json {
        Some(json) => {
            serde_json::from_str::<Options>(json).map_err(|e| format!("Invalid options: {e}"))?
        }
        None => Options::default(),
    };
    let mut ctx = parse_context(context_json)?;
    Ok(Interpreter::new(options).render(source, &mut ctx))
}

/// The block's output and exports, each serialized as JSON text.
fn run_native(source: &str, context_json: &str) -> Result<(String, String), String> {
    let ctx = parse_context(context_json)?;
    let outcome = Interpreter::default()
        .run_code_block(source, &ctx)
        .map_err(|e| e.to_string())?;
    let output = outcome.output.to_json().unwrap_or(serde_json::Value::Null);
    Ok((output.to_string(), outcome.exports.to_json().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // =========================================================================
    // Native tests (non-WASM): the render pipeline behind the bindings
    // =========================================================================

    #[test]
    fn test_render_property() {
        let html = render_native("<h1>{user.name}</h1>", r#"{"user":{"name":"Ada"}}"#, None);
        assert_eq!(html.unwrap(), "<h1>Ada</h1>");
    }

    #[test]
    fn test_render_without_spans_is_identity() {
        let source = "<!DOCTYPE html><p>plain</p>";
        assert_eq!(render_native(source, "{}", None).unwrap(), source);
    }

    #[test]
    fn test_render_list() {
        let html = render_native(
            "<ul>{items.map(i => <li>{i}</li>)}</ul>",
            r#"{"items":["A","B"]}"#,
            None,
        );
        assert_eq!(html.unwrap(), "<ul><li>A</li><li>B</li></ul>");
    }

    #[test]
    fn test_invalid_context_json() {
        let err = render_native("{x}", "{not json", None).unwrap_err();
        assert!(err.starts_with("Invalid context JSON"));
    }

    #[test]
    fn test_context_must_be_object() {
        let err = render_native("{x}", "[1]", None).unwrap_err();
        assert_eq!(err, "Evaluation error: context must be a JSON object");
    }

    #[test]
    fn test_options_applied() {
        let html = render_native(
            "{ok ? <b>{name}</b> : ''}",
            r#"{"ok":true,"name":"x"}"#,
            Some(r#"{"maxDepth":0}"#),
        );
        assert_eq!(html.unwrap(), "{ok ? <b>{name}</b> : ''}");
    }

    #[test]
    fn test_invalid_options() {
        let err = render_native("", "{}", Some(r#"{"maxDepth":"deep"}"#)).unwrap_err();
        assert!(err.starts_with("Invalid options"));
    }

    #[test]
    fn test_run_block_exports() {
        let (output, exports) = run_native(
            "const total = price * 2; __export = { total };",
            r#"{"price":4}"#,
        )
        .unwrap();
        assert_eq!(output, "null");
        assert_eq!(exports, r#"{"total":8}"#);
    }

    #[test]
    fn test_run_block_error() {
        let err = run_native("const x = ;", "{}").unwrap_err();
        assert!(err.starts_with("Parse error"), "{err}");
    }

    #[test]
    fn test_version() {
        let v = version();
        assert!(!v.is_empty());
        assert!(v.contains('.'));
    }

    #[test]
    fn test_multiple_renders_share_nothing() {
        let first = render_native("{ const a = 1; __export = { a }; }{a}", "{}", None).unwrap();
        let second = render_native("{a}", "{}", None).unwrap();
        assert_eq!(first, "1");
        assert_eq!(second, "");
    }
}

//! PureMix Template Interpreter
//!
//! Evaluates `{...}` spans in HTML templates against a per-request
//! `Context` and returns the rendered HTML.
//!
//! ```text
//! source ─▶ driver ─▶ fast paths ─┬─▶ output
//!                                 └─▶ Scanner → Parser → analyze → generate
//! ```
//!
//! Code blocks (`{ const x = 1; __export = {x}; }`) run in the script
//! interpreter and their exports flow forward into the context seen by
//! every later span of the same render. A span that fails to lex, parse or
//! evaluate is left in the output unchanged.
//!
//! # Examples
//!
//! ```
//! use puremix_interp::{interpret_template, Context};
//!
//! let mut ctx = Context::from_json(serde_json::json!({
//!     "user": { "name": "Ada" }
//! })).unwrap();
//! assert_eq!(interpret_template("<p>{user.name}</p>", &mut ctx), "<p>Ada</p>");
//! ```

pub mod builtins;
pub mod component;
pub mod context;
pub mod driver;
pub mod generate;
pub mod script;
pub mod transform;
pub mod value;

pub use component::{ComponentError, ComponentRenderer};
pub use context::{Context, ExportRecord};
pub use script::BlockOutcome;
pub use value::Value;

use puremix_lexer::LexError;
use puremix_parser::ParseError;
use serde::Deserialize;

/// Runtime failure inside a code block, method call or expression.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Evaluation error: {message}")]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Nesting went deeper than the configured limit.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Recursion limit exceeded: {what} deeper than {limit}")]
pub struct RecursionLimitError {
    pub what: &'static str,
    pub limit: usize,
}

/// Any failure while interpreting one span.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InterpError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    RecursionLimit(#[from] RecursionLimitError),
}

/// Interpreter limits and switches.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Options {
    /// Maximum template nesting (branch and per-element re-entry).
    pub max_depth: usize,
    /// Maximum guest function call depth.
    pub max_call_depth: usize,
    /// Maximum iterations of a single guest loop.
    pub max_loop_iterations: usize,
    /// Elements whose content is never scanned for spans.
    pub raw_text_tags: Vec<String>,
    /// Try the direct-evaluation shortcuts before the full pipeline.
    pub fast_paths: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_depth: 32,
            max_call_depth: 64,
            max_loop_iterations: 100_000,
            raw_text_tags: ["script", "style", "pre", "code"]
                .into_iter()
                .map(String::from)
                .collect(),
            fast_paths: true,
        }
    }
}

impl Options {
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn max_loop_iterations(mut self, iterations: usize) -> Self {
        self.max_loop_iterations = iterations;
        self
    }

    pub fn raw_text_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.raw_text_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn fast_paths(mut self, enabled: bool) -> Self {
        self.fast_paths = enabled;
        self
    }

    pub(crate) fn is_raw_text_tag(&self, name: &str) -> bool {
        self.raw_text_tags
            .iter()
            .any(|tag| tag.eq_ignore_ascii_case(name))
    }
}

/// Template interpreter configured with `Options`.
#[derive(Debug, Clone, Default)]
pub struct Interpreter {
    options: Options,
}

impl Interpreter {
    pub fn new(options: Options) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Render a whole template. Never fails: spans that cannot be
    /// evaluated are kept verbatim.
    pub fn render(&self, source: &str, ctx: &mut Context) -> String {
        driver::render(self, source, ctx, 0)
    }

    /// Evaluate the inner source of one `{...}` span to its output text.
    pub fn evaluate_span(&self, inner: &str, ctx: &mut Context) -> Result<String, InterpError> {
        driver::evaluate_span(self, inner, ctx, 0)
    }

    /// Evaluate one template expression to a value.
    pub fn evaluate(&self, expression: &str, ctx: &Context) -> Result<Value, InterpError> {
        generate::evaluate_source(self, expression, ctx, 0)
    }

    /// Run a code block against `ctx` without merging its exports.
    pub fn run_code_block(&self, source: &str, ctx: &Context) -> Result<BlockOutcome, InterpError> {
        script::run_block(self, source, ctx)
    }
}

/// Render `source` with default options.
pub fn interpret_template(source: &str, ctx: &mut Context) -> String {
    Interpreter::default().render(source, ctx)
}

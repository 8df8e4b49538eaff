//! Evaluator for the template AST.
//!
//! Runs in two passes over a program: every code block first (merging its
//! exports into the live context, so later blocks see earlier exports),
//! then a stringifying walk over the enriched tree.

use std::collections::VecDeque;

use puremix_parser::ast::{self, Node, NodeKind};
use puremix_parser::script_ast::BinaryOp;
use puremix_parser::{analyze, Parser};

use crate::context::Context;
use crate::transform::has_text_content;
use crate::value::{property_key, Value};
use crate::{builtins, driver, script, EvalError, InterpError, Interpreter};

/// Evaluate an analyzed program to output text, growing `ctx` with the
/// exports of any code blocks it holds.
pub fn generate(
    interp: &Interpreter,
    root: &Node,
    ctx: &mut Context,
    depth: usize,
) -> Result<String, InterpError> {
    let mut blocks = VecDeque::new();
    for node in top_level(root) {
        if let NodeKind::CodeBlock(source) = &node.kind {
            blocks.push_back(run_code_block(interp, source, ctx));
        }
    }

    let generator = Generator { interp, depth };
    let mut out = String::new();
    for node in top_level(root) {
        match &node.kind {
            NodeKind::CodeBlock(_) => {
                let output = blocks.pop_front().unwrap_or_default();
                out.push_str(&output.to_display());
            }
            _ => out.push_str(&generator.eval(node, ctx)?.to_display()),
        }
    }
    Ok(out)
}

/// Parse, analyze and evaluate one template expression.
pub fn evaluate_source(
    interp: &Interpreter,
    expression: &str,
    ctx: &Context,
    depth: usize,
) -> Result<Value, InterpError> {
    let root = analyze(Parser::parse(&format!("{{{expression}}}"))?);
    match top_level(&root).as_slice() {
        [node] if matches!(node.kind, NodeKind::Expression(_)) => {
            Generator { interp, depth }.eval(node, ctx)
        }
        _ => {
            let mut scoped = ctx.clone();
            generate(interp, &root, &mut scoped, depth).map(Value::String)
        }
    }
}

/// Run a code block; failure is logged and degrades to a no-op.
pub(crate) fn run_code_block(interp: &Interpreter, source: &str, ctx: &mut Context) -> Value {
    match script::run_block(interp, source, ctx) {
        Ok(outcome) => {
            ctx.merge_exports(&outcome.exports);
            outcome.output
        }
        Err(e) => {
            log::warn!(
                "code block failed: {e}\n  block: {}\n  context: [{}]",
                source.trim(),
                ctx.names().collect::<Vec<_>>().join(", ")
            );
            Value::Undefined
        }
    }
}

fn top_level(root: &Node) -> Vec<&Node> {
    match &root.kind {
        NodeKind::Program(nodes) => nodes.iter().collect(),
        _ => vec![root],
    }
}

struct Generator<'a> {
    interp: &'a Interpreter,
    depth: usize,
}

impl Generator<'_> {
    fn eval(&self, node: &Node, ctx: &Context) -> Result<Value, InterpError> {
        match &node.kind {
            NodeKind::Program(_) => {
                let mut scoped = ctx.clone();
                generate(self.interp, node, &mut scoped, self.depth).map(Value::String)
            }
            NodeKind::Expression(inner) => self.eval(inner, ctx),
            NodeKind::Text(text) => Ok(Value::String(text.clone())),
            NodeKind::HtmlElement(markup) => {
                driver::render_nested(self.interp, markup, ctx, self.depth).map(Value::String)
            }
            NodeKind::CodeBlock(source) => {
                let mut scoped = ctx.clone();
                Ok(run_code_block(self.interp, source, &mut scoped))
            }

            NodeKind::Identifier(name) => Ok(ctx
                .get(name)
                .or_else(|| builtins::global(name))
                .unwrap_or_default()),
            NodeKind::MemberAccess {
                object,
                property,
                computed,
            } => {
                let object = self.eval(object, ctx)?;
                let key = match (&property.kind, computed) {
                    (NodeKind::Identifier(name), false) => name.clone(),
                    _ => property_key(&self.eval(property, ctx)?),
                };
                Ok(object.get(&key))
            }
            NodeKind::Conditional {
                condition,
                consequent,
                alternate,
            } => {
                if self.eval(condition, ctx)?.is_truthy() {
                    self.eval(consequent, ctx)
                } else {
                    self.eval(alternate, ctx)
                }
            }
            NodeKind::Binary { left, op, right } => {
                let left = self.eval(left, ctx)?;
                let right = self.eval(right, ctx)?;
                let op = match op {
                    ast::BinaryOp::StrictEq => BinaryOp::StrictEq,
                    ast::BinaryOp::StrictNeq => BinaryOp::StrictNotEq,
                    ast::BinaryOp::Add => BinaryOp::Add,
                    ast::BinaryOp::Sub => BinaryOp::Sub,
                    ast::BinaryOp::Mul => BinaryOp::Mul,
                    ast::BinaryOp::Div => BinaryOp::Div,
                };
                Ok(script::binary(op, &left, &right)?)
            }
            NodeKind::Logical { left, op, right } => {
                let left = self.eval(left, ctx)?;
                let short_circuit = match op {
                    ast::LogicalOp::And => !left.is_truthy(),
                    ast::LogicalOp::Or => left.is_truthy(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right, ctx)
                }
            }
            NodeKind::Unary { op, operand } => {
                let value = self.eval(operand, ctx)?;
                Ok(match op {
                    ast::UnaryOp::Not => Value::Bool(!value.is_truthy()),
                    ast::UnaryOp::Neg => Value::Number(-value.to_number()),
                })
            }
            // Calls run through the script engine, never host reflection.
            NodeKind::Call { source, .. } => {
                script::eval_expression_source(self.interp, source, ctx)
            }
            NodeKind::TemplateLiteral(raw) => script::eval_expression_source(self.interp, raw, ctx),

            NodeKind::ArrayMap { array, callback } => {
                let Some(items) = self.items(array, ctx)? else {
                    return Ok(Value::Undefined);
                };
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    out.push(self.call(callback, vec![item, Value::Number(index as f64)], ctx)?);
                }
                Ok(Value::array(out))
            }
            NodeKind::ArrayFilter { array, callback } => {
                let Some(items) = self.items(array, ctx)? else {
                    return Ok(Value::Undefined);
                };
                let renders_html = matches!(
                    &callback.kind,
                    NodeKind::ArrowFunction { body, .. } if matches!(body.kind, NodeKind::HtmlElement(_))
                );
                let mut out = Vec::new();
                for (index, item) in items.into_iter().enumerate() {
                    let result =
                        self.call(callback, vec![item.clone(), Value::Number(index as f64)], ctx)?;
                    if renders_html {
                        let html = result.to_display();
                        if has_text_content(&html) {
                            out.push(Value::String(html));
                        }
                    } else if result.is_truthy() {
                        out.push(item);
                    }
                }
                Ok(Value::array(out))
            }
            NodeKind::ArrayReduce {
                array,
                callback,
                initial,
            } => {
                let Some(items) = self.items(array, ctx)? else {
                    return Ok(Value::Undefined);
                };
                let mut items = items.into_iter().enumerate();
                let mut acc = match initial {
                    Some(initial) => self.eval(initial, ctx)?,
                    None => match items.next() {
                        Some((_, first)) => first,
                        None => {
                            return Err(EvalError::new(
                                "Reduce of empty array with no initial value",
                            )
                            .into())
                        }
                    },
                };
                for (index, item) in items {
                    acc = self.call(callback, vec![acc, item, Value::Number(index as f64)], ctx)?;
                }
                Ok(acc)
            }
            NodeKind::ArrowFunction { .. } => Err(EvalError::new(
                "arrow functions are only allowed as map, filter or reduce callbacks",
            )
            .into()),

            NodeKind::String(s) => Ok(Value::String(s.clone())),
            NodeKind::Number(n) => Ok(Value::Number(*n)),
            NodeKind::Boolean(b) => Ok(Value::Bool(*b)),
            NodeKind::Null => Ok(Value::Null),
            NodeKind::Undefined => Ok(Value::Undefined),
        }
    }

    /// The elements an array transform iterates. A nullish array renders
    /// nothing; anything else that is not an array is an error.
    fn items(&self, array: &Node, ctx: &Context) -> Result<Option<Vec<Value>>, InterpError> {
        match self.eval(array, ctx)? {
            Value::Array(items) => Ok(Some(items.borrow().clone())),
            Value::Undefined | Value::Null => {
                log::debug!("array transform over a nullish value renders nothing");
                Ok(None)
            }
            other => Err(EvalError::new(format!(
                "array transform expects an array, got {}",
                other.type_of()
            ))
            .into()),
        }
    }

    /// Apply a callback: an arrow node runs against a derived context with
    /// its parameters bound; anything else must evaluate to a function.
    fn call(&self, callback: &Node, args: Vec<Value>, ctx: &Context) -> Result<Value, InterpError> {
        match &callback.kind {
            NodeKind::ArrowFunction { params, body } => {
                let mut args = args.into_iter();
                let mut derived = match (params.first(), args.next()) {
                    (Some(param), Some(value)) => ctx.derive(param, value),
                    _ => ctx.clone(),
                };
                for (param, value) in params.iter().skip(1).zip(args) {
                    derived.set(param.as_str(), value);
                }
                self.eval(body, &derived)
            }
            _ => {
                let func = self.eval(callback, ctx)?;
                script::call_function(self.interp, ctx, &func, args)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ctx() -> Context {
        Context::from_json(json!({
            "user": {"name": "Ada", "admin": true, "tags": ["x", "y"]},
            "items": [{"name": "A", "price": 2}, {"name": "B", "price": 3}],
            "count": 0,
            "empty": null
        }))
        .unwrap()
    }

    fn eval(expression: &str) -> Value {
        evaluate_source(&Interpreter::default(), expression, &ctx(), 0).unwrap()
    }

    fn render(expression: &str) -> String {
        eval(expression).to_display()
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    #[test]
    fn test_member_chain() {
        assert_eq!(render("user.name"), "Ada");
        assert_eq!(render("user.tags[1]"), "y");
        assert_eq!(render("user.tags.length"), "2");
        assert_eq!(render("user.missing.deeper"), "");
        assert_eq!(render("nobody"), "");
    }

    // =========================================================================
    // Operators
    // =========================================================================

    #[test]
    fn test_operators() {
        assert_eq!(render("items[0].price * 3 + 1"), "7");
        assert_eq!(render("user.name === 'Ada'"), "true");
        assert_eq!(render("user.name !== 'Ada'"), "false");
        assert_eq!(render("'Hi ' + user.name"), "Hi Ada");
        assert_eq!(render("!user.admin"), "false");
    }

    #[test]
    fn test_logical_returns_operand() {
        assert_eq!(eval("count || 'none'"), Value::from("none"));
        assert_eq!(eval("count && 'some'"), Value::Number(0.0));
        assert_eq!(render("user.admin && 'Admin'"), "Admin");
    }

    #[test]
    fn test_conditional() {
        assert_eq!(render("user.admin ? 'yes' : 'no'"), "yes");
        assert_eq!(render("count ? 'yes' : 'no'"), "no");
        assert_eq!(render("user.admin ? (count ? 'a' : 'b') : 'c'"), "b");
    }

    #[test]
    fn test_html_branch_renders_nested_spans() {
        assert_eq!(
            render("user.admin ? <b>Label: {user.name}</b> : <i>guest</i>"),
            "<b>Label: Ada</b>"
        );
    }

    // =========================================================================
    // Array transforms
    // =========================================================================

    #[test]
    fn test_map_with_html_body() {
        assert_eq!(
            render("items.map(i => <li>{i.name}</li>)"),
            "<li>A</li><li>B</li>"
        );
    }

    #[test]
    fn test_map_with_expression_body_and_index() {
        assert_eq!(render("items.map((i, n) => n + i.name)"), "0A1B");
    }

    #[test]
    fn test_filter() {
        let value = eval("items.filter(i => i.price !== 2)");
        assert_eq!(value.get("length"), Value::Number(1.0));
        assert_eq!(
            render("items.filter(i => i.price === 3).map(i => i.name)"),
            "B"
        );
    }

    #[test]
    fn test_reduce() {
        assert_eq!(render("items.reduce((sum, i) => sum + i.price, 0)"), "5");
    }

    #[test]
    fn test_map_over_nullish_renders_nothing() {
        assert_eq!(render("empty.map(i => <li>{i}</li>)"), "");
    }

    #[test]
    fn test_map_over_non_array_fails() {
        let err = evaluate_source(&Interpreter::default(), "user.map(i => i)", &ctx(), 0)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Evaluation error: array transform expects an array, got object"
        );
    }

    // =========================================================================
    // Calls
    // =========================================================================

    #[test]
    fn test_method_call_through_script_engine() {
        assert_eq!(render("user.name.toUpperCase()"), "ADA");
        assert_eq!(render("items[0].price.toFixed(2)"), "2.00");
    }

    #[test]
    fn test_undefined_function_fails() {
        let err = evaluate_source(&Interpreter::default(), "missing(1)", &ctx(), 0).unwrap_err();
        assert_eq!(err.to_string(), "Evaluation error: missing is not defined");
    }

    #[test]
    fn test_template_literal() {
        assert_eq!(render("`Hello ${user.name}`"), "Hello Ada");
    }

    // =========================================================================
    // Code blocks
    // =========================================================================

    #[test]
    fn test_failed_code_block_is_noop() {
        let mut ctx = Context::new();
        let output = run_code_block(&Interpreter::default(), "const a = ; __export = {a};", &mut ctx);
        assert_eq!(output, Value::Undefined);
        assert_eq!(ctx.names().count(), 0);
    }

    #[test]
    fn test_code_block_exports_merge() {
        let mut ctx = Context::new();
        run_code_block(
            &Interpreter::default(),
            "const total = 5; __export = { total };",
            &mut ctx,
        );
        assert_eq!(ctx.get("total"), Some(Value::Number(5.0)));
    }
}

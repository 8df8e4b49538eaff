//! Tree-walking interpreter for guest scripts: code blocks, method calls
//! and template literals.
//!
//! Name lookup goes local scopes → render context → builtin globals. The
//! render context is read-only from here; the only way out of a code block
//! is the `__export` object.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use puremix_parser::script_ast::{
    BinaryOp, DeclKind, Element, Expr, FunctionBody, FunctionDef, LogicalOp, MemberProperty,
    Pattern, PatternElement, Property, PropertyKey, Stmt, TemplatePart, UnaryOp, UpdateOp,
};
use puremix_parser::ScriptParser;

use crate::builtins;
use crate::context::{Context, ExportRecord};
use crate::value::{array_index, property_key, Function, Value};
use crate::{EvalError, InterpError, Interpreter, RecursionLimitError};

pub(crate) const EXPORT_NAME: &str = "__export";

/// Result of running one code block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockOutcome {
    /// Value the block renders as (see [`run_block`]).
    pub output: Value,
    pub exports: ExportRecord,
}

// =============================================================================
// Environments
// =============================================================================

#[derive(Clone)]
struct Binding {
    value: Value,
    mutable: bool,
}

/// One lexical scope.
pub struct Env {
    bindings: RefCell<HashMap<String, Binding>>,
    parent: Option<Rc<Env>>,
    /// Function bodies and the script root; `var` declares here.
    is_function: bool,
}

impl Env {
    fn root() -> Rc<Env> {
        Rc::new(Env {
            bindings: RefCell::default(),
            parent: None,
            is_function: true,
        })
    }

    fn child(parent: &Rc<Env>, is_function: bool) -> Rc<Env> {
        Rc::new(Env {
            bindings: RefCell::default(),
            parent: Some(Rc::clone(parent)),
            is_function,
        })
    }

    /// A sibling scope holding copies of this scope's bindings.
    fn snapshot(&self) -> Rc<Env> {
        Rc::new(Env {
            bindings: RefCell::new(self.bindings.borrow().clone()),
            parent: self.parent.clone(),
            is_function: self.is_function,
        })
    }

    fn declare(&self, name: &str, value: Value, mutable: bool) {
        self.bindings
            .borrow_mut()
            .insert(name.to_string(), Binding { value, mutable });
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(binding) = self.bindings.borrow().get(name) {
            return Some(binding.value.clone());
        }
        self.parent.as_ref()?.lookup(name)
    }

    /// Returns `Ok(false)` when no scope declares `name`.
    fn assign(&self, name: &str, value: Value) -> Result<bool, EvalError> {
        {
            let mut bindings = self.bindings.borrow_mut();
            if let Some(binding) = bindings.get_mut(name) {
                if !binding.mutable {
                    return Err(EvalError::new(format!(
                        "Assignment to constant variable '{name}'"
                    )));
                }
                binding.value = value;
                return Ok(true);
            }
        }
        match &self.parent {
            Some(parent) => parent.assign(name, value),
            None => Ok(false),
        }
    }

    fn function_scope(self: &Rc<Self>) -> Rc<Env> {
        match &self.parent {
            Some(parent) if !self.is_function => parent.function_scope(),
            _ => Rc::clone(self),
        }
    }

    fn root_scope(self: &Rc<Self>) -> Rc<Env> {
        match &self.parent {
            Some(parent) => parent.root_scope(),
            None => Rc::clone(self),
        }
    }
}

// =============================================================================
// Control flow
// =============================================================================

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Abrupt completion of an expression or statement.
pub(crate) enum Exception {
    /// A guest `throw`.
    Thrown(Value),
    /// A runtime error; catchable by guest `try`.
    Error(EvalError),
    /// Not catchable.
    Limit(RecursionLimitError),
}

impl From<EvalError> for Exception {
    fn from(e: EvalError) -> Self {
        Exception::Error(e)
    }
}

impl From<RecursionLimitError> for Exception {
    fn from(e: RecursionLimitError) -> Self {
        Exception::Limit(e)
    }
}

impl From<Exception> for InterpError {
    fn from(e: Exception) -> Self {
        match e {
            Exception::Thrown(value) => {
                EvalError::new(format!("Uncaught {}", thrown_message(&value))).into()
            }
            Exception::Error(e) => e.into(),
            Exception::Limit(e) => e.into(),
        }
    }
}

pub(crate) type Eval<T> = Result<T, Exception>;

fn thrown_message(value: &Value) -> String {
    match value.get("message") {
        Value::String(message) if matches!(value, Value::Object(_)) => message,
        _ => value.to_js_string(),
    }
}

/// The object a caught runtime error is bound to.
pub(crate) fn error_object(message: &str) -> Value {
    let mut entries = IndexMap::new();
    entries.insert("name".to_string(), Value::from("Error"));
    entries.insert("message".to_string(), Value::from(message));
    Value::object(entries)
}

// =============================================================================
// Entry points
// =============================================================================

/// Run a code block against `ctx`.
///
/// The output is the value of a top-level `return` if one runs; otherwise,
/// for a block that is a single non-assignment expression statement, that
/// expression's value; otherwise `undefined`. Exports are the own entries
/// of `__export` once the block finishes.
pub fn run_block(
    interp: &Interpreter,
    source: &str,
    ctx: &Context,
) -> Result<BlockOutcome, InterpError> {
    let program = ScriptParser::parse(source)?;
    let mut engine = Engine::new(interp, ctx);
    let root = Env::root();
    root.declare(EXPORT_NAME, Value::object(IndexMap::new()), true);

    let statements: Vec<&Stmt> = program
        .body
        .iter()
        .filter(|stmt| !matches!(stmt, Stmt::Empty))
        .collect();

    let output = match statements.as_slice() {
        [Stmt::Expression(expr)] if !matches!(expr, Expr::Assign { .. } | Expr::Update { .. }) => {
            engine.eval(expr, &root)?
        }
        _ => match engine.exec_block(&program.body, &root)? {
            Flow::Return(value) => value,
            _ => Value::Undefined,
        },
    };

    let exports = match root.lookup(EXPORT_NAME) {
        Some(Value::Object(entries)) => ExportRecord(entries.borrow().clone()),
        _ => ExportRecord::default(),
    };
    Ok(BlockOutcome { output, exports })
}

/// Evaluate one script expression (a method call, a template literal).
pub fn eval_expression_source(
    interp: &Interpreter,
    source: &str,
    ctx: &Context,
) -> Result<Value, InterpError> {
    let expr = ScriptParser::parse_expression(source)?;
    let mut engine = Engine::new(interp, ctx);
    Ok(engine.eval(&expr, &Env::root())?)
}

/// Call a guest function value with already-evaluated arguments.
pub fn call_function(
    interp: &Interpreter,
    ctx: &Context,
    func: &Value,
    args: Vec<Value>,
) -> Result<Value, InterpError> {
    let mut engine = Engine::new(interp, ctx);
    Ok(engine.call(func, args, "function")?)
}

// =============================================================================
// Engine
// =============================================================================

pub(crate) struct Engine<'a> {
    interp: &'a Interpreter,
    ctx: &'a Context,
    call_depth: usize,
}

impl<'a> Engine<'a> {
    fn new(interp: &'a Interpreter, ctx: &'a Context) -> Self {
        Self {
            interp,
            ctx,
            call_depth: 0,
        }
    }

    // -- Statements ----------------------------------------------------------

    fn exec_block(&mut self, stmts: &[Stmt], env: &Rc<Env>) -> Eval<Flow> {
        for stmt in stmts {
            if let Stmt::Function(def) = stmt {
                if let Some(name) = &def.name {
                    env.declare(name, closure(def, env), true);
                }
            }
        }
        for stmt in stmts {
            match self.exec(stmt, env)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, env: &Rc<Env>) -> Eval<Flow> {
        match stmt {
            Stmt::Declaration { kind, declarators } => {
                let scope = match kind {
                    DeclKind::Var => env.function_scope(),
                    DeclKind::Let | DeclKind::Const => Rc::clone(env),
                };
                for declarator in declarators {
                    let value = match &declarator.init {
                        Some(init) => self.eval(init, env)?,
                        None => Value::Undefined,
                    };
                    self.bind_pattern(
                        &declarator.target,
                        value,
                        &scope,
                        *kind != DeclKind::Const,
                    )?;
                }
                Ok(Flow::Normal)
            }
            // Hoisted by exec_block.
            Stmt::Function(_) => Ok(Flow::Normal),
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, env)?.is_truthy() {
                    self.exec_scoped(consequent, env)
                } else if let Some(alternate) = alternate {
                    self.exec_scoped(alternate, env)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => self.exec_for(init.as_deref(), test.as_ref(), update.as_ref(), body, env),
            Stmt::ForOf {
                kind,
                target,
                iterable,
                body,
            } => {
                let items = iterable_items(&self.eval(iterable, env)?)?;
                self.exec_for_each(*kind, target, items, body, env)
            }
            Stmt::ForIn {
                kind,
                target,
                object,
                body,
            } => {
                let keys = own_keys(&self.eval(object, env)?)
                    .into_iter()
                    .map(Value::String)
                    .collect();
                self.exec_for_each(*kind, target, keys, body, env)
            }
            Stmt::While { test, body } => {
                let mut count = 0;
                while self.eval(test, env)?.is_truthy() {
                    self.tick(&mut count)?;
                    match self.exec_scoped(body, env)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::DoWhile { body, test } => {
                let mut count = 0;
                loop {
                    self.tick(&mut count)?;
                    match self.exec_scoped(body, env)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if !self.eval(test, env)?.is_truthy() {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Switch {
                discriminant,
                cases,
            } => {
                let value = self.eval(discriminant, env)?;
                let mut start = None;
                for (index, case) in cases.iter().enumerate() {
                    if let Some(test) = &case.test {
                        if self.eval(test, env)?.strict_equals(&value) {
                            start = Some(index);
                            break;
                        }
                    }
                }
                let start = start.or_else(|| cases.iter().position(|case| case.test.is_none()));
                let Some(start) = start else {
                    return Ok(Flow::Normal);
                };

                let scope = Env::child(env, false);
                let body: Vec<Stmt> = cases[start..]
                    .iter()
                    .flat_map(|case| case.body.iter().cloned())
                    .collect();
                match self.exec_block(&body, &scope)? {
                    Flow::Break | Flow::Normal => Ok(Flow::Normal),
                    flow => Ok(flow),
                }
            }
            Stmt::Throw(expr) => Err(Exception::Thrown(self.eval(expr, env)?)),
            Stmt::Try {
                block,
                param,
                handler,
                finalizer,
            } => {
                let mut result = self.exec_block(block, &Env::child(env, false));

                if let Some(handler) = handler {
                    let caught = match &result {
                        Err(Exception::Thrown(value)) => Some(value.clone()),
                        Err(Exception::Error(e)) => Some(error_object(&e.message)),
                        _ => None,
                    };
                    if let Some(caught) = caught {
                        let scope = Env::child(env, false);
                        if let Some(param) = param {
                            self.bind_pattern(param, caught, &scope, true)?;
                        }
                        result = self.exec_block(handler, &scope);
                    }
                }

                if let Some(finalizer) = finalizer {
                    match self.exec_block(finalizer, &Env::child(env, false))? {
                        Flow::Normal => {}
                        flow => return Ok(flow),
                    }
                }
                result
            }
            Stmt::Block(stmts) => self.exec_block(stmts, &Env::child(env, false)),
            Stmt::Expression(expr) => {
                self.eval(expr, env)?;
                Ok(Flow::Normal)
            }
            Stmt::Empty => Ok(Flow::Normal),
        }
    }

    fn exec_scoped(&mut self, stmt: &Stmt, env: &Rc<Env>) -> Eval<Flow> {
        match stmt {
            Stmt::Block(stmts) => self.exec_block(stmts, &Env::child(env, false)),
            other => self.exec(other, env),
        }
    }

    fn exec_for(
        &mut self,
        init: Option<&Stmt>,
        test: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
        env: &Rc<Env>,
    ) -> Eval<Flow> {
        let mut scope = Env::child(env, false);
        if let Some(init) = init {
            self.exec(init, &scope)?;
        }

        let mut count = 0;
        loop {
            if let Some(test) = test {
                if !self.eval(test, &scope)?.is_truthy() {
                    break;
                }
            }
            self.tick(&mut count)?;
            match self.exec_scoped(body, &scope)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
            // Fresh loop bindings per iteration, so closures keep their own.
            scope = scope.snapshot();
            if let Some(update) = update {
                self.eval(update, &scope)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_for_each(
        &mut self,
        kind: Option<DeclKind>,
        target: &Pattern,
        items: Vec<Value>,
        body: &Stmt,
        env: &Rc<Env>,
    ) -> Eval<Flow> {
        let mut count = 0;
        for item in items {
            self.tick(&mut count)?;
            let scope = Env::child(env, false);
            match (kind, target) {
                (None, Pattern::Identifier(name)) => self.assign_name(name, item, env)?,
                (kind, target) => {
                    self.bind_pattern(target, item, &scope, kind != Some(DeclKind::Const))?
                }
            }
            match self.exec_scoped(body, &scope)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
        }
        Ok(Flow::Normal)
    }

    fn tick(&self, count: &mut usize) -> Eval<()> {
        *count += 1;
        let limit = self.interp.options().max_loop_iterations;
        if *count > limit {
            return Err(EvalError::new(format!("Loop exceeded {limit} iterations")).into());
        }
        Ok(())
    }

    // -- Bindings ------------------------------------------------------------

    fn bind_pattern(
        &mut self,
        pattern: &Pattern,
        value: Value,
        env: &Rc<Env>,
        mutable: bool,
    ) -> Eval<()> {
        match pattern {
            Pattern::Identifier(name) => {
                env.declare(name, value, mutable);
                Ok(())
            }
            Pattern::Object { properties, rest } => {
                if value.is_nullish() {
                    return Err(EvalError::new(format!(
                        "Cannot destructure '{}'",
                        value.to_js_string()
                    ))
                    .into());
                }
                for prop in properties {
                    let item = value.get(&prop.key);
                    self.bind_element(&prop.value, item, env, mutable)?;
                }
                if let Some(rest) = rest {
                    let taken: Vec<&str> = properties.iter().map(|p| p.key.as_str()).collect();
                    let remaining = match &value {
                        Value::Object(entries) => entries
                            .borrow()
                            .iter()
                            .filter(|(key, _)| !taken.contains(&key.as_str()))
                            .map(|(key, value)| (key.clone(), value.clone()))
                            .collect(),
                        _ => IndexMap::new(),
                    };
                    env.declare(rest, Value::object(remaining), mutable);
                }
                Ok(())
            }
            Pattern::Array { elements, rest } => {
                let items = iterable_items(&value)?;
                for (index, element) in elements.iter().enumerate() {
                    if let Some(element) = element {
                        let item = items.get(index).cloned().unwrap_or_default();
                        self.bind_element(element, item, env, mutable)?;
                    }
                }
                if let Some(rest) = rest {
                    let remaining = items.iter().skip(elements.len()).cloned().collect();
                    env.declare(rest, Value::array(remaining), mutable);
                }
                Ok(())
            }
        }
    }

    fn bind_element(
        &mut self,
        element: &PatternElement,
        value: Value,
        env: &Rc<Env>,
        mutable: bool,
    ) -> Eval<()> {
        let value = match (&element.default, value) {
            (Some(default), Value::Undefined) => self.eval(default, env)?,
            (_, value) => value,
        };
        self.bind_pattern(&element.target, value, env, mutable)
    }

    /// Assignment to an undeclared name defines it at the script root.
    fn assign_name(&mut self, name: &str, value: Value, env: &Rc<Env>) -> Eval<()> {
        if !env.assign(name, value.clone())? {
            env.root_scope().declare(name, value, true);
        }
        Ok(())
    }

    fn assign_to(&mut self, target: &Expr, value: Value, env: &Rc<Env>) -> Eval<()> {
        match target {
            Expr::Identifier(name) => self.assign_name(name, value, env),
            Expr::Member {
                object, property, ..
            } => {
                let object = self.eval(object, env)?;
                let key = self.member_key(property, env)?;
                set_property(&object, &key, value)?;
                Ok(())
            }
            _ => Err(EvalError::new("Invalid assignment target").into()),
        }
    }

    // -- Expressions ---------------------------------------------------------

    pub(crate) fn eval(&mut self, expr: &Expr, env: &Rc<Env>) -> Eval<Value> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::String(s) => Ok(Value::String(s.clone())),
            Expr::Boolean(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => out.push_str(text),
                        TemplatePart::Expr(expr) => {
                            out.push_str(&self.eval(expr, env)?.to_js_string())
                        }
                    }
                }
                Ok(Value::String(out))
            }
            Expr::Identifier(name) => self.lookup(name, env),
            Expr::Array(elements) => Ok(Value::array(self.eval_elements(elements, env)?)),
            Expr::Object(properties) => self.eval_object(properties, env),
            Expr::Function(def) => Ok(closure(def, env)),
            Expr::Unary { op, operand } => {
                if let (UnaryOp::Typeof, Expr::Identifier(name)) = (op, operand.as_ref()) {
                    let value = self.lookup(name, env).unwrap_or_default();
                    return Ok(Value::from(value.type_of()));
                }
                let value = self.eval(operand, env)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.is_truthy()),
                    UnaryOp::Neg => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                    UnaryOp::Typeof => Value::from(value.type_of()),
                })
            }
            Expr::Update { op, prefix, target } => {
                let old = self.eval(target, env)?.to_number();
                let new = match op {
                    UpdateOp::Increment => old + 1.0,
                    UpdateOp::Decrement => old - 1.0,
                };
                self.assign_to(target, Value::Number(new), env)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                Ok(binary(*op, &left, &right)?)
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left, env)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.is_truthy(),
                    LogicalOp::Or => left.is_truthy(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right, env)
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, env)?.is_truthy() {
                    self.eval(consequent, env)
                } else {
                    self.eval(alternate, env)
                }
            }
            Expr::Assign { op, target, value } => {
                let rhs = self.eval(value, env)?;
                let value = match op.binary() {
                    Some(op) => binary(op, &self.eval(target, env)?, &rhs)?,
                    None => rhs,
                };
                self.assign_to(target, value.clone(), env)?;
                Ok(value)
            }
            Expr::Member { .. } | Expr::Call { .. } => {
                Ok(self.eval_chain(expr, env)?.unwrap_or_default())
            }
        }
    }

    /// Evaluate a member/call chain. `None` means an optional link
    /// short-circuited and the whole chain is `undefined`.
    fn eval_chain(&mut self, expr: &Expr, env: &Rc<Env>) -> Eval<Option<Value>> {
        match expr {
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let Some(object) = self.eval_chain(object, env)? else {
                    return Ok(None);
                };
                if *optional && object.is_nullish() {
                    return Ok(None);
                }
                let key = self.member_key(property, env)?;
                Ok(Some(get_property(&object, &key)?))
            }
            Expr::Call {
                callee,
                arguments,
                optional,
            } => {
                let Some(func) = self.eval_chain(callee, env)? else {
                    return Ok(None);
                };
                if *optional && func.is_nullish() {
                    return Ok(None);
                }
                let args = self.eval_elements(arguments, env)?;
                Ok(Some(self.call(&func, args, &describe(callee))?))
            }
            other => Ok(Some(self.eval(other, env)?)),
        }
    }

    fn member_key(&mut self, property: &MemberProperty, env: &Rc<Env>) -> Eval<String> {
        match property {
            MemberProperty::Static(name) => Ok(name.clone()),
            MemberProperty::Computed(expr) => Ok(property_key(&self.eval(expr, env)?)),
        }
    }

    fn lookup(&self, name: &str, env: &Rc<Env>) -> Eval<Value> {
        if let Some(value) = env.lookup(name) {
            return Ok(value);
        }
        if let Some(value) = self.ctx.get(name) {
            return Ok(value);
        }
        builtins::global(name)
            .ok_or_else(|| EvalError::new(format!("{name} is not defined")).into())
    }

    fn eval_elements(&mut self, elements: &[Element], env: &Rc<Env>) -> Eval<Vec<Value>> {
        let mut out = Vec::with_capacity(elements.len());
        for element in elements {
            match element {
                Element::Item(expr) => out.push(self.eval(expr, env)?),
                Element::Spread(expr) => out.extend(iterable_items(&self.eval(expr, env)?)?),
            }
        }
        Ok(out)
    }

    fn eval_object(&mut self, properties: &[Property], env: &Rc<Env>) -> Eval<Value> {
        let mut entries = IndexMap::new();
        for property in properties {
            match property {
                Property::KeyValue(key, value) => {
                    let key = match key {
                        PropertyKey::Static(key) => key.clone(),
                        PropertyKey::Computed(expr) => property_key(&self.eval(expr, env)?),
                    };
                    entries.insert(key, self.eval(value, env)?);
                }
                Property::Shorthand(name) => {
                    entries.insert(name.clone(), self.lookup(name, env)?);
                }
                Property::Spread(expr) => {
                    let source = self.eval(expr, env)?;
                    for key in own_keys(&source) {
                        let value = source.get(&key);
                        entries.insert(key, value);
                    }
                }
            }
        }
        Ok(Value::object(entries))
    }

    // -- Calls ---------------------------------------------------------------

    /// Call any function value. `name` is used in the error when `func` is
    /// not callable.
    pub(crate) fn call(&mut self, func: &Value, args: Vec<Value>, name: &str) -> Eval<Value> {
        let Value::Function(function) = func else {
            return Err(EvalError::new(format!("{name} is not a function")).into());
        };
        match function.as_ref() {
            Function::Closure { def, env } => self.call_closure(def, env, args),
            Function::Native(native) => builtins::call_native(native, args),
            Function::Method { receiver, name } => {
                builtins::call_method(self, receiver, name, args)
            }
        }
    }

    fn call_closure(&mut self, def: &FunctionDef, env: &Rc<Env>, args: Vec<Value>) -> Eval<Value> {
        let limit = self.interp.options().max_call_depth;
        if self.call_depth >= limit {
            return Err(RecursionLimitError {
                what: "function calls",
                limit,
            }
            .into());
        }

        self.call_depth += 1;
        let result = self.run_closure(def, env, args);
        self.call_depth -= 1;
        result
    }

    fn run_closure(&mut self, def: &FunctionDef, env: &Rc<Env>, args: Vec<Value>) -> Eval<Value> {
        let scope = Env::child(env, true);
        for (index, param) in def.params.iter().enumerate() {
            let arg = args.get(index).cloned().unwrap_or_default();
            self.bind_element(param, arg, &scope, true)?;
        }
        if let Some(rest) = &def.rest {
            let remaining = args.iter().skip(def.params.len()).cloned().collect();
            scope.declare(rest, Value::array(remaining), true);
        }

        match &def.body {
            FunctionBody::Expression(expr) => self.eval(expr, &scope),
            FunctionBody::Block(stmts) => match self.exec_block(stmts, &scope)? {
                Flow::Return(value) => Ok(value),
                _ => Ok(Value::Undefined),
            },
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn closure(def: &Rc<FunctionDef>, env: &Rc<Env>) -> Value {
    Value::Function(Rc::new(Function::Closure {
        def: Rc::clone(def),
        env: Rc::clone(env),
    }))
}

/// Source-like name of a callee, for error messages.
fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Identifier(name) => name.clone(),
        Expr::Member {
            object,
            property: MemberProperty::Static(name),
            ..
        } => format!("{}.{name}", describe(object)),
        Expr::Member { object, .. } => format!("{}[...]", describe(object)),
        Expr::Call { callee, .. } => format!("{}(...)", describe(callee)),
        _ => "expression".into(),
    }
}

/// Elements of a spread, `for…of` or array pattern source.
pub(crate) fn iterable_items(value: &Value) -> Result<Vec<Value>, EvalError> {
    match value {
        Value::Array(items) => Ok(items.borrow().clone()),
        Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
        other => Err(EvalError::new(format!(
            "{} is not iterable",
            match other {
                Value::Undefined | Value::Null => other.to_js_string(),
                _ => other.type_of().to_string(),
            }
        ))),
    }
}

/// Enumerable own keys, as `for…in` and `Object.keys` see them.
pub(crate) fn own_keys(value: &Value) -> Vec<String> {
    match value {
        Value::Object(entries) => entries.borrow().keys().cloned().collect(),
        Value::Array(items) => (0..items.borrow().len()).map(|i| i.to_string()).collect(),
        Value::String(s) => (0..s.chars().count()).map(|i| i.to_string()).collect(),
        _ => Vec::new(),
    }
}

fn get_property(object: &Value, key: &str) -> Result<Value, EvalError> {
    if object.is_nullish() {
        return Err(EvalError::new(format!(
            "Cannot read properties of {} (reading '{key}')",
            object.to_js_string()
        )));
    }
    Ok(object.get(key))
}

fn set_property(object: &Value, key: &str, value: Value) -> Result<(), EvalError> {
    match object {
        Value::Object(entries) => {
            entries.borrow_mut().insert(key.to_string(), value);
        }
        Value::Array(items) => {
            let mut items = items.borrow_mut();
            if let Some(index) = array_index(key) {
                if index >= items.len() {
                    items.resize(index + 1, Value::Undefined);
                }
                items[index] = value;
            } else if key == "length" {
                let len = value.to_number();
                if len < 0.0 || len.fract() != 0.0 {
                    return Err(EvalError::new("Invalid array length"));
                }
                items.resize(len as usize, Value::Undefined);
            } else {
                return Err(EvalError::new(format!(
                    "Cannot set property '{key}' on an array"
                )));
            }
        }
        Value::Undefined | Value::Null => {
            return Err(EvalError::new(format!(
                "Cannot set properties of {} (setting '{key}')",
                object.to_js_string()
            )));
        }
        // Writes to primitives are dropped.
        _ => {}
    }
    Ok(())
}

/// Non-short-circuit binary operators.
pub(crate) fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let numbers = || (left.to_number(), right.to_number());
    Ok(match op {
        BinaryOp::Add => {
            let stringy = |v: &Value| {
                matches!(v, Value::String(_) | Value::Array(_) | Value::Object(_))
            };
            if stringy(left) || stringy(right) {
                Value::String(left.to_js_string() + &right.to_js_string())
            } else {
                let (l, r) = numbers();
                Value::Number(l + r)
            }
        }
        BinaryOp::Sub => {
            let (l, r) = numbers();
            Value::Number(l - r)
        }
        BinaryOp::Mul => {
            let (l, r) = numbers();
            Value::Number(l * r)
        }
        BinaryOp::Div => {
            let (l, r) = numbers();
            Value::Number(l / r)
        }
        BinaryOp::Rem => {
            let (l, r) = numbers();
            Value::Number(l % r)
        }
        BinaryOp::Eq => Value::Bool(left.loose_equals(right)),
        BinaryOp::NotEq => Value::Bool(!left.loose_equals(right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
        BinaryOp::StrictNotEq => Value::Bool(!left.strict_equals(right)),
        BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Lte | BinaryOp::Gte => {
            let ordering = match (left, right) {
                (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
                _ => {
                    let (l, r) = numbers();
                    l.partial_cmp(&r)
                }
            };
            Value::Bool(ordering.is_some_and(|ord| match op {
                BinaryOp::Lt => ord.is_lt(),
                BinaryOp::Gt => ord.is_gt(),
                BinaryOp::Lte => ord.is_le(),
                _ => ord.is_ge(),
            }))
        }
        BinaryOp::In => {
            let key = property_key(left);
            match right {
                Value::Object(entries) => Value::Bool(entries.borrow().contains_key(&key)),
                Value::Array(items) => Value::Bool(
                    key == "length" || array_index(&key).is_some_and(|i| i < items.borrow().len()),
                ),
                other => {
                    return Err(EvalError::new(format!(
                        "Cannot use 'in' operator to search for '{key}' in {}",
                        other.to_js_string()
                    )))
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Options;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn run(source: &str) -> BlockOutcome {
        run_block(&Interpreter::default(), source, &Context::new()).unwrap()
    }

    fn output(source: &str) -> Value {
        run(source).output
    }

    fn error(source: &str) -> String {
        run_block(&Interpreter::default(), source, &Context::new())
            .unwrap_err()
            .to_string()
    }

    // =========================================================================
    // Exports and output
    // =========================================================================

    #[test]
    fn test_export_object_assignment() {
        let outcome = run("const total = 5; __export = { total };");
        assert_eq!(outcome.exports.get("total"), Some(&Value::Number(5.0)));
        assert_eq!(outcome.output, Value::Undefined);
    }

    #[test]
    fn test_export_property_assignment() {
        let outcome = run("__export.a = 1; __export.b = 'two';");
        assert_eq!(outcome.exports.names().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_non_object_export_is_empty() {
        assert!(run("__export = 3;").exports.is_empty());
    }

    #[test]
    fn test_return_is_output() {
        assert_eq!(output("const x = 2; return x * 21;"), Value::Number(42.0));
    }

    #[test]
    fn test_lone_expression_is_output() {
        assert_eq!(output("1 + 2"), Value::Number(3.0));
        assert_eq!(output("x = 1"), Value::Undefined);
    }

    #[test]
    fn test_reads_render_context() {
        let ctx = Context::from_json(json!({"price": 2, "user": {"name": "Ada"}})).unwrap();
        let outcome = run_block(
            &Interpreter::default(),
            "return user.name + ':' + price * 3;",
            &ctx,
        )
        .unwrap();
        assert_eq!(outcome.output, Value::from("Ada:6"));
    }

    // =========================================================================
    // Scoping
    // =========================================================================

    #[test]
    fn test_closures_capture_per_iteration_bindings() {
        let source = "
            const fns = [];
            for (let i = 0; i < 3; i++) { fns.push(() => i); }
            return fns.map(f => f()).join(',');
        ";
        assert_eq!(output(source), Value::from("0,1,2"));
    }

    #[test]
    fn test_const_reassignment_fails() {
        assert_eq!(
            error("const a = 1; a = 2;"),
            "Evaluation error: Assignment to constant variable 'a'"
        );
    }

    #[test]
    fn test_block_scoping() {
        assert_eq!(
            output("let a = 1; { let a = 2; } return a;"),
            Value::Number(1.0)
        );
    }

    #[test]
    fn test_var_is_function_scoped() {
        let source = "function f() { if (true) { var y = 2; } return y; } return f();";
        assert_eq!(output(source), Value::Number(2.0));
    }

    #[test]
    fn test_undeclared_assignment_defines_global() {
        assert_eq!(output("x = 4; return x;"), Value::Number(4.0));
    }

    #[test]
    fn test_function_hoisting() {
        assert_eq!(
            output("return double(4); function double(n) { return n * 2; }"),
            Value::Number(8.0)
        );
    }

    #[test]
    fn test_undefined_name() {
        assert_eq!(error("missing();"), "Evaluation error: missing is not defined");
        assert_eq!(output("return typeof missing;"), Value::from("undefined"));
    }

    // =========================================================================
    // Destructuring and spread
    // =========================================================================

    #[test]
    fn test_object_destructuring() {
        let source = "
            const { a, b: renamed, c = 3, ...rest } = { a: 1, b: 2, d: 4, e: 5 };
            return [a, renamed, c, Object.keys(rest).join('')].join('-');
        ";
        assert_eq!(output(source), Value::from("1-2-3-de"));
    }

    #[test]
    fn test_array_destructuring() {
        let source = "const [first, , third = 9, ...others] = [1, 2]; return [first, third, others.length];";
        assert_eq!(output(source).to_js_string(), "1,9,0");
    }

    #[test]
    fn test_spread() {
        let source = "
            const base = { a: 1 };
            const merged = { ...base, b: 2 };
            const list = [0, ...[1, 2], 3];
            return Object.keys(merged).length + list.length;
        ";
        assert_eq!(output(source), Value::Number(6.0));
    }

    #[test]
    fn test_reference_semantics() {
        assert_eq!(
            output("const a = [1]; const b = a; b.push(2); return a.length;"),
            Value::Number(2.0)
        );
        assert_eq!(output("return [1] === [1];"), Value::Bool(false));
    }

    // =========================================================================
    // Control flow
    // =========================================================================

    #[test]
    fn test_for_of_and_for_in() {
        let source = "
            let sum = 0;
            for (const n of [1, 2, 3]) { sum += n; }
            const keys = [];
            for (const k in { x: 1, y: 2 }) { keys.push(k); }
            return sum + keys.join('');
        ";
        assert_eq!(output(source), Value::from("6xy"));
    }

    #[test]
    fn test_break_and_continue() {
        let source = "
            let out = '';
            for (let i = 0; i < 10; i++) {
                if (i % 2 === 0) continue;
                if (i > 6) break;
                out += i;
            }
            return out;
        ";
        assert_eq!(output(source), Value::from("135"));
    }

    #[test]
    fn test_switch_fallthrough() {
        let source = "
            let out = '';
            switch (2) {
                case 1: out += 'a';
                case 2: out += 'b';
                case 3: out += 'c'; break;
                default: out += 'd';
            }
            return out;
        ";
        assert_eq!(output(source), Value::from("bc"));
    }

    #[test]
    fn test_switch_default() {
        let source = "switch ('z') { case 'a': return 1; default: return 2; }";
        assert_eq!(output(source), Value::Number(2.0));
    }

    #[test]
    fn test_do_while() {
        assert_eq!(
            output("let n = 0; do { n++; } while (n < 5); return n;"),
            Value::Number(5.0)
        );
    }

    // =========================================================================
    // Exceptions
    // =========================================================================

    #[test]
    fn test_catch_runtime_error() {
        let source = "try { missing(); } catch (e) { return e.message; }";
        assert_eq!(output(source), Value::from("missing is not defined"));
    }

    #[test]
    fn test_catch_thrown_value_and_finally() {
        let source = "
            let log = '';
            try { throw 'boom'; } catch (e) { log += e; } finally { log += '!'; }
            return log;
        ";
        assert_eq!(output(source), Value::from("boom!"));
    }

    #[test]
    fn test_uncaught_throw() {
        assert_eq!(error("throw 'boom';"), "Evaluation error: Uncaught boom");
        assert_eq!(
            error("throw Error('bad input');"),
            "Evaluation error: Uncaught bad input"
        );
    }

    #[test]
    fn test_loop_limit() {
        let interp = Interpreter::new(Options::default().max_loop_iterations(10));
        let err = run_block(&interp, "while (true) {}", &Context::new()).unwrap_err();
        assert_eq!(err.to_string(), "Evaluation error: Loop exceeded 10 iterations");
    }

    #[test]
    fn test_call_depth_limit_is_not_catchable() {
        let source = "
            function f(n) { return f(n + 1); }
            try { f(0); } catch (e) { return 'caught'; }
        ";
        let err = run_block(&Interpreter::default(), source, &Context::new()).unwrap_err();
        assert_eq!(
            err,
            InterpError::RecursionLimit(RecursionLimitError {
                what: "function calls",
                limit: 64
            })
        );
    }

    // =========================================================================
    // Operators
    // =========================================================================

    #[test]
    fn test_optional_chaining_and_nullish() {
        assert_eq!(output("const a = null; return a?.b.c;"), Value::Undefined);
        assert_eq!(output("return null ?? 'd';"), Value::from("d"));
        assert_eq!(output("return 0 ?? 'd';"), Value::Number(0.0));
        assert_eq!(
            error("const a = null; return a.b;"),
            "Evaluation error: Cannot read properties of null (reading 'b')"
        );
    }

    #[test]
    fn test_binary_coercions() {
        assert_eq!(output("return '1' + 2;"), Value::from("12"));
        assert_eq!(output("return '3' * 2;"), Value::Number(6.0));
        assert_eq!(output("return 'a' < 'b';"), Value::Bool(true));
        assert_eq!(output("return 1 == '1';"), Value::Bool(true));
        assert_eq!(output("return 1 === '1';"), Value::Bool(false));
        assert_eq!(output("return 'a' in { a: 1 };"), Value::Bool(true));
        assert_eq!(output("return 7 % 3;"), Value::Number(1.0));
    }

    #[test]
    fn test_template_literal() {
        assert_eq!(
            output("const n = 3; return `${n} item${n === 1 ? '' : 's'}`;"),
            Value::from("3 items")
        );
    }

    #[test]
    fn test_not_a_function() {
        assert_eq!(
            error("const o = { a: 1 }; o.a();"),
            "Evaluation error: o.a is not a function"
        );
    }

    #[test]
    fn test_eval_expression_source() {
        let ctx = Context::from_json(json!({"price": 4.5})).unwrap();
        let value = eval_expression_source(&Interpreter::default(), "price.toFixed(2)", &ctx).unwrap();
        assert_eq!(value, Value::from("4.50"));
    }

    #[test]
    fn test_call_function() {
        let interp = Interpreter::default();
        let outcome = run("__export = { add: (a, b) => a + b };");
        let ctx = Context::new();
        let add = outcome.exports.get("add").unwrap();
        let value = call_function(&interp, &ctx, add, vec![Value::Number(2.0), Value::Number(3.0)]).unwrap();
        assert_eq!(value, Value::Number(5.0));
    }
}

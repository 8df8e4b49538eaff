//! Runtime values shared by the template evaluator and the script
//! interpreter.
//!
//! Arrays and objects are reference types (`Rc<RefCell<…>>`): copying a
//! `Value` copies the handle, and strict equality on them is identity.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use puremix_parser::script_ast::FunctionDef;

use crate::builtins;
use crate::script::Env;

pub type Array = Rc<RefCell<Vec<Value>>>;
pub type Object = Rc<RefCell<IndexMap<String, Value>>>;

/// A runtime value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Array),
    Object(Object),
    Function(Rc<Function>),
}

/// Callable values.
pub enum Function {
    /// A guest function with the scope it was created in.
    Closure { def: Rc<FunctionDef>, env: Rc<Env> },
    /// A global builtin such as `Math.floor` or `parseInt`.
    Native(&'static str),
    /// A builtin method read off a value, such as `items.push`.
    Method { receiver: Value, name: String },
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Closure { def, .. } => {
                write!(f, "[Function {}]", def.name.as_deref().unwrap_or("(anonymous)"))
            }
            Function::Native(name) => write!(f, "[Function {name}]"),
            Function::Method { name, .. } => write!(f, "[Function {name}]"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.strict_equals(other)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl Value {
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(entries: IndexMap<String, Value>) -> Self {
        Value::Object(Rc::new(RefCell::new(entries)))
    }

    pub fn native(name: &'static str) -> Self {
        Value::Function(Rc::new(Function::Native(name)))
    }

    pub fn method(receiver: Value, name: &str) -> Self {
        Value::Function(Rc::new(Function::Method {
            receiver,
            name: name.to_string(),
        }))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// `false`, `0`, `NaN`, `""`, `null` and `undefined` are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) | Value::Function(_) => true,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Array(_) | Value::Object(_) => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) => "function",
        }
    }

    /// `===`: same type and value; arrays, objects and functions by identity.
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `==`: `null == undefined`, and numbers, strings and booleans compare
    /// after numeric conversion.
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_) | Value::String(_) | Value::Bool(_), Value::Bool(_))
            | (Value::Bool(_), Value::Number(_) | Value::String(_))
            | (Value::Number(_), Value::String(_))
            | (Value::String(_), Value::Number(_)) => self.to_number() == other.to_number(),
            _ => self.strict_equals(other),
        }
    }

    /// Numeric conversion (`Number(x)`).
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => parse_number(s),
            Value::Array(items) => {
                let items = items.borrow();
                match items.as_slice() {
                    [] => 0.0,
                    [single] => single.to_number(),
                    _ => f64::NAN,
                }
            }
            Value::Object(_) | Value::Function(_) => f64::NAN,
        }
    }

    /// String conversion used inside guest code (`String(x)`, `+`,
    /// template literals).
    pub fn to_js_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".into(),
            Value::Null => "null".into(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .borrow()
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.to_js_string() })
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => "[object Object]".into(),
            Value::Function(_) => "function".into(),
        }
    }

    /// String conversion for template output.
    ///
    /// `undefined` and `null` render as nothing, arrays render their
    /// elements back to back (so a mapped list of fragments is inline
    /// HTML), objects render as compact JSON.
    pub fn to_display(&self) -> String {
        match self {
            Value::Undefined | Value::Null | Value::Function(_) => String::new(),
            Value::Array(items) => items.borrow().iter().map(Value::to_display).collect(),
            Value::Object(_) => self
                .to_json()
                .map(|json| json.to_string())
                .unwrap_or_default(),
            _ => self.to_js_string(),
        }
    }

    /// Read a property without failing: any hop through `undefined` or
    /// `null` yields `undefined`. Builtin method names resolve to callable
    /// bound methods.
    pub fn get(&self, key: &str) -> Value {
        match self {
            Value::String(s) => {
                if key == "length" {
                    return Value::Number(s.chars().count() as f64);
                }
                if let Some(index) = array_index(key) {
                    return s
                        .chars()
                        .nth(index)
                        .map(|c| Value::String(c.to_string()))
                        .unwrap_or_default();
                }
            }
            Value::Array(items) => {
                if key == "length" {
                    return Value::Number(items.borrow().len() as f64);
                }
                if let Some(index) = array_index(key) {
                    return items.borrow().get(index).cloned().unwrap_or_default();
                }
            }
            Value::Object(entries) => {
                if let Some(value) = entries.borrow().get(key) {
                    return value.clone();
                }
            }
            _ => {}
        }

        if builtins::has_method(self, key) {
            Value::method(self.clone(), key)
        } else {
            Value::Undefined
        }
    }

    /// Follow a dotted path, leniently.
    pub fn get_path<'a>(&self, path: impl IntoIterator<Item = &'a str>) -> Value {
        path.into_iter()
            .fold(self.clone(), |value, key| value.get(key))
    }

    /// Convert caller-supplied JSON into a runtime value.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to JSON. `undefined` and functions have no JSON form; inside
    /// arrays they become `null` and inside objects they are skipped.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        Some(match self {
            Value::Undefined | Value::Function(_) => return None,
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER => {
                serde_json::Value::from(*n as i64)
            }
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(
                items
                    .borrow()
                    .iter()
                    .map(|v| v.to_json().unwrap_or(serde_json::Value::Null))
                    .collect(),
            ),
            Value::Object(entries) => serde_json::Value::Object(
                entries
                    .borrow()
                    .iter()
                    .filter_map(|(k, v)| v.to_json().map(|json| (k.clone(), json)))
                    .collect(),
            ),
        })
    }
}

/// 2^53: integral numbers up to this magnitude serialize as JSON integers.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Format a number the way guest code prints it: plain decimals between
/// 1e-6 and 1e21, exponent notation (`1e+21`, `1.5e-7`) outside.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".into();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.into();
    }
    if n == 0.0 {
        // -0 prints as 0
        return "0".into();
    }
    if n.abs() < 1e21 && n.abs() >= 1e-6 {
        return format!("{n}");
    }
    let exponential = format!("{n:e}");
    match exponential.split_once('e') {
        Some((mantissa, power)) if !power.starts_with('-') => format!("{mantissa}e+{power}"),
        _ => exponential,
    }
}

/// String to number: surrounding whitespace ignored, empty is 0.
pub fn parse_number(s: &str) -> f64 {
    let s = s.trim();
    if s.is_empty() {
        return 0.0;
    }
    match s {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).map_or(f64::NAN, |n| n as f64);
    }
    if s.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return f64::NAN;
    }
    s.parse().unwrap_or(f64::NAN)
}

/// A canonical non-negative integer key (`"0"`, `"12"`).
pub fn array_index(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

/// Property key for a value used in `obj[key]`.
pub fn property_key(key: &Value) -> String {
    match key {
        Value::Number(n) => format_number(*n),
        other => other.to_js_string(),
    }
}

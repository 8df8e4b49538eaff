//! Host behavior reachable from guest code.
//!
//! Nothing outside these tables can be called: globals resolve to
//! `Function::Native` handles and methods to `Function::Method` handles,
//! both dispatched here by name.

use indexmap::IndexMap;
use serde::Serialize;

use crate::script::{error_object, own_keys, Engine, Eval};
use crate::value::{format_number, Value};
use crate::EvalError;

const MATH: &[(&str, &str)] = &[
    ("floor", "Math.floor"),
    ("ceil", "Math.ceil"),
    ("round", "Math.round"),
    ("abs", "Math.abs"),
    ("min", "Math.min"),
    ("max", "Math.max"),
    ("pow", "Math.pow"),
    ("sqrt", "Math.sqrt"),
    ("trunc", "Math.trunc"),
    ("sign", "Math.sign"),
];

const JSON: &[(&str, &str)] = &[("stringify", "JSON.stringify"), ("parse", "JSON.parse")];

const OBJECT: &[(&str, &str)] = &[
    ("keys", "Object.keys"),
    ("values", "Object.values"),
    ("entries", "Object.entries"),
    ("assign", "Object.assign"),
];

const ARRAY: &[(&str, &str)] = &[("isArray", "Array.isArray")];

const CONSOLE: &[(&str, &str)] = &[
    ("log", "console.log"),
    ("info", "console.info"),
    ("debug", "console.debug"),
    ("warn", "console.warn"),
    ("error", "console.error"),
];

const FUNCTIONS: &[&str] = &[
    "String",
    "Number",
    "Boolean",
    "parseInt",
    "parseFloat",
    "isNaN",
    "Error",
];

const STRING_METHODS: &[&str] = &[
    "toUpperCase",
    "toLowerCase",
    "trim",
    "trimStart",
    "trimEnd",
    "includes",
    "startsWith",
    "endsWith",
    "indexOf",
    "slice",
    "substring",
    "split",
    "replace",
    "replaceAll",
    "repeat",
    "padStart",
    "padEnd",
    "charAt",
    "concat",
    "toString",
];

const ARRAY_METHODS: &[&str] = &[
    "map",
    "filter",
    "forEach",
    "reduce",
    "find",
    "findIndex",
    "some",
    "every",
    "includes",
    "indexOf",
    "join",
    "slice",
    "concat",
    "push",
    "pop",
    "shift",
    "reverse",
    "sort",
    "flat",
];

/// Resolve a builtin global name.
pub fn global(name: &str) -> Option<Value> {
    let members = match name {
        "Math" => MATH,
        "JSON" => JSON,
        "Object" => OBJECT,
        "Array" => ARRAY,
        "console" => CONSOLE,
        "NaN" => return Some(Value::Number(f64::NAN)),
        "Infinity" => return Some(Value::Number(f64::INFINITY)),
        _ => {
            return FUNCTIONS
                .iter()
                .copied()
                .find(|f| *f == name)
                .map(Value::native);
        }
    };

    let mut entries: IndexMap<String, Value> = members
        .iter()
        .map(|&(key, native)| (key.to_string(), Value::native(native)))
        .collect();
    if name == "Math" {
        entries.insert("PI".into(), Value::Number(std::f64::consts::PI));
    }
    Some(Value::object(entries))
}

/// Whether `name` is an allow-listed method of `value`.
pub fn has_method(value: &Value, name: &str) -> bool {
    match value {
        Value::String(_) => STRING_METHODS.contains(&name),
        Value::Array(_) => ARRAY_METHODS.contains(&name),
        Value::Number(_) => matches!(name, "toFixed" | "toString"),
        Value::Bool(_) => name == "toString",
        Value::Object(_) => name == "hasOwnProperty",
        _ => false,
    }
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

fn number_arg(args: &[Value], index: usize) -> f64 {
    arg(args, index).to_number()
}

// =============================================================================
// Globals
// =============================================================================

pub(crate) fn call_native(name: &str, args: Vec<Value>) -> Eval<Value> {
    let math = |f: fn(f64) -> f64| -> Eval<Value> { Ok(Value::Number(f(number_arg(&args, 0)))) };

    match name {
        "Math.floor" => math(f64::floor),
        "Math.ceil" => math(f64::ceil),
        "Math.round" => math(|n| (n + 0.5).floor()),
        "Math.abs" => math(f64::abs),
        "Math.sqrt" => math(f64::sqrt),
        "Math.trunc" => math(f64::trunc),
        "Math.sign" => math(|n| if n == 0.0 || n.is_nan() { n } else { n.signum() }),
        "Math.pow" => Ok(Value::Number(number_arg(&args, 0).powf(number_arg(&args, 1)))),
        "Math.min" | "Math.max" => {
            let is_min = name == "Math.min";
            let mut result = if is_min { f64::INFINITY } else { f64::NEG_INFINITY };
            for value in &args {
                let n = value.to_number();
                if n.is_nan() {
                    return Ok(Value::Number(f64::NAN));
                }
                result = if is_min { result.min(n) } else { result.max(n) };
            }
            Ok(Value::Number(result))
        }

        "JSON.stringify" => json_stringify(&arg(&args, 0), &arg(&args, 2)),
        "JSON.parse" => {
            let text = arg(&args, 0).to_js_string();
            serde_json::from_str::<serde_json::Value>(&text)
                .map(|json| Value::from_json(&json))
                .map_err(|e| EvalError::new(format!("JSON.parse: {e}")).into())
        }

        "Object.keys" => Ok(Value::array(
            own_keys(&arg(&args, 0)).into_iter().map(Value::String).collect(),
        )),
        "Object.values" => {
            let target = arg(&args, 0);
            Ok(Value::array(
                own_keys(&target).iter().map(|key| target.get(key)).collect(),
            ))
        }
        "Object.entries" => {
            let target = arg(&args, 0);
            Ok(Value::array(
                own_keys(&target)
                    .into_iter()
                    .map(|key| {
                        let value = target.get(&key);
                        Value::array(vec![Value::String(key), value])
                    })
                    .collect(),
            ))
        }
        "Object.assign" => {
            let target = arg(&args, 0);
            let Value::Object(entries) = &target else {
                return Err(EvalError::new("Object.assign target must be an object").into());
            };
            for source in args.iter().skip(1) {
                for key in own_keys(source) {
                    let value = source.get(&key);
                    entries.borrow_mut().insert(key, value);
                }
            }
            Ok(target)
        }

        "Array.isArray" => Ok(Value::Bool(matches!(arg(&args, 0), Value::Array(_)))),

        "String" => Ok(Value::String(
            args.first().map(Value::to_js_string).unwrap_or_default(),
        )),
        "Number" => Ok(Value::Number(args.first().map_or(0.0, Value::to_number))),
        "Boolean" => Ok(Value::Bool(arg(&args, 0).is_truthy())),
        "parseInt" => {
            let radix = match arg(&args, 1) {
                Value::Undefined => None,
                value => Some(value.to_number() as u32),
            };
            Ok(Value::Number(parse_int(&arg(&args, 0).to_js_string(), radix)))
        }
        "parseFloat" => Ok(Value::Number(parse_float(&arg(&args, 0).to_js_string()))),
        "isNaN" => Ok(Value::Bool(number_arg(&args, 0).is_nan())),
        "Error" => Ok(error_object(&match arg(&args, 0) {
            Value::Undefined => String::new(),
            value => value.to_js_string(),
        })),

        "console.log" | "console.info" => {
            log::info!(target: "puremix::console", "{}", console_text(&args));
            Ok(Value::Undefined)
        }
        "console.debug" => {
            log::debug!(target: "puremix::console", "{}", console_text(&args));
            Ok(Value::Undefined)
        }
        "console.warn" => {
            log::warn!(target: "puremix::console", "{}", console_text(&args));
            Ok(Value::Undefined)
        }
        "console.error" => {
            log::error!(target: "puremix::console", "{}", console_text(&args));
            Ok(Value::Undefined)
        }

        _ => Err(EvalError::new(format!("{name} is not a function")).into()),
    }
}

fn json_stringify(value: &Value, indent: &Value) -> Eval<Value> {
    let Some(json) = value.to_json() else {
        return Ok(Value::Undefined);
    };

    let indent = match indent {
        Value::Number(n) if *n >= 1.0 => " ".repeat((*n as usize).min(10)),
        Value::String(s) => s.chars().take(10).collect(),
        _ => String::new(),
    };
    if indent.is_empty() {
        return Ok(Value::String(json.to_string()));
    }

    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    json.serialize(&mut serializer)
        .map_err(|e| EvalError::new(format!("JSON.stringify: {e}")))?;
    String::from_utf8(out)
        .map(Value::String)
        .map_err(|e| EvalError::new(format!("JSON.stringify: {e}")).into())
}

fn console_text(args: &[Value]) -> String {
    args.iter()
        .map(|value| match value {
            Value::String(s) => s.clone(),
            Value::Array(_) | Value::Object(_) => value
                .to_json()
                .map(|json| json.to_string())
                .unwrap_or_default(),
            other => other.to_js_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// `parseInt`: leading whitespace, optional sign, digits in `radix`
/// (default 10, or 16 after a `0x` prefix). Stops at the first invalid
/// digit; no digits is `NaN`.
fn parse_int(text: &str, radix: Option<u32>) -> f64 {
    let text = text.trim_start();
    let (negative, text) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };

    let (radix, digits) = match radix {
        None | Some(0) | Some(16) => {
            match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                Some(rest) => (16, rest),
                None => (radix.filter(|r| *r != 0).unwrap_or(10), text),
            }
        }
        Some(r) if (2..=36).contains(&r) => (r, text),
        Some(_) => return f64::NAN,
    };

    let mut result: Option<f64> = None;
    for c in digits.chars() {
        let Some(digit) = c.to_digit(radix) else {
            break;
        };
        result = Some(result.unwrap_or(0.0) * f64::from(radix) + f64::from(digit));
    }
    match result {
        Some(n) if negative => -n,
        Some(n) => n,
        None => f64::NAN,
    }
}

/// `parseFloat`: the longest numeric prefix.
fn parse_float(text: &str) -> f64 {
    let text = text.trim_start();
    let unsigned = text.trim_start_matches(['+', '-']);
    if unsigned.starts_with("Infinity") {
        return if text.starts_with('-') { f64::NEG_INFINITY } else { f64::INFINITY };
    }

    let bytes = text.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end == digits_start || &text[digits_start..end] == "." {
        return f64::NAN;
    }
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && matches!(bytes[exp_end], b'+' | b'-') {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }
    text[..end].parse().unwrap_or(f64::NAN)
}

// =============================================================================
// Methods
// =============================================================================

pub(crate) fn call_method(
    engine: &mut Engine<'_>,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
) -> Eval<Value> {
    match receiver {
        Value::String(s) => string_method(engine, s, name, &args),
        Value::Array(_) => array_method(engine, receiver, name, args),
        Value::Number(n) => number_method(*n, name, &args),
        Value::Bool(b) if name == "toString" => Ok(Value::String(b.to_string())),
        Value::Object(entries) if name == "hasOwnProperty" => Ok(Value::Bool(
            entries
                .borrow()
                .contains_key(&arg(&args, 0).to_js_string()),
        )),
        _ => Err(EvalError::new(format!("{name} is not a function")).into()),
    }
}

/// Resolve a possibly negative relative index against `len`.
fn relative_index(value: &Value, len: usize, default: usize) -> usize {
    if matches!(value, Value::Undefined) {
        return default;
    }
    let n = value.to_number();
    if n.is_nan() {
        return 0;
    }
    let n = n.trunc();
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        n.min(len as f64) as usize
    }
}

fn clamp_index(value: &Value, len: usize, default: usize) -> usize {
    if matches!(value, Value::Undefined) {
        return default;
    }
    let n = value.to_number();
    if n.is_nan() {
        0
    } else {
        n.trunc().clamp(0.0, len as f64) as usize
    }
}

fn char_index(haystack: &str, byte_index: usize) -> usize {
    haystack[..byte_index].chars().count()
}

fn string_method(engine: &mut Engine<'_>, s: &str, name: &str, args: &[Value]) -> Eval<Value> {
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len();
    let string = |v: String| -> Eval<Value> { Ok(Value::String(v)) };
    let search = arg(args, 0).to_js_string();

    match name {
        "toUpperCase" => string(s.to_uppercase()),
        "toLowerCase" => string(s.to_lowercase()),
        "trim" => string(s.trim().to_string()),
        "trimStart" => string(s.trim_start().to_string()),
        "trimEnd" => string(s.trim_end().to_string()),
        "toString" => string(s.to_string()),
        "includes" => {
            let from = clamp_index(&arg(args, 1), len, 0);
            let rest: String = chars[from..].iter().collect();
            Ok(Value::Bool(rest.contains(&search)))
        }
        "startsWith" => {
            let from = clamp_index(&arg(args, 1), len, 0);
            let rest: String = chars[from..].iter().collect();
            Ok(Value::Bool(rest.starts_with(&search)))
        }
        "endsWith" => {
            let end = clamp_index(&arg(args, 1), len, len);
            let head: String = chars[..end].iter().collect();
            Ok(Value::Bool(head.ends_with(&search)))
        }
        "indexOf" => {
            let from = clamp_index(&arg(args, 1), len, 0);
            let rest: String = chars[from..].iter().collect();
            Ok(Value::Number(
                rest.find(&search)
                    .map_or(-1.0, |byte| (from + char_index(&rest, byte)) as f64),
            ))
        }
        "slice" => {
            let start = relative_index(&arg(args, 0), len, 0);
            let end = relative_index(&arg(args, 1), len, len);
            string(chars[start..end.max(start)].iter().collect())
        }
        "substring" => {
            let a = clamp_index(&arg(args, 0), len, 0);
            let b = clamp_index(&arg(args, 1), len, len);
            string(chars[a.min(b)..a.max(b)].iter().collect())
        }
        "charAt" => {
            let index = number_arg(args, 0);
            let index = if index.is_nan() { 0.0 } else { index.trunc() };
            string(
                (index >= 0.0)
                    .then(|| chars.get(index as usize))
                    .flatten()
                    .map(|c| c.to_string())
                    .unwrap_or_default(),
            )
        }
        "concat" => string(
            std::iter::once(s.to_string())
                .chain(args.iter().map(Value::to_js_string))
                .collect(),
        ),
        "split" => {
            let parts: Vec<Value> = match arg(args, 0) {
                Value::Undefined => vec![Value::from(s)],
                _ if search.is_empty() => {
                    chars.iter().map(|c| Value::String(c.to_string())).collect()
                }
                _ => s.split(search.as_str()).map(Value::from).collect(),
            };
            let parts = match arg(args, 1) {
                Value::Undefined => parts,
                limit => parts.into_iter().take(limit.to_number() as usize).collect(),
            };
            Ok(Value::array(parts))
        }
        "replace" | "replaceAll" => {
            let replacement = arg(args, 1);
            let mut out = String::new();
            let mut rest = s;
            while let Some(byte) = rest.find(&search) {
                out.push_str(&rest[..byte]);
                let piece = match &replacement {
                    Value::Function(_) => engine
                        .call(&replacement, vec![Value::String(search.clone())], "replacer")?
                        .to_js_string(),
                    other => other.to_js_string(),
                };
                out.push_str(&piece);
                rest = &rest[byte + search.len()..];
                if name == "replace" {
                    break;
                }
                if search.is_empty() {
                    // Empty pattern matches between every char.
                    match rest.chars().next() {
                        Some(c) => {
                            out.push(c);
                            rest = &rest[c.len_utf8()..];
                        }
                        None => {
                            rest = "";
                            break;
                        }
                    }
                }
            }
            out.push_str(rest);
            string(out)
        }
        "repeat" => {
            let count = number_arg(args, 0);
            if count < 0.0 || count.is_infinite() {
                return Err(EvalError::new(format!(
                    "Invalid count value: {}",
                    format_number(count)
                ))
                .into());
            }
            let count = if count.is_nan() { 0 } else { count as usize };
            string(s.repeat(count))
        }
        "padStart" | "padEnd" => {
            let target = number_arg(args, 0);
            let fill = match arg(args, 1) {
                Value::Undefined => " ".to_string(),
                value => value.to_js_string(),
            };
            if target.is_nan() || target as usize <= len || fill.is_empty() {
                return string(s.to_string());
            }
            let padding: String = fill.chars().cycle().take(target as usize - len).collect();
            if name == "padStart" {
                string(padding + s)
            } else {
                string(s.to_string() + &padding)
            }
        }
        _ => Err(EvalError::new(format!("{name} is not a function")).into()),
    }
}

fn array_method(
    engine: &mut Engine<'_>,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
) -> Eval<Value> {
    let Value::Array(cell) = receiver else {
        return Err(EvalError::new(format!("{name} is not a function")).into());
    };
    // Callbacks may mutate the array; iterate over a snapshot.
    let items = cell.borrow().clone();
    let callback = arg(&args, 0);
    let call = |engine: &mut Engine<'_>, item: &Value, index: usize| {
        engine.call(
            &callback,
            vec![item.clone(), Value::Number(index as f64), receiver.clone()],
            "callback",
        )
    };

    match name {
        "map" => {
            let mut out = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                out.push(call(engine, item, index)?);
            }
            Ok(Value::array(out))
        }
        "filter" => {
            let mut out = Vec::new();
            for (index, item) in items.iter().enumerate() {
                if call(engine, item, index)?.is_truthy() {
                    out.push(item.clone());
                }
            }
            Ok(Value::array(out))
        }
        "forEach" => {
            for (index, item) in items.iter().enumerate() {
                call(engine, item, index)?;
            }
            Ok(Value::Undefined)
        }
        "find" | "findIndex" => {
            for (index, item) in items.iter().enumerate() {
                if call(engine, item, index)?.is_truthy() {
                    return Ok(if name == "find" {
                        item.clone()
                    } else {
                        Value::Number(index as f64)
                    });
                }
            }
            Ok(if name == "find" {
                Value::Undefined
            } else {
                Value::Number(-1.0)
            })
        }
        "some" => {
            for (index, item) in items.iter().enumerate() {
                if call(engine, item, index)?.is_truthy() {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "every" => {
            for (index, item) in items.iter().enumerate() {
                if !call(engine, item, index)?.is_truthy() {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        "reduce" => {
            let mut iter = items.iter().enumerate();
            let mut acc = match args.get(1) {
                Some(initial) => initial.clone(),
                None => match iter.next() {
                    Some((_, first)) => first.clone(),
                    None => {
                        return Err(EvalError::new(
                            "Reduce of empty array with no initial value",
                        )
                        .into())
                    }
                },
            };
            for (index, item) in iter {
                acc = engine.call(
                    &callback,
                    vec![acc, item.clone(), Value::Number(index as f64), receiver.clone()],
                    "callback",
                )?;
            }
            Ok(acc)
        }
        "includes" => {
            let needle = arg(&args, 0);
            Ok(Value::Bool(items.iter().any(|item| {
                item.strict_equals(&needle)
                    || matches!((item, &needle), (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan())
            })))
        }
        "indexOf" => {
            let needle = arg(&args, 0);
            Ok(Value::Number(
                items
                    .iter()
                    .position(|item| item.strict_equals(&needle))
                    .map_or(-1.0, |i| i as f64),
            ))
        }
        "join" => {
            let separator = match arg(&args, 0) {
                Value::Undefined => ",".to_string(),
                value => value.to_js_string(),
            };
            Ok(Value::String(
                items
                    .iter()
                    .map(|v| if v.is_nullish() { String::new() } else { v.to_js_string() })
                    .collect::<Vec<_>>()
                    .join(&separator),
            ))
        }
        "slice" => {
            let len = items.len();
            let start = relative_index(&arg(&args, 0), len, 0);
            let end = relative_index(&arg(&args, 1), len, len);
            Ok(Value::array(items[start..end.max(start)].to_vec()))
        }
        "concat" => {
            let mut out = items;
            for value in &args {
                match value {
                    Value::Array(other) => out.extend(other.borrow().iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            Ok(Value::array(out))
        }
        "flat" => {
            let mut out = Vec::new();
            for item in items {
                match &item {
                    Value::Array(inner) => out.extend(inner.borrow().iter().cloned()),
                    _ => out.push(item),
                }
            }
            Ok(Value::array(out))
        }
        "push" => {
            let mut items = cell.borrow_mut();
            items.extend(args);
            Ok(Value::Number(items.len() as f64))
        }
        "pop" => Ok(cell.borrow_mut().pop().unwrap_or_default()),
        "shift" => {
            let mut items = cell.borrow_mut();
            Ok(if items.is_empty() {
                Value::Undefined
            } else {
                items.remove(0)
            })
        }
        "reverse" => {
            cell.borrow_mut().reverse();
            Ok(receiver.clone())
        }
        "sort" => {
            let sorted = match &callback {
                Value::Undefined => default_sort(items),
                comparator => merge_sort(engine, items, comparator)?,
            };
            *cell.borrow_mut() = sorted;
            Ok(receiver.clone())
        }
        _ => Err(EvalError::new(format!("{name} is not a function")).into()),
    }
}

/// String order, `undefined` last.
fn default_sort(items: Vec<Value>) -> Vec<Value> {
    let (mut defined, undefined): (Vec<Value>, Vec<Value>) = items
        .into_iter()
        .partition(|v| !matches!(v, Value::Undefined));
    defined.sort_by_cached_key(Value::to_js_string);
    defined.extend(undefined);
    defined
}

/// Stable sort with a guest comparator, which may fail.
fn merge_sort(engine: &mut Engine<'_>, mut items: Vec<Value>, comparator: &Value) -> Eval<Vec<Value>> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(engine, items, comparator)?;
    let right = merge_sort(engine, right, comparator)?;

    let mut out = Vec::with_capacity(left.len() + right.len());
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        let order = engine
            .call(comparator, vec![left[i].clone(), right[j].clone()], "comparator")?
            .to_number();
        if order > 0.0 {
            out.push(right[j].clone());
            j += 1;
        } else {
            out.push(left[i].clone());
            i += 1;
        }
    }
    out.extend_from_slice(&left[i..]);
    out.extend_from_slice(&right[j..]);
    Ok(out)
}

fn number_method(n: f64, name: &str, args: &[Value]) -> Eval<Value> {
    match name {
        "toFixed" => {
            let digits = match arg(args, 0) {
                Value::Undefined => 0.0,
                value => value.to_number(),
            };
            if !(0.0..=100.0).contains(&digits) {
                return Err(EvalError::new("toFixed() digits argument must be between 0 and 100").into());
            }
            Ok(Value::String(to_fixed(n, digits as usize)))
        }
        "toString" => match arg(args, 0) {
            Value::Undefined => Ok(Value::String(format_number(n))),
            radix => {
                let radix = radix.to_number() as u32;
                if !(2..=36).contains(&radix) {
                    return Err(EvalError::new("toString() radix must be between 2 and 36").into());
                }
                Ok(Value::String(to_radix(n, radix)))
            }
        },
        _ => Err(EvalError::new(format!("{name} is not a function")).into()),
    }
}

/// Fixed-point formatting with ties rounded away from zero.
fn to_fixed(n: f64, digits: usize) -> String {
    if !n.is_finite() || n.abs() >= 1e21 {
        return format_number(n);
    }
    let scale = 10f64.powi(digits as i32);
    let scaled = n * scale;
    let rounded = if scaled.abs() < 9.0e15 {
        scaled.round() / scale
    } else {
        n
    };
    format!("{rounded:.digits$}")
}

fn to_radix(n: f64, radix: u32) -> String {
    if !n.is_finite() || n.fract() != 0.0 || radix == 10 {
        return format_number(n);
    }
    let negative = n < 0.0;
    let mut value = n.abs() as u64;
    if value == 0 {
        return "0".into();
    }
    let mut digits = Vec::new();
    while value > 0 {
        if let Some(c) = std::char::from_digit((value % u64::from(radix)) as u32, radix) {
            digits.push(c);
        }
        value /= u64::from(radix);
    }
    if negative {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

//! The evaluation context threaded through one render.

use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::component::ComponentRenderer;
use crate::value::Value;
use crate::EvalError;

const DEFAULT_ENV: &str = "development";

/// Bindings a code block exposed through `__export`, in export order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportRecord(pub IndexMap<String, Value>);

impl ExportRecord {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// The record as a JSON object; functions and `undefined` are dropped.
    pub fn to_json(&self) -> serde_json::Value {
        let entries = self
            .0
            .iter()
            .filter_map(|(name, value)| Some((name.clone(), value.to_json()?)))
            .collect();
        serde_json::Value::Object(entries)
    }
}

/// Name → value bindings for one render.
///
/// Grows monotonically while the driver scans a template (code-block
/// exports are merged in as they run). Per-element callback contexts are
/// separate copies made with [`Context::derive`].
#[derive(Clone)]
pub struct Context {
    bindings: IndexMap<String, Value>,
    env: String,
    imports: HashSet<String>,
    renderer: Option<Rc<dyn ComponentRenderer>>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("bindings", &self.bindings)
            .field("env", &self.env)
            .field("imports", &self.imports)
            .field("renderer", &self.renderer.is_some())
            .finish()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            bindings: IndexMap::new(),
            env: DEFAULT_ENV.to_string(),
            imports: HashSet::new(),
            renderer: None,
        }
    }

    /// Build a context from request data.
    ///
    /// Every top-level key becomes a binding. Each entry of a `loaders`
    /// object is additionally bound under its own name unless that name is
    /// already taken.
    pub fn from_json(json: serde_json::Value) -> Result<Self, EvalError> {
        let serde_json::Value::Object(map) = json else {
            return Err(EvalError::new("context must be a JSON object"));
        };

        let mut ctx = Self::new();
        for (name, value) in &map {
            ctx.set(name, Value::from_json(value));
        }
        if let Some(serde_json::Value::Object(loaders)) = map.get("loaders") {
            for (name, value) in loaders {
                if !ctx.bindings.contains_key(name) {
                    ctx.set(name, Value::from_json(value));
                }
            }
        }
        if let Some(serde_json::Value::String(env)) = map.get("environment") {
            ctx.env = env.clone();
        }
        Ok(ctx)
    }

    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = env.into();
        self
    }

    pub fn with_imports<I, S>(mut self, imports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.imports.extend(imports.into_iter().map(Into::into));
        self
    }

    pub fn with_renderer(mut self, renderer: Rc<dyn ComponentRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name) || name == "environment"
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        match self.bindings.get(name) {
            Some(value) => Some(value.clone()),
            None if name == "environment" => Some(Value::String(self.env.clone())),
            None => None,
        }
    }

    /// Resolve a dotted path. A missing root or any nullish hop yields
    /// `undefined`.
    pub fn lookup_path(&self, path: &[&str]) -> Value {
        match path.split_first() {
            Some((root, rest)) => self
                .get(root)
                .unwrap_or_default()
                .get_path(rest.iter().copied()),
            None => Value::Undefined,
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    /// A copy of this context with one extra binding, for a single
    /// callback evaluation. The parent is untouched.
    pub fn derive(&self, name: &str, value: Value) -> Context {
        let mut derived = self.clone();
        derived.set(name, value);
        derived
    }

    pub fn merge_exports(&mut self, record: &ExportRecord) {
        for (name, value) in &record.0 {
            self.set(name.clone(), value.clone());
        }
    }

    pub fn imports(&self) -> impl Iterator<Item = &str> {
        self.imports.iter().map(String::as_str)
    }

    pub fn is_import(&self, name: &str) -> bool {
        self.imports.contains(name)
    }

    pub fn renderer(&self) -> Option<&Rc<dyn ComponentRenderer>> {
        self.renderer.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_binds_top_level_keys() {
        let ctx = Context::from_json(json!({"user": {"name": "Ada"}, "count": 3})).unwrap();
        assert_eq!(ctx.lookup_path(&["user", "name"]), Value::from("Ada"));
        assert_eq!(ctx.get("count"), Some(Value::Number(3.0)));
        assert_eq!(ctx.names().collect::<Vec<_>>(), vec!["user", "count"]);
    }

    #[test]
    fn test_from_json_rejects_non_object() {
        let err = Context::from_json(json!([1, 2])).unwrap_err();
        assert_eq!(err.message, "context must be a JSON object");
    }

    #[test]
    fn test_loader_results_bound_by_name() {
        let ctx = Context::from_json(json!({
            "loaders": {"products": [1, 2]}
        }))
        .unwrap();
        assert_eq!(ctx.lookup_path(&["products", "length"]), Value::Number(2.0));
        assert_eq!(
            ctx.lookup_path(&["loaders", "products", "length"]),
            Value::Number(2.0)
        );
    }

    #[test]
    fn test_loader_does_not_shadow_explicit_binding() {
        let ctx = Context::from_json(json!({
            "loaders": {"user": "loaded"},
            "user": "explicit"
        }))
        .unwrap();
        assert_eq!(ctx.get("user"), Some(Value::from("explicit")));
    }

    #[test]
    fn test_environment_binding() {
        let ctx = Context::new().with_env("production");
        assert_eq!(ctx.get("environment"), Some(Value::from("production")));
        assert_eq!(Context::new().env(), "development");
    }

    #[test]
    fn test_missing_path_is_undefined() {
        let ctx = Context::new();
        assert_eq!(ctx.lookup_path(&["nope", "deeper"]), Value::Undefined);
        assert_eq!(ctx.lookup_path(&[]), Value::Undefined);
    }

    #[test]
    fn test_derive_leaves_parent_untouched() {
        let parent = Context::from_json(json!({"a": 1})).unwrap();
        let child = parent.derive("item", Value::from("x"));
        assert_eq!(child.get("item"), Some(Value::from("x")));
        assert_eq!(parent.get("item"), None);
        assert_eq!(child.get("a"), Some(Value::Number(1.0)));
    }

    #[test]
    fn test_merge_exports() {
        let mut ctx = Context::new();
        let mut record = ExportRecord::default();
        record.0.insert("total".into(), Value::Number(5.0));
        ctx.merge_exports(&record);
        assert_eq!(ctx.get("total"), Some(Value::Number(5.0)));
    }

    #[test]
    fn test_imports() {
        let ctx = Context::new().with_imports(["Card"]);
        assert!(ctx.is_import("Card"));
        assert!(!ctx.is_import("card"));
    }

    #[test]
    fn test_export_record_to_json_drops_functions() {
        let mut entries = IndexMap::new();
        entries.insert("total".to_string(), Value::Number(5.0));
        entries.insert("format".to_string(), Value::native("String"));
        entries.insert("tags".to_string(), Value::array(vec!["a".into()]));
        let record = ExportRecord(entries);
        assert_eq!(record.to_json(), json!({"total": 5, "tags": ["a"]}));
    }
}

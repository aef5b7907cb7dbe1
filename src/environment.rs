//! Read-only data the engine consults for indirect resolution.
//!
//! The environment is passed in explicitly; the engine never reads process
//! state. Decoding the same buffer against two different environments can
//! legitimately produce two different results.

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::literal;

/// A scalar as it appears in a [`GlobalTable`] or as a callable result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    /// Renders the value as source text: text becomes an escaped single-quoted
    /// literal, numbers are emitted bare.
    ///
    /// ```rust
    /// use deobfuscator_rs::Value;
    ///
    /// assert_eq!(Value::from("it's").to_literal(), r"'it\'s'");
    /// assert_eq!(Value::Int(42).to_literal(), "42");
    /// assert_eq!(Value::Float(3.0).to_literal(), "3");
    /// ```
    pub fn to_literal(&self) -> String {
        match self {
            Value::Int(value) => value.to_string(),
            Value::Float(value) => literal::format_float(*value),
            Value::Str(value) => literal::quote(value),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(value) => Some(*value as f64),
            Value::Float(value) => Some(*value),
            Value::Str(value) => value.trim().parse().ok(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => f.write_str(&literal::format_float(*value)),
            Value::Str(value) => f.write_str(value),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

/// Array name to ordered values, used for `$GLOBALS['name'][N]`, `$name[N]`
/// and `${'name'}[N]` lookups.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct GlobalTable(HashMap<String, Vec<Value>>);

impl GlobalTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `values` under `name`, replacing any previous array.
    pub fn insert<I, V>(&mut self, name: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.0
            .insert(name.into(), values.into_iter().map(Into::into).collect());
    }

    /// Looks up element `index` of array `name`.
    pub fn get(&self, name: &str, index: usize) -> Option<&Value> {
        self.0.get(name).and_then(|values| values.get(index))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A pure single-argument helper. Plain function pointers cannot capture
/// state, which keeps registered helpers side-effect free.
pub type Callable = fn(i64) -> Value;

/// Host functionality that must never be reachable through indirect calls.
/// Names are compared case-insensitively, matching how PHP resolves them.
const FORBIDDEN_CALLABLES: &[&str] = &[
    "assert",
    "call_user_func",
    "call_user_func_array",
    "create_function",
    "eval",
    "exec",
    "file_get_contents",
    "file_put_contents",
    "fopen",
    "fwrite",
    "include",
    "include_once",
    "mail",
    "passthru",
    "pcntl_exec",
    "popen",
    "preg_replace",
    "proc_open",
    "readfile",
    "require",
    "require_once",
    "shell_exec",
    "system",
    "unlink",
];

/// Closed allow-list of helpers used to resolve `name(N)` calls.
#[derive(Debug, Clone, Default)]
pub struct CallableRegistry(HashMap<String, Callable>);

impl CallableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `callable` under `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `name` is not a plain identifier
    /// - `name` is one of the host functions that execute code, spawn
    ///   processes or touch files
    /// - `name` is already registered
    ///
    /// ```rust
    /// use deobfuscator_rs::{CallableRegistry, Error, Value};
    ///
    /// fn table(index: i64) -> Value {
    ///     Value::Int(index * 2)
    /// }
    ///
    /// let mut registry = CallableRegistry::new();
    /// registry.register("_x", table).unwrap();
    /// assert_eq!(
    ///     registry.register("system", table),
    ///     Err(Error::ForbiddenCallable("system".into()))
    /// );
    /// ```
    pub fn register(&mut self, name: impl Into<String>, callable: Callable) -> Result<()> {
        let name = name.into();
        if !is_identifier(&name) {
            log::warn!("Rejected callable with invalid name: {name:?}");
            return Err(Error::InvalidCallableName(name));
        }
        let lowered = name.to_lowercase();
        if FORBIDDEN_CALLABLES.contains(&lowered.as_str()) {
            log::warn!("Rejected forbidden callable: {name}");
            return Err(Error::ForbiddenCallable(name));
        }
        if self.contains(&name) {
            return Err(Error::DuplicateCallable(name));
        }
        self.0.insert(name, callable);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Callable> {
        self.0.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(first) if first.is_alphabetic() || first == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// External data consulted by the engine. Only ever read during decoding.
///
/// Loads from JSON as `{"globals": {"name": [values...]}}`; callables are
/// registered in code.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Environment {
    #[serde(default)]
    globals: GlobalTable,
    #[serde(skip)]
    callables: CallableRegistry,
}

impl Environment {
    pub fn new(globals: GlobalTable, callables: CallableRegistry) -> Self {
        Self { globals, callables }
    }

    pub fn globals(&self) -> &GlobalTable {
        &self.globals
    }

    pub fn callables(&self) -> &CallableRegistry {
        &self.callables
    }

    pub fn with_globals(mut self, globals: GlobalTable) -> Self {
        self.globals = globals;
        self
    }

    pub fn with_callables(mut self, callables: CallableRegistry) -> Self {
        self.callables = callables;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn twice(index: i64) -> Value {
        Value::Int(index * 2)
    }

    #[test]
    fn test_register() {
        fn rejected(name: &str, expected: Error) {
            let mut registry = CallableRegistry::new();
            assert_eq!(registry.register(name, twice), Err(expected), "{name}");
            assert!(registry.is_empty());
        }

        let mut registry = CallableRegistry::new();
        registry.register("_0x1f", twice).unwrap();
        registry.register("Функция", twice).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("Функция"));
        assert!(!registry.contains("_0x20"));
        assert_eq!(registry.get("_0x1f").map(|f| f(4)), Some(Value::Int(8)));
        assert_eq!(
            registry.register("_0x1f", twice),
            Err(Error::DuplicateCallable("_0x1f".into()))
        );

        rejected("", Error::InvalidCallableName("".into()));
        rejected("1abc", Error::InvalidCallableName("1abc".into()));
        rejected("a-b", Error::InvalidCallableName("a-b".into()));
        rejected("eval", Error::ForbiddenCallable("eval".into()));
        rejected("Shell_Exec", Error::ForbiddenCallable("Shell_Exec".into()));
    }

    #[test]
    fn test_global_table() {
        let mut globals = GlobalTable::new();
        globals.insert("_a", ["x", "y"]);
        globals.insert("_n", [1_i64, 2]);

        assert_eq!(globals.get("_a", 1), Some(&Value::from("y")));
        assert_eq!(globals.get("_a", 2), None);
        assert_eq!(globals.get("_b", 0), None);
        assert!(globals.contains("_n"));
        assert_eq!(globals.len(), 2);
    }

    #[test]
    fn test_value_literal() {
        assert_eq!(Value::from(r#"a"b\c"#).to_literal(), r#"'a\"b\\c'"#);
        assert_eq!(Value::Int(-7).to_literal(), "-7");
        assert_eq!(Value::Float(2.5).to_literal(), "2.5");
        assert_eq!(Value::from(" 4.5 ").as_f64(), Some(4.5));
        assert_eq!(Value::from("abc").as_f64(), None);
    }

    #[test]
    fn test_deserialize() {
        let env: Environment =
            serde_json::from_str(r#"{"globals": {"_a": ["hello", 3, 1.5]}}"#).unwrap();
        assert_eq!(env.globals().get("_a", 0), Some(&Value::from("hello")));
        assert_eq!(env.globals().get("_a", 1), Some(&Value::Int(3)));
        assert_eq!(env.globals().get("_a", 2), Some(&Value::Float(1.5)));
        assert!(env.callables().is_empty());

        let env: Environment = serde_json::from_str("{}").unwrap();
        assert!(env.globals().is_empty());
    }
}

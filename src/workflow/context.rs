//! Workflow Context
//!
//! Key/value store threaded through every step. Steps receive an owned
//! snapshot; the engine is the only writer and records each step's
//! result under the step's name after the step returns.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StepError;

/// Context key holding `{step, error}` once a NORMAL failure escalates.
pub const NORMAL_ERROR_KEY: &str = "normal_error";

/// Shared key/value mapping passed to every step.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct Context {
    values: HashMap<String, Value>,
}

impl Context {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Returns a copy of the value for `key`, or `default` when absent.
    pub fn get_or(&self, key: &str, default: impl Into<Value>) -> Value {
        self.values.get(key).cloned().unwrap_or_else(|| default.into())
    }

    /// Returns the value for `key` or an execution error naming the key.
    ///
    /// Handy inside step bodies: `let id = ctx.require("user_id")?;`
    pub fn require(&self, key: &str) -> Result<&Value, StepError> {
        self.values
            .get(key)
            .ok_or_else(|| StepError::Execution(format!("missing context key '{}'", key)))
    }

    /// Sets `key` to `value`, returning the previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    /// Writes every entry of `partial`, overwriting existing keys.
    pub fn merge<K, V, I>(&mut self, partial: I)
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in partial {
            self.values.insert(key.into(), value.into());
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut ctx = Context::new();
        ctx.merge(iter);
        ctx
    }
}

/// Truthiness used by conditional steps.
///
/// `null`, `false`, zero, and empty strings/arrays/objects are false;
/// everything else is true.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

//! Named value filters
//!
//! A filter is a pure `Value -> Value` transform referenced by name from
//! parameter specs and model properties. The registry is an ordinary value
//! owned by the client; there is no global filter table.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::DateTime;
use serde_json::Value;

/// A registered filter function
pub type FilterFn = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

/// Why a filter chain stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterFailure {
    /// No filter is registered under this name
    Unknown { filter: String },
    /// The filter rejected the value
    Failed { filter: String, reason: String },
}

/// Registry of named filters
#[derive(Clone)]
pub struct FilterRegistry {
    filters: BTreeMap<String, FilterFn>,
}

impl FilterRegistry {
    /// Registry holding the built-in filters
    ///
    /// | name          | effect                                         |
    /// |---------------|------------------------------------------------|
    /// | `trim`        | trim surrounding whitespace from strings       |
    /// | `lowercase`   | lower-case strings                             |
    /// | `uppercase`   | upper-case strings                             |
    /// | `string`      | render scalars as strings                      |
    /// | `json_encode` | replace the value with its JSON text           |
    /// | `base64`      | base64-encode a string                         |
    /// | `csv`         | join an array of scalars with commas           |
    /// | `bool_string` | render booleans as `"true"` / `"false"`        |
    /// | `timestamp`   | RFC 3339 date string to Unix seconds           |
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("trim", |v| Ok(map_str(v, |s| s.trim().to_string())));
        registry.register("lowercase", |v| Ok(map_str(v, str::to_lowercase)));
        registry.register("uppercase", |v| Ok(map_str(v, str::to_uppercase)));
        registry.register("string", stringify);
        registry.register("json_encode", |v: Value| Ok(Value::String(v.to_string())));
        registry.register("base64", |v| match v {
            Value::String(s) => Ok(Value::String(BASE64.encode(s.as_bytes()))),
            other => Err(format!("expected a string, got {}", type_name(&other))),
        });
        registry.register("csv", join_csv);
        registry.register("bool_string", |v| match v {
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            other => Ok(other),
        });
        registry.register("timestamp", |v| match v {
            Value::String(s) => DateTime::parse_from_rfc3339(&s)
                .map(|dt| Value::from(dt.timestamp()))
                .map_err(|e| format!("'{s}' is not an RFC 3339 date: {e}")),
            number @ Value::Number(_) => Ok(number),
            other => Err(format!("expected a date string, got {}", type_name(&other))),
        });
        registry
    }

    /// Registry with no filters at all
    pub fn empty() -> Self {
        Self { filters: BTreeMap::new() }
    }

    /// Register (or replace) a filter
    pub fn register<F>(&mut self, name: impl Into<String>, filter: F)
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Arc::new(filter));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.filters.keys().map(String::as_str)
    }

    /// Apply one filter
    ///
    /// # Errors
    /// `Unknown` when nothing is registered under `name`, `Failed` when the
    /// filter rejects the value.
    pub fn apply(&self, name: &str, value: Value) -> Result<Value, FilterFailure> {
        let filter = self
            .filters
            .get(name)
            .ok_or_else(|| FilterFailure::Unknown { filter: name.to_string() })?;
        filter(value).map_err(|reason| FilterFailure::Failed { filter: name.to_string(), reason })
    }

    /// Apply filters in the given order, stopping at the first failure
    ///
    /// # Errors
    /// The failure of the first filter that could not be applied.
    pub fn apply_all(&self, names: &[String], value: Value) -> Result<Value, FilterFailure> {
        names.iter().try_fold(value, |value, name| self.apply(name, value))
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterRegistry").field("filters", &self.filters.keys().collect::<Vec<_>>()).finish()
    }
}

/// JSON type name used in error messages
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Scalar rendered as query/header text; `None` for arrays and objects
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn map_str(value: Value, f: impl FnOnce(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(&s)),
        other => other,
    }
}

fn stringify(value: Value) -> Result<Value, String> {
    match scalar_text(&value) {
        Some(text) => Ok(Value::String(text)),
        None => Err(format!("cannot render {} as a string", type_name(&value))),
    }
}

fn join_csv(value: Value) -> Result<Value, String> {
    match value {
        Value::Array(items) => {
            let parts = items
                .iter()
                .map(|item| {
                    scalar_text(item).ok_or_else(|| format!("cannot join {} item", type_name(item)))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::String(parts.join(",")))
        }
        scalar @ (Value::String(_) | Value::Number(_) | Value::Bool(_)) => Ok(scalar),
        other => Err(format!("expected an array, got {}", type_name(&other))),
    }
}

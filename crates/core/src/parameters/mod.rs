//! Command arguments
//!
//! A [`ParameterBag`] holds the caller's arguments for one command in
//! insertion order. Validating it against an operation applies defaults,
//! type/length/enum checks and filters, and yields the values the request
//! builder places on the wire.

pub mod filters;

use courier_domain::{OperationDescription, ParameterSpec};
use serde_json::{Map, Value};

pub use filters::{FilterFailure, FilterFn, FilterRegistry};

use crate::errors::ParameterError;
use filters::type_name;

/// Ordered name/value arguments of a command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterBag {
    values: Map<String, Value>,
    frozen: bool,
}

impl ParameterBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert for constructing argument lists
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        if !self.frozen {
            self.values.insert(name.into(), value.into());
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Set an argument
    ///
    /// # Errors
    /// Returns `ParameterError::Frozen` once the owning command is prepared.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Result<(), ParameterError> {
        let name = name.into();
        if self.frozen {
            return Err(ParameterError::Frozen { name });
        }
        self.values.insert(name, value.into());
        Ok(())
    }

    /// Remove an argument, returning its previous value
    ///
    /// # Errors
    /// Returns `ParameterError::Frozen` once the owning command is prepared.
    pub fn remove(&mut self, name: &str) -> Result<Option<Value>, ParameterError> {
        if self.frozen {
            return Err(ParameterError::Frozen { name: name.to_string() });
        }
        Ok(self.values.shift_remove(name))
    }

    pub fn has(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Make the bag read-only
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Fill declared defaults for absent (or null) arguments and force
    /// static values
    pub fn apply_defaults(&mut self, operation: &OperationDescription) {
        if self.frozen {
            return;
        }
        for spec in &operation.parameters {
            if let Some(value) = &spec.static_value {
                self.values.insert(spec.name.clone(), value.clone());
                continue;
            }
            let absent = matches!(self.values.get(&spec.name), None | Some(Value::Null));
            if absent {
                if let Some(default) = &spec.default {
                    self.values.insert(spec.name.clone(), default.clone());
                }
            }
        }
    }

    /// Check the arguments against `operation` and run every filter
    ///
    /// Specs are visited in declared order and every problem is collected,
    /// so a caller sees all bad arguments at once. Arguments no spec
    /// declares are passed through as additional values unless the
    /// operation is strict.
    ///
    /// # Errors
    /// All `ParameterError`s found, in spec order followed by unknown names.
    pub fn validate(
        &self,
        operation: &OperationDescription,
        filters: &FilterRegistry,
    ) -> Result<ValidatedParameters, Vec<ParameterError>> {
        let mut errors = Vec::new();
        let mut values = Map::new();

        for spec in &operation.parameters {
            let supplied = self.values.get(&spec.name).filter(|v| !v.is_null());
            let value = spec
                .static_value
                .as_ref()
                .or(supplied)
                .or(spec.default.as_ref())
                .cloned();

            let Some(value) = value else {
                if spec.required {
                    errors.push(ParameterError::MissingParameter {
                        operation: operation.name.clone(),
                        name: spec.name.clone(),
                    });
                }
                continue;
            };

            match check_value(spec, value, filters) {
                Ok(value) => {
                    values.insert(spec.name.clone(), value);
                }
                Err(error) => errors.push(error),
            }
        }

        let mut additional = Map::new();
        for (name, value) in &self.values {
            if operation.parameter(name).is_some() {
                continue;
            }
            if operation.strict {
                errors.push(ParameterError::UnknownParameter {
                    operation: operation.name.clone(),
                    name: name.clone(),
                });
            } else {
                additional.insert(name.clone(), value.clone());
            }
        }

        if errors.is_empty() {
            Ok(ValidatedParameters { values, additional })
        } else {
            Err(errors)
        }
    }
}

impl From<Map<String, Value>> for ParameterBag {
    fn from(values: Map<String, Value>) -> Self {
        Self { values, frozen: false }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ParameterBag {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            frozen: false,
        }
    }
}

fn check_value(
    spec: &ParameterSpec,
    value: Value,
    filters: &FilterRegistry,
) -> Result<Value, ParameterError> {
    if !spec.param_type.matches(&value) {
        return Err(ParameterError::InvalidType {
            name: spec.name.clone(),
            expected: spec.param_type,
            actual: type_name(&value).to_string(),
        });
    }

    let length = match &value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    };
    if let Some(length) = length {
        if let Some(min) = spec.min_length.filter(|min| length < *min) {
            return Err(ParameterError::InvalidValue {
                name: spec.name.clone(),
                reason: format!("length {length} is below the minimum of {min}"),
            });
        }
        if let Some(max) = spec.max_length.filter(|max| length > *max) {
            return Err(ParameterError::InvalidValue {
                name: spec.name.clone(),
                reason: format!("length {length} exceeds the maximum of {max}"),
            });
        }
    }

    if !spec.enum_values.is_empty() && !spec.enum_values.contains(&value) {
        let allowed: Vec<String> = spec.enum_values.iter().map(Value::to_string).collect();
        return Err(ParameterError::InvalidValue {
            name: spec.name.clone(),
            reason: format!("{value} is not one of [{}]", allowed.join(", ")),
        });
    }

    filters.apply_all(&spec.filters, value).map_err(|failure| match failure {
        FilterFailure::Unknown { filter } => {
            ParameterError::UnknownFilter { name: spec.name.clone(), filter }
        }
        FilterFailure::Failed { filter, reason } => {
            ParameterError::FilterFailed { name: spec.name.clone(), filter, reason }
        }
    })
}

/// Arguments that passed validation, with filters applied
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedParameters {
    /// Declared parameters by name, in spec order
    pub values: Map<String, Value>,
    /// Undeclared arguments of a non-strict operation
    pub additional: Map<String, Value>,
}

impl ValidatedParameters {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

//! Response mapping
//!
//! [`ResponseParser`] reads a [`Response`] back into structured data using
//! the operation's response model, mirroring the request locations in
//! reverse: each model property names where in the response its value
//! lives. Values that are absent are left out (or fail when required);
//! nothing is silently defaulted.

use courier_domain::{ModelDescription, ModelProperty, OperationDescription, ParamType, Response, ResponseLocation};
use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};

use crate::errors::ResponseError;
use crate::parameters::filters::type_name;
use crate::parameters::{FilterFailure, FilterRegistry};
use crate::xml;

/// Structured result of a processed command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandResult {
    /// Response model the data was mapped with, if any
    pub model: Option<String>,
    pub data: Map<String, Value>,
}

impl CommandResult {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Value at a dot-separated path, e.g. `meta.next_token`. Numeric
    /// segments index into arrays.
    pub fn path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.').filter(|s| !s.is_empty());
        let first = segments.next()?;
        let mut current = self.data.get(first)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Deserialize the data into a caller type
    ///
    /// # Errors
    /// Returns the serde error when the data does not fit `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.data.clone()))
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.data)
    }
}

/// Maps responses to [`CommandResult`]s
#[derive(Debug, Clone, Default)]
pub struct ResponseParser {
    filters: FilterRegistry,
}

impl ResponseParser {
    pub fn new(filters: FilterRegistry) -> Self {
        Self { filters }
    }

    /// Map `response` for `operation`
    ///
    /// Without a model, JSON and XML bodies decode into the data and any
    /// other body is returned as `{"body": text}`.
    ///
    /// # Errors
    /// `ResponseError` when the body cannot be decoded, a required property
    /// is missing, a property has the wrong type, or a filter fails.
    pub fn parse(
        &self,
        operation: &OperationDescription,
        model: Option<&ModelDescription>,
        response: &Response,
    ) -> Result<CommandResult, ResponseError> {
        match model {
            Some(model) => self.parse_model(operation, model, response),
            None => Ok(CommandResult { model: None, data: parse_untyped(operation, response)? }),
        }
    }

    fn parse_model(
        &self,
        operation: &OperationDescription,
        model: &ModelDescription,
        response: &Response,
    ) -> Result<CommandResult, ResponseError> {
        let needs = |location| model.properties.iter().any(|p| p.location == location);
        let json_doc = if needs(ResponseLocation::Json) { Some(json_object(operation, response)?) } else { None };
        let xml_doc = if needs(ResponseLocation::Xml) { Some(xml_object(operation, response)?) } else { None };

        let mut data = Map::new();
        for property in &model.properties {
            let wire = property.wire_name();
            let raw = match property.location {
                ResponseLocation::StatusCode => Some(Value::from(response.status)),
                ResponseLocation::ReasonPhrase => Some(Value::String(response.reason.clone())),
                ResponseLocation::Header => response.headers.get(wire).map(|v| Value::String(v.to_string())),
                ResponseLocation::Body => Some(Value::String(response.text().into_owned())),
                ResponseLocation::Json => json_doc.as_ref().and_then(|doc| doc.get(wire)).cloned(),
                ResponseLocation::Xml => xml_doc.as_ref().and_then(|doc| doc.get(wire)).cloned(),
            };

            let Some(raw) = raw.filter(|v| !v.is_null()) else {
                if property.required {
                    return Err(ResponseError::MissingProperty {
                        model: model.name.clone(),
                        property: property.name.clone(),
                    });
                }
                continue;
            };

            let value = self.convert(model, property, raw)?;
            data.insert(property.name.clone(), value);
        }

        Ok(CommandResult { model: Some(model.name.clone()), data })
    }

    fn convert(&self, model: &ModelDescription, property: &ModelProperty, raw: Value) -> Result<Value, ResponseError> {
        let textual = matches!(
            property.location,
            ResponseLocation::Header | ResponseLocation::Xml | ResponseLocation::Body
        );
        let value = if textual { coerce_text(raw, property.param_type) } else { raw };

        if !property.param_type.matches(&value) {
            return Err(ResponseError::TypeMismatch {
                model: model.name.clone(),
                property: property.name.clone(),
                expected: property.param_type,
                actual: type_name(&value).to_string(),
            });
        }

        self.filters.apply_all(&property.filters, value).map_err(|failure| match failure {
            FilterFailure::Unknown { filter } => ResponseError::FilterFailed {
                property: property.name.clone(),
                filter,
                reason: "no such filter".to_string(),
            },
            FilterFailure::Failed { filter, reason } => {
                ResponseError::FilterFailed { property: property.name.clone(), filter, reason }
            }
        })
    }
}

/// Values read from headers and XML are text; parse them into the declared
/// scalar type when they look like one
fn coerce_text(value: Value, param_type: ParamType) -> Value {
    let Value::String(text) = &value else {
        return value;
    };
    let trimmed = text.trim();
    let parsed = match param_type {
        ParamType::Integer => trimmed.parse::<i64>().ok().map(Value::from),
        ParamType::Number => trimmed.parse::<f64>().ok().and_then(Number::from_f64).map(Value::Number),
        ParamType::Boolean => match trimmed {
            "true" | "1" => Some(Value::Bool(true)),
            "false" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    };
    parsed.unwrap_or(value)
}

fn is_json(response: &Response) -> bool {
    response.content_type().is_some_and(|ct| ct == "application/json" || ct.ends_with("+json"))
}

fn is_xml(response: &Response) -> bool {
    response.content_type().is_some_and(|ct| ct.ends_with("/xml") || ct.ends_with("+xml"))
}

fn json_object(operation: &OperationDescription, response: &Response) -> Result<Map<String, Value>, ResponseError> {
    let invalid = |message: String| ResponseError::InvalidJson { operation: operation.name.clone(), message };
    match response.json::<Value>().map_err(|e| invalid(e.to_string()))? {
        Value::Object(map) => Ok(map),
        other => Err(invalid(format!("expected an object, got {}", type_name(&other)))),
    }
}

fn xml_object(operation: &OperationDescription, response: &Response) -> Result<Map<String, Value>, ResponseError> {
    let invalid = |message: String| ResponseError::InvalidXml { operation: operation.name.clone(), message };
    match xml::decode(&response.text()).map_err(invalid)? {
        (_, Value::Object(map)) => Ok(map),
        (_, Value::String(text)) if text.is_empty() => Ok(Map::new()),
        (root, _) => Err(invalid(format!("root element <{root}> has no child elements"))),
    }
}

fn parse_untyped(operation: &OperationDescription, response: &Response) -> Result<Map<String, Value>, ResponseError> {
    if response.body.is_empty() {
        return Ok(Map::new());
    }
    if is_json(response) {
        let value: Value = response.json().map_err(|e| ResponseError::InvalidJson {
            operation: operation.name.clone(),
            message: e.to_string(),
        })?;
        return Ok(match value {
            Value::Object(map) => map,
            other => Map::from_iter([("body".to_string(), other)]),
        });
    }
    if is_xml(response) {
        return xml_object(operation, response);
    }
    Ok(Map::from_iter([("body".to_string(), Value::String(response.text().into_owned()))]))
}

#[cfg(test)]
mod tests {
    use courier_domain::HttpMethod;
    use serde_json::json;

    use super::*;

    fn operation() -> OperationDescription {
        OperationDescription::new("GetPerson", HttpMethod::Get, "people").with_response_model("Person")
    }

    fn person_model() -> ModelDescription {
        ModelDescription {
            name: "Person".into(),
            properties: vec![
                ModelProperty::new("status", ResponseLocation::StatusCode),
                ModelProperty::new("request_id", ResponseLocation::Header).sent_as("X-Request-Id"),
                ModelProperty::new("name", ResponseLocation::Json).with_type(ParamType::String).required(),
                ModelProperty::new("age", ResponseLocation::Json).with_type(ParamType::Integer),
                ModelProperty::new("remaining", ResponseLocation::Header)
                    .sent_as("X-RateLimit-Remaining")
                    .with_type(ParamType::Integer),
            ],
        }
    }

    #[test]
    fn model_properties_read_from_their_locations() {
        let response = Response::from_json(200, &json!({"name": "Bob", "age": 42, "ignored": true}))
            .with_header("X-Request-Id", "abc")
            .with_header("X-RateLimit-Remaining", "17");

        let result = ResponseParser::default().parse(&operation(), Some(&person_model()), &response).unwrap();

        assert_eq!(result.model.as_deref(), Some("Person"));
        assert_eq!(
            result.into_value(),
            json!({"status": 200, "request_id": "abc", "name": "Bob", "age": 42, "remaining": 17})
        );
    }

    #[test]
    fn missing_required_property_is_an_error() {
        let response = Response::from_json(200, &json!({"age": 42}));
        let err = ResponseParser::default().parse(&operation(), Some(&person_model()), &response).unwrap_err();
        assert_eq!(err, ResponseError::MissingProperty { model: "Person".into(), property: "name".into() });
    }

    #[test]
    fn type_mismatch_is_not_defaulted() {
        let response = Response::from_json(200, &json!({"name": "Bob", "age": "old"}));
        let err = ResponseParser::default().parse(&operation(), Some(&person_model()), &response).unwrap_err();
        assert!(matches!(err, ResponseError::TypeMismatch { property, .. } if property == "age"));
    }

    #[test]
    fn invalid_json_is_reported() {
        let response = Response::new(200).with_header("Content-Type", "application/json").with_body("{oops");
        let err = ResponseParser::default().parse(&operation(), Some(&person_model()), &response).unwrap_err();
        assert!(matches!(err, ResponseError::InvalidJson { .. }));

        let err = ResponseParser::default().parse(&operation(), None, &response).unwrap_err();
        assert!(matches!(err, ResponseError::InvalidJson { .. }));
    }

    #[test]
    fn xml_model_coerces_text() {
        let model = ModelDescription {
            name: "Person".into(),
            properties: vec![
                ModelProperty::new("name", ResponseLocation::Xml),
                ModelProperty::new("age", ResponseLocation::Xml).with_type(ParamType::Integer),
            ],
        };
        let response = Response::new(200)
            .with_header("Content-Type", "application/xml")
            .with_body("<Person><name>Bob</name><age>42</age></Person>");

        let result = ResponseParser::default().parse(&operation(), Some(&model), &response).unwrap();
        assert_eq!(result.into_value(), json!({"name": "Bob", "age": 42}));
    }

    #[test]
    fn untyped_responses() {
        let parser = ResponseParser::default();
        let op = operation();

        let json_result = parser.parse(&op, None, &Response::from_json(200, &json!({"a": {"b": [1, 2]}}))).unwrap();
        assert_eq!(json_result.path("a.b.1"), Some(&json!(2)));
        assert_eq!(json_result.path("a.c"), None);

        let xml_result = parser
            .parse(&op, None, &Response::new(200).with_header("Content-Type", "text/xml").with_body("<r><a>1</a></r>"))
            .unwrap();
        assert_eq!(xml_result.get("a"), Some(&json!("1")));

        let text = parser.parse(&op, None, &Response::new(200).with_body("pong")).unwrap();
        assert_eq!(text.get("body"), Some(&json!("pong")));

        assert!(parser.parse(&op, None, &Response::new(204)).unwrap().data.is_empty());
    }
}

//! Service description types
//!
//! A service description declares named operations (method, URI template,
//! parameters and where each one goes in the request) and the response
//! models used to map responses back into structured data. Descriptions are
//! plain serde data; the catalog in `courier-core` validates and indexes them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::http::HttpMethod;
use crate::impl_domain_status_conversions;

/// Where a parameter value is placed in the outgoing request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    /// URI template variable
    Uri,
    Query,
    Header,
    /// Raw entity body
    Body,
    /// Form field (`application/x-www-form-urlencoded`)
    PostField,
    /// Member of a JSON object body
    Json,
    /// Element of an XML body
    Xml,
}

impl_domain_status_conversions!(Location {
    Uri => "uri",
    Query => "query",
    Header => "header",
    Body => "body",
    PostField => "postfield",
    Json => "json",
    Xml => "xml",
});

impl Location {
    /// Locations that write into the entity body
    pub fn is_body(self) -> bool {
        matches!(self, Self::Body | Self::PostField | Self::Json | Self::Xml)
    }
}

/// Where a model property is read from in a response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseLocation {
    StatusCode,
    ReasonPhrase,
    Header,
    Body,
    #[default]
    Json,
    Xml,
}

impl_domain_status_conversions!(ResponseLocation {
    StatusCode => "status_code",
    ReasonPhrase => "reason_phrase",
    Header => "header",
    Body => "body",
    Json => "json",
    Xml => "xml",
});

/// Declared value type of a parameter or model property
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    #[default]
    Any,
}

impl_domain_status_conversions!(ParamType {
    String => "string",
    Integer => "integer",
    Number => "number",
    Boolean => "boolean",
    Array => "array",
    Object => "object",
    Any => "any",
});

impl ParamType {
    /// Whether `value` has this type. `null` never matches a concrete type.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }
}

/// One declared parameter of an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawParameterSpec")]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Value that always overrides whatever the caller supplied
    #[serde(rename = "static", skip_serializing_if = "Option::is_none")]
    pub static_value: Option<Value>,
    pub location: Option<Location>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_as: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prepend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub append: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParameterSpec {
    /// Optional parameter with no location; use the `with_*` setters to
    /// complete it
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: ParamType::Any,
            required: false,
            default: None,
            static_value: None,
            location: None,
            sent_as: None,
            filters: Vec::new(),
            prepend: None,
            append: None,
            min_length: None,
            max_length: None,
            enum_values: Vec::new(),
            description: None,
        }
    }

    #[must_use]
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    #[must_use]
    pub fn with_type(mut self, param_type: ParamType) -> Self {
        self.param_type = param_type;
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn sent_as(mut self, wire_name: impl Into<String>) -> Self {
        self.sent_as = Some(wire_name.into());
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filters.push(filter.into());
        self
    }

    /// Name used on the wire (`sent_as`, or the parameter name)
    pub fn wire_name(&self) -> &str {
        self.sent_as.as_deref().unwrap_or(&self.name)
    }
}

/// Wire shape of [`ParameterSpec`]; accepts `"location": "query:people"`
#[derive(Deserialize)]
struct RawParameterSpec {
    name: String,
    #[serde(rename = "type", default)]
    param_type: ParamType,
    #[serde(default)]
    required: bool,
    default: Option<Value>,
    #[serde(rename = "static")]
    static_value: Option<Value>,
    location: Option<String>,
    sent_as: Option<String>,
    #[serde(default)]
    filters: Vec<String>,
    prepend: Option<String>,
    append: Option<String>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    #[serde(rename = "enum", default)]
    enum_values: Vec<Value>,
    description: Option<String>,
}

impl TryFrom<RawParameterSpec> for ParameterSpec {
    type Error = String;

    fn try_from(raw: RawParameterSpec) -> Result<Self, Self::Error> {
        let mut sent_as = raw.sent_as;
        let location = match raw.location {
            None => None,
            Some(text) => {
                let (location, key) = match text.split_once(':') {
                    Some((location, key)) => (location, Some(key)),
                    None => (text.as_str(), None),
                };
                if let Some(key) = key.filter(|k| !k.is_empty()) {
                    match &sent_as {
                        Some(existing) if existing != key => {
                            return Err(format!(
                                "parameter '{}' names its wire key twice ('{}' and '{}')",
                                raw.name, key, existing
                            ));
                        }
                        _ => sent_as = Some(key.to_string()),
                    }
                }
                Some(location.parse::<Location>()?)
            }
        };

        Ok(Self {
            name: raw.name,
            param_type: raw.param_type,
            required: raw.required,
            default: raw.default,
            static_value: raw.static_value,
            location,
            sent_as,
            filters: raw.filters,
            prepend: raw.prepend,
            append: raw.append,
            min_length: raw.min_length,
            max_length: raw.max_length,
            enum_values: raw.enum_values,
            description: raw.description,
        })
    }
}

/// How a paginated operation exposes its continuation token and items
///
/// Paths are dot-separated keys into the parsed result data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationSpec {
    /// Parameter that carries the continuation token on the next request
    pub token_param: String,
    /// Where the next token is found in a result
    pub token_path: String,
    /// Where the page's items are found in a result
    pub items_path: String,
    /// Parameter that carries the requested page size, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size_param: Option<String>,
}

impl PaginationSpec {
    pub fn new(
        token_param: impl Into<String>,
        token_path: impl Into<String>,
        items_path: impl Into<String>,
    ) -> Self {
        Self {
            token_param: token_param.into(),
            token_path: token_path.into(),
            items_path: items_path.into(),
            page_size_param: None,
        }
    }

    #[must_use]
    pub fn with_page_size_param(mut self, param: impl Into<String>) -> Self {
        self.page_size_param = Some(param.into());
        self
    }
}

/// One named operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDescription {
    pub name: String,
    #[serde(alias = "httpMethod")]
    pub http_method: HttpMethod,
    /// RFC 6570 template, relative to the service base URL
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default, alias = "responseModel", skip_serializing_if = "Option::is_none")]
    pub response_model: Option<String>,
    #[serde(default, alias = "responseClass", skip_serializing_if = "Option::is_none")]
    pub response_class: Option<String>,
    /// Reject arguments that no parameter declares
    #[serde(default)]
    pub strict: bool,
    /// Where undeclared arguments go when the operation is not strict
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paginated: Option<PaginationSpec>,
    /// Root element of XML bodies; defaults to the operation name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xml_root: Option<String>,
}

impl OperationDescription {
    pub fn new(name: impl Into<String>, http_method: HttpMethod, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            http_method,
            uri: uri.into(),
            parameters: Vec::new(),
            response_model: None,
            response_class: None,
            strict: false,
            additional_location: None,
            summary: None,
            paginated: None,
            xml_root: None,
        }
    }

    #[must_use]
    pub fn with_parameter(mut self, spec: ParameterSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    #[must_use]
    pub fn with_response_model(mut self, model: impl Into<String>) -> Self {
        self.response_model = Some(model.into());
        self
    }

    #[must_use]
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    #[must_use]
    pub fn paginated(mut self, pagination: PaginationSpec) -> Self {
        self.paginated = Some(pagination);
        self
    }

    /// Declared parameter by name
    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// One property of a response model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProperty {
    pub name: String,
    #[serde(default)]
    pub location: ResponseLocation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_as: Option<String>,
    #[serde(rename = "type", default)]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<String>,
}

impl ModelProperty {
    pub fn new(name: impl Into<String>, location: ResponseLocation) -> Self {
        Self {
            name: name.into(),
            location,
            sent_as: None,
            param_type: ParamType::Any,
            required: false,
            filters: Vec::new(),
        }
    }

    #[must_use]
    pub fn sent_as(mut self, wire_name: impl Into<String>) -> Self {
        self.sent_as = Some(wire_name.into());
        self
    }

    #[must_use]
    pub fn with_type(mut self, param_type: ParamType) -> Self {
        self.param_type = param_type;
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn wire_name(&self) -> &str {
        self.sent_as.as_deref().unwrap_or(&self.name)
    }
}

/// A named response model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescription {
    pub name: String,
    #[serde(default)]
    pub properties: Vec<ModelProperty>,
}

/// A complete service description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescription {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "baseUrl", skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub operations: Vec<OperationDescription>,
    #[serde(default)]
    pub models: Vec<ModelDescription>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn location_key_syntax_splits_wire_name() {
        let spec: ParameterSpec = serde_json::from_value(json!({
            "name": "id",
            "type": "integer",
            "required": true,
            "location": "query:people"
        }))
        .unwrap();

        assert_eq!(spec.location, Some(Location::Query));
        assert_eq!(spec.wire_name(), "people");
        assert_eq!(spec.param_type, ParamType::Integer);
        assert!(spec.required);
    }

    #[test]
    fn conflicting_wire_names_are_rejected() {
        let result = serde_json::from_value::<ParameterSpec>(json!({
            "name": "id",
            "location": "query:people",
            "sent_as": "person"
        }));
        assert!(result.is_err());

        let result =
            serde_json::from_value::<ParameterSpec>(json!({"name": "id", "location": "cookie"}));
        assert!(result.unwrap_err().to_string().contains("Invalid Location: cookie"));
    }

    #[test]
    fn serialized_spec_reads_back() {
        let spec = ParameterSpec::new("name")
            .with_location(Location::PostField)
            .sent_as("full_name")
            .with_filter("trim");
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["location"], "postfield");

        let back: ParameterSpec = serde_json::from_value(value).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn param_types_match_json_values() {
        assert!(ParamType::Integer.matches(&json!(42)));
        assert!(!ParamType::Integer.matches(&json!(4.2)));
        assert!(ParamType::Number.matches(&json!(4.2)));
        assert!(!ParamType::String.matches(&Value::Null));
        assert!(ParamType::Any.matches(&Value::Null));
    }

    #[test]
    fn operation_accepts_camel_case_aliases() {
        let operation: OperationDescription = serde_json::from_value(json!({
            "name": "ListPeople",
            "httpMethod": "GET",
            "uri": "people",
            "responseModel": "PeoplePage",
            "paginated": {
                "token_param": "marker",
                "token_path": "next_marker",
                "items_path": "people"
            }
        }))
        .unwrap();

        assert_eq!(operation.http_method, HttpMethod::Get);
        assert_eq!(operation.response_model.as_deref(), Some("PeoplePage"));
        assert_eq!(operation.paginated.unwrap().token_param, "marker");
        assert!(!operation.strict);
    }
}

//! Location visitors
//!
//! Each [`Location`] has a visitor that writes a parameter value into a
//! [`RequestDraft`]. `visit` runs once per parameter; `after` runs once per
//! build for every location that was visited, so body visitors can
//! serialize what they accumulated.

use std::collections::HashMap;
use std::sync::Arc;

use courier_domain::{Body, Headers, Location, OperationDescription, ParameterSpec, QueryString};
use serde_json::{Map, Value};

use crate::errors::BuildError;
use crate::parameters::filters::scalar_text;
use crate::xml;

/// Request under construction
#[derive(Debug)]
pub struct RequestDraft<'a> {
    pub operation: &'a OperationDescription,
    /// Values for URI template expansion, by wire name
    pub uri_vars: Map<String, Value>,
    pub query: QueryString,
    pub headers: Headers,
    pub form: Vec<(String, String)>,
    pub json: Map<String, Value>,
    pub xml: Map<String, Value>,
    pub body: Option<Body>,
    body_location: Option<Location>,
}

impl<'a> RequestDraft<'a> {
    pub fn new(operation: &'a OperationDescription) -> Self {
        Self {
            operation,
            uri_vars: Map::new(),
            query: QueryString::new(),
            headers: Headers::new(),
            form: Vec::new(),
            json: Map::new(),
            xml: Map::new(),
            body: None,
            body_location: None,
        }
    }

    /// Reserve the entity body for `location`
    ///
    /// # Errors
    /// `ConflictingBody` when another body location already claimed it, or
    /// when a second raw body parameter is placed.
    pub fn claim_body(&mut self, location: Location) -> Result<(), BuildError> {
        match self.body_location {
            Some(current) if current != location || location == Location::Body => {
                Err(BuildError::ConflictingBody {
                    operation: self.operation.name.clone(),
                    first: current,
                    second: location,
                })
            }
            _ => {
                self.body_location = Some(location);
                Ok(())
            }
        }
    }

    pub fn body_location(&self) -> Option<Location> {
        self.body_location
    }
}

/// Writes parameter values into one part of a request
pub trait RequestLocation: Send + Sync {
    fn visit(
        &self,
        draft: &mut RequestDraft<'_>,
        spec: &ParameterSpec,
        value: Value,
    ) -> Result<(), BuildError>;

    fn after(&self, _draft: &mut RequestDraft<'_>) -> Result<(), BuildError> {
        Ok(())
    }
}

/// Flatten a value into `key=value` pairs: arrays repeat the key, objects
/// use `key[sub]`
fn flatten_pairs(key: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten_pairs(key, item, out);
            }
        }
        Value::Object(map) => {
            for (sub, item) in map {
                flatten_pairs(&format!("{key}[{sub}]"), item, out);
            }
        }
        scalar => out.push((key.to_string(), scalar_text(scalar).unwrap_or_default())),
    }
}

pub struct UriLocation;

impl RequestLocation for UriLocation {
    fn visit(&self, draft: &mut RequestDraft<'_>, spec: &ParameterSpec, value: Value) -> Result<(), BuildError> {
        draft.uri_vars.insert(spec.wire_name().to_string(), value);
        Ok(())
    }
}

pub struct QueryLocation;

impl RequestLocation for QueryLocation {
    fn visit(&self, draft: &mut RequestDraft<'_>, spec: &ParameterSpec, value: Value) -> Result<(), BuildError> {
        let mut pairs = Vec::new();
        flatten_pairs(spec.wire_name(), &value, &mut pairs);
        for (key, value) in pairs {
            draft.query.append(key, value);
        }
        Ok(())
    }
}

pub struct HeaderLocation;

impl RequestLocation for HeaderLocation {
    fn visit(&self, draft: &mut RequestDraft<'_>, spec: &ParameterSpec, value: Value) -> Result<(), BuildError> {
        let text = match &value {
            Value::Array(items) => items
                .iter()
                .map(|item| scalar_text(item).unwrap_or_else(|| item.to_string()))
                .collect::<Vec<_>>()
                .join(", "),
            Value::Object(_) => value.to_string(),
            scalar => scalar_text(scalar).unwrap_or_default(),
        };
        draft.headers.set(spec.wire_name(), text);
        Ok(())
    }
}

/// Raw entity body; strings are sent as-is, anything else as JSON text
pub struct BodyLocation;

impl RequestLocation for BodyLocation {
    fn visit(&self, draft: &mut RequestDraft<'_>, _spec: &ParameterSpec, value: Value) -> Result<(), BuildError> {
        draft.claim_body(Location::Body)?;
        let body = match value {
            Value::String(text) => Body::new(text, None),
            other => Body::new(other.to_string(), Some("application/json".to_string())),
        };
        draft.body = Some(body);
        Ok(())
    }
}

pub struct PostFieldLocation;

impl RequestLocation for PostFieldLocation {
    fn visit(&self, draft: &mut RequestDraft<'_>, spec: &ParameterSpec, value: Value) -> Result<(), BuildError> {
        draft.claim_body(Location::PostField)?;
        flatten_pairs(spec.wire_name(), &value, &mut draft.form);
        Ok(())
    }

    fn after(&self, draft: &mut RequestDraft<'_>) -> Result<(), BuildError> {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(draft.form.iter())
            .finish();
        draft.body =
            Some(Body::new(encoded, Some("application/x-www-form-urlencoded".to_string())));
        Ok(())
    }
}

pub struct JsonLocation;

impl RequestLocation for JsonLocation {
    fn visit(&self, draft: &mut RequestDraft<'_>, spec: &ParameterSpec, value: Value) -> Result<(), BuildError> {
        draft.claim_body(Location::Json)?;
        draft.json.insert(spec.wire_name().to_string(), value);
        Ok(())
    }

    fn after(&self, draft: &mut RequestDraft<'_>) -> Result<(), BuildError> {
        let bytes = serde_json::to_vec(&draft.json).map_err(|e| BuildError::Serialization {
            operation: draft.operation.name.clone(),
            format: "JSON",
            message: e.to_string(),
        })?;
        draft.body = Some(Body::new(bytes, Some("application/json".to_string())));
        Ok(())
    }
}

pub struct XmlLocation;

impl RequestLocation for XmlLocation {
    fn visit(&self, draft: &mut RequestDraft<'_>, spec: &ParameterSpec, value: Value) -> Result<(), BuildError> {
        draft.claim_body(Location::Xml)?;
        draft.xml.insert(spec.wire_name().to_string(), value);
        Ok(())
    }

    fn after(&self, draft: &mut RequestDraft<'_>) -> Result<(), BuildError> {
        let root = draft.operation.xml_root.as_deref().unwrap_or(&draft.operation.name);
        let bytes = xml::encode(root, &draft.xml).map_err(|message| BuildError::Serialization {
            operation: draft.operation.name.clone(),
            format: "XML",
            message,
        })?;
        draft.body = Some(Body::new(bytes, Some("application/xml".to_string())));
        Ok(())
    }
}

/// Visitor per location
#[derive(Clone)]
pub struct LocationRegistry {
    visitors: HashMap<Location, Arc<dyn RequestLocation>>,
}

impl LocationRegistry {
    /// Registry with a visitor for every location
    pub fn new() -> Self {
        let mut visitors: HashMap<Location, Arc<dyn RequestLocation>> = HashMap::new();
        visitors.insert(Location::Uri, Arc::new(UriLocation));
        visitors.insert(Location::Query, Arc::new(QueryLocation));
        visitors.insert(Location::Header, Arc::new(HeaderLocation));
        visitors.insert(Location::Body, Arc::new(BodyLocation));
        visitors.insert(Location::PostField, Arc::new(PostFieldLocation));
        visitors.insert(Location::Json, Arc::new(JsonLocation));
        visitors.insert(Location::Xml, Arc::new(XmlLocation));
        Self { visitors }
    }

    /// Replace the visitor for `location`
    pub fn register(&mut self, location: Location, visitor: Arc<dyn RequestLocation>) {
        self.visitors.insert(location, visitor);
    }

    pub fn get(&self, location: Location) -> Option<&Arc<dyn RequestLocation>> {
        self.visitors.get(&location)
    }
}

impl Default for LocationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut locations: Vec<String> = self.visitors.keys().map(ToString::to_string).collect();
        locations.sort();
        f.debug_struct("LocationRegistry").field("locations", &locations).finish()
    }
}

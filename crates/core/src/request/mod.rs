//! Request building
//!
//! [`RequestBuilder`] turns an operation and its validated arguments into a
//! [`Request`]. Each argument is handed to the visitor registered for its
//! location; the URI template is expanded last, once every URI variable is
//! known, and resolved against the service base URL.

pub mod locations;
pub mod uri_template;

use std::collections::BTreeSet;

use courier_domain::{Location, OperationDescription, ParameterSpec, QueryString, Request};
use serde_json::Value;
use tracing::debug;
use url::Url;

pub use locations::{
    BodyLocation, HeaderLocation, JsonLocation, LocationRegistry, PostFieldLocation, QueryLocation,
    RequestDraft, RequestLocation, UriLocation, XmlLocation,
};

use crate::errors::BuildError;
use crate::parameters::ValidatedParameters;

/// Builds requests from operations
#[derive(Debug, Clone, Default)]
pub struct RequestBuilder {
    locations: LocationRegistry,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_locations(locations: LocationRegistry) -> Self {
        Self { locations }
    }

    pub fn locations(&self) -> &LocationRegistry {
        &self.locations
    }

    /// Build a request for `operation`
    ///
    /// Building has no side effects: the same arguments always produce the
    /// same method, URL, headers and body (only the request id differs).
    ///
    /// # Errors
    /// - `BodyNotAllowed` when a value lands in the body of a method that
    ///   carries none
    /// - `ConflictingBody` when body locations are mixed
    /// - `InvalidUrl` when the expanded URI cannot be resolved
    /// - `Serialization` when a JSON/XML body cannot be written
    pub fn build(
        &self,
        operation: &OperationDescription,
        parameters: &ValidatedParameters,
        base_url: Option<&Url>,
    ) -> Result<Request, BuildError> {
        let mut draft = RequestDraft::new(operation);
        let mut visited = BTreeSet::new();

        for spec in &operation.parameters {
            let (Some(location), Some(value)) = (spec.location, parameters.get(&spec.name)) else {
                continue;
            };
            self.place(&mut draft, spec, location, value.clone(), &mut visited)?;
        }

        if let Some(location) = operation.additional_location {
            for (name, value) in &parameters.additional {
                let spec = ParameterSpec::new(name.clone()).with_location(location);
                self.place(&mut draft, &spec, location, value.clone(), &mut visited)?;
            }
        } else if !parameters.additional.is_empty() {
            debug!(
                operation = %operation.name,
                ignored = ?parameters.additional.keys().collect::<Vec<_>>(),
                "undeclared arguments have no location and are not sent"
            );
        }

        for location in &visited {
            if let Some(visitor) = self.locations.get(*location) {
                visitor.after(&mut draft)?;
            }
        }

        let expanded = uri_template::expand(&operation.uri, &draft.uri_vars);
        let mut url = resolve_url(base_url, &expanded)?;

        let mut query = QueryString::new();
        for (key, value) in url.query_pairs() {
            query.append(key.into_owned(), value.into_owned());
        }
        url.set_query(None);
        for (key, value) in draft.query.iter() {
            query.append(key, value);
        }

        let mut request = Request::new(operation.http_method, url);
        request.query = query;
        request.headers = draft.headers;
        if let Some(body) = draft.body {
            if let Some(content_type) = &body.content_type {
                if !request.headers.contains("Content-Type") {
                    request.headers.set("Content-Type", content_type.clone());
                }
            }
            request.body = Some(body);
        }

        debug!(
            operation = %operation.name,
            method = %request.method,
            url = %request.full_url(),
            "request built"
        );
        Ok(request)
    }

    fn place(
        &self,
        draft: &mut RequestDraft<'_>,
        spec: &ParameterSpec,
        location: Location,
        value: Value,
        visited: &mut BTreeSet<Location>,
    ) -> Result<(), BuildError> {
        let operation = draft.operation;
        if location.is_body() && !operation.http_method.allows_body() {
            return Err(BuildError::BodyNotAllowed {
                operation: operation.name.clone(),
                parameter: spec.name.clone(),
                method: operation.http_method,
            });
        }

        let value = decorate(spec, value);
        let visitor = self.locations.get(location).ok_or_else(|| BuildError::Serialization {
            operation: operation.name.clone(),
            format: "request",
            message: format!("no visitor registered for location {location}"),
        })?;
        visitor.visit(draft, spec, value)?;
        visited.insert(location);
        Ok(())
    }
}

/// Apply `prepend`/`append` to string values
fn decorate(spec: &ParameterSpec, value: Value) -> Value {
    match value {
        Value::String(text) if spec.prepend.is_some() || spec.append.is_some() => Value::String(format!(
            "{}{}{}",
            spec.prepend.as_deref().unwrap_or_default(),
            text,
            spec.append.as_deref().unwrap_or_default()
        )),
        other => other,
    }
}

/// Resolve an expanded URI against the base URL
///
/// Absolute URIs are used as-is. The base path is treated as a directory,
/// so `people` under `https://host/v1` becomes `https://host/v1/people`.
fn resolve_url(base_url: Option<&Url>, expanded: &str) -> Result<Url, BuildError> {
    if let Ok(url) = Url::parse(expanded) {
        return Ok(url);
    }

    let base = base_url.ok_or_else(|| BuildError::InvalidUrl {
        url: expanded.to_string(),
        reason: "relative URI and no base URL".to_string(),
    })?;

    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(expanded).map_err(|e| BuildError::InvalidUrl {
        url: expanded.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use courier_domain::{HttpMethod, ParamType};

    use super::*;
    use crate::parameters::{FilterRegistry, ParameterBag};

    fn base() -> Url {
        Url::parse("https://api.example.com/v1").unwrap()
    }

    fn build(operation: &OperationDescription, bag: ParameterBag) -> Result<Request, BuildError> {
        let validated = bag.validate(operation, &FilterRegistry::new()).unwrap();
        RequestBuilder::new().build(operation, &validated, Some(&base()))
    }

    fn get_person() -> OperationDescription {
        OperationDescription::new("GetPerson", HttpMethod::Get, "people").with_parameter(
            ParameterSpec::new("id")
                .with_location(Location::Query)
                .sent_as("people")
                .with_type(ParamType::Integer)
                .required(),
        )
    }

    #[test]
    fn get_person_places_id_in_query() {
        let request = build(&get_person(), ParameterBag::new().with("id", 42)).unwrap();

        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(request.full_url().as_str(), "https://api.example.com/v1/people?people=42");
        assert!(request.body.is_none());
    }

    #[test]
    fn uri_template_variables_are_expanded() {
        let operation = OperationDescription::new("GetRepo", HttpMethod::Get, "repos/{owner}/{repo}{?page}")
            .with_parameter(ParameterSpec::new("owner").with_location(Location::Uri))
            .with_parameter(ParameterSpec::new("repo").with_location(Location::Uri))
            .with_parameter(ParameterSpec::new("page").with_location(Location::Uri))
            .with_parameter(ParameterSpec::new("sort").with_location(Location::Query));

        let request = build(
            &operation,
            ParameterBag::new().with("owner", "a b").with("repo", "courier").with("page", 2).with("sort", "asc"),
        )
        .unwrap();

        assert_eq!(
            request.full_url().as_str(),
            "https://api.example.com/v1/repos/a%20b/courier?page=2&sort=asc"
        );
        assert_eq!(request.query.get("page"), Some("2"));
    }

    #[test]
    fn body_parameter_on_get_fails_fast() {
        let operation = OperationDescription::new("Search", HttpMethod::Get, "search")
            .with_parameter(ParameterSpec::new("filter").with_location(Location::Json));

        let err = build(&operation, ParameterBag::new().with("filter", "x")).unwrap_err();
        assert_eq!(
            err,
            BuildError::BodyNotAllowed {
                operation: "Search".into(),
                parameter: "filter".into(),
                method: HttpMethod::Get,
            }
        );

        // absent values place nothing
        assert!(build(&operation, ParameterBag::new()).is_ok());
    }

    #[test]
    fn json_body_uses_wire_names_and_content_type() {
        let operation = OperationDescription::new("CreatePerson", HttpMethod::Post, "people")
            .with_parameter(ParameterSpec::new("name").with_location(Location::Json).sent_as("full_name"))
            .with_parameter(ParameterSpec::new("age").with_location(Location::Json))
            .with_parameter(ParameterSpec::new("token").with_location(Location::Header).sent_as("X-Token"));

        let request = build(
            &operation,
            ParameterBag::new().with("name", "Bob").with("age", 30).with("token", "t0k"),
        )
        .unwrap();

        let body = request.body.as_ref().unwrap();
        assert_eq!(body.text(), r#"{"full_name":"Bob","age":30}"#);
        assert_eq!(request.headers.get("content-type"), Some("application/json"));
        assert_eq!(request.headers.get("x-token"), Some("t0k"));
    }

    #[test]
    fn form_and_xml_bodies() {
        let form = OperationDescription::new("Login", HttpMethod::Post, "login")
            .with_parameter(ParameterSpec::new("user").with_location(Location::PostField))
            .with_parameter(ParameterSpec::new("pass").with_location(Location::PostField));
        let request = build(&form, ParameterBag::new().with("user", "bob").with("pass", "a&b")).unwrap();
        assert_eq!(request.body.unwrap().text(), "user=bob&pass=a%26b");
        assert_eq!(request.headers.get("Content-Type"), Some("application/x-www-form-urlencoded"));

        let mut xml = OperationDescription::new("CreatePerson", HttpMethod::Put, "people")
            .with_parameter(ParameterSpec::new("name").with_location(Location::Xml));
        xml.xml_root = Some("Person".into());
        let request = build(&xml, ParameterBag::new().with("name", "Bob")).unwrap();
        assert!(request.body.unwrap().text().ends_with("<Person><name>Bob</name></Person>"));
    }

    #[test]
    fn prepend_and_append_decorate_strings() {
        let mut spec = ParameterSpec::new("token").with_location(Location::Header).sent_as("Authorization");
        spec.prepend = Some("Bearer ".into());
        let operation = OperationDescription::new("Me", HttpMethod::Get, "me").with_parameter(spec);

        let request = build(&operation, ParameterBag::new().with("token", "abc")).unwrap();
        assert_eq!(request.headers.get("Authorization"), Some("Bearer abc"));
    }

    #[test]
    fn additional_arguments_follow_additional_location() {
        let mut operation = get_person();
        operation.additional_location = Some(Location::Query);

        let request = build(&operation, ParameterBag::new().with("id", 1).with("verbose", true)).unwrap();
        assert_eq!(request.query.get("verbose"), Some("true"));

        let request = build(&get_person(), ParameterBag::new().with("id", 1).with("verbose", true)).unwrap();
        assert_eq!(request.query.get("verbose"), None);
    }

    #[test]
    fn builds_are_deterministic() {
        let operation = get_person();
        let a = build(&operation, ParameterBag::new().with("id", 7)).unwrap();
        let b = build(&operation, ParameterBag::new().with("id", 7)).unwrap();

        assert_eq!(a.full_url(), b.full_url());
        assert_eq!(a.headers, b.headers);
        assert_eq!(a.body, b.body);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn absolute_uris_ignore_the_base_url() {
        let operation = OperationDescription::new("Ping", HttpMethod::Get, "https://status.example.com/ping");
        let request = build(&operation, ParameterBag::new()).unwrap();
        assert_eq!(request.url.as_str(), "https://status.example.com/ping");

        let err = RequestBuilder::new()
            .build(&OperationDescription::new("Rel", HttpMethod::Get, "people"), &ValidatedParameters::default(), None)
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidUrl { .. }));
    }
}

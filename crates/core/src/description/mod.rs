//! Operation catalog
//!
//! The catalog is built once from a [`ServiceDescription`], checked for
//! structural problems, and then shared read-only by every command.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use courier_common::error::CommonError;
use courier_domain::{Location, ModelDescription, OperationDescription, ServiceDescription};
use tracing::debug;
use url::Url;

use crate::command::Command;
use crate::errors::CatalogError;
use crate::parameters::ParameterBag;
use crate::request::uri_template;

/// Normalizes operation names for a second lookup attempt
pub trait NameResolver: Send + Sync + fmt::Debug {
    fn normalize(&self, name: &str) -> String;
}

/// Treats `GetPerson`, `getPerson`, `get_person` and `get-person` as the
/// same name
#[derive(Debug, Clone, Copy, Default)]
pub struct SnakeCaseResolver;

impl NameResolver for SnakeCaseResolver {
    fn normalize(&self, name: &str) -> String {
        let mut out = String::with_capacity(name.len() + 4);
        let mut prev_lower_or_digit = false;
        for c in name.chars() {
            if c == '-' || c == ' ' || c == '_' {
                if !out.ends_with('_') && !out.is_empty() {
                    out.push('_');
                }
                prev_lower_or_digit = false;
            } else if c.is_uppercase() {
                if prev_lower_or_digit {
                    out.push('_');
                }
                out.extend(c.to_lowercase());
                prev_lower_or_digit = false;
            } else {
                out.push(c);
                prev_lower_or_digit = c.is_lowercase() || c.is_ascii_digit();
            }
        }
        out
    }
}

/// Creates commands by operation name
pub trait CommandFactory {
    /// `None` when no operation matches `name`, even after normalization
    fn create(&self, name: &str, args: ParameterBag) -> Option<Command>;
}

/// Immutable, validated table of operations and response models
pub struct OperationCatalog {
    name: String,
    base_url: Option<String>,
    operations: Vec<Arc<OperationDescription>>,
    by_name: HashMap<String, usize>,
    by_normalized: HashMap<String, usize>,
    models: HashMap<String, Arc<ModelDescription>>,
    resolver: Option<Arc<dyn NameResolver>>,
}

impl OperationCatalog {
    /// Validate a description and index it
    ///
    /// Parameters without a location that name a URI template variable are
    /// placed in the URI.
    ///
    /// # Errors
    /// Returns `CatalogError` for duplicate operation, model or parameter
    /// names, a parameter with no location, a reference to an undescribed
    /// response model, or an unparsable base URL.
    pub fn new(description: ServiceDescription) -> Result<Self, CatalogError> {
        let ServiceDescription { name, base_url, operations, models } = description;

        if let Some(url) = &base_url {
            Url::parse(url).map_err(|e| CommonError::config_field("base_url", e.to_string()))?;
        }

        let mut model_index = HashMap::new();
        for model in models {
            if model_index.contains_key(&model.name) {
                return Err(CatalogError::DuplicateModel(model.name));
            }
            model_index.insert(model.name.clone(), Arc::new(model));
        }

        let mut by_name = HashMap::new();
        let mut indexed = Vec::with_capacity(operations.len());
        for mut operation in operations {
            if by_name.contains_key(&operation.name) {
                return Err(CatalogError::DuplicateOperation(operation.name));
            }
            normalize_parameters(&mut operation)?;
            if let Some(model) = &operation.response_model {
                if !model_index.contains_key(model) {
                    return Err(CatalogError::UnknownModel {
                        operation: operation.name.clone(),
                        model: model.clone(),
                    });
                }
            }
            by_name.insert(operation.name.clone(), indexed.len());
            indexed.push(Arc::new(operation));
        }

        debug!(service = %name, operations = indexed.len(), models = model_index.len(), "operation catalog built");

        let mut catalog = Self {
            name,
            base_url,
            operations: indexed,
            by_name,
            by_normalized: HashMap::new(),
            models: model_index,
            resolver: None,
        };
        catalog.set_resolver(Some(Arc::new(SnakeCaseResolver)));
        Ok(catalog)
    }

    /// Replace the fallback name resolver
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.set_resolver(Some(resolver));
        self
    }

    /// Exact-name lookups only
    #[must_use]
    pub fn without_resolver(mut self) -> Self {
        self.set_resolver(None);
        self
    }

    fn set_resolver(&mut self, resolver: Option<Arc<dyn NameResolver>>) {
        self.by_normalized.clear();
        if let Some(resolver) = &resolver {
            for (index, operation) in self.operations.iter().enumerate() {
                self.by_normalized.entry(resolver.normalize(&operation.name)).or_insert(index);
            }
        }
        self.resolver = resolver;
    }

    /// Look an operation up by exact name, then once more by normalized name
    pub fn get_operation(&self, name: &str) -> Option<Arc<OperationDescription>> {
        let index = self.by_name.get(name).copied().or_else(|| {
            let resolver = self.resolver.as_ref()?;
            self.by_normalized.get(&resolver.normalize(name)).copied()
        })?;
        self.operations.get(index).cloned()
    }

    /// Operations in description order
    pub fn operations(&self) -> impl Iterator<Item = &Arc<OperationDescription>> {
        self.operations.iter()
    }

    pub fn model(&self, name: &str) -> Option<&ModelDescription> {
        self.models.get(name).map(Arc::as_ref)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl fmt::Debug for OperationCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationCatalog")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("operations", &self.operations.iter().map(|o| &o.name).collect::<Vec<_>>())
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

fn normalize_parameters(operation: &mut OperationDescription) -> Result<(), CatalogError> {
    let template_vars = uri_template::variable_names(&operation.uri);
    let mut seen = Vec::with_capacity(operation.parameters.len());

    for spec in &mut operation.parameters {
        if seen.contains(&spec.name) {
            return Err(CatalogError::DuplicateParameter {
                operation: operation.name.clone(),
                parameter: spec.name.clone(),
            });
        }
        seen.push(spec.name.clone());

        if spec.location.is_none() {
            if template_vars.iter().any(|var| var == spec.wire_name()) {
                spec.location = Some(Location::Uri);
            } else {
                return Err(CatalogError::MissingLocation {
                    operation: operation.name.clone(),
                    parameter: spec.name.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use courier_domain::{HttpMethod, ParameterSpec};

    use super::*;

    fn service(operations: Vec<OperationDescription>) -> ServiceDescription {
        ServiceDescription {
            name: "people".into(),
            base_url: Some("https://api.example.com/v1/".into()),
            operations,
            models: Vec::new(),
        }
    }

    #[test]
    fn snake_case_resolver_normalizes_conventions() {
        let resolver = SnakeCaseResolver;
        for name in ["GetPerson", "getPerson", "get_person", "get-person", "GET_PERSON"] {
            assert_eq!(resolver.normalize(name).to_lowercase(), "get_person", "{name}");
        }
        assert_eq!(resolver.normalize("ListV2Items"), "list_v2_items");
    }

    #[test]
    fn lookup_falls_back_to_normalized_name_once() {
        let catalog = OperationCatalog::new(service(vec![OperationDescription::new(
            "GetPerson",
            HttpMethod::Get,
            "people",
        )]))
        .unwrap();

        assert!(catalog.get_operation("GetPerson").is_some());
        assert!(catalog.get_operation("get_person").is_some());
        assert!(catalog.get_operation("DeletePerson").is_none());

        let strict = catalog.without_resolver();
        assert!(strict.get_operation("get_person").is_none());
    }

    #[test]
    fn uri_variables_default_to_uri_location() {
        let catalog = OperationCatalog::new(service(vec![OperationDescription::new(
            "GetPerson",
            HttpMethod::Get,
            "people/{id}",
        )
        .with_parameter(ParameterSpec::new("id").required())]))
        .unwrap();

        let operation = catalog.get_operation("GetPerson").unwrap();
        assert_eq!(operation.parameters[0].location, Some(Location::Uri));
    }

    #[test]
    fn structural_problems_are_rejected() {
        let op = || OperationDescription::new("GetPerson", HttpMethod::Get, "people");

        let err = OperationCatalog::new(service(vec![op(), op()])).unwrap_err();
        assert_eq!(err, CatalogError::DuplicateOperation("GetPerson".into()));

        let err = OperationCatalog::new(service(vec![op().with_parameter(ParameterSpec::new("id"))]))
            .unwrap_err();
        assert!(matches!(err, CatalogError::MissingLocation { parameter, .. } if parameter == "id"));

        let err =
            OperationCatalog::new(service(vec![op().with_response_model("Person")])).unwrap_err();
        assert!(matches!(err, CatalogError::UnknownModel { model, .. } if model == "Person"));

        let mut bad_url = service(vec![op()]);
        bad_url.base_url = Some("not a url".into());
        assert!(matches!(OperationCatalog::new(bad_url), Err(CatalogError::Common(_))));
    }
}

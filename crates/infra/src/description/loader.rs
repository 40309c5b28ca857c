//! Service description loader
//!
//! Reads a [`ServiceDescription`] from a JSON or TOML file (detected by
//! extension) and optionally builds the [`OperationCatalog`] from it. Only
//! the structural checks of the catalog are applied.

use std::path::Path;

use courier_core::OperationCatalog;
use courier_domain::{CourierError, Result, ServiceDescription};
use tracing::info;

/// Read a service description file
///
/// # Errors
/// Returns `CourierError::Config` if the file cannot be read, has an
/// unsupported extension or does not parse.
pub fn load_description(path: impl AsRef<Path>) -> Result<ServiceDescription> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        CourierError::Config(format!("Failed to read service description {}: {}", path.display(), e))
    })?;
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    let description = parse_description(&contents, extension)?;
    info!(
        path = %path.display(),
        service = %description.name,
        operations = description.operations.len(),
        models = description.models.len(),
        "service description loaded"
    );
    Ok(description)
}

/// Parse a service description in the given format (`json` or `toml`)
///
/// # Errors
/// Returns `CourierError::Config` for an unsupported format or invalid
/// content.
pub fn parse_description(contents: &str, format: &str) -> Result<ServiceDescription> {
    match format {
        "toml" => toml::from_str(contents)
            .map_err(|e| CourierError::Config(format!("Invalid TOML service description: {}", e))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| CourierError::Config(format!("Invalid JSON service description: {}", e))),
        _ => Err(CourierError::Config(format!("Unsupported service description format: {}", format))),
    }
}

/// Read a service description file and build its catalog
///
/// # Errors
/// Everything [`load_description`] returns, plus `CourierError::Config` when
/// the catalog rejects the description.
pub fn load_catalog(path: impl AsRef<Path>) -> Result<OperationCatalog> {
    let description = load_description(path)?;
    OperationCatalog::new(description).map_err(|e| CourierError::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use courier_domain::{HttpMethod, Location};

    use super::*;

    #[test]
    fn parses_json_with_camel_case_keys_and_location_shorthand() {
        let json = r#"{
            "name": "people",
            "baseUrl": "https://api.example.com/",
            "operations": [{
                "name": "GetPerson",
                "httpMethod": "GET",
                "uri": "person",
                "parameters": [
                    { "name": "id", "type": "integer", "location": "query:people", "required": true }
                ]
            }]
        }"#;

        let description = parse_description(json, "json").unwrap();
        assert_eq!(description.base_url.as_deref(), Some("https://api.example.com/"));
        let operation = &description.operations[0];
        assert_eq!(operation.http_method, HttpMethod::Get);
        assert_eq!(operation.parameters[0].location, Some(Location::Query));
        assert_eq!(operation.parameters[0].sent_as.as_deref(), Some("people"));
    }

    #[test]
    fn parses_toml() {
        let toml = r#"
name = "people"
base_url = "https://api.example.com/"

[[operations]]
name = "DeletePerson"
http_method = "DELETE"
uri = "people/{id}"

[[operations.parameters]]
name = "id"
required = true
"#;

        let description = parse_description(toml, "toml").unwrap();
        assert_eq!(description.operations[0].http_method, HttpMethod::Delete);
        assert!(description.operations[0].parameters[0].required);
    }

    #[test]
    fn rejects_unknown_formats() {
        assert!(matches!(parse_description("", "yaml"), Err(CourierError::Config(_))));
    }
}

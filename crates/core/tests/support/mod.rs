//! Shared fixtures for core integration tests

#![allow(dead_code)]

use std::sync::Arc;

use courier_core::testing::MockTransport;
use courier_core::{OperationCatalog, ServiceClient};
use courier_domain::{
    HttpMethod, Location, OperationDescription, PaginationSpec, ParamType, ParameterSpec, ServiceDescription,
};

pub const BASE_URL: &str = "https://api.example.com/v1/";

/// `GetPerson` (required `id`, sent as the `people` query parameter) and the
/// paginated `ListPeople`
pub fn people_description() -> ServiceDescription {
    ServiceDescription {
        name: "people".into(),
        base_url: Some(BASE_URL.into()),
        operations: vec![
            OperationDescription::new("GetPerson", HttpMethod::Get, "person").with_parameter(
                ParameterSpec::new("id")
                    .with_type(ParamType::Integer)
                    .with_location(Location::Query)
                    .sent_as("people")
                    .required(),
            ),
            OperationDescription::new("ListPeople", HttpMethod::Get, "people")
                .with_parameter(ParameterSpec::new("next").with_location(Location::Query))
                .with_parameter(
                    ParameterSpec::new("limit").with_type(ParamType::Integer).with_location(Location::Query),
                )
                .paginated(PaginationSpec::new("next", "meta.next", "people").with_page_size_param("limit")),
        ],
        models: Vec::new(),
    }
}

pub fn client() -> (ServiceClient, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::new());
    let catalog = OperationCatalog::new(people_description()).expect("valid description");
    (ServiceClient::new(catalog, transport.clone()), transport)
}

//! Domain types and models

pub mod description;
pub mod http;

pub use description::{
    Location, ModelDescription, ModelProperty, OperationDescription, PaginationSpec, ParamType,
    ParameterSpec, ResponseLocation, ServiceDescription,
};
pub use http::{Body, Headers, HttpMethod, QueryString, Request, RequestId, Response};

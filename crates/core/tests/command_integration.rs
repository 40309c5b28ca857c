//! Integration tests for the command lifecycle through `ServiceClient`

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use courier_core::events::COMMAND_PREPARE;
use courier_core::{
    BackoffPlugin, ClientError, CommandError, CommandEvent, CommandState, HeaderAuthPlugin, HistoryPlugin, MockPlugin,
    ParameterBag, ParameterError, Propagation,
};
use courier_domain::{HttpMethod, Response};
use serde_json::json;

#[tokio::test]
async fn get_person_builds_query_and_parses_result() {
    let (client, transport) = support::client();
    transport.push_response(Response::from_json(200, &json!({"id": 42, "name": "Ada"})));

    let result = client.execute("GetPerson", ParameterBag::new().with("id", 42)).await.unwrap();

    let sent = transport.requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].method, HttpMethod::Get);
    assert_eq!(sent[0].query.get("people"), Some("42"));
    assert_eq!(sent[0].full_url().as_str(), "https://api.example.com/v1/person?people=42");
    assert_eq!(result.get("name"), Some(&json!("Ada")));
}

#[tokio::test]
async fn missing_parameter_never_reaches_the_transport() {
    let (client, transport) = support::client();
    let mut command = client.command("GetPerson", ParameterBag::new()).unwrap();

    let err = command.prepare().unwrap_err();
    assert!(err.is_validation());
    assert!(matches!(
        err.parameter_errors(),
        [ParameterError::MissingParameter { name, .. }] if name == "id"
    ));
    assert!(command.request().is_none());

    let err = client.execute("GetPerson", ParameterBag::new()).await.unwrap_err();
    assert!(matches!(err, ClientError::Command(CommandError::Validation { .. })));
    assert!(transport.requests().is_empty());
}

#[test]
fn identical_arguments_build_identical_requests() {
    let (client, _) = support::client();
    let build = || {
        let mut command = client.command("GetPerson", ParameterBag::new().with("id", 7)).unwrap();
        let request = command.prepare().unwrap().clone();
        (request.method, request.full_url(), request.headers, request.body)
    };
    assert_eq!(build(), build());
}

#[test]
fn prepare_is_idempotent() {
    let (client, _) = support::client();
    let published = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&published);
    client.events().subscribe(
        COMMAND_PREPARE,
        move |_: &mut CommandEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Propagation::Continue)
        },
        0,
    );

    let mut command = client.command("GetPerson", ParameterBag::new().with("id", 1)).unwrap();
    let first = command.prepare().unwrap().clone();
    let second = command.prepare().unwrap().clone();

    assert_eq!(first, second);
    assert_eq!(published.load(Ordering::SeqCst), 1);
    assert_eq!(command.state(), CommandState::Prepared);
}

#[tokio::test]
async fn plugins_compose_on_one_client() {
    let (client, transport) = support::client();
    let history = Arc::new(HistoryPlugin::new(5));
    let mock = Arc::new(MockPlugin::from_responses([Response::from_json(200, &json!({"name": "Mocked"}))]));
    client.add_subscriber(Arc::new(HeaderAuthPlugin::bearer("secret")));
    client.add_subscriber(history.clone());
    client.add_subscriber(mock.clone());

    let mocked = client.execute("GetPerson", ParameterBag::new().with("id", 1)).await.unwrap();
    assert_eq!(mocked.get("name"), Some(&json!("Mocked")));
    assert!(transport.requests().is_empty());

    transport.push_response(Response::from_json(200, &json!({"name": "Real"})));
    let real = client.execute("GetPerson", ParameterBag::new().with("id", 2)).await.unwrap();
    assert_eq!(real.get("name"), Some(&json!("Real")));

    let sent = transport.requests();
    assert_eq!(sent[0].headers.get("authorization"), Some("Bearer secret"));
    assert_eq!(history.len(), 2);
    assert_eq!(history.last_response().map(|r| r.status), Some(200));
}

#[tokio::test]
async fn response_that_is_not_json_is_surfaced() {
    let (client, transport) = support::client();
    transport.push_response(
        Response::new(200).with_header("Content-Type", "application/json").with_body("{not json"),
    );

    let err = client.execute("GetPerson", ParameterBag::new().with("id", 1)).await.unwrap_err();
    assert!(matches!(err, ClientError::Command(CommandError::Response(_))));
}

#[tokio::test]
async fn mocked_error_status_goes_through_error_handling() {
    let (client, transport) = support::client();
    client.add_subscriber(Arc::new(MockPlugin::from_responses([Response::from_json(
        503,
        &json!({"name": "unavailable"}),
    )])));

    let mut command = client.command("GetPerson", ParameterBag::new().with("id", 1)).unwrap();
    let err = command.execute().await.unwrap_err();

    assert!(matches!(&err, CommandError::Transport { source, .. } if source.status == Some(503)));
    assert_eq!(command.state(), CommandState::Errored);
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn mocked_error_status_can_be_retried_by_backoff() {
    let (client, transport) = support::client();
    transport.push_response(Response::from_json(200, &json!({"name": "Ada"})));
    client.add_subscriber(Arc::new(MockPlugin::from_responses([Response::new(500)])));
    client.add_subscriber(Arc::new(
        BackoffPlugin::new().with_backoff(courier_common::Backoff::fixed(Duration::from_millis(1))),
    ));

    let result = client.execute("GetPerson", ParameterBag::new().with("id", 1)).await.unwrap();

    assert_eq!(result.get("name"), Some(&json!("Ada")));
    assert_eq!(transport.requests().len(), 1);
}

//! Integration tests for paginated iteration

mod support;

use courier_core::{ClientError, ParameterBag};
use courier_domain::Response;
use futures::StreamExt;
use serde_json::json;

fn page(people: &[&str], next: Option<&str>) -> Response {
    Response::from_json(200, &json!({ "people": people, "meta": { "next": next } }))
}

#[tokio::test]
async fn three_pages_then_stop() {
    let (client, transport) = support::client();
    transport.push_response(page(&["ada", "grace"], Some("p2")));
    transport.push_response(page(&["edsger"], Some("p3")));
    transport.push_response(page(&["barbara", "donald"], None));

    let mut iterator = client.iterator("ListPeople", ParameterBag::new()).unwrap();
    let people = iterator.collect_all().await.unwrap();

    assert_eq!(people, vec![json!("ada"), json!("grace"), json!("edsger"), json!("barbara"), json!("donald")]);
    assert_eq!(iterator.request_count(), 3);
    assert_eq!(iterator.retrieved_count(), 5);
    assert_eq!(iterator.next().await.unwrap(), None);

    let sent = transport.requests();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0].query.get("next"), None);
    assert_eq!(sent[1].query.get("next"), Some("p2"));
    assert_eq!(sent[2].query.get("next"), Some("p3"));
}

#[tokio::test]
async fn limit_is_sent_as_the_page_size() {
    let (client, transport) = support::client();
    transport.push_response(page(&["ada", "grace"], Some("p2")));
    transport.push_response(page(&["edsger"], Some("p3")));

    let iterator = client.iterator("ListPeople", ParameterBag::new()).unwrap().with_page_size(2).with_limit(3);
    let people: Vec<_> = iterator.into_stream().collect().await;

    assert_eq!(people.len(), 3);
    assert!(people.iter().all(Result::is_ok));

    let sent = transport.requests();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].query.get("limit"), Some("2"));
    assert_eq!(sent[1].query.get("limit"), Some("1"));
}

#[tokio::test]
async fn transport_failure_surfaces_from_next() {
    let (client, transport) = support::client();
    transport.push_response(page(&["ada"], Some("p2")));

    let mut iterator = client.iterator("ListPeople", ParameterBag::new()).unwrap();
    assert_eq!(iterator.next().await.unwrap(), Some(json!("ada")));
    assert!(iterator.next().await.is_err());
    assert!(matches!(
        client.iterator("GetPerson", ParameterBag::new()),
        Err(ClientError::NotPaginated(name)) if name == "GetPerson"
    ));
}

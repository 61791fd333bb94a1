// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HttpIndex against a mock HTTP server.

use change_indexer::{
    Applied, ChangeEvent, ChangeOp, DocumentAddress, HttpIndex, IndexSink, LogPosition,
    Namespace, SearchIndex, SinkError,
};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{any, body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;

use common::MemoryResolver;

fn address(id: &str) -> DocumentAddress {
    DocumentAddress::new(&Namespace::parse("db.users").unwrap(), "default", id)
}

fn index_for(server: &MockServer) -> HttpIndex {
    HttpIndex::with_timeout(&server.uri(), Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn replace_puts_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/db.users/default/1"))
        .and(body_json(json!({"name": "ada"})))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    index_for(&server)
        .replace(&address("1"), &json!({"name": "ada"}))
        .await
        .unwrap();
}

#[tokio::test]
async fn delete_reports_existing_document() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/db.users/default/1"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    assert!(index_for(&server).delete(&address("1")).await.unwrap());
}

#[tokio::test]
async fn delete_of_missing_document_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/db.users/default/404"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;

    let index = index_for(&server);
    assert!(!index.delete(&address("404")).await.unwrap());
    assert!(!index.delete(&address("404")).await.unwrap());
}

#[tokio::test]
async fn server_error_carries_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(503).set_body_string("shard unavailable"))
        .mount(&server)
        .await;

    let err = index_for(&server)
        .replace(&address("1"), &json!({}))
        .await
        .unwrap_err();

    match err {
        SinkError::Index {
            address,
            status,
            message,
        } => {
            assert_eq!(address, "db.users/default/1");
            assert_eq!(status, Some(503));
            assert!(message.contains("shard unavailable"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn delete_rejects_other_client_errors() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    let err = index_for(&server).delete(&address("1")).await.unwrap_err();
    assert!(err.to_string().contains("HTTP 409"));
}

#[tokio::test]
async fn slow_index_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let index = HttpIndex::with_timeout(&server.uri(), Duration::from_millis(100)).unwrap();
    let err = index.replace(&address("1"), &json!({})).await.unwrap_err();
    assert!(matches!(err, SinkError::Index { status: None, .. }));
}

#[tokio::test]
async fn document_id_is_one_path_segment() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/db.users/default/a%2Fb"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    index_for(&server).replace(&address("a/b"), &json!({})).await.unwrap();
}

#[tokio::test]
async fn sink_strips_identity_before_put() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/db.users/default/7"))
        .and(body_json(json!({"name": "grace"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = MemoryResolver::new();
    resolver.put("db.users", "7", json!({"_id": "7", "name": "grace"}));
    let sink = IndexSink::new(index_for(&server), "default");
    let event = ChangeEvent::new(
        Namespace::parse("db.users").unwrap(),
        ChangeOp::Update { document_id: "7".to_string() },
        LogPosition::new(10, 0),
    );

    sink.apply(&event, &resolver).await.unwrap();
}

#[tokio::test]
async fn dot_ids_never_reach_the_type_endpoint() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let index = index_for(&server);
    for id in [".", ".."] {
        let err = index.replace(&address(id), &json!({})).await.unwrap_err();
        assert!(matches!(err, SinkError::Unaddressable { .. }));
        let err = index.delete(&address(id)).await.unwrap_err();
        assert!(matches!(err, SinkError::Unaddressable { .. }));
    }

    let resolver = MemoryResolver::new();
    resolver.put("db.users", ".", json!({"name": "dot"}));
    let sink = IndexSink::new(index, "default");
    let ns = Namespace::parse("db.users").unwrap();
    let upsert = ChangeEvent::new(
        ns.clone(),
        ChangeOp::Insert { document_id: ".".to_string() },
        LogPosition::new(10, 0),
    );
    let delete = ChangeEvent::new(
        ns,
        ChangeOp::Delete { document_id: "..".to_string() },
        LogPosition::new(11, 0),
    );

    assert_eq!(sink.apply(&upsert, &resolver).await.unwrap(), Applied::Skipped);
    assert_eq!(sink.apply(&delete, &resolver).await.unwrap(), Applied::Skipped);
}

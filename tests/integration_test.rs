//! End-to-end scenarios exercised against a real `tokio` runtime, a bound
//! `TcpListener`, and real WebSocket connections; no mocked transport.

mod support;

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use duplex_rpc::{ClientBuilder, Error, ServerBuilder};
use support::{connect_demo_client, init_tracing, spawn_demo_server, DemoMiddleware};

#[tokio::test]
async fn echo_roundtrip() {
    init_tracing();
    let _server = spawn_demo_server(18201, Duration::from_secs(5)).await;
    let conn = connect_demo_client(18201).await;

    let reply = conn
        .send_request("echo", Some(json!({"message": "Hello!"})))
        .await
        .expect("request succeeds");

    assert!(reply.error().is_none());
    let result: serde_json::Value = reply.result().unwrap();
    assert_eq!(result, json!({"message": "Hello!"}));

    conn.close().await;
}

#[tokio::test]
async fn server_error_keeps_connection_open() {
    init_tracing();
    let _server = spawn_demo_server(18202, Duration::from_secs(5)).await;
    let conn = connect_demo_client(18202).await;

    let reply = conn
        .send_request("explode", None)
        .await
        .expect("request succeeds even though the peer replies with an error");

    let err = reply.error().expect("error slot is set");
    assert_eq!(err.code, 1234);
    assert_eq!(err.message, "much error");
    assert_eq!(err.data, Some(json!({"k": "v"})));

    // the connection itself is still usable after an application-level error reply
    assert!(conn.is_open().await);
    let follow_up = conn
        .send_request("echo", Some(json!({"message": "still alive"})))
        .await
        .expect("connection stayed open after an error response");
    assert!(follow_up.error().is_none());

    conn.close().await;
}

#[tokio::test]
async fn middleware_panic_closes_only_that_connection() {
    init_tracing();
    let _server = spawn_demo_server(18203, Duration::from_secs(5)).await;

    let doomed = connect_demo_client(18203).await;
    let err = doomed.send_request("boom", None).await.unwrap_err();
    assert!(matches!(err, Error::Closed));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!doomed.is_open().await);

    // a second connection to the same server still serves echoes
    let survivor = connect_demo_client(18203).await;
    let reply = survivor
        .send_request("echo", Some(json!({"message": "still here"})))
        .await
        .expect("second connection unaffected by the first's panic");
    let result: serde_json::Value = reply.result().unwrap();
    assert_eq!(result, json!({"message": "still here"}));

    survivor.close().await;
}

#[tokio::test]
async fn bidirectional_request_in_flight() {
    init_tracing();
    let _server = spawn_demo_server(18204, Duration::from_secs(5)).await;
    let conn = connect_demo_client(18204).await;

    // handling this request makes the server call back into the client with its own
    // "pong" request before replying
    let reply = conn
        .send_request("ping", Some(json!({"n": 1})))
        .await
        .expect("request succeeds");

    let result: serde_json::Value = reply.result().unwrap();
    assert_eq!(result, json!({"echo": {"n": 1}}));

    conn.close().await;
}

#[tokio::test]
async fn graceful_drain_waits_for_every_connection() {
    init_tracing();
    let server = spawn_demo_server(18205, Duration::from_secs(5)).await;

    let conns = futures_util::future::join_all(
        (0..4).map(|_| connect_demo_client(18205)),
    )
    .await;

    for conn in &conns {
        conn.send_request("echo", Some(json!({"i": 1})))
            .await
            .expect("warm up each connection");
    }

    server.close().await;

    for conn in &conns {
        assert!(!conn.is_open().await);
    }
}

#[tokio::test]
async fn large_payload_is_delivered_intact() {
    init_tracing();
    let _server = spawn_demo_server(18206, Duration::from_secs(5)).await;
    let conn = connect_demo_client(18206).await;

    let blob: String = "x".repeat(300 * 1024);
    let reply = conn
        .send_request("echo", Some(json!({"blob": blob.clone()})))
        .await
        .expect("large request succeeds");

    let result: serde_json::Value = reply.result().unwrap();
    assert_eq!(result["blob"].as_str().unwrap().len(), blob.len());

    conn.close().await;
}

#[tokio::test]
async fn deadline_closes_idle_connection() {
    init_tracing();
    let server = ServerBuilder::new()
        .with_middleware(DemoMiddleware)
        .with_deadline(Duration::from_millis(150))
        .build();
    let bound = server.clone();
    tokio::spawn(async move {
        let _ = bound.serve(support::server_addr(18207)).await;
    });
    tokio::time::sleep(Duration::from_millis(150)).await;

    let client = ClientBuilder::new().build();
    let conn = client
        .connect(&support::server_url(18207))
        .await
        .expect("client connect");

    // send nothing and wait past the deadline; the server should close us out
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!conn.is_open().await);
}

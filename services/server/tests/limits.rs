// Rate-limit and topic-policy behavior over HTTP.
mod common;

use common::{client, streaming_client, StreamReader, TestServer};
use serde_json::Value;
use server::config::ServerConfig;
use std::time::Duration;

#[tokio::test]
async fn request_limit_returns_42901_after_burst() {
    let config = ServerConfig {
        visitor_request_limit_burst: 3,
        visitor_request_limit_replenish: Duration::from_secs(3600),
        ..Default::default()
    };
    let server = TestServer::start(config).await;

    for _ in 0..3 {
        let response = client()
            .put(server.url("/t"))
            .body("ok")
            .send()
            .await
            .expect("publish");
        assert_eq!(response.status(), 200);
    }
    let response = client()
        .put(server.url("/t"))
        .body("limited")
        .send()
        .await
        .expect("publish");
    assert_eq!(response.status(), 429);
    let error: Value = response.json().await.expect("error json");
    assert_eq!(error["code"], 42901);
    assert_eq!(error["http"], 429);
    server.stop().await;
}

#[tokio::test]
async fn subscription_limit_rejects_concurrent_streams() {
    let config = ServerConfig {
        visitor_subscription_limit: 1,
        ..Default::default()
    };
    let server = TestServer::start(config).await;

    let held = streaming_client()
        .get(server.url("/t/sse"))
        .send()
        .await
        .expect("first subscribe");
    let mut reader = StreamReader::new(held);
    reader
        .read_until("event: open", Duration::from_secs(3))
        .await;

    let response = client()
        .get(server.url("/t/json"))
        .send()
        .await
        .expect("second subscribe");
    assert_eq!(response.status(), 429);
    let error: Value = response.json().await.expect("error json");
    assert_eq!(error["code"], 42903);

    // Dropping the held stream frees the slot.
    drop(reader);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let response = client()
        .get(server.url("/t/json?poll=1"))
        .send()
        .await
        .expect("third subscribe");
    assert_eq!(response.status(), 200);
    server.stop().await;
}

#[tokio::test]
async fn total_topic_limit_returns_42904() {
    let config = ServerConfig {
        total_topic_limit: 1,
        ..Default::default()
    };
    let server = TestServer::start(config).await;

    let response = client()
        .put(server.url("/first"))
        .body("x")
        .send()
        .await
        .expect("publish");
    assert_eq!(response.status(), 200);

    let response = client()
        .put(server.url("/second"))
        .body("x")
        .send()
        .await
        .expect("publish");
    assert_eq!(response.status(), 429);
    let error: Value = response.json().await.expect("error json");
    assert_eq!(error["code"], 42904);
    server.stop().await;
}

#[tokio::test]
async fn invalid_and_disallowed_topics_are_rejected() {
    let server = TestServer::start(ServerConfig::default()).await;

    let response = client()
        .put(server.url("/docs"))
        .body("x")
        .send()
        .await
        .expect("publish");
    assert_eq!(response.status(), 400);
    let error: Value = response.json().await.expect("error json");
    assert_eq!(error["code"], 40010);

    // Comma lists are only valid for subscribing, not publishing.
    let response = client()
        .put(server.url("/a,b"))
        .body("x")
        .send()
        .await
        .expect("publish");
    assert_eq!(response.status(), 400);
    let error: Value = response.json().await.expect("error json");
    assert_eq!(error["code"], 40009);
    server.stop().await;
}

#[tokio::test]
async fn unknown_routes_return_the_json_not_found() {
    let server = TestServer::start(ServerConfig::default()).await;

    let response = client()
        .get(server.url("/t/nosuchformat"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 404);
    let error: Value = response.json().await.expect("error json");
    assert_eq!(error["code"], 40401);

    let response = client()
        .delete(server.url("/t"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 404);
    server.stop().await;
}

#[tokio::test]
async fn email_without_mailer_is_rejected() {
    let server = TestServer::start(ServerConfig::default()).await;

    let response = client()
        .put(server.url("/t?email=user@example.com"))
        .body("x")
        .send()
        .await
        .expect("publish");
    assert_eq!(response.status(), 400);
    let error: Value = response.json().await.expect("error json");
    assert_eq!(error["code"], 40001);
    server.stop().await;
}

#[tokio::test]
async fn bad_since_is_rejected() {
    let server = TestServer::start(ServerConfig::default()).await;

    let response = client()
        .get(server.url("/t/json?poll=1&since=wat"))
        .send()
        .await
        .expect("poll");
    assert_eq!(response.status(), 400);
    let error: Value = response.json().await.expect("error json");
    assert_eq!(error["code"], 40008);
    server.stop().await;
}

#[tokio::test]
async fn cors_headers_are_always_present() {
    let server = TestServer::start(ServerConfig::default()).await;

    let response = client()
        .put(server.url("/t"))
        .header("Origin", "https://example.com")
        .body("x")
        .send()
        .await
        .expect("publish");
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
    server.stop().await;
}

// End-to-end publish/subscribe behavior over real HTTP.
mod common;

use common::{client, streaming_client, StreamReader, TestServer};
use serde_json::Value;
use server::config::ServerConfig;
use std::time::Duration;

fn parse_lines(body: &str) -> Vec<Value> {
    body.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).expect("json line"))
        .collect()
}

#[tokio::test]
async fn sse_subscriber_sees_open_then_message() {
    let server = TestServer::start(ServerConfig::default()).await;

    let response = streaming_client()
        .get(server.url("/mytopic/sse"))
        .send()
        .await
        .expect("subscribe");
    assert_eq!(response.status(), 200);
    assert!(response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .expect("content type")
        .starts_with("text/event-stream"));
    let mut reader = StreamReader::new(response);
    reader
        .read_until("event: open\ndata: ", Duration::from_secs(3))
        .await;

    let publish = client()
        .put(server.url("/mytopic"))
        .body("hello")
        .send()
        .await
        .expect("publish");
    assert_eq!(publish.status(), 200);
    let published: Value = publish.json().await.expect("publish body");
    assert_eq!(published["topic"], "mytopic");
    assert_eq!(published["message"], "hello");
    assert_eq!(published["event"], "message");

    let body = reader
        .read_until("\"message\":\"hello\"", Duration::from_secs(3))
        .await;
    // The message frame is a bare data: line, no event name.
    assert!(body.contains("\ndata: {") || body.matches("data: {").count() >= 2);
    server.stop().await;
}

#[tokio::test]
async fn json_stream_without_since_gets_no_backfill() {
    let server = TestServer::start(ServerConfig::default()).await;

    client()
        .put(server.url("/t"))
        .body("cached earlier")
        .send()
        .await
        .expect("publish old");

    let response = streaming_client()
        .get(server.url("/t/json"))
        .send()
        .await
        .expect("subscribe");
    let mut reader = StreamReader::new(response);
    reader
        .read_until("\"event\":\"open\"", Duration::from_secs(3))
        .await;

    client()
        .put(server.url("/t"))
        .body("live only")
        .send()
        .await
        .expect("publish live");
    let body = reader
        .read_until("live only", Duration::from_secs(3))
        .await;
    assert!(!body.contains("cached earlier"));
    server.stop().await;
}

#[tokio::test]
async fn since_all_replays_before_live_messages() {
    let server = TestServer::start(ServerConfig::default()).await;

    for body in ["first", "second"] {
        client()
            .put(server.url("/t"))
            .body(body)
            .send()
            .await
            .expect("publish");
    }

    let response = streaming_client()
        .get(server.url("/t/json?since=all"))
        .send()
        .await
        .expect("subscribe");
    let mut reader = StreamReader::new(response);
    reader.read_until("second", Duration::from_secs(3)).await;

    client()
        .put(server.url("/t"))
        .body("third")
        .send()
        .await
        .expect("publish live");
    let body = reader
        .read_until("third", Duration::from_secs(3))
        .await
        .to_string();

    let open = body.find("\"event\":\"open\"").expect("open frame");
    let first = body.find("first").expect("first");
    let second = body.find("second").expect("second");
    let third = body.find("third").expect("third");
    assert!(open < first && first < second && second < third);
    server.stop().await;
}

#[tokio::test]
async fn poll_returns_cached_messages_and_closes() {
    let server = TestServer::start(ServerConfig::default()).await;

    client()
        .put(server.url("/t"))
        .body("one")
        .send()
        .await
        .expect("publish");
    client()
        .put(server.url("/t"))
        .body("two")
        .send()
        .await
        .expect("publish");

    // Poll defaults to since=all.
    let body = client()
        .get(server.url("/t/json?poll=1"))
        .send()
        .await
        .expect("poll")
        .text()
        .await
        .expect("text");
    let messages = parse_lines(&body);
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["message"], "one");
    assert_eq!(messages[1]["message"], "two");

    // An explicit tiny since excludes nothing; a far-future one everything.
    let body = client()
        .get(server.url("/t/json?poll=1&since=99999999999"))
        .send()
        .await
        .expect("poll")
        .text()
        .await
        .expect("text");
    assert!(parse_lines(&body).is_empty());
    server.stop().await;
}

#[tokio::test]
async fn multi_topic_subscriber_sees_both_topics() {
    let server = TestServer::start(ServerConfig::default()).await;

    let response = streaming_client()
        .get(server.url("/a,b/json"))
        .send()
        .await
        .expect("subscribe");
    let mut reader = StreamReader::new(response);
    reader
        .read_until("\"event\":\"open\"", Duration::from_secs(3))
        .await;

    client()
        .put(server.url("/a"))
        .body("x")
        .send()
        .await
        .expect("publish a");
    client()
        .put(server.url("/b"))
        .body("y")
        .send()
        .await
        .expect("publish b");

    let body = reader.read_until("\"y\"", Duration::from_secs(3)).await;
    let lines = parse_lines(body);
    let x = lines
        .iter()
        .find(|m| m["message"] == "x")
        .expect("message x");
    let y = lines
        .iter()
        .find(|m| m["message"] == "y")
        .expect("message y");
    assert_eq!(x["topic"], "a");
    assert_eq!(y["topic"], "b");
    server.stop().await;
}

#[tokio::test]
async fn every_subscriber_gets_exactly_one_copy() {
    let server = TestServer::start(ServerConfig::default()).await;

    let mut readers = Vec::new();
    for _ in 0..3 {
        let response = streaming_client()
            .get(server.url("/t/json"))
            .send()
            .await
            .expect("subscribe");
        let mut reader = StreamReader::new(response);
        reader
            .read_until("\"event\":\"open\"", Duration::from_secs(3))
            .await;
        readers.push(reader);
    }

    client()
        .put(server.url("/t"))
        .body("fanout")
        .send()
        .await
        .expect("publish");

    for reader in &mut readers {
        let body = reader.read_until("fanout", Duration::from_secs(3)).await;
        assert_eq!(body.matches("fanout").count(), 1);
    }
    server.stop().await;
}

#[tokio::test]
async fn raw_stream_carries_message_bodies_only() {
    let server = TestServer::start(ServerConfig::default()).await;

    let response = streaming_client()
        .get(server.url("/t/raw"))
        .send()
        .await
        .expect("subscribe");
    let mut reader = StreamReader::new(response);
    // The open event is an empty line in raw mode.
    reader.read_until("\n", Duration::from_secs(3)).await;

    client()
        .put(server.url("/t"))
        .body("line one\nline two")
        .send()
        .await
        .expect("publish");
    let body = reader
        .read_until("line one line two\n", Duration::from_secs(3))
        .await;
    assert!(!body.contains('{'));
    server.stop().await;
}

#[tokio::test]
async fn tag_filter_requires_all_tags() {
    let server = TestServer::start(ServerConfig::default()).await;

    let response = streaming_client()
        .get(server.url("/t/json?tags=a,b"))
        .send()
        .await
        .expect("subscribe");
    let mut reader = StreamReader::new(response);
    reader
        .read_until("\"event\":\"open\"", Duration::from_secs(3))
        .await;

    client()
        .put(server.url("/t?tags=a"))
        .body("only a")
        .send()
        .await
        .expect("publish");
    client()
        .put(server.url("/t?tags=b,a,c"))
        .body("all tags")
        .send()
        .await
        .expect("publish");

    let body = reader
        .read_until("all tags", Duration::from_secs(3))
        .await;
    assert!(!body.contains("only a"));
    server.stop().await;
}

#[tokio::test]
async fn priority_words_map_to_numbers() {
    let server = TestServer::start(ServerConfig::default()).await;

    let published: Value = client()
        .put(server.url("/t?priority=urgent"))
        .body("big trouble")
        .send()
        .await
        .expect("publish")
        .json()
        .await
        .expect("json");
    assert_eq!(published["priority"], 5);

    let response = client()
        .put(server.url("/t?priority=bogus"))
        .body("nope")
        .send()
        .await
        .expect("publish");
    assert_eq!(response.status(), 400);
    let error: Value = response.json().await.expect("error json");
    assert_eq!(error["code"], 40007);
    assert_eq!(error["http"], 400);
    server.stop().await;
}

#[tokio::test]
async fn unicode_bodies_round_trip_trimmed() {
    let server = TestServer::start(ServerConfig::default()).await;

    client()
        .put(server.url("/t"))
        .body("  schön wäre es 🚀  ")
        .send()
        .await
        .expect("publish");
    let body = client()
        .get(server.url("/t/json?poll=1"))
        .send()
        .await
        .expect("poll")
        .text()
        .await
        .expect("text");
    let messages = parse_lines(&body);
    assert_eq!(messages[0]["message"], "schön wäre es 🚀");
    server.stop().await;
}

#[tokio::test]
async fn get_publish_endpoints_default_to_triggered() {
    let server = TestServer::start(ServerConfig::default()).await;

    let published: Value = client()
        .get(server.url("/t/trigger"))
        .send()
        .await
        .expect("trigger")
        .json()
        .await
        .expect("json");
    assert_eq!(published["message"], "triggered");

    let published: Value = client()
        .get(server.url("/t/publish?message=from+query&title=hi"))
        .send()
        .await
        .expect("publish")
        .json()
        .await
        .expect("json");
    assert_eq!(published["message"], "from query");
    assert_eq!(published["title"], "hi");
    server.stop().await;
}

#[tokio::test]
async fn title_and_header_aliases_apply() {
    let server = TestServer::start(ServerConfig::default()).await;

    let published: Value = client()
        .put(server.url("/t"))
        .header("X-Title", "from header")
        .header("Tags", "warn,prod")
        .body("body")
        .send()
        .await
        .expect("publish")
        .json()
        .await
        .expect("json");
    assert_eq!(published["title"], "from header");
    assert_eq!(published["tags"][0], "warn");
    assert_eq!(published["tags"][1], "prod");
    server.stop().await;
}

#[tokio::test]
async fn keepalives_flow_on_the_configured_interval() {
    let config = ServerConfig {
        keepalive_interval: Duration::from_millis(150),
        ..Default::default()
    };
    let server = TestServer::start(config).await;

    let response = streaming_client()
        .get(server.url("/t/json"))
        .send()
        .await
        .expect("subscribe");
    let mut reader = StreamReader::new(response);
    reader
        .read_until("\"event\":\"keepalive\"", Duration::from_secs(3))
        .await;
    server.stop().await;
}

#[tokio::test]
async fn unifiedpush_discovery_and_home_page() {
    let server = TestServer::start(ServerConfig::default()).await;

    let body = client()
        .get(server.url("/uptopic?up=1"))
        .send()
        .await
        .expect("discovery")
        .text()
        .await
        .expect("text");
    assert_eq!(body.trim(), "{\"unifiedpush\":{\"version\":1}}");

    let home = client()
        .get(server.url("/"))
        .send()
        .await
        .expect("home")
        .text()
        .await
        .expect("text");
    assert!(home.contains("<html"));
    server.stop().await;
}

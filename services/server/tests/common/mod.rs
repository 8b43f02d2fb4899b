// Shared helpers for the HTTP integration tests: an in-process server on an
// ephemeral port, a strict client, and a line-oriented stream reader.
#![allow(dead_code)] // not every test binary uses every helper
use beacon_broker::Broker;
use beacon_cache::{FileCache, MemCache, MessageCache};
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::Client;
use server::app::{build_router, AppState};
use server::config::ServerConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

pub struct TestServer {
    pub base_url: String,
    pub broker: Arc<Broker>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(config: ServerConfig) -> Self {
        Self::start_with_cache(config, Arc::new(MemCache::new())).await
    }

    pub async fn start_with_cache(mut config: ServerConfig, cache: Arc<dyn MessageCache>) -> Self {
        let file_cache = match &config.attachment_cache_dir {
            Some(dir) => Some(Arc::new(
                FileCache::new(
                    dir.clone(),
                    config.attachment_total_size_limit,
                    config.attachment_file_size_limit,
                )
                .await
                .expect("file cache"),
            )),
            None => None,
        };
        let broker = Arc::new(
            Broker::new(config.broker_config(), cache, file_cache)
                .await
                .expect("broker"),
        );
        broker.start();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        config.listen_http = Some(addr);
        let state = AppState {
            broker: Arc::clone(&broker),
            config: Arc::new(config),
        };
        let router = build_router(state);
        let token = broker.shutdown_token();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(token.cancelled_owned())
            .await;
        });
        wait_for_listen(addr).await;
        Self {
            base_url: format!("http://{addr}"),
            broker,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub async fn stop(self) {
        self.broker.shutdown();
        let _ = self.handle.await;
    }
}

pub fn client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(5))
        .no_proxy()
        .build()
        .expect("client")
}

/// Client without a total-request timeout, for held-open streaming reads.
pub fn streaming_client() -> Client {
    Client::builder().no_proxy().build().expect("client")
}

async fn wait_for_listen(addr: SocketAddr) {
    let deadline = Instant::now() + Duration::from_secs(1);
    loop {
        if tokio::net::TcpStream::connect(addr).await.is_ok() {
            return;
        }
        assert!(Instant::now() < deadline, "server not ready at {addr}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Accumulates a streaming response body and waits for substrings.
pub struct StreamReader {
    stream: std::pin::Pin<
        Box<dyn futures_util::Stream<Item = reqwest::Result<Bytes>> + Send>,
    >,
    pub buffer: String,
}

impl StreamReader {
    pub fn new(response: reqwest::Response) -> Self {
        Self {
            stream: Box::pin(response.bytes_stream()),
            buffer: String::new(),
        }
    }

    /// Reads until the buffer contains `needle`; panics after `wait`.
    pub async fn read_until(&mut self, needle: &str, wait: Duration) -> &str {
        let deadline = Instant::now() + wait;
        while !self.buffer.contains(needle) {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .unwrap_or_else(|| panic!("timed out waiting for {needle:?} in {:?}", self.buffer));
            let chunk = tokio::time::timeout(remaining, self.stream.next())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {needle:?} in {:?}", self.buffer))
                .expect("stream ended")
                .expect("stream error");
            self.buffer
                .push_str(std::str::from_utf8(&chunk).expect("utf8 chunk"));
        }
        &self.buffer
    }
}

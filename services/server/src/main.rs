// Server binary: config, broker, listeners, graceful shutdown.
use anyhow::{Context, Result};
use beacon_broker::Broker;
use beacon_cache::{FileCache, MemCache, MessageCache, NopCache, SqliteCache};
use server::app::{self, AppState};
use server::config::ServerConfig;
use server::listener::TlsListener;
use server::observability;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_logging();
    let config = ServerConfig::from_env_or_yaml()?;

    let cache = build_cache(&config)?;
    let file_cache = match &config.attachment_cache_dir {
        Some(dir) => Some(Arc::new(
            FileCache::new(
                dir.clone(),
                config.attachment_total_size_limit,
                config.attachment_file_size_limit,
            )
            .await
            .context("open attachment cache")?,
        )),
        None => None,
    };

    let broker = Arc::new(
        Broker::new(config.broker_config(), cache, file_cache)
            .await
            .context("start broker")?,
    );
    broker.start();

    let state = AppState {
        broker: Arc::clone(&broker),
        config: Arc::new(config.clone()),
    };
    let router = app::build_router(state);
    let shutdown = broker.shutdown_token();

    {
        let broker = Arc::clone(&broker);
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
            broker.shutdown();
        });
    }

    let mut servers = tokio::task::JoinSet::new();
    if let Some(addr) = config.listen_http {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind http listener: {addr}"))?;
        tracing::info!(addr = %addr, "http listener started");
        let app = router.clone();
        let token = shutdown.clone();
        servers.spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(token.cancelled_owned())
            .await
        });
    }
    if let Some(addr) = config.listen_https {
        let (cert_file, key_file) = match (&config.cert_file, &config.key_file) {
            (Some(cert), Some(key)) => (cert.clone(), key.clone()),
            _ => anyhow::bail!("listen-https requires cert-file and key-file"),
        };
        let listener = TlsListener::bind(addr, &cert_file, &key_file).await?;
        tracing::info!(addr = %addr, "https listener started");
        let app = router.clone();
        let token = shutdown.clone();
        servers.spawn(async move {
            axum::serve(
                axum::serve::ListenerExt::tap_io(listener, |_io| {}),
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(token.cancelled_owned())
            .await
        });
    }
    if let Some(path) = &config.listen_unix {
        // A previous run may have left the socket file behind.
        let _ = std::fs::remove_file(path);
        let listener = tokio::net::UnixListener::bind(path)
            .with_context(|| format!("bind unix listener: {}", path.display()))?;
        tracing::info!(path = %path.display(), "unix listener started");
        let app = router.clone();
        let token = shutdown.clone();
        servers.spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(token.cancelled_owned())
                .await
        });
    }
    anyhow::ensure!(!servers.is_empty(), "no listeners configured");

    if let Some(addr) = config.metrics_bind {
        let handle = observability::install_metrics_recorder();
        let token = shutdown.clone();
        tracing::info!(addr = %addr, "metrics listener started");
        servers.spawn(async move {
            observability::serve_metrics(handle, addr, token.cancelled_owned()).await
        });
    }

    while let Some(result) = servers.join_next().await {
        result.context("listener task panicked")??;
    }
    tracing::info!("server stopped");
    Ok(())
}

fn build_cache(config: &ServerConfig) -> Result<Arc<dyn MessageCache>> {
    if config.cache_duration.is_zero() {
        return Ok(Arc::new(NopCache::new()));
    }
    if let Some(path) = &config.cache_file {
        let cache = SqliteCache::open(path)
            .with_context(|| format!("open cache-file: {}", path.display()))?;
        return Ok(Arc::new(cache));
    }
    Ok(Arc::new(MemCache::new()))
}

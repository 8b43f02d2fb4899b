// WebSocket subscriber: JSON messages out, only PONGs expected in.
use crate::api::error::ApiError;
use crate::api::params::Params;
use crate::api::subscribe::{SubscribeRequest, SubscriptionGuard};
use crate::app::AppState;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use beacon_broker::Visitor;
use beacon_wire::Message;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

const WS_WRITE_WAIT: Duration = Duration::from_secs(2);
// Only PINGs/PONGs are ever expected from the client.
const WS_READ_LIMIT: usize = 64;
const WS_PONG_WAIT: Duration = Duration::from_secs(15);

pub async fn handle_ws(
    state: AppState,
    topics_str: String,
    params: Params,
    visitor: Arc<Visitor>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let guard = SubscriptionGuard::acquire(Arc::clone(&visitor))?;
    let req = SubscribeRequest::parse(&state, &topics_str, &params)?;
    Ok(ws
        .max_message_size(WS_READ_LIMIT)
        .on_upgrade(move |socket| run_socket(state, req, visitor, guard, socket)))
}

fn encode(m: &Message) -> anyhow::Result<String> {
    Ok(serde_json::to_string(m)?)
}

async fn run_socket(
    state: AppState,
    req: SubscribeRequest,
    visitor: Arc<Visitor>,
    mut guard: SubscriptionGuard,
    socket: WebSocket,
) {
    let (mut sink, reader) = socket.split();

    if req.poll {
        let _ = send_replay(&state, &req, &mut sink).await;
        let _ = sink.close().await;
        return;
    }

    let (tx, rx) = mpsc::unbounded_channel::<String>();
    if let Ok(open) = encode(&Message::open(&req.topics_str)) {
        let _ = tx.send(open);
    }
    for topic in &req.topics {
        let tx = tx.clone();
        let filters = req.filters.clone();
        let id = topic.subscribe(Box::new(move |m| {
            if !filters.passes(m) {
                return Ok(());
            }
            tx.send(encode(m)?)
                .map_err(|_| anyhow::anyhow!("subscriber disconnected"))?;
            Ok(())
        }));
        guard.track(Arc::clone(topic), id);
    }
    if let Err(err) = queue_replay(&state, &req, &tx).await {
        tracing::debug!(error = ?err.message, "websocket replay failed");
        return;
    }
    drop(tx);

    let keepalive = state.config.keepalive_interval;
    let shutdown = state.broker.shutdown_token();
    tokio::select! {
        _ = write_loop(sink, rx, visitor, keepalive, shutdown) => {}
        _ = read_loop(reader, keepalive) => {}
    }
}

async fn send_replay(
    state: &AppState,
    req: &SubscribeRequest,
    sink: &mut SplitSink<WebSocket, WsMessage>,
) -> anyhow::Result<()> {
    for topic in &req.topics {
        let messages = state
            .broker
            .cache()
            .messages(topic.name(), req.since, req.scheduled)
            .await?;
        for m in messages {
            if !req.filters.passes(&m) {
                continue;
            }
            sink.send(WsMessage::Text(encode(&m)?.into())).await?;
        }
    }
    Ok(())
}

async fn queue_replay(
    state: &AppState,
    req: &SubscribeRequest,
    tx: &mpsc::UnboundedSender<String>,
) -> Result<(), ApiError> {
    for topic in &req.topics {
        let messages = state
            .broker
            .cache()
            .messages(topic.name(), req.since, req.scheduled)
            .await
            .map_err(|_| crate::api::error::internal())?;
        for m in messages {
            if !req.filters.passes(&m) {
                continue;
            }
            if let Ok(frame) = encode(&m) {
                let _ = tx.send(frame);
            }
        }
    }
    Ok(())
}

/// Single writer for the socket: queued messages plus periodic PINGs, every
/// write under a deadline.
async fn write_loop(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::UnboundedReceiver<String>,
    visitor: Arc<Visitor>,
    keepalive: Duration,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            frame = rx.recv() => {
                let Some(frame) = frame else { return };
                match timeout(WS_WRITE_WAIT, sink.send(WsMessage::Text(frame.into()))).await {
                    Ok(Ok(())) => {}
                    _ => return,
                }
            }
            _ = tokio::time::sleep(keepalive) => {
                visitor.keepalive();
                match timeout(WS_WRITE_WAIT, sink.send(WsMessage::Ping(Bytes::new()))).await {
                    Ok(Ok(())) => {}
                    _ => return,
                }
            }
        }
    }
}

/// Discards client frames; only PONGs matter, each one extending the read
/// deadline.
async fn read_loop(mut reader: SplitStream<WebSocket>, keepalive: Duration) {
    let pong_wait = keepalive + WS_PONG_WAIT;
    let mut deadline = Instant::now() + pong_wait;
    loop {
        match timeout_at(deadline, reader.next()).await {
            Err(_) => return,
            Ok(None) => return,
            Ok(Some(Err(_))) => return,
            Ok(Some(Ok(WsMessage::Pong(_)))) => {
                deadline = Instant::now() + pong_wait;
            }
            Ok(Some(Ok(WsMessage::Close(_)))) => return,
            Ok(Some(Ok(_))) => {}
        }
    }
}

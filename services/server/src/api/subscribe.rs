// Streaming subscribers for the JSON, SSE and raw formats, plus the
// short-poll path.
use crate::api::error::{self, ApiError};
use crate::api::params::{Params, QueryFilters};
use crate::app::AppState;
use axum::body::Body;
use axum::http::header;
use axum::response::Response;
use beacon_broker::{Topic, Visitor};
use beacon_wire::{
    json_line, now_unix, parse_since, raw_line, split_no_empty, sse_frame, Message, Since,
};
use bytes::Bytes;
use futures_util::stream;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Json,
    Sse,
    Raw,
}

impl Encoding {
    pub fn content_type(self) -> &'static str {
        match self {
            Encoding::Json => "application/x-ndjson; charset=utf-8",
            Encoding::Sse => "text/event-stream; charset=utf-8",
            Encoding::Raw => "text/plain; charset=utf-8",
        }
    }

    pub fn encode(self, m: &Message) -> serde_json::Result<Bytes> {
        Ok(match self {
            Encoding::Json => json_line(m)?.into(),
            Encoding::Sse => sse_frame(m)?.into(),
            Encoding::Raw => raw_line(m).into(),
        })
    }
}

/// Parsed subscribe inputs shared by the streaming formats and WebSocket.
pub struct SubscribeRequest {
    pub topics: Vec<Arc<Topic>>,
    pub topics_str: String,
    pub poll: bool,
    pub scheduled: bool,
    pub since: Since,
    pub filters: QueryFilters,
}

impl SubscribeRequest {
    pub fn parse(state: &AppState, topics_str: &str, params: &Params) -> Result<Self, ApiError> {
        let names = split_no_empty(topics_str, ',');
        if names.is_empty() {
            return Err(error::topic_invalid());
        }
        let topics = state.broker.topics_for(&names)?;
        let poll = params.flag(&["x-poll", "poll", "po"]);
        let scheduled = params.flag(&["x-scheduled", "scheduled", "sched"]);
        let since = parse_since(&params.read(&["x-since", "since", "si"]), poll, now_unix())
            .map_err(|_| error::since_invalid())?;
        let filters = QueryFilters::parse(params)?;
        Ok(Self {
            topics,
            topics_str: topics_str.to_string(),
            poll,
            scheduled,
            since,
            filters,
        })
    }
}

/// Holds one slot of the visitor's subscription quota and the topic
/// registrations; dropping it unwinds both, however the connection ends.
pub struct SubscriptionGuard {
    visitor: Arc<Visitor>,
    subscriptions: Vec<(Arc<Topic>, u64)>,
}

impl SubscriptionGuard {
    pub fn acquire(visitor: Arc<Visitor>) -> Result<Self, ApiError> {
        visitor
            .subscription_allowed()
            .map_err(|_| error::limit_subscriptions())?;
        Ok(Self {
            visitor,
            subscriptions: Vec::new(),
        })
    }

    pub fn track(&mut self, topic: Arc<Topic>, id: u64) {
        self.subscriptions.push((topic, id));
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        for (topic, id) in &self.subscriptions {
            topic.unsubscribe(*id);
        }
        self.visitor.remove_subscription();
    }
}

/// Replays cached messages for every topic of the request, encoded and
/// filtered, as one byte buffer.
pub async fn replay(
    state: &AppState,
    req: &SubscribeRequest,
    encoding: Encoding,
) -> Result<Vec<u8>, ApiError> {
    let mut out = Vec::new();
    for topic in &req.topics {
        let messages = state
            .broker
            .cache()
            .messages(topic.name(), req.since, req.scheduled)
            .await
            .map_err(|_| error::internal())?;
        for m in messages {
            if !req.filters.passes(&m) {
                continue;
            }
            out.extend_from_slice(&encoding.encode(&m).map_err(|_| error::internal())?);
        }
    }
    Ok(out)
}

pub async fn handle_subscribe(
    state: AppState,
    topics_str: String,
    params: Params,
    visitor: Arc<Visitor>,
    encoding: Encoding,
) -> Result<Response, ApiError> {
    let mut guard = SubscriptionGuard::acquire(Arc::clone(&visitor))?;
    let req = SubscribeRequest::parse(&state, &topics_str, &params)?;

    if req.poll {
        let body = replay(&state, &req, encoding).await?;
        return Response::builder()
            .header(header::CONTENT_TYPE, encoding.content_type())
            .body(Body::from(body))
            .map_err(|_| error::internal());
    }

    let (tx, rx) = mpsc::unbounded_channel::<Bytes>();

    // The open event goes out before anything else on this connection.
    let open = encoding
        .encode(&Message::open(&req.topics_str))
        .map_err(|_| error::internal())?;
    let _ = tx.send(open);

    for topic in &req.topics {
        let tx = tx.clone();
        let filters = req.filters.clone();
        let id = topic.subscribe(Box::new(move |m| {
            if !filters.passes(m) {
                return Ok(());
            }
            let frame = encoding.encode(m)?;
            tx.send(frame)
                .map_err(|_| anyhow::anyhow!("subscriber disconnected"))?;
            Ok(())
        }));
        guard.track(Arc::clone(topic), id);
    }

    let backlog = replay(&state, &req, encoding).await?;
    if !backlog.is_empty() {
        let _ = tx.send(backlog.into());
    }

    spawn_keepalive(&state, &req.topics_str, Arc::clone(&visitor), encoding, tx);

    let shutdown = state.broker.shutdown_token();
    let body = stream::unfold((rx, guard, shutdown), |(mut rx, guard, shutdown)| async move {
        tokio::select! {
            _ = shutdown.cancelled() => None,
            chunk = rx.recv() => {
                chunk.map(|chunk| (Ok::<_, Infallible>(chunk), (rx, guard, shutdown)))
            }
        }
    });

    Response::builder()
        .header(header::CONTENT_TYPE, encoding.content_type())
        .body(Body::from_stream(body))
        .map_err(|_| error::internal())
}

/// Periodic keepalive frames; also what refreshes visitor liveness for
/// long-lived connections. Ends when the connection or the broker goes
/// away.
fn spawn_keepalive(
    state: &AppState,
    topics_str: &str,
    visitor: Arc<Visitor>,
    encoding: Encoding,
    tx: mpsc::UnboundedSender<Bytes>,
) {
    let interval = state.config.keepalive_interval;
    let shutdown = state.broker.shutdown_token();
    let topics_str = topics_str.to_string();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(interval) => {
                    visitor.keepalive();
                    let Ok(frame) = encoding.encode(&Message::keepalive(&topics_str)) else {
                        return;
                    };
                    if tx.send(frame).is_err() {
                        return;
                    }
                }
            }
        }
    });
}

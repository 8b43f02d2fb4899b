//! HTTP application wiring.
//!
//! # Purpose
//! Builds the axum router, configures middleware, and defines the shared
//! application state injected into handlers. Route shape:
//!
//! | Method | Path | Meaning |
//! |---|---|---|
//! | GET/HEAD | `/` | Web UI home. |
//! | GET | `/<topic>` | UI, or UnifiedPush discovery with `up=1`. |
//! | PUT/POST | `/<topic>` | Publish. |
//! | GET | `/<topics>/{json,sse,raw,ws}` | Subscribe in the named format. |
//! | GET | `/<topic>/{publish,send,trigger}` | Publish via GET. |
//! | GET | `/file/<id>` | Attachment download. |
use crate::api::error::{self, ApiError};
use crate::api::params::{visitor_ip, ClientAddr, Params};
use crate::api::subscribe::Encoding;
use crate::api::{file, pages, publish, subscribe, ws};
use crate::config::ServerConfig;
use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Path, Query, Request, State};
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use beacon_broker::{Broker, Visitor};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri()
            )
        });
    // Open for business: every response carries the permissive CORS headers.
    let cors_layer = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::PUT, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/", get(pages::home))
        .route("/example.html", get(pages::example))
        .route("/file/{file}", get(file::download))
        .route(
            "/{topic}",
            get(pages::topic_page)
                .put(publish_topic)
                .post(publish_topic)
                .fallback(not_found),
        )
        .route("/{topics}/{format}", get(topic_format).fallback(not_found))
        .fallback(not_found)
        .layer(cors_layer)
        .layer(trace_layer)
        .with_state(state)
}

async fn not_found() -> ApiError {
    error::not_found()
}

fn resolve_visitor(state: &AppState, params: &Params, addr: &ClientAddr) -> Arc<Visitor> {
    state
        .broker
        .visitor(&visitor_ip(params, addr.0, state.config.behind_proxy))
}

async fn publish_topic(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    addr: ClientAddr,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    let params = Params::new(headers, query);
    let visitor = resolve_visitor(&state, &params, &addr);
    visitor
        .request_allowed()
        .map_err(|_| error::limit_requests())?;
    publish::handle_publish(state, topic, params, visitor, body).await
}

/// Dispatches `GET /<topics>/<format>` to the matching subscribe or publish
/// handler.
async fn topic_format(
    State(state): State<AppState>,
    Path((topics, format)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    addr: ClientAddr,
    headers: HeaderMap,
    request: Request,
) -> Result<Response, ApiError> {
    let params = Params::new(headers, query);
    let visitor = resolve_visitor(&state, &params, &addr);
    visitor
        .request_allowed()
        .map_err(|_| error::limit_requests())?;
    match format.as_str() {
        "json" => subscribe::handle_subscribe(state, topics, params, visitor, Encoding::Json).await,
        "sse" => subscribe::handle_subscribe(state, topics, params, visitor, Encoding::Sse).await,
        "raw" => subscribe::handle_subscribe(state, topics, params, visitor, Encoding::Raw).await,
        "ws" => {
            let (mut parts, _body) = request.into_parts();
            let upgrade = WebSocketUpgrade::from_request_parts(&mut parts, &state)
                .await
                .map_err(|_| error::not_found())?;
            ws::handle_ws(state, topics, params, visitor, upgrade).await
        }
        "publish" | "send" | "trigger" => {
            publish::handle_publish(state, topics, params, visitor, request.into_body()).await
        }
        _ => Err(error::not_found()),
    }
}

// Embedded web pages: the index with a topic hint, the example page, and
// the UnifiedPush discovery response.
use crate::api::error::{self, ApiError};
use crate::api::params::Params;
use crate::app::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{Html, IntoResponse, Response};
use beacon_broker::{valid_topic_name, DISALLOWED_TOPICS};
use std::collections::HashMap;

const INDEX_SOURCE: &str = include_str!("../../assets/index.html");
const EXAMPLE_SOURCE: &str = include_str!("../../assets/example.html");

fn render_index(state: &AppState, topic: &str) -> Html<String> {
    let base = state
        .config
        .base_url
        .clone()
        .unwrap_or_else(|| "https://beacon.example.com".to_string());
    let hint = if topic.is_empty() {
        format!("{base}/mytopic")
    } else {
        format!("{base}/{topic}")
    };
    Html(INDEX_SOURCE.replace("{{topic}}", &hint))
}

pub async fn home(State(state): State<AppState>) -> Html<String> {
    render_index(&state, "")
}

pub async fn example() -> Html<&'static str> {
    Html(EXAMPLE_SOURCE)
}

/// `GET /<topic>`: UnifiedPush discovery when `up=1`, the web page
/// otherwise.
pub async fn topic_page(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if !valid_topic_name(&topic) || DISALLOWED_TOPICS.contains(&topic.as_str()) {
        return Err(error::not_found());
    }
    let params = Params::new(headers, query);
    if params.flag(&["x-unifiedpush", "unifiedpush", "up"]) {
        return Ok((
            [(header::CONTENT_TYPE, "application/json")],
            "{\"unifiedpush\":{\"version\":1}}\n",
        )
            .into_response());
    }
    Ok(render_index(&state, &topic).into_response())
}

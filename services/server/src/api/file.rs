// Attachment downloads with a pre-flight bandwidth check.
use crate::api::error::{self, ApiError};
use crate::api::params::{visitor_ip, ClientAddr, Params};
use crate::app::AppState;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::Response;
use beacon_limits::Limiter;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use tokio_util::io::ReaderStream;

static FILE_ID_REGEX: OnceLock<Regex> = OnceLock::new();

fn file_id_regex() -> &'static Regex {
    FILE_ID_REGEX.get_or_init(|| {
        Regex::new(r"^([-_A-Za-z0-9]{1,64})(?:\.[A-Za-z0-9]{1,16})?$").expect("file id regex")
    })
}

pub async fn download(
    State(state): State<AppState>,
    Path(file): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    addr: ClientAddr,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let params = Params::new(headers, query);
    let visitor = state
        .broker
        .visitor(&visitor_ip(&params, addr.0, state.config.behind_proxy));
    visitor.request_allowed().map_err(|_| error::limit_requests())?;

    let Some(file_cache) = state.broker.file_cache() else {
        return Err(error::not_found());
    };
    let captures = file_id_regex().captures(&file).ok_or_else(error::not_found)?;
    let id = captures
        .get(1)
        .map(|m| m.as_str())
        .ok_or_else(error::internal_invalid_file_path)?;

    let path = file_cache.path(id);
    let meta = tokio::fs::metadata(&path)
        .await
        .map_err(|_| error::not_found())?;
    visitor
        .bandwidth_limiter()
        .allow_n(meta.len() as i64)
        .map_err(|_| error::limit_attachment_bandwidth())?;

    let handle = tokio::fs::File::open(&path)
        .await
        .map_err(|_| error::internal())?;
    Response::builder()
        .header(header::CONTENT_TYPE, beacon_cache::type_for_path(&file))
        .header(header::CONTENT_LENGTH, meta.len())
        .body(Body::from_stream(ReaderStream::new(handle)))
        .map_err(|_| error::internal())
}

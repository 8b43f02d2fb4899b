// Name-agnostic parameter reading: every logical parameter is accepted
// under several header aliases and a lowercase query key.
use crate::api::error::{self, ApiError};
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use beacon_wire::{parse_priority, split_no_empty, Event, Message};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;

/// Peer address of the connection, when the listener provides one. Unix
/// socket connections have none.
pub struct ClientAddr(pub Option<SocketAddr>);

impl<S: Send + Sync> FromRequestParts<S> for ClientAddr {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Infallible> {
        Ok(Self(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0),
        ))
    }
}

/// Headers plus query string of one request, resolved through the alias
/// table. The first non-empty value wins: headers in alias order, then the
/// lowercase query form.
pub struct Params {
    headers: HeaderMap,
    query: HashMap<String, String>,
}

impl Params {
    pub fn new(headers: HeaderMap, query: HashMap<String, String>) -> Self {
        Self { headers, query }
    }

    pub fn read(&self, names: &[&str]) -> String {
        for name in names {
            if let Some(value) = self.headers.get(*name).and_then(|v| v.to_str().ok()) {
                if !value.trim().is_empty() {
                    return value.trim().to_string();
                }
            }
        }
        for name in names {
            if let Some(value) = self.query.get(&name.to_lowercase()) {
                if !value.trim().is_empty() {
                    return value.trim().to_string();
                }
            }
        }
        String::new()
    }

    pub fn flag(&self, names: &[&str]) -> bool {
        self.read(names) == "1"
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Resolves the visitor identity: the forwarded address when configured as
/// behind a proxy, the peer address otherwise.
pub fn visitor_ip(params: &Params, connect: Option<SocketAddr>, behind_proxy: bool) -> String {
    if behind_proxy {
        if let Some(forwarded) = params.header("x-forwarded-for") {
            let forwarded = forwarded.trim();
            if !forwarded.is_empty() {
                return forwarded.to_string();
            }
        }
    }
    connect
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Subscriber-side filters. They apply to `message` events only; `open` and
/// `keepalive` always pass.
#[derive(Debug, Clone, Default)]
pub struct QueryFilters {
    message: String,
    title: String,
    priority: Vec<u8>,
    tags: Vec<String>,
}

impl QueryFilters {
    pub fn parse(params: &Params) -> Result<Self, ApiError> {
        let mut priority = Vec::new();
        for p in split_no_empty(&params.read(&["x-priority", "priority", "prio", "p"]), ',') {
            priority.push(parse_priority(&p).map_err(|_| error::priority_invalid())?);
        }
        Ok(Self {
            message: params.read(&["x-message", "message", "m"]),
            title: params.read(&["x-title", "title", "t"]),
            priority,
            tags: split_no_empty(&params.read(&["x-tags", "tags", "tag", "ta"]), ','),
        })
    }

    pub fn passes(&self, m: &Message) -> bool {
        if m.event != Event::Message {
            return true;
        }
        if !self.message.is_empty() && m.message != self.message {
            return false;
        }
        if !self.title.is_empty() && m.title != self.title {
            return false;
        }
        if !self.priority.is_empty() && !self.priority.contains(&m.effective_priority()) {
            return false;
        }
        // Every filter tag must be present on the message.
        if !self.tags.is_empty() && !self.tags.iter().all(|t| m.tags.contains(t)) {
            return false;
        }
        true
    }
}

// Message envelope and wire helpers shared by the broker and the HTTP surface.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

mod encode;
mod parse;

pub use encode::{json_line, raw_line, sse_frame};
pub use parse::{
    parse_duration, parse_future_time, parse_priority, parse_since, split_no_empty, ParseError,
    Since,
};

/// Length of generated message ids.
const MESSAGE_ID_LENGTH: usize = 12;

const ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Default priority assumed when a message carries none (0).
pub const DEFAULT_PRIORITY: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    Open,
    Keepalive,
    Message,
    PollRequest,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Open => write!(f, "open"),
            Event::Keepalive => write!(f, "keepalive"),
            Event::Message => write!(f, "message"),
            Event::PollRequest => write!(f, "poll_request"),
        }
    }
}

/// Attachment metadata carried inside a message.
///
/// `owner` is accounting-only (the uploader's IP) and never leaves the
/// server, hence the serde skip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub size: u64,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub expires: i64,
    pub url: String,
    #[serde(skip)]
    pub owner: String,
}

/// One publish event, immutable once constructed by the publish pipeline.
///
/// ```
/// use beacon_wire::{Event, Message};
///
/// let m = Message::new("alerts", "disk full");
/// assert_eq!(m.event, Event::Message);
/// assert_eq!(m.topic, "alerts");
/// assert_eq!(m.id.len(), 12);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub time: i64,
    pub event: Event,
    pub topic: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "is_zero_u8")]
    pub priority: u8,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub click: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

impl Message {
    /// A regular `message` event stamped with the current time and a fresh id.
    pub fn new(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_event(Event::Message, topic, message)
    }

    /// The zero-payload event emitted when a streaming subscription starts.
    pub fn open(topic: impl Into<String>) -> Self {
        Self::with_event(Event::Open, topic, "")
    }

    /// The periodic event that keeps proxies and clients from timing out.
    pub fn keepalive(topic: impl Into<String>) -> Self {
        Self::with_event(Event::Keepalive, topic, "")
    }

    fn with_event(event: Event, topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: random_id(),
            time: now_unix(),
            event,
            topic: topic.into(),
            message: message.into(),
            title: String::new(),
            tags: Vec::new(),
            priority: 0,
            click: String::new(),
            attachment: None,
        }
    }

    /// Priority as used for filtering: unset (0) counts as the default (3).
    pub fn effective_priority(&self) -> u8 {
        if self.priority == 0 {
            DEFAULT_PRIORITY
        } else {
            self.priority
        }
    }
}

/// Random id over `[A-Za-z0-9]`, 12 characters.
pub fn random_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..MESSAGE_ID_LENGTH)
        .map(|_| ID_CHARSET[rng.gen_range(0..ID_CHARSET.len())] as char)
        .collect()
}

/// Wall-clock seconds since the unix epoch.
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn is_zero_u8(v: &u8) -> bool {
    *v == 0
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

// Message cache backends and the attachment file cache.
//
// The `MessageCache` trait is the replay/scheduling contract; the no-op,
// in-memory, and SQLite backends are interchangeable behind it and are
// driven by one shared contract test suite.
use async_trait::async_trait;
use beacon_wire::{Message, Since};

mod file;
mod mem;
mod nop;
mod sniff;
mod sqlite;

pub use file::FileCache;
pub use mem::MemCache;
pub use nop::NopCache;
pub use sniff::{detect_content_type, type_for_path};
pub use sqlite::SqliteCache;

pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("limit reached")]
    LimitReached,
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<beacon_limits::LimitReached> for CacheError {
    fn from(_: beacon_limits::LimitReached) -> Self {
        CacheError::LimitReached
    }
}

/// Store of recent messages for replay plus the scheduled-delivery queue.
///
/// Entries carry a `published` flag: `true` once the message has been handed
/// to the live fan-out, `false` while a scheduled message waits for its
/// delivery time. Backends are internally synchronized.
#[async_trait]
pub trait MessageCache: Send + Sync {
    /// Stores a message. A message whose time is in the future is recorded
    /// as scheduled (`published = false`).
    async fn add_message(&self, m: &Message) -> Result<()>;

    /// Messages for one topic in non-decreasing time order (ties keep
    /// insertion order). Scheduled entries are excluded unless
    /// `include_scheduled` is set.
    async fn messages(
        &self,
        topic: &str,
        since: Since,
        include_scheduled: bool,
    ) -> Result<Vec<Message>>;

    /// Scheduled messages whose delivery time has arrived, oldest first.
    async fn messages_due(&self) -> Result<Vec<Message>>;

    /// Flips a scheduled message to published. Idempotent.
    async fn mark_published(&self, id: &str) -> Result<()>;

    /// Number of cached entries (scheduled included) for a topic.
    async fn message_count(&self, topic: &str) -> Result<usize>;

    /// Names of all topics with at least one cached entry; used to restore
    /// the topic registry on startup.
    async fn topics(&self) -> Result<Vec<String>>;

    /// Total bytes of unexpired attachments owned by one uploader.
    async fn attachments_size(&self, owner: &str) -> Result<u64>;

    /// Ids of messages whose attachment has expired.
    async fn attachments_expired(&self) -> Result<Vec<String>>;

    /// Drops published entries older than `before`. Scheduled entries are
    /// exempt until delivered.
    async fn prune(&self, before: i64) -> Result<()>;
}

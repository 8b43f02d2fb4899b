// Durable backend: one SQLite file, messages keyed by id and indexed for
// the replay and scheduler queries.
use crate::{MessageCache, Result};
use async_trait::async_trait;
use beacon_wire::{now_unix, split_no_empty, Attachment, Message, Since};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::Mutex;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    time INT NOT NULL,
    topic TEXT NOT NULL,
    event TEXT NOT NULL,
    message TEXT NOT NULL,
    title TEXT NOT NULL,
    priority INT NOT NULL,
    tags TEXT NOT NULL,
    click TEXT NOT NULL,
    attachment_name TEXT NOT NULL,
    attachment_type TEXT NOT NULL,
    attachment_size INT NOT NULL,
    attachment_expires INT NOT NULL,
    attachment_url TEXT NOT NULL,
    attachment_owner TEXT NOT NULL,
    published INT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_topic_time_published ON messages (topic, time, published);
";

const SELECT_COLUMNS: &str = "id, time, topic, message, title, priority, tags, click, \
     attachment_name, attachment_type, attachment_size, attachment_expires, \
     attachment_url, attachment_owner";

/// Single-file durable message cache.
pub struct SqliteCache {
    conn: Mutex<Connection>,
}

impl SqliteCache {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    let tags: String = row.get("tags")?;
    let attachment_name: String = row.get("attachment_name")?;
    let attachment_url: String = row.get("attachment_url")?;
    let attachment = if attachment_name.is_empty() && attachment_url.is_empty() {
        None
    } else {
        Some(Attachment {
            name: attachment_name,
            content_type: row.get("attachment_type")?,
            size: row.get::<_, i64>("attachment_size")? as u64,
            expires: row.get("attachment_expires")?,
            url: attachment_url,
            owner: row.get("attachment_owner")?,
        })
    };
    Ok(Message {
        id: row.get("id")?,
        time: row.get("time")?,
        event: beacon_wire::Event::Message,
        topic: row.get("topic")?,
        message: row.get("message")?,
        title: row.get("title")?,
        tags: split_no_empty(&tags, ','),
        priority: row.get::<_, i64>("priority")? as u8,
        click: row.get("click")?,
        attachment,
    })
}

#[async_trait]
impl MessageCache for SqliteCache {
    async fn add_message(&self, m: &Message) -> Result<()> {
        let published = m.time <= now_unix();
        let attachment = m.attachment.clone().unwrap_or_default();
        let conn = self.conn.lock().expect("cache lock");
        conn.execute(
            "INSERT INTO messages (id, time, topic, event, message, title, priority, tags, click, \
             attachment_name, attachment_type, attachment_size, attachment_expires, \
             attachment_url, attachment_owner, published) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                m.id,
                m.time,
                m.topic,
                m.event.to_string(),
                m.message,
                m.title,
                m.priority as i64,
                m.tags.join(","),
                m.click,
                attachment.name,
                attachment.content_type,
                attachment.size as i64,
                attachment.expires,
                attachment.url,
                attachment.owner,
                published as i64,
            ],
        )?;
        Ok(())
    }

    async fn messages(
        &self,
        topic: &str,
        since: Since,
        include_scheduled: bool,
    ) -> Result<Vec<Message>> {
        let since_time = match since {
            Since::None => return Ok(Vec::new()),
            Since::All => 0,
            Since::Time(t) => t,
        };
        let conn = self.conn.lock().expect("cache lock");
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM messages \
             WHERE topic = ?1 AND time >= ?2 AND (published = 1 OR ?3) \
             ORDER BY time, rowid"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![topic, since_time, include_scheduled], row_to_message)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn messages_due(&self) -> Result<Vec<Message>> {
        let conn = self.conn.lock().expect("cache lock");
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM messages \
             WHERE published = 0 AND time <= ?1 ORDER BY time, rowid"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![now_unix()], row_to_message)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn mark_published(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().expect("cache lock");
        conn.execute("UPDATE messages SET published = 1 WHERE id = ?1", params![id])?;
        Ok(())
    }

    async fn message_count(&self, topic: &str) -> Result<usize> {
        let conn = self.conn.lock().expect("cache lock");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE topic = ?1",
            params![topic],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    async fn topics(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().expect("cache lock");
        let mut stmt = conn.prepare("SELECT DISTINCT topic FROM messages")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn attachments_size(&self, owner: &str) -> Result<u64> {
        let conn = self.conn.lock().expect("cache lock");
        let size: i64 = conn.query_row(
            "SELECT COALESCE(SUM(attachment_size), 0) FROM messages \
             WHERE attachment_owner = ?1 AND attachment_expires > ?2",
            params![owner, now_unix()],
            |row| row.get(0),
        )?;
        Ok(size as u64)
    }

    async fn attachments_expired(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().expect("cache lock");
        let mut stmt = conn.prepare(
            "SELECT id FROM messages \
             WHERE attachment_expires > 0 AND attachment_expires < ?1",
        )?;
        let rows = stmt.query_map(params![now_unix()], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn prune(&self, before: i64) -> Result<()> {
        let conn = self.conn.lock().expect("cache lock");
        conn.execute(
            "DELETE FROM messages WHERE time < ?1 AND published = 1",
            params![before],
        )?;
        Ok(())
    }
}

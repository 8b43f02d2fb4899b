// In-memory backend: per-topic entry vectors behind one mutex.
use crate::{MessageCache, Result};
use async_trait::async_trait;
use beacon_wire::{now_unix, Message, Since};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct Entry {
    message: Message,
    published: bool,
}

/// Volatile message cache. State is lost on restart; replay and scheduled
/// delivery otherwise behave exactly like the SQLite backend.
#[derive(Debug, Default)]
pub struct MemCache {
    entries: Mutex<HashMap<String, Vec<Entry>>>,
}

impl MemCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageCache for MemCache {
    async fn add_message(&self, m: &Message) -> Result<()> {
        let published = m.time <= now_unix();
        let mut entries = self.entries.lock().expect("cache lock");
        entries.entry(m.topic.clone()).or_default().push(Entry {
            message: m.clone(),
            published,
        });
        Ok(())
    }

    async fn messages(
        &self,
        topic: &str,
        since: Since,
        include_scheduled: bool,
    ) -> Result<Vec<Message>> {
        if since == Since::None {
            return Ok(Vec::new());
        }
        let entries = self.entries.lock().expect("cache lock");
        let mut messages: Vec<Message> = entries
            .get(topic)
            .map(|list| {
                list.iter()
                    .filter(|e| e.published || include_scheduled)
                    .filter(|e| since.includes(e.message.time))
                    .map(|e| e.message.clone())
                    .collect()
            })
            .unwrap_or_default();
        // Stable sort keeps insertion order for equal timestamps.
        messages.sort_by_key(|m| m.time);
        Ok(messages)
    }

    async fn messages_due(&self) -> Result<Vec<Message>> {
        let now = now_unix();
        let entries = self.entries.lock().expect("cache lock");
        let mut due: Vec<Message> = entries
            .values()
            .flatten()
            .filter(|e| !e.published && e.message.time <= now)
            .map(|e| e.message.clone())
            .collect();
        due.sort_by_key(|m| m.time);
        Ok(due)
    }

    async fn mark_published(&self, id: &str) -> Result<()> {
        let mut entries = self.entries.lock().expect("cache lock");
        for list in entries.values_mut() {
            for entry in list.iter_mut() {
                if entry.message.id == id {
                    entry.published = true;
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    async fn message_count(&self, topic: &str) -> Result<usize> {
        let entries = self.entries.lock().expect("cache lock");
        Ok(entries.get(topic).map(Vec::len).unwrap_or(0))
    }

    async fn topics(&self) -> Result<Vec<String>> {
        let entries = self.entries.lock().expect("cache lock");
        Ok(entries
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn attachments_size(&self, owner: &str) -> Result<u64> {
        let now = now_unix();
        let entries = self.entries.lock().expect("cache lock");
        Ok(entries
            .values()
            .flatten()
            .filter_map(|e| e.message.attachment.as_ref())
            .filter(|a| a.owner == owner && a.expires > now)
            .map(|a| a.size)
            .sum())
    }

    async fn attachments_expired(&self) -> Result<Vec<String>> {
        let now = now_unix();
        let entries = self.entries.lock().expect("cache lock");
        Ok(entries
            .values()
            .flatten()
            .filter(|e| {
                e.message
                    .attachment
                    .as_ref()
                    .is_some_and(|a| a.expires > 0 && a.expires < now)
            })
            .map(|e| e.message.id.clone())
            .collect())
    }

    async fn prune(&self, before: i64) -> Result<()> {
        let mut entries = self.entries.lock().expect("cache lock");
        for list in entries.values_mut() {
            list.retain(|e| !e.published || e.message.time >= before);
        }
        entries.retain(|_, list| !list.is_empty());
        Ok(())
    }
}

// Backend used when caching is disabled: writes are accepted and dropped.
use crate::{MessageCache, Result};
use async_trait::async_trait;
use beacon_wire::{Message, Since};

#[derive(Debug, Default)]
pub struct NopCache;

impl NopCache {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MessageCache for NopCache {
    async fn add_message(&self, _m: &Message) -> Result<()> {
        Ok(())
    }

    async fn messages(
        &self,
        _topic: &str,
        _since: Since,
        _include_scheduled: bool,
    ) -> Result<Vec<Message>> {
        Ok(Vec::new())
    }

    async fn messages_due(&self) -> Result<Vec<Message>> {
        Ok(Vec::new())
    }

    async fn mark_published(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn message_count(&self, _topic: &str) -> Result<usize> {
        Ok(0)
    }

    async fn topics(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn attachments_size(&self, _owner: &str) -> Result<u64> {
        Ok(0)
    }

    async fn attachments_expired(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn prune(&self, _before: i64) -> Result<()> {
        Ok(())
    }
}

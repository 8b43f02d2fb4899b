// Contracts for the optional upstream collaborators. Implementations live
// outside this crate; tests install recording fakes.
use async_trait::async_trait;
use beacon_wire::Message;

/// Mobile-push upstream. Called on non-delayed publish unless the caller
/// opted out, and on delivery of scheduled messages.
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, m: &Message) -> anyhow::Result<()>;
}

/// Outbound mailer. Called on non-delayed publish when the `email`
/// parameter is set.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, sender_ip: &str, to: &str, m: &Message) -> anyhow::Result<()>;
}

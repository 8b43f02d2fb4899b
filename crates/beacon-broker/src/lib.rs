// Broker core: topic and visitor registries plus the background loops for
// pruning, scheduled delivery, and push keepalives.
use beacon_cache::{FileCache, MessageCache};
use beacon_wire::{now_unix, Message};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod hooks;
mod topic;
mod visitor;

pub use hooks::{Mailer, PushSender};
pub use topic::{SubscriberFn, Topic};
pub use visitor::{Visitor, VisitorLimits};

pub type Result<T> = std::result::Result<T, BrokerError>;

#[derive(thiserror::Error, Debug)]
pub enum BrokerError {
    #[error("invalid topic name: {0}")]
    InvalidTopic(String),
    #[error("topic name is disallowed: {0}")]
    TopicDisallowed(String),
    #[error("total topic limit reached")]
    TopicLimitReached,
    #[error(transparent)]
    Cache(#[from] beacon_cache::CacheError),
}

/// Reserved control topic used for push keepalives; never a real topic.
pub const CONTROL_TOPIC: &str = "~control";

/// Names that can never become topics because they are routed elsewhere.
pub const DISALLOWED_TOPICS: &[&str] = &["docs", "static", "file"];

pub fn valid_topic_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub visitor: VisitorLimits,
    pub total_topic_limit: usize,
    pub cache_duration: Duration,
    pub manager_interval: Duration,
    pub scheduler_interval: Duration,
    pub push_keepalive_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            visitor: VisitorLimits::default(),
            total_topic_limit: 15000,
            cache_duration: Duration::from_secs(12 * 3600),
            manager_interval: Duration::from_secs(60),
            scheduler_interval: Duration::from_secs(10),
            push_keepalive_interval: Duration::from_secs(3 * 3600),
        }
    }
}

/// Per-publish switches parsed from the request.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub cache: bool,
    pub push: bool,
    pub email: Option<String>,
    pub sender_ip: String,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            cache: true,
            push: true,
            email: None,
            sender_ip: String::new(),
        }
    }
}

/// The top-level broker object.
///
/// ```no_run
/// use beacon_broker::{Broker, BrokerConfig, PublishOptions};
/// use beacon_cache::MemCache;
/// use beacon_wire::Message;
/// use std::sync::Arc;
///
/// let rt = tokio::runtime::Runtime::new().expect("rt");
/// rt.block_on(async {
///     let broker = Arc::new(
///         Broker::new(BrokerConfig::default(), Arc::new(MemCache::new()), None)
///             .await
///             .expect("broker"),
///     );
///     broker.start();
///     let topic = broker.topic("alerts").expect("topic");
///     broker
///         .publish(&topic, &Message::new("alerts", "disk full"), &PublishOptions::default())
///         .await
///         .expect("publish");
/// });
/// ```
pub struct Broker {
    config: BrokerConfig,
    topics: Mutex<HashMap<String, Arc<Topic>>>,
    visitors: Mutex<HashMap<String, Arc<Visitor>>>,
    cache: Arc<dyn MessageCache>,
    file_cache: Option<Arc<FileCache>>,
    push: Option<Arc<dyn PushSender>>,
    mailer: Option<Arc<dyn Mailer>>,
    published: AtomicU64,
    shutdown: CancellationToken,
}

impl Broker {
    /// Builds a broker, restoring the topic registry from the cache so
    /// replay works across restarts.
    pub async fn new(
        config: BrokerConfig,
        cache: Arc<dyn MessageCache>,
        file_cache: Option<Arc<FileCache>>,
    ) -> Result<Self> {
        let mut topics = HashMap::new();
        for name in cache.topics().await? {
            topics.insert(name.clone(), Arc::new(Topic::new(name)));
        }
        Ok(Self {
            config,
            topics: Mutex::new(topics),
            visitors: Mutex::new(HashMap::new()),
            cache,
            file_cache,
            push: None,
            mailer: None,
            published: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn with_push(mut self, push: Arc<dyn PushSender>) -> Self {
        self.push = Some(push);
        self
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn MessageCache> {
        &self.cache
    }

    pub fn file_cache(&self) -> Option<&Arc<FileCache>> {
        self.file_cache.as_ref()
    }

    pub fn push_configured(&self) -> bool {
        self.push.is_some()
    }

    pub fn mailer_configured(&self) -> bool {
        self.mailer.is_some()
    }

    pub fn messages_published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Token observed by every background loop and the HTTP server.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Spawns the manager, scheduled-delivery, and push-keepalive loops.
    pub fn start(self: &Arc<Self>) {
        let broker = Arc::clone(self);
        tokio::spawn(async move { broker.run_manager().await });
        let broker = Arc::clone(self);
        tokio::spawn(async move { broker.run_scheduler().await });
        if self.push.is_some() {
            let broker = Arc::clone(self);
            tokio::spawn(async move { broker.run_push_keepalive().await });
        }
    }

    /// Looks up or creates every named topic, all-or-nothing.
    pub fn topics_for(&self, names: &[String]) -> Result<Vec<Arc<Topic>>> {
        let mut topics = self.topics.lock().expect("topics lock");
        let mut resolved = Vec::with_capacity(names.len());
        for name in names {
            if !valid_topic_name(name) {
                return Err(BrokerError::InvalidTopic(name.clone()));
            }
            if DISALLOWED_TOPICS.contains(&name.as_str()) {
                return Err(BrokerError::TopicDisallowed(name.clone()));
            }
            if !topics.contains_key(name) {
                if topics.len() >= self.config.total_topic_limit {
                    return Err(BrokerError::TopicLimitReached);
                }
                topics.insert(name.clone(), Arc::new(Topic::new(name.clone())));
            }
            resolved.push(Arc::clone(&topics[name]));
        }
        Ok(resolved)
    }

    pub fn topic(&self, name: &str) -> Result<Arc<Topic>> {
        let names = [name.to_string()];
        Ok(self.topics_for(&names)?.remove(0))
    }

    fn existing_topic(&self, name: &str) -> Option<Arc<Topic>> {
        self.topics.lock().expect("topics lock").get(name).cloned()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.lock().expect("topics lock").len()
    }

    /// Looks up or creates the visitor for an identity key, refreshing its
    /// liveness.
    pub fn visitor(&self, ip: &str) -> Arc<Visitor> {
        let mut visitors = self.visitors.lock().expect("visitors lock");
        if let Some(v) = visitors.get(ip) {
            v.keepalive();
            return Arc::clone(v);
        }
        let v = Arc::new(Visitor::new(ip, &self.config.visitor));
        visitors.insert(ip.to_string(), Arc::clone(&v));
        v
    }

    pub fn visitor_count(&self) -> usize {
        self.visitors.lock().expect("visitors lock").len()
    }

    /// The publish path after validation: live fan-out unless delayed, then
    /// fire-and-forget push/mail, then the cache write.
    pub async fn publish(&self, topic: &Topic, m: &Message, opts: &PublishOptions) -> Result<()> {
        let delayed = m.time > now_unix();
        if !delayed {
            topic.publish(m);
            if opts.push {
                if let Some(push) = &self.push {
                    let push = Arc::clone(push);
                    let m = m.clone();
                    tokio::spawn(async move {
                        if let Err(err) = push.send(&m).await {
                            tracing::warn!(id = %m.id, error = %err, "push delivery failed");
                        }
                    });
                }
            }
            if let Some(to) = &opts.email {
                if let Some(mailer) = &self.mailer {
                    let mailer = Arc::clone(mailer);
                    let m = m.clone();
                    let sender_ip = opts.sender_ip.clone();
                    let to = to.clone();
                    tokio::spawn(async move {
                        if let Err(err) = mailer.send(&sender_ip, &to, &m).await {
                            tracing::warn!(id = %m.id, error = %err, "mail delivery failed");
                        }
                    });
                }
            }
        }
        if opts.cache {
            self.cache.add_message(m).await?;
        }
        self.published.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("beacon_messages_published_total").increment(1);
        Ok(())
    }

    async fn run_manager(&self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.config.manager_interval) => {
                    self.update_stats_and_prune().await;
                }
            }
        }
    }

    async fn run_scheduler(&self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.config.scheduler_interval) => {
                    self.send_scheduled().await;
                }
            }
        }
    }

    async fn run_push_keepalive(&self) {
        let Some(push) = self.push.clone() else {
            return;
        };
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.config.push_keepalive_interval) => {
                    if let Err(err) = push.send(&Message::keepalive(CONTROL_TOPIC)).await {
                        tracing::warn!(error = %err, "push keepalive failed");
                    }
                }
            }
        }
    }

    /// One manager tick: expire visitors and attachments, prune the cache,
    /// drop dead topics, log stats.
    async fn update_stats_and_prune(&self) {
        self.visitors
            .lock()
            .expect("visitors lock")
            .retain(|_, v| !v.stale());

        if let Some(file_cache) = &self.file_cache {
            match self.cache.attachments_expired().await {
                Ok(ids) if !ids.is_empty() => {
                    if let Err(err) = file_cache.remove(&ids).await {
                        tracing::warn!(error = %err, "deleting expired attachments failed");
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "listing expired attachments failed");
                }
            }
        }

        let before = now_unix() - self.config.cache_duration.as_secs() as i64;
        if let Err(err) = self.cache.prune(before).await {
            tracing::warn!(error = %err, "cache prune failed");
        }

        let snapshot: Vec<(String, Arc<Topic>)> = {
            let topics = self.topics.lock().expect("topics lock");
            topics.iter().map(|(k, v)| (k.clone(), Arc::clone(v))).collect()
        };
        let mut subscribers = 0usize;
        let mut cached_messages = 0usize;
        for (name, topic) in snapshot {
            let count = match self.cache.message_count(&name).await {
                Ok(count) => count,
                Err(err) => {
                    tracing::warn!(topic = %name, error = %err, "topic stats unavailable");
                    continue;
                }
            };
            if count == 0 && topic.subscribers() == 0 {
                let mut topics = self.topics.lock().expect("topics lock");
                // Re-check under the lock; a subscriber may have arrived.
                if topics.get(&name).is_some_and(|t| t.subscribers() == 0) {
                    topics.remove(&name);
                }
                continue;
            }
            subscribers += topic.subscribers();
            cached_messages += count;
        }

        let topics = self.topic_count();
        let visitors = self.visitor_count();
        metrics::gauge!("beacon_topics_active").set(topics as f64);
        metrics::gauge!("beacon_subscribers").set(subscribers as f64);
        metrics::gauge!("beacon_visitors").set(visitors as f64);
        tracing::info!(
            published = self.messages_published(),
            cached = cached_messages,
            topics,
            subscribers,
            visitors,
            "stats"
        );
    }

    /// One scheduler tick: deliver everything due, marking each message
    /// published exactly once. Individual failures do not abort the batch.
    async fn send_scheduled(&self) {
        let due = match self.cache.messages_due().await {
            Ok(due) => due,
            Err(err) => {
                tracing::warn!(error = %err, "listing due messages failed");
                return;
            }
        };
        for m in due {
            if let Some(topic) = self.existing_topic(&m.topic) {
                topic.publish(&m);
            }
            if let Some(push) = &self.push {
                if let Err(err) = push.send(&m).await {
                    tracing::warn!(id = %m.id, error = %err, "push delivery failed");
                }
            }
            if let Err(err) = self.cache.mark_published(&m.id).await {
                tracing::warn!(id = %m.id, error = %err, "marking message published failed");
            }
        }
    }
}

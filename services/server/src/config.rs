// Server configuration sourced from environment variables, with an optional
// YAML override file whose keys match the documented option names.
use anyhow::{Context, Result};
use beacon_broker::{BrokerConfig, VisitorLimits};
use beacon_wire::parse_duration;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Bind addresses; at least one listener must be configured.
    pub listen_http: Option<SocketAddr>,
    pub listen_https: Option<SocketAddr>,
    pub listen_unix: Option<PathBuf>,
    // TLS material for the HTTPS listener.
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    // Prometheus bind address; metrics are disabled when unset.
    pub metrics_bind: Option<SocketAddr>,
    // Absolute root used to build attachment URLs.
    pub base_url: Option<String>,
    // Durable cache path; the cache stays in memory when unset.
    pub cache_file: Option<PathBuf>,
    // TTL for cache entries; zero disables caching entirely.
    pub cache_duration: Duration,
    // Attachment file cache.
    pub attachment_cache_dir: Option<PathBuf>,
    pub attachment_total_size_limit: u64,
    pub attachment_file_size_limit: u64,
    pub attachment_expiry_duration: Duration,
    // Per-visitor quotas.
    pub visitor_attachment_total_size_limit: u64,
    pub visitor_attachment_daily_bandwidth_limit: u64,
    pub visitor_request_limit_burst: u64,
    pub visitor_request_limit_replenish: Duration,
    pub visitor_email_limit_burst: u64,
    pub visitor_email_limit_replenish: Duration,
    pub visitor_subscription_limit: i64,
    // Stream cadences and background loop intervals.
    pub keepalive_interval: Duration,
    pub manager_interval: Duration,
    pub at_sender_interval: Duration,
    pub push_keepalive_interval: Duration,
    // Bounds on scheduled delivery.
    pub min_delay: Duration,
    pub max_delay: Duration,
    // Max bytes of a message body treated as text.
    pub message_limit: usize,
    // Global ceiling on live topics.
    pub total_topic_limit: usize,
    // Trust X-Forwarded-For for visitor identity.
    pub behind_proxy: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_http: Some("0.0.0.0:8000".parse().expect("default bind")),
            listen_https: None,
            listen_unix: None,
            cert_file: None,
            key_file: None,
            metrics_bind: None,
            base_url: None,
            cache_file: None,
            cache_duration: Duration::from_secs(12 * 3600),
            attachment_cache_dir: None,
            attachment_total_size_limit: 5 * 1024 * 1024 * 1024,
            attachment_file_size_limit: 15 * 1024 * 1024,
            attachment_expiry_duration: Duration::from_secs(3 * 3600),
            visitor_attachment_total_size_limit: 100 * 1024 * 1024,
            visitor_attachment_daily_bandwidth_limit: 500 * 1024 * 1024,
            visitor_request_limit_burst: 60,
            visitor_request_limit_replenish: Duration::from_secs(5),
            visitor_email_limit_burst: 16,
            visitor_email_limit_replenish: Duration::from_secs(3600),
            visitor_subscription_limit: 30,
            keepalive_interval: Duration::from_secs(45),
            manager_interval: Duration::from_secs(60),
            at_sender_interval: Duration::from_secs(10),
            push_keepalive_interval: Duration::from_secs(3 * 3600),
            min_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(3 * 24 * 3600),
            message_limit: 4096,
            total_topic_limit: 15000,
            behind_proxy: false,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ConfigOverride {
    listen_http: Option<String>,
    listen_https: Option<String>,
    listen_unix: Option<PathBuf>,
    cert_file: Option<PathBuf>,
    key_file: Option<PathBuf>,
    metrics_bind: Option<String>,
    base_url: Option<String>,
    cache_file: Option<PathBuf>,
    cache_duration: Option<String>,
    attachment_cache_dir: Option<PathBuf>,
    total_size_limit: Option<u64>,
    file_size_limit: Option<u64>,
    expiry_duration: Option<String>,
    visitor_attachment_total_size_limit: Option<u64>,
    daily_bandwidth_limit: Option<u64>,
    visitor_request_limit_burst: Option<u64>,
    visitor_request_limit_replenish: Option<String>,
    visitor_email_limit_burst: Option<u64>,
    visitor_email_limit_replenish: Option<String>,
    visitor_subscription_limit: Option<i64>,
    keepalive_interval: Option<String>,
    manager_interval: Option<String>,
    at_sender_interval: Option<String>,
    push_keepalive_interval: Option<String>,
    min_delay: Option<String>,
    max_delay: Option<String>,
    message_limit: Option<usize>,
    total_topic_limit: Option<usize>,
    behind_proxy: Option<bool>,
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_addr(name: &str) -> Result<Option<SocketAddr>> {
    env_string(name)
        .map(|v| v.parse().with_context(|| format!("parse {name}")))
        .transpose()
}

fn env_duration(name: &str) -> Result<Option<Duration>> {
    env_string(name)
        .map(|v| parse_duration(&v).with_context(|| format!("parse {name}")))
        .transpose()
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_string(name)
        .map(|v| v.parse::<T>().with_context(|| format!("parse {name}")))
        .transpose()
}

fn parse_duration_opt(value: Option<String>, what: &str) -> Result<Option<Duration>> {
    value
        .map(|v| parse_duration(&v).with_context(|| format!("parse {what}")))
        .transpose()
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(addr) = env_addr("BEACON_LISTEN_HTTP")? {
            config.listen_http = Some(addr);
        }
        config.listen_https = env_addr("BEACON_LISTEN_HTTPS")?;
        config.listen_unix = env_string("BEACON_LISTEN_UNIX").map(PathBuf::from);
        config.cert_file = env_string("BEACON_CERT_FILE").map(PathBuf::from);
        config.key_file = env_string("BEACON_KEY_FILE").map(PathBuf::from);
        config.metrics_bind = env_addr("BEACON_METRICS_BIND")?;
        config.base_url = env_string("BEACON_BASE_URL");
        config.cache_file = env_string("BEACON_CACHE_FILE").map(PathBuf::from);
        if let Some(d) = env_duration("BEACON_CACHE_DURATION")? {
            config.cache_duration = d;
        }
        config.attachment_cache_dir = env_string("BEACON_ATTACHMENT_CACHE_DIR").map(PathBuf::from);
        if let Some(v) = env_parse("BEACON_ATTACHMENT_TOTAL_SIZE_LIMIT")? {
            config.attachment_total_size_limit = v;
        }
        if let Some(v) = env_parse("BEACON_ATTACHMENT_FILE_SIZE_LIMIT")? {
            config.attachment_file_size_limit = v;
        }
        if let Some(d) = env_duration("BEACON_ATTACHMENT_EXPIRY_DURATION")? {
            config.attachment_expiry_duration = d;
        }
        if let Some(v) = env_parse("BEACON_VISITOR_ATTACHMENT_TOTAL_SIZE_LIMIT")? {
            config.visitor_attachment_total_size_limit = v;
        }
        if let Some(v) = env_parse("BEACON_VISITOR_ATTACHMENT_DAILY_BANDWIDTH_LIMIT")? {
            config.visitor_attachment_daily_bandwidth_limit = v;
        }
        if let Some(v) = env_parse("BEACON_VISITOR_REQUEST_LIMIT_BURST")? {
            config.visitor_request_limit_burst = v;
        }
        if let Some(d) = env_duration("BEACON_VISITOR_REQUEST_LIMIT_REPLENISH")? {
            config.visitor_request_limit_replenish = d;
        }
        if let Some(v) = env_parse("BEACON_VISITOR_EMAIL_LIMIT_BURST")? {
            config.visitor_email_limit_burst = v;
        }
        if let Some(d) = env_duration("BEACON_VISITOR_EMAIL_LIMIT_REPLENISH")? {
            config.visitor_email_limit_replenish = d;
        }
        if let Some(v) = env_parse("BEACON_VISITOR_SUBSCRIPTION_LIMIT")? {
            config.visitor_subscription_limit = v;
        }
        if let Some(d) = env_duration("BEACON_KEEPALIVE_INTERVAL")? {
            config.keepalive_interval = d;
        }
        if let Some(d) = env_duration("BEACON_MANAGER_INTERVAL")? {
            config.manager_interval = d;
        }
        if let Some(d) = env_duration("BEACON_AT_SENDER_INTERVAL")? {
            config.at_sender_interval = d;
        }
        if let Some(d) = env_duration("BEACON_PUSH_KEEPALIVE_INTERVAL")? {
            config.push_keepalive_interval = d;
        }
        if let Some(d) = env_duration("BEACON_MIN_DELAY")? {
            config.min_delay = d;
        }
        if let Some(d) = env_duration("BEACON_MAX_DELAY")? {
            config.max_delay = d;
        }
        if let Some(v) = env_parse("BEACON_MESSAGE_LIMIT")? {
            config.message_limit = v;
        }
        if let Some(v) = env_parse("BEACON_TOTAL_TOPIC_LIMIT")? {
            config.total_topic_limit = v;
        }
        if let Some(v) = env_string("BEACON_BEHIND_PROXY") {
            config.behind_proxy = matches!(v.as_str(), "1" | "true" | "yes");
        }
        Ok(config)
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Some(path) = env_string("BEACON_CONFIG") {
            let contents =
                fs::read_to_string(&path).with_context(|| format!("read BEACON_CONFIG: {path}"))?;
            let overrides: ConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse server config yaml")?;
            config.apply(overrides)?;
        }
        Ok(config)
    }

    fn apply(&mut self, o: ConfigOverride) -> Result<()> {
        if let Some(v) = o.listen_http {
            self.listen_http = Some(v.parse().with_context(|| "parse listen-http")?);
        }
        if let Some(v) = o.listen_https {
            self.listen_https = Some(v.parse().with_context(|| "parse listen-https")?);
        }
        if let Some(v) = o.listen_unix {
            self.listen_unix = Some(v);
        }
        if let Some(v) = o.cert_file {
            self.cert_file = Some(v);
        }
        if let Some(v) = o.key_file {
            self.key_file = Some(v);
        }
        if let Some(v) = o.metrics_bind {
            self.metrics_bind = Some(v.parse().with_context(|| "parse metrics-bind")?);
        }
        if let Some(v) = o.base_url {
            self.base_url = Some(v);
        }
        if let Some(v) = o.cache_file {
            self.cache_file = Some(v);
        }
        if let Some(d) = parse_duration_opt(o.cache_duration, "cache-duration")? {
            self.cache_duration = d;
        }
        if let Some(v) = o.attachment_cache_dir {
            self.attachment_cache_dir = Some(v);
        }
        if let Some(v) = o.total_size_limit {
            self.attachment_total_size_limit = v;
        }
        if let Some(v) = o.file_size_limit {
            self.attachment_file_size_limit = v;
        }
        if let Some(d) = parse_duration_opt(o.expiry_duration, "expiry-duration")? {
            self.attachment_expiry_duration = d;
        }
        if let Some(v) = o.visitor_attachment_total_size_limit {
            self.visitor_attachment_total_size_limit = v;
        }
        if let Some(v) = o.daily_bandwidth_limit {
            self.visitor_attachment_daily_bandwidth_limit = v;
        }
        if let Some(v) = o.visitor_request_limit_burst {
            self.visitor_request_limit_burst = v;
        }
        if let Some(d) =
            parse_duration_opt(o.visitor_request_limit_replenish, "visitor-request-limit-replenish")?
        {
            self.visitor_request_limit_replenish = d;
        }
        if let Some(v) = o.visitor_email_limit_burst {
            self.visitor_email_limit_burst = v;
        }
        if let Some(d) =
            parse_duration_opt(o.visitor_email_limit_replenish, "visitor-email-limit-replenish")?
        {
            self.visitor_email_limit_replenish = d;
        }
        if let Some(v) = o.visitor_subscription_limit {
            self.visitor_subscription_limit = v;
        }
        if let Some(d) = parse_duration_opt(o.keepalive_interval, "keepalive-interval")? {
            self.keepalive_interval = d;
        }
        if let Some(d) = parse_duration_opt(o.manager_interval, "manager-interval")? {
            self.manager_interval = d;
        }
        if let Some(d) = parse_duration_opt(o.at_sender_interval, "at-sender-interval")? {
            self.at_sender_interval = d;
        }
        if let Some(d) = parse_duration_opt(o.push_keepalive_interval, "push-keepalive-interval")? {
            self.push_keepalive_interval = d;
        }
        if let Some(d) = parse_duration_opt(o.min_delay, "min-delay")? {
            self.min_delay = d;
        }
        if let Some(d) = parse_duration_opt(o.max_delay, "max-delay")? {
            self.max_delay = d;
        }
        if let Some(v) = o.message_limit {
            self.message_limit = v;
        }
        if let Some(v) = o.total_topic_limit {
            self.total_topic_limit = v;
        }
        if let Some(v) = o.behind_proxy {
            self.behind_proxy = v;
        }
        Ok(())
    }

    /// Broker-side view of this configuration.
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            visitor: VisitorLimits {
                request_burst: self.visitor_request_limit_burst,
                request_replenish: self.visitor_request_limit_replenish,
                email_burst: self.visitor_email_limit_burst,
                email_replenish: self.visitor_email_limit_replenish,
                subscription_limit: self.visitor_subscription_limit,
                bandwidth_limit: self.visitor_attachment_daily_bandwidth_limit,
                ..VisitorLimits::default()
            },
            total_topic_limit: self.total_topic_limit,
            cache_duration: self.cache_duration,
            manager_interval: self.manager_interval,
            scheduler_interval: self.at_sender_interval,
            push_keepalive_interval: self.push_keepalive_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clear_beacon_env() {
        for (key, _) in env::vars() {
            if key.starts_with("BEACON_") {
                env::remove_var(key);
            }
        }
    }

    #[serial]
    #[test]
    fn from_env_uses_defaults() {
        clear_beacon_env();
        let config = ServerConfig::from_env().expect("from_env");
        assert_eq!(
            config.listen_http.expect("listen").to_string(),
            "0.0.0.0:8000"
        );
        assert_eq!(config.message_limit, 4096);
        assert_eq!(config.cache_duration, Duration::from_secs(12 * 3600));
        assert!(!config.behind_proxy);
    }

    #[serial]
    #[test]
    fn from_env_respects_env_vars() {
        clear_beacon_env();
        env::set_var("BEACON_LISTEN_HTTP", "127.0.0.1:9000");
        env::set_var("BEACON_CACHE_DURATION", "1h");
        env::set_var("BEACON_VISITOR_REQUEST_LIMIT_BURST", "5");
        env::set_var("BEACON_BEHIND_PROXY", "true");

        let config = ServerConfig::from_env().expect("from_env");
        assert_eq!(
            config.listen_http.expect("listen").to_string(),
            "127.0.0.1:9000"
        );
        assert_eq!(config.cache_duration, Duration::from_secs(3600));
        assert_eq!(config.visitor_request_limit_burst, 5);
        assert!(config.behind_proxy);
        clear_beacon_env();
    }

    #[serial]
    #[test]
    fn from_env_rejects_invalid_addr() {
        clear_beacon_env();
        env::set_var("BEACON_LISTEN_HTTP", "not-an-address");
        assert!(ServerConfig::from_env().is_err());
        clear_beacon_env();
    }

    #[serial]
    #[test]
    fn yaml_overrides_env() {
        clear_beacon_env();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("server.yml");
        std::fs::write(
            &path,
            r#"
listen-http: "127.0.0.1:7000"
base-url: "https://push.example.com"
cache-duration: "30m"
message-limit: 1024
behind-proxy: true
"#,
        )
        .expect("write yaml");
        env::set_var("BEACON_CONFIG", path.to_str().expect("path"));

        let config = ServerConfig::from_env_or_yaml().expect("config");
        assert_eq!(
            config.listen_http.expect("listen").to_string(),
            "127.0.0.1:7000"
        );
        assert_eq!(
            config.base_url.as_deref(),
            Some("https://push.example.com")
        );
        assert_eq!(config.cache_duration, Duration::from_secs(1800));
        assert_eq!(config.message_limit, 1024);
        assert!(config.behind_proxy);
        clear_beacon_env();
    }

    #[serial]
    #[test]
    fn yaml_with_unknown_key_fails() {
        clear_beacon_env();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("server.yml");
        std::fs::write(&path, "no-such-option: 1\n").expect("write yaml");
        env::set_var("BEACON_CONFIG", path.to_str().expect("path"));
        assert!(ServerConfig::from_env_or_yaml().is_err());
        clear_beacon_env();
    }

    #[test]
    fn broker_config_carries_visitor_limits() {
        let mut config = ServerConfig::default();
        config.visitor_request_limit_burst = 3;
        config.at_sender_interval = Duration::from_secs(1);
        let broker = config.broker_config();
        assert_eq!(broker.visitor.request_burst, 3);
        assert_eq!(broker.scheduler_interval, Duration::from_secs(1));
    }
}

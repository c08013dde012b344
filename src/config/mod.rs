use serde::{Deserialize, Serialize};
use std::{env, fmt, fs, path::Path, str::FromStr, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which transports the router is allowed to use for inbound chat traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageMode {
    /// In-process queue only. Reads are always answered inline.
    Channel,
    /// Durable broker only; never falls back to queue mode on recovery.
    #[serde(alias = "kafka")]
    Broker,
    /// Adaptive switching driven by the load monitor.
    Hybrid,
}

impl MessageMode {
    pub fn uses_broker(self) -> bool {
        !matches!(self, MessageMode::Channel)
    }
}

impl FromStr for MessageMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "channel" => Ok(MessageMode::Channel),
            // legacy name
            "broker" | "kafka" => Ok(MessageMode::Broker),
            "hybrid" => Ok(MessageMode::Hybrid),
            other => Err(ConfigError::Parse(format!("unknown message mode '{other}'"))),
        }
    }
}

impl fmt::Display for MessageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageMode::Channel => f.write_str("channel"),
            MessageMode::Broker => f.write_str("broker"),
            MessageMode::Hybrid => f.write_str("hybrid"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub max_frame_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            max_frame_len: 1024 * 1024,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TransportConfig {
    pub message_mode: MessageMode,
    /// Capacity of the in-process transmit queue.
    pub queue_capacity: usize,
    /// Occupancy ratio (0, 1] at which the queue counts as overloaded.
    pub threshold_ratio: f64,
    pub monitor_interval_ms: u64,
    /// How long occupancy must stay above threshold before switching to the broker.
    pub sustain_ms: u64,
    /// Upper bound on a single broker publish from the send path.
    pub publish_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            message_mode: MessageMode::Hybrid,
            queue_capacity: 1024,
            threshold_ratio: 0.8,
            monitor_interval_ms: 1_000,
            sustain_ms: 5_000,
            publish_timeout_ms: 1_000,
        }
    }
}

impl TransportConfig {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn sustain_duration(&self) -> Duration {
        Duration::from_millis(self.sustain_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BrokerConfig {
    pub chat_topic: String,
    pub chat_group: String,
    pub async_task_topic: String,
    pub async_task_group: String,
    /// Partition key for chat traffic; a single key keeps the chat topic ordered.
    pub partition_key: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            chat_topic: "chat_message".to_string(),
            chat_group: "chat".to_string(),
            async_task_topic: "async_tasks".to_string(),
            async_task_group: "async_task_workers".to_string(),
            partition_key: "0".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub history_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            history_ttl_secs: 60,
        }
    }
}

impl CacheConfig {
    pub fn history_ttl(&self) -> Duration {
        Duration::from_secs(self.history_ttl_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub outbound_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub transport: TransportConfig,
    pub broker: BrokerConfig,
    pub cache: CacheConfig,
    pub session: SessionConfig,
}

impl Config {
    /// Load configuration from an optional file path and environment variables.
    ///
    /// Precedence: built-in defaults, then the file (explicit path or
    /// `HYBRIDCHAT_CONFIG`), then `HYBRIDCHAT_*` variables.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let effective_path = path
            .map(str::to_string)
            .or_else(|| env::var("HYBRIDCHAT_CONFIG").ok());

        let mut config = match effective_path {
            Some(p) => Self::from_file(p)?,
            None => Config::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw: String = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = env::var("HYBRIDCHAT_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Ok(v) = env::var("HYBRIDCHAT_MESSAGE_MODE") {
            self.transport.message_mode = v.parse()?;
        }
        if let Some(v) = parse_env("HYBRIDCHAT_QUEUE_CAPACITY")? {
            self.transport.queue_capacity = v;
        }
        if let Some(v) = parse_env("HYBRIDCHAT_THRESHOLD_RATIO")? {
            self.transport.threshold_ratio = v;
        }
        if let Some(v) = parse_env("HYBRIDCHAT_MONITOR_INTERVAL_MS")? {
            self.transport.monitor_interval_ms = v;
        }
        if let Some(v) = parse_env("HYBRIDCHAT_SUSTAIN_MS")? {
            self.transport.sustain_ms = v;
        }
        if let Some(v) = parse_env("HYBRIDCHAT_HISTORY_TTL_SECS")? {
            self.cache.history_ttl_secs = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.transport;
        if !(t.threshold_ratio > 0.0 && t.threshold_ratio <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "transport.threshold_ratio must be in (0, 1], got {}",
                t.threshold_ratio
            )));
        }
        if t.queue_capacity == 0 {
            return Err(ConfigError::Invalid("transport.queue_capacity must be > 0".into()));
        }
        if t.monitor_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "transport.monitor_interval_ms must be > 0".into(),
            ));
        }
        if self.session.outbound_capacity == 0 {
            return Err(ConfigError::Invalid(
                "session.outbound_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::Parse(format!("{key}: {e}"))),
        Err(_) => Ok(None),
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let config = Config::from_file(path)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_mode_accepts_legacy_kafka_name() {
        assert_eq!("kafka".parse::<MessageMode>().unwrap(), MessageMode::Broker);
        assert_eq!("Hybrid".parse::<MessageMode>().unwrap(), MessageMode::Hybrid);
        assert!("carrier-pigeon".parse::<MessageMode>().is_err());
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [transport]
            message_mode = "channel"
            queue_capacity = 10
            "#,
        )
        .unwrap();
        assert_eq!(cfg.transport.message_mode, MessageMode::Channel);
        assert_eq!(cfg.transport.queue_capacity, 10);
        assert_eq!(cfg.transport.threshold_ratio, 0.8);
        assert_eq!(cfg.broker.async_task_topic, "async_tasks");
    }

    #[test]
    fn threshold_out_of_range_is_rejected() {
        let mut cfg = Config::default();
        cfg.transport.threshold_ratio = 1.5;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
        cfg.transport.threshold_ratio = 0.0;
        assert!(cfg.validate().is_err());
    }
}

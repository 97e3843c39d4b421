use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_parse<T>(profile: &str, key: &str, default: T) -> Result<T, CoreError>
where
    T: FromStr<Err = CoreError>,
{
    match profiled_env_opt(profile, key) {
        Some(raw) => raw.parse(),
        None => Ok(default),
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub messaging: MessagingConfig,
    pub broker: BrokerConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `COURIER_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Result<Self, CoreError> {
        let profile = env_or("COURIER_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Result<Self, CoreError> {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Ok(Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            messaging: MessagingConfig::from_env_profiled(p)?,
            broker: BrokerConfig::from_env_profiled(p)?,
        })
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:      {}:{}", self.server.host, self.server.port);
        tracing::info!(
            "  messaging:   topic={}, group={}, offset_reset={}",
            self.messaging.topic,
            self.messaging.consumer_group,
            self.messaging.offset_reset
        );
        tracing::info!("  broker:      backend={}", self.broker.backend);
        match self.broker.backend {
            BrokerBackend::Memory => {}
            BrokerBackend::Zmq => tracing::info!(
                "  zmq:         transport={}, host={}, frontend={}, backend={}",
                self.broker.zmq.transport,
                self.broker.zmq.host,
                self.broker.zmq.frontend_port,
                self.broker.zmq.backend_port
            ),
            BrokerBackend::Kafka => tracing::info!(
                "  kafka:       bootstrap={}, client_id={}",
                self.broker.kafka.bootstrap_servers,
                self.broker.kafka.client_id
            ),
        }
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_u16(p, "PORT", 8080),
            cors_origin: profiled_env_or(p, "CORS_ORIGIN", "*"),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origin: "*".to_string(),
        }
    }
}

// ── Messaging ─────────────────────────────────────────────────

pub const DEFAULT_TOPIC: &str = "my-topic";
pub const DEFAULT_CONSUMER_GROUP: &str = "kafka-demo-group";

/// Where a consumer group without a committed position starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    Earliest,
    #[default]
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earliest => "earliest",
            Self::Latest => "latest",
        }
    }
}

impl fmt::Display for OffsetReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OffsetReset {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" | "smallest" => Ok(Self::Earliest),
            "latest" | "largest" => Ok(Self::Latest),
            _ => Err(CoreError::InvalidConfig {
                key: "COURIER_OFFSET_RESET".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Topic and consumer group shared by the publisher and the listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagingConfig {
    pub topic: String,
    pub consumer_group: String,
    #[serde(default)]
    pub offset_reset: OffsetReset,
}

impl MessagingConfig {
    pub fn new(topic: impl Into<String>, consumer_group: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            consumer_group: consumer_group.into(),
            offset_reset: OffsetReset::default(),
        }
    }

    pub fn with_offset_reset(mut self, offset_reset: OffsetReset) -> Self {
        self.offset_reset = offset_reset;
        self
    }

    fn from_env_profiled(p: &str) -> Result<Self, CoreError> {
        Ok(Self {
            topic: profiled_env_or(p, "COURIER_TOPIC", DEFAULT_TOPIC),
            consumer_group: profiled_env_or(p, "COURIER_CONSUMER_GROUP", DEFAULT_CONSUMER_GROUP),
            offset_reset: profiled_env_parse(p, "COURIER_OFFSET_RESET", OffsetReset::default())?,
        })
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC, DEFAULT_CONSUMER_GROUP)
    }
}

// ── Broker ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerBackend {
    /// In-process broker; publisher and listener must share the process.
    #[default]
    Memory,
    /// ZeroMQ PUB/SUB through the `courier-broker` proxy.
    Zmq,
    /// Apache Kafka (requires the `kafka` feature of `courier-broker`).
    Kafka,
}

impl BrokerBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Zmq => "zmq",
            Self::Kafka => "kafka",
        }
    }
}

impl fmt::Display for BrokerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BrokerBackend {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(Self::Memory),
            "zmq" | "zeromq" => Ok(Self::Zmq),
            "kafka" => Ok(Self::Kafka),
            _ => Err(CoreError::InvalidConfig {
                key: "BROKER_BACKEND".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub backend: BrokerBackend,
    pub zmq: ZmqConfig,
    pub kafka: KafkaConfig,
}

impl BrokerConfig {
    fn from_env_profiled(p: &str) -> Result<Self, CoreError> {
        Ok(Self {
            backend: profiled_env_parse(p, "BROKER_BACKEND", BrokerBackend::default())?,
            zmq: ZmqConfig::from_env_profiled(p),
            kafka: KafkaConfig::from_env_profiled(p),
        })
    }
}

/// Endpoints of the ZeroMQ proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZmqConfig {
    /// "tcp" or "ipc".
    pub transport: String,
    pub host: String,
    pub frontend_port: u16,
    pub backend_port: u16,
    pub health_port: u16,
    pub ipc_prefix: String,
    /// Upper bound for reaching the proxy (connects and health checks).
    pub connect_timeout_ms: u64,
}

impl ZmqConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            transport: profiled_env_or(p, "ZMQ_TRANSPORT", "tcp"),
            host: profiled_env_or(p, "ZMQ_HOST", "127.0.0.1"),
            frontend_port: profiled_env_u16(p, "ZMQ_FRONTEND_PORT", 5555),
            backend_port: profiled_env_u16(p, "ZMQ_BACKEND_PORT", 5556),
            health_port: profiled_env_u16(p, "ZMQ_HEALTH_PORT", 5557),
            ipc_prefix: profiled_env_or(p, "ZMQ_IPC_PREFIX", "courier"),
            connect_timeout_ms: profiled_env_u64(p, "ZMQ_CONNECT_TIMEOUT_MS", 2000),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ZmqConfig {
    fn default() -> Self {
        Self {
            transport: "tcp".to_string(),
            host: "127.0.0.1".to_string(),
            frontend_port: 5555,
            backend_port: 5556,
            health_port: 5557,
            ipc_prefix: "courier".to_string(),
            connect_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    pub client_id: String,
    pub delivery_timeout_ms: u64,
}

impl KafkaConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            bootstrap_servers: profiled_env_or(p, "KAFKA_BOOTSTRAP_SERVERS", "localhost:9092"),
            client_id: profiled_env_or(p, "KAFKA_CLIENT_ID", "courier"),
            delivery_timeout_ms: profiled_env_u64(p, "KAFKA_DELIVERY_TIMEOUT_MS", 5000),
        }
    }
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            client_id: "courier".to_string(),
            delivery_timeout_ms: 5000,
        }
    }
}

use crate::error::ModelError;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use zeroize::Zeroizing;

pub const INSTANCE_NAME: &str = "bigtable.accumulo.instanceName";
pub const USERNAME: &str = "bigtable.accumulo.username";
pub const PASSWORD: &str = "bigtable.accumulo.password";
pub const ZOOKEEPER_SERVER_NAMES: &str = "bigtable.accumulo.zookeeperServerNames";
pub const AUTOFLUSH: &str = "bigtable.autoflush";
pub const WRITER_MAX_MEMORY: &str = "bigtable.writer.maxMemory";
pub const WRITER_MAX_LATENCY_MS: &str = "bigtable.writer.maxLatencyMs";
pub const WRITER_MAX_WRITE_THREADS: &str = "bigtable.writer.maxWriteThreads";

/// Where and as whom a session connects.
#[derive(Clone)]
pub struct ConnectionSettings {
    pub instance_name: String,
    pub zookeeper_servers: Vec<String>,
    pub username: String,
    /// Zeroed from memory when the last copy is dropped.
    pub password: Zeroizing<String>,
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("instance_name", &self.instance_name)
            .field("zookeeper_servers", &self.zookeeper_servers)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Buffering limits for one table's batch writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BatchWriterConfig {
    pub max_memory: usize,
    pub max_latency: Duration,
    pub max_write_threads: usize,
}

impl Default for BatchWriterConfig {
    fn default() -> Self {
        Self {
            max_memory: 1_000_000,
            max_latency: Duration::from_millis(1_000),
            max_write_threads: 10,
        }
    }
}

/// Everything `ModelSession::init` reads from its property map.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connection: ConnectionSettings,
    pub autoflush: bool,
    pub writer: BatchWriterConfig,
}

impl SessionConfig {
    /// Validates the property map. Every required key is checked before any
    /// connection is attempted.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self, ModelError> {
        let instance_name = required(props, INSTANCE_NAME)?;
        let username = required(props, USERNAME)?;
        let password = Zeroizing::new(required(props, PASSWORD)?);
        let zookeeper_servers = required(props, ZOOKEEPER_SERVER_NAMES)?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let defaults = BatchWriterConfig::default();
        let writer = BatchWriterConfig {
            max_memory: optional(props, WRITER_MAX_MEMORY)?.unwrap_or(defaults.max_memory),
            max_latency: optional::<u64>(props, WRITER_MAX_LATENCY_MS)?
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_latency),
            max_write_threads: optional(props, WRITER_MAX_WRITE_THREADS)?
                .unwrap_or(defaults.max_write_threads),
        };

        Ok(Self {
            connection: ConnectionSettings {
                instance_name,
                zookeeper_servers,
                username,
                password,
            },
            autoflush: optional(props, AUTOFLUSH)?.unwrap_or(true),
            writer,
        })
    }

    /// Reads a `.properties` style file: `key=value` or `key: value` per line,
    /// `#` and `!` start comments.
    pub fn load_properties_file(path: impl AsRef<Path>) -> Result<HashMap<String, String>, ModelError> {
        let text = std::fs::read_to_string(path)?;
        Ok(parse_properties(&text))
    }
}

pub(crate) fn parse_properties(text: &str) -> HashMap<String, String> {
    let mut props = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let split = line.find(['=', ':']);
        let (key, value) = match split {
            Some(idx) => (&line[..idx], &line[idx + 1..]),
            None => (line, ""),
        };
        props.insert(key.trim().to_string(), value.trim().to_string());
    }
    props
}

fn required(props: &HashMap<String, String>, key: &str) -> Result<String, ModelError> {
    props
        .get(key)
        .cloned()
        .ok_or_else(|| ModelError::missing_config(key))
}

fn optional<T: FromStr>(props: &HashMap<String, String>, key: &str) -> Result<Option<T>, ModelError> {
    match props.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ModelError::InvalidConfig {
                message: format!("configuration property {key} has invalid value '{raw}'"),
            }),
    }
}

/// Tuning for the session cache manager.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SessionCacheConfig {
    pub max_cache_size: usize,
    pub cache_expiration: Duration,
    /// Write every attribute on each save, not only the changed ones.
    pub save_all_attributes: bool,
    /// Minimum age before a request's first access reloads from the cache.
    /// Zero reloads on every request.
    pub stale_period: Duration,
    /// Minimum time between saves on request completion. Zero saves every time.
    pub save_period: Duration,
    pub shards: usize,
}

impl Default for SessionCacheConfig {
    fn default() -> Self {
        Self {
            max_cache_size: 50,
            cache_expiration: Duration::from_secs(10 * 60),
            save_all_attributes: false,
            stale_period: Duration::ZERO,
            save_period: Duration::ZERO,
            shards: 4,
        }
    }
}

impl SessionCacheConfig {
    /// Fewer reloads and saves for nodes that own their sessions (sticky routing).
    pub fn sticky() -> Self {
        Self {
            stale_period: Duration::from_secs(60),
            save_period: Duration::from_secs(30),
            ..Self::default()
        }
    }

    pub fn with_max_cache_size(mut self, max_cache_size: usize) -> Self {
        self.max_cache_size = max_cache_size;
        self
    }

    pub fn with_cache_expiration(mut self, cache_expiration: Duration) -> Self {
        self.cache_expiration = cache_expiration;
        self
    }

    pub fn with_save_all_attributes(mut self, save_all_attributes: bool) -> Self {
        self.save_all_attributes = save_all_attributes;
        self
    }

    pub fn with_stale_period(mut self, stale_period: Duration) -> Self {
        self.stale_period = stale_period;
        self
    }

    pub fn with_save_period(mut self, save_period: Duration) -> Self {
        self.save_period = save_period;
        self
    }
}

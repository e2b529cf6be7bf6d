//! WolfControl Configuration
//!
//! This module provides configuration structures for a WolfControl
//! management node: identity, HA timings, persistence and rebind policy.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main WolfControl configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfControlConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// High-availability configuration
    #[serde(default)]
    pub ha: HaConfig,

    /// Persistence configuration
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Rebind configuration
    #[serde(default)]
    pub rebind: RebindConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier
    pub id: String,

    /// Endpoint other nodes and operators can reach this node at
    #[serde(default)]
    pub uri: Option<String>,
}

/// How a node joins the management plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartMode {
    /// Become master if there is no live master, otherwise standby
    Auto,
    /// Require an existing live master
    Standby,
    /// Require that no other live master exists
    Master,
    /// Single-node deployment, no election polling
    Disabled,
}

impl std::fmt::Display for StartMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartMode::Auto => write!(f, "AUTO"),
            StartMode::Standby => write!(f, "STANDBY"),
            StartMode::Master => write!(f, "MASTER"),
            StartMode::Disabled => write!(f, "DISABLED"),
        }
    }
}

impl std::str::FromStr for StartMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(StartMode::Auto),
            "standby" => Ok(StartMode::Standby),
            "master" => Ok(StartMode::Master),
            "disabled" => Ok(StartMode::Disabled),
            other => Err(crate::Error::Config(format!("unknown start mode: {}", other))),
        }
    }
}

/// High-availability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaConfig {
    /// How this node joins the plane
    #[serde(default = "default_start_mode")]
    pub start_mode: StartMode,

    /// Interval between publish/read/elect cycles in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Heartbeat age after which a node is considered failed, in milliseconds
    #[serde(default = "default_failure_timeout_ms")]
    pub failure_timeout_ms: u64,

    /// Upper bound on any single store operation in milliseconds
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Election priority (higher wins)
    #[serde(default)]
    pub priority: i64,
}

/// Backend used for the shared store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local map, for tests and single-node trials
    Memory,
    /// One file per key under `data_dir`
    File,
    /// Single SQLite database under `data_dir`
    Sqlite,
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Store backend
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    /// Directory holding the shared store
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Enable LZ4 compression for stored values
    #[serde(default = "default_true")]
    pub compression: bool,

    /// Maximum number of store writes in flight across different ids
    #[serde(default = "default_max_concurrent_writes")]
    pub max_concurrent_writes: usize,

    /// Maximum number of queued writes before submitters wait
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Interval between delta flushes in milliseconds
    #[serde(default = "default_persist_period_ms")]
    pub persist_period_ms: u64,

    /// Interval between full checkpoints in milliseconds
    #[serde(default = "default_checkpoint_interval_ms")]
    pub checkpoint_interval_ms: u64,
}

/// Rebind configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RebindConfig {
    /// Fail the whole rebind on the first unresolved reference
    #[serde(default)]
    pub strict: bool,

    /// Fail the whole rebind if any activation hook fails
    #[serde(default)]
    pub fail_on_activation_error: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_start_mode() -> StartMode {
    StartMode::Auto
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_failure_timeout_ms() -> u64 {
    30_000
}

fn default_write_timeout_ms() -> u64 {
    10_000
}

fn default_backend() -> StoreBackend {
    StoreBackend::File
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/wolfcontrol")
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_writes() -> usize {
    10
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_persist_period_ms() -> u64 {
    1000
}

fn default_checkpoint_interval_ms() -> u64 {
    300_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for HaConfig {
    fn default() -> Self {
        Self {
            start_mode: default_start_mode(),
            poll_interval_ms: default_poll_interval_ms(),
            failure_timeout_ms: default_failure_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            priority: 0,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            data_dir: default_data_dir(),
            compression: true,
            max_concurrent_writes: default_max_concurrent_writes(),
            queue_capacity: default_queue_capacity(),
            persist_period_ms: default_persist_period_ms(),
            checkpoint_interval_ms: default_checkpoint_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl WolfControlConfig {
    /// Build a configuration with defaults for the given node id
    pub fn for_node(node_id: impl Into<String>) -> Self {
        Self {
            node: NodeConfig {
                id: node_id.into(),
                uri: None,
            },
            ha: HaConfig::default(),
            persistence: PersistenceConfig::default(),
            rebind: RebindConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfControlConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id.trim().is_empty() {
            return Err(crate::Error::Config("node.id cannot be empty".into()));
        }

        if self.node.id.contains('/') {
            return Err(crate::Error::Config("node.id cannot contain '/'".into()));
        }

        if self.ha.poll_interval_ms == 0 {
            return Err(crate::Error::Config("ha.poll_interval_ms must be positive".into()));
        }

        if self.ha.failure_timeout_ms <= self.ha.poll_interval_ms {
            return Err(crate::Error::Config(
                "ha.failure_timeout_ms must be greater than ha.poll_interval_ms".into(),
            ));
        }

        if self.ha.write_timeout_ms == 0 {
            return Err(crate::Error::Config("ha.write_timeout_ms must be positive".into()));
        }

        if self.persistence.max_concurrent_writes == 0 || self.persistence.queue_capacity == 0 {
            return Err(crate::Error::Config(
                "persistence write concurrency and queue capacity must be positive".into(),
            ));
        }

        if self.persistence.persist_period_ms == 0 || self.persistence.checkpoint_interval_ms == 0 {
            return Err(crate::Error::Config(
                "persistence periods must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Get poll interval as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.ha.poll_interval_ms)
    }

    /// Get failure timeout as Duration
    pub fn failure_timeout(&self) -> Duration {
        Duration::from_millis(self.ha.failure_timeout_ms)
    }

    /// Get store write timeout as Duration
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.ha.write_timeout_ms)
    }

    /// Get delta flush period as Duration
    pub fn persist_period(&self) -> Duration {
        Duration::from_millis(self.persistence.persist_period_ms)
    }

    /// Get checkpoint interval as Duration
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.persistence.checkpoint_interval_ms)
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &PathBuf {
        &self.persistence.data_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[node]
id = "node-1"
uri = "https://node-1:8443"

[ha]
start_mode = "standby"
poll_interval_ms = 500
failure_timeout_ms = 5000
priority = 3

[persistence]
backend = "sqlite"
data_dir = "/tmp/wolfcontrol"
checkpoint_interval_ms = 60000

[rebind]
strict = true
"#;

        let config = WolfControlConfig::from_str(toml).unwrap();
        assert_eq!(config.node.id, "node-1");
        assert_eq!(config.ha.start_mode, StartMode::Standby);
        assert_eq!(config.ha.priority, 3);
        assert_eq!(config.persistence.backend, StoreBackend::Sqlite);
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.checkpoint_interval(), Duration::from_secs(60));
        assert!(config.rebind.strict);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = WolfControlConfig::for_node("node-1");
        config.validate().unwrap();
        assert_eq!(config.ha.start_mode, StartMode::Auto);
    }

    #[test]
    fn test_rejects_timeout_shorter_than_poll() {
        let toml = r#"
[node]
id = "node-1"

[ha]
poll_interval_ms = 1000
failure_timeout_ms = 500
"#;
        let err = WolfControlConfig::from_str(toml).unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn test_start_mode_from_str() {
        assert_eq!("MASTER".parse::<StartMode>().unwrap(), StartMode::Master);
        assert!("leader".parse::<StartMode>().is_err());
    }
}

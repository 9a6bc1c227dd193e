//! Coordination node configuration
//!
//! Defaults can be overridden from `CLUSTER_*` environment variables or a YAML file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{CoordinationError, Result};

/// Top-level configuration for a coordinating process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Identifier of the local node
    pub node_id: String,
    /// Master switch for the coordination core
    pub distributed_enabled: bool,
    /// Expected cluster size
    pub cluster_size: u32,
    pub election: ElectionConfig,
    pub locks: LockConfig,
    pub consensus: ConsensusConfig,
    pub partitioning: PartitionConfig,
    pub replication: ReplicationConfig,
    pub monitor: MonitorConfig,
    pub discovery: DiscoveryConfig,
    pub queue: QueueConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    /// Interval of the background maintenance ticker in milliseconds
    pub maintenance_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Heartbeat interval in seconds
    pub heartbeat_interval: u64,
    /// Priority of the local node in bully elections
    pub local_priority: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// TTL in seconds used when the caller does not provide one
    pub default_lock_ttl: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Proposal timeout in seconds
    pub consensus_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// Ring entries contributed by each physical node
    pub virtual_nodes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    pub replication_factor: u32,
    /// Simulated lag recorded for asynchronous replicas
    pub async_lag_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Utilisation ratio (0, 1] above which an alert is raised
    pub alert_threshold: f64,
    /// Seconds without contact before a node is declared failed
    pub failure_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Health check interval in seconds
    pub health_interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_retries: u32,
    /// Seconds an in-flight message may stay unacknowledged
    pub visibility_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// One of `compact`, `pretty`, `json`
    pub format: String,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            node_id: "node-0".to_string(),
            distributed_enabled: true,
            cluster_size: 3,
            election: ElectionConfig::default(),
            locks: LockConfig::default(),
            consensus: ConsensusConfig::default(),
            partitioning: PartitionConfig::default(),
            replication: ReplicationConfig::default(),
            monitor: MonitorConfig::default(),
            discovery: DiscoveryConfig::default(),
            queue: QueueConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            maintenance_interval_ms: 1000,
        }
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: 5,
            local_priority: 0,
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_lock_ttl: 30,
        }
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            consensus_timeout: 30,
        }
    }
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self { virtual_nodes: 100 }
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            replication_factor: 3,
            async_lag_ms: 50.0,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            alert_threshold: 0.8,
            failure_timeout: 60,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self { health_interval: 10 }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            visibility_timeout: 30,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8700,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl CoordinationConfig {
    /// Build configuration from defaults overlaid with environment variables.
    ///
    /// When `CLUSTER_CONFIG_FILE` is set the YAML file is loaded first and the
    /// environment still wins.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("CLUSTER_CONFIG_FILE") {
            Ok(path) => Self::from_yaml_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;

        info!(node_id = %config.node_id, "📋 Coordination configuration loaded");
        Ok(config)
    }

    /// Load configuration from a YAML file; missing fields fall back to defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: CoordinationConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(node_id) = std::env::var("CLUSTER_NODE_ID") {
            self.node_id = node_id;
        }
        if let Ok(enabled) = std::env::var("CLUSTER_DISTRIBUTED_ENABLED") {
            self.distributed_enabled = parse_var("CLUSTER_DISTRIBUTED_ENABLED", &enabled)?;
        }
        if let Ok(size) = std::env::var("CLUSTER_SIZE") {
            self.cluster_size = parse_var("CLUSTER_SIZE", &size)?;
        }
        if let Ok(interval) = std::env::var("CLUSTER_HEARTBEAT_INTERVAL") {
            self.election.heartbeat_interval = parse_var("CLUSTER_HEARTBEAT_INTERVAL", &interval)?;
        }
        if let Ok(ttl) = std::env::var("CLUSTER_LOCK_TTL") {
            self.locks.default_lock_ttl = parse_var("CLUSTER_LOCK_TTL", &ttl)?;
        }
        if let Ok(timeout) = std::env::var("CLUSTER_CONSENSUS_TIMEOUT") {
            self.consensus.consensus_timeout = parse_var("CLUSTER_CONSENSUS_TIMEOUT", &timeout)?;
        }
        if let Ok(vnodes) = std::env::var("CLUSTER_VIRTUAL_NODES") {
            self.partitioning.virtual_nodes = parse_var("CLUSTER_VIRTUAL_NODES", &vnodes)?;
        }
        if let Ok(factor) = std::env::var("CLUSTER_REPLICATION_FACTOR") {
            self.replication.replication_factor = parse_var("CLUSTER_REPLICATION_FACTOR", &factor)?;
        }
        if let Ok(threshold) = std::env::var("CLUSTER_ALERT_THRESHOLD") {
            self.monitor.alert_threshold = parse_var("CLUSTER_ALERT_THRESHOLD", &threshold)?;
        }
        if let Ok(retries) = std::env::var("CLUSTER_MAX_RETRIES") {
            self.queue.max_retries = parse_var("CLUSTER_MAX_RETRIES", &retries)?;
        }
        if let Ok(host) = std::env::var("SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("PORT") {
            self.server.port = parse_var("PORT", &port)?;
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            self.logging.format = format;
        }
        Ok(())
    }

    /// Reject configuration that would make the primitives misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(CoordinationError::InvalidConfig(
                "node_id is required".to_string(),
            ));
        }

        if self.partitioning.virtual_nodes == 0 {
            return Err(CoordinationError::InvalidConfig(
                "virtual_nodes must be at least 1".to_string(),
            ));
        }

        if !(self.monitor.alert_threshold > 0.0 && self.monitor.alert_threshold <= 1.0) {
            return Err(CoordinationError::InvalidConfig(format!(
                "alert_threshold must be in (0, 1], got {}",
                self.monitor.alert_threshold
            )));
        }

        if self.queue.max_retries == 0 {
            return Err(CoordinationError::InvalidConfig(
                "max_retries must be at least 1".to_string(),
            ));
        }

        if self.election.heartbeat_interval == 0 {
            return Err(CoordinationError::InvalidConfig(
                "heartbeat_interval must be positive".to_string(),
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(CoordinationError::InvalidConfig(format!(
                    "Invalid log level: {}",
                    other
                )))
            }
        }

        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.election.heartbeat_interval)
    }

    pub fn consensus_timeout(&self) -> Duration {
        Duration::from_secs(self.consensus.consensus_timeout)
    }

    pub fn default_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.locks.default_lock_ttl)
    }

    pub fn failure_timeout(&self) -> Duration {
        Duration::from_secs(self.monitor.failure_timeout)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.discovery.health_interval)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.queue.visibility_timeout)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms.max(1))
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| CoordinationError::InvalidConfig(format!("Invalid {}: {}", name, e)))
}

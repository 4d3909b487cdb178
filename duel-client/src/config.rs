//! Configuration loading for Duelink peers.
//!
//! Configuration is loaded from a TOML file (default: `duelink.toml`).
//! Every section and field is optional.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for a Duelink peer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DuelConfig {
    /// Message reliability configuration.
    #[serde(default)]
    pub reliability: ReliabilityConfig,
    /// Battle session configuration.
    #[serde(default)]
    pub session: SessionConfig,
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
}

/// Message reliability configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReliabilityConfig {
    /// Delay between retransmissions in milliseconds (default: 2000).
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Retransmissions after the initial send (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// How long a received message id is remembered (default: 300).
    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,
    /// Interval between dedup sweeps in seconds (default: 60).
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

/// Battle session configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Seconds to wait for the ready commit after clicking ready (default: 45).
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    /// Seconds between state sync requests while waiting (default: 10).
    #[serde(default = "default_state_sync_interval_secs")]
    pub state_sync_interval_secs: u64,
    /// Display name of the local player (default: "Player").
    #[serde(default = "default_local_name")]
    pub local_name: String,
    /// Fixed battle seed; random when unset.
    pub battle_seed: Option<u64>,
}

/// Connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Backoff for the side with the higher session id, in milliseconds
    /// (default: 2000).
    #[serde(default = "default_collision_backoff_ms")]
    pub collision_backoff_ms: u64,
    /// Consecutive collisions tolerated before giving up (default: 3).
    #[serde(default = "default_max_connect_attempts")]
    pub max_connect_attempts: u32,
}

// Default value functions
fn default_retry_interval_ms() -> u64 {
    2000
}

fn default_max_retries() -> u32 {
    3
}

fn default_dedup_ttl_secs() -> u64 {
    5 * 60 // 5 minutes
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_ready_timeout_secs() -> u64 {
    45
}

fn default_state_sync_interval_secs() -> u64 {
    10
}

fn default_local_name() -> String {
    "Player".to_string()
}

fn default_collision_backoff_ms() -> u64 {
    2000
}

fn default_max_connect_attempts() -> u32 {
    3
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: default_retry_interval_ms(),
            max_retries: default_max_retries(),
            dedup_ttl_secs: default_dedup_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ready_timeout_secs: default_ready_timeout_secs(),
            state_sync_interval_secs: default_state_sync_interval_secs(),
            local_name: default_local_name(),
            battle_seed: None,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            collision_backoff_ms: default_collision_backoff_ms(),
            max_connect_attempts: default_max_connect_attempts(),
        }
    }
}

impl ReliabilityConfig {
    /// Retry interval as a duration.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Dedup TTL as a duration.
    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    /// Cleanup interval as a duration.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl SessionConfig {
    /// Ready timeout as a duration.
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    /// State sync interval as a duration.
    pub fn state_sync_interval(&self) -> Duration {
        Duration::from_secs(self.state_sync_interval_secs)
    }
}

impl ConnectionConfig {
    /// Collision backoff as a duration.
    pub fn collision_backoff(&self) -> Duration {
        Duration::from_millis(self.collision_backoff_ms)
    }
}

impl DuelConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_matches_protocol_constants() {
        let config = DuelConfig::default();
        assert_eq!(config.reliability.retry_interval(), Duration::from_millis(2000));
        assert_eq!(config.reliability.max_retries, 3);
        assert_eq!(config.reliability.dedup_ttl(), Duration::from_secs(300));
        assert_eq!(config.reliability.cleanup_interval(), Duration::from_secs(60));
        assert_eq!(config.session.ready_timeout(), Duration::from_secs(45));
        assert_eq!(config.session.state_sync_interval(), Duration::from_secs(10));
        assert_eq!(config.session.local_name, "Player");
        assert_eq!(config.session.battle_seed, None);
        assert_eq!(config.connection.collision_backoff(), Duration::from_millis(2000));
        assert_eq!(config.connection.max_connect_attempts, 3);
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[reliability]
retry_interval_ms = 500
max_retries = 5

[session]
ready_timeout_secs = 30
local_name = "Ada"
battle_seed = 42

[connection]
max_connect_attempts = 1
"#;

        let config: DuelConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.reliability.retry_interval_ms, 500);
        assert_eq!(config.reliability.max_retries, 5);
        assert_eq!(config.reliability.dedup_ttl_secs, 300);
        assert_eq!(config.session.ready_timeout_secs, 30);
        assert_eq!(config.session.local_name, "Ada");
        assert_eq!(config.session.battle_seed, Some(42));
        assert_eq!(config.connection.max_connect_attempts, 1);
        assert_eq!(config.connection.collision_backoff_ms, 2000);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: DuelConfig = toml::from_str("").unwrap();
        assert_eq!(config.reliability.max_retries, 3);
        assert_eq!(config.session.state_sync_interval_secs, 10);
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[session]\nlocal_name = \"Grace\"").unwrap();

        let config = DuelConfig::from_file(file.path()).unwrap();
        assert_eq!(config.session.local_name, "Grace");
    }

    #[test]
    fn missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(
            DuelConfig::from_file(&path),
            Err(ConfigError::ReadError { .. })
        ));
    }

    #[test]
    fn bad_toml_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[reliability]\nmax_retries = \"many\"").unwrap();
        assert!(matches!(
            DuelConfig::from_file(file.path()),
            Err(ConfigError::ParseError { .. })
        ));
    }
}

//! Configuration for the ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Entity lock configuration
    pub locking: LockConfig,

    /// Busy retry configuration
    pub retry: RetryConfig,

    /// Transaction history configuration
    pub history: HistoryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/capsule-ledger"),
            service_name: "capsule-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDBConfig::default(),
            locking: LockConfig::default(),
            retry: RetryConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,

    /// fsync the WAL on every commit
    pub sync_writes: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 3,
            max_background_jobs: 2,
            enable_statistics: false,
            sync_writes: true,
        }
    }
}

/// Entity lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Maximum wait for a single entity lock (milliseconds)
    pub acquire_timeout_ms: u64,
}

impl LockConfig {
    /// Timeout as a duration
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: 250,
        }
    }
}

/// Retry configuration for busy units of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry (milliseconds)
    pub initial_delay_ms: u64,

    /// Delay cap (milliseconds)
    pub max_delay_ms: u64,

    /// Exponential multiplier
    pub backoff_multiplier: f64,

    /// Jitter as a fraction of the delay
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 5,
            max_delay_ms: 100,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1, // 10% jitter
        }
    }
}

/// Transaction history configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Limit used when the caller gives none
    pub default_limit: usize,

    /// Upper bound on any requested limit
    pub max_limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_limit: 20,
            max_limit: 1_000,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("CAPSULE_LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(timeout) = std::env::var("CAPSULE_LEDGER_LOCK_TIMEOUT_MS") {
            config.locking.acquire_timeout_ms = parse_env("CAPSULE_LEDGER_LOCK_TIMEOUT_MS", &timeout)?;
        }

        if let Ok(retries) = std::env::var("CAPSULE_LEDGER_MAX_RETRIES") {
            config.retry.max_retries = parse_env("CAPSULE_LEDGER_MAX_RETRIES", &retries)?;
        }

        if let Ok(sync) = std::env::var("CAPSULE_LEDGER_SYNC_WRITES") {
            config.rocksdb.sync_writes = parse_env("CAPSULE_LEDGER_SYNC_WRITES", &sync)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot honor
    pub fn validate(&self) -> crate::Result<()> {
        if self.locking.acquire_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "locking.acquire_timeout_ms must be positive".to_string(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(crate::Error::Config(
                "retry.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(crate::Error::Config(
                "retry.jitter_factor must be within [0, 1]".to_string(),
            ));
        }
        if self.history.default_limit == 0 || self.history.default_limit > self.history.max_limit {
            return Err(crate::Error::Config(
                "history.default_limit must be within 1..=history.max_limit".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> crate::Result<T> {
    value
        .parse()
        .map_err(|_| crate::Error::Config(format!("{} has invalid value {:?}", name, value)))
}

//! Configuration management for the storage engine
//!
//! Options load from a TOML file, environment variable overrides
//! (`ACQ_STORE_*`), or defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Longest accepted sweep period (one year)
pub const MAX_OPTIMIZATION_INTERVAL_MINUTES: u64 = 365 * 24 * 60;

/// Storage engine options
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageOptions {
    /// Root directory; one sub-directory per stream
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,

    /// Simultaneous write operations across all streams
    #[serde(default = "default_max_concurrent_writes")]
    pub max_concurrent_writes: usize,

    /// Simultaneous packet writes inside one batch
    #[serde(default = "default_batch_write_concurrency")]
    pub batch_write_concurrency: usize,

    /// Encoded packets larger than this many bytes are compressed
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: usize,

    /// Period of the background retention/optimization sweep
    #[serde(default = "default_optimization_interval_minutes")]
    pub optimization_interval_minutes: u64,

    /// Shards older than this many days are removed by the sweep
    #[serde(default = "default_data_retention_days")]
    pub data_retention_days: u32,

    /// Shards above this size are reported for recompression
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,

    /// Whether the sweep deletes expired shards
    #[serde(default = "default_true")]
    pub enable_auto_cleanup: bool,

    /// Global switch; when false nothing is compressed
    #[serde(default = "default_true")]
    pub enable_compression: bool,

    /// Advisory cache size, reported only
    #[serde(default = "default_cache_size_mb")]
    pub cache_size_mb: u64,

    /// Log level for the CLI (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default value functions
fn default_base_path() -> PathBuf { PathBuf::from("data/storage") }
fn default_max_concurrent_writes() -> usize { 10 }
fn default_batch_write_concurrency() -> usize { 5 }
fn default_compression_threshold() -> usize { 1024 }
fn default_optimization_interval_minutes() -> u64 { 60 }
fn default_data_retention_days() -> u32 { 30 }
fn default_max_file_size_mb() -> u64 { 100 }
fn default_cache_size_mb() -> u64 { 256 }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            max_concurrent_writes: default_max_concurrent_writes(),
            batch_write_concurrency: default_batch_write_concurrency(),
            compression_threshold: default_compression_threshold(),
            optimization_interval_minutes: default_optimization_interval_minutes(),
            data_retention_days: default_data_retention_days(),
            max_file_size_mb: default_max_file_size_mb(),
            enable_auto_cleanup: true,
            enable_compression: true,
            cache_size_mb: default_cache_size_mb(),
            log_level: default_log_level(),
        }
    }
}

impl StorageOptions {
    /// Options rooted at `base_path`, everything else default
    pub fn with_base_path(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Default::default()
        }
    }

    /// Load options from a TOML file
    pub fn from_file(path: &str) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path, e))?;

        toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file {}: {}", path, e))
    }

    /// Load options from a TOML file, then apply environment overrides
    pub fn from_file_with_env(path: &str) -> Result<Self, String> {
        let mut options = Self::from_file(path)?;
        options.apply_env_overrides();
        Ok(options)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Self {
        let mut options = Self::default();
        options.apply_env_overrides();
        options
    }

    /// Apply environment variable overrides
    ///
    /// Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("ACQ_STORE_BASE_PATH") {
            self.base_path = PathBuf::from(path);
        }
        override_parsed("ACQ_STORE_MAX_CONCURRENT_WRITES", &mut self.max_concurrent_writes);
        override_parsed("ACQ_STORE_BATCH_WRITE_CONCURRENCY", &mut self.batch_write_concurrency);
        override_parsed("ACQ_STORE_COMPRESSION_THRESHOLD", &mut self.compression_threshold);
        override_parsed(
            "ACQ_STORE_OPTIMIZATION_INTERVAL_MINUTES",
            &mut self.optimization_interval_minutes,
        );
        override_parsed("ACQ_STORE_RETENTION_DAYS", &mut self.data_retention_days);
        override_parsed("ACQ_STORE_MAX_FILE_SIZE_MB", &mut self.max_file_size_mb);
        override_parsed("ACQ_STORE_AUTO_CLEANUP", &mut self.enable_auto_cleanup);
        override_parsed("ACQ_STORE_COMPRESSION", &mut self.enable_compression);

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.log_level = log_level;
        }
    }

    /// Validate option values
    pub fn validate(&self) -> Result<(), String> {
        if self.base_path.as_os_str().is_empty() {
            return Err("Base path cannot be empty".to_string());
        }
        if self.max_concurrent_writes == 0 {
            return Err("Max concurrent writes must be > 0".to_string());
        }
        if self.batch_write_concurrency == 0 {
            return Err("Batch write concurrency must be > 0".to_string());
        }
        if self.batch_write_concurrency > self.max_concurrent_writes {
            return Err(format!(
                "Batch write concurrency ({}) cannot exceed max concurrent writes ({})",
                self.batch_write_concurrency, self.max_concurrent_writes
            ));
        }
        if self.optimization_interval_minutes == 0 {
            return Err("Optimization interval must be > 0".to_string());
        }
        if self.optimization_interval_minutes > MAX_OPTIMIZATION_INTERVAL_MINUTES {
            return Err(format!(
                "Optimization interval ({} min) cannot exceed {} min",
                self.optimization_interval_minutes, MAX_OPTIMIZATION_INTERVAL_MINUTES
            ));
        }
        if self.max_file_size_mb == 0 {
            return Err("Max file size must be > 0".to_string());
        }
        Ok(())
    }

    /// Save options to a TOML file
    pub fn save_to_file(&self, path: &str) -> Result<(), String> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        std::fs::write(path, contents)
            .map_err(|e| format!("Failed to write config file {}: {}", path, e))
    }

    /// Sweep period
    pub fn optimization_interval(&self) -> Duration {
        Duration::from_secs(self.optimization_interval_minutes.saturating_mul(60))
    }

    /// Max shard size in bytes
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }

    /// Shards below this size count as small
    pub fn small_file_size_bytes(&self) -> u64 {
        self.max_file_size_bytes() / 10
    }
}

fn override_parsed<T: std::str::FromStr>(var: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(var) {
        if let Ok(value) = raw.parse() {
            *target = value;
        }
    }
}

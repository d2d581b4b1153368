/*!
 * Configuration structures and defaults for the ingestion engine
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{IngestError, Result};
use crate::types::{ScanOptions, SymlinkStrategy};

/// Log verbosity, mirrored onto a `tracing::Level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Sizing knobs handed to `ingest_resilience::BufferPool` and `ThreadPoolManager`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfiguration {
    pub buffer_default_size: usize,
    pub buffer_max_count: usize,
    pub buffer_min_size: usize,
    pub buffer_max_size: usize,
    pub memory_pressure_threshold: f64,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            buffer_default_size: 64 * 1024,
            buffer_max_count: 64,
            buffer_min_size: 1024,
            buffer_max_size: 1024 * 1024,
            memory_pressure_threshold: 0.9,
        }
    }
}

impl PoolConfiguration {
    pub fn to_buffer_pool_config(&self) -> ingest_resilience::BufferPoolConfig {
        ingest_resilience::BufferPoolConfig {
            default_size: self.buffer_default_size,
            max_buffers: self.buffer_max_count,
            min_buffer_size: self.buffer_min_size,
            max_buffer_size: self.buffer_max_size,
        }
    }
}

/// Batch scheduler sizing/strategy knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BatchConfiguration {
    pub base_batch_size: usize,
    pub min_batch_size: usize,
    pub max_concurrent_batches: usize,
}

impl Default for BatchConfiguration {
    fn default() -> Self {
        Self {
            base_batch_size: 32,
            min_batch_size: 1,
            max_concurrent_batches: 8,
        }
    }
}

/// Root runtime configuration: pool sizing, batch scheduling, default scan behavior, and logging.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub pool: PoolConfiguration,
    pub batch: BatchConfiguration,
    pub scan: ScanOptions,
    pub log_level: LogLevel,
    pub log_file: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfiguration::default(),
            batch: BatchConfiguration::default(),
            scan: ScanOptions::default(),
            log_level: LogLevel::default(),
            log_file: None,
        }
    }
}

/// On-disk (TOML) shape of the configuration file; every field is optional so a partial file
/// only overrides what it names, falling through to `RuntimeConfig::default()` otherwise.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub pool: PoolFileSection,
    #[serde(default)]
    pub batch: BatchFileSection,
    #[serde(default)]
    pub scan: ScanFileSection,
    #[serde(default)]
    pub log_level: Option<LogLevel>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PoolFileSection {
    pub buffer_default_size: Option<usize>,
    pub buffer_max_count: Option<usize>,
    pub memory_pressure_threshold: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BatchFileSection {
    pub base_batch_size: Option<usize>,
    pub max_concurrent_batches: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScanFileSection {
    pub max_depth: Option<usize>,
    pub include_pattern: Option<String>,
    pub exclude_pattern: Option<String>,
    pub include_hidden: Option<bool>,
    pub symlink_strategy: Option<String>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| IngestError::Config(format!("failed to read config file: {e}")))?;
        toml::from_str(&content)
            .map_err(|e| IngestError::Config(format!("failed to parse config file: {e}")))
    }

    /// Applies this file's overrides onto an otherwise-default `RuntimeConfig`. CLI flags are
    /// applied after this by the binary, so they take precedence over the file.
    pub fn apply_to(&self, config: &mut RuntimeConfig) {
        if let Some(size) = self.pool.buffer_default_size {
            config.pool.buffer_default_size = size;
        }
        if let Some(count) = self.pool.buffer_max_count {
            config.pool.buffer_max_count = count;
        }
        if let Some(threshold) = self.pool.memory_pressure_threshold {
            config.pool.memory_pressure_threshold = threshold;
        }

        if let Some(size) = self.batch.base_batch_size {
            config.batch.base_batch_size = size;
        }
        if let Some(max) = self.batch.max_concurrent_batches {
            config.batch.max_concurrent_batches = max;
        }

        if let Some(depth) = self.scan.max_depth {
            config.scan.max_depth = depth;
        }
        if self.scan.include_pattern.is_some() {
            config.scan.include_pattern = self.scan.include_pattern.clone();
        }
        if self.scan.exclude_pattern.is_some() {
            config.scan.exclude_pattern = self.scan.exclude_pattern.clone();
        }
        if let Some(hidden) = self.scan.include_hidden {
            config.scan.include_hidden = hidden;
        }
        if let Some(ref strategy) = self.scan.symlink_strategy {
            config.scan.symlink_strategy = match strategy.as_str() {
                "follow" => SymlinkStrategy::Follow,
                "skip" => SymlinkStrategy::Skip,
                _ => SymlinkStrategy::Record,
            };
        }

        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if self.log_file.is_some() {
            config.log_file = self.log_file.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_runtime_config_has_sane_pool_bounds() {
        let config = RuntimeConfig::default();
        assert!(config.pool.buffer_min_size < config.pool.buffer_max_size);
        assert_eq!(config.batch.min_batch_size, 1);
    }

    #[test]
    fn config_file_overrides_only_named_fields() {
        let toml_str = r#"
            log_level = "debug"

            [pool]
            buffer_max_count = 128
        "#;
        let file: ConfigFile = toml::from_str(toml_str).unwrap();
        let mut config = RuntimeConfig::default();
        file.apply_to(&mut config);

        assert_eq!(config.pool.buffer_max_count, 128);
        assert_eq!(config.log_level, LogLevel::Debug);
        // Untouched field keeps its default.
        assert_eq!(
            config.pool.buffer_default_size,
            PoolConfiguration::default().buffer_default_size
        );
    }

    #[test]
    fn pool_configuration_maps_to_resilience_crate_config() {
        let pool = PoolConfiguration::default();
        let resilience_config = pool.to_buffer_pool_config();
        assert_eq!(resilience_config.default_size, pool.buffer_default_size);
        assert_eq!(resilience_config.max_buffers, pool.buffer_max_count);
    }
}

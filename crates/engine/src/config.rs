//! Node configuration via `tideline.toml`
//!
//! On first open a default `tideline.toml` is written into the data
//! directory. To change settings, edit the file and restart.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use std::time::Duration;
use tideline_core::{Durability, Error, Result};
use tideline_durability::WalConfig;
use tideline_storage::HighwaterConfig;

/// Config file name placed in the node data directory.
pub const CONFIG_FILE_NAME: &str = "tideline.toml";

/// Node configuration loaded from `tideline.toml`.
///
/// # Example
///
/// ```toml
/// durability = "async"
/// fsync_interval_ms = 100
///
/// [highwater]
/// shards = 16
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TidelineConfig {
    /// Local ring member id. Generated and persisted when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<String>,
    /// Default WAL durability: `"async"`, `"always"` or `"none"`.
    #[serde(default = "default_durability_str")]
    pub durability: String,
    /// Fsync interval for `"async"` durability.
    #[serde(default = "default_fsync_interval_ms")]
    pub fsync_interval_ms: u64,
    /// Scan read-ahead per WAL reader.
    #[serde(default = "default_read_buffer_bytes")]
    pub read_buffer_bytes: usize,
    /// Largest encoded row accepted by an append.
    #[serde(default = "default_max_row_bytes")]
    pub max_row_bytes: usize,
    /// Most rows returned by one take.
    #[serde(default = "default_take_batch_rows")]
    pub take_batch_rows: usize,
    /// Highwater store settings.
    #[serde(default)]
    pub highwater: HighwaterSection,
}

/// `[highwater]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighwaterSection {
    /// Number of update shards.
    #[serde(default = "default_shards")]
    pub shards: usize,
    /// Journal size that triggers compaction.
    #[serde(default = "default_compact_bytes")]
    pub compact_bytes: u64,
    /// How often the background flusher makes highwaters durable.
    /// Zero disables the flusher.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

fn default_durability_str() -> String {
    "async".to_string()
}

fn default_fsync_interval_ms() -> u64 {
    100
}

fn default_read_buffer_bytes() -> usize {
    64 * 1024
}

fn default_max_row_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_take_batch_rows() -> usize {
    1000
}

fn default_shards() -> usize {
    HighwaterConfig::default().shard_count
}

fn default_compact_bytes() -> u64 {
    HighwaterConfig::default().compact_threshold_bytes
}

fn default_flush_interval_ms() -> u64 {
    1000
}

impl Default for HighwaterSection {
    fn default() -> Self {
        HighwaterSection {
            shards: default_shards(),
            compact_bytes: default_compact_bytes(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl Default for TidelineConfig {
    fn default() -> Self {
        TidelineConfig {
            member: None,
            durability: default_durability_str(),
            fsync_interval_ms: default_fsync_interval_ms(),
            read_buffer_bytes: default_read_buffer_bytes(),
            max_row_bytes: default_max_row_bytes(),
            take_batch_rows: default_take_batch_rows(),
            highwater: HighwaterSection::default(),
        }
    }
}

impl TidelineConfig {
    /// Small buffers, synchronous fsync, no background flusher.
    pub fn for_testing() -> Self {
        TidelineConfig {
            durability: "always".to_string(),
            read_buffer_bytes: 4096,
            max_row_bytes: 1024 * 1024,
            take_batch_rows: 100,
            highwater: HighwaterSection {
                shards: 4,
                compact_bytes: 4096,
                flush_interval_ms: 0,
            },
            ..Self::default()
        }
    }

    /// Parse the durability string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not `"async"`, `"always"` or `"none"`.
    pub fn durability_mode(&self) -> Result<Durability> {
        match self.durability.as_str() {
            "async" => Ok(Durability::FsyncAsync {
                interval_ms: self.fsync_interval_ms,
            }),
            "always" => Ok(Durability::FsyncAlways),
            "none" => Ok(Durability::Ephemeral),
            other => Err(Error::invalid_input(format!(
                "Invalid durability mode '{}' in {}. Expected \"async\", \"always\" or \"none\".",
                other, CONFIG_FILE_NAME
            ))),
        }
    }

    /// WAL settings for partitions without their own durability.
    pub fn wal_config(&self) -> Result<WalConfig> {
        let config = WalConfig::new()
            .with_durability(self.durability_mode()?)
            .with_read_buffer_size(self.read_buffer_bytes)
            .with_max_row_bytes(self.max_row_bytes);
        config
            .validate()
            .map_err(|e| Error::invalid_input(e.to_string()))?;
        Ok(config)
    }

    /// Highwater store settings.
    pub fn highwater_config(&self) -> Result<HighwaterConfig> {
        let config = HighwaterConfig::new()
            .with_shard_count(self.highwater.shards)
            .with_compact_threshold_bytes(self.highwater.compact_bytes);
        config
            .validate()
            .map_err(|e| Error::invalid_input(e.to_string()))?;
        Ok(config)
    }

    /// Background flush period, `None` when disabled.
    pub fn flush_interval(&self) -> Option<Duration> {
        match self.highwater.flush_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Check every setting.
    pub fn validate(&self) -> Result<()> {
        self.wal_config()?;
        self.highwater_config()?;
        if self.take_batch_rows == 0 {
            return Err(Error::invalid_input("take_batch_rows must be at least 1"));
        }
        if let Some(member) = &self.member {
            if member.is_empty() {
                return Err(Error::invalid_input("member must not be empty"));
            }
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Tideline node configuration
#
# Local ring member id. Generated on first open when absent.
# member = "node-a"

# Default WAL durability: "async" (default), "always" or "none"
#   "async"  = fsync every fsync_interval_ms, may lose the last interval on crash
#   "always" = fsync every append
#   "none"   = never fsync
durability = "async"
fsync_interval_ms = 100

# Scan read-ahead per WAL reader, in bytes
read_buffer_bytes = 65536

# Largest encoded row accepted by an append, in bytes
max_row_bytes = 16777216

# Most rows returned by one take
take_batch_rows = 1000

[highwater]
shards = 16
# Journal size that triggers compaction, in bytes
compact_bytes = 4194304
# Background flush period; 0 disables the flusher
flush_interval_ms = 1000
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Io(io::Error::new(
                e.kind(),
                format!("Failed to read config file '{}': {}", path.display(), e),
            ))
        })?;
        let config: TidelineConfig = toml::from_str(&content).map_err(|e| {
            Error::invalid_input(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::Io(io::Error::new(
                    e.kind(),
                    format!("Failed to write default config file '{}': {}", path.display(), e),
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Io(io::Error::new(
                e.kind(),
                format!("Failed to write config file '{}': {}", path.display(), e),
            ))
        })
    }
}

//! Highwater store configuration.

/// Highwater store configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighwaterConfig {
    /// Number of update shards (default: 16).
    ///
    /// `set_if_larger` and `flush` pick their shard as
    /// `delta_index % shard_count`.
    pub shard_count: usize,

    /// Journal size that triggers a compaction rewrite (default: 4MB).
    pub compact_threshold_bytes: u64,
}

impl Default for HighwaterConfig {
    fn default() -> Self {
        HighwaterConfig {
            shard_count: 16,
            compact_threshold_bytes: 4 * 1024 * 1024, // 4MB
        }
    }
}

impl HighwaterConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set shard count (builder pattern).
    pub fn with_shard_count(mut self, shard_count: usize) -> Self {
        self.shard_count = shard_count;
        self
    }

    /// Set compaction threshold (builder pattern).
    pub fn with_compact_threshold_bytes(mut self, bytes: u64) -> Self {
        self.compact_threshold_bytes = bytes;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), HighwaterConfigError> {
        if self.shard_count == 0 {
            return Err(HighwaterConfigError::NoShards);
        }
        if self.compact_threshold_bytes < 1024 {
            return Err(HighwaterConfigError::ThresholdTooSmall);
        }
        Ok(())
    }

    /// Create a configuration for testing (few shards, eager compaction).
    pub fn for_testing() -> Self {
        HighwaterConfig {
            shard_count: 4,
            compact_threshold_bytes: 4 * 1024,
        }
    }
}

/// Highwater configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HighwaterConfigError {
    /// At least one shard is required.
    #[error("Shard count must be at least 1")]
    NoShards,

    /// Compaction threshold below 1KB.
    #[error("Compaction threshold must be at least 1KB")]
    ThresholdTooSmall,
}

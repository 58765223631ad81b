//! Per-partition configuration options: a plain struct with a `Default` impl.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default size of a Pool chunk in bytes: large enough to amortize allocation
/// overhead for undo quanta and scratch strings without wasting too much
/// memory per transaction.
pub const DEFAULT_POOL_CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// Fixed size of every `LttBlock`: 8 MiB.
pub const LTT_BLOCK_SIZE_BYTES: usize = 8 * 1024 * 1024;

/// Byte size of the `LttBlock` header: 8 bytes for the block's base address
/// plus 4 bytes for the tuple count.
pub const LTT_BLOCK_HEADER_SIZE: usize = 8 + 4;

/// Upper bound on the UndoLog's free-list of recyclable Pools.
pub const DEFAULT_MAX_CACHED_POOLS: usize = 192;

/// Configuration for a single partition-local execution core instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Byte budget shared by the `LttBlockCache` (`tempTableMemoryLimit`).
    pub temp_table_memory_limit: usize,
    /// Initial capacity for stream allocation (`defaultDrBufferSize`).
    pub default_dr_buffer_size: usize,
    /// Optional secondary ("large") capacity for streams, used when a single
    /// transaction exceeds `default_dr_buffer_size`.
    pub large_dr_buffer_size: Option<usize>,
    /// Maximum buffer size a stream will ever allocate; rows larger than this
    /// are rejected with a recoverable `TupleStreamException`-equivalent.
    pub max_dr_buffer_size: usize,
    /// Interval between periodic flushes of pending stream rows.
    pub flush_interval: Duration,
    /// Upper bound on the UndoLog's free-list of recyclable Pools.
    pub max_cached_pools: usize,
    /// Chunk size used by every Pool this core allocates.
    pub pool_chunk_size: usize,
    /// Maximum number of chunks a Pool retains across `purge()`.
    pub pool_max_chunk_count: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            temp_table_memory_limit: 100 * 1024 * 1024,
            default_dr_buffer_size: 128 * 1024,
            large_dr_buffer_size: Some(2 * 1024 * 1024),
            max_dr_buffer_size: 2 * 1024 * 1024,
            flush_interval: Duration::from_millis(1000),
            max_cached_pools: DEFAULT_MAX_CACHED_POOLS,
            pool_chunk_size: DEFAULT_POOL_CHUNK_SIZE,
            pool_max_chunk_count: 1,
        }
    }
}

impl CoreConfig {
    /// Serialize to pretty-printed JSON, for a human-readable config file on
    /// disk (`serde_json::to_string_pretty`, matching the checkpoint metadata
    /// format used elsewhere in this stack).
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a config previously written by [`Self::to_json`].
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_json() {
        let mut config = CoreConfig::default();
        config.temp_table_memory_limit = 42 * 1024 * 1024;
        config.max_dr_buffer_size = 777;

        let json = config.to_json().unwrap();
        let restored = CoreConfig::from_json(&json).unwrap();

        assert_eq!(restored.temp_table_memory_limit, config.temp_table_memory_limit);
        assert_eq!(restored.max_dr_buffer_size, config.max_dr_buffer_size);
        assert_eq!(restored.flush_interval, config.flush_interval);
        assert_eq!(restored.pool_chunk_size, config.pool_chunk_size);
    }

    #[test]
    fn from_json_rejects_malformed_input() {
        assert!(CoreConfig::from_json("not json").is_err());
    }
}

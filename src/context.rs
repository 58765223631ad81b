//! `ExecutorContext` — per-partition ambient state.
//!
//! Everything an executing fragment reaches for without it being threaded
//! through every call: the current undo quantum, a scratch Pool for
//! temporary strings, transaction identity, and the large-temp-table block
//! cache. One instance lives per partition for the life of the process.

use crate::ltt::LttBlockCache;
use crate::pool::Pool;
use crate::undo::UndoLog;

/// Per-partition ambient state threaded through fragment execution.
pub struct ExecutorContext {
    partition_id: i32,
    site_id: i64,
    cluster_id: i32,
    temp_string_pool: Pool,
    undo_log: UndoLog,
    ltt_cache: LttBlockCache,
    current_txn_id: i64,
    current_sp_handle: i64,
    current_unique_id: i64,
}

impl ExecutorContext {
    pub fn new(
        partition_id: i32,
        site_id: i64,
        cluster_id: i32,
        config: &crate::config::CoreConfig,
    ) -> Self {
        Self {
            partition_id,
            site_id,
            cluster_id,
            temp_string_pool: Pool::new(config.pool_chunk_size, config.pool_max_chunk_count),
            undo_log: UndoLog::new(config),
            ltt_cache: LttBlockCache::new(config.temp_table_memory_limit, site_id as u32),
            current_txn_id: -1,
            current_sp_handle: -1,
            current_unique_id: -1,
        }
    }

    pub fn partition_id(&self) -> i32 {
        self.partition_id
    }

    pub fn site_id(&self) -> i64 {
        self.site_id
    }

    pub fn undo_log(&self) -> &UndoLog {
        &self.undo_log
    }

    pub fn undo_log_mut(&mut self) -> &mut UndoLog {
        &mut self.undo_log
    }

    pub fn ltt_cache_mut(&mut self) -> &mut LttBlockCache {
        &mut self.ltt_cache
    }

    pub fn temp_string_pool_mut(&mut self) -> &mut Pool {
        &mut self.temp_string_pool
    }

    /// Mark the start of a new transaction/fragment batch: remember its
    /// identity so later calls (undo action registration, DR timestamping)
    /// can reach it without it being re-passed on every call.
    pub fn set_current_txn(&mut self, txn_id: i64, sp_handle: i64, unique_id: i64) {
        self.current_txn_id = txn_id;
        self.current_sp_handle = sp_handle;
        self.current_unique_id = unique_id;
    }

    pub fn current_txn_id(&self) -> i64 {
        self.current_txn_id
    }

    pub fn current_sp_handle(&self) -> i64 {
        self.current_sp_handle
    }

    pub fn current_unique_id(&self) -> i64 {
        self.current_unique_id
    }

    /// `(clusterId << 49) | (uniqueId >> 14)`. The unique id
    /// packs a millisecond timestamp into its high bits; shifting it down by
    /// 14 and prefixing the cluster id yields a globally-ordered DR
    /// timestamp comparable across clusters.
    pub fn dr_timestamp(&self) -> i64 {
        ((self.cluster_id as i64) << 49) | (self.current_unique_id >> 14)
    }

    /// Reset between transactions: purge the scratch pool so its chunks are
    /// reused, and clear the current transaction identity.
    pub fn finish_transaction(&mut self) {
        self.temp_string_pool.purge();
        self.current_txn_id = -1;
        self.current_sp_handle = -1;
        self.current_unique_id = -1;
    }
}

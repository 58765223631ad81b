//! `LargeTempTable` — an ordered sequence of `LttBlock`s sharing one tuple
//! shape, backed by an `LttBlockCache`. Mirrors `storage/LargeTempTable.h`/`.cpp`.

use crate::error::{CoreError, Result};
use crate::ltt::block::{BlockId, TupleView};
use crate::ltt::cache::LttBlockCache;
use crate::topend::TopEnd;

/// A temp table whose tuples may not fit in memory all at once. Tuples are
/// opaque bytes of a fixed inline length plus a fixed count of non-inlined
/// reference slots, matching [`crate::ltt::block::LttBlock`]'s tuple shape;
/// any typed schema lives above this core.
pub struct LargeTempTable {
    inline_len: usize,
    non_inlined_count: usize,
    block_ids: Vec<BlockId>,
    current_block: Option<BlockId>,
    finished_inserts: bool,
    tuple_count: i64,
}

impl LargeTempTable {
    pub fn new(inline_len: usize, non_inlined_count: usize) -> Self {
        Self {
            inline_len,
            non_inlined_count,
            block_ids: Vec::new(),
            current_block: None,
            finished_inserts: false,
            tuple_count: 0,
        }
    }

    pub fn inline_len(&self) -> usize {
        self.inline_len
    }

    pub fn non_inlined_count(&self) -> usize {
        self.non_inlined_count
    }

    pub fn tuple_count(&self) -> i64 {
        self.tuple_count
    }

    pub fn block_ids(&self) -> &[BlockId] {
        &self.block_ids
    }

    pub fn is_empty(&self) -> bool {
        self.block_ids.is_empty()
    }

    /// Hand the block-id sequence to a caller that's about to reorder or
    /// replace it wholesale (the sort entry point). The table is left with
    /// no blocks and an open write cursor, mirroring a freshly-constructed
    /// table until [`Self::set_block_ids`] restores one.
    pub fn take_block_ids(&mut self) -> Vec<BlockId> {
        self.current_block = None;
        std::mem::take(&mut self.block_ids)
    }

    pub fn set_block_ids(&mut self, block_ids: Vec<BlockId>) {
        self.block_ids = block_ids;
    }

    /// Overwrite the tuple count directly, for a caller (the sort entry
    /// point) that just replaced the block sequence wholesale and knows the
    /// new total from having built it.
    pub fn set_tuple_count(&mut self, tuple_count: i64) {
        self.tuple_count = tuple_count;
    }

    /// Append one tuple, acquiring a new writable block on the first insert
    /// or when the current one fills up (`insert`). A row that
    /// doesn't fit even a brand-new empty block is a user error, not a
    /// fatal one: the caller handed us something larger than a block.
    pub fn insert(
        &mut self,
        cache: &mut LttBlockCache,
        topend: &mut dyn TopEnd,
        inline: &[u8],
        non_inlined_payloads: &[Vec<u8>],
    ) -> Result<()> {
        if self.finished_inserts {
            fatal!("LargeTempTable::insert: table has already finished inserts");
        }

        let id = match self.current_block {
            Some(id) => id,
            None => {
                let id = cache.get_empty_block(topend, self.inline_len, self.non_inlined_count)?;
                self.block_ids.push(id);
                self.current_block = Some(id);
                id
            }
        };

        if cache.block_mut(id)?.insert(inline, non_inlined_payloads)? {
            self.tuple_count += 1;
            return Ok(());
        }

        if cache.block(id)?.active_tuple_count() == 0 {
            return Err(CoreError::capacity(
                "LargeTempTable::insert: row does not fit in an empty block",
            ));
        }

        cache.unpin(id)?;
        self.current_block = None;
        let fresh_id = cache.get_empty_block(topend, self.inline_len, self.non_inlined_count)?;
        self.block_ids.push(fresh_id);
        self.current_block = Some(fresh_id);

        if !cache.block_mut(fresh_id)?.insert(inline, non_inlined_payloads)? {
            fatal!("LargeTempTable::insert: row does not fit a fresh empty block");
        }
        self.tuple_count += 1;
        Ok(())
    }

    /// Unpin the currently-writable block, if any, and mark the table
    /// closed to further inserts. Idempotent (`finishInserts`).
    pub fn finish_inserts(&mut self, cache: &mut LttBlockCache) -> Result<()> {
        if let Some(id) = self.current_block.take() {
            cache.unpin(id)?;
        }
        self.finished_inserts = true;
        Ok(())
    }

    /// Drop every block this table owns, releasing each from the cache.
    pub fn delete_all_tuples(&mut self, cache: &mut LttBlockCache, topend: &mut dyn TopEnd) -> Result<()> {
        if let Some(id) = self.current_block.take() {
            cache.unpin(id)?;
        }
        for id in self.block_ids.drain(..) {
            if cache.block(id)?.is_pinned() {
                cache.unpin(id)?;
            }
            cache.release(topend, id)?;
        }
        self.tuple_count = 0;
        self.finished_inserts = true;
        Ok(())
    }

    /// Walk every active tuple in block order, fetching (and pinning) each
    /// block in turn. With `delete_as_you_go`, a block is released from the
    /// cache entirely once its last tuple has been yielded, rather than left
    /// resident for a caller to re-scan (the two iteration modes).
    pub fn scan<F>(
        &mut self,
        cache: &mut LttBlockCache,
        topend: &mut dyn TopEnd,
        delete_as_you_go: bool,
        mut visit: F,
    ) -> Result<()>
    where
        F: FnMut(&TupleView) -> Result<()>,
    {
        if !self.finished_inserts {
            fatal!("LargeTempTable::scan: finish_inserts must run before scanning");
        }
        let ids = self.block_ids.clone();
        for id in ids {
            cache.fetch(topend, id)?;
            let count = cache.block(id)?.active_tuple_count() as usize;
            for index in 0..count {
                let tuple = cache.block(id)?.tuple(index)?;
                if tuple.active {
                    visit(&tuple)?;
                }
            }
            cache.unpin(id)?;
            if delete_as_you_go {
                cache.release(topend, id)?;
            }
        }
        if delete_as_you_go {
            self.block_ids.clear();
            self.tuple_count = 0;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ltt::cache::LttBlockCache;
    use std::collections::HashMap as StdHashMap;

    #[derive(Default)]
    struct RecordingTopEnd {
        stored: StdHashMap<BlockId, Vec<u8>>,
    }

    impl TopEnd for RecordingTopEnd {
        fn load_next_dependency(&mut self, _dep_id: i32, _dest: &mut Vec<u8>) -> Result<bool> {
            Ok(false)
        }
        fn fragment_progress_update(
            &mut self,
            _batch_index: i32,
            _node_type: &str,
            _tuples_processed: i64,
            _current_mem_bytes: i64,
            _peak_mem_bytes: i64,
        ) -> crate::topend::ProgressDecision {
            crate::topend::ProgressDecision::ContinueAfter(1_000_000)
        }
        fn plan_for_fragment_id(&mut self, _fragment_id: i64) -> Vec<u8> {
            Vec::new()
        }
        fn push_export_buffer(&mut self, _partition_id: i32, _table_name: &str, _block: Vec<u8>) -> Result<()> {
            Ok(())
        }
        fn push_dr_buffer(&mut self, _partition_id: i32, _block: Vec<u8>) -> Result<i64> {
            Ok(0)
        }
        fn store_large_temp_table_block(&mut self, block: &crate::ltt::block::LttBlock) -> Result<bool> {
            self.stored.insert(block.id(), block.raw_bytes()?.to_vec());
            Ok(true)
        }
        fn load_large_temp_table_block(&mut self, block_id: crate::topend::LttBlockId) -> Result<Option<Vec<u8>>> {
            Ok(self.stored.get(&block_id).cloned())
        }
        fn release_large_temp_table_block(&mut self, block_id: crate::topend::LttBlockId) -> Result<bool> {
            self.stored.remove(&block_id);
            Ok(true)
        }
    }

    #[test]
    fn insert_then_scan_returns_rows_in_order() {
        let mut topend = RecordingTopEnd::default();
        let mut cache = LttBlockCache::new(crate::config::LTT_BLOCK_SIZE_BYTES * 4, 1);
        let mut table = LargeTempTable::new(4, 0);

        for i in 0..10u32 {
            table
                .insert(&mut cache, &mut topend, &i.to_le_bytes(), &[])
                .unwrap();
        }
        table.finish_inserts(&mut cache).unwrap();
        assert_eq!(table.tuple_count(), 10);

        let mut seen = Vec::new();
        table
            .scan(&mut cache, &mut topend, false, |tuple| {
                seen.push(u32::from_le_bytes(tuple.inline.clone().try_into().unwrap()));
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        assert_eq!(table.block_ids().len(), 1);
    }

    #[test]
    fn delete_as_you_go_releases_blocks_as_it_scans() {
        let mut topend = RecordingTopEnd::default();
        let mut cache = LttBlockCache::new(crate::config::LTT_BLOCK_SIZE_BYTES * 4, 1);
        let mut table = LargeTempTable::new(4, 0);
        table.insert(&mut cache, &mut topend, &1u32.to_le_bytes(), &[]).unwrap();
        table.finish_inserts(&mut cache).unwrap();

        let mut seen = 0;
        table
            .scan(&mut cache, &mut topend, true, |_tuple| {
                seen += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, 1);
        assert_eq!(table.block_ids().len(), 0);
        assert_eq!(cache.block_count(), 0);
    }

    #[test]
    fn insert_after_finish_inserts_is_an_error() {
        let mut topend = RecordingTopEnd::default();
        let mut cache = LttBlockCache::new(crate::config::LTT_BLOCK_SIZE_BYTES * 2, 1);
        let mut table = LargeTempTable::new(4, 0);
        table.finish_inserts(&mut cache).unwrap();
        assert!(table
            .insert(&mut cache, &mut topend, &[0, 0, 0, 0], &[])
            .is_err());
    }
}

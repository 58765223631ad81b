//! `LttBlockCache` — a bounded, LRU-ordered cache of `LttBlock`s.
//!
//! A bounded, LRU-ordered cache of `LttBlock`s, spilling to and reloading
//! from the top end when over budget. Mirrors `common/LargeTempTableBlockCache.h`/`.cpp`.

use std::collections::HashMap;

use crate::error::{CoreError, Result};
use crate::ltt::block::{BlockId, LttBlock};
use crate::topend::{LttBlockId, TopEnd};

const BLOCK_SIZE_BYTES: usize = crate::config::LTT_BLOCK_SIZE_BYTES;

/// LRU-ordered cache of large temp table blocks, bounded by a byte budget.
/// The least-recently-referenced block is at the front of `order`, the most
/// recent at the back.
pub struct LttBlockCache {
    budget_bytes: usize,
    allocated_bytes: usize,
    next_id: BlockId,
    order: Vec<BlockId>,
    blocks: HashMap<BlockId, LttBlock>,
    cache_hits: u64,
    cache_misses: u64,
}

impl LttBlockCache {
    pub fn new(budget_bytes: usize, site_id: u32) -> Self {
        Self {
            budget_bytes,
            allocated_bytes: 0,
            next_id: (site_id as u64) << 32,
            order: Vec::new(),
            blocks: HashMap::new(),
            cache_hits: 0,
            cache_misses: 0,
        }
    }

    pub fn allocated_memory(&self) -> usize {
        self.allocated_bytes
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses
    }

    pub fn block_count(&self) -> usize {
        self.order.len()
    }

    /// Total blocks the budget admits, reserving none for output (a caller
    /// doing a k-way merge reserves one of these for the output run itself).
    pub fn capacity_in_blocks(&self) -> usize {
        (self.budget_bytes / BLOCK_SIZE_BYTES).max(1)
    }

    /// Public access to a resident-or-not block, for callers (table/sort)
    /// that already hold a pin on it and don't need cache bookkeeping.
    pub fn block(&self, id: BlockId) -> Result<&LttBlock> {
        self.get_block(id)
    }

    pub fn block_mut(&mut self, id: BlockId) -> Result<&mut LttBlock> {
        self.get_block_mut(id)
    }

    fn next_block_id(&mut self) -> BlockId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn move_to_tail(&mut self, id: BlockId) {
        if let Some(pos) = self.order.iter().position(|&x| x == id) {
            self.order.remove(pos);
        }
        self.order.push(id);
    }

    /// Evict one unpinned resident block if the cache is over budget
    /// Fails fatally if there's nothing evictable.
    fn ensure_space_for_new_block(&mut self, topend: &mut dyn TopEnd) -> Result<()> {
        if self.allocated_bytes + BLOCK_SIZE_BYTES <= self.budget_bytes {
            return Ok(());
        }

        for &id in self.order.iter().rev() {
            let block = self.blocks.get_mut(&id).expect("order and blocks stay in sync");
            if block.is_pinned() || !block.is_resident() {
                continue;
            }
            if !block.is_stored() {
                block.stamp_header()?;
                let stored = topend.store_large_temp_table_block(block)?;
                if !stored {
                    fatal!("LttBlockCache: top end failed to store block {}", id);
                }
            }
            block.release_data()?;
            self.allocated_bytes -= BLOCK_SIZE_BYTES;
            return Ok(());
        }

        fatal!("LttBlockCache: no unpinned block available to evict");
    }

    /// Allocate a brand-new, pinned, empty block.
    pub fn get_empty_block(
        &mut self,
        topend: &mut dyn TopEnd,
        inline_len: usize,
        non_inlined_count: usize,
    ) -> Result<BlockId> {
        self.ensure_space_for_new_block(topend)?;
        let id = self.next_block_id();
        let mut block = LttBlock::new(id, inline_len, non_inlined_count);
        block.pin()?;
        self.blocks.insert(id, block);
        self.order.push(id);
        self.allocated_bytes += BLOCK_SIZE_BYTES;
        Ok(id)
    }

    fn get_block(&self, id: BlockId) -> Result<&LttBlock> {
        self.blocks
            .get(&id)
            .ok_or_else(|| CoreError::not_found(format!("LttBlockCache: unknown block {}", id)))
    }

    fn get_block_mut(&mut self, id: BlockId) -> Result<&mut LttBlock> {
        self.blocks
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found(format!("LttBlockCache: unknown block {}", id)))
    }

    /// Fetch and pin a block, reloading it from the top end if it isn't
    /// resident, and touching it as most-recently-used.
    pub fn fetch(&mut self, topend: &mut dyn TopEnd, id: BlockId) -> Result<&LttBlock> {
        if !self.get_block(id)?.is_resident() {
            self.cache_misses += 1;
            self.ensure_space_for_new_block(topend)?;
            let bytes = topend
                .load_large_temp_table_block(id)?
                .ok_or_else(|| CoreError::capacity(format!("top end has no copy of block {}", id)))?;
            self.get_block_mut(id)?.set_data(bytes)?;
            self.allocated_bytes += BLOCK_SIZE_BYTES;
        } else {
            self.cache_hits += 1;
        }
        self.get_block_mut(id)?.pin()?;
        self.move_to_tail(id);
        Ok(self.get_block(id)?)
    }

    pub fn unpin(&mut self, id: BlockId) -> Result<()> {
        self.get_block_mut(id)?.unpin()
    }

    /// Destroy a block's cache entry. Releasing a pinned block is a
    /// recoverable usage error.
    pub fn release(&mut self, topend: &mut dyn TopEnd, id: BlockId) -> Result<()> {
        let block = self.get_block(id)?;
        if block.is_pinned() {
            return Err(CoreError::capacity(format!(
                "LttBlockCache: cannot release pinned block {}",
                id
            )));
        }
        if block.is_stored() {
            let released = topend.release_large_temp_table_block(id)?;
            if !released {
                return Err(CoreError::capacity(format!(
                    "LttBlockCache: top end failed to release block {}",
                    id
                )));
            }
        }
        if block.is_resident() {
            self.allocated_bytes -= BLOCK_SIZE_BYTES;
        }
        self.blocks.remove(&id);
        if let Some(pos) = self.order.iter().position(|&x| x == id) {
            self.order.remove(pos);
        }
        Ok(())
    }

    /// If `id` has a stored copy at the top end, ask it to drop that copy
    /// and clear the block's `stored` flag.
    pub fn invalidate_stored_copy(&mut self, topend: &mut dyn TopEnd, id: BlockId) -> Result<()> {
        if !self.get_block(id)?.is_stored() {
            return Ok(());
        }
        let released = topend.release_large_temp_table_block(id)?;
        if !released {
            return Err(CoreError::capacity(format!(
                "LttBlockCache: top end failed to release block {}",
                id
            )));
        }
        self.get_block_mut(id)?.unstore();
        Ok(())
    }

    pub fn debug(&self) -> String {
        let mut out = String::from("LargeTempTableBlockCache:\n");
        for &id in &self.order {
            let block = &self.blocks[&id];
            out.push_str(&format!(
                "  Block id {}: {}pinned, {}resident, {}stored\n",
                id,
                if block.is_pinned() { "" } else { "un" },
                if block.is_resident() { "" } else { "not " },
                if block.is_stored() { "" } else { "not " },
            ));
            out.push_str(&format!("  Tuple count: {}\n", block.active_tuple_count()));
        }
        out.push_str(&format!("Total bytes used: {}\n", self.allocated_bytes));
        out
    }

    pub fn stats_for_debug(&self) -> String {
        format!(
            "LargeTempTableBlockCache stats:\n    Number of cache hits:    {}\n    Number of cache misses:  {}\n",
            self.cache_hits, self.cache_misses
        )
    }
}

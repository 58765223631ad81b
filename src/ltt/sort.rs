//! External-merge sort over a `LargeTempTable`.
//!
//! Phase 1 sorts each block independently, in place (quicksort over
//! `swap_tuples`) when the schema has non-inlined columns, or out of place
//! (collect indices, sort, rebuild a fresh block) when it doesn't, since an
//! out-of-place rebuild is cheaper when there are no reference slots to drag
//! along. Phase 2 repeatedly merges runs `k` at a time, `k` being one less
//! than the cache's block capacity so the output run always has a block of
//! its own. Mirrors `storage/LargeTempTableBlockCache.cpp`'s sort/merge helpers.

use std::collections::VecDeque;

use crate::error::Result;
use crate::ltt::block::{BlockId, TupleView};
use crate::ltt::cache::LttBlockCache;
use crate::ltt::table::LargeTempTable;
use crate::topend::TopEnd;
use rand::Rng;

/// Orders two tuples. Column typing and the expression evaluator live above
/// this core; a comparer only needs to look at raw tuple bytes.
pub trait TupleComparer {
    fn compare(&self, a: &TupleView, b: &TupleView) -> std::cmp::Ordering;
}

/// Sort `table`'s tuples via external merge sort, keeping only the window
/// `[offset, offset + limit)` of the final order. `limit < 0` means
/// unlimited. Two degenerate cases are handled without doing any work:
/// a zero limit, or an offset at or past the table's tuple count, both just
/// empty the table.
pub fn sort(
    table: &mut LargeTempTable,
    cache: &mut LttBlockCache,
    topend: &mut dyn TopEnd,
    comparer: &dyn TupleComparer,
    limit: i64,
    offset: i64,
) -> Result<()> {
    if limit == 0 || offset >= table.tuple_count() {
        table.delete_all_tuples(cache, topend)?;
        return Ok(());
    }

    let prefix: Option<usize> = if limit < 0 {
        None
    } else {
        Some((limit + offset.max(0)) as usize)
    };

    let block_ids = table.take_block_ids();
    let inline_len = table.inline_len();
    let non_inlined_count = table.non_inlined_count();
    let has_non_inlined = non_inlined_count > 0;

    let mut runs: VecDeque<VecDeque<BlockId>> = VecDeque::new();
    for id in block_ids {
        cache.fetch(topend, id)?;
        if has_non_inlined {
            let count = cache.block(id)?.active_tuple_count() as usize;
            quicksort_in_place(cache.block_mut(id)?, comparer, 0, count, prefix);
        } else {
            sort_out_of_place(cache, id, comparer, prefix)?;
        }
        cache.invalidate_stored_copy(topend, id)?;
        cache.unpin(id)?;
        let mut run = VecDeque::new();
        run.push_back(id);
        runs.push_back(run);
    }

    let k = cache.capacity_in_blocks().saturating_sub(1).max(2);
    let mut final_count: i64 = 0;
    let mut trimmed = false;
    while runs.len() > 1 || (!runs.is_empty() && !trimmed) {
        trimmed = true;
        let total = runs.len();
        let output_run_count = (total + k - 1) / k;
        let is_final_pass = output_run_count == 1;

        let mut next_runs = VecDeque::new();
        let mut pass_count: i64 = 0;
        while !runs.is_empty() {
            let mut batch = Vec::new();
            for _ in 0..k {
                match runs.pop_front() {
                    Some(run) => batch.push(run),
                    None => break,
                }
            }
            let (merged, emitted) = merge_runs(
                cache,
                topend,
                batch,
                comparer,
                inline_len,
                non_inlined_count,
                is_final_pass,
                limit,
                offset,
            )?;
            pass_count += emitted;
            next_runs.push_back(merged);
        }
        if is_final_pass {
            final_count = pass_count;
        }
        runs = next_runs;
    }

    table.set_block_ids(runs.pop_front().unwrap_or_default().into_iter().collect());
    table.set_tuple_count(final_count);
    Ok(())
}

/// In-place quicksort over `[lo, hi)`, falling back to insertion sort for
/// small ranges and skipping the right partition once `prefix` tuples ahead
/// of it are already known to be sorted and in range ("right
/// partition skip" optimization).
fn quicksort_in_place(
    block: &mut crate::ltt::block::LttBlock,
    comparer: &dyn TupleComparer,
    lo: usize,
    hi: usize,
    prefix: Option<usize>,
) {
    if hi - lo <= 1 {
        return;
    }
    if hi - lo <= 4 {
        insertion_sort_in_place(block, comparer, lo, hi);
        return;
    }

    let pivot_index = lo + rand::thread_rng().gen_range(0..(hi - lo));
    let _ = block.swap_tuples(pivot_index, hi - 1);
    let pivot = block.tuple(hi - 1).expect("index within range");

    let mut store = lo;
    for i in lo..hi - 1 {
        let current = block.tuple(i).expect("index within range");
        if comparer.compare(&current, &pivot) == std::cmp::Ordering::Less {
            let _ = block.swap_tuples(i, store);
            store += 1;
        }
    }
    let _ = block.swap_tuples(store, hi - 1);

    quicksort_in_place(block, comparer, lo, store, prefix);
    if prefix.map(|p| store + 1 < p).unwrap_or(true) {
        quicksort_in_place(block, comparer, store + 1, hi, prefix);
    }
}

fn insertion_sort_in_place(
    block: &mut crate::ltt::block::LttBlock,
    comparer: &dyn TupleComparer,
    lo: usize,
    hi: usize,
) {
    for i in (lo + 1)..hi {
        let mut j = i;
        while j > lo {
            let left = block.tuple(j - 1).expect("index within range");
            let right = block.tuple(j).expect("index within range");
            if comparer.compare(&left, &right) != std::cmp::Ordering::Greater {
                break;
            }
            let _ = block.swap_tuples(j - 1, j);
            j -= 1;
        }
    }
}

/// Out-of-place sort for a schema with no non-inlined columns: cheaper to
/// sort a vector of owned tuple snapshots and rebuild a fresh block than to
/// shuffle tuple bytes around with no reference slots to preserve.
fn sort_out_of_place(
    cache: &mut LttBlockCache,
    id: BlockId,
    comparer: &dyn TupleComparer,
    prefix: Option<usize>,
) -> Result<()> {
    let (inline_len, count) = {
        let block = cache.block(id)?;
        (block.tuple_stride() - 1, block.active_tuple_count() as usize)
    };

    let mut tuples: Vec<TupleView> = (0..count).map(|i| cache.block(id).unwrap().tuple(i).unwrap()).collect();
    tuples.sort_by(|a, b| comparer.compare(a, b));
    if let Some(p) = prefix {
        tuples.truncate(p);
    }

    let mut rebuilt = crate::ltt::block::LttBlock::new(id, inline_len, 0);
    for tuple in &tuples {
        let inserted = rebuilt.insert(&tuple.inline, &[])?;
        if !inserted {
            fatal!("sort_out_of_place: rebuilt block cannot hold its own sorted tuples");
        }
    }

    cache.block_mut(id)?.swap(&mut rebuilt)?;
    Ok(())
}

struct MergeCursor {
    blocks: VecDeque<BlockId>,
    index: usize,
}

/// Merge up to `k` already-sorted runs into one output run, honoring the
/// prefix/offset rule described in [`sort`]: non-final passes keep only the
/// first `limit + offset` tuples (anything past that position in any one
/// run can never be in the global top window once every run is eventually
/// merged together); the final pass applies the true offset and limit.
#[allow(clippy::too_many_arguments)]
fn merge_runs(
    cache: &mut LttBlockCache,
    topend: &mut dyn TopEnd,
    batch: Vec<VecDeque<BlockId>>,
    comparer: &dyn TupleComparer,
    inline_len: usize,
    non_inlined_count: usize,
    is_final_pass: bool,
    limit: i64,
    offset: i64,
) -> Result<(VecDeque<BlockId>, i64)> {
    let mut cursors = Vec::with_capacity(batch.len());
    for run in batch {
        if let Some(&first) = run.front() {
            cache.fetch(topend, first)?;
        }
        cursors.push(MergeCursor { blocks: run, index: 0 });
    }

    let mut skip_remaining: i64 = if is_final_pass { offset.max(0) } else { 0 };
    let cap: Option<i64> = if is_final_pass {
        if limit < 0 {
            None
        } else {
            Some(limit)
        }
    } else if limit < 0 {
        None
    } else {
        Some(limit + offset.max(0))
    };

    let mut output_blocks: VecDeque<BlockId> = VecDeque::new();
    let mut current_output: Option<BlockId> = None;
    let mut emitted: i64 = 0;

    loop {
        if let Some(cap) = cap {
            if emitted >= cap {
                break;
            }
        }

        let mut best: Option<usize> = None;
        for (i, cursor) in cursors.iter().enumerate() {
            if cursor.blocks.is_empty() {
                continue;
            }
            match best {
                None => best = Some(i),
                Some(b) => {
                    let candidate = cache.block(cursor.blocks[0])?.tuple(cursor.index)?;
                    let incumbent = cache.block(cursors[b].blocks[0])?.tuple(cursors[b].index)?;
                    if comparer.compare(&candidate, &incumbent) == std::cmp::Ordering::Less {
                        best = Some(i);
                    }
                }
            }
        }
        let idx = match best {
            Some(i) => i,
            None => break,
        };

        let block_id = cursors[idx].blocks[0];
        let tuple = cache.block(block_id)?.tuple(cursors[idx].index)?;

        if skip_remaining > 0 {
            skip_remaining -= 1;
        } else {
            let non_inlined_payloads: Result<Vec<Vec<u8>>> = tuple
                .non_inlined_refs
                .iter()
                .map(|&r| cache.block(block_id)?.non_inlined_bytes(r).map(|b| b.to_vec()))
                .collect();
            let non_inlined_payloads = non_inlined_payloads?;

            let out_id = match current_output {
                Some(id) => id,
                None => {
                    let id = cache.get_empty_block(topend, inline_len, non_inlined_count)?;
                    output_blocks.push_back(id);
                    current_output = Some(id);
                    id
                }
            };
            let inserted = cache.block_mut(out_id)?.insert(&tuple.inline, &non_inlined_payloads)?;
            if !inserted {
                cache.unpin(out_id)?;
                let new_id = cache.get_empty_block(topend, inline_len, non_inlined_count)?;
                output_blocks.push_back(new_id);
                current_output = Some(new_id);
                if !cache.block_mut(new_id)?.insert(&tuple.inline, &non_inlined_payloads)? {
                    fatal!("merge_runs: tuple does not fit a fresh output block");
                }
            }
            emitted += 1;
        }

        cursors[idx].index += 1;
        let exhausted = cache.block(block_id)?.active_tuple_count() as usize <= cursors[idx].index;
        if exhausted {
            cache.unpin(block_id)?;
            cache.release(topend, block_id)?;
            cursors[idx].blocks.pop_front();
            cursors[idx].index = 0;
            if let Some(&next_id) = cursors[idx].blocks.front() {
                cache.fetch(topend, next_id)?;
            }
        }
    }

    if let Some(id) = current_output {
        cache.unpin(id)?;
    }

    for mut cursor in cursors {
        while let Some(id) = cursor.blocks.pop_front() {
            if cache.block(id)?.is_pinned() {
                cache.unpin(id)?;
            }
            cache.release(topend, id)?;
        }
    }

    Ok((output_blocks, emitted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    struct NumericComparer;

    impl TupleComparer for NumericComparer {
        fn compare(&self, a: &TupleView, b: &TupleView) -> std::cmp::Ordering {
            let a_key = u32::from_le_bytes(a.inline[0..4].try_into().unwrap());
            let b_key = u32::from_le_bytes(b.inline[0..4].try_into().unwrap());
            a_key.cmp(&b_key)
        }
    }

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

    fn collect_keys(
        table: &mut LargeTempTable,
        cache: &mut LttBlockCache,
        topend: &mut RecordingTopEnd,
    ) -> Vec<u32> {
        let mut out = Vec::new();
        table
            .scan(cache, topend, false, |tuple| {
                out.push(u32::from_le_bytes(tuple.inline[0..4].try_into().unwrap()));
                Ok(())
            })
            .unwrap();
        out
    }

    #[test]
    fn sorts_a_single_block_with_no_limit() {
        let mut topend = RecordingTopEnd::default();
        let mut cache = LttBlockCache::new(crate::config::LTT_BLOCK_SIZE_BYTES * 4, 1);
        let mut table = LargeTempTable::new(4, 0);
        for key in [5u32, 1, 4, 2, 3] {
            table.insert(&mut cache, &mut topend, &key.to_le_bytes(), &[]).unwrap();
        }
        table.finish_inserts(&mut cache).unwrap();

        sort(&mut table, &mut cache, &mut topend, &NumericComparer, -1, 0).unwrap();
        table.finish_inserts(&mut cache).unwrap();
        assert_eq!(collect_keys(&mut table, &mut cache, &mut topend), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn limit_and_offset_select_a_window_of_the_sorted_order() {
        let mut topend = RecordingTopEnd::default();
        let mut cache = LttBlockCache::new(crate::config::LTT_BLOCK_SIZE_BYTES * 4, 1);
        let mut table = LargeTempTable::new(4, 0);
        for key in (0u32..20).rev() {
            table.insert(&mut cache, &mut topend, &key.to_le_bytes(), &[]).unwrap();
        }
        table.finish_inserts(&mut cache).unwrap();

        sort(&mut table, &mut cache, &mut topend, &NumericComparer, 5, 3).unwrap();
        table.finish_inserts(&mut cache).unwrap();
        assert_eq!(collect_keys(&mut table, &mut cache, &mut topend), vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn zero_limit_empties_the_table() {
        let mut topend = RecordingTopEnd::default();
        let mut cache = LttBlockCache::new(crate::config::LTT_BLOCK_SIZE_BYTES * 2, 1);
        let mut table = LargeTempTable::new(4, 0);
        table.insert(&mut cache, &mut topend, &1u32.to_le_bytes(), &[]).unwrap();
        table.finish_inserts(&mut cache).unwrap();

        sort(&mut table, &mut cache, &mut topend, &NumericComparer, 0, 0).unwrap();
        assert_eq!(table.tuple_count(), 0);
        assert_eq!(table.block_ids().len(), 0);
    }

    #[test]
    fn sort_spans_multiple_blocks_and_merges_them_back_in_order() {
        let mut topend = RecordingTopEnd::default();
        // Budget of 4 blocks is plenty of headroom for cache bookkeeping
        // while the table itself spans 3 blocks of ~1600-byte tuples.
        let mut cache = LttBlockCache::new(crate::config::LTT_BLOCK_SIZE_BYTES * 4, 1);
        let mut table = LargeTempTable::new(1600, 0);

        let total = 5000u32;
        for i in 0..total {
            let key = (total - 1 - i).to_le_bytes();
            let mut payload = vec![0u8; 1600];
            payload[0..4].copy_from_slice(&key);
            table.insert(&mut cache, &mut topend, &payload, &[]).unwrap();
        }
        table.finish_inserts(&mut cache).unwrap();
        assert!(table.block_ids().len() >= 2);

        sort(&mut table, &mut cache, &mut topend, &NumericComparer, 10, 5).unwrap();
        table.finish_inserts(&mut cache).unwrap();
        assert_eq!(
            collect_keys(&mut table, &mut cache, &mut topend),
            (5u32..15).collect::<Vec<_>>()
        );
    }
}

//! `TupleStream` — per-table export/DR row buffer with undo support.
//!
//! A chain of `StreamBlock`s for one export/DR stream, mirroring
//! `storage/ExportTupleStream.h` plus its base class `storage/TupleStreamBase.h`.
//! One `TupleStream` corresponds to one
//! partition's export (or DR) feed for one table.

use std::collections::VecDeque;

use crate::error::{CoreError, Result};
use crate::stream::block::{BlockCapacityKind, StreamBlock};

/// A chain of append-only blocks with commit/rollback/flush semantics. The
/// "current" block accepts new rows; once it's full (or a flush fires) it
/// moves to the pending queue to await [`TupleStream::push_pending_blocks`].
pub struct TupleStream {
    partition_id: i32,
    site_id: i64,
    generation_id_created: i64,
    table_name: String,
    default_capacity: usize,
    large_capacity: Option<usize>,
    current_block: StreamBlock,
    pending_blocks: VecDeque<StreamBlock>,
    next_sequence_number: i64,
    committed_sequence_number: i64,
    last_flush_millis: i64,
    flush_timeout_millis: i64,
    flush_pending: bool,
    /// Transaction id of the last row appended, or `i64::MIN` if none yet.
    open_txn_id: i64,
    /// Transaction id of the last committed row, or `i64::MIN` if none yet.
    committed_txn_id: i64,
    /// USO boundary up to which pending blocks are fully committed; the gate
    /// `push_pending_blocks` checks before handing a block to the host.
    committed_uso: u64,
}

impl TupleStream {
    pub fn new(
        partition_id: i32,
        site_id: i64,
        generation_id: i64,
        table_name: String,
        default_capacity: usize,
        large_capacity: Option<usize>,
        flush_timeout_millis: i64,
    ) -> Self {
        let mut current_block = StreamBlock::new(default_capacity, 0, BlockCapacityKind::Normal);
        current_block.set_generation_id(generation_id);
        current_block.set_signature(table_name.clone());
        Self {
            partition_id,
            site_id,
            generation_id_created: generation_id,
            table_name,
            default_capacity,
            large_capacity,
            current_block,
            pending_blocks: VecDeque::new(),
            next_sequence_number: 1,
            committed_sequence_number: 0,
            last_flush_millis: 0,
            flush_timeout_millis,
            flush_pending: false,
            open_txn_id: i64::MIN,
            committed_txn_id: i64::MIN,
            committed_uso: 0,
        }
    }

    pub fn partition_id(&self) -> i32 {
        self.partition_id
    }

    pub fn site_id(&self) -> i64 {
        self.site_id
    }

    pub fn generation_id_created(&self) -> i64 {
        self.generation_id_created
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn sequence_number(&self) -> i64 {
        self.next_sequence_number
    }

    pub fn committed_sequence_number(&self) -> i64 {
        self.committed_sequence_number
    }

    /// Total bytes appended over the life of this stream (`bytesUsed` in the
    /// source): the running USO at the write cursor of the current block.
    pub fn bytes_used(&self) -> u64 {
        self.current_block.uso() + self.current_block.offset() as u64
    }

    pub fn flush_pending(&self) -> bool {
        self.flush_pending
    }

    pub fn pending_block_count(&self) -> usize {
        self.pending_blocks.len()
    }

    /// Set the stream's starting sequence number and byte count for
    /// rejoin/recovery, then open a fresh empty current block at that offset
    /// (`setBytesUsed`).
    pub fn set_bytes_used(&mut self, seq_no: i64, count: u64) -> Result<()> {
        if self.current_block.uso() != 0 || self.current_block.offset() != 0 {
            fatal!("set_bytes_used: stream already has buffered data");
        }
        self.next_sequence_number = seq_no + 1;
        self.committed_sequence_number = seq_no;
        self.committed_uso = count;
        self.current_block = StreamBlock::new(self.default_capacity, count, BlockCapacityKind::Normal);
        self.current_block.set_generation_id(self.generation_id_created);
        self.current_block.set_signature(self.table_name.clone());
        Ok(())
    }

    /// Close out the current block (if it holds any rows) into the pending
    /// queue and open a fresh one sized to hold at least `min_length` bytes
    /// (`extendBufferChain`).
    pub fn extend_buffer_chain(&mut self, min_length: usize) -> Result<()> {
        let capacity = if min_length <= self.default_capacity {
            self.default_capacity
        } else {
            match self.large_capacity {
                Some(large) if large >= min_length => large,
                _ => {
                    return Err(CoreError::capacity(format!(
                        "extend_buffer_chain: no block capacity holds {} bytes",
                        min_length
                    )))
                }
            }
        };

        let next_uso = self.current_block.uso() + self.current_block.offset() as u64;
        let mut new_block = StreamBlock::new(capacity, next_uso, BlockCapacityKind::from_selected(capacity, self.default_capacity));
        new_block.set_generation_id(self.generation_id_created);
        new_block.set_signature(self.table_name.clone());

        let old_block = std::mem::replace(&mut self.current_block, new_block);
        if old_block.row_count() > 0 {
            self.pending_blocks.push_back(old_block);
        }
        Ok(())
    }

    /// Serialize and append one row, extending the buffer chain first if the
    /// current block has no room. Returns the USO at which the row starts
    /// (the "mark" a caller would pass to [`Self::rollback_to`]).
    ///
    /// A row arriving under a different transaction than the one that owns
    /// the current block's unwritten rows forces the block closed before the
    /// new row is considered, so a committed block never straddles a
    /// transaction boundary (`appendTuple`'s per-transaction block framing).
    pub fn append_tuple(&mut self, txn_id: i64, row: &[u8], seq_no: i64, unique_id: i64) -> Result<u64> {
        let txn_changed = txn_id != self.open_txn_id && self.current_block.row_count() > 0;
        if row.len() > self.current_block.remaining() || txn_changed {
            self.extend_buffer_chain(row.len())?;
        }
        if row.len() > self.current_block.capacity() {
            return Err(CoreError::capacity(format!(
                "append_tuple: row of {} bytes exceeds maximum block capacity {}",
                row.len(),
                self.current_block.capacity()
            )));
        }
        let mark = self.current_block.uso() + self.current_block.offset() as u64;
        self.current_block.append(row, unique_id)?;
        self.next_sequence_number = seq_no + 1;
        self.flush_pending = true;
        self.open_txn_id = txn_id;
        Ok(mark)
    }

    /// Mark all rows appended so far as committed (`commit`).
    /// A transaction that spans a buffer-chain extend has rows sitting in
    /// both the current block and any blocks the chain already queued, so
    /// the committed marker is stamped on all of them.
    pub fn commit(&mut self, txn_id: i64) {
        self.committed_sequence_number = self.next_sequence_number - 1;
        self.committed_txn_id = txn_id;
        self.committed_uso = self.bytes_used();
        self.current_block
            .set_last_committed_seq_no(self.committed_sequence_number);
        for block in self.pending_blocks.iter_mut() {
            block.set_last_committed_seq_no(self.committed_sequence_number);
        }
    }

    /// Roll back to `mark`, discarding any rows appended after it, including
    /// rows in blocks the chain has since moved past (`rollbackExportTo` in
    /// the committed-sequence-number stamping below).
    pub fn rollback_to(&mut self, mark: u64, seq_no: i64) -> Result<()> {
        if !(seq_no > self.committed_sequence_number && self.next_sequence_number > self.committed_sequence_number)
        {
            fatal!(
                "rollback_to: seq_no {} must exceed committed_sequence_number {}",
                seq_no,
                self.committed_sequence_number
            );
        }
        if mark < self.committed_uso {
            fatal!(
                "rollback_to: mark {} precedes committed USO {}",
                mark,
                self.committed_uso
            );
        }
        self.next_sequence_number = seq_no;

        if mark >= self.current_block.uso() {
            self.current_block.truncate_to(mark)?;
            return Ok(());
        }

        while let Some(block) = self.pending_blocks.back() {
            if mark >= block.uso() {
                break;
            }
            self.pending_blocks.pop_back();
        }
        let mut restored = self
            .pending_blocks
            .pop_back()
            .ok_or_else(|| CoreError::invariant("rollback_to: mark precedes all buffered blocks"))?;
        restored.truncate_to(mark)?;
        self.current_block = restored;
        Ok(())
    }

    /// Age out the current block into the pending queue if the flush timer
    /// has expired (or `time_millis < 0`, meaning "flush unconditionally")
    /// and there's anything to flush. Returns whether a flush occurred
    /// (`periodicFlush`).
    pub fn periodic_flush(&mut self, time_millis: i64) -> Result<bool> {
        let expired = time_millis < 0 || (time_millis - self.last_flush_millis > self.flush_timeout_millis);
        if self.current_block.row_count() > 0 && expired {
            self.extend_buffer_chain(0)?;
            self.last_flush_millis = time_millis.max(self.last_flush_millis);
            self.flush_pending = false;
            return Ok(true);
        }
        Ok(false)
    }

    /// Drain and return every pending block that's entirely covered by
    /// `committed_uso`, stopping at the first one the committed boundary
    /// hasn't caught up to (`pushStreamBuffer`, inverted: here the caller
    /// pulls). A block still holding uncommitted rows stays queued.
    pub fn push_pending_blocks(&mut self) -> Vec<StreamBlock> {
        let mut ready = Vec::new();
        while let Some(block) = self.pending_blocks.front() {
            let block_end = block.uso() + block.offset() as u64;
            if block_end > self.committed_uso {
                break;
            }
            ready.push(self.pending_blocks.pop_front().unwrap());
        }
        ready
    }
}

impl BlockCapacityKind {
    fn from_selected(selected: usize, default_capacity: usize) -> Self {
        if selected == default_capacity {
            BlockCapacityKind::Normal
        } else {
            BlockCapacityKind::Large
        }
    }
}

/// Tracks which of an engine's several `TupleStream`s have unflushed data,
/// so a periodic timer only visits streams that actually need it instead of
/// every stream the engine owns. Gives the same "pending, ordered, O(1)
/// membership" contract as an intrusive doubly linked list would, as an
/// id-indexed queue instead of raw pointers.
#[derive(Debug, Default)]
pub struct PendingFlushRegistry {
    order: VecDeque<usize>,
}

impl PendingFlushRegistry {
    pub fn new() -> Self {
        Self { order: VecDeque::new() }
    }

    /// Mark `stream_id` as having unflushed data, appending it to the tail
    /// if it isn't already tracked (`appendToList`).
    pub fn mark_pending(&mut self, stream_id: usize) {
        if !self.order.contains(&stream_id) {
            self.order.push_back(stream_id);
        }
    }

    /// Move `stream_id` to the tail of the list, e.g. after flushing it so
    /// it's visited last next time (`removeFromFlushList(moveToTail=true)`).
    pub fn move_to_tail(&mut self, stream_id: usize) {
        self.remove(stream_id);
        self.order.push_back(stream_id);
    }

    pub fn remove(&mut self, stream_id: usize) {
        if let Some(pos) = self.order.iter().position(|&id| id == stream_id) {
            self.order.remove(pos);
        }
    }

    pub fn is_pending(&self, stream_id: usize) -> bool {
        self.order.contains(&stream_id)
    }

    pub fn pending_ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.order.iter().copied()
    }
}

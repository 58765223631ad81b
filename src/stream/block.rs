//! `StreamBlock` — one block of committed export/DR rows.
//!
//! A fixed-capacity byte buffer with an append cursor, a universal stream
//! offset (USO), and truncation. Corresponds to `common/StreamBlock.h`, plus the generation/signature/
//! end-of-stream bookkeeping that a wire consumer also needs.

use crate::error::Result;

/// Whether a block was sized from a stream's default or secondary (large)
/// capacity ("type flag (normal/large)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCapacityKind {
    Normal,
    Large,
}

/// A single data block with append-cursor buffer semantics.
#[derive(Debug)]
pub struct StreamBlock {
    data: Vec<u8>,
    capacity: usize,
    /// Write cursor: the offset within `data` of the next byte to be written.
    offset: usize,
    /// Universal stream offset of byte 0 of this block.
    uso: u64,
    row_count: u64,
    last_committed_seq_no: i64,
    last_unique_id: i64,
    kind: BlockCapacityKind,
    /// Generation id this block belongs to, mirroring `StreamBlock::m_generationId`.
    generation_id: i64,
    /// Export stream signature at the time this block was created.
    signature: String,
    /// Whether this block marks the end of a generation.
    end_of_stream: bool,
}

impl StreamBlock {
    pub fn new(capacity: usize, uso: u64, kind: BlockCapacityKind) -> Self {
        Self {
            data: vec![0u8; capacity],
            capacity,
            offset: 0,
            uso,
            row_count: 0,
            last_committed_seq_no: -1,
            last_unique_id: -1,
            kind,
            generation_id: i64::MIN,
            signature: String::new(),
            end_of_stream: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn uso(&self) -> u64 {
        self.uso
    }

    /// Additional offset from `uso()` to count all octets currently in this
    /// block. `uso() + offset()` is the USO at the write cursor.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.offset
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub fn kind(&self) -> BlockCapacityKind {
        self.kind
    }

    pub fn last_committed_seq_no(&self) -> i64 {
        self.last_committed_seq_no
    }

    pub fn set_last_committed_seq_no(&mut self, seq_no: i64) {
        self.last_committed_seq_no = seq_no;
    }

    pub fn last_unique_id(&self) -> i64 {
        self.last_unique_id
    }

    pub fn generation_id(&self) -> i64 {
        self.generation_id
    }

    pub fn set_generation_id(&mut self, generation_id: i64) {
        self.generation_id = generation_id;
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn set_signature(&mut self, signature: String) {
        self.signature = signature;
    }

    pub fn end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    pub fn set_end_of_stream(&mut self, end_of_stream: bool) {
        self.end_of_stream = end_of_stream;
    }

    /// Bytes written to this block so far (excludes any unused capacity).
    pub fn raw(&self) -> &[u8] {
        &self.data[..self.offset]
    }

    /// Append `bytes` to the block, advancing the write cursor and bumping
    /// the row count by one. Fails if the block doesn't have room; callers
    /// must check `remaining()` before calling (requires
    /// remaining() >= len").
    pub fn append(&mut self, bytes: &[u8], unique_id: i64) -> Result<()> {
        if bytes.len() > self.remaining() {
            fatal!(
                "StreamBlock::append: {} bytes requested but only {} remaining",
                bytes.len(),
                self.remaining()
            );
        }
        self.data[self.offset..self.offset + bytes.len()].copy_from_slice(bytes);
        self.offset += bytes.len();
        self.row_count += 1;
        self.last_unique_id = unique_id;
        Ok(())
    }

    /// Rewind the write cursor so the block's USO returns to `mark`. Legal
    /// iff `uso() <= mark <= uso() + offset()`.
    pub fn truncate_to(&mut self, mark: u64) -> Result<()> {
        let block_end = self.uso + self.offset as u64;
        if mark < self.uso || mark > block_end {
            fatal!(
                "StreamBlock::truncate_to: mark {} outside [{}, {}]",
                mark,
                self.uso,
                block_end
            );
        }
        self.offset = (mark - self.uso) as usize;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_advances_offset_and_row_count() {
        let mut block = StreamBlock::new(64, 0, BlockCapacityKind::Normal);
        block.append(&[1, 2, 3], 100).unwrap();
        assert_eq!(block.offset(), 3);
        assert_eq!(block.row_count(), 1);
        assert_eq!(block.remaining(), 61);
    }

    #[test]
    fn append_past_capacity_is_fatal() {
        let mut block = StreamBlock::new(2, 0, BlockCapacityKind::Normal);
        assert!(block.append(&[1, 2, 3], 1).is_err());
    }

    #[test]
    fn truncate_within_block_rewinds_cursor() {
        let mut block = StreamBlock::new(64, 100, BlockCapacityKind::Normal);
        block.append(&[1, 2, 3, 4], 1).unwrap();
        block.truncate_to(102).unwrap();
        assert_eq!(block.offset(), 2);
    }

    #[test]
    fn truncate_outside_block_is_fatal() {
        let mut block = StreamBlock::new(64, 100, BlockCapacityKind::Normal);
        block.append(&[1, 2, 3, 4], 1).unwrap();
        assert!(block.truncate_to(99).is_err());
        assert!(block.truncate_to(105).is_err());
    }
}

//! `LttBlock` — a single fixed-size temp table block.
//!
//! A fixed-size block storing fixed-stride tuples growing up from just past
//! the header, and variable-length ("non-inlined") payloads growing down
//! from the end of the buffer. Mirrors `storage/LargeTempTableBlock.h`/`.cpp`.
//!
//! The expression evaluator and typed tuple/schema system are external
//! collaborators; this block treats a tuple's inline payload as
//! opaque bytes of a fixed length agreed on by the caller, plus a fixed
//! number of non-inlined reference slots. A reference slot holds an 8-byte
//! value that is an actual memory address into this block's buffer (mirroring
//! the raw `StringRef*` pointers `LargeTempTableBlock` embeds in tuple storage)
//! so that [`LttBlock::set_data`] can rebase them on reload.

use crate::config::{LTT_BLOCK_HEADER_SIZE, LTT_BLOCK_SIZE_BYTES};
use crate::error::{CoreError, Result};

pub type BlockId = u64;

const STATUS_ACTIVE: u8 = 1;

/// A read-only snapshot of one tuple slot.
pub struct TupleView {
    pub active: bool,
    pub inline: Vec<u8>,
    pub non_inlined_refs: Vec<u64>,
}

pub struct LttBlock {
    id: BlockId,
    inline_len: usize,
    non_inlined_count: usize,
    storage: Option<Vec<u8>>,
    tuple_insertion_offset: usize,
    non_inlined_insertion_offset: usize,
    active_tuple_count: i64,
    is_pinned: bool,
    is_stored: bool,
}

impl LttBlock {
    pub fn new(id: BlockId, inline_len: usize, non_inlined_count: usize) -> Self {
        Self {
            id,
            inline_len,
            non_inlined_count,
            storage: Some(vec![0u8; LTT_BLOCK_SIZE_BYTES]),
            tuple_insertion_offset: LTT_BLOCK_HEADER_SIZE,
            non_inlined_insertion_offset: LTT_BLOCK_SIZE_BYTES,
            active_tuple_count: 0,
            is_pinned: false,
            is_stored: false,
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Bytes occupied by one tuple: one status byte, the inline payload,
    /// then one 8-byte reference slot per non-inlined column.
    pub fn tuple_stride(&self) -> usize {
        1 + self.inline_len + 8 * self.non_inlined_count
    }

    pub fn active_tuple_count(&self) -> i64 {
        self.active_tuple_count
    }

    pub fn is_resident(&self) -> bool {
        self.storage.is_some()
    }

    pub fn is_pinned(&self) -> bool {
        self.is_pinned
    }

    pub fn is_stored(&self) -> bool {
        self.is_stored
    }

    pub fn unstore(&mut self) {
        self.is_stored = false;
    }

    pub fn pin(&mut self) -> Result<()> {
        if self.is_pinned {
            fatal!("LttBlock::pin: block {} is already pinned", self.id);
        }
        self.is_pinned = true;
        Ok(())
    }

    pub fn unpin(&mut self) -> Result<()> {
        if !self.is_pinned {
            fatal!("LttBlock::unpin: block {} is not pinned", self.id);
        }
        self.is_pinned = false;
        Ok(())
    }

    /// `BLOCK_SIZE_IN_BYTES` while resident, 0 otherwise.
    pub fn allocated_memory(&self) -> usize {
        if self.is_resident() {
            LTT_BLOCK_SIZE_BYTES
        } else {
            0
        }
    }

    pub fn allocated_tuple_memory(&self) -> usize {
        if self.is_resident() {
            self.tuple_insertion_offset
        } else {
            0
        }
    }

    pub fn allocated_pool_memory(&self) -> usize {
        if self.is_resident() {
            LTT_BLOCK_SIZE_BYTES - self.non_inlined_insertion_offset
        } else {
            0
        }
    }

    fn base_address(&self) -> u64 {
        self.storage.as_ref().map(|s| s.as_ptr() as u64).unwrap_or(0)
    }

    fn storage_mut(&mut self) -> Result<&mut Vec<u8>> {
        self.storage
            .as_mut()
            .ok_or_else(|| CoreError::invariant("LttBlock: operation requires a resident block"))
    }

    /// Allocate `size` non-inlined bytes, shrinking the non-inlined front.
    /// Returns the address of the allocation (`allocate`). Callers
    /// are expected to have already checked there's room, matching the
    /// source's unchecked `allocate()`; use [`Self::insert`] for a
    /// checked, atomic version that also writes the tuple.
    pub fn allocate(&mut self, size: usize) -> Result<u64> {
        if size > self.non_inlined_insertion_offset
            || self.non_inlined_insertion_offset - size < self.tuple_insertion_offset
        {
            fatal!(
                "LttBlock::allocate: {} bytes would collide with the tuple front",
                size
            );
        }
        self.non_inlined_insertion_offset -= size;
        let offset = self.non_inlined_insertion_offset;
        let base = self.base_address();
        Ok(base + offset as u64)
    }

    /// Insert one tuple. `inline` must be exactly `inline_len` bytes;
    /// `non_inlined_payloads` must have exactly `non_inlined_count` entries.
    /// Returns `false` without mutating the block if the tuple (plus its
    /// non-inlined payloads) would collide with the non-inlined front.
    pub fn insert(&mut self, inline: &[u8], non_inlined_payloads: &[Vec<u8>]) -> Result<bool> {
        if inline.len() != self.inline_len || non_inlined_payloads.len() != self.non_inlined_count {
            fatal!("LttBlock::insert: tuple shape does not match this block's schema");
        }

        let mut candidate_non_inlined_offset = self.non_inlined_insertion_offset;
        let mut entry_offsets = Vec::with_capacity(non_inlined_payloads.len());
        for payload in non_inlined_payloads {
            let entry_size = 4 + payload.len();
            if entry_size > candidate_non_inlined_offset {
                return Ok(false);
            }
            candidate_non_inlined_offset -= entry_size;
            entry_offsets.push(candidate_non_inlined_offset);
        }
        let candidate_tuple_end = self.tuple_insertion_offset + self.tuple_stride();
        if candidate_tuple_end > candidate_non_inlined_offset {
            return Ok(false);
        }

        let base = self.base_address();
        let tuple_offset = self.tuple_insertion_offset;
        let inline_len = self.inline_len;
        let storage = self.storage_mut()?;

        for (payload, offset) in non_inlined_payloads.iter().zip(entry_offsets.iter()) {
            storage[*offset..*offset + 4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
            storage[*offset + 4..*offset + 4 + payload.len()].copy_from_slice(payload);
        }

        storage[tuple_offset] = STATUS_ACTIVE;
        storage[tuple_offset + 1..tuple_offset + 1 + inline_len].copy_from_slice(inline);
        let mut ref_pos = tuple_offset + 1 + inline_len;
        for offset in &entry_offsets {
            let ptr = base + *offset as u64;
            storage[ref_pos..ref_pos + 8].copy_from_slice(&ptr.to_le_bytes());
            ref_pos += 8;
        }

        self.non_inlined_insertion_offset = candidate_non_inlined_offset;
        self.tuple_insertion_offset += self.tuple_stride();
        self.active_tuple_count += 1;
        Ok(true)
    }

    fn tuple_offset(&self, index: usize) -> usize {
        LTT_BLOCK_HEADER_SIZE + index * self.tuple_stride()
    }

    pub fn tuple(&self, index: usize) -> Result<TupleView> {
        if index as i64 >= self.active_tuple_count {
            fatal!("LttBlock::tuple: index {} out of range", index);
        }
        let storage = self
            .storage
            .as_ref()
            .ok_or_else(|| CoreError::invariant("LttBlock::tuple: block is not resident"))?;
        let offset = self.tuple_offset(index);
        let active = storage[offset] & STATUS_ACTIVE != 0;
        let inline = storage[offset + 1..offset + 1 + self.inline_len].to_vec();
        let refs_start = offset + 1 + self.inline_len;
        let refs_bytes = &storage[refs_start..refs_start + 8 * self.non_inlined_count];
        let non_inlined_refs = decode_refs(refs_bytes);
        Ok(TupleView {
            active,
            inline,
            non_inlined_refs,
        })
    }

    /// Resolve a non-inlined reference previously returned by [`Self::insert`]
    /// or [`Self::allocate`] back to its bytes.
    pub fn non_inlined_bytes(&self, reference: u64) -> Result<&[u8]> {
        let storage = self
            .storage
            .as_ref()
            .ok_or_else(|| CoreError::invariant("non_inlined_bytes: block is not resident"))?;
        let base = storage.as_ptr() as u64;
        let offset = reference.checked_sub(base).ok_or_else(|| {
            CoreError::invariant("non_inlined_bytes: reference precedes block base")
        })? as usize;
        if offset + 4 > storage.len() {
            fatal!("non_inlined_bytes: reference {} out of range", reference);
        }
        let len = u32::from_le_bytes(storage[offset..offset + 4].try_into().unwrap()) as usize;
        Ok(&storage[offset + 4..offset + 4 + len])
    }

    pub fn deactivate_tuple(&mut self, index: usize) -> Result<()> {
        let offset = self.tuple_offset(index);
        let storage = self.storage_mut()?;
        storage[offset] &= !STATUS_ACTIVE;
        Ok(())
    }

    /// Swap two tuple slots' inline words wholesale (status byte, inline
    /// payload, and reference slots move together; the non-inlined bytes
    /// they point to stay put). Used by the in-place quicksort.
    pub fn swap_tuples(&mut self, i: usize, j: usize) -> Result<()> {
        if i == j {
            return Ok(());
        }
        let stride = self.tuple_stride();
        let off_i = self.tuple_offset(i);
        let off_j = self.tuple_offset(j);
        let storage = self.storage_mut()?;
        let (lo, hi) = if off_i < off_j { (off_i, off_j) } else { (off_j, off_i) };
        let (left, right) = storage.split_at_mut(hi);
        left[lo..lo + stride].swap_with_slice(&mut right[..stride]);
        Ok(())
    }

    /// Write this block's current address and tuple count into its own
    /// header while staying resident, so a caller that needs to read the
    /// bytes before giving up ownership (the cache's `store` path) sees a
    /// buffer a later [`Self::set_data`] can rebase from.
    pub fn stamp_header(&mut self) -> Result<()> {
        let count = self.active_tuple_count as u32;
        let storage = self.storage_mut()?;
        let base = storage.as_ptr() as u64;
        storage[0..8].copy_from_slice(&base.to_le_bytes());
        storage[8..12].copy_from_slice(&count.to_le_bytes());
        Ok(())
    }

    /// Read-only access to the full resident buffer (header included), for
    /// a caller that needs to copy it out before the block stops being
    /// resident (the cache's `store` path).
    pub fn raw_bytes(&self) -> Result<&[u8]> {
        self.storage
            .as_deref()
            .ok_or_else(|| CoreError::invariant("raw_bytes: block is not resident"))
    }

    /// Transfer ownership of the backing buffer out, stamping the header
    /// with this block's current address and tuple count so a later
    /// [`Self::set_data`] can rebase non-inlined references against wherever
    /// the buffer lands next.
    pub fn release_data(&mut self) -> Result<Vec<u8>> {
        self.stamp_header()?;
        let storage = self
            .storage
            .take()
            .ok_or_else(|| CoreError::invariant("release_data: block is not resident"))?;
        self.is_stored = true;
        Ok(storage)
    }

    /// Accept a buffer as reloaded from storage, rebasing every non-inlined
    /// reference by the delta between the address recorded in its header
    /// and this buffer's current address (`set_data`).
    pub fn set_data(&mut self, storage: Vec<u8>) -> Result<()> {
        if self.storage.is_some() {
            fatal!("set_data: block {} is already resident", self.id);
        }
        if storage.len() != LTT_BLOCK_SIZE_BYTES {
            fatal!("set_data: buffer is not BLOCK_SIZE_IN_BYTES");
        }
        let old_base = u64::from_le_bytes(storage[0..8].try_into().unwrap());
        let stored_count = u32::from_le_bytes(storage[8..12].try_into().unwrap());
        let new_base = storage.as_ptr() as u64;
        self.active_tuple_count = stored_count as i64;
        self.storage = Some(storage);

        let delta = new_base.wrapping_sub(old_base);
        if delta != 0 {
            self.rebase_non_inlined_refs(delta)?;
        }
        Ok(())
    }

    fn rebase_non_inlined_refs(&mut self, delta: u64) -> Result<()> {
        let stride = self.tuple_stride();
        let inline_len = self.inline_len;
        let non_inlined_count = self.non_inlined_count;
        let count = self.active_tuple_count as usize;
        let storage = self.storage_mut()?;
        for index in 0..count {
            let offset = LTT_BLOCK_HEADER_SIZE + index * stride;
            let mut ref_pos = offset + 1 + inline_len;
            for _ in 0..non_inlined_count {
                let old_ptr = u64::from_le_bytes(storage[ref_pos..ref_pos + 8].try_into().unwrap());
                let new_ptr = old_ptr.wrapping_add(delta);
                storage[ref_pos..ref_pos + 8].copy_from_slice(&new_ptr.to_le_bytes());
                ref_pos += 8;
            }
        }
        Ok(())
    }

    /// Exchange buffers and counts with `other`; ids are preserved on both
    /// sides. Any stored copy of either block is now stale and must be
    /// invalidated by the caller (`swap`).
    pub fn swap(&mut self, other: &mut LttBlock) -> Result<()> {
        if self.inline_len != other.inline_len || self.non_inlined_count != other.non_inlined_count {
            fatal!("LttBlock::swap: incompatible tuple shapes");
        }
        std::mem::swap(&mut self.storage, &mut other.storage);
        std::mem::swap(&mut self.tuple_insertion_offset, &mut other.tuple_insertion_offset);
        std::mem::swap(
            &mut self.non_inlined_insertion_offset,
            &mut other.non_inlined_insertion_offset,
        );
        std::mem::swap(&mut self.active_tuple_count, &mut other.active_tuple_count);
        Ok(())
    }

    pub fn clear_for_test(&mut self) -> Result<()> {
        self.tuple_insertion_offset = LTT_BLOCK_HEADER_SIZE;
        self.non_inlined_insertion_offset = LTT_BLOCK_SIZE_BYTES;
        self.active_tuple_count = 0;
        Ok(())
    }
}

fn decode_refs(bytes: &[u8]) -> Vec<u64> {
    bytes
        .chunks_exact(8)
        .map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap()))
        .collect()
}

//! Slab/arena allocator ("Pool") for short-lived, bulk-freed allocations.
//!
//! Bump-pointer allocation from fixed chunks, with an oversize fallback and bulk
//! reset via `purge()`. `common/Pool.cpp` hands out raw `char*`; a safe Rust port can't alias a `Vec<u8>`
//! that way, so `allocate` instead returns an opaque [`PoolSlice`] handle and
//! callers fetch the bytes back through `Pool::get`/`Pool::get_mut`. This keeps
//! the bump-pointer chunk bookkeeping byte-for-byte faithful to `common/Pool.cpp` while
//! staying entirely safe.

const ALIGNMENT: usize = 8;

fn align_up(offset: usize) -> usize {
    (offset + ALIGNMENT - 1) / ALIGNMENT * ALIGNMENT
}

#[derive(Debug)]
struct Chunk {
    data: Vec<u8>,
    offset: usize,
}

impl Chunk {
    fn new(size: usize, initial_offset: usize) -> Self {
        Self {
            data: vec![0u8; size],
            offset: initial_offset,
        }
    }
}

/// Where a [`PoolSlice`] lives: a normal chunk (reused across `purge()`, up to
/// the configured maximum count) or an oversize allocation (dropped on every
/// `purge()`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SliceLocation {
    Chunk(usize),
    Oversize(usize),
}

/// A handle to a byte range allocated from a [`Pool`]. Opaque; use
/// [`Pool::get`]/[`Pool::get_mut`] to access the bytes. Handles from oversize
/// allocations are invalidated by `purge()`: oversize chunks are never
/// reused across a purge.
#[derive(Debug, Clone, Copy)]
pub struct PoolSlice {
    location: SliceLocation,
    offset: usize,
    len: usize,
}

impl PoolSlice {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A bump-pointer arena. Owns an ordered sequence of fixed-size chunks plus a
/// list of oversize chunks.
#[derive(Debug)]
pub struct Pool {
    chunks: Vec<Chunk>,
    oversize: Vec<Vec<u8>>,
    chunk_size: usize,
    max_chunk_count: usize,
    current_chunk_index: usize,
    oversize_bytes: usize,
}

impl Pool {
    /// Create a pool with the given per-chunk size and the number of chunks
    /// retained across `purge()`.
    pub fn new(chunk_size: usize, max_chunk_count: usize) -> Self {
        let max_chunk_count = max_chunk_count.max(1);
        Self {
            chunks: vec![Chunk::new(chunk_size, 0)],
            oversize: Vec::new(),
            chunk_size,
            max_chunk_count,
            current_chunk_index: 0,
            oversize_bytes: 0,
        }
    }

    /// Allocate `size` bytes. Requests larger than the chunk size are always
    /// satisfied from the oversize list. A zero-size
    /// request returns a valid, aliasable (possibly zero-length) slice without
    /// advancing the current chunk's offset beyond what `size` would already
    /// require: there's no special case for size == 0.
    pub fn allocate(&mut self, size: usize) -> PoolSlice {
        let fits_current = {
            let current = &self.chunks[self.current_chunk_index];
            size + current.offset <= current.data.len()
        };
        let fits_normal_chunk = size <= self.chunk_size;

        if fits_current {
            let chunk = &mut self.chunks[self.current_chunk_index];
            let ret_offset = chunk.offset;
            chunk.offset += size;
            chunk.offset = align_up(chunk.offset).min(chunk.data.len());
            return PoolSlice {
                location: SliceLocation::Chunk(self.current_chunk_index),
                offset: ret_offset,
                len: size,
            };
        }

        if !fits_normal_chunk {
            self.oversize.push(vec![0u8; size]);
            self.oversize_bytes += size;
            return PoolSlice {
                location: SliceLocation::Oversize(self.oversize.len() - 1),
                offset: 0,
                len: size,
            };
        }

        // Doesn't fit in the current chunk but fits in a normal-size chunk:
        // advance to the next pre-allocated chunk, or allocate a fresh one.
        self.current_chunk_index += 1;
        if self.current_chunk_index < self.chunks.len() {
            let chunk = &mut self.chunks[self.current_chunk_index];
            chunk.offset = size;
        } else {
            if self.current_chunk_index > self.max_chunk_count {
                log::warn!(
                    "Pool had to allocate a new chunk beyond max_chunk_count ({}); \
                     consider resizing chunk budgets",
                    self.max_chunk_count
                );
            }
            self.chunks.push(Chunk::new(self.chunk_size, size));
        }
        PoolSlice {
            location: SliceLocation::Chunk(self.current_chunk_index),
            offset: 0,
            len: size,
        }
    }

    /// Allocate `size` zeroed bytes.
    pub fn allocate_zeroed(&mut self, size: usize) -> PoolSlice {
        let slice = self.allocate(size);
        self.get_mut(&slice).fill(0);
        slice
    }

    /// Borrow the bytes behind a slice handle.
    pub fn get(&self, slice: &PoolSlice) -> &[u8] {
        match slice.location {
            SliceLocation::Chunk(idx) => {
                &self.chunks[idx].data[slice.offset..slice.offset + slice.len]
            }
            SliceLocation::Oversize(idx) => &self.oversize[idx][..],
        }
    }

    /// Mutably borrow the bytes behind a slice handle.
    pub fn get_mut(&mut self, slice: &PoolSlice) -> &mut [u8] {
        match slice.location {
            SliceLocation::Chunk(idx) => {
                &mut self.chunks[idx].data[slice.offset..slice.offset + slice.len]
            }
            SliceLocation::Oversize(idx) => &mut self.oversize[idx][..],
        }
    }

    /// Drop all oversize chunks, reset every retained chunk's write offset to
    /// zero, and truncate the chunk vector down to `max_chunk_count` entries.
    /// Never deallocates the first `max_chunk_count` chunks.
    pub fn purge(&mut self) {
        self.oversize.clear();
        self.oversize_bytes = 0;
        self.current_chunk_index = 0;
        if self.chunks.len() > self.max_chunk_count {
            self.chunks.truncate(self.max_chunk_count);
        }
        for chunk in &mut self.chunks {
            chunk.offset = 0;
        }
    }

    /// Total bytes currently allocated: chunk offsets plus oversize bytes,
    /// used for diagnostic accounting.
    pub fn allocated_memory(&self) -> usize {
        let chunk_bytes: usize = self.chunks.iter().map(|c| c.offset).sum();
        chunk_bytes + self.oversize_bytes
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_advances_offset_and_aligns() {
        let mut pool = Pool::new(1024, 1);
        let a = pool.allocate(3);
        let b = pool.allocate(3);
        assert_eq!(a.len(), 3);
        // a occupies [0, 3); b must start at the 8-byte aligned boundary (8).
        pool.get_mut(&a)[0] = 1;
        pool.get_mut(&b)[0] = 2;
        assert_eq!(pool.get(&a)[0], 1);
        assert_eq!(pool.get(&b)[0], 2);
    }

    #[test]
    fn zero_size_allocation_is_valid() {
        let mut pool = Pool::new(64, 1);
        let s = pool.allocate(0);
        assert!(s.is_empty());
        assert_eq!(pool.get(&s).len(), 0);
    }

    #[test]
    fn oversize_allocation_bypasses_chunk() {
        let mut pool = Pool::new(16, 1);
        let s = pool.allocate(1024);
        assert_eq!(s.len(), 1024);
        assert_eq!(pool.allocated_memory(), 1024);
        // purge drops oversize chunks entirely.
        pool.purge();
        assert_eq!(pool.allocated_memory(), 0);
    }

    #[test]
    fn purge_resets_offsets_and_caps_chunk_count() {
        let mut pool = Pool::new(8, 1);
        pool.allocate(8);
        pool.allocate(8); // forces a second chunk
        pool.allocate(8); // forces a third chunk
        assert_eq!(pool.chunk_count(), 3);
        pool.purge();
        assert_eq!(pool.chunk_count(), 1);
        assert_eq!(pool.allocated_memory(), 0);
    }

    #[test]
    fn allocate_zeroed_clears_reused_chunk_bytes() {
        let mut pool = Pool::new(64, 1);
        let a = pool.allocate(8);
        pool.get_mut(&a).fill(0xFF);
        pool.purge();
        let b = pool.allocate_zeroed(8);
        assert!(pool.get(&b).iter().all(|&b| b == 0));
    }
}

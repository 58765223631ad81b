//! `UndoLog` — the stack of undo quanta for the current transaction.
//!
//! A token-ordered deque of `UndoQuantum`s backed by a bounded free-list of
//! recycled Pools, mirroring `common/UndoLog.h`.

use std::collections::VecDeque;

use crate::config::CoreConfig;
use crate::error::Result;
use crate::pool::Pool;
use crate::undo::quantum::UndoQuantum;

/// Token-ordered deque of open `UndoQuantum`s plus a free-list of recycled
/// Pools.
pub struct UndoLog {
    /// Largest token that could possibly still be undone; any larger token is
    /// either already undone or has never existed.
    last_undo_token: i64,
    /// Largest token that definitely doesn't exist anymore; any smaller value
    /// has already been released.
    last_release_token: i64,
    pool_free_list: Vec<Pool>,
    quanta: VecDeque<UndoQuantum>,
    max_cached_pools: usize,
    pool_chunk_size: usize,
    pool_max_chunk_count: usize,
}

impl UndoLog {
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            last_undo_token: -1,
            last_release_token: -1,
            pool_free_list: Vec::new(),
            quanta: VecDeque::new(),
            max_cached_pools: config.max_cached_pools,
            pool_chunk_size: config.pool_chunk_size,
            pool_max_chunk_count: config.pool_max_chunk_count,
        }
    }

    pub fn last_undo_token(&self) -> i64 {
        self.last_undo_token
    }

    pub fn last_release_token(&self) -> i64 {
        self.last_release_token
    }

    /// Number of quanta currently open (not yet undone or released).
    pub fn open_quantum_count(&self) -> usize {
        self.quanta.len()
    }

    /// Generate a new quantum for `token`. Tokens passed here must be
    /// strictly increasing; violating this is fatal.
    pub fn generate_undo_quantum(&mut self, token: i64) -> Result<()> {
        if token <= self.last_undo_token {
            fatal!(
                "generate_undo_quantum: token {} must be greater than last_undo_token {}",
                token,
                self.last_undo_token
            );
        }
        self.last_undo_token = token;

        let pool = self.pool_free_list.pop().unwrap_or_else(|| {
            Pool::new(self.pool_chunk_size, self.pool_max_chunk_count)
        });
        self.quanta.push_back(UndoQuantum::new(token, pool));
        Ok(())
    }

    /// The most recently generated quantum that hasn't been undone or
    /// released yet, i.e. the one the current transaction registers actions
    /// against (mirrors `ExecutorContext`'s "current undo quantum" pointer).
    pub fn current_mut(&mut self) -> Option<&mut UndoQuantum> {
        self.quanta.back_mut()
    }

    pub fn current(&self) -> Option<&UndoQuantum> {
        self.quanta.back()
    }

    fn recycle_pool(&mut self, mut pool: Pool) {
        pool.purge();
        if self.pool_free_list.len() < self.max_cached_pools {
            self.pool_free_list.push(pool);
        }
        // else: drop the pool, exceeding the free-list cap.
    }

    /// Undo all undoable actions from the latest quantum back through the
    /// quantum with token `token` (inclusive), LIFO.
    pub fn undo(&mut self, token: i64) -> Result<()> {
        if token < self.last_release_token {
            fatal!(
                "undo: token {} is older than last_release_token {}",
                token,
                self.last_release_token
            );
        }
        if token > self.last_undo_token {
            // A transaction that never sent work to the engine; nothing to do.
            return Ok(());
        }

        self.last_undo_token = token - 1;
        while let Some(back_token) = self.quanta.back().map(UndoQuantum::token) {
            if back_token < token {
                break;
            }
            let quantum = self.quanta.pop_back().expect("just peeked a back element");
            let pool = quantum.undo();
            self.recycle_pool(pool);
            if back_token == token {
                break;
            }
        }
        Ok(())
    }

    /// Release memory held by all quanta up to and including `token`, FIFO.
    /// After this, those actions can never be undone.
    pub fn release(&mut self, token: i64) -> Result<()> {
        if token <= self.last_release_token {
            fatal!(
                "release: token {} must be greater than last_release_token {}",
                token,
                self.last_release_token
            );
        }
        self.last_release_token = token;

        while let Some(front_token) = self.quanta.front().map(UndoQuantum::token) {
            if front_token > token {
                return Ok(());
            }
            let quantum = self.quanta.pop_front().expect("just peeked a front element");
            let pool = quantum.release();
            self.recycle_pool(pool);
            if front_token == token {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Total bytes tracked across open quanta and the recycled pool
    /// free-list.
    pub fn allocated_bytes(&self) -> usize {
        let open: usize = self.quanta.iter().map(UndoQuantum::allocated_memory).sum();
        let cached: usize = self.pool_free_list.iter().map(Pool::allocated_memory).sum();
        open + cached
    }

    pub fn cached_pool_count(&self) -> usize {
        self.pool_free_list.len()
    }
}

//! The host runtime's callback surface.
//!
//! Every call the core makes outward is synchronous and goes through this trait.
//! Production hosts implement it over their JNI/IPC bridge; tests implement it
//! with an in-memory double (see `tests/common`).

use crate::error::Result;
use crate::ltt::block::LttBlock;

/// Identifies a large temp table block for store/load/release callbacks.
pub type LttBlockId = crate::ltt::block::BlockId;

/// Outcome of a `fragment_progress_update` call: either "continue, and call me
/// again after N more tuples" or an abort signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressDecision {
    /// Keep going; report again after this many more tuples are processed.
    ContinueAfter(u64),
    /// Abort the fragment. The caller should undo the current undo quantum.
    Abort,
}

/// The synchronous callback surface the execution core uses to reach the host
/// runtime ("top end").
pub trait TopEnd {
    /// Fetch a serialized table for `dep_id` and deserialize it into `dest`.
    /// Returns `false` if there is no such dependency.
    fn load_next_dependency(&mut self, dep_id: i32, dest: &mut Vec<u8>) -> Result<bool>;

    /// Report progress on a long-running fragment. The host may ask to abort.
    fn fragment_progress_update(
        &mut self,
        batch_index: i32,
        node_type: &str,
        tuples_processed: i64,
        current_mem_bytes: i64,
        peak_mem_bytes: i64,
    ) -> ProgressDecision;

    /// Fetch the serialized plan for `fragment_id`. Empty if not found.
    fn plan_for_fragment_id(&mut self, fragment_id: i64) -> Vec<u8>;

    /// Hand ownership of a committed export block to the host. Failure here is
    /// fatal: the buffer has already left the stream's bookkeeping.
    fn push_export_buffer(
        &mut self,
        partition_id: i32,
        table_name: &str,
        block: Vec<u8>,
    ) -> Result<()>;

    /// Hand ownership of a committed DR block to the host. The returned value
    /// caps future row budgets for this stream.
    fn push_dr_buffer(&mut self, partition_id: i32, block: Vec<u8>) -> Result<i64>;

    /// Persist a large temp table block. On success the caller relinquishes the
    /// in-memory copy. Recoverable on failure.
    fn store_large_temp_table_block(&mut self, block: &LttBlock) -> Result<bool>;

    /// Reload a previously stored block's bytes. Recoverable on failure.
    fn load_large_temp_table_block(&mut self, block_id: LttBlockId) -> Result<Option<Vec<u8>>>;

    /// Drop a persisted copy of a large temp table block. Recoverable on failure.
    fn release_large_temp_table_block(&mut self, block_id: LttBlockId) -> Result<bool>;

    /// Terminate the process. Implementations of this trait in production hosts
    /// never return from this call; the default here just documents the
    /// contract since this core itself never calls `process::exit`.
    fn crash_volt_db(&mut self, fatal_message: &str) -> ! {
        panic!("fatal engine error, host asked to terminate: {}", fatal_message);
    }
}

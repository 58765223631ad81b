//! Shared `TopEnd` test doubles for integration tests.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;

use voltcore::ltt::LttBlock;
use voltcore::topend::{LttBlockId, ProgressDecision};
use voltcore::{CoreError, Result, TopEnd};

/// An in-memory stand-in for the host runtime. Export/DR buffers are
/// recorded for inspection instead of being shipped anywhere; large temp
/// table blocks are stored in a plain map, mirroring what a real host would
/// do against a spill file.
#[derive(Default)]
pub struct TestTopEnd {
    pub exported_tables: HashMap<i32, Vec<(String, Vec<u8>)>>,
    pub dr_buffers: Vec<(i32, Vec<u8>)>,
    pub stored_blocks: HashMap<LttBlockId, Vec<u8>>,
    pub next_dr_sequence: i64,
}

impl TestTopEnd {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TopEnd for TestTopEnd {
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
    ) -> ProgressDecision {
        ProgressDecision::ContinueAfter(1_000_000)
    }

    fn plan_for_fragment_id(&mut self, _fragment_id: i64) -> Vec<u8> {
        Vec::new()
    }

    fn push_export_buffer(&mut self, partition_id: i32, table_name: &str, block: Vec<u8>) -> Result<()> {
        self.exported_tables
            .entry(partition_id)
            .or_default()
            .push((table_name.to_string(), block));
        Ok(())
    }

    fn push_dr_buffer(&mut self, partition_id: i32, block: Vec<u8>) -> Result<i64> {
        self.dr_buffers.push((partition_id, block));
        self.next_dr_sequence += 1;
        Ok(self.next_dr_sequence)
    }

    fn store_large_temp_table_block(&mut self, block: &LttBlock) -> Result<bool> {
        self.stored_blocks.insert(block.id(), block.raw_bytes()?.to_vec());
        Ok(true)
    }

    fn load_large_temp_table_block(&mut self, block_id: LttBlockId) -> Result<Option<Vec<u8>>> {
        Ok(self.stored_blocks.get(&block_id).cloned())
    }

    fn release_large_temp_table_block(&mut self, block_id: LttBlockId) -> Result<bool> {
        if self.stored_blocks.remove(&block_id).is_none() {
            return Err(CoreError::not_found(format!("no stored copy of block {}", block_id)));
        }
        Ok(true)
    }
}

/// A `TopEnd` whose large-temp-table store/load/release calls actually hit
/// the filesystem, for tests that need to exercise the spill-to-disk path
/// rather than just a `HashMap` standing in for it. Each block is written to
/// its own file under a scratch directory that's removed when the `TempDir`
/// drops.
pub struct SpillFileTopEnd {
    dir: TempDir,
}

impl SpillFileTopEnd {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("failed to create scratch spill directory"),
        }
    }

    fn path_for(&self, block_id: LttBlockId) -> PathBuf {
        self.dir.path().join(format!("block-{}.bin", block_id))
    }
}

impl TopEnd for SpillFileTopEnd {
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
    ) -> ProgressDecision {
        ProgressDecision::ContinueAfter(1_000_000)
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

    fn store_large_temp_table_block(&mut self, block: &LttBlock) -> Result<bool> {
        fs::write(self.path_for(block.id()), block.raw_bytes()?)
            .map_err(|e| CoreError::top_end(format!("spill write failed: {}", e)))?;
        Ok(true)
    }

    fn load_large_temp_table_block(&mut self, block_id: LttBlockId) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(block_id)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CoreError::top_end(format!("spill read failed: {}", e))),
        }
    }

    fn release_large_temp_table_block(&mut self, block_id: LttBlockId) -> Result<bool> {
        match fs::remove_file(self.path_for(block_id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CoreError::not_found(format!("no stored copy of block {}", block_id)))
            }
            Err(e) => Err(CoreError::top_end(format!("spill remove failed: {}", e))),
        }
    }
}

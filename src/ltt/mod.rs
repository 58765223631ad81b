//! Large temp table storage: bounded block cache, block layout, the table
//! itself, and its external-merge sort.

pub mod block;
pub mod cache;
pub mod sort;
pub mod table;

pub use block::{BlockId, LttBlock, TupleView};
pub use cache::LttBlockCache;
pub use sort::{sort, TupleComparer};
pub use table::LargeTempTable;

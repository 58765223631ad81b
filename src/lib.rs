//! Partition-local, deterministic SQL execution core.
//!
//! This crate implements the four subsystems that carry the real engineering
//! weight of an in-process, single-threaded-per-partition execution engine:
//! the undo log, the large-temp-table block cache and its external-merge
//! sort, the append-only export/DR tuple stream, and the slab/arena
//! allocator those two are built on. Everything the core reaches out for
//! (the planner, the expression evaluator, the catalog, persistent tables)
//! is an external collaborator behind the [`topend::TopEnd`] trait.

#[macro_use]
pub mod error;

pub mod config;
pub mod context;
pub mod ltt;
pub mod pool;
pub mod stream;
pub mod topend;
pub mod undo;

pub use config::CoreConfig;
pub use context::ExecutorContext;
pub use error::{CoreError, Result, Severity};
pub use topend::{ProgressDecision, TopEnd};

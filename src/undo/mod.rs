//! Undo log: reversible actions grouped into quanta, undone in LIFO
//! order and released in FIFO order.

pub mod log;
pub mod quantum;

pub use log::UndoLog;
pub use quantum::{ReleaseInterest, UndoAction, UndoQuantum};

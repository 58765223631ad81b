//! Export/DR tuple stream: blocks, the stream itself, and the wire format.

pub mod block;
pub mod tuple_stream;
pub mod wire;

pub use block::{BlockCapacityKind, StreamBlock};
pub use tuple_stream::{PendingFlushRegistry, TupleStream};
pub use wire::{decode_row, encode_row, ExportMetaHeader, ExportOperation, EXPORT_METADATA_COLUMNS};

//! Provider stream consumption: reasoning blocks, tool blocks, snapshots.

mod processor;
pub mod thinking;

pub use processor::{ChunkProcessor, ProcessingMode, StreamOutcome};
pub use thinking::ThinkingState;

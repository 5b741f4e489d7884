//! The Reef engine: replicated PG/shard/blob lifecycle over chunked storage.
//!
//! [`ReefEngine`] ties the replication port, the heap chunk selector, the
//! per-PG index tables and the superblock store into one replicated-commit
//! state machine:
//!
//! - PG creation and membership run through `CREATE_PG` proposals and land
//!   in a durable PG superblock.
//! - Shards reserve a chunk at pre-commit, bind it at commit and release it
//!   on rollback.
//! - Blob puts/deletes update the per-PG `(shard_id, blob_id) → extent`
//!   index; deletes tombstone without reclaiming space.
//! - Restart recovery replays the three stores in a fixed order: index
//!   tables, PG superblocks, shard superblocks, then the free-chunk heaps.

pub mod blob;
pub mod checkpoint;
pub mod engine;
pub mod error;
pub mod iterator;
pub mod pg;
pub mod recovery;
mod result_ctx;
pub mod shard;
pub mod state_machine;

pub use checkpoint::{CheckpointCallbacks, spawn_checkpoint_task};
pub use engine::{EngineConfig, ReefEngine};
pub use error::{BlobError, EngineError, PGError, ShardError};
pub use iterator::{BlobInfoData, PgBlobIterator};

#[cfg(test)]
mod tests;

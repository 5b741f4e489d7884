//! Metadata persistence for Reef: typed superblocks and per-PG blob indexes.
//!
//! [`MetaStore`] holds the durable PG and shard superblock records plus one
//! ordered index table per PG mapping `(shard_id, blob_id)` to a physical
//! extent. Backed by Fjall partitions on disk, with a pure in-memory backend
//! for tests and memory-only nodes.

pub mod error;
pub mod index;
pub mod store;

pub use error::MetaError;
pub use index::{IndexTable, PutOutcome};
pub use store::MetaStore;

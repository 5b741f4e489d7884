//! Per-device heap chunk selector.
//!
//! [`HeapChunkSelector`] owns the assignment of device chunks to placement
//! groups. Free chunks live in one max-heap per physical device, ordered by
//! free capacity; creating a PG drains whole chunks from the fullest device,
//! and each new shard reserves one of the PG's chunks until sealed or rolled
//! back.
//!
//! The selector is rebuilt on restart: PG chunk lists are re-registered from
//! the PG superblocks first, then [`recover_per_dev_chunk_heap`]
//! (HeapChunkSelector::recover_per_dev_chunk_heap) folds every unowned chunk
//! back into the heaps.

pub mod selector;

pub use selector::HeapChunkSelector;

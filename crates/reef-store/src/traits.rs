//! Core trait and types for block device access.

use bytes::Bytes;
use reef_types::{BlkAllocHints, ChunkId, DevId, MultiBlkId};

use crate::error::StoreError;

/// Static description and live occupancy of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Chunk identifier, unique across the device's pdevs.
    pub chunk_id: ChunkId,
    /// Physical device hosting the chunk.
    pub pdev_id: DevId,
    /// Total blocks in the chunk.
    pub total_blks: u64,
    /// Blocks currently free.
    pub available_blks: u64,
}

/// Trait for chunked block storage with extent allocation.
///
/// All implementations must be `Send + Sync` for use across async tasks.
/// Payloads are passed as [`Bytes`] scatter lists to avoid copies through the
/// replication pipeline. Chunk metadata queries are synchronous; allocation
/// and data I/O may suspend.
#[async_trait::async_trait]
pub trait BlockDevice: Send + Sync {
    /// Logical block size in bytes.
    fn block_size(&self) -> u32;

    /// Size of every chunk in bytes.
    fn chunk_size(&self) -> u64;

    /// Enumerate all chunks with their current occupancy.
    fn chunks(&self) -> Vec<ChunkInfo>;

    /// Look up one chunk. Returns `None` for an unknown id.
    fn chunk_info(&self, chunk_id: ChunkId) -> Option<ChunkInfo>;

    /// Allocate `nblks` contiguous blocks, honouring placement hints.
    ///
    /// With a chunk hint the allocation is pinned to that chunk and fails
    /// with [`StoreError::OutOfSpace`] if it cannot fit there.
    async fn alloc(&self, nblks: u16, hints: &BlkAllocHints) -> Result<MultiBlkId, StoreError>;

    /// Write a scatter list of buffers to an allocated extent.
    ///
    /// The total length must equal the extent's size in bytes; callers pad
    /// to block alignment before writing.
    async fn write(&self, blkid: &MultiBlkId, data: &[Bytes]) -> Result<(), StoreError>;

    /// Read `len` bytes starting `offset` bytes into the extent.
    async fn read(&self, blkid: &MultiBlkId, offset: u32, len: u32) -> Result<Bytes, StoreError>;

    /// Return an extent to the chunk's free pool.
    async fn free(&self, blkid: &MultiBlkId) -> Result<(), StoreError>;
}

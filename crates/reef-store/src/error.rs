//! Error types for block device operations.

use reef_types::{ChunkId, MultiBlkId};

/// Errors that can occur during block device operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The referenced chunk does not exist on this device.
    #[error("unknown chunk: {0}")]
    UnknownChunk(ChunkId),

    /// Not enough contiguous free blocks to satisfy an allocation.
    #[error("out of space: need {nblks} blocks in chunk {chunk_id}")]
    OutOfSpace {
        /// Blocks requested.
        nblks: u16,
        /// Chunk the allocation was pinned to (0 when unpinned).
        chunk_id: ChunkId,
    },

    /// A write did not match the extent's block-aligned size.
    #[error("misaligned write to {blkid}: {len} bytes")]
    Misaligned {
        /// Target extent.
        blkid: MultiBlkId,
        /// Bytes offered.
        len: usize,
    },

    /// A read referenced blocks outside the extent or chunk.
    #[error("read out of range on {0}")]
    OutOfRange(MultiBlkId),

    /// An I/O error from the underlying file or directory.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted allocator state failed to decode.
    #[error("allocator map corrupted: {0}")]
    CorruptAllocMap(String),
}

//! In-memory block device backend.

use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;
use reef_types::{BlkAllocHints, ChunkId, DevId, MultiBlkId};
use tracing::debug;

use crate::alloc::{AllocTable, ChunkAlloc};
use crate::error::StoreError;
use crate::traits::{BlockDevice, ChunkInfo};

/// In-memory block device backed by a `Mutex<HashMap>` per-chunk byte store.
///
/// Useful for testing and for nodes configured to run in memory-only mode.
/// Chunk storage grows lazily: a chunk occupies memory only up to its highest
/// written block.
pub struct MemoryDevice {
    block_size: u32,
    chunk_size: u64,
    state: Mutex<State>,
}

struct State {
    alloc: AllocTable,
    data: HashMap<ChunkId, Vec<u8>>,
}

impl MemoryDevice {
    /// Create a device with `chunks_per_pdev` chunks on each of `num_pdevs`
    /// simulated physical devices. Chunk ids are assigned sequentially
    /// starting at 1.
    pub fn new(num_pdevs: u32, chunks_per_pdev: u16, chunk_size: u64, block_size: u32) -> Self {
        assert!(chunk_size % u64::from(block_size) == 0);
        let blks_per_chunk = chunk_size / u64::from(block_size);

        let mut alloc = AllocTable::default();
        let mut next_chunk: ChunkId = 1;
        for pdev in 0..num_pdevs {
            for _ in 0..chunks_per_pdev {
                alloc
                    .chunks
                    .insert(next_chunk, ChunkAlloc::new(pdev as DevId, blks_per_chunk));
                next_chunk += 1;
            }
        }

        Self {
            block_size,
            chunk_size,
            state: Mutex::new(State {
                alloc,
                data: HashMap::new(),
            }),
        }
    }

    fn extent_bounds(&self, blkid: &MultiBlkId) -> (usize, usize) {
        let start = (blkid.blk_num * u64::from(self.block_size)) as usize;
        let len = usize::from(blkid.nblks) * self.block_size as usize;
        (start, len)
    }
}

#[async_trait::async_trait]
impl BlockDevice for MemoryDevice {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    fn chunks(&self) -> Vec<ChunkInfo> {
        self.state.lock().expect("lock poisoned").alloc.infos()
    }

    fn chunk_info(&self, chunk_id: ChunkId) -> Option<ChunkInfo> {
        self.state
            .lock()
            .expect("lock poisoned")
            .alloc
            .chunk_info(chunk_id)
    }

    async fn alloc(&self, nblks: u16, hints: &BlkAllocHints) -> Result<MultiBlkId, StoreError> {
        let blkid = self
            .state
            .lock()
            .expect("lock poisoned")
            .alloc
            .alloc(nblks, hints)?;
        debug!(%blkid, "allocated extent");
        Ok(blkid)
    }

    async fn write(&self, blkid: &MultiBlkId, data: &[Bytes]) -> Result<(), StoreError> {
        let (start, len) = self.extent_bounds(blkid);
        let total: usize = data.iter().map(|b| b.len()).sum();
        if total != len {
            return Err(StoreError::Misaligned {
                blkid: *blkid,
                len: total,
            });
        }

        let mut state = self.state.lock().expect("lock poisoned");
        if !state.alloc.chunks.contains_key(&blkid.chunk_id) {
            return Err(StoreError::UnknownChunk(blkid.chunk_id));
        }
        let chunk = state.data.entry(blkid.chunk_id).or_default();
        if chunk.len() < start + len {
            chunk.resize(start + len, 0);
        }
        let mut off = start;
        for buf in data {
            chunk[off..off + buf.len()].copy_from_slice(buf);
            off += buf.len();
        }
        Ok(())
    }

    async fn read(&self, blkid: &MultiBlkId, offset: u32, len: u32) -> Result<Bytes, StoreError> {
        let (start, extent_len) = self.extent_bounds(blkid);
        if offset as usize + len as usize > extent_len {
            return Err(StoreError::OutOfRange(*blkid));
        }

        let state = self.state.lock().expect("lock poisoned");
        let chunk = state
            .data
            .get(&blkid.chunk_id)
            .ok_or(StoreError::UnknownChunk(blkid.chunk_id))?;
        let lo = start + offset as usize;
        let hi = lo + len as usize;
        if chunk.len() < hi {
            return Err(StoreError::OutOfRange(*blkid));
        }
        Ok(Bytes::copy_from_slice(&chunk[lo..hi]))
    }

    async fn free(&self, blkid: &MultiBlkId) -> Result<(), StoreError> {
        self.state.lock().expect("lock poisoned").alloc.free(blkid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hints_for(chunk: ChunkId) -> BlkAllocHints {
        BlkAllocHints {
            chunk_id: Some(chunk),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_alloc_write_read_roundtrip() {
        let dev = MemoryDevice::new(1, 4, 64 * 1024, 1024);
        let blkid = dev.alloc(2, &hints_for(1)).await.unwrap();

        let payload = vec![0xAB; 2048];
        dev.write(&blkid, &[Bytes::from(payload.clone())])
            .await
            .unwrap();

        let got = dev.read(&blkid, 0, 2048).await.unwrap();
        assert_eq!(&got[..], &payload[..]);

        // Sub-range read.
        let got = dev.read(&blkid, 100, 50).await.unwrap();
        assert_eq!(&got[..], &payload[100..150]);
    }

    #[tokio::test]
    async fn test_scatter_write() {
        let dev = MemoryDevice::new(1, 1, 64 * 1024, 1024);
        let blkid = dev.alloc(1, &hints_for(1)).await.unwrap();

        let a = Bytes::from(vec![1u8; 300]);
        let b = Bytes::from(vec![2u8; 500]);
        let pad = Bytes::from(vec![0u8; 224]);
        dev.write(&blkid, &[a, b, pad]).await.unwrap();

        let got = dev.read(&blkid, 0, 1024).await.unwrap();
        assert_eq!(&got[..300], &[1u8; 300][..]);
        assert_eq!(&got[300..800], &[2u8; 500][..]);
        assert_eq!(&got[800..], &[0u8; 224][..]);
    }

    #[tokio::test]
    async fn test_misaligned_write_rejected() {
        let dev = MemoryDevice::new(1, 1, 64 * 1024, 1024);
        let blkid = dev.alloc(1, &hints_for(1)).await.unwrap();
        let err = dev
            .write(&blkid, &[Bytes::from(vec![0u8; 100])])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Misaligned { .. }));
    }

    #[tokio::test]
    async fn test_free_returns_capacity() {
        let dev = MemoryDevice::new(1, 1, 4 * 1024, 1024);
        let before = dev.chunk_info(1).unwrap().available_blks;
        let blkid = dev.alloc(4, &hints_for(1)).await.unwrap();
        assert_eq!(dev.chunk_info(1).unwrap().available_blks, before - 4);
        dev.free(&blkid).await.unwrap();
        assert_eq!(dev.chunk_info(1).unwrap().available_blks, before);
    }

    #[tokio::test]
    async fn test_chunks_span_pdevs() {
        let dev = MemoryDevice::new(2, 3, 64 * 1024, 1024);
        let chunks = dev.chunks();
        assert_eq!(chunks.len(), 6);
        assert_eq!(chunks.iter().filter(|c| c.pdev_id == 0).count(), 3);
        assert_eq!(chunks.iter().filter(|c| c.pdev_id == 1).count(), 3);
    }
}

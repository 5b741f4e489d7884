//! File-based block device backend.
//!
//! Stores one file per chunk (`chunk-NNNNN.dat`, grown sparsely) plus a
//! sidecar `alloc.map` holding the allocator's free-extent lists. The map is
//! rewritten atomically (temp file + rename) after every allocation change so
//! that a reopened device resumes with the same occupancy.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use reef_types::{BlkAllocHints, ChunkId, DevId, MultiBlkId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::alloc::{AllocTable, ChunkAlloc};
use crate::error::StoreError;
use crate::traits::{BlockDevice, ChunkInfo};

const ALLOC_MAP_NAME: &str = "alloc.map";

/// Persisted form of the allocator table.
#[derive(Serialize, Deserialize)]
struct SavedMap {
    block_size: u32,
    chunk_size: u64,
    /// `(chunk_id, pdev_id, total_blks, free extents)` per chunk.
    chunks: Vec<(ChunkId, DevId, u64, Vec<(u64, u64)>)>,
}

/// File-backed block device with persistent allocator state.
pub struct FileDevice {
    base_dir: PathBuf,
    block_size: u32,
    chunk_size: u64,
    state: Mutex<AllocTable>,
    /// Open chunk files, lazily created on first write.
    files: Mutex<HashMap<ChunkId, Arc<File>>>,
}

impl FileDevice {
    /// Open a device rooted at `base_dir`.
    ///
    /// If an allocator map exists it is restored and the geometry arguments
    /// are ignored; otherwise a fresh device with the given geometry is laid
    /// out and persisted. Chunk ids are assigned sequentially starting at 1.
    pub fn open(
        base_dir: impl AsRef<Path>,
        num_pdevs: u32,
        chunks_per_pdev: u16,
        chunk_size: u64,
        block_size: u32,
    ) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;

        let map_path = base_dir.join(ALLOC_MAP_NAME);
        if map_path.exists() {
            let bytes = std::fs::read(&map_path)?;
            let saved: SavedMap = postcard::from_bytes(&bytes)
                .map_err(|e| StoreError::CorruptAllocMap(e.to_string()))?;

            let mut alloc = AllocTable::default();
            for (chunk_id, pdev_id, total_blks, free) in saved.chunks {
                alloc
                    .chunks
                    .insert(chunk_id, ChunkAlloc::restore(pdev_id, total_blks, free));
            }
            debug!(path = %map_path.display(), chunks = alloc.chunks.len(), "restored allocator map");
            return Ok(Self {
                base_dir,
                block_size: saved.block_size,
                chunk_size: saved.chunk_size,
                state: Mutex::new(alloc),
                files: Mutex::new(HashMap::new()),
            });
        }

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

        let dev = Self {
            base_dir,
            block_size,
            chunk_size,
            state: Mutex::new(alloc),
            files: Mutex::new(HashMap::new()),
        };
        dev.persist_map()?;
        Ok(dev)
    }

    fn chunk_path(&self, chunk_id: ChunkId) -> PathBuf {
        self.base_dir.join(format!("chunk-{chunk_id:05}.dat"))
    }

    fn chunk_file(&self, chunk_id: ChunkId) -> Result<Arc<File>, StoreError> {
        let mut files = self.files.lock().expect("lock poisoned");
        if let Some(f) = files.get(&chunk_id) {
            return Ok(f.clone());
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.chunk_path(chunk_id))?;
        let file = Arc::new(file);
        files.insert(chunk_id, file.clone());
        Ok(file)
    }

    /// Rewrite the allocator map atomically.
    fn persist_map(&self) -> Result<(), StoreError> {
        let saved = {
            let state = self.state.lock().expect("lock poisoned");
            SavedMap {
                block_size: self.block_size,
                chunk_size: self.chunk_size,
                chunks: state
                    .chunks
                    .iter()
                    .map(|(&id, c)| (id, c.pdev_id, c.total_blks, c.free_list().to_vec()))
                    .collect(),
            }
        };
        let bytes = postcard::to_allocvec(&saved)
            .map_err(|e| StoreError::CorruptAllocMap(e.to_string()))?;

        let path = self.base_dir.join(ALLOC_MAP_NAME);
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl BlockDevice for FileDevice {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    fn chunks(&self) -> Vec<ChunkInfo> {
        self.state.lock().expect("lock poisoned").infos()
    }

    fn chunk_info(&self, chunk_id: ChunkId) -> Option<ChunkInfo> {
        self.state
            .lock()
            .expect("lock poisoned")
            .chunk_info(chunk_id)
    }

    async fn alloc(&self, nblks: u16, hints: &BlkAllocHints) -> Result<MultiBlkId, StoreError> {
        let blkid = self
            .state
            .lock()
            .expect("lock poisoned")
            .alloc(nblks, hints)?;
        if let Err(e) = self.persist_map() {
            warn!(%e, "failed to persist allocator map after alloc");
        }
        Ok(blkid)
    }

    async fn write(&self, blkid: &MultiBlkId, data: &[Bytes]) -> Result<(), StoreError> {
        let extent_len = usize::from(blkid.nblks) * self.block_size as usize;
        let total: usize = data.iter().map(|b| b.len()).sum();
        if total != extent_len {
            return Err(StoreError::Misaligned {
                blkid: *blkid,
                len: total,
            });
        }
        if self.chunk_info(blkid.chunk_id).is_none() {
            return Err(StoreError::UnknownChunk(blkid.chunk_id));
        }

        let file = self.chunk_file(blkid.chunk_id)?;
        let mut offset = blkid.blk_num * u64::from(self.block_size);
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            for buf in &data {
                file.write_all_at(buf, offset)?;
                offset += buf.len() as u64;
            }
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }

    async fn read(&self, blkid: &MultiBlkId, offset: u32, len: u32) -> Result<Bytes, StoreError> {
        let extent_len = u64::from(blkid.nblks) * u64::from(self.block_size);
        if u64::from(offset) + u64::from(len) > extent_len {
            return Err(StoreError::OutOfRange(*blkid));
        }
        if self.chunk_info(blkid.chunk_id).is_none() {
            return Err(StoreError::UnknownChunk(blkid.chunk_id));
        }

        let file = self.chunk_file(blkid.chunk_id)?;
        let pos = blkid.blk_num * u64::from(self.block_size) + u64::from(offset);
        tokio::task::spawn_blocking(move || -> Result<Bytes, StoreError> {
            let mut buf = vec![0u8; len as usize];
            file.read_exact_at(&mut buf, pos)?;
            Ok(Bytes::from(buf))
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }

    async fn free(&self, blkid: &MultiBlkId) -> Result<(), StoreError> {
        self.state.lock().expect("lock poisoned").free(blkid)?;
        self.persist_map()
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
    async fn test_write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let dev = FileDevice::open(dir.path(), 1, 2, 64 * 1024, 1024).unwrap();

        let blkid = dev.alloc(3, &hints_for(1)).await.unwrap();
        let payload = vec![0x5A; 3072];
        dev.write(&blkid, &[Bytes::from(payload.clone())])
            .await
            .unwrap();

        let got = dev.read(&blkid, 1024, 1024).await.unwrap();
        assert_eq!(&got[..], &payload[1024..2048]);
    }

    #[tokio::test]
    async fn test_reopen_restores_allocator() {
        let dir = tempfile::tempdir().unwrap();
        let blkid = {
            let dev = FileDevice::open(dir.path(), 1, 2, 64 * 1024, 1024).unwrap();
            dev.alloc(4, &hints_for(1)).await.unwrap()
        };

        // Reopen: geometry args are ignored, occupancy must survive.
        let dev = FileDevice::open(dir.path(), 9, 9, 1024, 512).unwrap();
        assert_eq!(dev.block_size(), 1024);
        assert_eq!(dev.chunk_size(), 64 * 1024);
        let info = dev.chunk_info(1).unwrap();
        assert_eq!(info.available_blks, 64 - 4);

        // A fresh allocation must not overlap the surviving extent.
        let second = dev.alloc(4, &hints_for(1)).await.unwrap();
        assert_ne!(second.blk_num, blkid.blk_num);
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let blkid = {
            let dev = FileDevice::open(dir.path(), 1, 1, 64 * 1024, 1024).unwrap();
            let blkid = dev.alloc(1, &hints_for(1)).await.unwrap();
            dev.write(&blkid, &[Bytes::from(vec![7u8; 1024])])
                .await
                .unwrap();
            blkid
        };

        let dev = FileDevice::open(dir.path(), 1, 1, 64 * 1024, 1024).unwrap();
        let got = dev.read(&blkid, 0, 1024).await.unwrap();
        assert_eq!(&got[..], &[7u8; 1024][..]);
    }
}

//! First-fit extent allocator shared by the device backends.

use std::collections::BTreeMap;

use reef_types::{BlkAllocHints, ChunkId, DevId, MultiBlkId};

use crate::error::StoreError;
use crate::traits::ChunkInfo;

/// Allocator state for one chunk: a sorted, coalesced free-extent list.
#[derive(Debug, Clone)]
pub(crate) struct ChunkAlloc {
    pub(crate) pdev_id: DevId,
    pub(crate) total_blks: u64,
    /// Free extents as `(start, len)`, sorted by start, never adjacent.
    free: Vec<(u64, u64)>,
    available: u64,
}

impl ChunkAlloc {
    pub(crate) fn new(pdev_id: DevId, total_blks: u64) -> Self {
        Self {
            pdev_id,
            total_blks,
            free: vec![(0, total_blks)],
            available: total_blks,
        }
    }

    pub(crate) fn available_blks(&self) -> u64 {
        self.available
    }

    /// First-fit allocation of `nblks` contiguous blocks.
    fn alloc(&mut self, nblks: u64) -> Option<u64> {
        let pos = self.free.iter().position(|&(_, len)| len >= nblks)?;
        let (start, len) = self.free[pos];
        if len == nblks {
            self.free.remove(pos);
        } else {
            self.free[pos] = (start + nblks, len - nblks);
        }
        self.available -= nblks;
        Some(start)
    }

    /// Return an extent, merging with adjacent free neighbours.
    fn free_extent(&mut self, start: u64, len: u64) {
        let pos = self.free.partition_point(|&(s, _)| s < start);
        self.free.insert(pos, (start, len));
        self.available += len;

        // Coalesce with the successor, then the predecessor.
        if pos + 1 < self.free.len() && self.free[pos].0 + self.free[pos].1 == self.free[pos + 1].0
        {
            self.free[pos].1 += self.free[pos + 1].1;
            self.free.remove(pos + 1);
        }
        if pos > 0 && self.free[pos - 1].0 + self.free[pos - 1].1 == self.free[pos].0 {
            self.free[pos - 1].1 += self.free[pos].1;
            self.free.remove(pos);
        }
    }

    pub(crate) fn free_list(&self) -> &[(u64, u64)] {
        &self.free
    }

    pub(crate) fn restore(pdev_id: DevId, total_blks: u64, free: Vec<(u64, u64)>) -> Self {
        let available = free.iter().map(|&(_, l)| l).sum();
        Self {
            pdev_id,
            total_blks,
            free,
            available,
        }
    }
}

/// Allocator table over all chunks of a device.
#[derive(Debug, Default)]
pub(crate) struct AllocTable {
    pub(crate) chunks: BTreeMap<ChunkId, ChunkAlloc>,
}

impl AllocTable {
    pub(crate) fn chunk_info(&self, chunk_id: ChunkId) -> Option<ChunkInfo> {
        self.chunks.get(&chunk_id).map(|c| ChunkInfo {
            chunk_id,
            pdev_id: c.pdev_id,
            total_blks: c.total_blks,
            available_blks: c.available_blks(),
        })
    }

    pub(crate) fn infos(&self) -> Vec<ChunkInfo> {
        self.chunks
            .keys()
            .map(|&id| self.chunk_info(id).unwrap())
            .collect()
    }

    /// Allocate honouring the chunk hint; unhinted allocations go to the
    /// chunk with the most free blocks.
    pub(crate) fn alloc(
        &mut self,
        nblks: u16,
        hints: &BlkAllocHints,
    ) -> Result<MultiBlkId, StoreError> {
        let chunk_id = match hints.chunk_id {
            Some(id) => {
                if !self.chunks.contains_key(&id) {
                    return Err(StoreError::UnknownChunk(id));
                }
                id
            }
            None => self
                .chunks
                .iter()
                .filter(|(_, c)| hints.pdev_id.is_none_or(|p| c.pdev_id == p))
                .max_by_key(|(id, c)| (c.available_blks(), std::cmp::Reverse(**id)))
                .map(|(&id, _)| id)
                .ok_or(StoreError::OutOfSpace { nblks, chunk_id: 0 })?,
        };

        let chunk = self.chunks.get_mut(&chunk_id).unwrap();
        let start = chunk
            .alloc(u64::from(nblks))
            .ok_or(StoreError::OutOfSpace { nblks, chunk_id })?;
        Ok(MultiBlkId::new(start, nblks, chunk_id))
    }

    pub(crate) fn free(&mut self, blkid: &MultiBlkId) -> Result<(), StoreError> {
        let chunk = self
            .chunks
            .get_mut(&blkid.chunk_id)
            .ok_or(StoreError::UnknownChunk(blkid.chunk_id))?;
        chunk.free_extent(blkid.blk_num, u64::from(blkid.nblks));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_fit_and_exhaustion() {
        let mut c = ChunkAlloc::new(0, 10);
        assert_eq!(c.alloc(4), Some(0));
        assert_eq!(c.alloc(4), Some(4));
        assert_eq!(c.alloc(4), None);
        assert_eq!(c.alloc(2), Some(8));
        assert_eq!(c.available_blks(), 0);
    }

    #[test]
    fn test_free_coalesces_neighbours() {
        let mut c = ChunkAlloc::new(0, 10);
        let a = c.alloc(3).unwrap();
        let b = c.alloc(3).unwrap();
        let d = c.alloc(3).unwrap();

        c.free_extent(a, 3);
        c.free_extent(d, 3);
        // d merged with the tail remainder, a stayed separate.
        assert_eq!(c.free_list(), &[(0, 3), (6, 4)]);
        c.free_extent(b, 3);
        // Everything merges back into one extent.
        assert_eq!(c.free_list(), &[(0, 10)]);
        assert_eq!(c.available_blks(), 10);
    }

    #[test]
    fn test_hinted_alloc_pins_chunk() {
        let mut t = AllocTable::default();
        t.chunks.insert(1, ChunkAlloc::new(0, 4));
        t.chunks.insert(2, ChunkAlloc::new(0, 100));

        let hints = BlkAllocHints {
            chunk_id: Some(1),
            ..Default::default()
        };
        let got = t.alloc(4, &hints).unwrap();
        assert_eq!(got.chunk_id, 1);
        // Pinned chunk is now full even though chunk 2 has room.
        assert!(matches!(
            t.alloc(1, &hints),
            Err(StoreError::OutOfSpace { chunk_id: 1, .. })
        ));
    }

    #[test]
    fn test_unhinted_alloc_prefers_most_free() {
        let mut t = AllocTable::default();
        t.chunks.insert(1, ChunkAlloc::new(0, 10));
        t.chunks.insert(2, ChunkAlloc::new(0, 50));
        let got = t.alloc(1, &BlkAllocHints::default()).unwrap();
        assert_eq!(got.chunk_id, 2);
    }
}

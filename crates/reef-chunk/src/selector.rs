//! [`HeapChunkSelector`] implementation.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use reef_store::BlockDevice;
use reef_types::{ChunkId, DevId, PgId, VChunkId};
use tracing::{debug, warn};

/// Heap entry: chunks sort by free capacity, ties broken by lower chunk id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeapEntry {
    available_blks: u64,
    chunk_id: ChunkId,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.available_blks
            .cmp(&other.available_blks)
            .then_with(|| other.chunk_id.cmp(&self.chunk_id))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Chunk bookkeeping for one PG.
#[derive(Debug, Default)]
struct PgChunks {
    /// Physical chunk ids; position is the virtual chunk id.
    chunk_ids: Vec<ChunkId>,
    /// Chunks currently bound to a shard (open or sealed).
    shard_bound: HashSet<ChunkId>,
}

#[derive(Debug, Default)]
struct State {
    /// Free (PG-unowned) chunks, one max-heap per physical device.
    per_dev_heap: HashMap<DevId, BinaryHeap<HeapEntry>>,
    /// Chunk id → hosting device, for every chunk on the node.
    all_chunks: HashMap<ChunkId, DevId>,
    pgs: HashMap<PgId, PgChunks>,
}

/// Assigns device chunks to PGs and shard-chunk bindings within a PG.
///
/// Construction registers the device's chunks but leaves the heaps empty;
/// callers must run recovery (possibly over zero PGs) before the selector
/// can serve allocations.
pub struct HeapChunkSelector {
    device: Arc<dyn BlockDevice>,
    state: Mutex<State>,
}

impl HeapChunkSelector {
    /// Create a selector over the given device.
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        let mut state = State::default();
        for info in device.chunks() {
            state.all_chunks.insert(info.chunk_id, info.pdev_id);
        }
        Self {
            device,
            state: Mutex::new(state),
        }
    }

    /// Cluster chunk size in bytes.
    pub fn chunk_size(&self) -> u64 {
        self.device.chunk_size()
    }

    /// Size of the largest per-device free heap: the number of chunks a new
    /// PG could be given without splitting across devices.
    pub fn most_avail_num_chunks(&self) -> u64 {
        let state = self.state.lock().expect("lock poisoned");
        state
            .per_dev_heap
            .values()
            .map(|h| h.len() as u64)
            .max()
            .unwrap_or(0)
    }

    /// Number of chunks on the node, regardless of ownership.
    pub fn total_chunks(&self) -> u64 {
        self.state.lock().expect("lock poisoned").all_chunks.len() as u64
    }

    /// Chunks currently sitting in the free heaps.
    pub fn total_heap_chunks(&self) -> u64 {
        let state = self.state.lock().expect("lock poisoned");
        state.per_dev_heap.values().map(|h| h.len() as u64).sum()
    }

    /// Number of a PG's chunks still free for a new shard.
    pub fn avail_num_chunks(&self, pg_id: PgId) -> u64 {
        let state = self.state.lock().expect("lock poisoned");
        state
            .pgs
            .get(&pg_id)
            .map(|pg| (pg.chunk_ids.len() - pg.shard_bound.len()) as u64)
            .unwrap_or(0)
    }

    /// Free blocks across a PG's chunks.
    pub fn avail_blks(&self, pg_id: PgId) -> u64 {
        let state = self.state.lock().expect("lock poisoned");
        let Some(pg) = state.pgs.get(&pg_id) else {
            return 0;
        };
        pg.chunk_ids
            .iter()
            .filter_map(|&c| self.device.chunk_info(c))
            .map(|info| info.available_blks)
            .sum()
    }

    /// Total and free blocks across every chunk on the node.
    pub fn capacity_blks(&self) -> (u64, u64) {
        let state = self.state.lock().expect("lock poisoned");
        let mut total = 0;
        let mut avail = 0;
        for &chunk_id in state.all_chunks.keys() {
            if let Some(info) = self.device.chunk_info(chunk_id) {
                total += info.total_blks;
                avail += info.available_blks;
            }
        }
        (total, avail)
    }

    /// Atomically assign `⌊size_bytes / chunk_size⌋` chunks to a PG.
    ///
    /// All chunks come from the single device with the most free chunks.
    /// Returns the number of chunks assigned, `None` when no device can
    /// satisfy the request. Idempotent: a PG that already owns a chunk list
    /// gets its existing count back.
    pub fn select_chunks_for_pg(&self, pg_id: PgId, size_bytes: u64) -> Option<u64> {
        let needed = (size_bytes / self.device.chunk_size()) as usize;
        let mut state = self.state.lock().expect("lock poisoned");

        if let Some(pg) = state.pgs.get(&pg_id) {
            debug!(pg_id, chunks = pg.chunk_ids.len(), "pg already owns chunks");
            return Some(pg.chunk_ids.len() as u64);
        }

        let (&dev, _) = state
            .per_dev_heap
            .iter()
            .max_by_key(|(_, h)| h.len())
            .filter(|(_, h)| h.len() >= needed)?;

        let heap = state.per_dev_heap.get_mut(&dev).expect("device heap");
        let mut chunk_ids = Vec::with_capacity(needed);
        for _ in 0..needed {
            chunk_ids.push(heap.pop().expect("heap size checked").chunk_id);
        }

        debug!(pg_id, dev, ?chunk_ids, "assigned chunks to pg");
        state.pgs.insert(
            pg_id,
            PgChunks {
                chunk_ids,
                shard_bound: HashSet::new(),
            },
        );
        Some(needed as u64)
    }

    /// The PG's chunk list, physical id per virtual index.
    pub fn get_pg_chunks(&self, pg_id: PgId) -> Option<Vec<ChunkId>> {
        let state = self.state.lock().expect("lock poisoned");
        state.pgs.get(&pg_id).map(|pg| pg.chunk_ids.clone())
    }

    /// Re-register a PG's chunk ownership from its superblock during restart.
    ///
    /// Fails if the PG is already registered or any chunk is unknown or
    /// already owned by another PG.
    pub fn recover_pg_chunks(&self, pg_id: PgId, chunk_ids: Vec<ChunkId>) -> bool {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.pgs.contains_key(&pg_id) {
            warn!(pg_id, "pg chunks already recovered");
            return false;
        }
        for &c in &chunk_ids {
            if !state.all_chunks.contains_key(&c) {
                warn!(pg_id, chunk = c, "recovered pg references unknown chunk");
                return false;
            }
            if state.pgs.values().any(|pg| pg.chunk_ids.contains(&c)) {
                warn!(pg_id, chunk = c, "chunk owned by two pgs");
                return false;
            }
        }
        state.pgs.insert(
            pg_id,
            PgChunks {
                chunk_ids,
                shard_bound: HashSet::new(),
            },
        );
        true
    }

    /// Rebuild the per-device free heaps: every known chunk not owned by a
    /// recovered PG goes back to its device's heap.
    ///
    /// Runs as the final recovery step, after all PG chunk lists are
    /// registered. On a fresh node (no PGs) this simply fills the heaps.
    pub fn recover_per_dev_chunk_heap(&self) {
        let mut state = self.state.lock().expect("lock poisoned");
        let owned: HashSet<ChunkId> = state
            .pgs
            .values()
            .flat_map(|pg| pg.chunk_ids.iter().copied())
            .collect();

        let mut heaps: HashMap<DevId, BinaryHeap<HeapEntry>> = HashMap::new();
        for (&chunk_id, &dev) in &state.all_chunks {
            if owned.contains(&chunk_id) {
                continue;
            }
            let available_blks = self
                .device
                .chunk_info(chunk_id)
                .map(|i| i.available_blks)
                .unwrap_or(0);
            heaps.entry(dev).or_default().push(HeapEntry {
                available_blks,
                chunk_id,
            });
        }
        debug!(
            free = heaps.values().map(|h| h.len()).sum::<usize>(),
            owned = owned.len(),
            "rebuilt per-device chunk heaps"
        );
        state.per_dev_heap = heaps;
    }

    /// Reserve a chunk of the PG for a new shard.
    ///
    /// Picks the unbound chunk with the most residual free space, ties broken
    /// by the lowest virtual chunk id. A chunk hosts at most one shard, so
    /// the reservation holds until [`release_chunk`](Self::release_chunk).
    pub fn reserve_chunk_for_new_shard(&self, pg_id: PgId) -> Option<(ChunkId, VChunkId)> {
        let mut state = self.state.lock().expect("lock poisoned");
        let pg = state.pgs.get_mut(&pg_id)?;

        let mut best: Option<(u64, VChunkId, ChunkId)> = None;
        for (v, &p) in pg.chunk_ids.iter().enumerate() {
            if pg.shard_bound.contains(&p) {
                continue;
            }
            let avail = self.device.chunk_info(p).map(|i| i.available_blks)?;
            let candidate = (avail, v as VChunkId, p);
            best = match best {
                None => Some(candidate),
                Some(cur) if candidate.0 > cur.0 => Some(candidate),
                Some(cur) => Some(cur),
            };
        }

        let (_, v_chunk_id, p_chunk_id) = best?;
        pg.shard_bound.insert(p_chunk_id);
        debug!(pg_id, p_chunk_id, v_chunk_id, "reserved chunk for new shard");
        Some((p_chunk_id, v_chunk_id))
    }

    /// Reserve a specific chunk of the PG, returning its virtual id.
    ///
    /// Used when a replica must apply the proposer's chunk choice, and when
    /// rebinding shards to chunks during recovery.
    pub fn reserve_chunk(&self, pg_id: PgId, p_chunk_id: ChunkId) -> Option<VChunkId> {
        let mut state = self.state.lock().expect("lock poisoned");
        let pg = state.pgs.get_mut(&pg_id)?;
        let v = pg.chunk_ids.iter().position(|&c| c == p_chunk_id)?;
        if !pg.shard_bound.insert(p_chunk_id) {
            return None;
        }
        Some(v as VChunkId)
    }

    /// Return a reserved chunk to the PG's free set.
    pub fn release_chunk(&self, pg_id: PgId, p_chunk_id: ChunkId) -> bool {
        let mut state = self.state.lock().expect("lock poisoned");
        let Some(pg) = state.pgs.get_mut(&pg_id) else {
            return false;
        };
        let released = pg.shard_bound.remove(&p_chunk_id);
        if released {
            debug!(pg_id, p_chunk_id, "released chunk");
        }
        released
    }

    /// Virtual id of a physical chunk within a PG's list.
    pub fn v_chunk_id(&self, pg_id: PgId, p_chunk_id: ChunkId) -> Option<VChunkId> {
        let state = self.state.lock().expect("lock poisoned");
        let pg = state.pgs.get(&pg_id)?;
        pg.chunk_ids
            .iter()
            .position(|&c| c == p_chunk_id)
            .map(|v| v as VChunkId)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use reef_store::MemoryDevice;

    const CHUNK: u64 = 64 * 1024;
    const BLK: u32 = 1024;

    fn fresh_selector(pdevs: u32, chunks: u16) -> HeapChunkSelector {
        let dev = Arc::new(MemoryDevice::new(pdevs, chunks, CHUNK, BLK));
        let sel = HeapChunkSelector::new(dev);
        sel.recover_per_dev_chunk_heap();
        sel
    }

    #[test]
    fn test_fresh_heaps_hold_everything() {
        let sel = fresh_selector(2, 4);
        assert_eq!(sel.total_chunks(), 8);
        assert_eq!(sel.total_heap_chunks(), 8);
        assert_eq!(sel.most_avail_num_chunks(), 4);
    }

    #[test]
    fn test_select_chunks_for_pg() {
        let sel = fresh_selector(1, 8);
        let n = sel.select_chunks_for_pg(1, 4 * CHUNK).unwrap();
        assert_eq!(n, 4);
        assert_eq!(sel.get_pg_chunks(1).unwrap().len(), 4);
        assert_eq!(sel.most_avail_num_chunks(), 4);
        assert_eq!(sel.avail_num_chunks(1), 4);
    }

    #[test]
    fn test_select_is_idempotent() {
        let sel = fresh_selector(1, 8);
        assert_eq!(sel.select_chunks_for_pg(1, 4 * CHUNK), Some(4));
        // Second call must not consume more chunks.
        assert_eq!(sel.select_chunks_for_pg(1, 6 * CHUNK), Some(4));
        assert_eq!(sel.most_avail_num_chunks(), 4);
    }

    #[test]
    fn test_select_insufficient_space() {
        let sel = fresh_selector(1, 3);
        assert!(sel.select_chunks_for_pg(1, 100 * CHUNK).is_none());
        // Nothing was consumed by the failed attempt.
        assert_eq!(sel.most_avail_num_chunks(), 3);
    }

    #[test]
    fn test_select_rounds_down() {
        let sel = fresh_selector(1, 4);
        // 2.5 chunks worth of bytes yields 2 chunks.
        assert_eq!(sel.select_chunks_for_pg(1, 2 * CHUNK + CHUNK / 2), Some(2));
    }

    #[test]
    fn test_pg_chunks_stay_on_one_device() {
        let sel = fresh_selector(3, 4);
        sel.select_chunks_for_pg(1, 4 * CHUNK).unwrap();
        let chunks = sel.get_pg_chunks(1).unwrap();
        let dev = Arc::new(MemoryDevice::new(3, 4, CHUNK, BLK));
        let pdev_of = |c: ChunkId| dev.chunk_info(c).unwrap().pdev_id;
        let first = pdev_of(chunks[0]);
        assert!(chunks.iter().all(|&c| pdev_of(c) == first));
    }

    #[test]
    fn test_reserve_and_release() {
        let sel = fresh_selector(1, 4);
        sel.select_chunks_for_pg(1, 3 * CHUNK).unwrap();

        let (p1, _v1) = sel.reserve_chunk_for_new_shard(1).unwrap();
        assert_eq!(sel.avail_num_chunks(1), 2);

        let (p2, _) = sel.reserve_chunk_for_new_shard(1).unwrap();
        assert_ne!(p1, p2);
        let (p3, _) = sel.reserve_chunk_for_new_shard(1).unwrap();
        assert_ne!(p2, p3);

        // PG exhausted.
        assert!(sel.reserve_chunk_for_new_shard(1).is_none());

        assert!(sel.release_chunk(1, p2));
        assert_eq!(sel.avail_num_chunks(1), 1);
        let (p4, _) = sel.reserve_chunk_for_new_shard(1).unwrap();
        assert_eq!(p4, p2);
    }

    #[test]
    fn test_reserve_ties_pick_lowest_v_chunk() {
        let sel = fresh_selector(1, 4);
        sel.select_chunks_for_pg(1, 4 * CHUNK).unwrap();
        // All chunks are equally empty, so the reservation must land on v=0.
        let (_, v) = sel.reserve_chunk_for_new_shard(1).unwrap();
        assert_eq!(v, 0);
        let (_, v) = sel.reserve_chunk_for_new_shard(1).unwrap();
        assert_eq!(v, 1);
    }

    #[test]
    fn test_reserve_specific_chunk() {
        let sel = fresh_selector(1, 4);
        sel.select_chunks_for_pg(1, 2 * CHUNK).unwrap();
        let chunks = sel.get_pg_chunks(1).unwrap();

        let v = sel.reserve_chunk(1, chunks[1]).unwrap();
        assert_eq!(v, 1);
        // Double reservation fails.
        assert!(sel.reserve_chunk(1, chunks[1]).is_none());
        // Unknown chunk fails.
        assert!(sel.reserve_chunk(1, 999).is_none());
    }

    #[test]
    fn test_recovery_accounting() {
        let dev = Arc::new(MemoryDevice::new(2, 4, CHUNK, BLK));
        let sel = HeapChunkSelector::new(dev.clone());

        // Simulate restart: PG 1 owned chunks 1 and 2, PG 2 owned chunk 5.
        assert!(sel.recover_pg_chunks(1, vec![1, 2]));
        assert!(sel.recover_pg_chunks(2, vec![5]));
        sel.recover_per_dev_chunk_heap();

        // sum(|pg chunks|) + heap size == total chunks
        assert_eq!(sel.total_heap_chunks(), 8 - 3);
        assert_eq!(sel.avail_num_chunks(1), 2);
        assert_eq!(sel.get_pg_chunks(2).unwrap(), vec![5]);
    }

    #[test]
    fn test_recover_rejects_double_ownership() {
        let sel = fresh_selector(1, 4);
        assert!(sel.recover_pg_chunks(1, vec![1, 2]));
        assert!(!sel.recover_pg_chunks(2, vec![2]));
        assert!(!sel.recover_pg_chunks(1, vec![3]));
        assert!(!sel.recover_pg_chunks(3, vec![42]));
    }
}

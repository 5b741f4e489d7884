//! [`ReefEngine`] — the engine orchestrator.
//!
//! Owns the PG map, the index-uuid map and the shard-chunk reservation
//! table, and wires the chunk selector, metadata store and replication
//! service together. Manager operations live in the sibling modules
//! ([`pg`](crate::pg), [`shard`](crate::shard), [`blob`](crate::blob)); the
//! replication hooks are implemented in
//! [`state_machine`](crate::state_machine).

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use reef_chunk::HeapChunkSelector;
use reef_meta::{IndexTable, MetaStore};
use reef_repl::{ReplDev, ReplService};
use reef_types::superblk::HashAlgorithm;
use reef_types::{
    ChunkId, EngineStats, PeerId, PgId, PgInfo, ShardId, ShardInfo, VChunkId, shard_seq,
};
use tracing::debug;
use uuid::Uuid;

/// Engine construction parameters.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Identity of the local replica.
    pub peer_id: PeerId,
    /// Human-readable name of the local replica.
    pub peer_name: String,
    /// Payload hash algorithm stamped on new blobs.
    pub hash_algorithm: HashAlgorithm,
    /// Upper bound on a single shard's declared size.
    pub max_shard_size_bytes: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            peer_id: Uuid::nil(),
            peer_name: "reef-node".to_string(),
            hash_algorithm: HashAlgorithm::Crc32,
            max_shard_size_bytes: 1 << 30,
        }
    }
}

/// Durable per-PG counters, recovered from the PG superblock and published
/// back at checkpoint flush.
#[derive(Debug, Default)]
pub(crate) struct DurableEntities {
    pub blob_sequence_num: AtomicU64,
    pub active_blob_count: AtomicU64,
    pub tombstone_blob_count: AtomicU64,
    pub total_occupied_blk_count: AtomicU64,
}

/// In-memory shard state plus its immutable chunk binding.
#[derive(Debug, Clone)]
pub(crate) struct ShardHandle {
    pub info: ShardInfo,
    pub p_chunk_id: ChunkId,
    pub v_chunk_id: VChunkId,
}

/// One locally present placement group.
pub(crate) struct PgEntry {
    pub info: RwLock<PgInfo>,
    pub repl_dev: Arc<dyn ReplDev>,
    pub index_table: IndexTable,
    /// Shards keyed by their per-PG sequence number. Mutations arrive on
    /// the PG's serialized commit stream.
    pub shards: RwLock<BTreeMap<u64, ShardHandle>>,
    pub durable: DurableEntities,
    pub next_shard_seq: AtomicU64,
    /// Set when durable counters drift from the persisted superblock.
    pub sb_dirty: AtomicBool,
}

impl PgEntry {
    pub fn total_shards(&self) -> u32 {
        self.shards.read().expect("lock poisoned").len() as u32
    }

    pub fn open_shards(&self) -> u32 {
        self.shards
            .read()
            .expect("lock poisoned")
            .values()
            .filter(|s| s.info.is_open())
            .count() as u32
    }

    pub fn mark_dirty(&self) {
        self.sb_dirty.store(true, Ordering::Release);
    }
}

/// Index table registration: which PG references the table.
///
/// `pg_id` is 0 while the table has been recovered but its PG has not; PG
/// recovery fills it in.
pub(crate) struct PgIndexEntry {
    pub pg_id: PgId,
    pub table: IndexTable,
}

/// The engine orchestrator tying all Reef components together.
pub struct ReefEngine {
    pub(crate) cfg: EngineConfig,
    pub(crate) chunk_selector: Arc<HeapChunkSelector>,
    pub(crate) meta: Arc<MetaStore>,
    pub(crate) repl: Arc<dyn ReplService>,
    /// PG map; readers-writer lock, never held across replication or I/O.
    pub(crate) pg_map: RwLock<HashMap<PgId, Arc<PgEntry>>>,
    /// Index-table uuid → owning PG, for recovery ordering.
    pub(crate) index_map: RwLock<HashMap<Uuid, PgIndexEntry>>,
    /// Chunk reservations made by local CREATE_SHARD pre-commits, keyed by
    /// shard id, consumed at commit or rollback.
    pub(crate) reservations: Mutex<HashMap<ShardId, (ChunkId, VChunkId)>>,
    pub(crate) recovery_done: AtomicBool,
}

impl ReefEngine {
    /// Create an engine over the given collaborators.
    ///
    /// The engine must be registered as the replication listener for its
    /// peer before any group traffic arrives, and
    /// [`on_replica_restart`](Self::on_replica_restart) must run before the
    /// engine serves operations.
    pub fn new(
        cfg: EngineConfig,
        chunk_selector: Arc<HeapChunkSelector>,
        meta: Arc<MetaStore>,
        repl: Arc<dyn ReplService>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            chunk_selector,
            meta,
            repl,
            pg_map: RwLock::new(HashMap::new()),
            index_map: RwLock::new(HashMap::new()),
            reservations: Mutex::new(HashMap::new()),
            recovery_done: AtomicBool::new(false),
        })
    }

    /// The local replica's peer id.
    pub fn peer_id(&self) -> PeerId {
        self.cfg.peer_id
    }

    /// The chunk selector.
    pub fn chunk_selector(&self) -> &Arc<HeapChunkSelector> {
        &self.chunk_selector
    }

    /// Whether restart recovery has completed.
    pub fn recovery_done(&self) -> bool {
        self.recovery_done.load(Ordering::Acquire)
    }

    /// Whether a PG is locally present.
    pub fn pg_exists(&self, pg_id: PgId) -> bool {
        self.pg_map
            .read()
            .expect("lock poisoned")
            .contains_key(&pg_id)
    }

    /// Ids of all locally present PGs.
    pub fn list_pg_ids(&self) -> Vec<PgId> {
        let mut ids: Vec<PgId> = self
            .pg_map
            .read()
            .expect("lock poisoned")
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Engine-wide statistics.
    pub fn stats(&self) -> EngineStats {
        let (num_pgs, num_open_shards) = {
            let map = self.pg_map.read().expect("lock poisoned");
            (
                map.len() as u32,
                map.values().map(|pg| pg.open_shards()).sum(),
            )
        };
        let blk_size = u64::from(reef_types::superblk::DATA_BLOCK_SIZE);
        let (total_blks, avail_blks) = self.chunk_selector.capacity_blks();
        EngineStats {
            num_pgs,
            num_open_shards,
            total_capacity_bytes: total_blks * blk_size,
            avail_capacity_bytes: avail_blks * blk_size,
        }
    }

    pub(crate) fn pg(&self, pg_id: PgId) -> Option<Arc<PgEntry>> {
        self.pg_map
            .read()
            .expect("lock poisoned")
            .get(&pg_id)
            .cloned()
    }

    pub(crate) fn shard_handle(&self, shard_id: ShardId) -> Option<(Arc<PgEntry>, ShardHandle)> {
        let pg = self.pg(reef_types::pg_of_shard(shard_id))?;
        let handle = pg
            .shards
            .read()
            .expect("lock poisoned")
            .get(&shard_seq(shard_id))
            .cloned()?;
        Some((pg, handle))
    }

    /// Insert a PG under the write lock.
    ///
    /// The PG's replica-set uuid must equal its replication group id; a
    /// mismatch is a broken invariant and terminates the process.
    pub(crate) fn add_pg_to_map(&self, entry: Arc<PgEntry>) {
        let (pg_id, replica_set_uuid) = {
            let info = entry.info.read().expect("lock poisoned");
            (info.id, info.replica_set_uuid)
        };
        assert_eq!(
            replica_set_uuid,
            entry.repl_dev.group_id(),
            "pg {pg_id} replica set uuid mismatch with its replication group"
        );
        let mut map = self.pg_map.write().expect("lock poisoned");
        map.entry(pg_id).or_insert(entry);
        debug!(pg_id, "pg added to map");
    }

    /// PG that owns an index table, if the table has been attached to one.
    ///
    /// Zero while the table is recovered but its PG is still pending.
    pub fn pg_of_index_table(&self, index_uuid: Uuid) -> Option<PgId> {
        self.index_map
            .read()
            .expect("lock poisoned")
            .get(&index_uuid)
            .map(|e| e.pg_id)
    }

    /// Physical chunk bound to a shard, if the shard is locally present.
    pub fn get_shard_p_chunk_id(&self, shard_id: ShardId) -> Option<ChunkId> {
        self.shard_handle(shard_id).map(|(_, h)| h.p_chunk_id)
    }

    /// Virtual chunk bound to a shard, if the shard is locally present.
    pub fn get_shard_v_chunk_id(&self, shard_id: ShardId) -> Option<VChunkId> {
        self.shard_handle(shard_id).map(|(_, h)| h.v_chunk_id)
    }

    pub(crate) fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

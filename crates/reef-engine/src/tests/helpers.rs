//! Shared test utilities for reef-engine tests.

use std::sync::Arc;

use reef_chunk::HeapChunkSelector;
use reef_meta::MetaStore;
use reef_repl::{LocalReplFabric, LocalReplService, ReplService};
use reef_store::{BlockDevice, MemoryDevice};
use reef_types::superblk::HashAlgorithm;
use reef_types::{Blob, PeerId, PgId, PgInfo, PgMember};
use uuid::Uuid;

use crate::engine::{EngineConfig, ReefEngine};

/// Chunk size used across engine tests.
pub const CHUNK: u64 = 64 * 1024;
/// Block size used across engine tests.
pub const BLK: u32 = 1024;
/// Chunks per replica device.
pub const CHUNKS_PER_DEV: u16 = 8;

pub struct TestReplica {
    pub peer: PeerId,
    pub engine: Arc<ReefEngine>,
    pub device: Arc<dyn BlockDevice>,
    pub meta: Arc<MetaStore>,
}

pub struct TestCluster {
    pub fabric: Arc<LocalReplFabric>,
    pub replicas: Vec<TestReplica>,
}

impl TestCluster {
    /// The leader-side engine (the replica that creates PGs in tests).
    pub fn leader(&self) -> &Arc<ReefEngine> {
        &self.replicas[0].engine
    }

    /// Peer ids of all replicas.
    pub fn peers(&self) -> Vec<PeerId> {
        self.replicas.iter().map(|r| r.peer).collect()
    }

    /// A `PgInfo` whose members are this cluster's replicas.
    pub fn pg_info(&self, pg_id: PgId, size: u64) -> PgInfo {
        let mut info = PgInfo::new(pg_id);
        info.size = size;
        for (i, peer) in self.peers().iter().enumerate() {
            info.members
                .insert(PgMember::with_name(*peer, format!("replica-{i}"), 0));
        }
        info
    }
}

/// Build an engine for one peer and register it with the fabric.
pub fn attach_replica(
    fabric: &Arc<LocalReplFabric>,
    peer: PeerId,
    name: &str,
    device: Arc<dyn BlockDevice>,
    meta: Arc<MetaStore>,
) -> Arc<ReefEngine> {
    let selector = Arc::new(HeapChunkSelector::new(device.clone()));
    let repl: Arc<dyn ReplService> = Arc::new(LocalReplService::new(fabric.clone(), peer));
    let engine = ReefEngine::new(
        EngineConfig {
            peer_id: peer,
            peer_name: name.to_string(),
            hash_algorithm: HashAlgorithm::Crc32,
            max_shard_size_bytes: CHUNK,
        },
        selector,
        meta,
        repl,
    );
    fabric.register_peer(peer, engine.clone(), device);
    engine.on_replica_restart().unwrap();
    engine
}

/// An n-replica cluster over in-memory devices and metadata stores.
pub fn cluster(n: usize) -> TestCluster {
    let fabric = LocalReplFabric::new();
    let replicas = (0..n)
        .map(|i| {
            let peer = Uuid::new_v4();
            let device: Arc<dyn BlockDevice> =
                Arc::new(MemoryDevice::new(1, CHUNKS_PER_DEV, CHUNK, BLK));
            let meta = Arc::new(MetaStore::in_memory());
            let engine = attach_replica(&fabric, peer, &format!("replica-{i}"), device.clone(), meta.clone());
            TestReplica {
                peer,
                engine,
                device,
                meta,
            }
        })
        .collect();
    TestCluster { fabric, replicas }
}

/// A cluster with one PG already created on every replica.
pub async fn cluster_with_pg(n: usize, pg_id: PgId, size: u64) -> TestCluster {
    let c = cluster(n);
    let info = c.pg_info(pg_id, size);
    c.leader().create_pg(info).await.unwrap();
    c
}

/// Generate deterministic, non-repeating test data.
pub fn test_data(size: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state: u32 = 0xDEAD_BEEF;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

/// A blob with the given body size and key.
pub fn test_blob(size: usize, key: &str) -> Blob {
    Blob {
        body: test_data(size),
        user_key: key.as_bytes().to_vec(),
        object_offset: 0,
    }
}

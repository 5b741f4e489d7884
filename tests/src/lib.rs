//! Shared test harness for Reef integration tests.
//!
//! Provides [`IntegrationCluster`] — an N-replica cluster over the
//! in-process replication fabric with disk-backed devices and metadata
//! stores, so tests can exercise the full pipeline including real restarts:
//! PG create → shard create/seal → blob put/get/delete → recovery.

use std::sync::Arc;

use reef_chunk::HeapChunkSelector;
use reef_engine::{EngineConfig, ReefEngine};
use reef_meta::MetaStore;
use reef_repl::{LocalReplFabric, LocalReplService, ReplService};
use reef_store::{BlockDevice, FileDevice};
use reef_types::superblk::HashAlgorithm;
use reef_types::{Blob, PeerId, PgId, PgInfo, PgMember};
use tempfile::TempDir;
use uuid::Uuid;

/// Initialise test logging once; later calls are no-ops.
///
/// Controlled with `RUST_LOG`, e.g. `RUST_LOG=reef_engine=debug`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Chunk size used across integration tests.
pub const CHUNK_SIZE: u64 = 64 * 1024;
/// Block size used across integration tests.
pub const BLOCK_SIZE: u32 = 1024;

/// One replica: engine plus its on-disk state rooted in a tempdir.
pub struct IntegrationReplica {
    pub peer: PeerId,
    pub engine: Arc<ReefEngine>,
    pub device: Arc<dyn BlockDevice>,
    pub meta: Arc<MetaStore>,
    dir: TempDir,
}

/// An N-replica cluster with disk-backed stores.
pub struct IntegrationCluster {
    pub fabric: Arc<LocalReplFabric>,
    pub replicas: Vec<IntegrationReplica>,
    chunks_per_dev: u16,
}

impl IntegrationCluster {
    /// Create a cluster of `n` replicas, each with `chunks_per_dev` chunks.
    pub fn new(n: usize, chunks_per_dev: u16) -> Self {
        init_tracing();
        let fabric = LocalReplFabric::new();
        let replicas = (0..n)
            .map(|i| {
                let peer = Uuid::new_v4();
                let dir = tempfile::tempdir().expect("tempdir");
                let (engine, device, meta) =
                    boot_replica(&fabric, peer, i, dir.path(), chunks_per_dev);
                IntegrationReplica {
                    peer,
                    engine,
                    device,
                    meta,
                    dir,
                }
            })
            .collect();
        Self {
            fabric,
            replicas,
            chunks_per_dev,
        }
    }

    /// The replica that drives proposals in tests.
    pub fn leader(&self) -> &Arc<ReefEngine> {
        &self.replicas[0].engine
    }

    /// A `PgInfo` whose members are this cluster's replicas.
    pub fn pg_info(&self, pg_id: PgId, size: u64) -> PgInfo {
        let mut info = PgInfo::new(pg_id);
        info.size = size;
        for (i, r) in self.replicas.iter().enumerate() {
            info.members
                .insert(PgMember::with_name(r.peer, format!("replica-{i}"), 0));
        }
        info
    }

    /// Restart one replica: reopen its device and metadata store from disk
    /// and run restart recovery on a fresh engine.
    pub fn restart(&mut self, idx: usize) {
        let peer = self.replicas[idx].peer;
        let path = self.replicas[idx].dir.path().to_path_buf();
        let (engine, device, meta) =
            boot_replica(&self.fabric, peer, idx, &path, self.chunks_per_dev);
        self.replicas[idx].engine = engine;
        self.replicas[idx].device = device;
        self.replicas[idx].meta = meta;
    }
}

fn boot_replica(
    fabric: &Arc<LocalReplFabric>,
    peer: PeerId,
    idx: usize,
    dir: &std::path::Path,
    chunks_per_dev: u16,
) -> (Arc<ReefEngine>, Arc<dyn BlockDevice>, Arc<MetaStore>) {
    let device: Arc<dyn BlockDevice> = Arc::new(
        FileDevice::open(dir.join("data"), 1, chunks_per_dev, CHUNK_SIZE, BLOCK_SIZE)
            .expect("open device"),
    );
    let meta = Arc::new(MetaStore::open(dir.join("meta")).expect("open meta store"));
    let selector = Arc::new(HeapChunkSelector::new(device.clone()));
    let repl: Arc<dyn ReplService> = Arc::new(LocalReplService::new(fabric.clone(), peer));
    let engine = ReefEngine::new(
        EngineConfig {
            peer_id: peer,
            peer_name: format!("replica-{idx}"),
            hash_algorithm: HashAlgorithm::Crc32,
            max_shard_size_bytes: CHUNK_SIZE,
        },
        selector,
        meta.clone(),
        repl,
    );
    fabric.register_peer(peer, engine.clone(), device.clone());
    engine.on_replica_restart().expect("restart recovery");
    (engine, device, meta)
}

/// Generate deterministic test data from a seed.
pub fn test_data_seeded(size: usize, seed: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state = seed ^ 0xA5A5_5A5A;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

/// A blob with a seeded body and the given key.
pub fn seeded_blob(size: usize, seed: u32, key: &str) -> Blob {
    Blob {
        body: test_data_seeded(size, seed),
        user_key: key.as_bytes().to_vec(),
        object_offset: 0,
    }
}

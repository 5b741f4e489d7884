//! Chaos: slow devices and injected consensus aborts under live traffic.

use std::sync::Arc;

use reef_chunk::HeapChunkSelector;
use reef_engine::{EngineConfig, ReefEngine};
use reef_integration_tests::{seeded_blob, test_data_seeded};
use reef_meta::MetaStore;
use reef_repl::{LocalReplFabric, LocalReplService, ReplService};
use reef_store::{BlockDevice, MemoryDevice, SlowDevice};
use reef_types::superblk::HashAlgorithm;
use reef_types::{PgInfo, PgMember};
use uuid::Uuid;

const CHUNK: u64 = 64 * 1024;
const BLK: u32 = 1024;

/// A replica whose device injects seeded random IO latency.
fn slow_replica(
    fabric: &Arc<LocalReplFabric>,
    idx: usize,
    seed: u64,
) -> (uuid::Uuid, Arc<ReefEngine>) {
    let peer = Uuid::new_v4();
    let inner = Arc::new(MemoryDevice::new(1, 8, CHUNK, BLK));
    let device: Arc<dyn BlockDevice> = Arc::new(
        SlowDevice::new(inner)
            .read_latency(0, 3)
            .write_latency(0, 5)
            .seed(seed),
    );
    let selector = Arc::new(HeapChunkSelector::new(device.clone()));
    let repl: Arc<dyn ReplService> = Arc::new(LocalReplService::new(fabric.clone(), peer));
    let engine = ReefEngine::new(
        EngineConfig {
            peer_id: peer,
            peer_name: format!("slow-{idx}"),
            hash_algorithm: HashAlgorithm::Crc32,
            max_shard_size_bytes: CHUNK,
        },
        selector,
        Arc::new(MetaStore::in_memory()),
        repl,
    );
    fabric.register_peer(peer, engine.clone(), device);
    engine.on_replica_restart().unwrap();
    (peer, engine)
}

#[tokio::test]
#[ntest::timeout(120000)]
async fn test_slow_devices_with_injected_aborts() {
    let fabric = LocalReplFabric::new();
    let replicas: Vec<_> = (0..3).map(|i| slow_replica(&fabric, i, 42 + i as u64)).collect();

    let mut info = PgInfo::new(1);
    info.size = 4 * CHUNK;
    for (i, (peer, _)) in replicas.iter().enumerate() {
        info.members
            .insert(PgMember::with_name(*peer, format!("slow-{i}"), 0));
    }
    let leader = &replicas[0].1;
    leader.create_pg(info).await.unwrap();
    let shard = leader.create_shard(1, CHUNK / 2).await.unwrap();
    let group = leader.get_stats(1).unwrap().replica_set_uuid;

    let mut live = Vec::new();
    for i in 0..20u32 {
        // Periodically abort a proposal after pre-commit; traffic must
        // keep flowing and chunk accounting must stay intact.
        if i % 5 == 0 {
            fabric.abort_next_proposal(group);
            leader
                .put_blob(shard.id, seeded_blob(256, i, "doomed"))
                .await
                .unwrap_err();
        }
        let id = leader
            .put_blob(shard.id, seeded_blob(700 + i as usize, i, &format!("k{i}")))
            .await
            .unwrap();
        live.push((id, i));
    }

    for (_, engine) in &replicas {
        for &(id, seed) in &live {
            let got = engine.get_blob(shard.id, id, 0, 0).await.unwrap();
            assert_eq!(got.body, test_data_seeded(700 + seed as usize, seed));
        }
        let stats = engine.get_stats(1).unwrap();
        assert_eq!(stats.num_active_objects, live.len() as u64);
        assert_eq!(stats.num_tombstone_objects, 0);
    }
}

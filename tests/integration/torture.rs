//! Mixed-operation torture run with a background checkpoint task.

use std::sync::Arc;
use std::time::Duration;

use reef_engine::{CheckpointCallbacks, spawn_checkpoint_task};
use reef_integration_tests::{CHUNK_SIZE, IntegrationCluster, seeded_blob, test_data_seeded};

#[tokio::test]
#[ntest::timeout(120000)]
async fn test_mixed_operations_torture() {
    let mut c = IntegrationCluster::new(3, 16);
    c.leader()
        .create_pg(c.pg_info(1, 8 * CHUNK_SIZE))
        .await
        .unwrap();

    let cp = spawn_checkpoint_task(c.leader().clone(), Duration::from_millis(20));

    // Several shard generations: fill, delete a third, seal, move on.
    let mut live: Vec<(u64, u64, u32)> = Vec::new(); // (shard, blob, seed)
    for generation in 0..3u32 {
        let shard = c.leader().create_shard(1, CHUNK_SIZE / 2).await.unwrap();
        for i in 0..12u32 {
            let seed = generation * 100 + i;
            let size = 64 + (seed as usize * 37) % 2048;
            let id = c
                .leader()
                .put_blob(shard.id, seeded_blob(size, seed, &format!("g{generation}-k{i}")))
                .await
                .unwrap();
            if i % 3 == 0 {
                c.leader().del_blob(shard.id, id).await.unwrap();
            } else {
                live.push((shard.id, id, seed));
            }
        }
        c.leader().seal_shard(shard.id).await.unwrap();
    }
    cp.abort();

    // Every live blob reads back identically on every replica.
    for r in &c.replicas {
        for &(shard, blob, seed) in &live {
            let got = r.engine.get_blob(shard, blob, 0, 0).await.unwrap();
            let size = 64 + (seed as usize * 37) % 2048;
            assert_eq!(got.body, test_data_seeded(size, seed));
        }
        let stats = r.engine.get_stats(1).unwrap();
        assert_eq!(stats.num_active_objects, live.len() as u64);
        assert_eq!(stats.num_tombstone_objects, 36 - live.len() as u64);
        assert_eq!(stats.total_shards, 3);
        assert_eq!(stats.open_shards, 0);
    }

    // Survive a restart of the proposing replica mid-history.
    c.leader().flush().unwrap();
    c.restart(0);
    for &(shard, blob, seed) in &live {
        let got = c.leader().get_blob(shard, blob, 0, 0).await.unwrap();
        let size = 64 + (seed as usize * 37) % 2048;
        assert_eq!(got.body, test_data_seeded(size, seed));
    }
}

#[tokio::test]
#[ntest::timeout(120000)]
async fn test_concurrent_readers() {
    let c = IntegrationCluster::new(1, 8);
    c.leader()
        .create_pg(c.pg_info(1, 4 * CHUNK_SIZE))
        .await
        .unwrap();
    let shard = c.leader().create_shard(1, CHUNK_SIZE / 2).await.unwrap();

    let mut ids = Vec::new();
    for i in 0..8u32 {
        ids.push(
            c.leader()
                .put_blob(shard.id, seeded_blob(1024, i, "k"))
                .await
                .unwrap(),
        );
    }

    let engine = Arc::clone(c.leader());
    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..4 {
        let engine = engine.clone();
        let ids = ids.clone();
        tasks.spawn(async move {
            for (i, id) in ids.iter().enumerate() {
                let got = engine.get_blob(shard.id, *id, 0, 0).await.unwrap();
                assert_eq!(got.body, test_data_seeded(1024, i as u32));
            }
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }
}

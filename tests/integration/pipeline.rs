//! Full pipeline over disk-backed replicas: PG create → shard lifecycle →
//! blob traffic, verified on every replica.

use reef_engine::{BlobError, CheckpointCallbacks, PgBlobIterator};
use reef_integration_tests::{CHUNK_SIZE, IntegrationCluster, seeded_blob};
use reef_types::ShardState;

#[tokio::test]
#[ntest::timeout(60000)]
async fn test_full_pipeline_three_replicas() {
    let c = IntegrationCluster::new(3, 8);
    c.leader()
        .create_pg(c.pg_info(1, 4 * CHUNK_SIZE))
        .await
        .unwrap();

    let shard = c.leader().create_shard(1, CHUNK_SIZE / 2).await.unwrap();
    assert_eq!(shard.state, ShardState::Open);

    // Put a spread of blob sizes through the same shard.
    let mut blobs = Vec::new();
    for (i, size) in [1usize, 100, 1024, 3 * 1024, 8 * 1024].iter().enumerate() {
        let blob = seeded_blob(*size, i as u32, &format!("key-{i}"));
        let id = c.leader().put_blob(shard.id, blob.clone()).await.unwrap();
        blobs.push((id, blob));
    }

    for r in &c.replicas {
        assert!(r.engine.pg_exists(1));
        for (id, blob) in &blobs {
            let got = r.engine.get_blob(shard.id, *id, 0, 0).await.unwrap();
            assert_eq!(&got.body, &blob.body);
            assert_eq!(&got.user_key, &blob.user_key);
        }
        let stats = r.engine.get_stats(1).unwrap();
        assert_eq!(stats.num_active_objects, blobs.len() as u64);
    }

    // Delete one, seal, and verify the end state everywhere.
    let (doomed, _) = blobs[2];
    c.leader().del_blob(shard.id, doomed).await.unwrap();
    c.leader().seal_shard(shard.id).await.unwrap();

    for r in &c.replicas {
        assert_eq!(
            r.engine.get_shard(shard.id).unwrap().state,
            ShardState::Sealed
        );
        assert_eq!(
            r.engine
                .get_blob(shard.id, doomed, 0, 0)
                .await
                .unwrap_err(),
            BlobError::UnknownBlob
        );
        let stats = r.engine.get_stats(1).unwrap();
        assert_eq!(stats.num_active_objects, blobs.len() as u64 - 1);
        assert_eq!(stats.num_tombstone_objects, 1);
    }
}

#[tokio::test]
#[ntest::timeout(60000)]
async fn test_multiple_pgs_are_independent() {
    let c = IntegrationCluster::new(2, 8);
    c.leader()
        .create_pg(c.pg_info(1, 2 * CHUNK_SIZE))
        .await
        .unwrap();
    c.leader()
        .create_pg(c.pg_info(2, 2 * CHUNK_SIZE))
        .await
        .unwrap();

    let s1 = c.leader().create_shard(1, CHUNK_SIZE / 2).await.unwrap();
    let s2 = c.leader().create_shard(2, CHUNK_SIZE / 2).await.unwrap();

    // Blob sequences are per PG.
    let b1 = c.leader().put_blob(s1.id, seeded_blob(256, 1, "a")).await.unwrap();
    let b2 = c.leader().put_blob(s2.id, seeded_blob(256, 2, "b")).await.unwrap();
    assert_eq!(b1, 1);
    assert_eq!(b2, 1);

    // Chunks of the two PGs never overlap.
    let leader = c.leader();
    let chunks1 = leader.chunk_selector().get_pg_chunks(1).unwrap();
    let chunks2 = leader.chunk_selector().get_pg_chunks(2).unwrap();
    assert!(chunks1.iter().all(|c| !chunks2.contains(c)));
}

#[tokio::test]
#[ntest::timeout(60000)]
async fn test_snapshot_iterator_covers_all_live_blobs() {
    let c = IntegrationCluster::new(1, 8);
    c.leader()
        .create_pg(c.pg_info(1, 4 * CHUNK_SIZE))
        .await
        .unwrap();

    let s1 = c.leader().create_shard(1, CHUNK_SIZE / 2).await.unwrap();
    let s2 = c.leader().create_shard(1, CHUNK_SIZE / 2).await.unwrap();

    let mut live = 0;
    for i in 0..6 {
        let shard = if i % 2 == 0 { s1.id } else { s2.id };
        let id = c
            .leader()
            .put_blob(shard, seeded_blob(512, i, "k"))
            .await
            .unwrap();
        if i == 3 {
            c.leader().del_blob(shard, id).await.unwrap();
        } else {
            live += 1;
        }
    }
    c.leader().flush().unwrap();

    let group = c.leader().get_stats(1).unwrap().replica_set_uuid;
    let mut iter = PgBlobIterator::new(c.leader().clone(), group).unwrap();
    let mut seen = 0;
    while !iter.end_of_scan() {
        let (batch, _) = iter.next_batch(2, u64::MAX).await.unwrap();
        seen += batch.len();
    }
    assert_eq!(seen, live);
}

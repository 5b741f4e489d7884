//! Leadership and membership changes.

use reef_engine::{BlobError, PGError, ShardError};
use reef_integration_tests::{CHUNK_SIZE, IntegrationCluster, seeded_blob};
use reef_types::PgMember;
use uuid::Uuid;

#[tokio::test]
#[ntest::timeout(60000)]
async fn test_leader_change_moves_write_path() {
    let c = IntegrationCluster::new(3, 8);
    c.leader()
        .create_pg(c.pg_info(1, 4 * CHUNK_SIZE))
        .await
        .unwrap();
    let shard = c.leader().create_shard(1, CHUNK_SIZE / 2).await.unwrap();
    let group = c.leader().get_stats(1).unwrap().replica_set_uuid;

    // Hand leadership to replica 1; the old leader's writes now bounce.
    c.fabric.set_leader(group, c.replicas[1].peer);

    assert_eq!(
        c.replicas[0]
            .engine
            .put_blob(shard.id, seeded_blob(256, 1, "k"))
            .await
            .unwrap_err(),
        BlobError::NotLeader
    );
    assert_eq!(
        c.replicas[0]
            .engine
            .create_shard(1, CHUNK_SIZE / 2)
            .await
            .unwrap_err(),
        ShardError::NotLeader
    );

    // The new leader serves writes, and all replicas observe them.
    let blob_id = c.replicas[1]
        .engine
        .put_blob(shard.id, seeded_blob(256, 2, "k"))
        .await
        .unwrap();
    for r in &c.replicas {
        assert!(r.engine.get_blob(shard.id, blob_id, 0, 0).await.is_ok());
    }

    // Stats report the new leader.
    assert_eq!(
        c.replicas[2].engine.get_stats(1).unwrap().leader_id,
        Some(c.replicas[1].peer)
    );
}

#[tokio::test]
#[ntest::timeout(60000)]
async fn test_replace_member_updates_all_superblocks() {
    let c = IntegrationCluster::new(3, 8);
    c.leader()
        .create_pg(c.pg_info(1, 2 * CHUNK_SIZE))
        .await
        .unwrap();

    let out_peer = c.replicas[1].peer;
    let new_peer = Uuid::new_v4();
    c.leader()
        .replace_member(1, out_peer, PgMember::with_name(new_peer, "replica-new", 1), 0)
        .await
        .unwrap();

    for r in [&c.replicas[0], &c.replicas[2]] {
        let sb = r.meta.get_pg_sb(1).unwrap().unwrap();
        let ids: Vec<_> = sb.members.iter().map(|m| m.id).collect();
        assert!(ids.contains(&new_peer));
        assert!(!ids.contains(&out_peer));
    }
}

#[tokio::test]
#[ntest::timeout(60000)]
async fn test_replace_member_from_follower_rejected() {
    let c = IntegrationCluster::new(3, 8);
    c.leader()
        .create_pg(c.pg_info(1, 2 * CHUNK_SIZE))
        .await
        .unwrap();

    assert_eq!(
        c.replicas[2]
            .engine
            .replace_member(
                1,
                c.replicas[0].peer,
                PgMember::with_name(Uuid::new_v4(), "x", 0),
                0,
            )
            .await
            .unwrap_err(),
        PGError::NotLeader
    );
}

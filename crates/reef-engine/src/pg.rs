//! PG manager: creation, membership and statistics.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use bytes::Bytes;
use reef_meta::MetaError;
use reef_repl::{Proposal, ProposalCtx, ReplMessageHeader, ReplMsgType, ReplMemberInfo};
use reef_types::superblk::PgInfoSuperblk;
use reef_types::{GroupId, PeerId, PgId, PgInfo, PgMember, PgMemberStats, PgStats};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::{DurableEntities, PgEntry, PgIndexEntry, ReefEngine};
use crate::error::PGError;
use crate::result_ctx::{ResultCtx, resolve};

/// Serialize a [`PgInfo`] into the stable JSON wire form of `CREATE_PG`.
pub fn serialize_pg_info(info: &PgInfo) -> String {
    let members: Vec<serde_json::Value> = info
        .members
        .iter()
        .map(|m| {
            serde_json::json!({
                "member_id": m.id.to_string(),
                "name": m.name,
                "priority": m.priority,
            })
        })
        .collect();

    serde_json::json!({
        "pg_info": {
            "pg_id_t": info.id,
            "pg_size": info.size,
            "chunk_size": info.chunk_size,
            "repl_uuid": info.replica_set_uuid.to_string(),
            "members": members,
        }
    })
    .to_string()
}

/// Parse the stable JSON wire form back into a [`PgInfo`].
pub fn deserialize_pg_info(payload: &[u8]) -> Result<PgInfo, PGError> {
    let v: serde_json::Value = serde_json::from_slice(payload).map_err(|e| {
        error!(%e, "create pg payload is not valid json");
        PGError::InvalidArg
    })?;
    let pg = &v["pg_info"];

    let parse = || -> Option<PgInfo> {
        let mut info = PgInfo::new(pg["pg_id_t"].as_u64()? as PgId);
        info.size = pg["pg_size"].as_u64()?;
        info.chunk_size = pg["chunk_size"].as_u64()?;
        info.replica_set_uuid = Uuid::parse_str(pg["repl_uuid"].as_str()?).ok()?;
        for m in pg["members"].as_array()? {
            info.members.insert(PgMember::with_name(
                Uuid::parse_str(m["member_id"].as_str()?).ok()?,
                m["name"].as_str()?,
                m["priority"].as_i64()? as i32,
            ));
        }
        Some(info)
    };
    parse().ok_or(PGError::InvalidArg)
}

/// Reconstruct a [`PgInfo`] from a persisted superblock.
///
/// `chunk_size` is not stored in the superblock; the caller fills it from
/// the local chunk selector.
pub(crate) fn pg_info_from_sb(sb: &PgInfoSuperblk) -> PgInfo {
    let mut info = PgInfo::new(sb.id);
    info.size = sb.pg_size;
    info.replica_set_uuid = sb.replica_set_uuid;
    for m in &sb.members {
        info.members.insert(m.clone());
    }
    info
}

impl ReefEngine {
    /// Create a placement group across its member peers.
    ///
    /// Validates locally, creates the replication group, then proposes
    /// `CREATE_PG`; the typed result resolves when the local commit applies.
    /// Creating a PG that already exists locally is a no-op success.
    pub async fn create_pg(&self, mut pg_info: PgInfo) -> Result<(), PGError> {
        let pg_id = pg_info.id;
        if self.pg_exists(pg_id) {
            return Ok(());
        }
        if pg_info.size == 0 {
            warn!(pg_id, "refusing to create empty pg");
            return Err(PGError::InvalidArg);
        }
        if pg_info.members.is_empty() {
            warn!(pg_id, "refusing to create pg with no members");
            return Err(PGError::InvalidArg);
        }

        let chunk_size = self.chunk_selector.chunk_size();
        let most_avail = self.chunk_selector.most_avail_num_chunks();
        let needed = pg_info.size / chunk_size;
        if needed > most_avail {
            warn!(pg_id, needed, most_avail, "not enough chunks to create pg");
            return Err(PGError::NoSpaceLeft);
        }

        pg_info.chunk_size = chunk_size;
        pg_info.replica_set_uuid = Uuid::new_v4();

        let members: Vec<ReplMemberInfo> = pg_info
            .members
            .iter()
            .map(|m| ReplMemberInfo {
                id: m.id,
                name: m.name.clone(),
                priority: m.priority,
            })
            .collect();

        let repl_dev = self
            .repl
            .create_repl_dev(pg_info.replica_set_uuid, &members)
            .await
            .map_err(PGError::from)?;

        // The PG header replicates across the group; every member creates
        // its PG state and index table when the entry commits.
        let payload = serialize_pg_info(&pg_info);
        let frame = ReplMessageHeader::frame(ReplMsgType::CreatePg, payload.as_bytes());
        let (ctx, rx) = ResultCtx::<(), PGError>::make();
        repl_dev
            .propose(Proposal {
                header: Bytes::from(frame),
                key: Bytes::new(),
                data: Vec::new(),
                ctx: Some(ctx as ProposalCtx),
            })
            .await
            .map_err(PGError::from)?;

        rx.await.unwrap_or(Err(PGError::Unknown))
    }

    /// Apply a committed `CREATE_PG` entry on this replica.
    pub(crate) fn on_create_pg_commit(&self, lsn: u64, payload: &[u8], ctx: Option<&ProposalCtx>) {
        let pg_info = match deserialize_pg_info(payload) {
            Ok(info) => info,
            Err(e) => {
                error!(lsn, "create pg payload undecodable");
                resolve::<(), PGError>(ctx, Err(e));
                return;
            }
        };
        let pg_id = pg_info.id;

        if self.pg_exists(pg_id) {
            warn!(lsn, pg_id, "pg already exists, replaying commit as no-op");
            resolve::<(), PGError>(ctx, Ok(()));
            return;
        }

        let local_chunk_size = self.chunk_selector.chunk_size();
        if pg_info.chunk_size != local_chunk_size {
            error!(
                lsn,
                pg_id,
                leader_chunk_size = pg_info.chunk_size,
                local_chunk_size,
                "chunk sizes are inconsistent across replicas"
            );
            resolve::<(), PGError>(ctx, Err(PGError::Unknown));
            return;
        }

        if self
            .chunk_selector
            .select_chunks_for_pg(pg_id, pg_info.size)
            .is_none()
        {
            warn!(lsn, pg_id, "failed to select chunks for pg");
            resolve::<(), PGError>(ctx, Err(PGError::NoSpaceLeft));
            return;
        }
        let chunk_ids = self.chunk_selector.get_pg_chunks(pg_id).unwrap_or_default();

        let repl_dev = match self.repl.get_repl_dev(pg_info.replica_set_uuid) {
            Ok(dev) => dev,
            Err(e) => {
                error!(lsn, pg_id, %e, "replication group missing at commit");
                resolve::<(), PGError>(ctx, Err(PGError::from(e)));
                return;
            }
        };

        let index_uuid = Uuid::new_v4();
        let index_table = match self.meta.create_index_table(index_uuid) {
            Ok(t) => t,
            Err(e) => {
                error!(lsn, pg_id, %e, "failed to create index table");
                resolve::<(), PGError>(ctx, Err(PGError::DriveWriteError));
                return;
            }
        };

        {
            let mut index_map = self.index_map.write().expect("lock poisoned");
            assert!(
                !index_map.contains_key(&index_uuid),
                "duplicate index table {index_uuid}"
            );
            index_map.insert(
                index_uuid,
                PgIndexEntry {
                    pg_id,
                    table: index_table.clone(),
                },
            );
        }
        info!(pg_id, %index_uuid, "index table created for pg");

        let entry = Arc::new(PgEntry {
            info: RwLock::new(pg_info),
            repl_dev,
            index_table,
            shards: RwLock::new(BTreeMap::new()),
            durable: DurableEntities::default(),
            next_shard_seq: AtomicU64::new(0),
            sb_dirty: AtomicBool::new(false),
        });

        if let Err(e) = self.write_pg_sb(&entry, &chunk_ids) {
            error!(lsn, pg_id, %e, "failed to persist pg superblock");
            resolve::<(), PGError>(ctx, Err(PGError::DriveWriteError));
            return;
        }

        self.add_pg_to_map(entry);
        info!(lsn, pg_id, "pg created");
        resolve::<(), PGError>(ctx, Ok(()));
    }

    /// Replace `old_member` with `new_member` in a PG's replica set.
    ///
    /// Only the leader may drive the change under the default quorum.
    pub async fn replace_member(
        &self,
        pg_id: PgId,
        old_member: PeerId,
        new_member: PgMember,
        commit_quorum: u32,
    ) -> Result<(), PGError> {
        let group_id = {
            let pg = self.pg(pg_id).ok_or(PGError::UnknownPg)?;
            if !pg.repl_dev.is_leader() && commit_quorum == 0 {
                return Err(PGError::NotLeader);
            }
            pg.repl_dev.group_id()
        };

        info!(pg_id, out = %old_member, new = %new_member.id, "pg replace member initiated");
        let member_in = ReplMemberInfo {
            id: new_member.id,
            name: new_member.name,
            priority: new_member.priority,
        };
        self.repl
            .replace_member(group_id, old_member, member_in, commit_quorum)
            .await
            .map_err(PGError::from)
    }

    /// Membership change applied by the replication layer: update the
    /// in-memory member set and rewrite the PG superblock.
    pub(crate) fn handle_replace_member(
        &self,
        group_id: GroupId,
        member_out: &ReplMemberInfo,
        member_in: &ReplMemberInfo,
    ) {
        let Some((pg_id, pg)) = self.pg_by_group(group_id) else {
            error!(%group_id, out = %member_out.id, new = %member_in.id, "pg replace member failed: unknown group");
            return;
        };

        {
            let mut info = pg.info.write().expect("lock poisoned");
            info.members.remove(&PgMember::new(member_out.id));
            info.members.insert(PgMember::with_name(
                member_in.id,
                member_in.name.clone(),
                member_in.priority,
            ));
        }

        if let Err(e) = self.persist_pg_sb(pg_id, &pg) {
            error!(pg_id, %e, "failed to rewrite pg superblock after member change");
            return;
        }
        info!(pg_id, out = %member_out.id, new = %member_in.id, "pg replace member done");
    }

    /// Compose live statistics for one PG.
    pub fn get_stats(&self, pg_id: PgId) -> Option<PgStats> {
        let pg = self.pg(pg_id)?;
        let info = pg.info.read().expect("lock poisoned");
        let blk_size = u64::from(pg.repl_dev.block_size());
        let replication_status = pg.repl_dev.replication_status();

        let members = info
            .members
            .iter()
            .map(|m| {
                // Replication status can be empty on a follower.
                let (last_commit_lsn, last_succ_resp_us) = replication_status
                    .iter()
                    .find(|s| s.id == m.id)
                    .map(|s| (s.replication_idx, s.last_succ_resp_us))
                    .unwrap_or((0, 0));
                PgMemberStats {
                    id: m.id,
                    name: m.name.clone(),
                    last_commit_lsn,
                    last_succ_resp_us,
                }
            })
            .collect();

        Some(PgStats {
            id: info.id,
            replica_set_uuid: info.replica_set_uuid,
            leader_id: pg.repl_dev.leader_id(),
            num_members: info.members.len() as u32,
            total_shards: pg.total_shards(),
            open_shards: pg.open_shards(),
            num_active_objects: pg.durable.active_blob_count.load(Ordering::Relaxed),
            num_tombstone_objects: pg.durable.tombstone_blob_count.load(Ordering::Relaxed),
            avail_open_shards: self.chunk_selector.avail_num_chunks(pg_id),
            avail_bytes: self.chunk_selector.avail_blks(pg_id) * blk_size,
            used_bytes: pg.durable.total_occupied_blk_count.load(Ordering::Relaxed) * blk_size,
            members,
        })
    }

    pub(crate) fn pg_by_group(&self, group_id: GroupId) -> Option<(PgId, Arc<PgEntry>)> {
        let map = self.pg_map.read().expect("lock poisoned");
        map.iter()
            .find(|(_, pg)| pg.repl_dev.group_id() == group_id)
            .map(|(&id, pg)| (id, pg.clone()))
    }

    /// Snapshot a PG's durable state into its superblock record.
    pub(crate) fn build_pg_sb(&self, pg_id: PgId, pg: &PgEntry) -> PgInfoSuperblk {
        let info = pg.info.read().expect("lock poisoned");
        PgInfoSuperblk {
            id: pg_id,
            replica_set_uuid: info.replica_set_uuid,
            pg_size: info.size,
            index_table_uuid: pg.index_table.uuid(),
            blob_sequence_num: pg.durable.blob_sequence_num.load(Ordering::Relaxed),
            active_blob_count: pg.durable.active_blob_count.load(Ordering::Relaxed),
            tombstone_blob_count: pg.durable.tombstone_blob_count.load(Ordering::Relaxed),
            total_occupied_blk_count: pg.durable.total_occupied_blk_count.load(Ordering::Relaxed),
            members: info.members.iter().cloned().collect(),
            chunk_ids: self.chunk_selector.get_pg_chunks(pg_id).unwrap_or_default(),
        }
    }

    /// Rewrite a PG's superblock from current in-memory state.
    pub(crate) fn persist_pg_sb(&self, pg_id: PgId, pg: &PgEntry) -> Result<(), MetaError> {
        let sb = self.build_pg_sb(pg_id, pg);
        self.meta.put_pg_sb(&sb)?;
        pg.sb_dirty.store(false, Ordering::Release);
        debug!(pg_id, "pg superblock rewritten");
        Ok(())
    }

    fn write_pg_sb(&self, entry: &PgEntry, chunk_ids: &[reef_types::ChunkId]) -> Result<(), MetaError> {
        let info = entry.info.read().expect("lock poisoned");
        let sb = PgInfoSuperblk {
            id: info.id,
            replica_set_uuid: info.replica_set_uuid,
            pg_size: info.size,
            index_table_uuid: entry.index_table.uuid(),
            blob_sequence_num: 0,
            active_blob_count: 0,
            tombstone_blob_count: 0,
            total_occupied_blk_count: 0,
            members: info.members.iter().cloned().collect(),
            chunk_ids: chunk_ids.to_vec(),
        };
        self.meta.put_pg_sb(&sb)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

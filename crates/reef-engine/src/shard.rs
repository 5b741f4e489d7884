//! Shard manager: create and seal shards through the replicated log.
//!
//! `CREATE_SHARD` carries a chunk binding decided at pre-commit: every
//! replica reserves a chunk, and the proposer's reservation is stamped into
//! the replicated payload so the whole group converges on one
//! `(p_chunk_id, v_chunk_id)` mapping. A replica whose own reservation
//! differs releases it at commit and claims the proposer's choice; rollback
//! and proposer-side errors release the reservation instead.

use bytes::Bytes;
use reef_repl::{Proposal, ProposalCtx, ReplMessageHeader, ReplMsgType};
use reef_types::superblk::ShardInfoSuperblk;
use reef_types::{
    PgId, ShardId, ShardInfo, ShardState, VChunkId, make_shard_id, shard_seq,
};
use std::sync::atomic::Ordering;
use tracing::{debug, error, warn};

use crate::engine::{ReefEngine, ShardHandle};
use crate::error::ShardError;
use crate::result_ctx::{ResultCtx, resolve};

impl ReefEngine {
    /// Create a new open shard on a PG.
    ///
    /// The leader allocates the shard id; every replica binds the shard to
    /// a chunk when the entry commits.
    pub async fn create_shard(
        &self,
        pg_id: PgId,
        size_bytes: u64,
    ) -> Result<ShardInfo, ShardError> {
        if size_bytes == 0 || size_bytes > self.cfg.max_shard_size_bytes {
            warn!(pg_id, size_bytes, "invalid shard size");
            return Err(ShardError::InvalidArg);
        }
        let pg = self.pg(pg_id).ok_or(ShardError::UnknownPg)?;
        if !pg.repl_dev.is_leader() {
            return Err(ShardError::NotLeader);
        }

        let seq = pg.next_shard_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let shard_id = make_shard_id(pg_id, seq);
        let now = Self::now_secs();
        let num_members = pg.info.read().expect("lock poisoned").members.len() as u32;
        let info = ShardInfo {
            id: shard_id,
            placement_group: pg_id,
            state: ShardState::Open,
            created_time: now,
            last_modified_time: now,
            available_replica_count: num_members,
            used_capacity_bytes: 0,
            deleted_capacity_bytes: 0,
        };

        // Chunk binding fields stay zero; pre-commit fills them in.
        let sb = ShardInfoSuperblk::new(info, 0, 0);
        let frame = ReplMessageHeader::frame(ReplMsgType::CreateShard, &sb.to_bytes());
        let (ctx, rx) = ResultCtx::<ShardInfo, ShardError>::make();

        let result = pg
            .repl_dev
            .propose(Proposal {
                header: Bytes::from(frame.clone()),
                key: Bytes::new(),
                data: Vec::new(),
                ctx: Some(ctx as ProposalCtx),
            })
            .await;

        if let Err(e) = result {
            // The local pre-commit may have reserved a chunk before the
            // proposal failed; hand it back.
            self.release_chunk_based_on_create_shard_message(&frame);
            return Err(ShardError::from(e));
        }

        rx.await.unwrap_or(Err(ShardError::InvalidArg))
    }

    /// Seal an open shard. Sealing an already-sealed shard is a no-op
    /// success; unknown and deleted shards are rejected.
    pub async fn seal_shard(&self, shard_id: ShardId) -> Result<ShardInfo, ShardError> {
        let (pg, handle) = self
            .shard_handle(shard_id)
            .ok_or(ShardError::InvalidArg)?;
        match handle.info.state {
            ShardState::Sealed => return Ok(handle.info),
            ShardState::Deleted => return Err(ShardError::InvalidArg),
            ShardState::Open => {}
        }
        if !pg.repl_dev.is_leader() {
            return Err(ShardError::NotLeader);
        }

        let mut info = handle.info;
        info.state = ShardState::Sealed;
        info.last_modified_time = Self::now_secs();
        let sb = ShardInfoSuperblk::new(info, handle.p_chunk_id, handle.v_chunk_id);
        let frame = ReplMessageHeader::frame(ReplMsgType::SealShard, &sb.to_bytes());
        let (ctx, rx) = ResultCtx::<ShardInfo, ShardError>::make();

        pg.repl_dev
            .propose(Proposal {
                header: Bytes::from(frame),
                key: Bytes::new(),
                data: Vec::new(),
                ctx: Some(ctx as ProposalCtx),
            })
            .await
            .map_err(ShardError::from)?;

        rx.await.unwrap_or(Err(ShardError::InvalidArg))
    }

    /// In-memory shard lookup.
    pub fn get_shard(&self, shard_id: ShardId) -> Result<ShardInfo, ShardError> {
        self.shard_handle(shard_id)
            .map(|(_, h)| h.info)
            .ok_or(ShardError::UnknownShard)
    }

    /// All shards of a PG in sequence order.
    pub fn list_shards(&self, pg_id: PgId) -> Result<Vec<ShardInfo>, ShardError> {
        let pg = self.pg(pg_id).ok_or(ShardError::UnknownPg)?;
        let shards = pg.shards.read().expect("lock poisoned");
        Ok(shards.values().map(|h| h.info.clone()).collect())
    }

    // -------------------------------------------------------------------
    // Replication hooks
    // -------------------------------------------------------------------

    /// Pre-commit for shard messages. `CREATE_SHARD` reserves a chunk and
    /// stamps the binding into the payload; other shard messages reserve
    /// nothing.
    pub(crate) fn on_shard_message_pre_commit(&self, lsn: u64, frame: &mut Vec<u8>) -> bool {
        let mut sb = {
            let Ok((header, payload)) = ReplMessageHeader::split(frame) else {
                return false;
            };
            if header.msg_type != ReplMsgType::CreateShard {
                return true;
            }
            match ShardInfoSuperblk::from_bytes(payload) {
                Ok(sb) => sb,
                Err(e) => {
                    error!(lsn, %e, "create shard payload undecodable at pre-commit");
                    return false;
                }
            }
        };

        let pg_id = sb.info.placement_group;
        let Some((p_chunk_id, v_chunk_id)) =
            self.chunk_selector.reserve_chunk_for_new_shard(pg_id)
        else {
            warn!(lsn, pg_id, "no free chunk for new shard");
            return false;
        };
        self.reservations
            .lock()
            .expect("lock poisoned")
            .insert(sb.info.id, (p_chunk_id, v_chunk_id));

        sb.p_chunk_id = p_chunk_id;
        sb.v_chunk_id = v_chunk_id;
        ReplMessageHeader::reframe_payload(frame, &sb.to_bytes()).is_ok()
    }

    /// Rollback of a `CREATE_SHARD` entry: hand the reserved chunk back.
    pub(crate) fn on_shard_message_rollback(&self, lsn: u64, frame: &[u8]) {
        debug!(lsn, "rolling back shard message");
        self.release_chunk_based_on_create_shard_message(frame);
    }

    /// Release the chunk recorded for a `CREATE_SHARD` message.
    ///
    /// Invoked during log rollback and when the proposer hits an error, to
    /// revert the PG's chunk state. Prefers the replica's own reservation;
    /// falls back to the binding carried in the message.
    pub fn release_chunk_based_on_create_shard_message(&self, frame: &[u8]) -> bool {
        let Ok((_, payload)) = ReplMessageHeader::split(frame) else {
            return false;
        };
        let Ok(sb) = ShardInfoSuperblk::from_bytes(payload) else {
            return false;
        };
        let pg_id = sb.info.placement_group;

        if let Some((p_chunk_id, _)) = self
            .reservations
            .lock()
            .expect("lock poisoned")
            .remove(&sb.info.id)
        {
            return self.chunk_selector.release_chunk(pg_id, p_chunk_id);
        }
        if sb.p_chunk_id != 0 {
            return self.chunk_selector.release_chunk(pg_id, sb.p_chunk_id);
        }
        false
    }

    /// Map the physical chunk in a `CREATE_SHARD` message to its virtual id
    /// within the owning PG.
    pub fn resolve_v_chunk_id_from_msg(&self, frame: &[u8]) -> Option<VChunkId> {
        let Ok((_, payload)) = ReplMessageHeader::split(frame) else {
            return None;
        };
        let sb = ShardInfoSuperblk::from_bytes(payload).ok()?;
        self.chunk_selector
            .v_chunk_id(sb.info.placement_group, sb.p_chunk_id)
    }

    /// Dispatch a committed shard message.
    pub(crate) fn on_shard_message_commit(
        &self,
        lsn: u64,
        msg_type: ReplMsgType,
        payload: &[u8],
        ctx: Option<&ProposalCtx>,
    ) {
        let sb = match ShardInfoSuperblk::from_bytes(payload) {
            Ok(sb) => sb,
            Err(e) => {
                error!(lsn, %e, "shard message payload undecodable at commit");
                resolve::<ShardInfo, ShardError>(ctx, Err(ShardError::InvalidArg));
                return;
            }
        };
        match msg_type {
            ReplMsgType::CreateShard => self.on_create_shard_commit(lsn, sb, ctx),
            ReplMsgType::SealShard => self.on_seal_shard_commit(lsn, sb, ctx),
            _ => unreachable!("non-shard message dispatched to shard commit"),
        }
    }

    fn on_create_shard_commit(&self, lsn: u64, sb: ShardInfoSuperblk, ctx: Option<&ProposalCtx>) {
        let pg_id = sb.info.placement_group;
        let Some(pg) = self.pg(pg_id) else {
            error!(lsn, pg_id, "create shard commit on unknown pg");
            resolve::<ShardInfo, ShardError>(ctx, Err(ShardError::UnknownPg));
            return;
        };
        let seq = shard_seq(sb.info.id);

        if let Some(existing) = pg.shards.read().expect("lock poisoned").get(&seq) {
            warn!(lsn, shard_id = sb.info.id, "shard already exists, replaying commit as no-op");
            resolve::<ShardInfo, ShardError>(ctx, Ok(existing.info.clone()));
            return;
        }

        // The proposer's binding wins. A replica whose pre-commit picked a
        // different chunk releases its own choice and claims the decided one.
        let decided = (sb.p_chunk_id, sb.v_chunk_id);
        let local = self
            .reservations
            .lock()
            .expect("lock poisoned")
            .remove(&sb.info.id);
        match local {
            Some(choice) if choice == decided => {}
            other => {
                if let Some((local_p, _)) = other {
                    debug!(
                        lsn,
                        local_p,
                        decided_p = decided.0,
                        "local reservation differs from proposer's, switching"
                    );
                    self.chunk_selector.release_chunk(pg_id, local_p);
                }
                if self.chunk_selector.reserve_chunk(pg_id, decided.0).is_none() {
                    warn!(lsn, pg_id, p_chunk_id = decided.0, "decided chunk not reservable locally");
                }
            }
        }

        if let Err(e) = self.meta.put_shard_sb(&sb) {
            // A failed superblock write leaves this replica unable to
            // recover the shard; treat as fatal.
            panic!("failed to persist shard superblock for {}: {e}", sb.info.id);
        }

        pg.shards.write().expect("lock poisoned").insert(
            seq,
            ShardHandle {
                info: sb.info.clone(),
                p_chunk_id: sb.p_chunk_id,
                v_chunk_id: sb.v_chunk_id,
            },
        );
        pg.next_shard_seq.fetch_max(seq, Ordering::SeqCst);

        debug!(lsn, shard_id = sb.info.id, p_chunk_id = sb.p_chunk_id, "shard created");
        resolve::<ShardInfo, ShardError>(ctx, Ok(sb.info));
    }

    fn on_seal_shard_commit(&self, lsn: u64, sb: ShardInfoSuperblk, ctx: Option<&ProposalCtx>) {
        let pg_id = sb.info.placement_group;
        let Some(pg) = self.pg(pg_id) else {
            resolve::<ShardInfo, ShardError>(ctx, Err(ShardError::UnknownPg));
            return;
        };
        let seq = shard_seq(sb.info.id);

        let sealed = {
            let mut shards = pg.shards.write().expect("lock poisoned");
            let Some(handle) = shards.get_mut(&seq) else {
                resolve::<ShardInfo, ShardError>(ctx, Err(ShardError::UnknownShard));
                return;
            };
            if handle.info.state == ShardState::Sealed {
                resolve::<ShardInfo, ShardError>(ctx, Ok(handle.info.clone()));
                return;
            }
            handle.info.state = ShardState::Sealed;
            handle.info.last_modified_time = sb.info.last_modified_time;
            ShardInfoSuperblk::new(handle.info.clone(), handle.p_chunk_id, handle.v_chunk_id)
        };

        if let Err(e) = self.meta.put_shard_sb(&sealed) {
            panic!("failed to persist sealed shard superblock for {}: {e}", sb.info.id);
        }

        debug!(lsn, shard_id = sb.info.id, "shard sealed");
        resolve::<ShardInfo, ShardError>(ctx, Ok(sealed.info));
    }
}

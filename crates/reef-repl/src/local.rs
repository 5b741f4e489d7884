//! In-process replication fabric.
//!
//! [`LocalReplFabric`] simulates a cluster of replicas inside one process:
//! each peer registers its listener (the engine's state machine) and its
//! block device, and every group commits entries to all member replicas in a
//! deterministic order under a per-group commit lock. The proposer's
//! pre-commit hook runs first and may reseal the header frame; followers see
//! the proposer's frame, mirroring how a consensus log replicates the
//! leader's entry.
//!
//! Fault injection hooks (`abort_next_proposal`, `fail_next_propose`,
//! `set_leader`) let tests exercise the rollback and leader-change paths
//! that a real consensus layer produces.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use reef_store::{BlockDevice, StoreError};
use reef_types::{GroupId, MultiBlkId, PeerId};
use tracing::{debug, warn};

use crate::error::ReplError;
use crate::traits::{
    PeerReplStatus, Proposal, ReplDev, ReplListener, ReplMemberInfo, ReplService,
};

fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

fn map_store_err(e: StoreError) -> ReplError {
    match e {
        StoreError::OutOfSpace { .. } => ReplError::NoSpaceLeft,
        StoreError::Io(_) => ReplError::DriveWriteError,
        _ => ReplError::Failed,
    }
}

#[derive(Clone)]
struct PeerBinding {
    listener: Arc<dyn ReplListener>,
    device: Arc<dyn BlockDevice>,
}

struct LocalGroup {
    group_id: GroupId,
    members: RwLock<Vec<ReplMemberInfo>>,
    leader: RwLock<PeerId>,
    next_lsn: AtomicU64,
    /// Serialises the group's commit stream.
    commit_lock: tokio::sync::Mutex<()>,
    status: RwLock<HashMap<PeerId, PeerReplStatus>>,
    abort_next: AtomicBool,
    fail_next_propose: AtomicBool,
}

impl LocalGroup {
    fn member_peers(&self) -> Vec<PeerId> {
        self.members
            .read()
            .expect("lock poisoned")
            .iter()
            .map(|m| m.id)
            .collect()
    }

    fn leader(&self) -> PeerId {
        *self.leader.read().expect("lock poisoned")
    }
}

/// An in-process cluster of replicas sharing one address space.
#[derive(Default)]
pub struct LocalReplFabric {
    peers: RwLock<HashMap<PeerId, PeerBinding>>,
    groups: RwLock<HashMap<GroupId, Arc<LocalGroup>>>,
}

impl LocalReplFabric {
    /// Create an empty fabric.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Bind a peer's listener and device. Must run before the peer
    /// participates in any group.
    pub fn register_peer(
        &self,
        peer_id: PeerId,
        listener: Arc<dyn ReplListener>,
        device: Arc<dyn BlockDevice>,
    ) {
        self.peers
            .write()
            .expect("lock poisoned")
            .insert(peer_id, PeerBinding { listener, device });
    }

    /// Abort the next proposal on the group after pre-commit, exercising the
    /// rollback path as a leader change would.
    pub fn abort_next_proposal(&self, group_id: GroupId) {
        if let Some(g) = self.group(group_id) {
            g.abort_next.store(true, Ordering::SeqCst);
        }
    }

    /// Fail the next `propose` call before any hook runs.
    pub fn fail_next_propose(&self, group_id: GroupId) {
        if let Some(g) = self.group(group_id) {
            g.fail_next_propose.store(true, Ordering::SeqCst);
        }
    }

    /// Reassign group leadership (simulated election).
    pub fn set_leader(&self, group_id: GroupId, peer_id: PeerId) {
        if let Some(g) = self.group(group_id) {
            *g.leader.write().expect("lock poisoned") = peer_id;
        }
    }

    /// Current leader of a group.
    pub fn leader_of(&self, group_id: GroupId) -> Option<PeerId> {
        self.group(group_id).map(|g| g.leader())
    }

    fn group(&self, group_id: GroupId) -> Option<Arc<LocalGroup>> {
        self.groups
            .read()
            .expect("lock poisoned")
            .get(&group_id)
            .cloned()
    }

    fn binding(&self, peer_id: PeerId) -> Option<PeerBinding> {
        self.peers
            .read()
            .expect("lock poisoned")
            .get(&peer_id)
            .cloned()
    }
}

/// [`ReplService`] implementation scoped to one peer of a
/// [`LocalReplFabric`].
#[derive(Clone)]
pub struct LocalReplService {
    fabric: Arc<LocalReplFabric>,
    local_peer: PeerId,
}

impl LocalReplService {
    /// A service handle scoped to one peer of the fabric.
    pub fn new(fabric: Arc<LocalReplFabric>, peer_id: PeerId) -> Self {
        Self {
            fabric,
            local_peer: peer_id,
        }
    }

    /// The peer this service handle belongs to.
    pub fn local_peer(&self) -> PeerId {
        self.local_peer
    }

    /// The shared fabric.
    pub fn fabric(&self) -> &Arc<LocalReplFabric> {
        &self.fabric
    }
}

#[async_trait::async_trait]
impl ReplService for LocalReplService {
    async fn create_repl_dev(
        &self,
        group_id: GroupId,
        members: &[ReplMemberInfo],
    ) -> Result<Arc<dyn ReplDev>, ReplError> {
        if members.is_empty() {
            return Err(ReplError::BadRequest);
        }
        let mut groups = self.fabric.groups.write().expect("lock poisoned");
        if groups.contains_key(&group_id) {
            return Err(ReplError::ServerAlreadyExists);
        }

        let status = members
            .iter()
            .map(|m| {
                (
                    m.id,
                    PeerReplStatus {
                        id: m.id,
                        replication_idx: 0,
                        last_succ_resp_us: 0,
                    },
                )
            })
            .collect();

        let group = Arc::new(LocalGroup {
            group_id,
            members: RwLock::new(members.to_vec()),
            leader: RwLock::new(self.local_peer),
            next_lsn: AtomicU64::new(0),
            commit_lock: tokio::sync::Mutex::new(()),
            status: RwLock::new(status),
            abort_next: AtomicBool::new(false),
            fail_next_propose: AtomicBool::new(false),
        });
        groups.insert(group_id, group.clone());
        debug!(%group_id, members = members.len(), "created replication group");

        Ok(Arc::new(LocalReplDev {
            fabric: self.fabric.clone(),
            group,
            local_peer: self.local_peer,
        }))
    }

    fn get_repl_dev(&self, group_id: GroupId) -> Result<Arc<dyn ReplDev>, ReplError> {
        let group = self.fabric.group(group_id).ok_or(ReplError::ServerNotFound)?;
        Ok(Arc::new(LocalReplDev {
            fabric: self.fabric.clone(),
            group,
            local_peer: self.local_peer,
        }))
    }

    async fn replace_member(
        &self,
        group_id: GroupId,
        member_out: PeerId,
        member_in: ReplMemberInfo,
        commit_quorum: u32,
    ) -> Result<(), ReplError> {
        let group = self.fabric.group(group_id).ok_or(ReplError::ServerNotFound)?;
        if commit_quorum == 0 && group.leader() != self.local_peer {
            return Err(ReplError::NotLeader);
        }

        let out_info = {
            let mut members = group.members.write().expect("lock poisoned");
            if members.iter().any(|m| m.id == member_in.id) {
                return Err(ReplError::ServerAlreadyExists);
            }
            let pos = members
                .iter()
                .position(|m| m.id == member_out)
                .ok_or(ReplError::BadRequest)?;
            let out_info = members.remove(pos);
            members.push(member_in.clone());
            out_info
        };

        {
            let mut status = group.status.write().expect("lock poisoned");
            status.remove(&member_out);
            status.insert(
                member_in.id,
                PeerReplStatus {
                    id: member_in.id,
                    replication_idx: 0,
                    last_succ_resp_us: 0,
                },
            );
        }

        // A departing leader hands off to the first surviving member.
        if group.leader() == member_out {
            let new_leader = group.member_peers()[0];
            *group.leader.write().expect("lock poisoned") = new_leader;
        }

        for peer in group.member_peers() {
            if let Some(binding) = self.fabric.binding(peer) {
                binding
                    .listener
                    .on_replace_member(group_id, &out_info, &member_in);
            }
        }
        debug!(%group_id, out = %member_out, new = %member_in.id, "replaced group member");
        Ok(())
    }
}

/// Per-peer view of one replication group.
pub struct LocalReplDev {
    fabric: Arc<LocalReplFabric>,
    group: Arc<LocalGroup>,
    local_peer: PeerId,
}

impl std::fmt::Debug for LocalReplDev {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalReplDev")
            .field("group_id", &self.group.group_id)
            .field("local_peer", &self.local_peer)
            .finish()
    }
}

#[async_trait::async_trait]
impl ReplDev for LocalReplDev {
    fn group_id(&self) -> GroupId {
        self.group.group_id
    }

    fn is_leader(&self) -> bool {
        self.group.leader() == self.local_peer
    }

    fn leader_id(&self) -> Option<PeerId> {
        Some(self.group.leader())
    }

    fn block_size(&self) -> u32 {
        self.fabric
            .binding(self.local_peer)
            .map(|b| b.device.block_size())
            .unwrap_or(0)
    }

    fn replication_status(&self) -> Vec<PeerReplStatus> {
        let status = self.group.status.read().expect("lock poisoned");
        self.group
            .member_peers()
            .iter()
            .filter_map(|p| status.get(p).copied())
            .collect()
    }

    async fn propose(&self, proposal: Proposal) -> Result<(), ReplError> {
        if !self.is_leader() {
            return Err(ReplError::NotLeader);
        }
        if self.group.fail_next_propose.swap(false, Ordering::SeqCst) {
            return Err(ReplError::RetryRequest);
        }

        let _stream = self.group.commit_lock.lock().await;
        let lsn = self.group.next_lsn.fetch_add(1, Ordering::SeqCst) + 1;
        let key = proposal.key.clone();

        // Member order: proposer first, then the rest. The proposer's
        // pre-commit decides the frame every other replica sees.
        let mut peers = self.group.member_peers();
        if let Some(pos) = peers.iter().position(|&p| p == self.local_peer) {
            peers.rotate_left(pos);
        }
        let bindings: Vec<(PeerId, PeerBinding)> = peers
            .iter()
            .filter_map(|&p| self.fabric.binding(p).map(|b| (p, b)))
            .collect();
        if bindings.is_empty() {
            return Err(ReplError::Failed);
        }

        // Data must be block-aligned on every member before any hook runs.
        let data_len: usize = proposal.data.iter().map(|b| b.len()).sum();
        for (_, binding) in &bindings {
            let blk_size = binding.device.block_size() as usize;
            if data_len % blk_size != 0 || data_len / blk_size > usize::from(u16::MAX) {
                return Err(ReplError::BadRequest);
            }
        }

        // Pre-commit phase.
        let mut frame = proposal.header.to_vec();
        let mut reserved: Vec<&PeerBinding> = Vec::with_capacity(bindings.len());
        for (i, (peer, binding)) in bindings.iter().enumerate() {
            let accepted = if i == 0 {
                binding.listener.on_pre_commit(lsn, &mut frame, &key)
            } else {
                // Follower-local mutations are not replicated.
                let mut local = frame.clone();
                binding.listener.on_pre_commit(lsn, &mut local, &key)
            };
            if !accepted {
                warn!(lsn, %peer, "pre-commit rejected; aborting proposal");
                for b in &reserved {
                    b.listener.on_rollback(lsn, &frame, &key);
                }
                return Err(ReplError::Failed);
            }
            reserved.push(binding);
        }

        if self.group.abort_next.swap(false, Ordering::SeqCst) {
            debug!(lsn, "injected abort after pre-commit");
            for b in &reserved {
                b.listener.on_rollback(lsn, &frame, &key);
            }
            return Err(ReplError::RetryRequest);
        }

        // Allocation + data write phase, one extent per replica.
        let mut extents: Vec<MultiBlkId> = Vec::with_capacity(bindings.len());
        if data_len > 0 {
            for (_, binding) in &bindings {
                let nblks = (data_len / binding.device.block_size() as usize) as u16;

                let result = async {
                    let hints = binding.listener.blob_alloc_hints(&frame)?;
                    let blkid = binding
                        .device
                        .alloc(nblks, &hints)
                        .await
                        .map_err(map_store_err)?;
                    binding
                        .device
                        .write(&blkid, &proposal.data)
                        .await
                        .map_err(map_store_err)?;
                    Ok::<MultiBlkId, ReplError>(blkid)
                }
                .await;

                match result {
                    Ok(blkid) => extents.push(blkid),
                    Err(e) => {
                        // Undo reservations and partial allocations.
                        for b in &reserved {
                            b.listener.on_rollback(lsn, &frame, &key);
                        }
                        for (blkid, (_, b)) in extents.iter().zip(&bindings) {
                            let _ = b.device.free(blkid).await;
                        }
                        return Err(e);
                    }
                }
            }
        } else {
            extents.resize(bindings.len(), MultiBlkId::default());
        }

        // Commit phase, in member order; the proposer (first) gets its ctx back.
        for (i, ((peer, binding), blkid)) in bindings.iter().zip(&extents).enumerate() {
            let ctx = if i == 0 { proposal.ctx.as_ref() } else { None };
            binding.listener.on_commit(lsn, &frame, &key, *blkid, ctx);
            let mut status = self.group.status.write().expect("lock poisoned");
            if let Some(s) = status.get_mut(peer) {
                s.replication_idx = lsn;
                s.last_succ_resp_us = now_us();
            }
        }
        Ok(())
    }

    async fn read(&self, blkid: &MultiBlkId, offset: u32, len: u32) -> Result<Bytes, ReplError> {
        let binding = self
            .fabric
            .binding(self.local_peer)
            .ok_or(ReplError::ServerNotFound)?;
        binding
            .device
            .read(blkid, offset, len)
            .await
            .map_err(map_store_err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Port traits between the engine and the replication layer.

use std::any::Any;
use std::sync::Arc;

use bytes::Bytes;
use reef_types::{BlkAllocHints, GroupId, MultiBlkId, PeerId};

use crate::error::ReplError;

/// Opaque proposer context carried with a proposal.
///
/// Only the proposing replica's `on_commit` receives it back; the engine
/// uses it to resolve the typed result of the operation.
pub type ProposalCtx = Arc<dyn Any + Send + Sync>;

/// One proposal to a PG's replicated log.
///
/// The header buffer is a sealed
/// [`ReplMessageHeader`](crate::message::ReplMessageHeader) frame; the key
/// buffer and data scatter list are message-type specific (empty for
/// metadata-only messages).
#[derive(Clone, Default)]
pub struct Proposal {
    /// Framed message header plus payload.
    pub header: Bytes,
    /// Secondary key buffer (user key for blob puts).
    pub key: Bytes,
    /// Data buffers, block-aligned in total.
    pub data: Vec<Bytes>,
    /// Proposer context, echoed to the local `on_commit`.
    pub ctx: Option<ProposalCtx>,
}

/// Description of a replica-set member as the replication layer sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplMemberInfo {
    /// Peer identifier.
    pub id: PeerId,
    /// Human-readable name.
    pub name: String,
    /// Election priority.
    pub priority: i32,
}

/// Per-peer replication progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerReplStatus {
    /// Peer identifier.
    pub id: PeerId,
    /// Index (LSN) of the last entry committed by this peer.
    pub replication_idx: u64,
    /// Microsecond timestamp of the peer's last successful response.
    pub last_succ_resp_us: u64,
}

/// Hooks the engine implements; invoked by the replication layer on every
/// replica as entries move through the log.
///
/// For one PG the hooks run in commit order on a single logical stream, so
/// implementations may mutate per-PG state without extra ordering.
pub trait ReplListener: Send + Sync {
    /// Reserve resources for an entry before it is committed.
    ///
    /// Runs on every replica. On the proposer the header frame may be
    /// mutated (resealed) to record replica-agreed values; follower
    /// mutations are discarded. Returning `false` aborts the proposal at
    /// this replica.
    fn on_pre_commit(&self, lsn: u64, header: &mut Vec<u8>, key: &[u8]) -> bool;

    /// Apply a committed entry. `blkids` is the local extent the data
    /// buffers were written to (the default extent for data-less messages).
    /// `ctx` is the proposer's context, present only on the proposing
    /// replica.
    fn on_commit(
        &self,
        lsn: u64,
        header: &[u8],
        key: &[u8],
        blkids: MultiBlkId,
        ctx: Option<&ProposalCtx>,
    );

    /// Undo a pre-commit reservation after the proposal aborted.
    fn on_rollback(&self, lsn: u64, header: &[u8], key: &[u8]);

    /// Membership change applied: `member_out` left, `member_in` joined.
    fn on_replace_member(
        &self,
        group_id: GroupId,
        member_out: &ReplMemberInfo,
        member_in: &ReplMemberInfo,
    );

    /// Placement hints for a data-carrying entry, resolved from its header.
    fn blob_alloc_hints(&self, header: &[u8]) -> Result<BlkAllocHints, ReplError>;
}

/// A PG-scoped replicated log device.
#[async_trait::async_trait]
pub trait ReplDev: Send + Sync + std::fmt::Debug {
    /// The replication group this device serves.
    fn group_id(&self) -> GroupId;

    /// Whether the local replica currently leads the group.
    fn is_leader(&self) -> bool;

    /// The current leader, if one is known.
    fn leader_id(&self) -> Option<PeerId>;

    /// Block size of the backing data device.
    fn block_size(&self) -> u32;

    /// Per-peer replication progress. May be empty on followers.
    fn replication_status(&self) -> Vec<PeerReplStatus>;

    /// Propose an entry and wait for quorum commit.
    ///
    /// Resolution of the typed operation result happens through the
    /// listener's `on_commit` on the proposing replica.
    async fn propose(&self, proposal: Proposal) -> Result<(), ReplError>;

    /// Read committed data blocks from the local replica.
    async fn read(&self, blkid: &MultiBlkId, offset: u32, len: u32) -> Result<Bytes, ReplError>;
}

/// Factory and registry for replication groups.
#[async_trait::async_trait]
pub trait ReplService: Send + Sync {
    /// Create a replication group over the given members.
    async fn create_repl_dev(
        &self,
        group_id: GroupId,
        members: &[ReplMemberInfo],
    ) -> Result<Arc<dyn ReplDev>, ReplError>;

    /// Look up an existing group. Fails with
    /// [`ReplError::ServerNotFound`] for unknown groups.
    fn get_repl_dev(&self, group_id: GroupId) -> Result<Arc<dyn ReplDev>, ReplError>;

    /// Replace `member_out` with `member_in` in a group.
    ///
    /// With `commit_quorum == 0` the default quorum applies and only the
    /// leader may drive the change.
    async fn replace_member(
        &self,
        group_id: GroupId,
        member_out: PeerId,
        member_in: ReplMemberInfo,
        commit_quorum: u32,
    ) -> Result<(), ReplError>;
}

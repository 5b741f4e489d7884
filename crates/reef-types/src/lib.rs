//! Shared types and identifiers for Reef.
//!
//! This crate defines the core types used across the Reef workspace:
//! identifiers ([`PgId`], [`ShardId`], [`BlobId`], [`PeerId`], [`GroupId`]),
//! data structures ([`PgInfo`], [`PgMember`], [`ShardInfo`], [`Blob`]),
//! physical extents ([`MultiBlkId`], [`BlkAllocHints`]), statistics
//! ([`PgStats`], [`EngineStats`]), and the format-frozen on-disk records
//! (see [`superblk`]).

pub mod superblk;

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ID types
// ---------------------------------------------------------------------------

/// Placement group identifier, globally unique in the cluster.
pub type PgId = u16;

/// Shard identifier: high 16 bits are the owning [`PgId`], low 48 bits a
/// monotonic per-PG shard sequence number starting at 1.
pub type ShardId = u64;

/// Blob identifier, monotonic within a shard's owning PG.
pub type BlobId = u64;

/// Physical chunk identifier on a device.
pub type ChunkId = u16;

/// Virtual chunk index within a PG's chunk list (position in the list).
pub type VChunkId = u16;

/// Physical device identifier.
pub type DevId = u32;

/// Peer (replica) identifier.
pub type PeerId = Uuid;

/// Replication group identifier; equals the PG's `replica_set_uuid`.
pub type GroupId = Uuid;

/// Mask covering the shard sequence bits of a [`ShardId`].
pub const SHARD_SEQ_MASK: u64 = (1u64 << 48) - 1;

/// Compose a [`ShardId`] from a PG id and a per-PG shard sequence number.
pub fn make_shard_id(pg_id: PgId, seq: u64) -> ShardId {
    (u64::from(pg_id) << 48) | (seq & SHARD_SEQ_MASK)
}

/// Extract the owning [`PgId`] from a [`ShardId`].
pub fn pg_of_shard(shard_id: ShardId) -> PgId {
    (shard_id >> 48) as PgId
}

/// Extract the per-PG shard sequence number from a [`ShardId`].
pub fn shard_seq(shard_id: ShardId) -> u64 {
    shard_id & SHARD_SEQ_MASK
}

// ---------------------------------------------------------------------------
// Placement group
// ---------------------------------------------------------------------------

/// A member of a placement group's replica set.
///
/// Member identity is the peer id alone: two `PgMember`s with the same `id`
/// compare equal regardless of name or priority, so a `BTreeSet<PgMember>`
/// behaves like a set keyed by peer id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PgMember {
    /// Peer identifier of the member.
    pub id: PeerId,
    /// Human-readable member name (truncated to 32 bytes on disk).
    pub name: String,
    /// Raft election priority.
    pub priority: i32,
}

impl PgMember {
    /// Create a member with an empty name and default priority.
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            name: String::new(),
            priority: 0,
        }
    }

    /// Create a fully specified member.
    pub fn with_name(id: PeerId, name: impl Into<String>, priority: i32) -> Self {
        Self {
            id,
            name: name.into(),
            priority,
        }
    }
}

impl PartialEq for PgMember {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PgMember {}

impl PartialOrd for PgMember {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PgMember {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

/// Declarative description of a placement group.
///
/// Carried in the `CREATE_PG` message payload (stable JSON form) and
/// reconstructed from the PG superblock on recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgInfo {
    /// PG identifier.
    pub id: PgId,
    /// Declared PG size in bytes.
    pub size: u64,
    /// Cluster chunk size in bytes, fixed at PG-create time.
    pub chunk_size: u64,
    /// UUID of the consensus replica set backing this PG.
    pub replica_set_uuid: GroupId,
    /// Replica set members, keyed by peer id.
    pub members: std::collections::BTreeSet<PgMember>,
}

impl PgInfo {
    /// Create a new `PgInfo` with the given id and no members yet.
    pub fn new(id: PgId) -> Self {
        Self {
            id,
            size: 0,
            chunk_size: 0,
            replica_set_uuid: Uuid::nil(),
            members: Default::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Shard
// ---------------------------------------------------------------------------

/// Lifecycle state of a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum ShardState {
    /// Accepting new blobs.
    Open = 0,
    /// Sealed; no new blobs accepted.
    Sealed = 1,
    /// Reserved for a future GC pass.
    Deleted = 2,
}

impl ShardState {
    /// Decode from the on-disk u32 representation.
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Open),
            1 => Some(Self::Sealed),
            2 => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// Descriptive and accounting state of a shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardInfo {
    /// Shard identifier (see [`make_shard_id`]).
    pub id: ShardId,
    /// Owning placement group.
    pub placement_group: PgId,
    /// Lifecycle state.
    pub state: ShardState,
    /// Creation time, seconds since UNIX epoch.
    pub created_time: u64,
    /// Last state-change time, seconds since UNIX epoch.
    pub last_modified_time: u64,
    /// Number of replicas known to hold this shard.
    pub available_replica_count: u32,
    /// Bytes of committed blob payload in this shard.
    pub used_capacity_bytes: u64,
    /// Bytes tombstoned but not yet reclaimed.
    pub deleted_capacity_bytes: u64,
}

impl ShardInfo {
    /// Whether the shard currently accepts new blobs.
    pub fn is_open(&self) -> bool {
        self.state == ShardState::Open
    }
}

// ---------------------------------------------------------------------------
// Blob
// ---------------------------------------------------------------------------

/// An opaque blob payload with its user key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Blob {
    /// The blob bytes.
    pub body: Vec<u8>,
    /// User-supplied key, stored alongside the payload.
    pub user_key: Vec<u8>,
    /// Offset of this blob within the caller's object, provided by the gateway.
    pub object_offset: u64,
}

// ---------------------------------------------------------------------------
// Physical extents
// ---------------------------------------------------------------------------

/// A multi-block allocation inside a chunk: the physical location of one
/// committed blob payload.
///
/// The all-zero value is the tombstone sentinel (see [`MultiBlkId::TOMBSTONE`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MultiBlkId {
    /// First block number within the chunk.
    pub blk_num: u64,
    /// Number of contiguous blocks.
    pub nblks: u16,
    /// Chunk holding the extent.
    pub chunk_id: ChunkId,
}

impl MultiBlkId {
    /// Sentinel extent marking a deleted blob in the index.
    pub const TOMBSTONE: MultiBlkId = MultiBlkId {
        blk_num: 0,
        nblks: 0,
        chunk_id: 0,
    };

    /// Serialized size in bytes.
    pub const ENCODED_LEN: usize = 12;

    /// Create a new extent.
    pub fn new(blk_num: u64, nblks: u16, chunk_id: ChunkId) -> Self {
        Self {
            blk_num,
            nblks,
            chunk_id,
        }
    }

    /// Whether this is the tombstone sentinel.
    pub fn is_tombstone(&self) -> bool {
        *self == Self::TOMBSTONE
    }

    /// Encode as little-endian bytes for index storage.
    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        buf[0..8].copy_from_slice(&self.blk_num.to_le_bytes());
        buf[8..10].copy_from_slice(&self.nblks.to_le_bytes());
        buf[10..12].copy_from_slice(&self.chunk_id.to_le_bytes());
        buf
    }

    /// Decode from little-endian bytes. Returns `None` on length mismatch.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return None;
        }
        Some(Self {
            blk_num: u64::from_le_bytes(bytes[0..8].try_into().ok()?),
            nblks: u16::from_le_bytes(bytes[8..10].try_into().ok()?),
            chunk_id: u16::from_le_bytes(bytes[10..12].try_into().ok()?),
        })
    }
}

impl fmt::Display for MultiBlkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}+{}", self.chunk_id, self.blk_num, self.nblks)
    }
}

/// Hints passed to the block allocator to bias placement of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlkAllocHints {
    /// Preferred device.
    pub pdev_id: Option<DevId>,
    /// Preferred chunk; blob writes pin this to the shard's chunk.
    pub chunk_id: Option<ChunkId>,
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Per-member replication progress, surfaced through [`PgStats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgMemberStats {
    /// Peer identifier.
    pub id: PeerId,
    /// Member name.
    pub name: String,
    /// Last commit LSN observed for this member.
    pub last_commit_lsn: u64,
    /// Microsecond timestamp of the last successful response.
    pub last_succ_resp_us: u64,
}

/// Aggregate statistics for one placement group.
#[derive(Debug, Clone, Default)]
pub struct PgStats {
    /// PG identifier.
    pub id: PgId,
    /// Replica set UUID.
    pub replica_set_uuid: GroupId,
    /// Current leader of the replica set, if known.
    pub leader_id: Option<PeerId>,
    /// Number of replica-set members.
    pub num_members: u32,
    /// Total shards ever created on this PG.
    pub total_shards: u32,
    /// Shards currently open.
    pub open_shards: u32,
    /// Live (non-tombstoned) blobs.
    pub num_active_objects: u64,
    /// Tombstoned blobs awaiting GC.
    pub num_tombstone_objects: u64,
    /// Chunks still free for new shards.
    pub avail_open_shards: u64,
    /// Free bytes across the PG's chunks.
    pub avail_bytes: u64,
    /// Bytes occupied by committed payloads (rounded to block size).
    pub used_bytes: u64,
    /// Per-member replication progress.
    pub members: Vec<PgMemberStats>,
}

impl Default for PgMemberStats {
    fn default() -> Self {
        Self {
            id: Uuid::nil(),
            name: String::new(),
            last_commit_lsn: 0,
            last_succ_resp_us: 0,
        }
    }
}

/// Engine-wide statistics across all locally present PGs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Number of PGs present on this replica.
    pub num_pgs: u32,
    /// Open shards across all PGs.
    pub num_open_shards: u32,
    /// Total capacity of all known chunks, in bytes.
    pub total_capacity_bytes: u64,
    /// Bytes still allocatable.
    pub avail_capacity_bytes: u64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

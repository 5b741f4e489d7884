//! Format-frozen on-disk records.
//!
//! Three record families share this module: the PG superblock
//! ([`PgInfoSuperblk`]), the shard superblock ([`ShardInfoSuperblk`]) and the
//! per-blob payload header ([`BlobHeader`]). All are packed little-endian with
//! explicit offsets; changing any layout here breaks on-disk compatibility.
//!
//! The PG superblock is a fixed header followed by two variable-length
//! sections (member records, then chunk ids), with the total size computable
//! from the header alone.

use uuid::Uuid;

use crate::{BlobId, ChunkId, PgId, PgMember, ShardId, ShardInfo, ShardState, VChunkId};

/// Device block alignment. Payloads are zero-padded to this boundary.
pub const DEVICE_BLOCK_ALIGN: u32 = 512;

/// Logical data block size used for payload rounding and occupancy counters.
pub const DATA_BLOCK_SIZE: u32 = 1024;

/// Magic stamped on every typed data record.
pub const DATA_HEADER_MAGIC: u64 = 0x21fd_ffdb_a8d6_8fc6;

/// Current record format version.
pub const DATA_HEADER_VERSION: u8 = 0x01;

/// Fixed width of a member name on disk; longer names are truncated.
pub const PG_MEMBER_NAME_LEN: usize = 32;

/// Width of the hash field in a [`BlobHeader`].
pub const BLOB_MAX_HASH_LEN: usize = 32;

/// Decoding failures for on-disk records.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer shorter than the record demands.
    #[error("record truncated: need {need} bytes, have {have}")]
    Truncated {
        /// Bytes required.
        need: usize,
        /// Bytes present.
        have: usize,
    },

    /// Magic field does not match [`DATA_HEADER_MAGIC`].
    #[error("bad record magic: {0:#x}")]
    BadMagic(u64),

    /// Version newer than this implementation understands.
    #[error("unsupported record version: {0}")]
    BadVersion(u8),

    /// Record type field is not a known [`DataType`].
    #[error("unknown record type: {0}")]
    BadType(u32),

    /// A field holds a value outside its domain.
    #[error("invalid field value: {0}")]
    BadField(&'static str),
}

// ---------------------------------------------------------------------------
// DataHeader
// ---------------------------------------------------------------------------

/// Discriminates typed data records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DataType {
    /// A [`ShardInfoSuperblk`].
    ShardInfo = 1,
    /// A [`BlobHeader`].
    BlobInfo = 2,
}

/// Common prefix of every typed data record: magic, version, type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    /// Record magic, always [`DATA_HEADER_MAGIC`] when valid.
    pub magic: u64,
    /// Format version.
    pub version: u8,
    /// Record type.
    pub data_type: DataType,
}

impl DataHeader {
    /// Encoded size: magic (8) + version (1) + type (4).
    pub const ENCODED_LEN: usize = 13;

    /// Create a header of the given type at the current version.
    pub fn new(data_type: DataType) -> Self {
        Self {
            magic: DATA_HEADER_MAGIC,
            version: DATA_HEADER_VERSION,
            data_type,
        }
    }

    /// Whether magic and version are acceptable.
    pub fn valid(&self) -> bool {
        self.magic == DATA_HEADER_MAGIC && self.version <= DATA_HEADER_VERSION
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.magic.to_le_bytes());
        buf.push(self.version);
        buf.extend_from_slice(&(self.data_type as u32).to_le_bytes());
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < Self::ENCODED_LEN {
            return Err(DecodeError::Truncated {
                need: Self::ENCODED_LEN,
                have: bytes.len(),
            });
        }
        let magic = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        if magic != DATA_HEADER_MAGIC {
            return Err(DecodeError::BadMagic(magic));
        }
        let version = bytes[8];
        if version > DATA_HEADER_VERSION {
            return Err(DecodeError::BadVersion(version));
        }
        let raw_type = u32::from_le_bytes(bytes[9..13].try_into().unwrap());
        let data_type = match raw_type {
            1 => DataType::ShardInfo,
            2 => DataType::BlobInfo,
            other => return Err(DecodeError::BadType(other)),
        };
        Ok(Self {
            magic,
            version,
            data_type,
        })
    }
}

// ---------------------------------------------------------------------------
// PG superblock
// ---------------------------------------------------------------------------

/// Encoded size of one member record: uuid (16) + name (32) + priority (4).
const PG_MEMBER_RECORD_LEN: usize = 16 + PG_MEMBER_NAME_LEN + 4;

/// Encoded size of the fixed PG superblock header.
///
/// id (2) + num_members (4) + num_chunks (4) + replica_set_uuid (16) +
/// pg_size (8) + index_table_uuid (16) + blob_sequence_num (8) +
/// active_blob_count (8) + tombstone_blob_count (8) +
/// total_occupied_blk_count (8).
const PG_SB_HEADER_LEN: usize = 82;

/// Durable record of one placement group.
///
/// Fixed header, then `num_members` member records, then `num_chunks` chunk
/// ids where position `i` is the physical chunk bound to virtual chunk `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgInfoSuperblk {
    /// PG identifier.
    pub id: PgId,
    /// Replica set UUID; equals the consensus group id.
    pub replica_set_uuid: Uuid,
    /// Declared PG size in bytes.
    pub pg_size: u64,
    /// UUID of the PG's blob index table.
    pub index_table_uuid: Uuid,
    /// Highest blob id ever committed on this PG.
    pub blob_sequence_num: u64,
    /// Live blobs.
    pub active_blob_count: u64,
    /// Tombstoned blobs awaiting GC.
    pub tombstone_blob_count: u64,
    /// Blocks occupied by committed payloads.
    pub total_occupied_blk_count: u64,
    /// Replica set members.
    pub members: Vec<PgMember>,
    /// Physical chunk ids indexed by virtual chunk id.
    pub chunk_ids: Vec<ChunkId>,
}

impl PgInfoSuperblk {
    /// Total encoded size of this record.
    pub fn size(&self) -> usize {
        PG_SB_HEADER_LEN
            + self.members.len() * PG_MEMBER_RECORD_LEN
            + self.chunk_ids.len() * size_of::<ChunkId>()
    }

    /// Encode to the packed little-endian on-disk form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size());
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&(self.members.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.chunk_ids.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.replica_set_uuid.as_bytes());
        buf.extend_from_slice(&self.pg_size.to_le_bytes());
        buf.extend_from_slice(self.index_table_uuid.as_bytes());
        buf.extend_from_slice(&self.blob_sequence_num.to_le_bytes());
        buf.extend_from_slice(&self.active_blob_count.to_le_bytes());
        buf.extend_from_slice(&self.tombstone_blob_count.to_le_bytes());
        buf.extend_from_slice(&self.total_occupied_blk_count.to_le_bytes());

        for m in &self.members {
            buf.extend_from_slice(m.id.as_bytes());
            let mut name = [0u8; PG_MEMBER_NAME_LEN];
            let n = m.name.len().min(PG_MEMBER_NAME_LEN);
            name[..n].copy_from_slice(&m.name.as_bytes()[..n]);
            buf.extend_from_slice(&name);
            buf.extend_from_slice(&m.priority.to_le_bytes());
        }
        for c in &self.chunk_ids {
            buf.extend_from_slice(&c.to_le_bytes());
        }
        buf
    }

    /// Decode from the packed on-disk form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < PG_SB_HEADER_LEN {
            return Err(DecodeError::Truncated {
                need: PG_SB_HEADER_LEN,
                have: bytes.len(),
            });
        }
        let id = u16::from_le_bytes(bytes[0..2].try_into().unwrap());
        let num_members = u32::from_le_bytes(bytes[2..6].try_into().unwrap()) as usize;
        let num_chunks = u32::from_le_bytes(bytes[6..10].try_into().unwrap()) as usize;
        let replica_set_uuid = Uuid::from_bytes(bytes[10..26].try_into().unwrap());
        let pg_size = u64::from_le_bytes(bytes[26..34].try_into().unwrap());
        let index_table_uuid = Uuid::from_bytes(bytes[34..50].try_into().unwrap());
        let blob_sequence_num = u64::from_le_bytes(bytes[50..58].try_into().unwrap());
        let active_blob_count = u64::from_le_bytes(bytes[58..66].try_into().unwrap());
        let tombstone_blob_count = u64::from_le_bytes(bytes[66..74].try_into().unwrap());
        let total_occupied_blk_count = u64::from_le_bytes(bytes[74..82].try_into().unwrap());

        let need = PG_SB_HEADER_LEN
            + num_members * PG_MEMBER_RECORD_LEN
            + num_chunks * size_of::<ChunkId>();
        if bytes.len() < need {
            return Err(DecodeError::Truncated {
                need,
                have: bytes.len(),
            });
        }

        let mut off = PG_SB_HEADER_LEN;
        let mut members = Vec::with_capacity(num_members);
        for _ in 0..num_members {
            let peer = Uuid::from_bytes(bytes[off..off + 16].try_into().unwrap());
            let name_raw = &bytes[off + 16..off + 16 + PG_MEMBER_NAME_LEN];
            let name_end = name_raw.iter().position(|&b| b == 0).unwrap_or(name_raw.len());
            let name = String::from_utf8_lossy(&name_raw[..name_end]).into_owned();
            let prio_off = off + 16 + PG_MEMBER_NAME_LEN;
            let priority = i32::from_le_bytes(bytes[prio_off..prio_off + 4].try_into().unwrap());
            members.push(PgMember::with_name(peer, name, priority));
            off += PG_MEMBER_RECORD_LEN;
        }

        let mut chunk_ids = Vec::with_capacity(num_chunks);
        for _ in 0..num_chunks {
            chunk_ids.push(u16::from_le_bytes(bytes[off..off + 2].try_into().unwrap()));
            off += 2;
        }

        Ok(Self {
            id,
            replica_set_uuid,
            pg_size,
            index_table_uuid,
            blob_sequence_num,
            active_blob_count,
            tombstone_blob_count,
            total_occupied_blk_count,
            members,
            chunk_ids,
        })
    }
}

// ---------------------------------------------------------------------------
// Shard superblock
// ---------------------------------------------------------------------------

/// Encoded size of the embedded [`ShardInfo`]:
/// id (8) + pg (2) + state (4) + created (8) + modified (8) +
/// available_replica_count (4) + used (8) + deleted (8).
const SHARD_INFO_LEN: usize = 50;

/// Durable record of one shard and its chunk binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardInfoSuperblk {
    /// Shard descriptor.
    pub info: ShardInfo,
    /// Physical chunk the shard is bound to.
    pub p_chunk_id: ChunkId,
    /// Virtual chunk index within the owning PG.
    pub v_chunk_id: VChunkId,
}

impl ShardInfoSuperblk {
    /// Total encoded size.
    pub const ENCODED_LEN: usize = DataHeader::ENCODED_LEN + SHARD_INFO_LEN + 4;

    /// Create a record for the given shard and chunk binding.
    pub fn new(info: ShardInfo, p_chunk_id: ChunkId, v_chunk_id: VChunkId) -> Self {
        Self {
            info,
            p_chunk_id,
            v_chunk_id,
        }
    }

    /// Encode to the packed little-endian on-disk form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_LEN);
        DataHeader::new(DataType::ShardInfo).encode_into(&mut buf);
        buf.extend_from_slice(&self.info.id.to_le_bytes());
        buf.extend_from_slice(&self.info.placement_group.to_le_bytes());
        buf.extend_from_slice(&(self.info.state as u32).to_le_bytes());
        buf.extend_from_slice(&self.info.created_time.to_le_bytes());
        buf.extend_from_slice(&self.info.last_modified_time.to_le_bytes());
        buf.extend_from_slice(&self.info.available_replica_count.to_le_bytes());
        buf.extend_from_slice(&self.info.used_capacity_bytes.to_le_bytes());
        buf.extend_from_slice(&self.info.deleted_capacity_bytes.to_le_bytes());
        buf.extend_from_slice(&self.p_chunk_id.to_le_bytes());
        buf.extend_from_slice(&self.v_chunk_id.to_le_bytes());
        buf
    }

    /// Decode from the packed on-disk form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let header = DataHeader::decode(bytes)?;
        if header.data_type != DataType::ShardInfo {
            return Err(DecodeError::BadField("data_type"));
        }
        if bytes.len() < Self::ENCODED_LEN {
            return Err(DecodeError::Truncated {
                need: Self::ENCODED_LEN,
                have: bytes.len(),
            });
        }
        let b = &bytes[DataHeader::ENCODED_LEN..];
        let state_raw = u32::from_le_bytes(b[10..14].try_into().unwrap());
        let state = ShardState::from_u32(state_raw).ok_or(DecodeError::BadField("state"))?;
        let info = ShardInfo {
            id: u64::from_le_bytes(b[0..8].try_into().unwrap()),
            placement_group: u16::from_le_bytes(b[8..10].try_into().unwrap()),
            state,
            created_time: u64::from_le_bytes(b[14..22].try_into().unwrap()),
            last_modified_time: u64::from_le_bytes(b[22..30].try_into().unwrap()),
            available_replica_count: u32::from_le_bytes(b[30..34].try_into().unwrap()),
            used_capacity_bytes: u64::from_le_bytes(b[34..42].try_into().unwrap()),
            deleted_capacity_bytes: u64::from_le_bytes(b[42..50].try_into().unwrap()),
        };
        let p_chunk_id = u16::from_le_bytes(b[50..52].try_into().unwrap());
        let v_chunk_id = u16::from_le_bytes(b[52..54].try_into().unwrap());
        Ok(Self {
            info,
            p_chunk_id,
            v_chunk_id,
        })
    }
}

// ---------------------------------------------------------------------------
// Blob header
// ---------------------------------------------------------------------------

/// Payload hash algorithm recorded in a [`BlobHeader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HashAlgorithm {
    /// No payload hash.
    None = 0,
    /// CRC-32/IEEE over `user_key || blob_bytes`.
    Crc32 = 1,
    /// MD5 (reserved; not computed by this implementation).
    Md5 = 2,
    /// SHA-1 (reserved; not computed by this implementation).
    Sha1 = 3,
}

impl HashAlgorithm {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::Crc32),
            2 => Some(Self::Md5),
            3 => Some(Self::Sha1),
            _ => None,
        }
    }
}

/// Per-blob header, persisted as the first bytes of every blob payload.
///
/// Disk layout of a payload: `BlobHeader || user_key || blob_bytes || padding`
/// where `blob_bytes` starts at `data_offset` (aligned to
/// [`DEVICE_BLOCK_ALIGN`]) and the whole payload is zero-padded to
/// [`DATA_BLOCK_SIZE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobHeader {
    /// Payload hash algorithm.
    pub hash_algorithm: HashAlgorithm,
    /// Hash of `user_key || blob_bytes`, zero-padded to 32 bytes.
    pub hash: [u8; BLOB_MAX_HASH_LEN],
    /// Owning shard.
    pub shard_id: ShardId,
    /// Blob identifier.
    pub blob_id: BlobId,
    /// Size of the blob bytes.
    pub blob_size: u32,
    /// Offset of this blob within the caller's object.
    pub object_offset: u64,
    /// Offset of `blob_bytes` within the payload.
    pub data_offset: u32,
    /// Size of the user key.
    pub user_key_size: u32,
}

impl BlobHeader {
    /// Total encoded size.
    pub const ENCODED_LEN: usize = DataHeader::ENCODED_LEN + 1 + BLOB_MAX_HASH_LEN + 8 + 8 + 4 + 8 + 4 + 4;

    /// Encode to the packed little-endian form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_LEN);
        DataHeader::new(DataType::BlobInfo).encode_into(&mut buf);
        buf.push(self.hash_algorithm as u8);
        buf.extend_from_slice(&self.hash);
        buf.extend_from_slice(&self.shard_id.to_le_bytes());
        buf.extend_from_slice(&self.blob_id.to_le_bytes());
        buf.extend_from_slice(&self.blob_size.to_le_bytes());
        buf.extend_from_slice(&self.object_offset.to_le_bytes());
        buf.extend_from_slice(&self.data_offset.to_le_bytes());
        buf.extend_from_slice(&self.user_key_size.to_le_bytes());
        buf
    }

    /// Decode from the packed form, checking magic, version and type.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let header = DataHeader::decode(bytes)?;
        if header.data_type != DataType::BlobInfo {
            return Err(DecodeError::BadField("data_type"));
        }
        if bytes.len() < Self::ENCODED_LEN {
            return Err(DecodeError::Truncated {
                need: Self::ENCODED_LEN,
                have: bytes.len(),
            });
        }
        let b = &bytes[DataHeader::ENCODED_LEN..];
        let hash_algorithm =
            HashAlgorithm::from_u8(b[0]).ok_or(DecodeError::BadField("hash_algorithm"))?;
        let mut hash = [0u8; BLOB_MAX_HASH_LEN];
        hash.copy_from_slice(&b[1..1 + BLOB_MAX_HASH_LEN]);
        let b = &b[1 + BLOB_MAX_HASH_LEN..];
        Ok(Self {
            hash_algorithm,
            hash,
            shard_id: u64::from_le_bytes(b[0..8].try_into().unwrap()),
            blob_id: u64::from_le_bytes(b[8..16].try_into().unwrap()),
            blob_size: u32::from_le_bytes(b[16..20].try_into().unwrap()),
            object_offset: u64::from_le_bytes(b[20..28].try_into().unwrap()),
            data_offset: u32::from_le_bytes(b[28..32].try_into().unwrap()),
            user_key_size: u32::from_le_bytes(b[32..36].try_into().unwrap()),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::make_shard_id;

    fn sample_members() -> Vec<PgMember> {
        vec![
            PgMember::with_name(Uuid::new_v4(), "replica-1", 1),
            PgMember::with_name(Uuid::new_v4(), "replica-2", 0),
            PgMember::with_name(Uuid::new_v4(), "replica-3", -1),
        ]
    }

    fn sample_pg_sb() -> PgInfoSuperblk {
        PgInfoSuperblk {
            id: 7,
            replica_set_uuid: Uuid::new_v4(),
            pg_size: 4 << 30,
            index_table_uuid: Uuid::new_v4(),
            blob_sequence_num: 99,
            active_blob_count: 42,
            tombstone_blob_count: 3,
            total_occupied_blk_count: 1280,
            members: sample_members(),
            chunk_ids: vec![11, 5, 23, 8],
        }
    }

    #[test]
    fn test_pg_sb_roundtrip_byte_identical() {
        let sb = sample_pg_sb();
        let bytes = sb.to_bytes();
        assert_eq!(bytes.len(), sb.size());

        let decoded = PgInfoSuperblk::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, sb);
        // Re-encoding must reproduce the exact bytes.
        assert_eq!(decoded.to_bytes(), bytes);
    }

    #[test]
    fn test_pg_sb_size_formula() {
        let sb = sample_pg_sb();
        assert_eq!(sb.size(), 82 + 3 * 52 + 4 * 2);
    }

    #[test]
    fn test_pg_sb_empty_sections() {
        let mut sb = sample_pg_sb();
        sb.members.clear();
        sb.chunk_ids.clear();
        let decoded = PgInfoSuperblk::from_bytes(&sb.to_bytes()).unwrap();
        assert!(decoded.members.is_empty());
        assert!(decoded.chunk_ids.is_empty());
    }

    #[test]
    fn test_pg_sb_long_member_name_truncated() {
        let mut sb = sample_pg_sb();
        let long = "x".repeat(100);
        sb.members = vec![PgMember::with_name(Uuid::new_v4(), long, 2)];
        let decoded = PgInfoSuperblk::from_bytes(&sb.to_bytes()).unwrap();
        assert_eq!(decoded.members[0].name.len(), PG_MEMBER_NAME_LEN);
        assert_eq!(decoded.members[0].name, "x".repeat(PG_MEMBER_NAME_LEN));
    }

    #[test]
    fn test_pg_sb_truncated_buffer() {
        let bytes = sample_pg_sb().to_bytes();
        let err = PgInfoSuperblk::from_bytes(&bytes[..40]).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { .. }));
        // Header present but trailing sections cut short.
        let err = PgInfoSuperblk::from_bytes(&bytes[..90]).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { .. }));
    }

    fn sample_shard_sb() -> ShardInfoSuperblk {
        ShardInfoSuperblk::new(
            ShardInfo {
                id: make_shard_id(7, 3),
                placement_group: 7,
                state: ShardState::Open,
                created_time: 1_700_000_000,
                last_modified_time: 1_700_000_111,
                available_replica_count: 3,
                used_capacity_bytes: 8192,
                deleted_capacity_bytes: 0,
            },
            23,
            2,
        )
    }

    #[test]
    fn test_shard_sb_roundtrip_byte_identical() {
        let sb = sample_shard_sb();
        let bytes = sb.to_bytes();
        assert_eq!(bytes.len(), ShardInfoSuperblk::ENCODED_LEN);

        let decoded = ShardInfoSuperblk::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, sb);
        assert_eq!(decoded.to_bytes(), bytes);
    }

    #[test]
    fn test_shard_sb_rejects_bad_magic() {
        let mut bytes = sample_shard_sb().to_bytes();
        bytes[0] ^= 0xff;
        assert!(matches!(
            ShardInfoSuperblk::from_bytes(&bytes),
            Err(DecodeError::BadMagic(_))
        ));
    }

    #[test]
    fn test_shard_sb_rejects_future_version() {
        let mut bytes = sample_shard_sb().to_bytes();
        bytes[8] = DATA_HEADER_VERSION + 1;
        assert!(matches!(
            ShardInfoSuperblk::from_bytes(&bytes),
            Err(DecodeError::BadVersion(_))
        ));
    }

    #[test]
    fn test_shard_sb_rejects_bad_state() {
        let mut bytes = sample_shard_sb().to_bytes();
        // state field lives right after the header + id + pg fields.
        let off = DataHeader::ENCODED_LEN + 10;
        bytes[off..off + 4].copy_from_slice(&7u32.to_le_bytes());
        assert!(matches!(
            ShardInfoSuperblk::from_bytes(&bytes),
            Err(DecodeError::BadField("state"))
        ));
    }

    fn sample_blob_header() -> BlobHeader {
        let mut hash = [0u8; BLOB_MAX_HASH_LEN];
        hash[0..4].copy_from_slice(&0xdead_beefu32.to_le_bytes());
        BlobHeader {
            hash_algorithm: HashAlgorithm::Crc32,
            hash,
            shard_id: make_shard_id(2, 9),
            blob_id: 55,
            blob_size: 3072,
            object_offset: 1 << 20,
            data_offset: 512,
            user_key_size: 17,
        }
    }

    #[test]
    fn test_blob_header_roundtrip_byte_identical() {
        let header = sample_blob_header();
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), BlobHeader::ENCODED_LEN);

        let decoded = BlobHeader::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.to_bytes(), bytes);
    }

    #[test]
    fn test_blob_header_wrong_type_rejected() {
        // A shard record is not a blob header.
        let bytes = sample_shard_sb().to_bytes();
        assert!(matches!(
            BlobHeader::from_bytes(&bytes),
            Err(DecodeError::BadField("data_type"))
        ));
    }

    #[test]
    fn test_data_header_valid() {
        let h = DataHeader::new(DataType::BlobInfo);
        assert!(h.valid());
        let bad = DataHeader {
            magic: 0,
            ..DataHeader::new(DataType::BlobInfo)
        };
        assert!(!bad.valid());
    }
}

//! Per-PG ordered blob index.
//!
//! One [`IndexTable`] per placement group maps `(shard_id, blob_id)` to the
//! [`MultiBlkId`] extent of the committed payload. Keys are encoded
//! big-endian so the natural byte order equals `(shard_id, blob_id)` order,
//! which the PG blob iterator relies on for range scans.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use fjall::PartitionHandle;
use reef_types::{BlobId, MultiBlkId, ShardId};
use uuid::Uuid;

use crate::error::MetaError;

/// Encode an index key: `shard_id` then `blob_id`, both big-endian.
pub fn encode_key(shard_id: ShardId, blob_id: BlobId) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[0..8].copy_from_slice(&shard_id.to_be_bytes());
    key[8..16].copy_from_slice(&blob_id.to_be_bytes());
    key
}

fn decode_key(key: &[u8]) -> Result<(ShardId, BlobId), MetaError> {
    if key.len() != 16 {
        return Err(MetaError::CorruptData(format!(
            "index key expected 16 bytes, got {}",
            key.len()
        )));
    }
    let shard = u64::from_be_bytes(key[0..8].try_into().unwrap());
    let blob = u64::from_be_bytes(key[8..16].try_into().unwrap());
    Ok((shard, blob))
}

fn decode_value(value: &[u8]) -> Result<MultiBlkId, MetaError> {
    MultiBlkId::from_bytes(value).ok_or_else(|| {
        MetaError::CorruptData(format!(
            "index value expected {} bytes, got {}",
            MultiBlkId::ENCODED_LEN,
            value.len()
        ))
    })
}

/// Result of a conditional index insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The entry was inserted.
    Inserted,
    /// An entry already existed; carries the stored extent.
    Exists(MultiBlkId),
}

pub(crate) enum IndexInner {
    Fjall(PartitionHandle),
    Memory(Arc<RwLock<BTreeMap<[u8; 16], [u8; MultiBlkId::ENCODED_LEN]>>>),
}

/// Handle to one PG's blob index table.
///
/// Shared between the index-uuid map and the owning PG; cloning the handle
/// shares the underlying table. All writes arrive on the PG's serialized
/// commit stream, so conditional inserts need no extra synchronisation.
#[derive(Clone)]
pub struct IndexTable {
    uuid: Uuid,
    inner: Arc<IndexInner>,
}

impl IndexTable {
    pub(crate) fn new(uuid: Uuid, inner: IndexInner) -> Self {
        Self {
            uuid,
            inner: Arc::new(inner),
        }
    }

    /// Stable identity of this table.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Insert `(shard_id, blob_id) → blkid` unless the route already exists.
    pub fn put_if_absent(
        &self,
        shard_id: ShardId,
        blob_id: BlobId,
        blkid: MultiBlkId,
    ) -> Result<PutOutcome, MetaError> {
        let key = encode_key(shard_id, blob_id);
        match &*self.inner {
            IndexInner::Fjall(part) => {
                if let Some(existing) = part.get(key)? {
                    return Ok(PutOutcome::Exists(decode_value(&existing)?));
                }
                part.insert(key, blkid.to_bytes())?;
                Ok(PutOutcome::Inserted)
            }
            IndexInner::Memory(map) => {
                let mut map = map.write().expect("lock poisoned");
                if let Some(existing) = map.get(&key) {
                    return Ok(PutOutcome::Exists(decode_value(existing)?));
                }
                map.insert(key, blkid.to_bytes());
                Ok(PutOutcome::Inserted)
            }
        }
    }

    /// Overwrite the route unconditionally (tombstone writes).
    pub fn upsert(
        &self,
        shard_id: ShardId,
        blob_id: BlobId,
        blkid: MultiBlkId,
    ) -> Result<(), MetaError> {
        let key = encode_key(shard_id, blob_id);
        match &*self.inner {
            IndexInner::Fjall(part) => {
                part.insert(key, blkid.to_bytes())?;
            }
            IndexInner::Memory(map) => {
                map.write().expect("lock poisoned").insert(key, blkid.to_bytes());
            }
        }
        Ok(())
    }

    /// Look up the extent for a blob route.
    pub fn get(&self, shard_id: ShardId, blob_id: BlobId) -> Result<Option<MultiBlkId>, MetaError> {
        let key = encode_key(shard_id, blob_id);
        match &*self.inner {
            IndexInner::Fjall(part) => match part.get(key)? {
                Some(v) => Ok(Some(decode_value(&v)?)),
                None => Ok(None),
            },
            IndexInner::Memory(map) => {
                let map = map.read().expect("lock poisoned");
                map.get(&key).map(|v| decode_value(v)).transpose()
            }
        }
    }

    /// Scan one shard's routes in `blob_id` order, starting at `from_blob_id`
    /// inclusive, up to `max` entries. Tombstones are included.
    pub fn scan_shard(
        &self,
        shard_id: ShardId,
        from_blob_id: BlobId,
        max: usize,
    ) -> Result<Vec<(BlobId, MultiBlkId)>, MetaError> {
        let lo = encode_key(shard_id, from_blob_id);
        let hi = encode_key(shard_id, BlobId::MAX);
        let mut out = Vec::new();

        match &*self.inner {
            IndexInner::Fjall(part) => {
                for kv in part.range(lo..=hi) {
                    if out.len() >= max {
                        break;
                    }
                    let (k, v) = kv?;
                    let (_, blob_id) = decode_key(&k)?;
                    out.push((blob_id, decode_value(&v)?));
                }
            }
            IndexInner::Memory(map) => {
                let map = map.read().expect("lock poisoned");
                for (k, v) in map.range(lo..=hi) {
                    if out.len() >= max {
                        break;
                    }
                    let (_, blob_id) = decode_key(k)?;
                    out.push((blob_id, decode_value(v)?));
                }
            }
        }
        Ok(out)
    }

    /// Number of live (non-tombstone) routes. Test and diagnostics helper.
    pub fn live_count(&self) -> Result<u64, MetaError> {
        let mut n = 0;
        match &*self.inner {
            IndexInner::Fjall(part) => {
                for kv in part.iter() {
                    let (_, v) = kv?;
                    if !decode_value(&v)?.is_tombstone() {
                        n += 1;
                    }
                }
            }
            IndexInner::Memory(map) => {
                let map = map.read().expect("lock poisoned");
                for v in map.values() {
                    if !decode_value(v)?.is_tombstone() {
                        n += 1;
                    }
                }
            }
        }
        Ok(n)
    }
}
